//! All the clap stuff for parsing/documenting the `asp` cli.

use camino::Utf8PathBuf;
use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Clone, Debug)]
#[clap(version)]
#[clap(bin_name = "asp")]
/// Package manager and materializer for Agent Spaces.
///
/// See `install` and `build` for the two primary subcommands.
pub struct Cli {
    /// Subcommand to run.
    #[clap(subcommand)]
    pub command: Commands,

    /// How verbose logging should be.
    #[clap(long, short)]
    #[clap(default_value_t = LevelFilter::WARN)]
    #[clap(value_parser = PossibleValuesParser::new(["off", "error", "warn", "info", "debug", "trace"]).map(|s| s.parse::<LevelFilter>().expect("possible values are valid")))]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub verbose: LevelFilter,

    /// The format of the output.
    #[clap(long, short, value_enum)]
    #[clap(default_value_t = OutputFormat::Human)]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub output_format: OutputFormat,

    /// The project root (containing `asp-targets.toml`). Defaults to the
    /// current directory.
    #[clap(long)]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub project: Option<Utf8PathBuf>,

    /// Override `<aspHome>`. Defaults to `$ASP_HOME`, then `$HOME/.asp`.
    #[clap(long)]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub asp_home: Option<Utf8PathBuf>,

    /// The registry URL or local path, used when a fresh clone is needed.
    #[clap(long, default_value = "")]
    #[clap(help_heading = "GLOBAL OPTIONS", global = true)]
    pub registry: String,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Resolve targets, generate/merge the lock file, and populate the store.
    Install(InstallArgs),

    /// Materialize a target's plugin directories (installing first if needed).
    Build(BuildArgs),

    /// Report a target's resolved composition from the lock, without mutating anything.
    Explain(ExplainArgs),

    /// Delete snapshots and cache entries unreachable from the given lock files.
    Gc(GcArgs),
}

#[derive(clap::Args, Clone, Debug)]
pub struct InstallArgs {
    /// Restrict to these target names; omit for all targets.
    pub targets: Vec<String>,
    /// `git fetch` the registry working copy before resolving.
    #[clap(long)]
    pub fetch: bool,
}

#[derive(clap::Args, Clone, Debug)]
pub struct BuildArgs {
    /// The target name to build.
    pub target: String,
    /// Where materialized plugin directories are written.
    #[clap(long)]
    pub out: Utf8PathBuf,
    /// Remove the output directory's prior contents first.
    #[clap(long)]
    pub clean: bool,
    /// Don't run `install` automatically if the lock is missing or stale.
    #[clap(long)]
    pub no_auto_install: bool,
    /// Skip the linter.
    #[clap(long)]
    pub no_lint: bool,
    /// The harness to materialize for. Defaults to the target's/project's
    /// configured harness, then `claude`.
    #[clap(long)]
    pub harness: Option<String>,
}

#[derive(clap::Args, Clone, Debug)]
pub struct ExplainArgs {
    /// Restrict to these target names; omit for all targets in the lock.
    pub targets: Vec<String>,
    /// Also check whether each space's snapshot is present in the store.
    #[clap(long)]
    pub check_store: bool,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GcArgs {
    /// Lock files defining the reachable set. Defaults to this project's own lock.
    pub lock_files: Vec<Utf8PathBuf>,
    /// Report what would be deleted without deleting it.
    #[clap(long)]
    pub dry_run: bool,
}

/// Output rendering mode, shared by every subcommand.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable tables and messages.
    Human,
    /// Machine-readable JSON.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Human => write!(f, "human"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
