#![deny(missing_docs)]

//! CLI binary for Agent Spaces: `asp install` / `asp build` / `asp explain` / `asp gc`.

use asp_core::config;
use asp_core::orchestrator::{self, BuildOptions, ExplainOptions, GcOptions, InstallOptions, Paths};
use clap::Parser;
use cli::{BuildArgs, Cli, Commands, ExplainArgs, GcArgs, InstallArgs, OutputFormat};
use console::Term;
use miette::IntoDiagnostic;

mod cli;

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbose)
        .with_target(false)
        .without_time()
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(32)
        .enable_all()
        .build()
        .expect("initializing tokio runtime failed");
    let _guard = runtime.enter();

    if let Err(report) = real_main(&cli) {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

fn real_main(cli: &Cli) -> Result<(), miette::Report> {
    let project_root = match &cli.project {
        Some(p) => p.clone(),
        None => camino::Utf8PathBuf::try_from(std::env::current_dir().into_diagnostic()?).into_diagnostic()?,
    };
    let asp_home = config::resolve_asp_home(cli.asp_home.clone()).into_diagnostic()?;
    let paths = Paths {
        project_root,
        asp_home,
        registry_url: cli.registry.clone(),
    };

    match &cli.command {
        Commands::Install(args) => cmd_install(cli, &paths, args),
        Commands::Build(args) => cmd_build(cli, &paths, args),
        Commands::Explain(args) => cmd_explain(cli, &paths, args),
        Commands::Gc(args) => cmd_gc(cli, &paths, args),
    }
}

fn cmd_install(cli: &Cli, paths: &Paths, args: &InstallArgs) -> Result<(), miette::Report> {
    let opts = InstallOptions {
        targets: args.targets.clone(),
        fetch_registry: args.fetch,
        pinned_spaces: Default::default(),
    };
    let result = orchestrator::install(paths, &opts).into_diagnostic()?;

    match cli.output_format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "lockPath": result.lock_path,
                "snapshotsCreated": result.snapshots_created,
                "resolvedTargets": result.resolved_targets,
            });
            println!("{}", serde_json::to_string_pretty(&payload).into_diagnostic()?);
        }
        OutputFormat::Human => {
            let term = Term::stdout();
            let _ = term.write_line(&format!("wrote {}", result.lock_path));
            let _ = term.write_line(&format!("snapshots created: {}", result.snapshots_created));
            let _ = term.write_line(&format!("targets resolved: {}", result.resolved_targets.join(", ")));
        }
    }
    Ok(())
}

fn cmd_build(cli: &Cli, paths: &Paths, args: &BuildArgs) -> Result<(), miette::Report> {
    let opts = BuildOptions {
        output_dir: args.out.clone(),
        clean: args.clean,
        auto_install: !args.no_auto_install,
        run_lint: !args.no_lint,
        harness: args.harness.clone(),
        install: InstallOptions::default(),
    };
    let result = orchestrator::build(paths, &args.target, &opts).into_diagnostic()?;

    match cli.output_format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "pluginDirs": result.plugin_dirs,
                "mcpConfigPath": result.mcp_config_path,
                "settingsPath": result.settings_path,
                "warnings": result.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&payload).into_diagnostic()?);
        }
        OutputFormat::Human => {
            let term = Term::stdout();
            for dir in &result.plugin_dirs {
                let _ = term.write_line(&format!("built {dir}"));
            }
            print_warnings(&term, &result.warnings);
        }
    }
    Ok(())
}

fn cmd_explain(cli: &Cli, paths: &Paths, args: &ExplainArgs) -> Result<(), miette::Report> {
    let opts = ExplainOptions {
        targets: args.targets.clone(),
        check_store: args.check_store,
    };
    let report = orchestrator::explain(paths, &opts).into_diagnostic()?;

    match cli.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&explain_json(&report)).into_diagnostic()?);
        }
        OutputFormat::Human => {
            let term = Term::stdout();
            for (name, target) in &report {
                let _ = term.write_line(&format!("target {name}: {} spaces", target.spaces.len()));
                let mut table = comfy_table::Table::new();
                table.set_header(vec!["space", "commit", "plugin", "in store"]);
                for row in &target.spaces {
                    table.add_row(vec![
                        row.id.as_str().to_string(),
                        row.commit.as_str().chars().take(12).collect(),
                        row.plugin_name.clone(),
                        row.in_store.map(|b| b.to_string()).unwrap_or_else(|| "?".to_string()),
                    ]);
                }
                let _ = term.write_line(&table.to_string());
                print_warnings(&term, &target.warnings);
            }
        }
    }
    Ok(())
}

fn explain_json(report: &std::collections::BTreeMap<String, orchestrator::ExplainTargetRow>) -> serde_json::Value {
    serde_json::Value::Object(
        report
            .iter()
            .map(|(name, target)| {
                let spaces: Vec<_> = target
                    .spaces
                    .iter()
                    .map(|row| {
                        serde_json::json!({
                            "key": row.key,
                            "id": row.id,
                            "commit": row.commit,
                            "pluginName": row.plugin_name,
                            "pluginVersion": row.plugin_version,
                            "integrity": row.integrity,
                            "path": row.path,
                            "deps": row.deps,
                            "resolvedFrom": row.resolved_from,
                            "inStore": row.in_store,
                        })
                    })
                    .collect();
                (
                    name.clone(),
                    serde_json::json!({
                        "compose": target.compose,
                        "roots": target.roots,
                        "loadOrder": target.load_order,
                        "envHash": target.env_hash,
                        "spaces": spaces,
                        "warnings": target.warnings,
                    }),
                )
            })
            .collect(),
    )
}

fn cmd_gc(cli: &Cli, paths: &Paths, args: &GcArgs) -> Result<(), miette::Report> {
    let lock_files = if args.lock_files.is_empty() {
        let raw = std::fs::read_to_string(paths.project_root.join("asp-lock.json")).into_diagnostic()?;
        vec![serde_json::from_str(&raw).into_diagnostic()?]
    } else {
        args.lock_files
            .iter()
            .map(|p| -> Result<_, miette::Report> {
                let raw = std::fs::read_to_string(p).into_diagnostic()?;
                serde_json::from_str(&raw).into_diagnostic()
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let opts = GcOptions { dry_run: args.dry_run };
    let result = orchestrator::gc(paths, &lock_files, &opts).into_diagnostic()?;

    match cli.output_format {
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "snapshotsDeleted": result.snapshots_deleted,
                "cacheEntriesDeleted": result.cache_entries_deleted,
                "bytesFreed": result.bytes_freed,
            });
            println!("{}", serde_json::to_string_pretty(&payload).into_diagnostic()?);
        }
        OutputFormat::Human => {
            let term = Term::stdout();
            let _ = term.write_line(&format!(
                "snapshots deleted: {}, cache entries deleted: {}, bytes freed: {}",
                result.snapshots_deleted, result.cache_entries_deleted, result.bytes_freed
            ));
        }
    }
    Ok(())
}

fn print_warnings(term: &Term, warnings: &[asp_schema::Warning]) {
    for warning in warnings {
        let _ = term.write_line(&format!("[{:?}] {}: {}", warning.severity, warning.code, warning.message));
    }
}
