#![deny(missing_docs)]

//! # asp-core
//!
//! Dependency resolution, content-addressed storage, and materialization
//! for Agent Spaces: versioned, composable bundles of commands, skills,
//! agents, hooks, and MCP servers that get resolved against a git registry,
//! locked, and materialized into a coding-agent harness's plugin directory
//! layout.
//!
//! The pieces compose roughly in this order:
//! - [`config`] loads and validates `asp-targets.toml` and `space.toml`.
//! - [`asp_registry::Resolver`] (re-exported by `asp-registry`) resolves a
//!   target's `compose` list to a dependency-ordered closure.
//! - [`integrity`] hashes a resolved space's content, both from a git tree
//!   and from an extracted filesystem snapshot, by construction agreeing.
//! - [`lockgen`] turns a closure into `asp-lock.json` entries.
//! - [`store`] extracts and caches content-addressed snapshots and
//!   materialized plugin trees under `<aspHome>`.
//! - [`harness`] adapts the canonical materialized shape to a specific
//!   coding-agent harness (only `claude` today).
//! - [`materialize`] links a space's components into a plugin directory and
//!   composes a target's MCP servers and settings.
//! - [`lint`] runs non-fatal structural checks over a materialized target.
//! - [`orchestrator`] ties all of the above into `install`/`build`/`explain`/`gc`.
//!
//! [`fs`] provides the atomic-write and advisory-lock primitives every
//! durable mutation in this crate goes through, and [`errors`] is the single
//! error type every fallible operation here returns.

pub mod config;
pub mod errors;
pub mod fs;
pub mod harness;
pub mod integrity;
pub mod lint;
pub mod lockgen;
pub mod materialize;
pub mod orchestrator;
pub mod store;

/// The environment variable consulted for `<aspHome>` when no `--asp-home`
/// flag is given; falls back to `$HOME/.asp`.
pub const ASP_HOME_ENV: &str = "ASP_HOME";

/// The environment variable consulted for the Claude harness's own install
/// path, where relevant to adapter behavior outside this crate's scope.
pub const ASP_CLAUDE_PATH_ENV: &str = "ASP_CLAUDE_PATH";
