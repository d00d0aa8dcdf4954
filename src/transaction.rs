//! The guarded transaction executor.
//!
//! One invocation walks a fixed sequence: write the plugin configuration
//! into the context, back it up to the log directory, run the guards,
//! invoke the external tool, and (for the `check` stage) extract solver
//! debug data regardless of how the tool fared.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeSet;

use fn_error_context::context;

use crate::config::{DriverConfig, DEBUG_DATA_PATH, PLUGIN_DATA_PATH};
use crate::errors::TransactionError;
use crate::guards::{check_guards, Guard};
use crate::nspawn::IsolatedContext;
use crate::plugin_data::{PackageActionPlan, PluginData};

/// Phases of a package-manager transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Check,
    Download,
    Upgrade,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Check => "check",
            Stage::Download => "download",
            Stage::Upgrade => "upgrade",
        }
    }

    /// The `download` stage resolves and fetches the transaction without
    /// committing it.
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Stage::Download)
    }

    /// Only `check` produces solver debug data worth extracting.
    fn captures_debug_data(&self) -> bool {
        matches!(self, Stage::Check)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy the live plugin configuration out to the log directory.
/// Diagnostic convenience only: a failure is logged and swallowed, the
/// transaction proceeds on the live copy.
fn backup_plugin_data(ctx: &IsolatedContext, cfg: &DriverConfig) {
    let backup = || -> std::io::Result<()> {
        std::fs::create_dir_all(&cfg.log_dir)?;
        ctx.copy_from(PLUGIN_DATA_PATH, cfg.plugin_data_log_path())
    };
    if let Err(e) = backup() {
        tracing::warn!("failed to back up plugin configuration: {e}");
    }
}

/// Extract the solver debug data generated by `--debugsolver` from the
/// context. Runs on success and failure alike; never escalates.
fn backup_debug_data(ctx: &IsolatedContext, cfg: &DriverConfig) {
    if !cfg.debug {
        return;
    }
    if let Err(e) = ctx.copy_tree_from(DEBUG_DATA_PATH, cfg.debug_data_log_path()) {
        tracing::warn!("failed to copy dnf debug data: {e}");
    }
}

/// Run one transaction stage inside the context.
///
/// Guards run after the configuration is persisted and before the
/// external tool is launched; a violation means zero launch attempts.
/// Raw tool output is streamed into `sink` as it is produced.
#[context("Running dnf {stage} transaction")]
pub fn run_transaction(
    ctx: &IsolatedContext,
    stage: Stage,
    target_repoids: &BTreeSet<String>,
    plan: &PackageActionPlan,
    cfg: &DriverConfig,
    guards: &[&dyn Guard],
    sink: &mut dyn FnMut(&str),
) -> anyhow::Result<()> {
    let data = PluginData::build(target_repoids, cfg.debug, stage.is_dry_run(), plan, cfg);
    data.persist(ctx)?;
    backup_plugin_data(ctx, cfg);

    check_guards(guards).map_err(TransactionError::from)?;

    let mut argv: Vec<&str> = vec![
        cfg.dnf_tool.as_str(),
        "rhel-upgrade",
        stage.as_str(),
        PLUGIN_DATA_PATH,
    ];
    if cfg.verbose {
        argv.push("-v");
    }
    let result = ctx.call(&argv, sink);

    // Terminal transition: debug capture happens on both the success and
    // the failure path, before any error propagates.
    if stage.captures_debug_data() {
        backup_debug_data(ctx, cfg);
    }

    match result {
        Ok(_) => Ok(()),
        Err(e @ TransactionError::Launch { .. }) => {
            tracing::error!("could not call dnf: {e}");
            Err(e.into())
        }
        Err(e @ TransactionError::Execution { .. }) => {
            tracing::error!("dnf execution failed");
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
