//! The CLI entry point.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use dnf_upgrade_driver::config::DriverConfig;
use dnf_upgrade_driver::report::{LogSink, Report, ReportSink};
use dnf_upgrade_driver::TransactionError;
use dnf_upgrade_driver::{
    install_initramdisk_requirements, perform_rpm_download, perform_transaction_check,
    perform_transaction_install, HostProbe, PackageActionPlan, StorageInfo, TargetUserspace,
    UsedRepositories,
};

#[derive(Parser, Debug)]
#[command(name = "dnf-upgrade-driver", version, about)]
struct Cli {
    /// Collect and back up solver debug data on the check stage.
    #[arg(long, global = true)]
    debug: bool,

    /// Pass -v to the external tool.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Target release version, e.g. 8.4.
    #[arg(long, global = true, default_value = "8.4")]
    releasever: String,

    /// Override the backup log directory.
    #[arg(long, global = true)]
    log_dir: Option<Utf8PathBuf>,

    /// Install this dnf plugin file into the target userspace first.
    #[arg(long, global = true)]
    plugin_source: Option<Utf8PathBuf>,

    /// Override the connectivity guard's probe URLs (repeatable).
    #[arg(long = "guard-url", global = true)]
    guard_urls: Vec<String>,

    /// Target userspace facts (JSON file).
    #[arg(long, global = true, default_value = "userspace.json")]
    userspace: Utf8PathBuf,

    /// Repo announcements (JSON file, list of messages).
    #[arg(long, global = true, default_value = "repos.json")]
    repos: Utf8PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the transaction check stage against an overlay root.
    Check {
        /// Package action plan (JSON file).
        #[arg(long, default_value = "plan.json")]
        plan: Utf8PathBuf,
    },
    /// Download the transaction's packages without committing it.
    Download {
        #[arg(long, default_value = "plan.json")]
        plan: Utf8PathBuf,
    },
    /// Perform the actual upgrade installation.
    Upgrade {
        #[arg(long, default_value = "plan.json")]
        plan: Utf8PathBuf,
        /// Host storage facts (JSON file).
        #[arg(long, default_value = "storage.json")]
        storage: Utf8PathBuf,
    },
    /// Install packages required by the upgrade initram disk.
    InstallInitramfs {
        packages: Vec<String>,
    },
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Utf8PathBuf) -> Result<T> {
    let f = std::fs::File::open(path).with_context(|| format!("opening {path}"))?;
    serde_json::from_reader(std::io::BufReader::new(f)).with_context(|| format!("parsing {path}"))
}

fn inner_main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = DriverConfig::new(cli.releasever.clone());
    cfg.debug = cli.debug;
    cfg.verbose = cli.verbose;
    cfg.plugin_source = cli.plugin_source.clone();
    if let Some(log_dir) = &cli.log_dir {
        cfg.log_dir = log_dir.clone();
    }
    if !cli.guard_urls.is_empty() {
        cfg.guard_urls = cli.guard_urls.clone();
    }

    let userspace: TargetUserspace = load_json(&cli.userspace)?;
    let used_repos: Vec<UsedRepositories> = load_json(&cli.repos)?;
    let mut sink = |line: &str| println!("{line}");

    match &cli.command {
        Cmd::Check { plan } => {
            let plan: PackageActionPlan = load_json(plan)?;
            perform_transaction_check(&cfg, &userspace, &used_repos, &plan, &mut sink)
        }
        Cmd::Download { plan } => {
            let plan: PackageActionPlan = load_json(plan)?;
            perform_rpm_download(&cfg, &userspace, &used_repos, &plan, &mut sink)
        }
        Cmd::Upgrade { plan, storage } => {
            let plan: PackageActionPlan = load_json(plan)?;
            let storage: StorageInfo = load_json(storage)?;
            perform_transaction_install(
                &cfg, &userspace, &storage, &used_repos, &plan, &HostProbe, &mut sink,
            )
        }
        Cmd::InstallInitramfs { packages } => {
            install_initramdisk_requirements(&cfg, packages, &userspace, &used_repos, &mut sink)
        }
    }
}

fn main() {
    // Stderr, because raw tool output is streamed to stdout.
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    tracing::trace!("starting");
    if let Err(e) = inner_main() {
        // A tripped guard inhibits the upgrade; tell the operator why.
        if let Some(TransactionError::Guard(violation)) = e.downcast_ref::<TransactionError>() {
            LogSink.emit(&Report::inhibitor(
                "Upgrade preconditions not met",
                violation.to_string(),
            ));
        }
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
