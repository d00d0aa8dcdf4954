//! High-level upgrade operations composing the isolation context, the
//! plugin configuration and the guarded executor.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde_derive::{Deserialize, Serialize};

use crate::config::{DriverConfig, DNF_PLUGIN_INSTALL_PATH, INSTALLROOT};
use crate::errors::TransactionError;
use crate::guards::{ConnectionGuard, Guard, SpaceGuard};
use crate::nspawn::{BindMount, IsolatedContext};
use crate::overlay::OverlayRoot;
use crate::plugin_data::PackageActionPlan;
use crate::transaction::{run_transaction, Stage};

/// One repository made available for the upgrade.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Repository {
    pub repoid: String,
}

/// A repo announcement: the repositories one upstream source says to use.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UsedRepositories {
    pub repos: Vec<Repository>,
}

/// The target userspace the transactions execute in.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TargetUserspace {
    /// Root of the prepared target userspace filesystem.
    pub path: Utf8PathBuf,
    /// Scratch directory for overlay upper/work layers.
    pub scratch: Utf8PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FstabEntry {
    pub fs_spec: String,
    pub fs_file: Utf8PathBuf,
}

/// Host storage layout facts gathered by the planner.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StorageInfo {
    pub fstab: Vec<FstabEntry>,
}

/// Deduplicated union of repo ids across all announcements. Input order
/// and duplicates are irrelevant.
pub fn target_repoids(used_repos: &[UsedRepositories]) -> BTreeSet<String> {
    used_repos
        .iter()
        .flat_map(|m| m.repos.iter().map(|r| r.repoid.clone()))
        .collect()
}

/// Answers mount-layout questions about the host. Split out so the bind
/// mount planner can be exercised against synthetic layouts.
pub trait MountProbe {
    fn is_dir(&self, path: &Utf8Path) -> bool;
    fn is_mount_point(&self, path: &Utf8Path) -> bool;
}

/// Probe backed by the real host: directories via the filesystem, mount
/// points via `/proc/self/mounts`.
pub struct HostProbe;

impl MountProbe for HostProbe {
    fn is_dir(&self, path: &Utf8Path) -> bool {
        path.is_dir()
    }

    fn is_mount_point(&self, path: &Utf8Path) -> bool {
        let mounts = match std::fs::read_to_string("/proc/self/mounts") {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("failed to read /proc/self/mounts: {e}");
                return false;
            }
        };
        mounts
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|mp| mp == path.as_str())
    }
}

/// The bind mount set for a full transaction install: the entire disk
/// layout is reproduced inside the isolated root so the external tool
/// sees the real system during a genuine upgrade.
pub fn transaction_bind_mounts(storage: &StorageInfo, probe: &dyn MountProbe) -> Vec<BindMount> {
    let installroot = Utf8Path::new(INSTALLROOT);
    let mut binds = vec![
        BindMount::new("/", installroot),
        BindMount::new("/sys", installroot.join("sys")),
        BindMount::new("/dev", installroot.join("dev")),
        BindMount::new("/proc", installroot.join("proc")),
        BindMount::new("/run/udev", installroot.join("run/udev")),
    ];
    let mut covered: BTreeSet<Utf8PathBuf> =
        binds.iter().map(|b| b.source.clone()).collect();

    for entry in &storage.fstab {
        let mp = &entry.fs_file;
        if !probe.is_dir(mp) || covered.contains(mp) {
            continue;
        }
        covered.insert(mp.clone());
        binds.push(BindMount::new(
            mp.clone(),
            installroot.join(mp.as_str().trim_start_matches('/')),
        ));
    }

    for boot in ["/boot", "/boot/efi"] {
        let boot = Utf8Path::new(boot);
        if probe.is_mount_point(boot) {
            binds.push(BindMount::new(
                boot,
                installroot.join(boot.as_str().trim_start_matches('/')),
            ));
        }
    }
    binds
}

/// Install the bundled dnf plugin into the target userspace, if a source
/// for it was configured.
#[context("Installing dnf plugin")]
fn install_plugin(cfg: &DriverConfig, target_basedir: &Utf8Path) -> Result<()> {
    let Some(source) = &cfg.plugin_source else {
        return Ok(());
    };
    let target = target_basedir.join(DNF_PLUGIN_INSTALL_PATH);
    let parent = target.parent().expect("plugin path has a parent");
    std::fs::create_dir_all(parent).with_context(|| format!("creating {parent}"))?;
    std::fs::copy(source, &target).with_context(|| format!("copying {source} to {target}"))?;
    Ok(())
}

fn enter_context(
    cfg: &DriverConfig,
    userspace: &TargetUserspace,
    binds: Vec<BindMount>,
) -> Result<IsolatedContext, TransactionError> {
    IsolatedContext::enter(cfg.nspawn_tool.clone(), userspace.path.clone(), binds)
}

fn default_guards(cfg: &DriverConfig, userspace: &TargetUserspace) -> Vec<Box<dyn Guard>> {
    vec![
        Box::new(ConnectionGuard::new(cfg.guard_urls.clone())),
        Box::new(SpaceGuard {
            path: userspace.path.clone(),
            required_bytes: cfg.min_free_bytes,
        }),
    ]
}

/// Install packages needed by the upgrade initram disk. This takes the
/// simple path: a plain `dnf install` with the target repos enabled one
/// by one and everything else disabled; no plugin configuration and no
/// guard pipeline.
#[context("Installing initram disk requirements")]
pub fn install_initramdisk_requirements(
    cfg: &DriverConfig,
    packages: &[String],
    userspace: &TargetUserspace,
    used_repos: &[UsedRepositories],
    sink: &mut dyn FnMut(&str),
) -> Result<()> {
    let repoids = target_repoids(used_repos);
    let ctx = enter_context(cfg, userspace, Vec::new())?;
    let platform_opt = format!("--setopt=module_platform_id={}", cfg.platform_id);
    let mut argv: Vec<&str> = vec![
        cfg.dnf_tool.as_str(),
        "install",
        "-y",
        "--nogpgcheck",
        &platform_opt,
        "--setopt=keepcache=1",
        "--disablerepo",
        "*",
    ];
    for repoid in &repoids {
        argv.push("--enablerepo");
        argv.push(repoid);
    }
    for package in packages {
        argv.push(package);
    }
    if cfg.verbose {
        argv.push("-v");
    }
    ctx.call(&argv, sink)?;
    Ok(())
}

/// Perform the actual upgrade installation with the full bind mount set.
pub fn perform_transaction_install(
    cfg: &DriverConfig,
    userspace: &TargetUserspace,
    storage: &StorageInfo,
    used_repos: &[UsedRepositories],
    plan: &PackageActionPlan,
    probe: &dyn MountProbe,
    sink: &mut dyn FnMut(&str),
) -> Result<()> {
    install_plugin(cfg, &userspace.path)?;
    let repoids = target_repoids(used_repos);
    let binds = transaction_bind_mounts(storage, probe);
    let ctx = enter_context(cfg, userspace, binds)?;
    let guards = default_guards(cfg, userspace);
    let guard_refs: Vec<&dyn Guard> = guards.iter().map(|g| g.as_ref()).collect();
    run_transaction(&ctx, Stage::Upgrade, &repoids, plan, cfg, &guard_refs, sink)
}

fn overlay_transaction(
    cfg: &DriverConfig,
    userspace: &TargetUserspace,
    used_repos: &[UsedRepositories],
    plan: &PackageActionPlan,
    stage: Stage,
    sink: &mut dyn FnMut(&str),
) -> Result<()> {
    install_plugin(cfg, &userspace.path)?;
    let repoids = target_repoids(used_repos);
    let ctx = enter_context(cfg, userspace, Vec::new())?;
    // The upgrade source layout is layered copy-on-write under the
    // installroot so the stage can resolve against the real system
    // without touching it.
    let _overlay = OverlayRoot::new(
        cfg,
        &userspace.scratch,
        Utf8Path::new("/"),
        &ctx.host_path(INSTALLROOT),
    )?;
    let guards = default_guards(cfg, userspace);
    let guard_refs: Vec<&dyn Guard> = guards.iter().map(|g| g.as_ref()).collect();
    run_transaction(&ctx, stage, &repoids, plan, cfg, &guard_refs, sink)
}

/// Run the transaction check stage against an overlay root.
pub fn perform_transaction_check(
    cfg: &DriverConfig,
    userspace: &TargetUserspace,
    used_repos: &[UsedRepositories],
    plan: &PackageActionPlan,
    sink: &mut dyn FnMut(&str),
) -> Result<()> {
    overlay_transaction(cfg, userspace, used_repos, plan, Stage::Check, sink)
}

/// Download the transaction's packages (dry-run semantics) against an
/// overlay root.
pub fn perform_rpm_download(
    cfg: &DriverConfig,
    userspace: &TargetUserspace,
    used_repos: &[UsedRepositories],
    plan: &PackageActionPlan,
    sink: &mut dyn FnMut(&str),
) -> Result<()> {
    overlay_transaction(cfg, userspace, used_repos, plan, Stage::Download, sink)
}
