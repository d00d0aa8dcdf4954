//! Driver configuration. There are no global accessors here on purpose;
//! every entry point takes an explicit [`DriverConfig`].

// SPDX-License-Identifier: Apache-2.0 OR MIT

use camino::{Utf8Path, Utf8PathBuf};

/// Name of the plugin configuration file, as expected by the
/// `rhel-upgrade` dnf plugin.
pub const PLUGIN_DATA_NAME: &str = "dnf-plugin-data.txt";

/// Where the plugin configuration lives inside the isolated root.
pub const PLUGIN_DATA_PATH: &str = "/var/lib/dnf-upgrade-driver/dnf-plugin-data.txt";

/// Where dnf writes solver debug data inside the isolated root when
/// `debugsolver` is on.
pub const DEBUG_DATA_PATH: &str = "/debugdata";

/// The path under which the upgrade target filesystem appears inside the
/// isolated root. Also baked into the plugin configuration.
pub const INSTALLROOT: &str = "/installroot";

/// Where the bundled dnf plugin is installed, relative to the target
/// userspace root.
pub const DNF_PLUGIN_INSTALL_PATH: &str = "lib/python3.6/site-packages/dnf-plugins/rhel_upgrade.py";

/// Configuration for one upgrade run.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Turns on solver debug data collection and its backup on the
    /// `check` stage.
    pub debug: bool,
    /// Passes `-v` to the external tool and the initramfs install.
    pub verbose: bool,
    /// Target release version, e.g. `8.4`.
    pub releasever: String,
    /// Target module platform id, e.g. `platform:el8`.
    pub platform_id: String,
    /// Host directory receiving backup copies of the plugin
    /// configuration and debug data.
    pub log_dir: Utf8PathBuf,
    /// The external package manager binary.
    pub dnf_tool: Utf8PathBuf,
    /// The containment tool used to execute commands inside the
    /// isolated root.
    pub nspawn_tool: Utf8PathBuf,
    /// Mount/umount binaries used for the copy-on-write overlay root.
    pub mount_tool: Utf8PathBuf,
    pub umount_tool: Utf8PathBuf,
    /// Minimum free space required on the context base directory before
    /// a transaction is attempted.
    pub min_free_bytes: u64,
    /// URLs probed by the connectivity guard; empty disables the probe.
    /// Defaults to well-known hosts the upgrade content is served from.
    pub guard_urls: Vec<String>,
    /// If set, the bundled dnf plugin is installed into the target
    /// userspace before any transaction runs.
    pub plugin_source: Option<Utf8PathBuf>,
}

impl DriverConfig {
    pub fn new(releasever: impl Into<String>) -> Self {
        Self {
            debug: false,
            verbose: false,
            releasever: releasever.into(),
            platform_id: "platform:el8".to_string(),
            log_dir: "/var/log/dnf-upgrade-driver".into(),
            dnf_tool: "/usr/bin/dnf".into(),
            nspawn_tool: "/usr/bin/systemd-nspawn".into(),
            mount_tool: "/usr/bin/mount".into(),
            umount_tool: "/usr/bin/umount".into(),
            min_free_bytes: 100 * 1024 * 1024,
            guard_urls: vec![
                "https://cdn.redhat.com".to_string(),
                "https://subscription.rhsm.redhat.com".to_string(),
            ],
            plugin_source: None,
        }
    }

    /// Host path of the backup copy of the plugin configuration.
    pub fn plugin_data_log_path(&self) -> Utf8PathBuf {
        self.log_dir.join(PLUGIN_DATA_NAME)
    }

    /// Host directory receiving the solver debug data backup.
    pub fn debug_data_log_path(&self) -> Utf8PathBuf {
        self.log_dir.join("dnf-debugdata")
    }
}

/// In-context parent directory of the plugin configuration.
pub(crate) fn plugin_data_dir() -> &'static Utf8Path {
    Utf8Path::new(PLUGIN_DATA_PATH)
        .parent()
        .expect("plugin data path has a parent")
}
