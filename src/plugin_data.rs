//! The configuration file consumed by the `rhel-upgrade` dnf plugin.
//!
//! Serialized format (JSON, sorted keys, 2-space indent):
//!
//! ```json
//! {
//!   "dnf_conf": {
//!     "allow_erasing": true,
//!     "best": true,
//!     "debugsolver": false,
//!     "disable_repos": true,
//!     "enable_repos": ["repo-x"],
//!     "gpgcheck": false,
//!     "installroot": "/installroot",
//!     "platform_id": "platform:el8",
//!     "releasever": "8.4",
//!     "test_flag": false
//!   },
//!   "pkgs_info": {
//!     "local_rpms": ["/installroot/var/lib/pkg.rpm"],
//!     "to_install": ["pkg"],
//!     "to_remove": [],
//!     "to_upgrade": []
//!   }
//! }
//! ```
//!
//! Key order must stay sorted so two runs over the same inputs produce
//! byte-identical files; operators diff these across attempts. Struct
//! fields below are declared in sorted order and serde serializes them
//! in declaration order.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde_derive::{Deserialize, Serialize};

use crate::config::{DriverConfig, INSTALLROOT, PLUGIN_DATA_PATH};
use crate::errors::TransactionError;
use crate::nspawn::IsolatedContext;

/// The package operations for one upgrade run. Built once by the
/// planner, immutable afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct PackageActionPlan {
    /// Paths of local rpm files, relative to the upgrade target root.
    #[serde(default)]
    pub local_rpms: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub to_install: BTreeSet<String>,
    #[serde(default)]
    pub to_remove: BTreeSet<String>,
    #[serde(default)]
    pub to_upgrade: BTreeSet<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DnfConf {
    pub allow_erasing: bool,
    pub best: bool,
    pub debugsolver: bool,
    pub disable_repos: bool,
    pub enable_repos: Vec<String>,
    pub gpgcheck: bool,
    pub installroot: String,
    pub platform_id: String,
    pub releasever: String,
    pub test_flag: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PkgsInfo {
    pub local_rpms: Vec<String>,
    pub to_install: Vec<String>,
    pub to_remove: Vec<String>,
    pub to_upgrade: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PluginData {
    pub dnf_conf: DnfConf,
    pub pkgs_info: PkgsInfo,
}

impl PluginData {
    /// Build the plugin configuration. Pure and deterministic: identical
    /// inputs serialize to byte-identical documents.
    pub fn build(
        target_repoids: &BTreeSet<String>,
        debug: bool,
        test: bool,
        plan: &PackageActionPlan,
        cfg: &DriverConfig,
    ) -> Self {
        let installroot = Utf8Path::new(INSTALLROOT);
        Self {
            dnf_conf: DnfConf {
                allow_erasing: true,
                best: true,
                debugsolver: debug,
                disable_repos: true,
                enable_repos: target_repoids.iter().cloned().collect(),
                gpgcheck: false,
                installroot: INSTALLROOT.to_string(),
                platform_id: cfg.platform_id.clone(),
                releasever: cfg.releasever.clone(),
                test_flag: test,
            },
            pkgs_info: PkgsInfo {
                local_rpms: plan
                    .local_rpms
                    .iter()
                    .map(|p| {
                        installroot
                            .join(p.as_str().trim_start_matches('/'))
                            .into_string()
                    })
                    .collect(),
                to_install: plan.to_install.iter().cloned().collect(),
                to_remove: plan.to_remove.iter().cloned().collect(),
                to_upgrade: plan.to_upgrade.iter().cloned().collect(),
            },
        }
    }

    /// Serialize with 2-space indentation.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("plugin data serializes")
    }

    /// Write the configuration to its fixed path inside the context,
    /// creating parent directories as needed.
    pub fn persist(&self, ctx: &IsolatedContext) -> Result<(), TransactionError> {
        let path = Utf8Path::new(PLUGIN_DATA_PATH);
        let write = || -> std::io::Result<()> {
            ctx.make_dirs(crate::config::plugin_data_dir())?;
            ctx.write(path, self.to_json().as_bytes())
        };
        write().map_err(|source| TransactionError::Config {
            path: path.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn repoids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn build_is_deterministic() {
        let plan = PackageActionPlan {
            local_rpms: vec!["/var/lib/pkgs/local.rpm".into()],
            to_install: ["b".to_string(), "a".to_string()].into(),
            ..Default::default()
        };
        let cfg = DriverConfig::new("8.4");
        let repos = repoids(&["z-repo", "a-repo", "z-repo"]);
        let one = PluginData::build(&repos, true, false, &plan, &cfg).to_json();
        let two = PluginData::build(&repos, true, false, &plan, &cfg).to_json();
        similar_asserts::assert_eq!(one, two);
        // Duplicates collapse, output is sorted.
        let parsed: PluginData = serde_json::from_str(&one).unwrap();
        assert_eq!(parsed.dnf_conf.enable_repos, vec!["a-repo", "z-repo"]);
        assert_eq!(parsed.pkgs_info.to_install, vec!["a", "b"]);
    }

    #[test]
    fn local_rpms_are_rooted_in_installroot() {
        let plan = PackageActionPlan {
            local_rpms: vec!["/var/pkg.rpm".into(), "rel/pkg2.rpm".into()],
            ..Default::default()
        };
        let cfg = DriverConfig::new("8.4");
        let data = PluginData::build(&repoids(&[]), false, false, &plan, &cfg);
        assert_eq!(
            data.pkgs_info.local_rpms,
            vec!["/installroot/var/pkg.rpm", "/installroot/rel/pkg2.rpm"]
        );
    }

    /// Scenario: one package to install, one enabled repo, upgrade stage.
    #[test]
    fn serialized_form() {
        let plan = PackageActionPlan {
            to_install: ["pkgA".to_string()].into(),
            ..Default::default()
        };
        let cfg = DriverConfig::new("8.4");
        let data = PluginData::build(&repoids(&["repoX"]), false, false, &plan, &cfg);
        similar_asserts::assert_eq!(
            data.to_json(),
            indoc! {r#"
                {
                  "dnf_conf": {
                    "allow_erasing": true,
                    "best": true,
                    "debugsolver": false,
                    "disable_repos": true,
                    "enable_repos": [
                      "repoX"
                    ],
                    "gpgcheck": false,
                    "installroot": "/installroot",
                    "platform_id": "platform:el8",
                    "releasever": "8.4",
                    "test_flag": false
                  },
                  "pkgs_info": {
                    "local_rpms": [],
                    "to_install": [
                      "pkgA"
                    ],
                    "to_remove": [],
                    "to_upgrade": []
                  }
                }"#}
            .trim_end()
        );
    }
}
