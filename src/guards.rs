//! Precondition guards, run after the manifest is in place and before
//! the external tool is launched. A tripped guard prevents a doomed
//! transaction from ever starting.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::Duration;

use camino::Utf8PathBuf;

use crate::errors::GuardViolation;

pub trait Guard {
    fn name(&self) -> &'static str;
    fn check(&self) -> Result<(), GuardViolation>;
}

/// Require a minimum amount of free space on the filesystem holding
/// `path`.
#[derive(Debug)]
pub struct SpaceGuard {
    pub path: Utf8PathBuf,
    pub required_bytes: u64,
}

impl Guard for SpaceGuard {
    fn name(&self) -> &'static str {
        "space"
    }

    fn check(&self) -> Result<(), GuardViolation> {
        let stat = nix::sys::statvfs::statvfs(self.path.as_std_path()).map_err(|e| {
            GuardViolation {
                guard: self.name(),
                reason: format!("statvfs({}) failed: {e}", self.path),
            }
        })?;
        let available = stat.blocks_available() as u64 * stat.fragment_size() as u64;
        if available < self.required_bytes {
            return Err(GuardViolation {
                guard: self.name(),
                reason: format!(
                    "{} has {available} bytes free, {} required",
                    self.path, self.required_bytes
                ),
            });
        }
        Ok(())
    }
}

/// Require that at least one of the configured URLs answers. An empty
/// URL list means no remote repositories are required and the guard
/// passes trivially.
#[derive(Debug)]
pub struct ConnectionGuard {
    pub urls: Vec<String>,
    pub timeout: Duration,
}

impl ConnectionGuard {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Guard for ConnectionGuard {
    fn name(&self) -> &'static str {
        "connection"
    }

    fn check(&self) -> Result<(), GuardViolation> {
        if self.urls.is_empty() {
            return Ok(());
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| GuardViolation {
                guard: self.name(),
                reason: format!("failed to construct HTTP client: {e}"),
            })?;
        for url in &self.urls {
            match client.head(url).send() {
                Ok(_) => return Ok(()),
                Err(e) => tracing::debug!("connection probe {url} failed: {e}"),
            }
        }
        Err(GuardViolation {
            guard: self.name(),
            reason: format!("none of {} probe URLs were reachable", self.urls.len()),
        })
    }
}

/// Run every guard in order, failing on the first violation.
pub fn check_guards(guards: &[&dyn Guard]) -> Result<(), GuardViolation> {
    for guard in guards {
        tracing::debug!("running {} guard", guard.name());
        guard.check()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_guard_passes_small_requirement() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = SpaceGuard {
            path: Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap(),
            required_bytes: 1,
        };
        guard.check().unwrap();
    }

    #[test]
    fn space_guard_trips_on_absurd_requirement() {
        let tmp = tempfile::tempdir().unwrap();
        let guard = SpaceGuard {
            path: Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap(),
            required_bytes: u64::MAX,
        };
        let violation = guard.check().unwrap_err();
        assert_eq!(violation.guard, "space");
    }

    #[test]
    fn connection_guard_empty_is_vacuous() {
        ConnectionGuard::new(Vec::new()).check().unwrap();
    }

    #[test]
    fn connection_guard_trips_when_unreachable() {
        let mut guard = ConnectionGuard::new(vec!["http://127.0.0.1:1/".to_string()]);
        guard.timeout = Duration::from_millis(200);
        let violation = guard.check().unwrap_err();
        assert_eq!(violation.guard, "connection");
    }

    #[test]
    fn check_guards_reports_first_violation() {
        let tmp = tempfile::tempdir().unwrap();
        let ok = SpaceGuard {
            path: Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap(),
            required_bytes: 1,
        };
        let bad = SpaceGuard {
            path: Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap(),
            required_bytes: u64::MAX,
        };
        assert!(check_guards(&[&ok]).is_ok());
        assert!(check_guards(&[&ok, &bad]).is_err());
    }
}
