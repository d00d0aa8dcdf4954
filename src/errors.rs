//! Error taxonomy for transaction execution.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use camino::Utf8PathBuf;
use thiserror::Error;

/// A precondition check failed before the external tool was launched.
#[derive(Debug, Error)]
#[error("{guard} guard violated: {reason}")]
pub struct GuardViolation {
    /// Short name of the guard that tripped, e.g. `space` or `connection`.
    pub guard: &'static str,
    pub reason: String,
}

/// Fatal failures of a transaction stage. Every variant aborts the current
/// upgrade stage; none of them is retried automatically.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The plugin configuration could not be built or written.
    #[error("failed to write dnf plugin configuration to {path}")]
    Config {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A space or connectivity guard tripped; the external tool was
    /// never invoked.
    #[error(transparent)]
    Guard(#[from] GuardViolation),

    /// The external tool binary could not be launched at all. This is
    /// distinct from the tool running and exiting with a failure.
    #[error("could not launch {tool}")]
    Launch {
        tool: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external tool ran and exited nonzero. Carries everything the
    /// tool wrote so the failure can be diagnosed after the fact.
    #[error("dnf execution failed with exit code {status}\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")]
    Execution {
        status: i32,
        stdout: String,
        stderr: String,
    },

    /// The isolated execution root could not be set up or operated on.
    #[error("isolation failure: {reason}")]
    Isolation {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl TransactionError {
    pub(crate) fn isolation(reason: impl Into<String>, source: std::io::Error) -> Self {
        Self::Isolation {
            reason: reason.into(),
            source: Some(source),
        }
    }
}
