//! Interface to the reporting subsystem. Rendering and delivery of
//! reports belong to the surrounding orchestration framework; this crate
//! only produces them.

// SPDX-License-Identifier: Apache-2.0 OR MIT

use serde_derive::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A structured report about a condition the operator should see.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Report {
    pub title: String,
    pub summary: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// An inhibiting report stops the upgrade from proceeding.
    #[serde(default)]
    pub inhibitor: bool,
}

impl Report {
    pub fn new(title: impl Into<String>, summary: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
            severity,
            tags: Vec::new(),
            inhibitor: false,
        }
    }

    /// A high-severity report that inhibits the upgrade, e.g. the
    /// reaction to a tripped space guard.
    pub fn inhibitor(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            inhibitor: true,
            ..Self::new(title, summary, Severity::High)
        }
    }
}

/// Where reports go. The framework supplies the real sink.
pub trait ReportSink {
    fn emit(&mut self, report: &Report);
}

/// Sink that forwards reports to the tracing log, used by the CLI.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn emit(&mut self, report: &Report) {
        match report.severity {
            Severity::High => tracing::error!(
                title = report.title.as_str(),
                inhibitor = report.inhibitor,
                "{}",
                report.summary
            ),
            Severity::Medium => tracing::warn!(title = report.title.as_str(), "{}", report.summary),
            Severity::Low => tracing::info!(title = report.title.as_str(), "{}", report.summary),
        }
    }
}
