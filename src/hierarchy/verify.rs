use serde::Serialize;
use tracing::warn;

use crate::model::Representation;

/// Upper bound on findings kept in one report.
pub const MAX_FINDINGS: usize = 32;

/// Indicates the severity level of an integrity finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth knowing about but not a broken invariant.
    Warning,
    /// A structural invariant does not hold.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finding {
    /// The severity level of this finding.
    pub severity: Severity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Result of [`crate::Hierarchy::check_integrity`].
#[derive(Clone, Debug, Serialize)]
pub struct IntegrityReport {
    /// Layout that was checked.
    pub representation: Representation,
    /// Rows examined.
    pub nodes_checked: u64,
    /// Issues found, at most [`MAX_FINDINGS`].
    pub findings: Vec<Finding>,
    /// True when no error-level finding was recorded.
    pub success: bool,
}

impl IntegrityReport {
    pub(crate) fn new(representation: Representation) -> Self {
        Self {
            representation,
            nodes_checked: 0,
            findings: Vec::new(),
            success: true,
        }
    }

    /// True once the findings list is full; further checks can stop early.
    pub(crate) fn is_full(&self) -> bool {
        self.findings.len() >= MAX_FINDINGS
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        self.success = false;
        self.push(Severity::Error, message.into());
    }

    pub(crate) fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message.into());
    }

    fn push(&mut self, severity: Severity, message: String) {
        if self.is_full() {
            return;
        }
        warn!(
            representation = %self.representation,
            severity = ?severity,
            %message,
            "hierarchy.verify.finding"
        );
        self.findings.push(Finding { severity, message });
    }

    /// Error-level findings only.
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|finding| finding.severity == Severity::Error)
    }
}
