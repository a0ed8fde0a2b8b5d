// file: src/models/sync.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reconcile::OperationPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub uid: String,
    pub kind: OperationKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    InvalidEventBlock,
    InvalidRecurrenceRule,
    IdentityAmbiguous,
    UnknownTimeZone,
}

/// A per-event problem that did not stop the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub uid: Option<String>,
    pub line: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, uid: Option<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind,
            uid,
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Completed,
    CompletedWithErrors,
}

/// Structured outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub adopted: usize,
    pub failed: usize,
    pub failures: Vec<OperationFailure>,
    pub diagnostics: Vec<Diagnostic>,
    pub dry_run: bool,
    /// The computed plan, present only for dry runs.
    pub plan: Option<OperationPlan>,
    pub sync_time: DateTime<Utc>,
}

impl SyncReport {
    pub fn empty() -> Self {
        Self {
            created: 0,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            adopted: 0,
            failed: 0,
            failures: Vec::new(),
            diagnostics: Vec::new(),
            dry_run: false,
            plan: None,
            sync_time: Utc::now(),
        }
    }

    /// Report for a plan that was computed but not executed.
    pub fn dry_run(plan: OperationPlan) -> Self {
        let mut report = Self::empty();
        report.created = plan.creates.len();
        report.updated = plan.updates.len();
        report.deleted = plan.deletes.len();
        report.adopted = plan.unchanged.iter().filter(|u| u.is_adoption()).count();
        report.unchanged = plan.unchanged.len() - report.adopted;
        report.diagnostics = plan.diagnostics.clone();
        report.dry_run = true;
        report.plan = Some(plan);
        report
    }

    pub fn record_failure(&mut self, uid: impl Into<String>, kind: OperationKind, detail: impl Into<String>) {
        self.failed += 1;
        self.failures.push(OperationFailure {
            uid: uid.into(),
            kind,
            detail: detail.into(),
        });
    }

    pub fn status(&self) -> PassStatus {
        if self.failed > 0 {
            PassStatus::CompletedWithErrors
        } else {
            PassStatus::Completed
        }
    }

    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_report_empty() {
        let report = SyncReport::empty();
        assert_eq!(report.status(), PassStatus::Completed);
        assert_eq!(report.total_changes(), 0);
        assert!(report.failures.is_empty());
        assert!(!report.dry_run);
    }

    #[test]
    fn test_sync_report_with_failure() {
        let mut report = SyncReport::empty();
        report.created = 2;
        report.record_failure("abc", OperationKind::Update, "store timeout");

        assert_eq!(report.status(), PassStatus::CompletedWithErrors);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].kind, OperationKind::Update);
        assert_eq!(report.failures[0].uid, "abc");
    }

    #[test]
    fn test_sync_report_json_export() {
        let mut report = SyncReport::empty();
        report.record_failure("x", OperationKind::Delete, "gone");
        let json = report.to_json().unwrap();
        assert!(json.contains("\"kind\": \"delete\""));
        assert!(json.contains("\"failed\": 1"));
    }
}
