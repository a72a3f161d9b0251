use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::manifest::ManifestState;
use crate::scan::ScanOutcome;

/// Where a package is in the audit. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Pending,
    CheckedOut,
    Inspected,
    Automated,
    ManualCandidate,
    Regenerated,
    Scanned,
    Classified,
}

impl PackageState {
    fn rank(self) -> u8 {
        match self {
            PackageState::Pending => 0,
            PackageState::CheckedOut => 1,
            PackageState::Inspected => 2,
            PackageState::Automated | PackageState::ManualCandidate => 3,
            PackageState::Regenerated => 4,
            PackageState::Scanned => 5,
            PackageState::Classified => 6,
        }
    }
}

/// Something the package maintainer should be asked to fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    MissingVendor,
    MissingVendorUpdate,
    MissingAudit,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::MissingVendor => write!(f, "missing cargo_vendor service"),
            Notification::MissingVendorUpdate => write!(f, "missing cargo_vendor auto update"),
            Notification::MissingAudit => write!(f, "missing cargo_audit service"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

#[derive(Debug)]
pub struct PackageContext {
    pub package: String,
    pub devel_project: String,
    /// Local working copy.
    pub dir: PathBuf,
    pub state: PackageState,
    pub manifest: ManifestState,
    pub regenerated: Option<bool>,
    pub outcome: Option<ScanOutcome>,
    pub notifications: Vec<Notification>,
    pub errors: Vec<StageError>,
}

impl PackageContext {
    pub fn new(package: impl Into<String>, devel_project: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            package: package.into(),
            devel_project: devel_project.into(),
            dir,
            state: PackageState::Pending,
            manifest: ManifestState::default(),
            regenerated: None,
            outcome: None,
            notifications: vec![],
            errors: vec![],
        }
    }

    /// `devel_project/package`, the reference remediation commands act on.
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.devel_project, self.package)
    }

    pub fn advance(&mut self, next: PackageState) {
        debug_assert!(
            next.rank() >= self.state.rank(),
            "{}: state may not move from {:?} back to {:?}",
            self.package,
            self.state,
            next
        );
        self.state = next;
    }

    pub fn record_error(&mut self, stage: &str, error: impl fmt::Display) {
        self.errors.push(StageError {
            stage: stage.to_string(),
            message: error.to_string(),
        });
    }

    pub fn notify(&mut self, notification: Notification) {
        if !self.notifications.contains(&notification) {
            self.notifications.push(notification);
        }
    }

    pub fn is_vulnerable(&self) -> bool {
        !self.outcome.as_ref().is_some_and(ScanOutcome::is_clean)
    }
}
