use std::collections::BTreeSet;
use std::io::Write;

use serde::Serialize;

use crate::classify::RemediationSets;
use crate::config::AuditConfig;
use crate::context::{Notification, PackageContext, PackageState, StageError};
use crate::manifest::ManifestState;
use crate::scan::ScanOutcome;

#[derive(Debug, Clone, Serialize)]
pub struct PackageEntry {
    pub package: String,
    pub devel_project: String,
    pub state: PackageState,
    pub manifest: ManifestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regenerated: Option<bool>,
    pub outcome: ScanOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StageError>,
}

impl From<&PackageContext> for PackageEntry {
    fn from(ctx: &PackageContext) -> Self {
        Self {
            package: ctx.package.clone(),
            devel_project: ctx.devel_project.clone(),
            state: ctx.state,
            manifest: ctx.manifest.clone(),
            regenerated: ctx.regenerated,
            outcome: ctx
                .outcome
                .clone()
                .unwrap_or_else(|| ScanOutcome::ScanFailed("not scanned".to_string())),
            notifications: ctx.notifications.clone(),
            errors: ctx.errors.clone(),
        }
    }
}

impl PackageEntry {
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.devel_project, self.package)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub api_url: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
    pub packages: Vec<PackageEntry>,
    pub remediation: RemediationSets,
    #[serde(skip)]
    pub bulk_update_command: Option<String>,
}

impl RunReport {
    pub fn new(
        config: &AuditConfig,
        advisory: Option<String>,
        contexts: &[PackageContext],
        remediation: RemediationSets,
    ) -> Self {
        Self {
            api_url: config.api_url.clone(),
            project: config.project.clone(),
            advisory,
            packages: contexts.iter().map(PackageEntry::from).collect(),
            remediation,
            bulk_update_command: config.bulk_update_command.clone(),
        }
    }

    fn branch_command(&self, item: &str) -> String {
        format!("osc -A {} bco {item}", self.api_url)
    }

    fn failed_scans(&self) -> impl Iterator<Item = (&PackageEntry, &str)> {
        self.packages.iter().filter_map(|entry| match &entry.outcome {
            ScanOutcome::ScanFailed(reason) => Some((entry, reason.as_str())),
            _ => None,
        })
    }
}

pub trait OutputFormatter {
    fn write_report(&self, report: &RunReport, writer: &mut dyn Write) -> std::io::Result<()>;
}

/// The remediation summary with copy-pasteable branch commands.
pub struct TextOutput;

impl TextOutput {
    fn write_branch_commands(
        report: &RunReport,
        items: &BTreeSet<String>,
        writer: &mut dyn Write,
    ) -> std::io::Result<()> {
        for item in items {
            writeln!(writer, "{}", report.branch_command(item))?;
        }
        Ok(())
    }
}

impl OutputFormatter for TextOutput {
    fn write_report(&self, report: &RunReport, writer: &mut dyn Write) -> std::io::Result<()> {
        let sets = &report.remediation;
        writeln!(writer, "--- complete")?;

        if !sets.fast_update.is_empty() {
            match &report.advisory {
                Some(id) => writeln!(
                    writer,
                    "- the following pkgs need SECURITY updates to address {id} - svc setup"
                )?,
                None => writeln!(writer, "- the following pkgs need SECURITY updates - svc setup")?,
            }
            Self::write_branch_commands(report, &sets.fast_update, writer)?;

            if let Some(bulk) = &report.bulk_update_command {
                let items: Vec<&str> = sets.fast_update.iter().map(String::as_str).collect();
                writeln!(writer, " Alternately")?;
                writeln!(writer, " {bulk} {}", items.join(" "))?;
            }
        }

        if !sets.slow_update.is_empty() {
            match &report.advisory {
                Some(id) => writeln!(
                    writer,
                    "- the following pkgs need SECURITY updates to address {id} - manual, missing cargo_vendor"
                )?,
                None => writeln!(writer, "- the following pkgs need SECURITY updates - manual")?,
            }
            Self::write_branch_commands(report, &sets.slow_update, writer)?;
        }

        if !sets.needs_vendor_automation.is_empty() {
            writeln!(
                writer,
                "- the following are NOT vulnerable but SHOULD have services updated to include cargo_vendor!"
            )?;
            Self::write_branch_commands(report, &sets.needs_vendor_automation, writer)?;
        }

        let mut failed = report.failed_scans().peekable();
        if failed.peek().is_some() {
            writeln!(writer, "- the following pkgs could not be scanned and were treated as vulnerable")?;
            for (entry, reason) in failed {
                writeln!(writer, "  {}: {reason}", entry.qualified())?;
            }
        }

        if sets.is_empty() {
            writeln!(writer, "- no remediation required")?;
        }
        Ok(())
    }
}

pub struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn write_report(&self, report: &RunReport, writer: &mut dyn Write) -> std::io::Result<()> {
        serde_json::to_writer_pretty(&mut *writer, report)?;
        writeln!(writer)?;
        Ok(())
    }
}

pub fn formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonOutput)
    } else {
        Box::new(TextOutput)
    }
}
