use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://api.opensuse.org";
pub const DEFAULT_PROJECT: &str = "openSUSE:Factory";

/// Packages that are never audited: already handled elsewhere, without real
/// rust dependencies, or dead.
const DEFAULT_EXCLUDE: &[&str] = &[
    "MozillaFirefox",
    "MozillaThunderbird",
    "rust",
    "obs-service-cargo_audit",
    "cargo-audit-advisory-db",
    "rust-packaging",
    "seamonkey",
    "meson:test",
];

/// How repeated package names in the dependency listing are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Keep the first occurrence of every name.
    #[default]
    Dedupe,
    /// Pass the listing through untouched.
    Keep,
}

/// Verdict for a general scan whose reports carry no advisory records at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyReportPolicy {
    /// Any non-empty report sequence is vulnerable.
    #[default]
    Vulnerable,
    /// Reports whose advisory lists are all empty count as clean.
    Clean,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub program: String,
    pub config: PathBuf,
    /// Path of `osc` as seen from inside the sandbox.
    pub osc_path: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: "nsjail".to_string(),
            config: PathBuf::from("scan.cfg"),
            osc_path: "/usr/bin/osc".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Command prefix; `--json --file <lockfile>` is appended.
    pub command: Vec<String>,
    pub tar_program: String,
    /// Unpacks `*.obscpio` archives.
    pub cpio_program: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            command: vec!["cargo".to_string(), "audit".to_string()],
            tar_program: "tar".to_string(),
            cpio_program: "cpio".to_string(),
        }
    }
}

/// Immutable settings for one audit run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub api_url: String,
    pub project: String,
    /// Upstream package whose dependents are audited.
    pub component: String,
    pub repository: String,
    pub arch: String,
    pub exclude: BTreeSet<String>,
    pub work_dir: PathBuf,
    pub osc_program: String,
    pub sandbox: SandboxConfig,
    pub scanner: ScannerConfig,
    pub duplicates: DuplicatePolicy,
    pub empty_report_policy: EmptyReportPolicy,
    pub bulk_update_command: Option<String>,
    pub max_concurrency: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            project: DEFAULT_PROJECT.to_string(),
            component: "rust".to_string(),
            repository: "standard".to_string(),
            arch: "x86_64".to_string(),
            exclude: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            work_dir: PathBuf::from("."),
            osc_program: "osc".to_string(),
            sandbox: SandboxConfig::default(),
            scanner: ScannerConfig::default(),
            duplicates: DuplicatePolicy::default(),
            empty_report_policy: EmptyReportPolicy::default(),
            bulk_update_command: None,
            max_concurrency: 1,
        }
    }
}

impl AuditConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: AuditConfig =
            serde_yaml::from_str(yaml).context("failed to parse audit configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("max_concurrency must be at least 1");
        }
        if self.scanner.command.is_empty() {
            anyhow::bail!("scanner.command must not be empty");
        }
        // Repeated names share one working copy.
        if self.duplicates == DuplicatePolicy::Keep && self.max_concurrency > 1 {
            anyhow::bail!("duplicates: keep requires max_concurrency 1");
        }
        Ok(())
    }

    /// Directory holding the working copies of `project`.
    pub fn project_dir(&self) -> PathBuf {
        self.work_dir.join(&self.project)
    }

    pub fn package_dir(&self, package: &str) -> PathBuf {
        self.project_dir().join(package)
    }
}
