use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::command::{CommandRunner, Invocation};
use crate::config::{EmptyReportPolicy, ScannerConfig};

/// One `cargo audit --json` report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditReport {
    pub vulnerabilities: VulnerabilityList,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VulnerabilityList {
    #[serde(default)]
    pub found: bool,
    pub list: Vec<Vulnerability>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vulnerability {
    pub advisory: AdvisoryRecord,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdvisoryRecord {
    pub id: String,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl AuditReport {
    pub fn advisory_ids(&self) -> impl Iterator<Item = &str> {
        self.vulnerabilities
            .list
            .iter()
            .map(|v| v.advisory.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ScanOutcome {
    Clean,
    VulnerableGeneral,
    VulnerableSpecific(String),
    ScanFailed(String),
}

impl ScanOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanOutcome::Clean)
    }
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanOutcome::Clean => write!(f, "clean"),
            ScanOutcome::VulnerableGeneral => write!(f, "vulnerable"),
            ScanOutcome::VulnerableSpecific(id) => write!(f, "affected by {id}"),
            ScanOutcome::ScanFailed(reason) => write!(f, "scan failed: {reason}"),
        }
    }
}

/// Produces vulnerability reports for a package's sources.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(
        &self,
        source_dir: &Path,
        manifest: Option<&Path>,
        lockfile: Option<&Path>,
    ) -> Result<Vec<AuditReport>>;
    fn name(&self) -> &str;
}

/// Turn raw reports into an outcome.
///
/// With a target advisory only that id matters. Otherwise any report counts,
/// except that reports without advisory records defer to `policy`.
pub fn interpret(
    reports: &[AuditReport],
    target: Option<&str>,
    policy: EmptyReportPolicy,
) -> ScanOutcome {
    if let Some(id) = target {
        let affected = reports
            .iter()
            .flat_map(AuditReport::advisory_ids)
            .any(|found| found == id);
        return if affected {
            ScanOutcome::VulnerableSpecific(id.to_string())
        } else {
            ScanOutcome::Clean
        };
    }

    let vulnerable = match policy {
        EmptyReportPolicy::Vulnerable => !reports.is_empty(),
        EmptyReportPolicy::Clean => reports.iter().any(|r| !r.vulnerabilities.list.is_empty()),
    };
    if vulnerable {
        ScanOutcome::VulnerableGeneral
    } else {
        ScanOutcome::Clean
    }
}

/// Runs the scanner for one package and never fails.
pub struct ScanInvoker {
    scanner: Arc<dyn Scanner>,
    target: Option<String>,
    policy: EmptyReportPolicy,
}

impl ScanInvoker {
    pub fn new(scanner: Arc<dyn Scanner>, target: Option<String>, policy: EmptyReportPolicy) -> Self {
        Self {
            scanner,
            target,
            policy,
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    #[instrument(skip(self), fields(scanner = self.scanner.name()))]
    pub async fn invoke(&self, source_dir: &Path, lockfile: Option<&Path>) -> ScanOutcome {
        let reports = match self.scanner.scan(source_dir, None, lockfile).await {
            Ok(reports) => reports,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "scanner was unable to be run");
                return ScanOutcome::ScanFailed(format!("{e:#}"));
            }
        };

        let outcome = interpret(&reports, self.target(), self.policy);
        match &outcome {
            ScanOutcome::Clean => info!(verdict = %outcome, "scan passed"),
            _ => warn!(verdict = %outcome, reports = reports.len(), "scan flagged package"),
        }
        outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ArchiveKind {
    Tar,
    /// `obs_scm` output: a newc cpio archive.
    Cpio,
}

const TAR_SUFFIXES: &[&str] = &[".tar", ".tar.gz", ".tgz", ".tar.xz", ".tar.zst", ".tar.bz2"];
const CPIO_SUFFIXES: &[&str] = &[".obscpio", ".cpio"];

fn archive_kind(path: &Path) -> Option<ArchiveKind> {
    let name = path.file_name()?.to_str()?;
    if TAR_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        Some(ArchiveKind::Tar)
    } else if CPIO_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        Some(ArchiveKind::Cpio)
    } else {
        None
    }
}

fn list_archives(dir: &Path) -> Result<Vec<(PathBuf, ArchiveKind)>> {
    let mut archives: Vec<(PathBuf, ArchiveKind)> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter_map(|path| archive_kind(&path).map(|kind| (path, kind)))
        .collect();
    archives.sort();
    Ok(archives)
}

fn find_files(root: &Path, matches: &dyn Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n == ".osc") {
                    continue;
                }
                stack.push(path);
            } else if matches(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Scans with `cargo audit`, after unpacking any source archives found in the
/// package directory.
pub struct CargoAuditScanner {
    runner: Arc<dyn CommandRunner>,
    config: ScannerConfig,
}

impl CargoAuditScanner {
    pub fn new(runner: Arc<dyn CommandRunner>, config: ScannerConfig) -> Self {
        Self { runner, config }
    }

    fn unpack_invocation(&self, archive: &Path, kind: ArchiveKind, root: &Path) -> Invocation {
        let archive = archive.display().to_string();
        match kind {
            ArchiveKind::Tar => Invocation::new(&self.config.tar_program)
                .arg("-xf")
                .arg(archive)
                .arg("-C")
                .arg(root.display().to_string()),
            ArchiveKind::Cpio => Invocation::new(&self.config.cpio_program)
                .args(["-idm", "--quiet", "-F"])
                .arg(archive)
                .current_dir(root),
        }
    }

    /// Unpack every archive in `source_dir` into its own directory under
    /// `dest`. An archive that fails to unpack is skipped with a warning.
    async fn unpack(&self, source_dir: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        let source_dir = std::path::absolute(source_dir)
            .with_context(|| format!("failed to resolve {}", source_dir.display()))?;
        let archives = tokio::task::spawn_blocking(move || list_archives(&source_dir))
            .await
            .context("archive listing did not complete")??;

        let mut roots = Vec::new();
        for (idx, (archive, kind)) in archives.iter().enumerate() {
            let root = dest.join(idx.to_string());
            std::fs::create_dir_all(&root)?;
            let inv = self.unpack_invocation(archive, *kind, &root);
            match self.runner.run(&inv).await.and_then(|out| out.check(&inv)) {
                Ok(_) => {
                    debug!(archive = %archive.display(), "unpacked");
                    roots.push(root);
                }
                Err(e) => warn!(
                    archive = %archive.display(),
                    error = %format!("{e:#}"),
                    "failed to unpack, skipping archive"
                ),
            }
        }
        Ok(roots)
    }

    fn locate_lockfiles(
        roots: &[PathBuf],
        manifest: Option<&Path>,
        lockfile: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        if let Some(lockfile) = lockfile {
            // A declared lockfile is relative to the top of the unpacked sources.
            let mut candidates = Vec::new();
            for root in roots {
                candidates.push(root.join(lockfile));
                if let Ok(entries) = std::fs::read_dir(root) {
                    for entry in entries.flatten() {
                        if entry.path().is_dir() {
                            candidates.push(entry.path().join(lockfile));
                        }
                    }
                }
            }
            let found: Vec<PathBuf> = candidates.into_iter().filter(|p| p.is_file()).collect();
            if found.is_empty() {
                bail!("lockfile {} not found in sources", lockfile.display());
            }
            return Ok(found);
        }

        if let Some(manifest) = manifest {
            let beside = manifest.with_file_name("Cargo.lock");
            if beside.is_file() {
                return Ok(vec![beside]);
            }
        }

        let mut found = Vec::new();
        for root in roots {
            found.extend(find_files(root, &|p| {
                p.file_name().is_some_and(|n| n == "Cargo.lock")
            })?);
        }
        if found.is_empty() {
            bail!("no Cargo.lock found in sources");
        }
        Ok(found)
    }

    async fn audit_lockfile(&self, lockfile: &Path) -> Result<AuditReport> {
        let (program, prefix) = self
            .config
            .command
            .split_first()
            .context("scanner command is empty")?;
        let inv = Invocation::new(program)
            .args(prefix.iter().cloned())
            .args(["--json", "--file"])
            .arg(lockfile.display().to_string());
        let out = self.runner.run(&inv).await?;
        // cargo audit exits non-zero when it finds vulnerabilities; the JSON
        // on stdout is authoritative.
        if out.stdout.trim().is_empty() {
            bail!("`{inv}` produced no report: {}", out.combined().trim_end());
        }
        serde_json::from_str(&out.stdout)
            .with_context(|| format!("unexpected report shape from `{inv}`"))
    }
}

#[async_trait]
impl Scanner for CargoAuditScanner {
    #[instrument(skip(self))]
    async fn scan(
        &self,
        source_dir: &Path,
        manifest: Option<&Path>,
        lockfile: Option<&Path>,
    ) -> Result<Vec<AuditReport>> {
        let scratch = tempfile::tempdir().context("failed to create unpack directory")?;
        let mut roots = vec![source_dir.to_path_buf()];
        roots.extend(self.unpack(source_dir, scratch.path()).await?);

        let manifest = manifest.map(Path::to_path_buf);
        let lockfile = lockfile.map(Path::to_path_buf);
        let lockfiles = tokio::task::spawn_blocking(move || {
            Self::locate_lockfiles(&roots, manifest.as_deref(), lockfile.as_deref())
        })
        .await
        .context("lockfile search did not complete")??;
        let mut reports = Vec::new();
        for path in &lockfiles {
            let report = self.audit_lockfile(path).await?;
            if report.vulnerabilities.found || !report.vulnerabilities.list.is_empty() {
                reports.push(report);
            }
        }
        debug!(lockfiles = lockfiles.len(), reports = reports.len(), "cargo audit finished");
        Ok(reports)
    }

    fn name(&self) -> &str {
        "cargo-audit"
    }
}
