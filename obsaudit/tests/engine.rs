use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use obsaudit::command::{CommandOutput, CommandRunner, Invocation};
use obsaudit::context::{Notification, PackageState};
use obsaudit::sandbox::Sandbox;
use obsaudit::scan::{AuditReport, Scanner};
use obsaudit::{AuditConfig, ClassificationEngine, Collaborators, RunOptions, ScanOutcome};

const DEVEL: &str = "devel:languages:rust";

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        success: true,
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Answers `osc` the way a healthy build service would, except for the one
/// subcommand told to fail.
#[derive(Default)]
struct FakeOsc {
    failing: Option<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl FakeOsc {
    fn failing(subcommand: &'static str) -> Self {
        Self {
            failing: Some(subcommand),
            ..Self::default()
        }
    }

    fn subcommands(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeOsc {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        // osc -A <api> <subcommand> ...
        let sub = invocation.args.get(2).cloned().unwrap_or_default();
        self.calls.lock().unwrap().push(sub.clone());
        if self.failing == Some(sub.as_str()) {
            return Ok(failed("HTTP Error 404: Not Found"));
        }
        match sub.as_str() {
            "dp" => Ok(ok(&format!("{DEVEL}\n"))),
            _ => Ok(ok("")),
        }
    }
}

#[derive(Default)]
struct FakeSandbox {
    fail: bool,
    regenerated: Mutex<Vec<String>>,
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn run(&self, cwd: &Path, _bind: &Path, _argv: &[String]) -> Result<CommandOutput> {
        let package = cwd.file_name().unwrap().to_string_lossy().into_owned();
        self.regenerated.lock().unwrap().push(package);
        if self.fail {
            return Ok(failed("cargo_vendor: error: failed to sync"));
        }
        Ok(ok(""))
    }

    fn describe(&self, cwd: &Path, _bind: &Path, argv: &[String]) -> String {
        format!("{} in {}", argv.join(" "), cwd.display())
    }
}

/// Reports per package directory name; unknown packages fail to scan.
#[derive(Default)]
struct FakeScanner {
    reports: BTreeMap<String, Vec<AuditReport>>,
    seen: Mutex<Vec<(String, Option<PathBuf>)>>,
}

impl FakeScanner {
    fn with(mut self, package: &str, advisories: &[&str]) -> Self {
        let reports = if advisories.is_empty() {
            vec![]
        } else {
            let list: Vec<_> = advisories
                .iter()
                .map(|id| serde_json::json!({ "advisory": { "id": id } }))
                .collect();
            let raw = serde_json::json!({ "vulnerabilities": { "found": true, "list": list } });
            vec![serde_json::from_value(raw).unwrap()]
        };
        self.reports.insert(package.to_string(), reports);
        self
    }
}

#[async_trait]
impl Scanner for FakeScanner {
    async fn scan(
        &self,
        source_dir: &Path,
        _manifest: Option<&Path>,
        lockfile: Option<&Path>,
    ) -> Result<Vec<AuditReport>> {
        let package = source_dir.file_name().unwrap().to_string_lossy().into_owned();
        self.seen
            .lock()
            .unwrap()
            .push((package.clone(), lockfile.map(Path::to_path_buf)));
        self.reports
            .get(&package)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no Cargo.lock found in {}", source_dir.display()))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

const AUTOMATED: &str = r#"<services>
  <service name="obs_scm" mode="manual"/>
  <service name="cargo_vendor" mode="manual">
    <param name="update">true</param>
  </service>
  <service name="cargo_audit" mode="manual">
    <param name="lockfile">zola-0.17/Cargo.lock</param>
  </service>
</services>
"#;

const VENDOR_ONLY: &str = r#"<services>
  <service name="cargo_vendor" mode="disabled">
    <param name="update">true</param>
  </service>
</services>
"#;

const AUDIT_ONLY: &str = r#"<services>
  <service name="cargo_audit" mode="disabled"/>
</services>
"#;

struct Fixture {
    dir: tempfile::TempDir,
    osc: Arc<FakeOsc>,
    sandbox: Arc<FakeSandbox>,
    scanner: Arc<FakeScanner>,
}

impl Fixture {
    /// zola: fully automated. ripgrep: audit only. bat: vendor only.
    /// fd: no service file at all.
    fn new(scanner: FakeScanner) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("openSUSE:Factory");
        for (package, service) in [
            ("zola", Some(AUTOMATED)),
            ("ripgrep", Some(AUDIT_ONLY)),
            ("bat", Some(VENDOR_ONLY)),
            ("fd", None),
        ] {
            let pkg_dir = project.join(package);
            fs::create_dir_all(&pkg_dir).unwrap();
            if let Some(xml) = service {
                fs::write(pkg_dir.join("_service"), xml).unwrap();
            }
        }
        Self {
            dir,
            osc: Arc::new(FakeOsc::default()),
            sandbox: Arc::new(FakeSandbox::default()),
            scanner: Arc::new(scanner),
        }
    }

    fn engine(&self, options: RunOptions) -> Result<ClassificationEngine> {
        let config = AuditConfig {
            work_dir: self.dir.path().to_path_buf(),
            ..AuditConfig::default()
        };
        let collaborators = Collaborators {
            runner: self.osc.clone(),
            sandbox: self.sandbox.clone(),
            scanner: self.scanner.clone(),
        };
        ClassificationEngine::new(config, options, collaborators)
    }

    fn service_file(&self, package: &str) -> String {
        fs::read_to_string(self.dir.path().join("openSUSE:Factory").join(package).join("_service"))
            .unwrap()
    }
}

fn packages(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn qualified(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| format!("{DEVEL}/{n}")).collect()
}

fn default_scanner() -> FakeScanner {
    FakeScanner::default()
        .with("zola", &["RUSTSEC-2024-0001"])
        .with("ripgrep", &[])
        .with("bat", &[])
}

#[tokio::test]
async fn every_package_is_classified_once() {
    let fixture = Fixture::new(default_scanner());
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine
        .run(packages(&["zola", "ripgrep", "bat", "fd"]))
        .await
        .unwrap();

    let names: Vec<&str> = report.packages.iter().map(|p| p.package.as_str()).collect();
    assert_eq!(names, vec!["zola", "ripgrep", "bat", "fd"]);
    assert!(report.packages.iter().all(|p| p.state == PackageState::Classified));

    let sets = &report.remediation;
    assert_eq!(sets.fast_update.iter().cloned().collect::<Vec<_>>(), qualified(&["zola"]));
    assert_eq!(sets.slow_update.iter().cloned().collect::<Vec<_>>(), qualified(&["fd"]));
    assert_eq!(
        sets.needs_vendor_automation.iter().cloned().collect::<Vec<_>>(),
        qualified(&["ripgrep"])
    );
    assert!(sets.fast_update.is_disjoint(&sets.slow_update));
    assert!(sets.needs_vendor_automation.is_disjoint(&sets.maybe_vuln));
}

#[tokio::test]
async fn automated_packages_regenerate_before_manual_ones() {
    let fixture = Fixture::new(default_scanner());
    let engine = fixture.engine(RunOptions::default()).unwrap();

    engine
        .run(packages(&["bat", "zola", "fd", "ripgrep"]))
        .await
        .unwrap();

    // fd has no service file and is never regenerated.
    assert_eq!(
        *fixture.sandbox.regenerated.lock().unwrap(),
        vec!["zola", "ripgrep", "bat"]
    );
}

#[tokio::test]
async fn manifests_are_stripped_and_lockfile_forwarded() {
    let fixture = Fixture::new(default_scanner());
    let engine = fixture.engine(RunOptions::default()).unwrap();

    engine.run(packages(&["zola"])).await.unwrap();

    let service = fixture.service_file("zola");
    assert!(service.contains(r#"<service name="obs_scm" mode="manual"/>"#));
    assert!(!service.contains("cargo_audit"));
    assert!(!service.contains("cargo_vendor"));

    let seen = fixture.scanner.seen.lock().unwrap();
    assert_eq!(seen[0].0, "zola");
    assert_eq!(seen[0].1.as_deref(), Some(Path::new("zola-0.17/Cargo.lock")));
}

#[tokio::test]
async fn notifications_follow_manifest_posture() {
    let fixture = Fixture::new(default_scanner());
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine.run(packages(&["ripgrep", "bat"])).await.unwrap();

    let ripgrep = &report.packages[0];
    assert_eq!(
        ripgrep.notifications,
        vec![Notification::MissingVendor, Notification::MissingVendorUpdate]
    );
    let bat = &report.packages[1];
    assert_eq!(bat.notifications, vec![Notification::MissingAudit]);
    assert_eq!(bat.regenerated, Some(true));
}

#[tokio::test]
async fn scan_failure_is_reported_not_raised() {
    let fixture = Fixture::new(default_scanner());
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine.run(packages(&["fd"])).await.unwrap();

    match &report.packages[0].outcome {
        ScanOutcome::ScanFailed(reason) => assert!(reason.contains("no Cargo.lock found")),
        other => panic!("expected a failed scan, got {other:?}"),
    }
    assert!(report.remediation.maybe_vuln.contains(&format!("{DEVEL}/fd")));
}

#[tokio::test]
async fn assume_setup_skips_update_and_services() {
    let fixture = Fixture::new(default_scanner());
    let options = RunOptions {
        assume_setup: true,
        advisory: None,
    };
    let engine = fixture.engine(options).unwrap();

    let report = engine.run(packages(&["zola", "bat"])).await.unwrap();

    assert!(fixture.sandbox.regenerated.lock().unwrap().is_empty());
    let subcommands = fixture.osc.subcommands();
    assert!(subcommands.contains(&"revert".to_string()));
    assert!(subcommands.contains(&"clean".to_string()));
    assert!(!subcommands.contains(&"up".to_string()));
    assert!(!subcommands.contains(&"co".to_string()));
    assert!(report.packages.iter().all(|p| p.regenerated.is_none()));
}

#[tokio::test]
async fn missing_working_copy_is_checked_out() {
    let fixture = Fixture::new(default_scanner().with("newpkg", &[]));
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine.run(packages(&["newpkg"])).await.unwrap();

    assert!(fixture.osc.subcommands().contains(&"co".to_string()));
    // The fake checkout creates nothing, so the package has no manifest.
    assert!(!report.packages[0].manifest.has_service_file);
}

#[tokio::test]
async fn targeted_advisory_ignores_other_findings() {
    let fixture = Fixture::new(default_scanner().with("fd", &["RUSTSEC-2024-0001"]));
    let options = RunOptions {
        assume_setup: false,
        advisory: Some("RUSTSEC-2024-0001".to_string()),
    };
    let engine = fixture.engine(options).unwrap();

    let report = engine.run(packages(&["zola", "ripgrep", "fd"])).await.unwrap();

    assert_eq!(
        report.packages[0].outcome,
        ScanOutcome::VulnerableSpecific("RUSTSEC-2024-0001".to_string())
    );
    assert_eq!(report.packages[1].outcome, ScanOutcome::Clean);
    assert_eq!(report.advisory.as_deref(), Some("RUSTSEC-2024-0001"));
    assert_eq!(report.remediation.slow_update.len(), 1);
}

#[tokio::test]
async fn duplicate_names_are_processed_once() {
    let fixture = Fixture::new(default_scanner());
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine.run(packages(&["zola", "bat", "zola"])).await.unwrap();

    assert_eq!(report.packages.len(), 2);
    assert_eq!(
        fixture.osc.subcommands().iter().filter(|s| *s == "dp").count(),
        2
    );
}

#[tokio::test]
async fn malformed_manifest_aborts_the_run() {
    let fixture = Fixture::new(default_scanner());
    fs::write(
        fixture.dir.path().join("openSUSE:Factory/bat/_service"),
        "<services><service name=\"cargo_vendor\">",
    )
    .unwrap();
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let err = engine.run(packages(&["zola", "bat"])).await.unwrap_err();

    assert!(format!("{err:#}").contains("Inspect stage failed for bat"));
    assert!(fixture.sandbox.regenerated.lock().unwrap().is_empty());
    assert!(fixture.scanner.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unresolvable_devel_project_aborts_before_checkout() {
    let mut fixture = Fixture::new(default_scanner());
    fixture.osc = Arc::new(FakeOsc::failing("dp"));
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let err = engine.run(packages(&["zola"])).await.unwrap_err();

    assert!(format!("{err:#}").contains("failed to retrieve develproject information"));
    assert_eq!(fixture.osc.subcommands(), vec!["dp"]);
}

#[tokio::test]
async fn failed_update_is_recorded_and_package_still_scanned() {
    let mut fixture = Fixture::new(default_scanner());
    fixture.osc = Arc::new(FakeOsc::failing("up"));
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine.run(packages(&["zola"])).await.unwrap();

    let zola = &report.packages[0];
    assert_eq!(zola.state, PackageState::Classified);
    assert_eq!(zola.errors.len(), 1);
    assert_eq!(zola.errors[0].stage, "Checkout");
    assert_eq!(zola.outcome, ScanOutcome::VulnerableGeneral);
    assert_eq!(zola.regenerated, Some(true));
    assert_eq!(fixture.scanner.seen.lock().unwrap()[0].0, "zola");
    assert_eq!(
        report.remediation.fast_update.iter().cloned().collect::<Vec<_>>(),
        qualified(&["zola"])
    );
}

#[tokio::test]
async fn failed_checkout_of_new_package_is_treated_as_vulnerable() {
    let mut fixture = Fixture::new(default_scanner());
    fixture.osc = Arc::new(FakeOsc::failing("co"));
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine.run(packages(&["newpkg"])).await.unwrap();

    let newpkg = &report.packages[0];
    assert_eq!(newpkg.state, PackageState::Classified);
    assert_eq!(newpkg.errors[0].stage, "Checkout");
    assert!(matches!(newpkg.outcome, ScanOutcome::ScanFailed(_)));
    assert_eq!(fixture.scanner.seen.lock().unwrap()[0].0, "newpkg");
    assert_eq!(
        report.remediation.slow_update.iter().cloned().collect::<Vec<_>>(),
        qualified(&["newpkg"])
    );
}

#[tokio::test]
async fn failed_regeneration_is_recorded_and_package_still_scanned() {
    let mut fixture = Fixture::new(default_scanner());
    fixture.sandbox = Arc::new(FakeSandbox {
        fail: true,
        ..FakeSandbox::default()
    });
    let engine = fixture.engine(RunOptions::default()).unwrap();

    let report = engine.run(packages(&["zola", "bat"])).await.unwrap();

    assert_eq!(*fixture.sandbox.regenerated.lock().unwrap(), vec!["zola", "bat"]);
    for entry in &report.packages {
        assert_eq!(entry.state, PackageState::Classified);
        assert_eq!(entry.regenerated, Some(false));
        assert_eq!(entry.errors.len(), 1);
        assert_eq!(entry.errors[0].stage, "Services");
    }
    let seen: Vec<String> = fixture.scanner.seen.lock().unwrap().iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(seen, vec!["zola", "bat"]);

    let sets = &report.remediation;
    assert_eq!(sets.fast_update.iter().cloned().collect::<Vec<_>>(), qualified(&["zola"]));
    assert!(sets.slow_update.is_empty());
    assert!(sets.needs_vendor_automation.is_empty());
}
