use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::checkout::CheckoutSynchronizer;
use crate::classify::RemediationSets;
use crate::command::{CommandRunner, SystemRunner};
use crate::config::AuditConfig;
use crate::context::{Notification, PackageContext, PackageState};
use crate::depends;
use crate::osc::OscClient;
use crate::output::RunReport;
use crate::pipeline::Pipeline;
use crate::sandbox::{NsjailSandbox, Sandbox};
use crate::scan::{CargoAuditScanner, ScanInvoker, Scanner};
use crate::services::ServiceRunner;
use crate::stages::{CheckoutStage, InspectStage, ScanStage, ServiceStage};

/// Per-invocation switches, as opposed to the site configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip checkout, update and regeneration; reuse the working copies as
    /// they are.
    pub assume_setup: bool,
    /// Only report packages affected by this advisory id.
    pub advisory: Option<String>,
}

/// External processes the engine talks to.
pub struct Collaborators {
    pub runner: Arc<dyn CommandRunner>,
    pub sandbox: Arc<dyn Sandbox>,
    pub scanner: Arc<dyn Scanner>,
}

impl Collaborators {
    /// Real subprocesses: `osc`, `nsjail` and `cargo audit`.
    pub fn system(config: &AuditConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let sandbox = Arc::new(NsjailSandbox::new(
            config.sandbox.program.clone(),
            config.sandbox.config.clone(),
            runner.clone(),
        ));
        let scanner = Arc::new(CargoAuditScanner::new(runner.clone(), config.scanner.clone()));
        Self {
            runner,
            sandbox,
            scanner,
        }
    }
}

/// Devel project of every package, resolved before any working copy is
/// touched and never modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct DevelProjects(BTreeMap<String, String>);

impl DevelProjects {
    pub fn get(&self, package: &str) -> Option<&str> {
        self.0.get(package).map(String::as_str)
    }
}

/// Drives checkout, inspection, regeneration and scanning across the package
/// set and computes the remediation partition.
pub struct ClassificationEngine {
    config: AuditConfig,
    options: RunOptions,
    osc: OscClient,
    prepare: Pipeline,
    regenerate: Pipeline,
    scan: Pipeline,
}

impl ClassificationEngine {
    pub fn new(mut config: AuditConfig, options: RunOptions, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        // The sandbox binds the work directory, so every derived path is absolute.
        config.work_dir = std::path::absolute(&config.work_dir).with_context(|| {
            format!("failed to resolve work directory {}", config.work_dir.display())
        })?;

        let osc = OscClient::new(
            config.osc_program.clone(),
            config.api_url.clone(),
            collaborators.runner,
        );
        let sync = Arc::new(CheckoutSynchronizer::new(
            osc.clone(),
            config.work_dir.clone(),
            config.project.clone(),
            options.assume_setup,
        ));
        let services = Arc::new(ServiceRunner::new(
            collaborators.sandbox,
            osc.clone(),
            config.sandbox.osc_path.clone(),
            config.work_dir.clone(),
        ));
        let invoker = Arc::new(ScanInvoker::new(
            collaborators.scanner,
            options.advisory.clone(),
            config.empty_report_policy,
        ));

        let prepare = Pipeline::builder()
            .stage(CheckoutStage::new(sync))
            .stage(InspectStage)
            .max_concurrency(config.max_concurrency)
            .build();
        let regenerate = Pipeline::builder()
            .stage(ServiceStage::new(services, osc.clone()))
            .max_concurrency(config.max_concurrency)
            .build();
        let scan = Pipeline::builder()
            .stage(ScanStage::new(invoker))
            .max_concurrency(config.max_concurrency)
            .build();

        Ok(Self {
            config,
            options,
            osc,
            prepare,
            regenerate,
            scan,
        })
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Dependents of the configured component, filtered and de-duplicated
    /// per configuration.
    pub async fn list_packages(&self) -> Result<Vec<String>> {
        depends::list_dependents(&self.osc, &self.config).await
    }

    /// Any failure here aborts the run: every later step needs the devel
    /// project.
    #[instrument(skip_all, fields(count = packages.len()))]
    pub async fn resolve_devel_projects(&self, packages: &[String]) -> Result<DevelProjects> {
        let mut resolved = BTreeMap::new();
        for package in packages {
            if resolved.contains_key(package) {
                continue;
            }
            info!(package = %format!("{}/{package}", self.config.project), "intent to scan");
            let devel = self.osc.devel_project(&self.config.project, package).await?;
            resolved.insert(package.clone(), devel);
        }
        Ok(DevelProjects(resolved))
    }

    /// Audit `packages` and classify every one of them exactly once.
    pub async fn run(&self, packages: Vec<String>) -> Result<RunReport> {
        let packages = depends::apply_duplicate_policy(packages, self.config.duplicates);
        let devel = self.resolve_devel_projects(&packages).await?;

        let mut contexts = packages
            .iter()
            .map(|package| {
                let devel_project = devel
                    .get(package)
                    .with_context(|| format!("no devel project resolved for {package}"))?;
                Ok(PackageContext::new(
                    package.as_str(),
                    devel_project,
                    self.config.package_dir(package),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(count = contexts.len(), "preparing working copies");
        self.prepare.run(contexts.iter_mut()).await?;
        for ctx in &mut contexts {
            record_posture(ctx);
        }

        if self.options.assume_setup {
            info!("assume-setup given, not running services");
        } else {
            let (automated, manual): (Vec<_>, Vec<_>) = contexts
                .iter_mut()
                .partition(|ctx| ctx.state == PackageState::Automated);
            self.regenerate.run(automated).await?;
            self.regenerate
                .run(manual.into_iter().filter(|ctx| ctx.manifest.has_service_file))
                .await?;
        }

        info!(count = contexts.len(), "unpacking and scanning");
        self.scan.run(contexts.iter_mut()).await?;

        debug_assert!(contexts.iter().all(|ctx| ctx.state == PackageState::Scanned));
        let remediation = RemediationSets::from_packages(&contexts);
        for ctx in &mut contexts {
            ctx.advance(PackageState::Classified);
        }
        info!(
            fast = remediation.fast_update.len(),
            slow = remediation.slow_update.len(),
            vendor = remediation.needs_vendor_automation.len(),
            "complete"
        );

        Ok(RunReport::new(
            &self.config,
            self.options.advisory.clone(),
            &contexts,
            remediation,
        ))
    }
}

/// Record maintainer notifications and split packages by whether they
/// already carry the audit step.
fn record_posture(ctx: &mut PackageContext) {
    let qualified = ctx.qualified();
    let manifest = &ctx.manifest;
    let (vendor, vendor_update, audit) = (
        manifest.has_vendor_step,
        manifest.has_vendor_auto_update,
        manifest.has_audit_step,
    );

    if !vendor {
        warn!(package = %qualified, "missing cargo_vendor service, the maintainer should be contacted");
        ctx.notify(Notification::MissingVendor);
    }
    if !vendor_update {
        warn!(package = %qualified, "missing cargo_vendor auto update, the maintainer should be contacted");
        ctx.notify(Notification::MissingVendorUpdate);
    }
    if audit {
        ctx.advance(PackageState::Automated);
    } else {
        warn!(package = %qualified, "missing cargo_audit service, the maintainer should be contacted");
        ctx.notify(Notification::MissingAudit);
        ctx.advance(PackageState::ManualCandidate);
    }
}
