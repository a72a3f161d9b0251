use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::context::{PackageContext, PackageState};
use crate::manifest::AUDIT_STEP;
use crate::osc::OscClient;
use crate::services::ServiceRunner;

use super::Stage;

pub struct ServiceStage {
    runner: Arc<ServiceRunner>,
    osc: OscClient,
}

impl ServiceStage {
    pub fn new(runner: Arc<ServiceRunner>, osc: OscClient) -> Self {
        Self { runner, osc }
    }

    async fn log_remote_audit_outputs(&self, ctx: &PackageContext) {
        match self
            .osc
            .service_outputs(&ctx.devel_project, &ctx.package, AUDIT_STEP)
            .await
        {
            Ok(files) => debug!(package = %ctx.qualified(), ?files, "last recorded audit outputs"),
            Err(e) => debug!(package = %ctx.qualified(), error = %e, "could not list audit outputs"),
        }
    }
}

#[async_trait]
impl Stage for ServiceStage {
    #[instrument(skip(self, ctx), fields(package = %ctx.package))]
    async fn run(&self, ctx: &mut PackageContext) -> anyhow::Result<()> {
        if !ctx.manifest.has_service_file {
            debug!(package = %ctx.package, "no service file, nothing to regenerate");
            return Ok(());
        }

        info!(package = %ctx.qualified(), "running services");
        let passed = self.runner.regenerate(&ctx.package, &ctx.dir).await;
        ctx.regenerated = Some(passed);
        if !passed {
            self.log_remote_audit_outputs(ctx).await;
            bail!("services failed");
        }
        ctx.advance(PackageState::Regenerated);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Services"
    }
}
