use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::context::{PackageContext, PackageState};
use crate::manifest;

use super::Stage;

/// Reads and strips the `_service` descriptor. A malformed descriptor aborts
/// the run: rewriting it blindly could corrupt the working copy.
pub struct InspectStage;

#[async_trait]
impl Stage for InspectStage {
    #[instrument(skip(self, ctx), fields(package = %ctx.package))]
    async fn run(&self, ctx: &mut PackageContext) -> anyhow::Result<()> {
        let dir = ctx.dir.clone();
        ctx.manifest = tokio::task::spawn_blocking(move || manifest::inspect_manifest(&dir))
            .await
            .context("manifest inspection did not complete")??;
        ctx.advance(PackageState::Inspected);
        debug!(package = %ctx.package, manifest = ?ctx.manifest, "manifest inspected");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Inspect"
    }

    fn is_fatal(&self) -> bool {
        true
    }
}
