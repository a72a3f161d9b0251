use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::context::{PackageContext, PackageState};
use crate::scan::ScanInvoker;

use super::Stage;

/// Scans every package; the outcome, including a failed scan, is stored on
/// the context and the stage itself never fails.
pub struct ScanStage {
    invoker: Arc<ScanInvoker>,
}

impl ScanStage {
    pub fn new(invoker: Arc<ScanInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Stage for ScanStage {
    #[instrument(skip(self, ctx), fields(package = %ctx.package))]
    async fn run(&self, ctx: &mut PackageContext) -> anyhow::Result<()> {
        info!(package = %ctx.qualified(), "unpacking and scanning");
        let lockfile = ctx.manifest.lockfile.as_deref().map(Path::new);
        let outcome = self.invoker.invoke(&ctx.dir, lockfile).await;
        ctx.outcome = Some(outcome);
        ctx.advance(PackageState::Scanned);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Scan"
    }
}
