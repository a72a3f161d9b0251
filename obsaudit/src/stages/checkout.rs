use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::checkout::CheckoutSynchronizer;
use crate::context::{PackageContext, PackageState};

use super::Stage;

pub struct CheckoutStage {
    sync: Arc<CheckoutSynchronizer>,
}

impl CheckoutStage {
    pub fn new(sync: Arc<CheckoutSynchronizer>) -> Self {
        Self { sync }
    }
}

#[async_trait]
impl Stage for CheckoutStage {
    #[instrument(skip(self, ctx), fields(package = %ctx.package))]
    async fn run(&self, ctx: &mut PackageContext) -> anyhow::Result<()> {
        let result = self.sync.sync_package(&ctx.package, &ctx.dir).await;
        // A failed checkout is recorded; the package is still inspected and scanned.
        ctx.advance(PackageState::CheckedOut);
        result.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "Checkout"
    }
}
