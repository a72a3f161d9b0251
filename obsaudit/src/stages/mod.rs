pub mod checkout;
pub mod inspect;
pub mod scan;
pub mod services;

use async_trait::async_trait;

use crate::context::PackageContext;

#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self, ctx: &mut PackageContext) -> anyhow::Result<()>;
    fn name(&self) -> &'static str;
    /// Whether a failure aborts the whole run instead of being recorded.
    fn is_fatal(&self) -> bool {
        false
    }
}

pub use checkout::CheckoutStage;
pub use inspect::InspectStage;
pub use scan::ScanStage;
pub use services::ServiceStage;
