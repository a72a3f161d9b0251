use std::sync::Arc;

use anyhow::Result;
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::context::PackageContext;
use crate::stages::Stage;

/// Ordered stages applied to each package, with bounded concurrency across
/// packages.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<Vec<Box<dyn Stage>>>,
    max_concurrency: usize,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Run every stage on one package. Failures of non-fatal stages are
    /// recorded on the context; a fatal stage failure is returned.
    #[instrument(skip(self, ctx), fields(package = %ctx.package, stage_count = self.stages.len()))]
    pub async fn run_one(&self, ctx: &mut PackageContext) -> Result<()> {
        for stage in self.stages.iter() {
            match stage.run(ctx).await {
                Ok(()) => debug!(stage = stage.name(), package = %ctx.package, "stage complete"),
                Err(e) if stage.is_fatal() => {
                    return Err(e.context(format!(
                        "{} stage failed for {}",
                        stage.name(),
                        ctx.package
                    )));
                }
                Err(e) => {
                    warn!(
                        stage = stage.name(),
                        package = %ctx.package,
                        error = %format!("{e:#}"),
                        "stage failed"
                    );
                    ctx.record_error(stage.name(), format!("{e:#}"));
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline over `contexts`. With a concurrency of one the
    /// packages are processed strictly in order.
    pub async fn run<'a, I>(&self, contexts: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a mut PackageContext>,
    {
        let sem = Semaphore::new(self.max_concurrency);
        let futures = contexts.into_iter().map(|ctx| {
            let sem = &sem;
            async move {
                let _permit = sem.acquire().await?;
                self.run_one(ctx).await
            }
        });
        try_join_all(futures).await?;
        Ok(())
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
    max_concurrency: usize,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: vec![],
            max_concurrency: 1,
        }
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: Arc::new(self.stages),
            max_concurrency: self.max_concurrency,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
