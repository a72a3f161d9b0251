use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::osc::OscClient;

/// What happened to a working copy before inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Existing copy reverted, cleaned and updated.
    Refreshed,
    /// Existing copy reverted and cleaned only.
    Cleaned,
    CheckedOut,
    /// No copy and assume-setup mode: nothing to do.
    Skipped,
}

/// Brings a package's working copy under `<work_dir>/<project>` into a known
/// state.
pub struct CheckoutSynchronizer {
    osc: OscClient,
    work_dir: PathBuf,
    project: String,
    assume_setup: bool,
}

impl CheckoutSynchronizer {
    pub fn new(osc: OscClient, work_dir: PathBuf, project: String, assume_setup: bool) -> Self {
        Self {
            osc,
            work_dir,
            project,
            assume_setup,
        }
    }

    /// `dir` is the package's working copy; `osc co` and `osc up` run from
    /// the work directory and create or update it.
    #[instrument(skip(self))]
    pub async fn sync(&self, package: &str, dir: &Path) -> Result<SyncAction> {
        let project = &self.project;

        let action = if dir.is_dir() {
            self.osc.revert(dir).await?;
            self.osc.clean(dir).await?;
            if self.assume_setup {
                SyncAction::Cleaned
            } else {
                self.osc.update(&self.work_dir, project, package).await?;
                SyncAction::Refreshed
            }
        } else if !self.assume_setup {
            self.osc.checkout(&self.work_dir, project, package).await?;
            SyncAction::CheckedOut
        } else {
            debug!(package, "no working copy and assume-setup given, nothing to do");
            SyncAction::Skipped
        };

        info!(package, ?action, "working copy ready");
        Ok(action)
    }

    /// Like [`sync`](Self::sync) but with the package named in the error.
    pub async fn sync_package(&self, package: &str, dir: &Path) -> Result<SyncAction> {
        self.sync(package, dir)
            .await
            .with_context(|| format!("failed to checkout or update {}/{package}", self.project))
    }
}
