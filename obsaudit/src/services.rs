use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::osc::OscClient;
use crate::sandbox::Sandbox;

/// Re-runs a package's server-side services inside the sandbox.
pub struct ServiceRunner {
    sandbox: Arc<dyn Sandbox>,
    osc: OscClient,
    osc_path: String,
    work_root: PathBuf,
}

impl ServiceRunner {
    /// `work_root` must be absolute: it is the only path bound into the
    /// sandbox.
    pub fn new(
        sandbox: Arc<dyn Sandbox>,
        osc: OscClient,
        osc_path: impl Into<String>,
        work_root: PathBuf,
    ) -> Self {
        Self {
            sandbox,
            osc,
            osc_path: osc_path.into(),
            work_root,
        }
    }

    /// Runs the services in `dir`, which must lie under the work root.
    /// Returns whether they succeeded. Failures are logged with the captured
    /// output, never raised.
    #[instrument(skip(self))]
    pub async fn regenerate(&self, package: &str, dir: &Path) -> bool {
        let argv = self.osc.service_run_argv(&self.osc_path);

        match self.sandbox.run(dir, &self.work_root, &argv).await {
            Ok(out) if out.success => {
                info!(package, "services passed");
                true
            }
            Ok(out) => {
                warn!(
                    package,
                    command = %self.sandbox.describe(dir, &self.work_root, &argv),
                    output = %out.combined().trim_end(),
                    "services failed"
                );
                false
            }
            Err(e) => {
                warn!(package, error = %e, "services could not be started");
                false
            }
        }
    }
}
