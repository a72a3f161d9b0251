use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::command::{CommandRunner, Invocation};

/// Typed wrapper over the `osc` command line client.
#[derive(Clone)]
pub struct OscClient {
    program: String,
    api_url: String,
    runner: Arc<dyn CommandRunner>,
}

impl OscClient {
    pub fn new(
        program: impl Into<String>,
        api_url: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            program: program.into(),
            api_url: api_url.into(),
            runner,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn invocation(&self) -> Invocation {
        Invocation::new(&self.program).args(["-A", self.api_url.as_str()])
    }

    /// argv for a server-side service run, as executed inside the sandbox.
    pub fn service_run_argv(&self, osc_path: &str) -> Vec<String> {
        vec![
            osc_path.to_string(),
            "-A".to_string(),
            self.api_url.clone(),
            "service".to_string(),
            "ra".to_string(),
        ]
    }

    async fn run_checked(&self, inv: Invocation) -> Result<String> {
        info!(command = %inv, "osc");
        self.runner.run(&inv).await?.check(&inv)
    }

    /// Raw `whatdependson` listing; the first line names `component` itself.
    #[instrument(skip(self))]
    pub async fn what_depends_on(
        &self,
        project: &str,
        component: &str,
        repository: &str,
        arch: &str,
    ) -> Result<String> {
        let inv = self
            .invocation()
            .args(["whatdependson", project, component, repository, arch]);
        self.run_checked(inv)
            .await
            .with_context(|| format!("failed to list packages depending on {component}"))
    }

    #[instrument(skip(self))]
    pub async fn devel_project(&self, project: &str, package: &str) -> Result<String> {
        let inv = self.invocation().args(["dp", &format!("{project}/{package}")]);
        let out = self.run_checked(inv).await.with_context(|| {
            format!("failed to retrieve develproject information for {project}/{package}")
        })?;
        Ok(out.trim().to_string())
    }

    #[instrument(skip(self))]
    pub async fn revert(&self, package_dir: &Path) -> Result<()> {
        let inv = self.invocation().args(["revert", "."]).current_dir(package_dir);
        self.run_checked(inv).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn clean(&self, package_dir: &Path) -> Result<()> {
        let inv = self.invocation().args(["clean", "."]).current_dir(package_dir);
        self.run_checked(inv).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn update(&self, work_dir: &Path, project: &str, package: &str) -> Result<()> {
        let inv = self
            .invocation()
            .args(["up", &format!("{project}/{package}")])
            .current_dir(work_dir);
        self.run_checked(inv).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn checkout(&self, work_dir: &Path, project: &str, package: &str) -> Result<()> {
        let inv = self
            .invocation()
            .args(["co", &format!("{project}/{package}")])
            .current_dir(work_dir);
        self.run_checked(inv).await.map(|_| ())
    }

    /// Names of the files the server recorded for the last run of `step`.
    #[instrument(skip(self))]
    pub async fn service_outputs(
        &self,
        project: &str,
        package: &str,
        step: &str,
    ) -> Result<Vec<String>> {
        let inv = self.invocation().args(["ls", "-e", project, package]);
        let listing = self.run_checked(inv).await?;
        let prefix = format!("_service:{step}");
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(&prefix))
            .map(String::from)
            .collect())
    }
}
