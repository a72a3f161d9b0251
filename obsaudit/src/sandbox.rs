use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::command::{CommandOutput, CommandRunner, Invocation};

/// Runs a command in isolation with an explicit working directory and a
/// single read-write bind mount; nothing else of the host filesystem is
/// implied.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, cwd: &Path, bind: &Path, argv: &[String]) -> Result<CommandOutput>;
    fn describe(&self, cwd: &Path, bind: &Path, argv: &[String]) -> String;
}

pub struct NsjailSandbox {
    program: String,
    config: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl NsjailSandbox {
    pub fn new(program: impl Into<String>, config: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            config,
            runner,
        }
    }

    fn invocation(&self, cwd: &Path, bind: &Path, argv: &[String]) -> Invocation {
        let bind = bind.display().to_string();
        Invocation::new(&self.program)
            .arg("--really_quiet")
            .arg("--config")
            .arg(self.config.display().to_string())
            .arg("--cwd")
            .arg(cwd.display().to_string())
            .arg("--bindmount")
            .arg(format!("{bind}:{bind}"))
            .arg("--")
            .args(argv.iter().cloned())
    }
}

#[async_trait]
impl Sandbox for NsjailSandbox {
    async fn run(&self, cwd: &Path, bind: &Path, argv: &[String]) -> Result<CommandOutput> {
        let inv = self.invocation(cwd, bind, argv);
        self.runner.run(&inv).await
    }

    fn describe(&self, cwd: &Path, bind: &Path, argv: &[String]) -> String {
        self.invocation(cwd, bind, argv).to_string()
    }
}
