use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::command::{CommandOutput, CommandRunner, Invocation};

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        success: true,
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Records invocations and answers with the first scripted response whose
/// tokens all appear in the command line. Unmatched commands succeed silently.
#[derive(Default)]
pub struct FakeRunner {
    responses: Vec<(Vec<String>, CommandOutput)>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, tokens: &[&str], output: CommandOutput) -> Self {
        self.responses
            .push((tokens.iter().map(|t| t.to_string()).collect(), output));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.to_string()).collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(invocation.clone());
        let words: Vec<&str> = std::iter::once(invocation.program.as_str())
            .chain(invocation.args.iter().map(String::as_str))
            .collect();
        let hit = self
            .responses
            .iter()
            .find(|(tokens, _)| tokens.iter().all(|t| words.contains(&t.as_str())));
        Ok(hit.map(|(_, out)| out.clone()).unwrap_or_else(|| ok("")))
    }
}
