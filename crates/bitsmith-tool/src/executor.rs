//! Tool command execution abstraction

use async_trait::async_trait;
use bitsmith_core::{MessagePolicy, Result, Severity};
use std::collections::HashSet;
use tracing::debug;

use crate::classifier::format_message;
use crate::output::CommandOutput;
use crate::session::Session;

/// Trait for running tool commands (allows mocking in tests)
#[async_trait]
pub trait ToolExecutor: Send {
    /// Run a command, collecting its output silently
    async fn run(&mut self, command: &str) -> Result<CommandOutput>;

    /// Run a command, printing messages as they arrive
    async fn stream(&mut self, command: &str) -> Result<CommandOutput>;

    /// Close the open project and forget loaded constraint files
    async fn close_project(&mut self) -> Result<()>;

    async fn add_constraint_file(&mut self, path: &str) -> Result<CommandOutput>;

    fn have_constraint_file(&self, path: &str) -> bool;

    fn part_exists(&self, part: &str) -> bool;

    fn policy(&self) -> &MessagePolicy;
}

#[async_trait]
impl ToolExecutor for Session {
    async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        self.run_command(command).await
    }

    async fn stream(&mut self, command: &str) -> Result<CommandOutput> {
        self.stream_command(command).await
    }

    async fn close_project(&mut self) -> Result<()> {
        Session::close_project(self).await
    }

    async fn add_constraint_file(&mut self, path: &str) -> Result<CommandOutput> {
        Session::add_constraint_file(self, path).await
    }

    fn have_constraint_file(&self, path: &str) -> bool {
        Session::have_constraint_file(self, path)
    }

    fn part_exists(&self, part: &str) -> bool {
        Session::part_exists(self, part)
    }

    fn policy(&self) -> &MessagePolicy {
        Session::policy(self)
    }
}

type Effect = Box<dyn Fn(&str) + Send + Sync>;

/// Mock executor for testing.
///
/// Responses and side effects are keyed by command prefix; the first
/// registered match wins. Unmatched commands succeed with empty output.
pub struct MockExecutor {
    responses: Vec<(String, String)>,
    effects: Vec<(String, Effect)>,
    commands: Vec<String>,
    constraints: HashSet<String>,
    parts: HashSet<String>,
    policy: MessagePolicy,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            effects: Vec::new(),
            commands: Vec::new(),
            constraints: HashSet::new(),
            parts: HashSet::new(),
            policy: MessagePolicy::new(),
        }
    }

    /// Raw output returned for commands starting with `prefix`
    pub fn with_response(mut self, prefix: &str, raw: &str) -> Self {
        self.responses.push((prefix.to_string(), raw.to_string()));
        self
    }

    /// Make commands starting with `prefix` report an error
    pub fn with_error(self, prefix: &str, text: &str) -> Self {
        let raw = format!("{}\n", format_message(Severity::Error, "Mock 1-1", text));
        self.with_response(prefix, &raw)
    }

    /// Run `effect` with the full command whenever one starts with `prefix`
    pub fn with_effect<F>(mut self, prefix: &str, effect: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.effects.push((prefix.to_string(), Box::new(effect)));
        self
    }

    pub fn with_part(mut self, part: &str) -> Self {
        self.parts.insert(part.to_string());
        self
    }

    pub fn with_policy(mut self, policy: MessagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Every command received, in order
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Commands starting with `prefix`
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    fn respond(&mut self, command: &str) -> CommandOutput {
        debug!("mock> {}", command);
        self.commands.push(command.to_string());

        for (prefix, effect) in &self.effects {
            if command.starts_with(prefix.as_str()) {
                effect(command);
            }
        }

        let raw = self
            .responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, raw)| raw.as_str())
            .unwrap_or("");
        CommandOutput::from_raw(raw, "", &self.policy)
    }
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    async fn run(&mut self, command: &str) -> Result<CommandOutput> {
        Ok(self.respond(command))
    }

    async fn stream(&mut self, command: &str) -> Result<CommandOutput> {
        Ok(self.respond(command))
    }

    async fn close_project(&mut self) -> Result<()> {
        self.respond("close_project");
        self.constraints.clear();
        Ok(())
    }

    async fn add_constraint_file(&mut self, path: &str) -> Result<CommandOutput> {
        self.constraints.insert(path.to_string());
        Ok(self.respond(&format!("read_xdc \"{}\"", path)))
    }

    fn have_constraint_file(&self, path: &str) -> bool {
        self.constraints.contains(path)
    }

    fn part_exists(&self, part: &str) -> bool {
        self.parts.contains(part)
    }

    fn policy(&self) -> &MessagePolicy {
        &self.policy
    }
}
