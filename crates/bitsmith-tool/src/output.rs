//! Per-command output aggregation

use bitsmith_core::{Console, Message, MessagePolicy, Severity};

use crate::classifier::classify;

/// Everything one command produced.
///
/// Built up while the command runs and never modified afterwards.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Raw standard output with the sentinel removed
    pub content: String,
    /// Raw standard error
    pub stderr: String,
    messages: Vec<Message>,
    buckets: [Vec<usize>; 5],
}

impl CommandOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify every line of `content` (then `stderr`) under `policy`
    pub fn from_raw(content: impl Into<String>, stderr: impl Into<String>, policy: &MessagePolicy) -> Self {
        let mut output = Self {
            content: content.into(),
            stderr: stderr.into(),
            ..Self::default()
        };

        let classified: Vec<Message> = output
            .content
            .lines()
            .chain(output.stderr.lines())
            .filter_map(|line| classify(line, policy))
            .collect();
        for msg in classified {
            output.push(msg);
        }
        output
    }

    pub fn push(&mut self, msg: Message) {
        self.buckets[msg.severity.level() as usize].push(self.messages.len());
        self.messages.push(msg);
    }

    /// Every classified message, suppressed or not, in arrival order
    pub fn all_messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages whose effective severity is `severity`
    pub fn bucket(&self, severity: Severity) -> impl Iterator<Item = &Message> {
        self.buckets[severity.level() as usize]
            .iter()
            .map(move |&i| &self.messages[i])
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.buckets[severity.level() as usize].len()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    /// Messages that are not suppressed
    pub fn visible(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| !m.suppressed)
    }

    /// Number of suppressed messages at `severity`
    pub fn suppressed_count(&self, severity: Severity) -> usize {
        self.bucket(severity).filter(|m| m.suppressed).count()
    }

    /// Rendered lines for the visible messages
    pub fn rendered(&self, policy: &MessagePolicy) -> Vec<String> {
        self.visible().map(|m| m.render(policy)).collect()
    }

    /// Print the visible messages through the console
    pub fn print(&self, policy: &MessagePolicy, console: &Console) {
        for line in self.rendered(policy) {
            console.line(line);
        }
    }

    /// First error message text, for use in error reports
    pub fn first_error(&self) -> Option<&Message> {
        self.bucket(Severity::Error).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "\
Starting synthesis
INFO: [Synth 8-6157] synthesizing module 'top'
WARNING: [Synth 8-327] inferring latch for variable 'q'
WARNING: [Synth 8-3331] design top has unconnected port led[3]
CRITICAL WARNING: [Constraints 18-512] set_false_path ignored
Finished synthesis
";

    #[test]
    fn test_buckets() {
        let out = CommandOutput::from_raw(RAW, "", &MessagePolicy::new());
        assert_eq!(out.all_messages().len(), 4);
        assert_eq!(out.count(Severity::Info), 1);
        assert_eq!(out.count(Severity::Warning), 2);
        assert_eq!(out.count(Severity::CriticalWarning), 1);
        assert!(!out.has_errors());
        assert!(out.content.starts_with("Starting synthesis"));
    }

    #[test]
    fn test_override_counts_as_error() {
        let policy = MessagePolicy::new().with_override("Synth 8-327", Severity::Error);
        let out = CommandOutput::from_raw(RAW, "", &policy);
        assert!(out.has_errors());
        assert_eq!(out.count(Severity::Warning), 1);
        assert_eq!(out.first_error().unwrap().code, "Synth 8-327");
    }

    #[test]
    fn test_suppressed_messages_are_recorded_not_rendered() {
        let policy = MessagePolicy::new().with_suppression("Synth 8-3331");
        let out = CommandOutput::from_raw(RAW, "", &policy);

        assert!(out.all_messages().iter().any(|m| m.code == "Synth 8-3331"));
        assert_eq!(out.rendered(&policy).len(), 3);
        assert!(out.rendered(&policy).iter().all(|l| !l.contains("unconnected")));
        assert_eq!(out.suppressed_count(Severity::Warning), 1);
    }

    #[test]
    fn test_stderr_lines_are_classified() {
        let out = CommandOutput::from_raw("", "ERROR: [Common 17-69] Command failed\n", &MessagePolicy::new());
        assert!(out.has_errors());
        assert_eq!(out.stderr.lines().count(), 1);
    }
}
