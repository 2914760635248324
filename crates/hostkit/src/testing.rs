//! Test doubles for [`CommandRunner`].

use declarative::{CommandOutput, CommandRunner};
use std::sync::Mutex;

/// Records every command and answers from canned responses.
///
/// Commands with no matching response succeed with empty output. When
/// several responses match, the most recently added one wins.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
    responses: Mutex<Vec<(Vec<String>, CommandOutput)>>,
}

impl RecordingRunner {
    /// Runner that succeeds at everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any argv starting with `prefix` with `output`.
    pub fn respond(&self, prefix: &[&str], output: CommandOutput) {
        let prefix = prefix.iter().map(|s| (*s).to_string()).collect();
        lock(&self.responses).push((prefix, output));
    }

    /// Every command run so far, as space-joined strings.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|argv| argv.join(" ")).collect()
    }

    /// Whether any recorded argv starts with `prefix`.
    pub fn was_called(&self, prefix: &[&str]) -> bool {
        self.count(prefix) > 0
    }

    /// How many recorded argvs start with `prefix`.
    pub fn count(&self, prefix: &[&str]) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|argv| starts_with(argv, prefix))
            .count()
    }

    /// Forget recorded calls, keeping responses.
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
        let argv: Vec<String> = std::iter::once(cmd)
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect();

        let response = lock(&self.responses)
            .iter()
            .rev()
            .find(|(prefix, _)| {
                let prefix: Vec<&str> = prefix.iter().map(String::as_str).collect();
                starts_with(&argv, &prefix)
            })
            .map(|(_, output)| output.clone());

        lock(&self.calls).push(argv);
        Ok(response.unwrap_or_else(|| CommandOutput::ok("")))
    }
}

fn starts_with(argv: &[String], prefix: &[&str]) -> bool {
    argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
