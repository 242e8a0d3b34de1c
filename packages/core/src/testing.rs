//! Scripted [`CommandRunner`] for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::executor::{CommandOutput, CommandRunner};

/// Answers exact command lines from queued outputs and records every call.
///
/// Each command has its own queue; the last queued answer keeps being
/// returned once the queue is down to one. Unknown commands fail.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `output` as the next answer for `command`.
    pub fn respond(&self, command: &str, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(output);
    }

    /// Every `(command, elevated)` pair seen so far, in order.
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_called(&self, command: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|(c, _)| c == command)
    }

    /// Commands issued with elevation.
    pub fn elevated_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, elevated)| *elevated)
            .map(|(c, _)| c.clone())
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, elevated: bool) -> CommandOutput {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), elevated));

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => CommandOutput::failed(format!("unscripted command: {command}")),
        }
    }
}
