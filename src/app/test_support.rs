use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::app::adb::runner::{CommandRunner, HostCommand};
use crate::app::error::AppError;
use crate::app::state::{BackgroundStatus, BackgroundTaskInfo};

type Reply = Result<String, String>;

struct Rule {
    pattern: String,
    replies: RefCell<VecDeque<Reply>>,
    last: RefCell<Reply>,
}

/// Fake runner answering by substring match on the rendered command line.
/// The first matching rule wins; a sequence repeats its last reply once exhausted.
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: RefCell<Vec<String>>,
    detached: RefCell<Vec<(u32, String)>>,
    next_pid: Cell<u32>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: RefCell::new(Vec::new()),
            detached: RefCell::new(Vec::new()),
            next_pid: Cell::new(4000),
        }
    }

    pub fn on(self, pattern: &str, reply: Result<&str, &str>) -> Self {
        self.on_sequence(pattern, vec![reply])
    }

    pub fn on_sequence(mut self, pattern: &str, replies: Vec<Result<&str, &str>>) -> Self {
        let replies = replies
            .into_iter()
            .map(|reply| reply.map(str::to_string).map_err(str::to_string))
            .collect::<VecDeque<_>>();
        let last = replies
            .back()
            .cloned()
            .unwrap_or_else(|| Ok(String::new()));
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            replies: RefCell::new(replies),
            last: RefCell::new(last),
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn detached_calls(&self) -> Vec<String> {
        self.detached
            .borrow()
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.contains(pattern))
            .count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_blocking(&self, command: &HostCommand, trace_id: &str) -> Result<String, AppError> {
        let line = command.display();
        self.calls.borrow_mut().push(line.clone());
        let Some(rule) = self.rules.iter().find(|rule| line.contains(&rule.pattern)) else {
            return Err(AppError::command(format!("no scripted reply for `{line}`"), trace_id));
        };
        let reply = match rule.replies.borrow_mut().pop_front() {
            Some(reply) => {
                *rule.last.borrow_mut() = reply.clone();
                reply
            }
            None => rule.last.borrow().clone(),
        };
        reply.map_err(|message| AppError::command(message, trace_id))
    }

    fn spawn_detached(&self, command: &HostCommand, _trace_id: &str) -> Result<u32, AppError> {
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        self.detached.borrow_mut().push((pid, command.display()));
        Ok(pid)
    }

    /// Scripted launches never exit.
    fn background_tasks(&self) -> Vec<BackgroundTaskInfo> {
        self.detached
            .borrow()
            .iter()
            .map(|(pid, line)| BackgroundTaskInfo {
                pid: *pid,
                label: line.clone(),
                uptime_ms: 0,
                status: BackgroundStatus::Running,
            })
            .collect()
    }
}
