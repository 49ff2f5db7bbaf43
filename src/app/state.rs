use std::collections::HashMap;
use std::process::Child;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

/// Per-session connection context. Owned by whoever drives the session and
/// lent to collaborators; there is no process-wide device state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub adb_program: String,
    pub aapt_program: String,
    target: Option<String>,
}

impl SessionContext {
    pub fn new(adb_program: impl Into<String>, aapt_program: impl Into<String>) -> Self {
        Self {
            adb_program: adb_program.into(),
            aapt_program: aapt_program.into(),
            target: None,
        }
    }

    /// The device every `device_args` call is routed to.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn pin_target(&mut self, serial: impl Into<String>) {
        self.target = Some(serial.into());
    }

    /// Arguments for host-level adb commands (`devices`, `connect`), never routed with `-s`.
    pub fn host_args(&self, args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| arg.to_string()).collect()
    }

    pub fn device_args(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(serial) = &self.target {
            full.push("-s".to_string());
            full.push(serial.clone());
        }
        full.extend(args.iter().map(|arg| arg.to_string()));
        full
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status", content = "exit_code")]
pub enum BackgroundStatus {
    Running,
    Exited(Option<i32>),
    Unknown,
}

pub struct BackgroundTask {
    pub label: String,
    pub started_at: Instant,
    child: Child,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackgroundTaskInfo {
    pub pid: u32,
    pub label: String,
    pub uptime_ms: u128,
    pub status: BackgroundStatus,
}

/// Detached launches, keyed by pid.
///
/// Launches are fire-and-forget: nothing here waits on a running child or
/// kills it. The registry only lets callers inspect what was started and
/// reap children that already exited, so they do not linger as zombies.
#[derive(Default)]
pub struct BackgroundRegistry {
    tasks: Mutex<HashMap<u32, BackgroundTask>>,
}

impl BackgroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, label: impl Into<String>, child: Child) -> u32 {
        let pid = child.id();
        let task = BackgroundTask {
            label: label.into(),
            started_at: Instant::now(),
            child,
        };
        match self.tasks.lock() {
            Ok(mut guard) => {
                guard.insert(pid, task);
            }
            Err(_) => warn!(pid, "background registry lock poisoned; task not tracked"),
        }
        pid
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<BackgroundTaskInfo> {
        let Ok(mut guard) = self.tasks.lock() else {
            return Vec::new();
        };
        let mut infos = guard
            .iter_mut()
            .map(|(pid, task)| BackgroundTaskInfo {
                pid: *pid,
                label: task.label.clone(),
                uptime_ms: task.started_at.elapsed().as_millis(),
                status: poll_status(&mut task.child),
            })
            .collect::<Vec<_>>();
        infos.sort_by_key(|info| info.pid);
        infos
    }

    /// Drops every task whose process has exited. Returns how many were reaped.
    pub fn reap_finished(&self) -> usize {
        let Ok(mut guard) = self.tasks.lock() else {
            return 0;
        };
        let before = guard.len();
        guard.retain(|pid, task| match poll_status(&mut task.child) {
            BackgroundStatus::Running => true,
            status => {
                info!(pid = *pid, label = %task.label, ?status, "background task finished");
                false
            }
        });
        before - guard.len()
    }

    /// Waits up to `timeout` for `pid` to report a status other than running.
    pub fn wait_for_exit(&self, pid: u32, timeout: Duration) -> BackgroundStatus {
        let start = Instant::now();
        loop {
            let status = match self.tasks.lock() {
                Ok(mut guard) => match guard.get_mut(&pid) {
                    Some(task) => poll_status(&mut task.child),
                    None => return BackgroundStatus::Unknown,
                },
                Err(_) => return BackgroundStatus::Unknown,
            };
            if status != BackgroundStatus::Running || start.elapsed() > timeout {
                return status;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

fn poll_status(child: &mut Child) -> BackgroundStatus {
    match child.try_wait() {
        Ok(Some(status)) => BackgroundStatus::Exited(status.code()),
        Ok(None) => BackgroundStatus::Running,
        Err(_) => BackgroundStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn_quick_child() -> Child {
        if cfg!(windows) {
            Command::new("cmd.exe")
                .args(["/C", "exit 0"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .expect("spawn cmd")
        } else {
            Command::new("sh")
                .args(["-c", "exit 0"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .expect("spawn sh")
        }
    }

    #[test]
    fn device_args_route_to_pinned_target() {
        let mut session = SessionContext::new("adb", "aapt");
        assert_eq!(session.device_args(&["install"]), vec!["install"]);
        session.pin_target("10.0.0.2:5555");
        assert_eq!(
            session.device_args(&["install", "-r"]),
            vec!["-s", "10.0.0.2:5555", "install", "-r"]
        );
        assert_eq!(session.host_args(&["devices"]), vec!["devices"]);
    }

    #[test]
    fn reaps_exited_children() {
        let registry = BackgroundRegistry::new();
        let pid = registry.register("quick", spawn_quick_child());
        assert_eq!(registry.len(), 1);

        let status = registry.wait_for_exit(pid, Duration::from_secs(5));
        assert_eq!(status, BackgroundStatus::Exited(Some(0)));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].pid, pid);
        assert_eq!(snapshot[0].label, "quick");
        assert_eq!(snapshot[0].status, BackgroundStatus::Exited(Some(0)));

        assert_eq!(registry.reap_finished(), 1);
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }
}
