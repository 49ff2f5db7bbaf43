//! Queue-driven install loop for one device.
//!
//! `run` admits itself while the runtime ceiling holds and a device is
//! enumerable, then drains the device's install queue once. Each popped
//! archive goes through `install`, which never propagates an error: every
//! failure becomes a logged, per-task `InstallOutcome::failed()`.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::app::adb::apk::{build_install_sequence, unpack_split_archive};
use crate::app::adb::connector::DeviceConnector;
use crate::app::adb::package::PackageResolver;
use crate::app::adb::parse::parse_install_failure;
use crate::app::adb::runner::{CommandRunner, HostCommand};
use crate::app::config::{AdbSettings, OrchestratorSettings, QueueSettings};
use crate::app::error::AppError;
use crate::app::models::{
    new_trace_id, InstallOutcome, InstallTask, InstallTaskKind, RunSummary, StopReason,
};
use crate::app::queue::{QueueKeys, WorkQueue};
use crate::app::state::SessionContext;

pub struct InstallOrchestrator<'a, Q: WorkQueue> {
    runner: &'a dyn CommandRunner,
    queue: Q,
    session: SessionContext,
    device_id: Option<String>,
    adb: AdbSettings,
    queue_settings: QueueSettings,
    max_runtime: Duration,
    started_at: Instant,
}

impl<'a, Q: WorkQueue> InstallOrchestrator<'a, Q> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        queue: Q,
        session: SessionContext,
        adb: AdbSettings,
        queue_settings: QueueSettings,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            runner,
            queue,
            session,
            device_id: None,
            adb,
            queue_settings,
            max_runtime: Duration::from_secs(settings.max_runtime_secs),
            started_at: Instant::now(),
        }
    }

    /// Pins the device whose queues are served. Without a pin, the first
    /// enumerable device is adopted on the first admitted pass.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        if !device_id.trim().is_empty() {
            self.device_id = Some(device_id);
        }
        self
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn into_queue(self) -> Q {
        self.queue
    }

    fn connector(&self) -> DeviceConnector<'a> {
        DeviceConnector::new(self.runner)
            .with_attempts(self.adb.connect_attempts)
            .with_timeout(Duration::from_secs(self.adb.command_timeout_secs))
    }

    /// Admission: under the runtime ceiling and at least one device visible.
    /// Returns the enumerated device ids, or the reason to stop.
    fn admit(&self, trace_id: &str) -> Result<Vec<String>, StopReason> {
        if self.started_at.elapsed() >= self.max_runtime {
            info!(
                trace_id = %trace_id,
                elapsed_secs = self.started_at.elapsed().as_secs(),
                "runtime ceiling reached"
            );
            return Err(StopReason::RuntimeExceeded);
        }
        match self.connector().enumerate(&self.session, trace_id) {
            Ok(devices) if !devices.is_empty() => {
                Ok(devices.into_iter().map(|device| device.serial).collect())
            }
            Ok(_) => {
                warn!(trace_id = %trace_id, "no devices attached");
                Err(StopReason::NoDevice)
            }
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err, "device enumeration failed");
                Err(StopReason::NoDevice)
            }
        }
    }

    /// One admitted pass over the device's install queue. Queue errors abort
    /// the run; task failures never do.
    pub fn run(&mut self) -> Result<RunSummary, AppError> {
        let trace_id = new_trace_id();
        let mut summary = RunSummary {
            device_id: self.device_id.clone(),
            popped: 0,
            installed: 0,
            forwarded: 0,
            failed: 0,
            stop_reason: StopReason::QueueDrained,
            background: Vec::new(),
        };

        match self.admit(&trace_id) {
            Ok(devices) => {
                let device_id = self.adopt_device(&devices, &trace_id);
                summary.device_id = Some(device_id.clone());
                self.drain_queue(&device_id, &mut summary, &trace_id)?;
            }
            Err(reason) => summary.stop_reason = reason,
        }

        summary.background = self.runner.background_tasks();
        let reaped = self.runner.reap_background();
        if reaped > 0 {
            info!(trace_id = %trace_id, reaped, "finished background tasks reaped");
        }
        info!(
            trace_id = %trace_id,
            popped = summary.popped,
            installed = summary.installed,
            forwarded = summary.forwarded,
            failed = summary.failed,
            background = summary.background.len(),
            stop_reason = ?summary.stop_reason,
            "install run finished"
        );
        Ok(summary)
    }

    fn adopt_device(&mut self, devices: &[String], trace_id: &str) -> String {
        if let Some(id) = &self.device_id {
            return id.clone();
        }
        let adopted = devices[0].clone();
        info!(trace_id = %trace_id, serial = %adopted, "adopting first available device");
        if self.session.target().is_none() {
            self.session.pin_target(adopted.clone());
        }
        self.device_id = Some(adopted.clone());
        adopted
    }

    fn drain_queue(
        &mut self,
        device_id: &str,
        summary: &mut RunSummary,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let keys = QueueKeys::for_device(&self.queue_settings, device_id);
        while self.queue.count(&keys.install, trace_id)? > 0 {
            let Some(archive) = self.queue.pop(&keys.install, trace_id)? else {
                break;
            };
            summary.popped += 1;
            let outcome = self.install(&archive);
            if !outcome.success {
                summary.failed += 1;
                continue;
            }
            summary.installed += 1;
            if let Some(package_name) = outcome.package_name {
                self.queue.add(&keys.analysis, &package_name, trace_id)?;
                summary.forwarded += 1;
                info!(
                    trace_id = %trace_id,
                    package = %package_name,
                    key = %keys.analysis,
                    "package forwarded for analysis"
                );
            }
        }
        info!(trace_id = %trace_id, key = %keys.install, "install queue empty, nothing left to process");
        summary.stop_reason = StopReason::QueueDrained;
        Ok(())
    }

    /// Installs one archive. Errors are logged here and turned into a failed outcome.
    pub fn install(&self, archive: &str) -> InstallOutcome {
        let trace_id = new_trace_id();
        match self.try_install(archive, &trace_id) {
            Ok(package_name) => {
                info!(
                    trace_id = %trace_id,
                    archive = %archive,
                    package = ?package_name,
                    "package installed"
                );
                InstallOutcome::installed(package_name)
            }
            Err(err) => {
                warn!(
                    trace_id = %trace_id,
                    archive = %archive,
                    code = %err.code,
                    error = %err.error,
                    "package install failed"
                );
                InstallOutcome::failed()
            }
        }
    }

    fn try_install(&self, archive: &str, trace_id: &str) -> Result<Option<String>, AppError> {
        let task = InstallTask::from_path(archive, trace_id)?;
        match task.kind {
            InstallTaskKind::Single => self.install_single(&task.archive, trace_id),
            InstallTaskKind::Split => self.install_split(&task.archive, trace_id),
        }
    }

    fn install_single(&self, archive: &Path, trace_id: &str) -> Result<Option<String>, AppError> {
        let package_name = PackageResolver::new(self.runner)
            .with_timeout(Duration::from_secs(self.adb.command_timeout_secs))
            .resolve_package_name(&self.session, archive, trace_id);
        let mut args = self.session.device_args(&["install", "-r", "-g"]);
        args.push(archive.to_string_lossy().to_string());
        self.run_install(args, trace_id)?;
        Ok(package_name)
    }

    fn install_split(&self, archive: &Path, trace_id: &str) -> Result<Option<String>, AppError> {
        let extracted = unpack_split_archive(archive, trace_id)?;
        let result = build_install_sequence(&extracted, trace_id).and_then(|sequence| {
            info!(
                trace_id = %trace_id,
                archive = %archive.display(),
                sequence = %sequence.display(),
                "installing split package"
            );
            let mut args = self.session.device_args(&["install-multiple", "-r", "-g", "-t"]);
            args.extend(
                sequence
                    .apk_paths
                    .iter()
                    .map(|path| path.to_string_lossy().to_string()),
            );
            self.run_install(args, trace_id)?;
            Ok(Some(sequence.package_name))
        });
        remove_extracted_dir(&extracted, trace_id);
        result
    }

    fn run_install(&self, args: Vec<String>, trace_id: &str) -> Result<String, AppError> {
        let command = HostCommand::blocking(self.session.adb_program.clone(), args)
            .with_timeout(Duration::from_secs(self.adb.install_timeout_secs));
        let output = self.runner.run_blocking(&command, trace_id)?;
        if let Some(failure) = parse_install_failure(&output) {
            return Err(AppError::command(format!("Install rejected: {failure}"), trace_id));
        }
        Ok(output)
    }
}

fn remove_extracted_dir(dir: &Path, trace_id: &str) {
    if !dir.is_dir() {
        return;
    }
    if let Err(err) = fs::remove_dir_all(dir) {
        warn!(
            trace_id = %trace_id,
            dir = %dir.display(),
            error = %err,
            "failed to remove extracted split package"
        );
    }
}
