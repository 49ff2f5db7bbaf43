pub mod app;

use std::time::Duration;

use tracing::{info, warn};

use app::adb::connector::DeviceConnector;
use app::adb::locator::{resolve_program, validate_program};
use app::adb::runner::ProcessRunner;
use app::config::AppConfig;
use app::error::AppError;
use app::models::{new_trace_id, RunSummary};
use app::orchestrator::InstallOrchestrator;
use app::queue::{RedisQueue, WorkQueue};
use app::state::SessionContext;

/// Selects a device, starts its background services and drains its install
/// queue from Redis once.
pub fn run_install(config: &AppConfig) -> Result<RunSummary, AppError> {
    let trace_id = new_trace_id();
    let queue = RedisQueue::connect(&config.queue.redis_url, &trace_id)?;
    install_with_queue(config, queue, &trace_id)
}

pub fn run_install_with_queue<Q: WorkQueue>(config: &AppConfig, queue: Q) -> Result<RunSummary, AppError> {
    install_with_queue(config, queue, &new_trace_id())
}

fn install_with_queue<Q: WorkQueue>(
    config: &AppConfig,
    queue: Q,
    trace_id: &str,
) -> Result<RunSummary, AppError> {
    let adb_program = resolve_program(&config.adb.command_path, "adb");
    let aapt_program = resolve_program(&config.adb.aapt_path, "aapt");
    validate_program(&adb_program, "adb", trace_id)?;
    // Without aapt, installs still run but no identifiers are forwarded.
    if let Err(err) = validate_program(&aapt_program, "aapt", trace_id) {
        warn!(trace_id = %trace_id, error = %err, "package inspector unavailable");
    }

    let command_timeout = Duration::from_secs(config.adb.command_timeout_secs);
    let runner = ProcessRunner::new(config.adb.charsets.clone(), command_timeout);
    let mut session = SessionContext::new(adb_program, aapt_program);
    let connector = DeviceConnector::new(&runner)
        .with_attempts(config.adb.connect_attempts)
        .with_timeout(command_timeout);

    let preferred = Some(config.device.preferred_device.trim()).filter(|id| !id.is_empty());
    // Selection failure is not fatal: admission decides whether anything runs.
    let selected = match connector.select_device(&mut session, preferred, trace_id) {
        Ok(serial) => {
            info!(trace_id = %trace_id, serial = %serial, "device selected");
            Some(serial)
        }
        Err(err) => {
            warn!(trace_id = %trace_id, error = %err, "device selection failed");
            None
        }
    };
    if selected.is_some() {
        connector.launch_background_services(&session, &config.device.background_services, trace_id);
    }

    let mut orchestrator = InstallOrchestrator::new(
        &runner,
        queue,
        session,
        config.adb.clone(),
        config.queue.clone(),
        &config.orchestrator,
    );
    if let Some(serial) = selected {
        orchestrator = orchestrator.with_device(serial);
    }
    orchestrator.run()
}
