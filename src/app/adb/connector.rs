use std::time::Duration;

use tracing::{info, warn};

use crate::app::adb::parse::{is_already_connected, parse_adb_devices};
use crate::app::adb::runner::{CommandRunner, HostCommand, DEFAULT_COMMAND_TIMEOUT};
use crate::app::error::AppError;
use crate::app::models::{split_network_address, DeviceSummary};
use crate::app::state::SessionContext;

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

pub struct DeviceConnector<'a> {
    runner: &'a dyn CommandRunner,
    attempts: u32,
    timeout: Duration,
}

impl<'a> DeviceConnector<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connects over TCP. Only an "already connected" reply counts as success,
    /// so a fresh device normally succeeds on the second attempt. On success
    /// every later device command in `session` is routed to `host:port`.
    pub fn connect(
        &self,
        session: &mut SessionContext,
        host: &str,
        port: &str,
        trace_id: &str,
    ) -> Result<(), AppError> {
        let address = format!("{host}:{port}");
        for attempt in 1..=self.attempts {
            let command = HostCommand::blocking(
                session.adb_program.clone(),
                session.host_args(&["connect", &address]),
            )
            .with_timeout(self.timeout);
            match self.runner.run_blocking(&command, trace_id) {
                Ok(output) if is_already_connected(&output) => {
                    session.pin_target(address.clone());
                    info!(trace_id = %trace_id, serial = %address, attempt, "device connected");
                    return Ok(());
                }
                Ok(output) => {
                    info!(
                        trace_id = %trace_id,
                        serial = %address,
                        attempt,
                        output = %output.trim(),
                        "device not yet connected"
                    );
                }
                Err(err) => {
                    warn!(
                        trace_id = %trace_id,
                        serial = %address,
                        attempt,
                        error = %err,
                        "adb connect failed"
                    );
                }
            }
        }
        Err(AppError::connection(
            format!("Could not connect to {address} after {} attempts", self.attempts),
            trace_id,
        ))
    }

    pub fn enumerate(
        &self,
        session: &SessionContext,
        trace_id: &str,
    ) -> Result<Vec<DeviceSummary>, AppError> {
        let command = HostCommand::blocking(session.adb_program.clone(), session.host_args(&["devices"]))
            .with_timeout(self.timeout);
        let output = self.runner.run_blocking(&command, trace_id)?;
        Ok(parse_adb_devices(&output))
    }

    /// Picks the device for this session and returns its id.
    ///
    /// A preferred id is tried first; devices are always enumerated after.
    /// With nothing enumerable the selection fails even if the preferred
    /// connect succeeded. A failed or absent preference falls back to the
    /// first enumerated device.
    pub fn select_device(
        &self,
        session: &mut SessionContext,
        preferred: Option<&str>,
        trace_id: &str,
    ) -> Result<String, AppError> {
        let preferred = preferred.map(str::trim).filter(|id| !id.is_empty());

        let mut preferred_ok = false;
        let mut preferred_is_usb = false;
        if let Some(id) = preferred {
            match split_network_address(id) {
                Some((host, port)) => {
                    preferred_ok = self.connect(session, host, port, trace_id).is_ok();
                }
                None => preferred_is_usb = true,
            }
            info!(trace_id = %trace_id, serial = %id, "preferred device requested");
        }

        let devices = self.enumerate(session, trace_id)?;
        if devices.is_empty() {
            warn!(trace_id = %trace_id, "no devices attached");
            return Err(AppError::no_device("No devices available", trace_id));
        }

        if let Some(id) = preferred {
            if preferred_is_usb {
                preferred_ok = devices.iter().any(|device| device.serial == id);
                if preferred_ok {
                    session.pin_target(id);
                }
            }
            if preferred_ok {
                info!(trace_id = %trace_id, serial = %id, "preferred device confirmed");
                return Ok(id.to_string());
            }
        }

        let first = &devices[0];
        info!(
            trace_id = %trace_id,
            serial = %first.serial,
            available = ?devices.iter().map(|d| d.serial.as_str()).collect::<Vec<_>>(),
            "selecting first enumerated device"
        );
        match first.network_address() {
            Some((host, port)) => self.connect(session, host, port, trace_id)?,
            None => session.pin_target(first.serial.clone()),
        }
        Ok(first.serial.clone())
    }

    /// Starts device-side services (`adb shell <cmd>`) without waiting on them.
    pub fn launch_background_services(
        &self,
        session: &SessionContext,
        services: &[String],
        trace_id: &str,
    ) -> Vec<u32> {
        let mut pids = Vec::new();
        for service in services.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let mut args = session.device_args(&["shell"]);
            args.extend(service.split_whitespace().map(str::to_string));
            let command = HostCommand::detached(session.adb_program.clone(), args);
            match self.runner.spawn_detached(&command, trace_id) {
                Ok(pid) => pids.push(pid),
                Err(err) => warn!(
                    trace_id = %trace_id,
                    service = %service,
                    error = %err,
                    "failed to launch background service"
                ),
            }
        }
        pids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::ScriptedRunner;

    fn session() -> SessionContext {
        SessionContext::new("adb", "aapt")
    }

    #[test]
    fn connect_retries_exactly_three_times_then_fails() {
        let runner = ScriptedRunner::new().on("connect", Ok("failed to connect to 10.0.0.9:5555"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();

        let err = connector
            .connect(&mut session, "10.0.0.9", "5555", "t")
            .unwrap_err();

        assert_eq!(err.code, "ERR_CONNECTION");
        assert_eq!(runner.count_matching("connect"), 3);
        assert_eq!(session.target(), None);
    }

    #[test]
    fn connect_succeeds_on_already_connected() {
        let runner = ScriptedRunner::new()
            .on_sequence(
                "connect",
                vec![Ok("connected to 10.0.0.9:5555"), Ok("already connected to 10.0.0.9:5555")],
            );
        let connector = DeviceConnector::new(&runner);
        let mut session = session();

        connector
            .connect(&mut session, "10.0.0.9", "5555", "t")
            .expect("connect");

        assert_eq!(runner.count_matching("connect"), 2);
        assert_eq!(session.target(), Some("10.0.0.9:5555"));
    }

    #[test]
    fn connect_returns_immediately_when_already_connected() {
        let runner = ScriptedRunner::new().on("connect", Ok("already connected to 10.0.0.9:5555"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        connector
            .connect(&mut session, "10.0.0.9", "5555", "t")
            .expect("connect");
        assert_eq!(runner.count_matching("connect"), 1);
    }

    #[test]
    fn connect_command_errors_consume_attempts() {
        let runner = ScriptedRunner::new().on("connect", Err("cannot connect to daemon"));
        let connector = DeviceConnector::new(&runner).with_attempts(2);
        let mut session = session();
        assert!(connector.connect(&mut session, "h", "1", "t").is_err());
        assert_eq!(runner.count_matching("connect"), 2);
    }

    #[test]
    fn enumerate_skips_header() {
        let runner = ScriptedRunner::new().on(
            "devices",
            Ok("List of devices attached\nA:5555\tdevice\nB:5555\tdevice\n"),
        );
        let connector = DeviceConnector::new(&runner);
        let devices = connector.enumerate(&session(), "t").expect("enumerate");
        assert_eq!(
            devices.iter().map(|d| d.serial.as_str()).collect::<Vec<_>>(),
            vec!["A:5555", "B:5555"]
        );
    }

    #[test]
    fn enumerate_is_not_routed_to_target() {
        let runner = ScriptedRunner::new().on("devices", Ok("List of devices attached\n"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        session.pin_target("A:5555");
        connector.enumerate(&session, "t").expect("enumerate");
        assert_eq!(runner.calls(), vec!["adb devices".to_string()]);
    }

    #[test]
    fn select_fails_without_devices_even_if_preferred_connects() {
        let runner = ScriptedRunner::new()
            .on("connect", Ok("already connected to 10.0.0.2:5555"))
            .on("devices", Ok("List of devices attached\n\n"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        let err = connector
            .select_device(&mut session, Some("10.0.0.2:5555"), "t")
            .unwrap_err();
        assert_eq!(err.code, "ERR_NO_DEVICE");
    }

    #[test]
    fn select_keeps_preferred_device_when_it_connects() {
        let runner = ScriptedRunner::new()
            .on("connect 10.0.0.2:5555", Ok("already connected to 10.0.0.2:5555"))
            .on("devices", Ok("List of devices attached\nA:5555\tdevice\n10.0.0.2:5555\tdevice\n"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        let selected = connector
            .select_device(&mut session, Some("10.0.0.2:5555"), "t")
            .expect("select");
        assert_eq!(selected, "10.0.0.2:5555");
        assert_eq!(session.target(), Some("10.0.0.2:5555"));
        assert_eq!(runner.count_matching("connect A:5555"), 0);
    }

    #[test]
    fn select_falls_back_to_first_enumerated_device() {
        let runner = ScriptedRunner::new()
            .on("connect 10.0.0.2:5555", Ok("failed to connect"))
            .on("connect A:5555", Ok("already connected to A:5555"))
            .on("devices", Ok("List of devices attached\nA:5555\tdevice\nB:5555\tdevice\n"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();

        let selected = connector
            .select_device(&mut session, Some("10.0.0.2:5555"), "t")
            .expect("select");

        assert_eq!(selected, "A:5555");
        assert_eq!(session.target(), Some("A:5555"));
        assert_eq!(runner.count_matching("connect 10.0.0.2:5555"), 3);
        assert_eq!(runner.count_matching("connect A:5555"), 1);
        assert_eq!(runner.count_matching("connect B:5555"), 0);
    }

    #[test]
    fn select_without_preference_uses_first_device() {
        let runner = ScriptedRunner::new()
            .on("connect A:5555", Ok("already connected to A:5555"))
            .on("devices", Ok("List of devices attached\nA:5555\tdevice\nB:5555\tdevice\n"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        let selected = connector.select_device(&mut session, None, "t").expect("select");
        assert_eq!(selected, "A:5555");
    }

    #[test]
    fn select_pins_usb_serial_without_connecting() {
        let runner = ScriptedRunner::new()
            .on("devices", Ok("List of devices attached\nemulator-5554\tdevice\nR58M123ABC\tdevice\n"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        let selected = connector
            .select_device(&mut session, Some("R58M123ABC"), "t")
            .expect("select");
        assert_eq!(selected, "R58M123ABC");
        assert_eq!(session.target(), Some("R58M123ABC"));
        assert_eq!(runner.count_matching("connect"), 0);
    }

    #[test]
    fn select_missing_usb_serial_falls_back() {
        let runner = ScriptedRunner::new()
            .on("devices", Ok("List of devices attached\nemulator-5554\tdevice\n"));
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        let selected = connector
            .select_device(&mut session, Some("GONE123"), "t")
            .expect("select");
        assert_eq!(selected, "emulator-5554");
        assert_eq!(session.target(), Some("emulator-5554"));
    }

    #[test]
    fn background_services_launch_detached_on_target() {
        let runner = ScriptedRunner::new();
        let connector = DeviceConnector::new(&runner);
        let mut session = session();
        session.pin_target("A:5555");
        let pids = connector.launch_background_services(
            &session,
            &["nohup /data/local/tmp/frida-server".to_string(), "  ".to_string()],
            "t",
        );
        assert_eq!(pids.len(), 1);
        assert_eq!(
            runner.detached_calls(),
            vec!["adb -s A:5555 shell nohup /data/local/tmp/frida-server".to_string()]
        );
    }
}
