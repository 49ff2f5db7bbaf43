use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::app::adb::parse::parse_badging_package_name;
use crate::app::adb::runner::{CommandRunner, HostCommand, DEFAULT_COMMAND_TIMEOUT};
use crate::app::state::SessionContext;

pub struct PackageResolver<'a> {
    runner: &'a dyn CommandRunner,
    timeout: Duration,
}

impl<'a> PackageResolver<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `None` means "identifier unknown": the inspector failed, printed no
    /// `package: name=` line, or the name failed validation.
    pub fn resolve_package_name(
        &self,
        session: &SessionContext,
        archive: &Path,
        trace_id: &str,
    ) -> Option<String> {
        let command = HostCommand::blocking(
            session.aapt_program.clone(),
            vec![
                "dump".to_string(),
                "badging".to_string(),
                archive.to_string_lossy().to_string(),
            ],
        )
        .with_timeout(self.timeout);

        let output = match self.runner.run_blocking(&command, trace_id) {
            Ok(output) => output,
            Err(err) => {
                warn!(
                    trace_id = %trace_id,
                    archive = %archive.display(),
                    error = %err,
                    "package inspection failed"
                );
                return None;
            }
        };

        let package_name = parse_badging_package_name(&output);
        if package_name.is_none() {
            debug!(trace_id = %trace_id, archive = %archive.display(), "no valid package name in badging output");
        }
        package_name
    }
}
