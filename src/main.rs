use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use mobile_control_lib::app::config::{config_path, load_config_from_path, save_config_to_path};
use mobile_control_lib::app::logging::init_logging;
use mobile_control_lib::run_install;

/// Installs queued APK/XAPK archives on an adb device and forwards the
/// installed package names to the analysis queue.
#[derive(Parser, Debug)]
#[command(name = "mobile-control-install", version, about)]
struct Cli {
    /// Device to pin (`host:port` or USB serial); defaults to the first available
    #[arg(long, short = 'd')]
    device: Option<String>,

    /// Config file (JSON)
    #[arg(long, env = "MOBILE_CONTROL_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Queue URL, overrides `queue.redis_url`
    #[arg(long)]
    redis_url: Option<String>,

    /// Runtime ceiling in seconds, overrides `orchestrator.max_runtime_secs`
    #[arg(long)]
    max_runtime_secs: Option<u64>,

    /// Log level, overrides `logging.log_level` (RUST_LOG still wins)
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective config (with overrides) back to the config file and exit
    #[arg(long)]
    save_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(config_path);
    let mut config = match load_config_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(device) = cli.device {
        config.device.preferred_device = device;
    }
    if let Some(url) = cli.redis_url {
        config.queue.redis_url = url;
    }
    if let Some(secs) = cli.max_runtime_secs.filter(|secs| *secs > 0) {
        config.orchestrator.max_runtime_secs = secs;
    }
    if let Some(level) = cli.log_level {
        config.logging.log_level = level;
    }

    if cli.save_config {
        return match save_config_to_path(&config, &path) {
            Ok(()) => {
                println!("config written to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("failed to save config: {err}");
                ExitCode::FAILURE
            }
        };
    }

    init_logging(&config.logging.log_level);

    match run_install(&config) {
        Ok(summary) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(text) => println!("{text}"),
                Err(err) => eprintln!("failed to render summary: {err}"),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(code = %err.code, trace_id = %err.trace_id, error = %err.error, "install run aborted");
            eprintln!("install run aborted: {err}");
            ExitCode::FAILURE
        }
    }
}
