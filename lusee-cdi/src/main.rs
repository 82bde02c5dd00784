//! lusee-cdi - register self-test and housekeeping monitor
//!
//! Connects to the instrument, writes a known value to the self-test
//! register and reads it back, then logs housekeeping packets until Ctrl-C.

use lusee_cdi::protocol::constants::{SELF_TEST_REGISTER, SELF_TEST_VALUE};
use lusee_cdi::{Client, Config, Error, Result, TelemetryClass};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `lusee-cdi <path>` (positional)
/// - `lusee-cdi --config <path>` (flag-based)
/// - `lusee-cdi -c <path>` (short flag)
///
/// Returns `None` when no path is given; built-in defaults are used then.
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

fn load_config() -> Result<Config> {
    match parse_config_path() {
        Some(path) => Config::from_file(Path::new(&path)),
        None => Ok(Config::default()),
    }
}

fn main() -> Result<()> {
    let config = load_config()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("lusee-cdi v{} starting...", env!("CARGO_PKG_VERSION"));

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let read_attempts = config.timing.read_attempts;
    let mut client = Client::connect(config)?;

    // Register self-test
    client.write_register(SELF_TEST_REGISTER, SELF_TEST_VALUE)?;
    let value = client.read_register_with_retry(SELF_TEST_REGISTER, read_attempts)?;
    if value == SELF_TEST_VALUE {
        log::info!(
            "Self-test passed: register {:#x} = {:#x}",
            SELF_TEST_REGISTER,
            value
        );
    } else {
        log::error!(
            "Self-test failed: register {:#x} read {:#x}, expected {:#x}",
            SELF_TEST_REGISTER,
            value,
            SELF_TEST_VALUE
        );
    }

    log::info!("Monitoring housekeeping. Press Ctrl-C to stop.");
    while running.load(Ordering::Relaxed) {
        match client.get_telemetry(TelemetryClass::Housekeeping, Duration::from_millis(500)) {
            Ok(record) => log::info!(
                "Housekeeping APID {:#05x}: {} words",
                record.apid,
                record.data.len()
            ),
            Err(Error::Timeout) => {}
            Err(e) => {
                log::error!("Housekeeping stream failed: {}", e);
                break;
            }
        }
    }

    client.shutdown()?;
    log::info!("lusee-cdi stopped");
    Ok(())
}
