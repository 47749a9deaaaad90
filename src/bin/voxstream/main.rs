//! VoxStream engine host: runs voice turns behind a JSON-lines protocol.

mod cli_utils;

use anyhow::Result;
use clap::Parser;
use cli_utils::{install_panic_hook, list_input_devices};
use voxstream::config::AppConfig;
use voxstream::{init_logging, init_tracing, ipc, log_debug, log_file_path};

fn main() -> Result<()> {
    let mut config = AppConfig::parse();
    if config.list_input_devices {
        list_input_devices()?;
        return Ok(());
    }

    config.validate()?;
    let log_settings = config.log_settings();
    init_logging(log_settings);
    init_tracing(log_settings);
    install_panic_hook();
    log_debug("=== VoxStream Started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    ipc::run_ipc_mode(config)
}
