use backend::{Entry, VultenInstance};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{config::BenchConfig, error::BenchError};

pub mod add_bench;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod loader;
pub mod matmul_bench;
pub mod progress;
pub mod report;

#[cfg(test)]
mod test_utills;

/// Logs go to stderr so stdout only ever carries the report.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Opens the configured device, failing fast when it does not exist.
pub fn open_device(config: &BenchConfig, entry: Entry) -> Result<VultenInstance, BenchError> {
    let inst = VultenInstance::new(entry, Some(config.device))?;
    info!("Using device {} ({})", config.device, inst.get_device_name());
    if let Some((free, total)) = inst.get_mem_stats() {
        info!("Device memory: {free} of {total} bytes free");
    }

    Ok(inst)
}
