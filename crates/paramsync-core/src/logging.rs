//! Tracing subscriber bootstrap for node processes
//!
//! Each node logs to stderr and appends to
//! `data_dir/logs/<experiment>/<node>.log`. Filtering follows `RUST_LOG`
//! and defaults to `info`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber and return the log file path
pub fn init(log_dir: &Path, node_name: &str) -> crate::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(format!("{node_name}.log"));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs").join("exp");
        let path = init(&log_dir, "trainer").unwrap();
        assert_eq!(path, log_dir.join("trainer.log"));
        assert!(path.exists());

        tracing::info!(version = 3, "written to file");
        // A second global subscriber is refused
        assert!(init(&log_dir, "trainer").is_err());
    }
}
