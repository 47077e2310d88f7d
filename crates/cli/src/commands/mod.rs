//! Command handlers for the newsrag CLI.

pub mod ingest;
pub mod init;
pub mod query;
pub mod rebuild;
pub mod stats;

pub use ingest::IngestCommand;
pub use init::InitCommand;
pub use query::QueryCommand;
pub use rebuild::RebuildCommand;
pub use stats::StatsCommand;

use newsrag_core::{config::AppConfig, AppResult};
use newsrag_retrieval::IndexConfig;

/// Retrieval settings for the workspace's data directory.
pub(crate) fn index_config(config: &AppConfig) -> AppResult<IndexConfig> {
    newsrag_retrieval::load_config(&config.data_dir())
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
