//! Shared helpers for CLI commands.

use std::sync::Arc;

use rangeload::{HistoryLedger, JsonFileStore, KeyValueStore};

use crate::error::CliError;

/// Open the durable key-value store under the platform data directory.
pub fn open_store() -> Result<Arc<dyn KeyValueStore>, CliError> {
    let dir = JsonFileStore::default_dir().ok_or(CliError::NoStorageDir)?;
    Ok(Arc::new(JsonFileStore::new(dir)))
}

/// Open the history ledger over the durable store.
pub fn history_ledger() -> Result<HistoryLedger, CliError> {
    Ok(HistoryLedger::new(open_store()?))
}

/// Render a byte count as a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(11_500_000), "11.0 MiB");
    }
}
