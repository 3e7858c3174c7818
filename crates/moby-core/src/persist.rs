//! JSON persistence for configs and training-state snapshots.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MobyError;

/// Writes `value` to `path` as JSON, replacing any existing file.
///
/// # Errors
///
/// Returns [`MobyError::Storage`] if the file cannot be created or the
/// value fails to serialize.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), MobyError> {
    let file = File::create(path).map_err(|e| MobyError::Storage {
        message: format!("create {}: {e}", path.display()),
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value).map_err(|e| MobyError::Storage {
        message: format!("serialize {}: {e}", path.display()),
    })?;
    writer.flush().map_err(|e| MobyError::Storage {
        message: format!("flush {}: {e}", path.display()),
    })?;
    tracing::debug!(path = %path.display(), "saved json snapshot");
    Ok(())
}

/// Reads a JSON value from `path`.
///
/// # Errors
///
/// Returns [`MobyError::Storage`] if the file cannot be opened or parsed.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, MobyError> {
    let file = File::open(path).map_err(|e| MobyError::Storage {
        message: format!("open {}: {e}", path.display()),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| MobyError::Storage {
        message: format!("deserialize {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MobyConfig;

    #[test]
    fn config_roundtrip_through_file() {
        let path = std::env::temp_dir().join("moby_core_persist_roundtrip.json");
        let config = MobyConfig {
            num_classes: 7,
            temperature: 0.07,
            ..MobyConfig::default()
        };
        save_json(&path, &config).unwrap();
        let loaded: MobyConfig = load_json(&path).unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_storage_error() {
        let path = std::env::temp_dir().join("moby_core_definitely_missing.json");
        let result: Result<MobyConfig, _> = load_json(&path);
        assert!(matches!(result, Err(MobyError::Storage { .. })));
    }
}
