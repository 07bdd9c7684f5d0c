use std::path::Path;

use emulsion_model::RepositoryConfigFile;
use thiserror::Error;

/// Filename of the repository config document, written at the repository
/// root alongside the `.system/` and `inbox/` subtrees.
pub const CONFIG_FILENAME: &str = "emulsion.toml";

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("serializing config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Loads `<repo_root>/emulsion.toml`. Callers that register a brand-new
/// repository use [`write_default`] first.
pub fn load(repo_root: &Path) -> Result<RepositoryConfigFile, ConfigLoadError> {
    let path = repo_root.join(CONFIG_FILENAME);
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn write_default(repo_root: &Path) -> Result<RepositoryConfigFile, ConfigLoadError> {
    let config = RepositoryConfigFile::default();
    save(repo_root, &config)?;
    Ok(config)
}

pub fn save(repo_root: &Path, config: &RepositoryConfigFile) -> Result<(), ConfigLoadError> {
    let path = repo_root.join(CONFIG_FILENAME);
    let raw = toml::to_string_pretty(config)?;
    std::fs::write(&path, raw).map_err(|source| ConfigLoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emulsion_model::{DuplicateFilenamePolicy, StorageStrategy};

    #[test]
    fn round_trips_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_default(dir.path()).unwrap();
        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.version, written.version);
        assert_eq!(loaded.storage_strategy, StorageStrategy::Date);
        assert_eq!(
            loaded.local_settings.handle_duplicate_filenames,
            DuplicateFilenamePolicy::Rename
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Io { .. }));
    }

    #[test]
    fn parses_cas_strategy_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            r#"
            version = 1
            storage_strategy = "cas"

            [local_settings]
            preserve_original_filename = false
            handle_duplicate_filenames = "uuid"
            max_file_size = 204800
            "#,
        )
        .unwrap();

        let config = load(dir.path()).unwrap();
        assert_eq!(config.storage_strategy, StorageStrategy::Cas);
        assert!(!config.local_settings.preserve_original_filename);
        assert_eq!(config.local_settings.max_file_size, 204800);
    }
}
