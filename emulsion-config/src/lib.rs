//! Environment settings and per-repository configuration loading.

pub mod repository_config;
pub mod settings;

pub use repository_config::{load as load_repository_config, save as save_repository_config, ConfigLoadError, CONFIG_FILENAME};
pub use settings::Settings;
