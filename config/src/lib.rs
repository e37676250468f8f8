//! Configuration for the Linterhub server.
//!
//! Three sources feed the orchestrator:
//! - [`ServerConfig`]: the user's `~/.linterhub/config.toml` server defaults.
//! - [`Settings`]: the `linterhub` section pushed by the editor.
//! - [`ProjectConfig`]: the per-project `.linterhub.json` with activated engines.

mod error;
mod project;
mod server;
mod settings;

pub use error::ConfigError;
pub use project::{PROJECT_CONFIG_FILE, ProjectConfig, ProjectLinter};
pub use server::{
    AnalysisSection, DEFAULT_CONTAINER_IMAGE, DEFAULT_ENGINE_VERSION, DEFAULT_MAX_OUTPUT_BYTES,
    DEFAULT_RELEASE_BASE_URL, DEFAULT_SPINNER_INTERVAL_MS, EngineDefaults, EngineSection,
    InstallSection, ProgressSection, ServerConfig, config_path, expand_env_vars,
};
pub use settings::Settings;
