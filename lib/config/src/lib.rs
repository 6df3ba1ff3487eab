//! Small TOML-backed config manager: reading/writing simple typed values in
//! named TOML sections and files, with validation at load time rather than
//! at each access.

pub mod manager;
pub mod shader_manager_config;

pub use manager::{ConfigError, ConfigManager};
pub use shader_manager_config::ShaderManagerConfig;
