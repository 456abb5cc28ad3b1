pub mod data;
pub mod io;

pub use data::{
    ApiConfig, BackendKind, CommandConfig, Config, StreamMode, SubprocessConfig, ToolsConfig,
    UiConfig,
};
pub use io::ConfigError;
