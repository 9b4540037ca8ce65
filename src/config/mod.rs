mod settings;

pub use settings::{
    CaptureDefaults, Config, ConfigError, DEFAULT_MAX_GENERATIONS, EXAMPLE_CONFIG,
    RUNTIME_HOME_ENV, SEARCH_PATH_ENV,
};
