use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Config file not found at {0}. Checked, in order:\n\
        - MACHINA_CONFIG_PATH\n\
        - current directory: machina.local.yaml, .machina.local.yaml, machina.yaml, .machina.yaml\n\
        - ~/.config/machina/controller.yaml"
    )]
    ConfigFileNotFound(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
