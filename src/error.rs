use std::io;
use thiserror::Error;
use msgbox::IconType;
use std::fmt::Display;
use std::str::Utf8Error;
use iced;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (iced): {source}")]
    Iced { #[from] source: iced::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },
}

pub fn error_msgbox<T: Display>(message: &'static str, error: &T) {
    let message = format!("{}: {}", message, error);
    eprintln!("{}", &message);
    if let Err(err) = msgbox::create(concat!("LumiPanel Remote ", env!("CARGO_PKG_VERSION")), &message, IconType::Error) {
        eprintln!("Failed to create msgbox: {:?}", err);
    }
}
