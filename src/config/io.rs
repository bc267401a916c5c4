use std::env::current_exe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::ProjectDirs;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

// a json file next to the executable takes precedence, so the whole thing can
// live on a usb stick
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            if !path.set_extension("json") {
                eprintln!("current exe has no filename: {}", path.to_string_lossy());
                return None;
            }

            Some(path)
        },
        Err(err) => {
            eprintln!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// lumipanel-remote.json in the os dependent config directory, such as
// %AppData% on windows
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "lumipanel", "lumipanel-remote").map(|dirs| {
        dirs.config_dir().join("lumipanel-remote.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            },
            Err(err) => {
                eprintln!("Could not read metadata of: {}; Using local path instead. ({:?})", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        println!("Using config file {}", path.to_string_lossy());

        let directory = path.parent().expect("Failed to determine parent path of config path");
        std::fs::create_dir_all(directory)?;

        // the exclusive file lock makes sure the config file is used by only
        // one instance of this application
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        println!("Reading config file");

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;

        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    pub async fn save(&self, config: Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        println!("Saving config");

        let content = serde_json::to_string_pretty(&config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
