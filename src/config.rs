use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::api::DEFAULT_API_BASE_URL;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_WEBDRIVER_PORT: u16 = 4444;
pub const DEFAULT_BROWSER: &str = "firefox";

const DEFAULT_LOGIN_URL: &str = "https://demo.acroplia.com/login";
const DEFAULT_HOME_URL: &str = "https://demo.acroplia.com/connect/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Values read from the TOML config file. Every field is optional; CLI flags
/// win over the file, and built-in defaults fill the rest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub credentials: CredentialsSection,
    pub webdriver: WebDriverSection,
    pub message: MessageSection,
    pub textpad: TextpadSection,
    pub misc: MiscSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebDriverSection {
    pub port: Option<u16>,
    pub browser: Option<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessageSection {
    pub fullname: Option<String>,
    pub username: Option<String>,
    pub chat_uuid: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TextpadSection {
    pub title: Option<String>,
    pub subtitle: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MiscSection {
    pub debug: bool,
    pub log: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl FileConfig {
    /// A missing file is not an error, only a malformed one is.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ConfigError::Io(err)),
        };
        Ok(toml::from_str(&contents)?)
    }
}

pub fn api_base_url() -> String {
    env::var("ACROPLIA_API_BASE_URL")
        .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

pub fn login_url() -> String {
    env::var("ACROPLIA_LOGIN_URL").unwrap_or_else(|_| DEFAULT_LOGIN_URL.to_string())
}

pub fn home_url() -> String {
    env::var("ACROPLIA_HOME_URL").unwrap_or_else(|_| DEFAULT_HOME_URL.to_string())
}

pub fn session_path() -> PathBuf {
    env::var("ACROPLIA_SESSION_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir().join("session.json"))
}

fn default_data_dir() -> PathBuf {
    let base = env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join(".local").join("share").join("acroplia")
}
