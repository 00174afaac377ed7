//! Optional `.ghpipe.toml` defaults.
//!
//! Both binaries accept everything as a CLI flag; this file only exists so
//! an operator running either one repeatedly doesn't have to retype the
//! NATS URL and templates directory every time. Precedence is always
//! CLI flag > config file > built-in default, enforced by [`resolve`] at
//! each call site rather than by this crate, since the built-in default
//! differs per flag and per binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = ".ghpipe.toml";

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Fields either binary may want to default. Neither binary uses every
/// field; each reads only the ones relevant to its own flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nats_server: Option<String>,
    #[serde(default)]
    pub templates_dir: Option<String>,
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub consumer: Option<String>,
    #[serde(default)]
    pub repositories: Option<String>,
    #[serde(default)]
    pub skip_users: Option<String>,
}

/// Load configuration from `<dir>/.ghpipe.toml`. A missing file is not an
/// error — it just means every default is the built-in one.
pub fn load_config(dir: &Path) -> Result<Config> {
    load_optional(&config_path(dir))
}

/// Load configuration from an explicit path, e.g. `--config <path>`. A
/// missing file is still not an error: an operator pointing `--config` at
/// a path that doesn't exist yet gets built-in defaults, not a crash.
pub fn load_config_from_file(path: &Path) -> Result<Config> {
    load_optional(path)
}

fn load_optional(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Resolve a single value under CLI > config file > built-in default
/// precedence.
pub fn resolve<T>(cli: Option<T>, config: Option<T>, default: T) -> T {
    cli.or(config).unwrap_or(default)
}
