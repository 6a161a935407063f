//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`TOOLFLOW_API_KEY`, `TOOLFLOW_BASE_URL`,
//!    `TOOLFLOW_MODEL`, `TOOLFLOW_API_TIMEOUT_SECS`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./toolflow.toml in the current directory
//! 4. $XDG_CONFIG_HOME/toolflow/toolflow.toml (or ~/.config/toolflow/toolflow.toml)
//! 5. Built-in defaults

use crate::error::ConfigError;
use crate::script::DynamicToolCompiler;
use crate::tools::builtin::BuiltinOptions;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

mod defaults;
mod types;

use defaults::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_CONFIG_TEMPLATE};
pub use types::{
    AgentConfig, ApiConfig, ApprovalConfig, Config, ConfigInitResult, ScriptingConfig,
    SessionsConfig, ToolsConfig,
};

/// Where the loaded configuration text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Local,
    Global(PathBuf),
    BuiltInDefaults,
}

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<Config, ConfigError> {
    Ok(load_config_with_source(path_override)?.0)
}

/// Load configuration and report which file (if any) supplied it.
pub fn load_config_with_source(
    path_override: Option<&str>,
) -> Result<(Config, ConfigSource), ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

/// Loader with injected file, environment and config-root lookups.
pub fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<(Config, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (text, source) = read_config_text(path_override, &read_file, &config_root)?;
    let mut config: Config = toml::from_str(&text)?;
    resolve_api_key(&mut config, &env_lookup);
    apply_env_overrides(&mut config, &env_lookup)?;
    validate(&config)?;
    Ok((config, source))
}

fn read_config_text<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    if let Some(p) = path_override {
        let path = PathBuf::from(p);
        let text = read_file(&path)?;
        return Ok((text, ConfigSource::Explicit(path)));
    }
    if let Ok(text) = read_file(Path::new(CONFIG_FILE_NAME)) {
        return Ok((text, ConfigSource::Local));
    }
    if let Some(dir) = config_root() {
        let global = dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if let Ok(text) = read_file(&global) {
            return Ok((text, ConfigSource::Global(global)));
        }
    }
    Ok((String::new(), ConfigSource::BuiltInDefaults))
}

/// `TOOLFLOW_API_KEY` beats a literal key, which beats `api_key_env`.
fn resolve_api_key<FEnv>(config: &mut Config, env_lookup: &FEnv)
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(key) = non_empty(env_lookup("TOOLFLOW_API_KEY")) {
        config.api.api_key = key;
        return;
    }
    if !config.api.api_key.trim().is_empty() {
        config.api.api_key = config.api.api_key.trim().to_string();
        return;
    }
    if let Some(var) = config.api.api_key_env.as_deref() {
        if let Some(key) = non_empty(env_lookup(var)) {
            config.api.api_key = key;
        }
    }
}

fn apply_env_overrides<FEnv>(config: &mut Config, env_lookup: &FEnv) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_empty(env_lookup("TOOLFLOW_BASE_URL")) {
        config.api.base_url = url;
    }
    if let Some(model) = non_empty(env_lookup("TOOLFLOW_MODEL")) {
        config.api.model = model;
    }
    if let Some(timeout) = non_empty(env_lookup("TOOLFLOW_API_TIMEOUT_SECS")) {
        let parsed = timeout.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid TOOLFLOW_API_TIMEOUT_SECS value `{timeout}`: expected positive integer seconds"
            ))
        })?;
        config.api.timeout_secs = parsed.max(1);
    }
    Ok(())
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must not be empty".into()));
    }
    if config.api.model.trim().is_empty() {
        return Err(ConfigError::Invalid("api.model must not be empty".into()));
    }
    if config.api.timeout_secs == 0 {
        return Err(ConfigError::Invalid("api.timeout_secs must be at least 1".into()));
    }
    if config.agent.max_iterations == 0 {
        return Err(ConfigError::Invalid("agent.max_iterations must be at least 1".into()));
    }
    if config.scripting.max_diagnostics == 0 {
        return Err(ConfigError::Invalid(
            "scripting.max_diagnostics must be at least 1".into(),
        ));
    }
    if let Some(temperature) = config.agent.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Invalid(format!(
                "agent.temperature {temperature} is outside 0.0..=2.0"
            )));
        }
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Compiler configured with the `[scripting]` limits.
    pub fn compiler(&self) -> DynamicToolCompiler {
        DynamicToolCompiler::with_limits(self.scripting.max_diagnostics, self.scripting.max_steps)
    }

    /// Built-in tool groups enabled by `[tools]`.
    pub fn builtin_options(&self) -> BuiltinOptions {
        BuiltinOptions {
            workspace_root: self
                .tools
                .files_enabled
                .then(|| self.tools.workspace_root()),
            scripting: self.tools.scripting_enabled.then(|| self.compiler()),
        }
    }
}

fn config_root_dir() -> Option<PathBuf> {
    dirs::config_dir()
}

/// Return the default per-user config path (`~/.config/toolflow/toolflow.toml`).
pub fn default_global_config_path() -> Option<PathBuf> {
    config_root_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Write the default template to `path`.
///
/// Without `force`, an existing file is left alone.
pub fn initialize_config_at(path: &Path, force: bool) -> Result<ConfigInitResult, ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if force && path.exists() {
        std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
        return Ok(ConfigInitResult::Overwritten {
            path: path.to_path_buf(),
        });
    }
    // create_new avoids clobbering a file another process just wrote.
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(DEFAULT_CONFIG_TEMPLATE.as_bytes())?;
            Ok(ConfigInitResult::Created {
                path: path.to_path_buf(),
            })
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(ConfigInitResult::AlreadyInitialized {
                path: path.to_path_buf(),
            })
        }
        Err(err) => Err(err.into()),
    }
}
