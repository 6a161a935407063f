//! Default configuration constants.
//!
//! Shared by the typed defaults in `types` and by the loader, so the two
//! never drift apart.

/// Embedded `toolflow.toml` written by `toolflow init`.
pub(super) const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../templates/toolflow.toml");
/// Default OpenAI-compatible API base URL.
pub(super) const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
/// Default provider model id.
pub(super) const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";
/// Environment variable consulted for the key when none is configured.
pub(super) const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Default timeout for model API requests.
pub(super) const DEFAULT_API_TIMEOUT_SECS: u64 = 120;
/// Safety cap on model round-trips within one turn.
pub(super) const DEFAULT_MAX_ITERATIONS: usize = 20;
/// Directory (relative to the working directory) holding runtime state.
pub(super) const DEFAULT_STATE_DIR: &str = ".toolflow";
/// Subdirectory of the state dir holding session files.
pub(super) const SESSIONS_SUBDIR: &str = "sessions";
/// Config file name used for both the local and the global lookup.
pub(super) const CONFIG_FILE_NAME: &str = "toolflow.toml";
/// Directory under the platform config root.
pub(super) const CONFIG_DIR_NAME: &str = "toolflow";
