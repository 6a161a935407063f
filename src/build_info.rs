//! Compile-time build metadata surfaced by `toolflow --version`.

/// Semver package version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VCS commit hash captured at build time.
pub const GIT_COMMIT: &str = env!("TOOLFLOW_BUILD_GIT_HASH");

/// Build timestamp captured at compile time.
pub const BUILD_TIMESTAMP: &str = env!("TOOLFLOW_BUILD_TIMESTAMP");

/// Multi-line version block used as clap's `long_version`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("TOOLFLOW_BUILD_GIT_HASH"),
    "\nbuilt: ",
    env!("TOOLFLOW_BUILD_TIMESTAMP")
);
