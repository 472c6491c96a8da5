// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the application manifest lives based on what the user
//! handed over on the command line.

use crate::config::{ConfigError, DEFAULT_CONFIG_FILE_NAME};

use std::path::PathBuf;
use tracing::debug;

/// Resolve path to application manifest.
///
/// Performs shell expansion on `path`, so "~" and environment variables
/// work. An empty path means the manifest in the current directory, and a
/// directory means the manifest inside of it. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`ConfigError::ShellExpansion`] if an environment variable in
///   `path` is not set.
pub fn resolve_config_path(path: impl AsRef<str>) -> Result<PathBuf> {
    let path = path.as_ref().trim();
    if path.is_empty() {
        return Ok(PathBuf::from(DEFAULT_CONFIG_FILE_NAME));
    }

    let expanded = PathBuf::from(shellexpand::full(path)?.as_ref());
    let resolved = if expanded.is_dir() {
        expanded.join(DEFAULT_CONFIG_FILE_NAME)
    } else {
        expanded
    };
    debug!("resolved application config path {resolved:?}");

    Ok(resolved)
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("FLY_APP_DIR", "apps/hello")])]
    fn expand_variables_and_directories() -> anyhow::Result<()> {
        std::fs::create_dir_all("apps/hello")?;

        assert_eq!(
            resolve_config_path("$FLY_APP_DIR")?,
            PathBuf::from("apps/hello/fly.toml")
        );
        assert_eq!(
            resolve_config_path("$FLY_APP_DIR/staging.toml")?,
            PathBuf::from("apps/hello/staging.toml")
        );
        assert_eq!(resolve_config_path("")?, PathBuf::from("fly.toml"));

        Ok(())
    }

    #[sealed_test]
    fn refuse_unset_variables() {
        std::env::remove_var("FLY_NOT_SET");
        assert!(matches!(
            resolve_config_path("$FLY_NOT_SET/fly.toml"),
            Err(ConfigError::ShellExpansion(_))
        ));
    }
}
