// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Application manifest loading and writing.
//!
//! Decoding goes through an untyped stage: raw text is decoded into a
//! [`serde_json::Value`], normalized by [`patch_document`], and only then
//! bound to [`Config`]. Documents that cannot be normalized are not rejected
//! outright. They come back as [`Document::Degraded`], which keeps the raw
//! definition and a best-effort partial configuration around for callers that
//! only need the application name or build settings.

use crate::{
    config::{Build, Config, ConfigError, PlatformVersion},
    patch::{patch_document, PatchError},
};

use serde_json::Value;
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    path::Path,
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Outcome of decoding an application manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    /// Document was normalized and bound to the typed layout.
    Parsed(Config),

    /// Document could not be normalized.
    ///
    /// Partial configuration only carries the application name and build
    /// settings, and is tagged with [`PlatformVersion::Nomad`].
    Degraded { error: PatchError, partial: Config },
}

impl Document {
    /// Normalize and bind untyped document.
    #[instrument(skip(raw), level = "debug")]
    pub fn from_value(raw: Value) -> Self {
        let bound = patch_document(&raw).and_then(|patched| {
            serde_json::from_value::<Config>(patched)
                .map_err(|error| PatchError::Bind(error.to_string()))
        });

        match bound {
            Ok(mut config) => {
                debug!("bound application config for {:?}", config.app_name);
                config.platform_version = PlatformVersion::Machines;
                config.raw_definition = raw;
                Document::Parsed(config)
            }
            Err(error) => {
                warn!("falling back to degraded application config: {error}");
                let partial = Config {
                    app_name: raw
                        .get("app")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    build: raw
                        .get("build")
                        .and_then(|build| serde_json::from_value::<Build>(build.clone()).ok()),
                    platform_version: PlatformVersion::Nomad,
                    raw_definition: raw,
                    ..Default::default()
                };
                Document::Degraded { error, partial }
            }
        }
    }

    /// Decode TOML text.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Deserialize`] if text is not valid TOML.
    pub fn from_toml(data: &str) -> Result<Self> {
        let raw: Value = toml::de::from_str(data)?;
        Ok(Self::from_value(raw))
    }

    /// Decode JSON text.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Json`] if text is not valid JSON.
    pub fn from_json(data: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(data)?;
        Ok(Self::from_value(raw))
    }

    /// Configuration regardless of whether it was degraded.
    pub fn config(&self) -> &Config {
        match self {
            Document::Parsed(config) => config,
            Document::Degraded { partial, .. } => partial,
        }
    }

    /// Normalization error of degraded document.
    pub fn error(&self) -> Option<&PatchError> {
        match self {
            Document::Parsed(_) => None,
            Document::Degraded { error, .. } => Some(error),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Document::Degraded { .. })
    }

    /// Promote document into machines platform configuration.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Patch`] if document was degraded.
    pub fn into_config(self) -> Result<Config> {
        match self {
            Document::Parsed(config) => Ok(config),
            Document::Degraded { error, .. } => Err(ConfigError::Patch(error)),
        }
    }

    fn set_config_file_path(&mut self, path: &Path) {
        match self {
            Document::Parsed(config) => config.set_config_file_path(path),
            Document::Degraded { partial, .. } => partial.set_config_file_path(path),
        }
    }
}

/// Load application manifest from file.
///
/// Files ending in ".json" are decoded as JSON, everything else as TOML.
///
/// # Errors
///
/// - Return [`ConfigError::Io`] if file cannot be read.
/// - Return [`ConfigError::Deserialize`] or [`ConfigError::Json`] if file
///   cannot be decoded at all.
#[instrument(skip(path), level = "debug")]
pub fn load_config(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    info!("load application config {:?}", path.display());

    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut document = if is_json(path) {
        Document::from_json(&data)?
    } else {
        Document::from_toml(&data)?
    };
    document.set_config_file_path(path);

    Ok(document)
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}

impl Config {
    /// Convert into untyped server-side definition.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Json`] if configuration cannot be represented
    ///   as JSON.
    pub fn to_definition(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Construct configuration from untyped server-side definition.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Patch`] if definition cannot be normalized.
    pub fn from_definition(definition: Value) -> Result<Self> {
        Document::from_value(definition).into_config()
    }

    /// Serialize configuration as JSON.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write configuration to file.
    ///
    /// Files ending in ".json" receive JSON, everything else receives TOML
    /// with a short header comment.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Io`] if file cannot be written.
    /// - Return [`ConfigError::Serialize`] or [`ConfigError::Json`] if
    ///   configuration cannot be serialized.
    #[instrument(skip(self, path), level = "debug")]
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = if is_json(path) {
            self.to_json()?
        } else {
            format!(
                "# fly.toml app configuration file generated for {}\n#\n# See \
                 https://fly.io/docs/reference/configuration/ for information about how to use \
                 this file.\n#\n\n{}",
                self.app_name,
                toml::ser::to_string_pretty(self)?
            )
        };

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(path, data).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("wrote application config {:?}", path.display());

        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Document::from_toml(data)?.into_config()
    }
}

impl Display for Config {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{HttpService, Mount, Service, ToplevelCheck},
        duration::Duration,
        machine::MachineServiceConcurrency,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn deserialize_application_config() -> anyhow::Result<()> {
        let result: Config = indoc! {r#"
            app = "hello"
            primary_region = "sea"
            kill_timeout = 10

            [env]
            LOG_LEVEL = "debug"

            [processes]
            web = "bundle exec rails server"
            worker = "bundle exec sidekiq"

            [[mounts]]
            source = "data"
            destination = "/data"
            processes = ["worker"]

            [http_service]
            internal_port = 3000
            force_https = true
            processes = ["web"]

            [[services]]
            internal_port = 9000
            protocol = "tcp"
            processes = ["worker"]
            concurrency = "10,20"

            [checks.alive]
            type = "tcp"
            port = 3000
            interval = 10000
            processes = ["web"]
        "#}
        .parse()?;

        let expect = Config {
            app_name: "hello".into(),
            primary_region: "sea".into(),
            kill_timeout: Some(Duration::from_secs(10)),
            env: BTreeMap::from([("LOG_LEVEL".into(), "debug".into())]),
            processes: BTreeMap::from([
                ("web".into(), "bundle exec rails server".into()),
                ("worker".into(), "bundle exec sidekiq".into()),
            ]),
            mounts: vec![Mount {
                source: "data".into(),
                destination: "/data".into(),
                processes: vec!["worker".into()],
                ..Default::default()
            }],
            http_service: Some(HttpService {
                internal_port: 3000,
                force_https: true,
                processes: vec!["web".into()],
                ..Default::default()
            }),
            services: vec![Service {
                protocol: "tcp".into(),
                internal_port: 9000,
                processes: vec!["worker".into()],
                concurrency: Some(MachineServiceConcurrency {
                    kind: "requests".into(),
                    hard_limit: 20,
                    soft_limit: 10,
                }),
                ..Default::default()
            }],
            checks: BTreeMap::from([(
                "alive".into(),
                ToplevelCheck {
                    kind: Some("tcp".into()),
                    port: Some(3000),
                    interval: Some(Duration::from_secs(10)),
                    processes: vec!["web".into()],
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };

        assert_eq!(result, expect);
        assert_eq!(result.platform_version(), PlatformVersion::Machines);

        Ok(())
    }

    #[test]
    fn degrade_on_malformed_section() -> anyhow::Result<()> {
        let document = Document::from_toml(indoc! {r#"
            app = "legacy"
            env = "FOO=bar"

            [build]
            image = "flyio/hellofly:latest"
        "#})?;

        assert!(document.is_degraded());
        assert_eq!(
            document.error(),
            Some(&PatchError::Env { found: "string" })
        );

        let partial = document.config();
        assert_eq!(partial.app_name, "legacy");
        assert_eq!(partial.build.as_ref().and_then(|build| build.image.as_deref()), Some("flyio/hellofly:latest"));
        assert_eq!(partial.platform_version(), PlatformVersion::Nomad);
        assert_eq!(partial.raw_definition()["env"], Value::from("FOO=bar"));
        assert!(matches!(document.into_config(), Err(ConfigError::Patch(_))));

        Ok(())
    }

    #[test]
    fn degrade_on_bind_failure() -> anyhow::Result<()> {
        let document = Document::from_json(r#"{"app": "hello", "primary_region": 42}"#)?;
        assert!(matches!(document.error(), Some(PatchError::Bind(_))));
        assert_eq!(document.config().app_name, "hello");

        Ok(())
    }

    #[test]
    fn definition_round_trip() -> anyhow::Result<()> {
        let config: Config = indoc! {r#"
            app = "hello"
            primary_region = "ord"
            kill_signal = "SIGINT"
            kill_timeout = "5s"

            [build]
            dockerfile = "Dockerfile"
            build-target = "runtime"

            [deploy]
            release_command = "bin/migrate"

            [http_service]
            internal_port = 8080
            auto_stop_machines = true
            min_machines_running = 1

              [[http_service.checks]]
              interval = "15s"
              path = "/health"
              headers = { Host = "example.com" }

            [[vm]]
            size = "shared-cpu-2x"
            memory = "1gb"

            [[restart]]
            policy = "on-failure"
            max_retries = 3

            [metrics]
            port = 9091
            path = "/metrics"
        "#}
        .parse()?;

        let result = Config::from_definition(config.to_definition()?)?;
        assert_eq!(result, config);

        Ok(())
    }

    #[test]
    fn display_round_trip() -> anyhow::Result<()> {
        let config = Config {
            app_name: "hello".into(),
            env: BTreeMap::from([("PORT".into(), "8080".into())]),
            processes: BTreeMap::from([("app".into(), "serve".into())]),
            ..Default::default()
        };

        let result: Config = config.to_string().parse()?;
        assert_eq!(result, config);

        Ok(())
    }

    #[test]
    fn load_and_write_config_file() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("flyconfig-document-{}", std::process::id()));
        let config = Config {
            app_name: "hello".into(),
            primary_region: "ams".into(),
            ..Default::default()
        };

        for name in ["fly.toml", "fly.json"] {
            let path = dir.join(name);
            config.write_to_file(&path)?;

            let loaded = load_config(&path)?.into_config()?;
            assert_eq!(loaded, config);
            assert_eq!(loaded.config_file_path(), path.as_path());
        }

        fs::remove_dir_all(&dir)?;

        Ok(())
    }
}
