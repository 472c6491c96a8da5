// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Application configuration layout.
//!
//! Specify the layout of the application manifest, usually named "fly.toml",
//! to simplify the process of serialization and deserialization. Decoding raw
//! text, and migrating historical shapes of the manifest, is left to the
//! [`document`](crate::document) and [`patch`](crate::patch) modules.
//!
//! # General Layout
//!
//! An application manifest describes one application that may run several
//! __process groups__, i.e., named classes of machines running the same
//! command. Most sections can be scoped to a subset of process groups through
//! their own `processes` list. An empty list is shorthand for "the default
//! group only", not "all groups".
//!
//! # See Also
//!
//! 1. [`Config::flatten`]
//! 2. [`Config::to_machine_config`]

pub mod check;
pub mod service;

pub use check::{CheckKind, ToplevelCheck};
pub use service::{HttpService, Service, ServiceHttpCheck, ServiceTcpCheck};

use crate::{duration::Duration, machine::MachineMetrics, patch::PatchError};

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Default application manifest file name.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "fly.toml";

/// Application manifest layout.
///
/// Equality only considers manifest content. Bookkeeping like the file path
/// or raw definition is ignored.
#[derive(Default, Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Name of the application.
    #[serde(rename = "app", default, skip_serializing_if = "String::is_empty")]
    pub app_name: String,

    /// Region that new machines are placed in by default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub primary_region: String,

    /// Signal sent to stop a machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_signal: Option<String>,

    /// Grace period given to a machine after the kill signal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Experimental>,

    /// Environment variables shared by every process group.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Process group name to shell command.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub processes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_service: Option<HttpService>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,

    /// Named health checks that are not tied to a service.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, ToplevelCheck>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statics: Vec<Static>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MachineMetrics>,

    /// Compute requirements, optionally scoped by process group.
    #[serde(rename = "vm", default, skip_serializing_if = "Vec::is_empty")]
    pub compute: Vec<Compute>,

    /// Restart policies, optionally scoped by process group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restart: Vec<Restart>,

    #[serde(skip)]
    pub(crate) config_file_path: PathBuf,

    #[serde(skip)]
    pub(crate) default_group_name: String,

    #[serde(skip)]
    pub(crate) platform_version: PlatformVersion,

    #[serde(skip)]
    pub(crate) raw_definition: serde_json::Value,
}

impl Config {
    /// Construct new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of file this configuration was loaded from, if any.
    pub fn config_file_path(&self) -> &Path {
        self.config_file_path.as_path()
    }

    /// Record path of file this configuration belongs to.
    pub fn set_config_file_path(&mut self, path: impl Into<PathBuf>) {
        self.config_file_path = path.into();
    }

    /// Platform this configuration targets.
    pub fn platform_version(&self) -> PlatformVersion {
        self.platform_version
    }

    /// Mark configuration as targeting the machines platform.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NotMachinesPlatform`] if configuration came
    ///   out of a degraded parse, because it only holds best-effort fields.
    pub fn set_machines_platform(&mut self) -> Result<()> {
        self.ensure_machines_platform()?;
        self.platform_version = PlatformVersion::Machines;
        Ok(())
    }

    pub(crate) fn ensure_machines_platform(&self) -> Result<()> {
        match self.platform_version {
            PlatformVersion::Nomad => Err(ConfigError::NotMachinesPlatform {
                app_name: self.app_name.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Untyped document as it was decoded, before any patching.
    pub fn raw_definition(&self) -> &serde_json::Value {
        &self.raw_definition
    }

    pub fn dockerfile(&self) -> Option<&str> {
        self.build
            .as_ref()
            .and_then(|build| build.dockerfile.as_deref())
    }

    pub fn ignorefile(&self) -> Option<&str> {
        self.build
            .as_ref()
            .and_then(|build| build.ignorefile.as_deref())
    }

    pub fn docker_build_target(&self) -> Option<&str> {
        self.build
            .as_ref()
            .and_then(|build| build.docker_build_target.as_deref())
    }

    /// Check if any service speaks UDP.
    pub fn has_udp_service(&self) -> bool {
        self.services.iter().any(|service| service.protocol == "udp")
    }

    /// Check if any service exposes something other than plain HTTP on port
    /// 80, and HTTPS on port 443.
    pub fn has_non_http_and_https_standard_services(&self) -> bool {
        self.services.iter().any(|service| match service.protocol.as_str() {
            "udp" => true,
            "tcp" => service.ports.iter().any(|port| {
                let handlers = port.handlers.iter().map(String::as_str).collect::<Vec<_>>();
                let other_port = port.port.is_some_and(|number| number != 80 && number != 443);
                other_port
                    || (port.contains_port(80) && handlers != ["http"])
                    || (port.contains_port(443) && handlers != ["tls", "http"])
            }),
            _ => false,
        })
    }
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.app_name == other.app_name
            && self.primary_region == other.primary_region
            && self.kill_signal == other.kill_signal
            && self.kill_timeout == other.kill_timeout
            && self.build == other.build
            && self.deploy == other.deploy
            && self.experimental == other.experimental
            && self.env == other.env
            && self.processes == other.processes
            && self.mounts == other.mounts
            && self.http_service == other.http_service
            && self.services == other.services
            && self.checks == other.checks
            && self.statics == other.statics
            && self.metrics == other.metrics
            && self.compute == other.compute
            && self.restart == other.restart
    }
}

impl Eq for Config {}

/// Platform an application configuration targets.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlatformVersion {
    /// Not decided yet.
    #[default]
    Unset,

    /// Machines platform, where every unit of compute is a machine.
    Machines,

    /// Legacy scheduler. Only the raw definition is trustworthy.
    Nomad,
}

/// Build settings.
///
/// Only one build strategy is used at a time. See [`Build::strategy`] for
/// the order in which they are picked.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Build {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildpacks: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builtin: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignorefile: Option<String>,

    #[serde(
        rename = "build-target",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub docker_build_target: Option<String>,

    /// Build arguments handed to whichever strategy is active.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

impl Build {
    /// Determine active build strategy.
    ///
    /// Picks the first strategy that is configured in the following order:
    /// image, dockerfile, builder with buildpacks, builtin.
    pub fn strategy(&self) -> Option<BuildStrategy<'_>> {
        if let Some(image) = self.image.as_deref() {
            return Some(BuildStrategy::Image(image));
        }

        if let Some(path) = self.dockerfile.as_deref() {
            return Some(BuildStrategy::Dockerfile {
                path,
                target: self.docker_build_target.as_deref(),
            });
        }

        if let Some(builder) = self.builder.as_deref() {
            return Some(BuildStrategy::Buildpacks {
                builder,
                buildpacks: self.buildpacks.as_slice(),
            });
        }

        self.builtin.as_deref().map(|name| BuildStrategy::Builtin {
            name,
            settings: &self.settings,
        })
    }
}

/// Build strategy selected by [`Build::strategy`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BuildStrategy<'a> {
    /// Use prebuilt image reference.
    Image(&'a str),

    /// Build from dockerfile with optional target stage.
    Dockerfile {
        path: &'a str,
        target: Option<&'a str>,
    },

    /// Build through cloud native buildpacks.
    Buildpacks {
        builder: &'a str,
        buildpacks: &'a [String],
    },

    /// Build through named builtin image.
    Builtin {
        name: &'a str,
        settings: &'a BTreeMap<String, serde_json::Value>,
    },
}

/// Deployment settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Deploy {
    /// Command run once per release in a one-shot machine.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_command: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
}

/// Experimental settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Experimental {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_rollback: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_consul: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub enable_etcd: bool,
}

/// Volume mount.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Mount {
    /// Name of volume to attach.
    #[serde(default)]
    pub source: String,

    /// Path inside machine to mount volume at.
    #[serde(default)]
    pub destination: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_size: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,
}

/// Static file mapping served by the proxy.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Static {
    pub guest_path: String,
    pub url_prefix: String,
}

/// Compute requirements.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Compute {
    /// Named size preset, e.g., "shared-cpu-2x".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Memory as human readable size, e.g., "512mb" or "2gb".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,
}

/// Restart policy.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Restart {
    /// One of "always", "on-failure", or "never".
    #[serde(default)]
    pub policy: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to decode TOML document.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration as TOML.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to encode or decode JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Failed to perform shell expansion on configuration path.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Failed to read or write configuration file.
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Document could not be normalized.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Configuration does not target the machines platform.
    #[error("can not flatten an invalid v2 application config for app '{app_name}'")]
    NotMachinesPlatform { app_name: String },

    /// Toplevel check has a missing or unknown type.
    #[error(
        "check '{check}' for process group '{process_group}': missing or invalid check type, \
         must be 'http' or 'tcp'"
    )]
    InvalidCheckType {
        check: String,
        process_group: String,
    },

    /// Toplevel check has no port and no http service to inherit one from.
    #[error(
        "check '{check}' for process group '{process_group}' has no port set and the group has \
         no http_service to take it from"
    )]
    CheckWithoutPort {
        check: String,
        process_group: String,
    },

    /// Process command could not be split into arguments.
    #[error("could not parse command for {process_group} process group: {command:?}")]
    ShellSplit {
        process_group: String,
        command: String,
    },

    /// Release command could not be split into arguments.
    #[error("could not parse release command: {command:?}")]
    ReleaseCommandSplit { command: String },

    /// Release machine requested without a release command.
    #[error("app '{app_name}' has no [deploy] release_command set")]
    MissingReleaseCommand { app_name: String },

    /// More than one mount resolves to the same process group.
    #[error(
        "process group '{process_group}' has {} mounts ({}), only one mount per process group is \
         supported",
        sources.len(),
        sources.join(", ")
    )]
    MountCollision {
        process_group: String,
        sources: Vec<String>,
    },

    /// Unscoped http service in an application with several process groups.
    #[error(
        "http_service is not supported when more than one processes are defined for an app, and \
         this app has {count} processes; set http_service.processes to pick one"
    )]
    AmbiguousHttpService { count: usize },

    /// Unscoped service in an application that declares process groups.
    #[error(
        "service on internal port {internal_port} has no processes set and app has {count} \
         processes defined; update fly.toml to set processes for each service"
    )]
    ServiceWithoutProcesses { internal_port: u16, count: usize },

    /// Service scoped to an undeclared process group.
    #[error(
        "service specifies '{process_group}' as one of its processes, but no processes are \
         defined with that name; update fly.toml [processes] to include a {process_group} process"
    )]
    UnknownServiceProcess { process_group: String },

    /// Soft concurrency limit above the hard limit.
    #[error(
        "service on internal port {internal_port} for process group '{process_group}' has soft \
         limit {soft_limit} above hard limit {hard_limit}"
    )]
    ConcurrencyLimits {
        process_group: String,
        internal_port: u16,
        soft_limit: u32,
        hard_limit: u32,
    },

    /// More than one compute section resolves to the same process group.
    #[error("{count} compute sections for process group '{process_group}'")]
    TooManyComputes { process_group: String, count: usize },

    /// Unknown size preset.
    #[error(
        "'{size}' is an invalid machine size, expected to start with 'shared' or 'performance'"
    )]
    InvalidVmSize { size: String },

    /// Memory string could not be understood.
    #[error("invalid memory size {value:?} for process group '{process_group}'")]
    InvalidMemory {
        process_group: String,
        value: String,
    },

    /// More than one restart section resolves to the same process group.
    #[error("{count} restart sections for process group '{process_group}'")]
    TooManyRestarts { process_group: String, count: usize },

    /// Unknown restart policy.
    #[error(
        "invalid restart policy '{policy}' for process group '{process_group}', must be \
         'always', 'on-failure', or 'never'"
    )]
    InvalidRestartPolicy {
        process_group: String,
        policy: String,
    },
}

/// Friendly result alias :3
pub(crate) type Result<T, E = ConfigError> = std::result::Result<T, E>;
