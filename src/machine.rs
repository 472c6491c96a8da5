// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Machine runtime configuration layout.
//!
//! These types mirror the JSON shape that the machine orchestration API
//! accepts. They are produced by the [compiler](crate::compile), and may also
//! be handed back to it as the _previous_ configuration of a deployed machine
//! so that fields the application manifest does not manage survive a
//! redeploy untouched.
//!
//! Field names must match the orchestrator exactly, since it validates
//! incoming configuration against this shape.

use crate::duration::Duration;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Metadata key holding the platform version of a machine.
pub const METADATA_PLATFORM_VERSION: &str = "fly_platform_version";

/// Metadata key holding the process group of a machine.
pub const METADATA_PROCESS_GROUP: &str = "fly_process_group";

/// Metadata key holding the version of the client that produced the config.
pub const METADATA_FLYCTL_VERSION: &str = "fly_flyctl_version";

/// Metadata key holding the release identifier of a machine.
pub const METADATA_RELEASE_ID: &str = "fly_release_id";

/// Metadata key holding the release version of a machine.
pub const METADATA_RELEASE_VERSION: &str = "fly_release_version";

/// Platform version written to every compiled machine.
pub const PLATFORM_VERSION_V2: &str = "v2";

/// Default process group name.
pub const PROCESS_GROUP_APP: &str = "app";

/// Process group used by one-shot release command machines.
pub const PROCESS_GROUP_RELEASE_COMMAND: &str = "fly_app_release_command";

/// Process group used by ephemeral console machines.
pub const PROCESS_GROUP_CONSOLE: &str = "fly_app_console";

/// Runtime configuration of a single machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub init: MachineInit,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<MachineGuest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mounts: Option<Vec<MachineMount>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<MachineService>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MachineMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<BTreeMap<String, MachineCheck>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statics: Option<Vec<Static>>,

    /// Container image to run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Cron-like schedule, only set through machine commands.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub schedule: String,

    /// Destroy machine once its main process exits.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_destroy: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<MachineRestart>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub standbys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_config: Option<StopConfig>,

    /// Fields the orchestrator knows about that are not modeled here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MachineConfig {
    /// Process group recorded in metadata, if any.
    ///
    /// Older machines recorded their group under "process_group", so that key
    /// is consulted when the current key is missing.
    pub fn process_group(&self) -> Option<&str> {
        let metadata = self.metadata.as_ref()?;
        metadata
            .get(METADATA_PROCESS_GROUP)
            .filter(|group| !group.is_empty())
            .or_else(|| metadata.get("process_group"))
            .map(String::as_str)
    }

    /// Record release identity in metadata.
    pub fn set_release(&mut self, id: impl Into<String>, version: impl Into<String>) {
        let metadata = self.metadata.get_or_insert_with(BTreeMap::new);
        metadata.insert(METADATA_RELEASE_ID.into(), id.into());
        metadata.insert(METADATA_RELEASE_VERSION.into(), version.into());
    }
}

/// Init process arguments.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineInit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub tty: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Compute shape of a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineGuest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu_kind: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub cpus: u32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub memory_mb: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gpu_kind: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_args: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MachineGuest {
    /// Lookup guest shape of a named size preset.
    pub fn preset(size: &str) -> Option<Self> {
        let (cpu_kind, cpus, memory_mb, gpu_kind) = match size {
            "shared-cpu-1x" => ("shared", 1, MIN_MEMORY_MB_PER_SHARED_CPU, ""),
            "shared-cpu-2x" => ("shared", 2, 2 * MIN_MEMORY_MB_PER_SHARED_CPU, ""),
            "shared-cpu-4x" => ("shared", 4, 4 * MIN_MEMORY_MB_PER_SHARED_CPU, ""),
            "shared-cpu-8x" => ("shared", 8, 8 * MIN_MEMORY_MB_PER_SHARED_CPU, ""),
            "performance-1x" => ("performance", 1, MIN_MEMORY_MB_PER_CPU, ""),
            "performance-2x" => ("performance", 2, 2 * MIN_MEMORY_MB_PER_CPU, ""),
            "performance-4x" => ("performance", 4, 4 * MIN_MEMORY_MB_PER_CPU, ""),
            "performance-8x" => ("performance", 8, 8 * MIN_MEMORY_MB_PER_CPU, ""),
            "performance-16x" => ("performance", 16, 16 * MIN_MEMORY_MB_PER_CPU, ""),
            "a100-40gb" => ("performance", 8, 16 * MIN_MEMORY_MB_PER_CPU, "a100-pcie-40gb"),
            "a100-80gb" => ("performance", 8, 16 * MIN_MEMORY_MB_PER_CPU, "a100-sxm4-80gb"),
            "l40s" => ("performance", 8, 16 * MIN_MEMORY_MB_PER_CPU, "l40s"),
            _ => return None,
        };

        Some(Self {
            cpu_kind: cpu_kind.into(),
            cpus,
            memory_mb,
            gpu_kind: gpu_kind.into(),
            kernel_args: Vec::new(),
            extra: Map::new(),
        })
    }
}

/// Default size preset for machines without an explicit size.
pub const DEFAULT_VM_SIZE: &str = "shared-cpu-1x";

/// Default size preset for machines that request a GPU.
pub const DEFAULT_GPU_VM_SIZE: &str = "a100-40gb";

const MIN_MEMORY_MB_PER_SHARED_CPU: u32 = 256;
const MIN_MEMORY_MB_PER_CPU: u32 = 2048;

/// Volume attached to a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineMount {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub encrypted: bool,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub size_gb: u32,
}

/// Network service exposed by a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineService {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,

    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub internal_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostop: Option<MachineAutostop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostart: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_machines_running: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<MachinePort>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<MachineCheck>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<MachineServiceConcurrency>,
}

/// What the proxy does with idle machines of a service.
///
/// Older manifests toggle this with a boolean, where `true` means
/// [`MachineAutostop::Stop`]. Serialization keeps the boolean form for
/// the two modes it can express, and falls back to the string form for
/// suspension.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub enum MachineAutostop {
    #[default]
    Off,
    Stop,
    Suspend,
}

impl MachineAutostop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Stop => "stop",
            Self::Suspend => "suspend",
        }
    }
}

impl From<bool> for MachineAutostop {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Stop
        } else {
            Self::Off
        }
    }
}

impl Display for MachineAutostop {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl Serialize for MachineAutostop {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Off => serializer.serialize_bool(false),
            Self::Stop => serializer.serialize_bool(true),
            Self::Suspend => serializer.serialize_str(self.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for MachineAutostop {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MachineAutostopVisitor)
    }
}

struct MachineAutostopVisitor;

impl de::Visitor<'_> for MachineAutostopVisitor {
    type Value = MachineAutostop;

    fn expecting(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("a boolean, or one of \"off\", \"stop\", or \"suspend\"")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<MachineAutostop, E> {
        Ok(MachineAutostop::from(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<MachineAutostop, E> {
        match value {
            "off" | "false" => Ok(MachineAutostop::Off),
            "stop" | "true" => Ok(MachineAutostop::Stop),
            "suspend" => Ok(MachineAutostop::Suspend),
            _ => Err(E::invalid_value(de::Unexpected::Str(value), &self)),
        }
    }
}

/// External port, or port range, routed to a service.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachinePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub force_https: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_options: Option<TlsOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_options: Option<HttpOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_proto_options: Option<ProxyProtoOptions>,
}

impl MachinePort {
    /// Construct port with a single external port number.
    pub fn new(port: u16, handlers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            port: Some(port),
            handlers: handlers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Check if port, or port range, covers target port number.
    pub fn contains_port(&self, port: u16) -> bool {
        if self.port == Some(port) {
            return true;
        }

        if self.start_port.is_none() && self.end_port.is_none() {
            return false;
        }

        let start = self.start_port.unwrap_or(0);
        let end = self.end_port.unwrap_or(u16::MAX);
        start <= port && port <= end
    }
}

/// TLS termination options.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct TlsOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_self_signed: Option<bool>,
}

/// HTTP handler options.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct HttpOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h2_backend: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponseOptions>,
}

/// Headers added to, or removed from, proxied responses.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct HttpResponseOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, serde_json::Value>,
}

/// PROXY protocol options.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProxyProtoOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Concurrency limits of a service.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineServiceConcurrency {
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub hard_limit: u32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub soft_limit: u32,
}

/// Health check run against a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Either "tcp" or "http".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<Duration>,

    #[serde(rename = "method", default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,

    #[serde(rename = "path", default, skip_serializing_if = "Option::is_none")]
    pub http_path: Option<String>,

    #[serde(rename = "protocol", default, skip_serializing_if = "Option::is_none")]
    pub http_protocol: Option<String>,

    #[serde(rename = "tls_skip_verify", default, skip_serializing_if = "Option::is_none")]
    pub http_skip_tls_verify: Option<bool>,

    #[serde(rename = "tls_server_name", default, skip_serializing_if = "Option::is_none")]
    pub http_tls_server_name: Option<String>,

    #[serde(rename = "headers", default, skip_serializing_if = "Vec::is_empty")]
    pub http_headers: Vec<MachineHttpHeader>,
}

/// Header sent with an HTTP check.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineHttpHeader {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Prometheus scrape target of a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineMetrics {
    pub port: u16,
    pub path: String,
}

/// Static file mapping served by the proxy.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Static {
    pub guest_path: String,
    pub url_prefix: String,
}

/// Restart policy of a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct MachineRestart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<MachineRestartPolicy>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_retries: u32,
}

/// What the orchestrator does once the main process exits.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MachineRestartPolicy {
    No,
    OnFailure,
    Always,
}

/// DNS settings of a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct DnsConfig {
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_registration: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub searches: Vec<String>,
}

/// Signal and grace period used to stop a machine.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct StopConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_zero_port(value: &u16) -> bool {
    *value == 0
}
