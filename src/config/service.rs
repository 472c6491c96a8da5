// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Service layout.
//!
//! A service routes external ports to an internal port of every machine in
//! the process groups it is scoped to. The `[http_service]` section is sugar
//! for the common case of plain HTTP on port 80, and HTTPS on port 443.

use crate::{
    duration::Duration,
    machine::{
        HttpOptions, MachineAutostop, MachinePort, MachineServiceConcurrency, ProxyProtoOptions,
        TlsOptions,
    },
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network service exposed by machines of a process group.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Service {
    /// Either "tcp" or "udp".
    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub internal_port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_stop_machines: Option<MachineAutostop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start_machines: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_machines_running: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<MachinePort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<MachineServiceConcurrency>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tcp_checks: Vec<ServiceTcpCheck>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_checks: Vec<ServiceHttpCheck>,

    /// Process groups this service is scoped to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,
}

/// HTTP service shorthand.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct HttpService {
    #[serde(default)]
    pub internal_port: u16,

    /// Redirect plain HTTP traffic to HTTPS.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force_https: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_stop_machines: Option<MachineAutostop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start_machines: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_machines_running: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<MachineServiceConcurrency>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_options: Option<TlsOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_options: Option<HttpOptions>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_proto_options: Option<ProxyProtoOptions>,

    #[serde(rename = "checks", default, skip_serializing_if = "Vec::is_empty")]
    pub http_checks: Vec<ServiceHttpCheck>,
}

/// TCP health check bound to the port of its service.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ServiceTcpCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<Duration>,
}

/// HTTP health check bound to the port of its service.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ServiceHttpCheck {
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
    pub http_tls_skip_verify: Option<bool>,

    #[serde(rename = "tls_server_name", default, skip_serializing_if = "Option::is_none")]
    pub http_tls_server_name: Option<String>,

    /// One value per header name.
    #[serde(rename = "headers", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}
