// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Service and check mapping.
//!
//! Map document-level services and checks into their machine runtime
//! counterparts, and back. The forward direction is exact. The reverse
//! direction is used to derive a manifest from machines that are already
//! deployed, which may carry things the manifest cannot express. Such drift
//! is reported through a [`Diagnostics`] sink, and the offending item is
//! dropped or truncated instead of failing the whole conversion.

use crate::{
    config::{
        CheckKind, Config, ConfigError, HttpService, Service, ServiceHttpCheck, ServiceTcpCheck,
        ToplevelCheck,
    },
    machine::{MachineCheck, MachineHttpHeader, MachinePort, MachineService},
};

use std::collections::BTreeMap;
use tracing::warn;

/// Recoverable drift found while mapping machine services back.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    /// Check of unknown type was dropped.
    #[error("unknown check type '{kind}' when converting service on internal port {internal_port}")]
    UnknownCheckType { kind: String, internal_port: u16 },

    /// Header carried more than one value, only the first was kept.
    #[error("header '{name}' has {count} values, but only one value per header is supported")]
    MultiValuedHeader { name: String, count: usize },
}

/// Sink for recoverable drift reports.
pub trait Diagnostics {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Log every report as a warning.
#[derive(Default, Debug, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        warn!("{diagnostic}");
    }
}

/// Keep every report around for later inspection.
#[derive(Default, Debug, Clone)]
pub struct CollectingDiagnostics {
    reports: Vec<Diagnostic>,
}

impl CollectingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> &[Diagnostic] {
        self.reports.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl Diagnostics for CollectingDiagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.reports.push(diagnostic);
    }
}

impl HttpService {
    /// Expand into a plain TCP service.
    ///
    /// Port 80 speaks plain HTTP and optionally forces HTTPS, port 443
    /// terminates TLS in front of HTTP. Both ports share the same TLS, HTTP,
    /// and PROXY protocol options.
    pub fn to_service(&self) -> Service {
        let port = |number: u16, handlers: &[&str], force_https: bool| MachinePort {
            force_https,
            tls_options: self.tls_options.clone(),
            http_options: self.http_options.clone(),
            proxy_proto_options: self.proxy_proto_options.clone(),
            ..MachinePort::new(number, handlers.iter().copied())
        };

        Service {
            protocol: "tcp".into(),
            internal_port: self.internal_port,
            auto_stop_machines: self.auto_stop_machines,
            auto_start_machines: self.auto_start_machines,
            min_machines_running: self.min_machines_running,
            ports: vec![
                port(80, &["http"], self.force_https),
                port(443, &["http", "tls"], false),
            ],
            concurrency: self.concurrency.clone(),
            tcp_checks: Vec::new(),
            http_checks: self.http_checks.clone(),
            processes: self.processes.clone(),
        }
    }
}

impl Config {
    /// Every service, with the http service expanded first.
    pub fn all_services(&self) -> Vec<Service> {
        self.http_service
            .iter()
            .map(HttpService::to_service)
            .chain(self.services.iter().cloned())
            .collect()
    }

    /// Compile toplevel check for a process group.
    ///
    /// Checks without a port inherit the internal port of the http service.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::InvalidCheckType`] if check type is not
    ///   exactly "http" or "tcp".
    /// - Return [`ConfigError::CheckWithoutPort`] if check has no port and
    ///   there is no http service to take it from.
    pub(crate) fn compile_toplevel_check(
        &self,
        name: &str,
        check: &ToplevelCheck,
        process_group: &str,
    ) -> Result<MachineCheck> {
        let mut machine_check =
            check
                .to_machine_check()
                .ok_or_else(|| ConfigError::InvalidCheckType {
                    check: name.to_string(),
                    process_group: process_group.to_string(),
                })?;

        if machine_check.port.is_none() {
            let service = self
                .http_service
                .as_ref()
                .ok_or_else(|| ConfigError::CheckWithoutPort {
                    check: name.to_string(),
                    process_group: process_group.to_string(),
                })?;
            machine_check.port = Some(service.internal_port);
        }

        Ok(machine_check)
    }
}

impl Service {
    /// Map into machine service.
    ///
    /// TCP checks come first, followed by HTTP checks, each in declaration
    /// order.
    pub fn to_machine_service(&self) -> MachineService {
        let checks = self
            .tcp_checks
            .iter()
            .map(ServiceTcpCheck::to_machine_check)
            .chain(self.http_checks.iter().map(ServiceHttpCheck::to_machine_check))
            .collect();

        MachineService {
            protocol: self.protocol.clone(),
            internal_port: self.internal_port,
            autostop: self.auto_stop_machines,
            autostart: self.auto_start_machines,
            min_machines_running: self.min_machines_running,
            ports: self.ports.clone(),
            checks,
            concurrency: self.concurrency.clone(),
        }
    }

    /// Map machine service back into document service.
    ///
    /// Checks of unknown type are dropped and reported to `diagnostics`.
    pub fn from_machine_service(
        service: &MachineService,
        processes: Vec<String>,
        diagnostics: &mut impl Diagnostics,
    ) -> Self {
        let mut tcp_checks = Vec::new();
        let mut http_checks = Vec::new();
        for check in &service.checks {
            match check.kind.as_deref().map(CheckKind::try_from) {
                Some(Ok(CheckKind::Tcp)) => tcp_checks.push(ServiceTcpCheck::from_machine_check(check)),
                Some(Ok(CheckKind::Http)) => {
                    http_checks.push(ServiceHttpCheck::from_machine_check(check, diagnostics))
                }
                _ => diagnostics.report(Diagnostic::UnknownCheckType {
                    kind: check.kind.clone().unwrap_or_default(),
                    internal_port: service.internal_port,
                }),
            }
        }

        Self {
            protocol: service.protocol.clone(),
            internal_port: service.internal_port,
            auto_stop_machines: service.autostop,
            auto_start_machines: service.autostart,
            min_machines_running: service.min_machines_running,
            ports: service.ports.clone(),
            concurrency: service.concurrency.clone(),
            tcp_checks,
            http_checks,
            processes,
        }
    }
}

impl ServiceTcpCheck {
    pub fn to_machine_check(&self) -> MachineCheck {
        MachineCheck {
            kind: Some(CheckKind::Tcp.to_string()),
            interval: self.interval,
            timeout: self.timeout,
            grace_period: self.grace_period,
            ..Default::default()
        }
    }

    pub fn from_machine_check(check: &MachineCheck) -> Self {
        Self {
            interval: check.interval,
            timeout: check.timeout,
            grace_period: check.grace_period,
        }
    }
}

impl ServiceHttpCheck {
    pub fn to_machine_check(&self) -> MachineCheck {
        MachineCheck {
            kind: Some(CheckKind::Http.to_string()),
            interval: self.interval,
            timeout: self.timeout,
            grace_period: self.grace_period,
            http_method: self.http_method.clone(),
            http_path: self.http_path.clone(),
            http_protocol: self.http_protocol.clone(),
            http_skip_tls_verify: self.http_tls_skip_verify,
            http_tls_server_name: self.http_tls_server_name.clone(),
            http_headers: to_machine_headers(&self.http_headers),
            ..Default::default()
        }
    }

    /// Map machine check back into document check.
    ///
    /// Only the first value of each header survives. Extra values are
    /// reported to `diagnostics`.
    pub fn from_machine_check(check: &MachineCheck, diagnostics: &mut impl Diagnostics) -> Self {
        Self {
            interval: check.interval,
            timeout: check.timeout,
            grace_period: check.grace_period,
            http_method: check.http_method.clone(),
            http_path: check.http_path.clone(),
            http_protocol: check.http_protocol.clone(),
            http_tls_skip_verify: check.http_skip_tls_verify,
            http_tls_server_name: check.http_tls_server_name.clone(),
            http_headers: from_machine_headers(&check.http_headers, diagnostics),
        }
    }
}

impl ToplevelCheck {
    /// Map into machine check.
    ///
    /// HTTP methods are upper-cased. Port inheritance is left to the caller.
    /// Returns `None` if check type is missing or unknown.
    pub fn to_machine_check(&self) -> Option<MachineCheck> {
        let kind = self.kind()?;

        Some(MachineCheck {
            port: self.port,
            kind: Some(kind.to_string()),
            interval: self.interval,
            timeout: self.timeout,
            grace_period: self.grace_period,
            http_method: self.http_method.as_deref().map(str::to_uppercase),
            http_path: self.http_path.clone(),
            http_protocol: self.http_protocol.clone(),
            http_skip_tls_verify: self.http_tls_skip_verify,
            http_tls_server_name: self.http_tls_server_name.clone(),
            http_headers: to_machine_headers(&self.http_headers),
        })
    }
}

fn to_machine_headers(headers: &BTreeMap<String, String>) -> Vec<MachineHttpHeader> {
    headers
        .iter()
        .map(|(name, value)| MachineHttpHeader {
            name: name.clone(),
            values: vec![value.clone()],
        })
        .collect()
}

fn from_machine_headers(
    headers: &[MachineHttpHeader],
    diagnostics: &mut impl Diagnostics,
) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for header in headers {
        if header.values.len() > 1 {
            diagnostics.report(Diagnostic::MultiValuedHeader {
                name: header.name.clone(),
                count: header.values.len(),
            });
        }

        if let Some(value) = header.values.first() {
            result.insert(header.name.clone(), value.clone());
        }
    }

    result
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
