// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use flyconfig::{
    config::Service, CollectingDiagnostics, Config, Diagnostic, MachineConfig,
    TracingDiagnostics,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn derive_services_from_deployed_machine() -> Result<()> {
    let machine: MachineConfig = serde_json::from_value(json!({
        "init": {},
        "services": [{
            "protocol": "tcp",
            "internal_port": 8080,
            "ports": [
                {"port": 80, "handlers": ["http"], "force_https": true},
                {"port": 443, "handlers": ["http", "tls"]}
            ],
            "checks": [
                {"type": "http", "interval": "10s", "path": "/health",
                 "headers": [{"name": "Host", "values": ["a.example", "b.example"]}]},
                {"type": "grpc", "interval": "10s"},
                {"type": "tcp", "interval": "15s"}
            ]
        }]
    }))?;

    let mut diagnostics = CollectingDiagnostics::new();
    let services = machine
        .services
        .iter()
        .flatten()
        .map(|service| Service::from_machine_service(service, vec!["web".into()], &mut diagnostics))
        .collect::<Vec<_>>();

    assert_eq!(services.len(), 1);
    assert_eq!(services[0].tcp_checks.len(), 1);
    assert_eq!(services[0].http_checks.len(), 1);
    assert_eq!(
        services[0].http_checks[0].http_headers.get("Host").map(String::as_str),
        Some("a.example")
    );
    assert_eq!(diagnostics.reports().len(), 2);
    assert!(matches!(
        &diagnostics.reports()[0],
        Diagnostic::MultiValuedHeader { name, count: 2 } if name == "Host"
    ));
    assert!(matches!(
        &diagnostics.reports()[1],
        Diagnostic::UnknownCheckType { kind, internal_port: 8080 } if kind == "grpc"
    ));

    Ok(())
}

#[test]
fn derived_services_compile_back() -> Result<()> {
    let config: Config = r#"
        app = "hello"

        [[services]]
        protocol = "tcp"
        internal_port = 5432

        [[services.ports]]
        port = 5432
        handlers = ["pg_tls"]

        [[services.tcp_checks]]
        interval = "15s"
        timeout = "2s"
    "#
    .parse()?;
    let compiled = config.to_machine_config("", None)?;

    let mut diagnostics = TracingDiagnostics;
    let mut derived = Config::new();
    derived.app_name = "hello".into();
    derived.services = compiled
        .services
        .iter()
        .flatten()
        .map(|service| Service::from_machine_service(service, Vec::new(), &mut diagnostics))
        .collect();

    assert_eq!(derived.services, config.services);
    assert_eq!(derived.to_machine_config("", None)?, compiled);

    Ok(())
}
