// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::ManifestFixture;

use flyconfig::{
    duration::Duration,
    load_config,
    machine::{MachineMetrics, MachineServiceConcurrency, StopConfig},
    resolve_config_path, strict_validate, ConfigError,
};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;

const LEGACY_MANIFEST: &str = indoc! {r#"
    app = "legacy"
    primary_region = "ord"

    [experimental]
    cmd = "bin/serve"
    kill_timeout = 10
    metrics_port = 9091
    metrics_path = "/metrics"

    [env]
    WORKERS = 4
    DEBUG = false

    [mount]
    source = "data"
    destination = "/data"

    [[services]]
    internal_port = "8080"
    protocol = "tcp"
    concurrency = "12,23"

    [[services.ports]]
    port = 443
    handlers = ["tls", "http"]

    [[services.tcp_checks]]
    interval = 15000
    timeout = 2000
"#};

#[sealed_test]
fn compile_legacy_manifest_from_directory() -> Result<()> {
    let fixture = ManifestFixture::new("legacy/fly.toml", LEGACY_MANIFEST)?;
    let path = resolve_config_path("legacy")?;
    assert_eq!(path, fixture.path());

    let document = load_config(&path)?;
    assert!(!document.is_degraded());
    let config = document.into_config()?;
    assert_eq!(config.config_file_path(), fixture.path());
    config.validate()?;

    let result = config.to_machine_config("", None)?;
    assert_eq!(result.init.cmd, Some(vec!["bin/serve".to_string()]));
    assert_eq!(
        result.metrics,
        Some(MachineMetrics {
            port: 9091,
            path: "/metrics".into(),
        })
    );
    assert_eq!(
        result.stop_config,
        Some(StopConfig {
            timeout: Some(Duration::from_secs(10)),
            signal: None,
        })
    );

    let env = result.env.unwrap_or_default();
    assert_eq!(env["WORKERS"], "4");
    assert_eq!(env["DEBUG"], "false");
    assert_eq!(env["PRIMARY_REGION"], "ord");

    let mounts = result.mounts.unwrap_or_default();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].name, "data");
    assert_eq!(mounts[0].path, "/data");

    let services = result.services.unwrap_or_default();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].internal_port, 8080);
    assert_eq!(
        services[0].concurrency,
        Some(MachineServiceConcurrency {
            kind: "requests".into(),
            hard_limit: 23,
            soft_limit: 12,
        })
    );
    assert_eq!(services[0].checks[0].interval, Some(Duration::from_secs(15)));
    assert_eq!(services[0].checks[0].timeout, Some(Duration::from_secs(2)));

    Ok(())
}

#[sealed_test]
fn degrade_malformed_manifest() -> Result<()> {
    let fixture = ManifestFixture::new(
        "fly.toml",
        indoc! {r#"
            app = "broken"
            env = "nope"

            [build]
            image = "flyio/hellofly:latest"

            [surprise]
            key = "value"
        "#},
    )?;

    let document = load_config(fixture.path())?;
    assert!(document.is_degraded());
    assert_eq!(document.config().app_name, "broken");
    assert_eq!(
        document
            .config()
            .build
            .as_ref()
            .and_then(|build| build.image.as_deref()),
        Some("flyio/hellofly:latest")
    );

    let report = strict_validate(document.config().raw_definition());
    assert_eq!(report.unrecognized_sections, vec!["surprise".to_string()]);

    assert!(matches!(
        document.config().to_machine_config("", None),
        Err(ConfigError::NotMachinesPlatform { .. })
    ));
    assert!(matches!(document.into_config(), Err(ConfigError::Patch(_))));

    Ok(())
}
