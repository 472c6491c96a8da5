// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use flyconfig::{
    machine::{MachineGuest, METADATA_PROCESS_GROUP},
    Config, MachineConfig,
};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

const MULTI_GROUP_MANIFEST: &str = indoc! {r#"
    app = "shop"
    primary_region = "sea"
    kill_signal = "SIGINT"

    [env]
    PRIMARY_REGION = "xxx"
    RAILS_ENV = "production"

    [processes]
    web = "bundle exec puma -C config/puma.rb"
    worker = "bundle exec sidekiq"

    [http_service]
    internal_port = 3000
    force_https = true
    processes = ["web"]

    [http_service.concurrency]
    type = "requests"
    soft_limit = 50
    hard_limit = 70

    [[http_service.checks]]
    interval = "30s"
    timeout = "5s"
    path = "/up"
    method = "GET"

    [checks.sidekiq]
    type = "tcp"
    port = 7433
    processes = ["worker"]

    [[mounts]]
    source = "uploads"
    destination = "/rails/storage"
    processes = ["web"]

    [[vm]]
    size = "shared-cpu-2x"
    memory = "2gb"

    [[vm]]
    size = "performance-1x"
    processes = ["worker"]

    [[restart]]
    policy = "on-failure"
    max_retries = 5
"#};

#[test]
fn compile_every_process_group() -> Result<()> {
    let config: Config = MULTI_GROUP_MANIFEST.parse()?;
    config.validate()?;
    assert_eq!(config.process_names(), vec!["web", "worker"]);
    assert_eq!(config.default_process_name(), "web");

    let web = config.to_machine_config("web", None)?;
    let worker = config.to_machine_config("worker", None)?;

    assert_eq!(
        web.init.cmd,
        Some(vec![
            "bundle".to_string(),
            "exec".into(),
            "puma".into(),
            "-C".into(),
            "config/puma.rb".into(),
        ])
    );
    assert_eq!(web.services.as_ref().map(Vec::len), Some(1));
    assert_eq!(web.checks, None);
    assert_eq!(web.mounts.as_ref().map(Vec::len), Some(1));
    assert_eq!(web.guest.as_ref().map(|guest| guest.memory_mb), Some(2048));

    assert_eq!(worker.services, None);
    assert_eq!(
        worker
            .checks
            .as_ref()
            .and_then(|checks| checks.get("sidekiq"))
            .and_then(|check| check.port),
        Some(7433)
    );
    assert_eq!(worker.mounts, None);
    assert_eq!(
        worker.guest.as_ref().map(|guest| guest.cpu_kind.as_str()),
        Some("performance")
    );

    for (group, result) in [("web", &web), ("worker", &worker)] {
        let env = result.env.clone().unwrap_or_default();
        assert_eq!(env["PRIMARY_REGION"], "sea");
        assert_eq!(env["FLY_PROCESS_GROUP"], group);
        assert_eq!(
            result.metadata.as_ref().map(|metadata| metadata[METADATA_PROCESS_GROUP].as_str()),
            Some(group)
        );
        assert_eq!(
            result.stop_config.as_ref().and_then(|stop| stop.signal.as_deref()),
            Some("SIGINT")
        );
        assert_eq!(result.restart.as_ref().map(|restart| restart.max_retries), Some(5));
    }

    let configs = config.process_configs()?;
    assert_eq!(configs["web"].services.len(), 1);
    assert_eq!(configs["worker"].checks.len(), 1);
    assert_eq!(configs["worker"].mounts.len(), 0);

    Ok(())
}

#[test]
fn redeploy_preserves_machine_state() -> Result<()> {
    let mut config: Config = MULTI_GROUP_MANIFEST.parse()?;
    config.compute.clear();

    let previous = MachineConfig {
        guest: Some(MachineGuest {
            cpu_kind: "shared".into(),
            cpus: 3,
            memory_mb: 768,
            ..Default::default()
        }),
        metadata: Some(BTreeMap::from([
            ("retain".to_string(), "propagated".to_string()),
            (METADATA_PROCESS_GROUP.to_string(), "stale".to_string()),
        ])),
        env: Some(BTreeMap::from([("STALE".to_string(), "1".to_string())])),
        auto_destroy: true,
        ..Default::default()
    };

    let result = config.to_machine_config("worker", Some(&previous))?;
    assert_eq!(result.guest, previous.guest);
    assert!(result.auto_destroy);

    let metadata = result.metadata.unwrap_or_default();
    assert_eq!(metadata["retain"], "propagated");
    assert_eq!(metadata[METADATA_PROCESS_GROUP], "worker");
    assert!(!result.env.unwrap_or_default().contains_key("STALE"));

    Ok(())
}

#[test]
fn definition_round_trip_compiles_identically() -> Result<()> {
    let config: Config = MULTI_GROUP_MANIFEST.parse()?;
    let restored = Config::from_definition(config.to_definition()?)?;
    assert_eq!(restored, config);

    for group in config.process_names() {
        assert_eq!(
            restored.to_machine_config(&group, None)?,
            config.to_machine_config(&group, None)?
        );
    }

    Ok(())
}

#[test]
fn flattened_views_are_independent() -> Result<()> {
    let config: Config = indoc! {r#"
        app = "shop"

        [processes]
        web = "serve"
        worker = "work"

        [env]
        SHARED = "yes"
    "#}
    .parse()?;

    let mut web = config.flatten("web")?;
    let worker = config.flatten("worker")?;
    web.env.insert("ONLY_WEB".into(), "1".into());

    assert!(!worker.env.contains_key("ONLY_WEB"));
    assert!(!config.env.contains_key("ONLY_WEB"));
    assert_eq!(worker.flatten("")?, worker);

    Ok(())
}
