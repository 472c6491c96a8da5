// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest setters.
//!
//! Setters used by launch flows that fill in a manifest from whatever was
//! detected in the source tree. Each setter updates the typed configuration
//! and mirrors the change into the raw definition, because degraded
//! configurations only trust the raw definition.

use crate::{
    config::{Config, Deploy, Experimental, Mount, ServiceHttpCheck, Static},
    duration::Duration,
    machine::MachineServiceConcurrency,
};

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

impl Config {
    /// Set internal port of first service.
    pub fn set_internal_port(&mut self, port: u16) {
        if let Some(service) = self.raw_first_service() {
            service.insert("internal_port".into(), json!(port));
        }

        if let Some(service) = self.services.first_mut() {
            service.internal_port = port;
        }
    }

    /// Add HTTP check on `path` to first service.
    pub fn set_http_check(&mut self, path: impl Into<String>) {
        let path = path.into();
        if let Some(service) = self.raw_first_service() {
            service.insert(
                "http_checks".into(),
                json!([{
                    "interval": 10000,
                    "grace_period": "5s",
                    "method": "get",
                    "path": path,
                    "protocol": "http",
                    "timeout": 2000,
                    "tls_skip_verify": false,
                }]),
            );
        }

        if let Some(service) = self.services.first_mut() {
            service.http_checks.push(ServiceHttpCheck {
                interval: Some(Duration::from_secs(10)),
                timeout: Some(Duration::from_secs(2)),
                grace_period: Some(Duration::from_secs(5)),
                http_method: Some("GET".into()),
                http_path: Some(path),
                http_protocol: Some("http".into()),
                http_tls_skip_verify: Some(false),
                ..Default::default()
            });
        }
    }

    /// Set connection concurrency limits of first service.
    pub fn set_concurrency(&mut self, soft_limit: u32, hard_limit: u32) {
        let concurrency = MachineServiceConcurrency {
            kind: "connections".into(),
            hard_limit,
            soft_limit,
        };

        if let Some(service) = self.raw_first_service() {
            service.insert("concurrency".into(), json!(concurrency));
        }

        if let Some(service) = self.services.first_mut() {
            service.concurrency = Some(concurrency);
        }
    }

    pub fn set_release_command(&mut self, command: impl Into<String>) {
        let command = command.into();
        if let Some(deploy) = self.raw_section("deploy") {
            deploy.insert("release_command".into(), json!(command));
        }
        self.deploy.get_or_insert_with(Deploy::default).release_command = command;
    }

    /// Set command of the image through the experimental section.
    pub fn set_docker_command(&mut self, command: impl Into<String>) {
        let command = command.into();
        if let Some(experimental) = self.raw_section("experimental") {
            experimental.insert("cmd".into(), json!(command));
        }
        self.experimental
            .get_or_insert_with(Experimental::default)
            .cmd = vec![command];
    }

    /// Set entrypoint of the image through the experimental section.
    pub fn set_docker_entrypoint(&mut self, entrypoint: impl Into<String>) {
        let entrypoint = entrypoint.into();
        if let Some(experimental) = self.raw_section("experimental") {
            experimental.insert("entrypoint".into(), json!(entrypoint));
        }
        self.experimental
            .get_or_insert_with(Experimental::default)
            .entrypoint = vec![entrypoint];
    }

    pub fn set_kill_signal(&mut self, signal: impl Into<String>) {
        let signal = signal.into();
        if let Some(raw) = self.raw_table() {
            raw.insert("kill_signal".into(), json!(signal));
        }
        self.kill_signal = Some(signal);
    }

    pub fn set_env_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        if let Some(env) = self.raw_section("env") {
            env.insert(name.clone(), json!(value));
        }
        self.env.insert(name, value);
    }

    pub fn set_env_variables(&mut self, vars: BTreeMap<String, String>) {
        for (name, value) in vars {
            self.set_env_variable(name, value);
        }
    }

    /// Declare process group with its command.
    pub fn set_process(&mut self, name: impl Into<String>, command: impl Into<String>) {
        let (name, command) = (name.into(), command.into());
        debug!("set command of process group {name:?}");
        if let Some(processes) = self.raw_section("processes") {
            processes.insert(name.clone(), json!(command));
        }
        self.processes.insert(name, command);
    }

    pub fn set_statics(&mut self, statics: Vec<Static>) {
        if let Some(raw) = self.raw_table() {
            raw.insert("statics".into(), json!(statics));
        }
        self.statics = statics;
    }

    pub fn set_mounts(&mut self, mounts: Vec<Mount>) {
        if let Some(raw) = self.raw_table() {
            raw.insert("mounts".into(), json!(mounts));
        }
        self.mounts = mounts;
    }

    fn raw_table(&mut self) -> Option<&mut Map<String, Value>> {
        if !self.raw_definition.is_object() {
            self.raw_definition = Value::Object(Map::new());
        }

        self.raw_definition.as_object_mut()
    }

    fn raw_first_service(&mut self) -> Option<&mut Map<String, Value>> {
        match self.raw_definition.get_mut("services")? {
            Value::Array(services) => services.first_mut().and_then(Value::as_object_mut),
            Value::Object(service) => Some(service),
            _ => None,
        }
    }

    // INVARIANT: Sections that are not tables are left as the user wrote them.
    fn raw_section(&mut self, key: &str) -> Option<&mut Map<String, Value>> {
        self.raw_table()?
            .entry(key)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
    }
}
