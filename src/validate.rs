// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest validation.
//!
//! Two flavors of validation are offered. __Strict validation__ walks the
//! raw document before any patching, and reports sections and keys that the
//! manifest layout does not know about. Such keys are silently ignored
//! during deserialization, which usually means a typo. __Semantic
//! validation__ compiles every process group of a parsed configuration, and
//! collects every error instead of stopping at the first one.

use crate::config::{Config, ConfigError};

use serde_json::Value;
use std::{collections::BTreeMap, fmt};
use tracing::{debug, instrument};

/// Expected shape of a section of the raw document.
enum Shape {
    /// Anything goes.
    Any,

    /// Table with a fixed set of keys.
    Table(&'static [(&'static str, Shape)]),

    /// Table with arbitrary keys whose values share one shape.
    MapOf(&'static Shape),

    /// Either one table, or array of tables.
    ListOf(&'static Shape),
}

const TLS_OPTIONS: Shape = Shape::Table(&[
    ("alpn", Shape::Any),
    ("versions", Shape::Any),
    ("default_self_signed", Shape::Any),
]);

const HTTP_OPTIONS: Shape = Shape::Table(&[
    ("compress", Shape::Any),
    ("h2_backend", Shape::Any),
    ("response", Shape::Table(&[("headers", Shape::Any)])),
]);

const PROXY_PROTO_OPTIONS: Shape = Shape::Table(&[("version", Shape::Any)]);

const CONCURRENCY: Shape = Shape::Table(&[
    ("type", Shape::Any),
    ("hard_limit", Shape::Any),
    ("soft_limit", Shape::Any),
]);

const TCP_CHECK: Shape = Shape::Table(&[
    ("interval", Shape::Any),
    ("timeout", Shape::Any),
    ("grace_period", Shape::Any),
]);

const HTTP_CHECK: Shape = Shape::Table(&[
    ("interval", Shape::Any),
    ("timeout", Shape::Any),
    ("grace_period", Shape::Any),
    ("method", Shape::Any),
    ("path", Shape::Any),
    ("protocol", Shape::Any),
    ("tls_skip_verify", Shape::Any),
    ("tls_server_name", Shape::Any),
    ("headers", Shape::Any),
]);

const TOPLEVEL_CHECK: Shape = Shape::Table(&[
    ("port", Shape::Any),
    ("type", Shape::Any),
    ("interval", Shape::Any),
    ("timeout", Shape::Any),
    ("grace_period", Shape::Any),
    ("method", Shape::Any),
    ("path", Shape::Any),
    ("protocol", Shape::Any),
    ("tls_skip_verify", Shape::Any),
    ("tls_server_name", Shape::Any),
    ("headers", Shape::Any),
    ("processes", Shape::Any),
]);

const PORT: Shape = Shape::Table(&[
    ("port", Shape::Any),
    ("start_port", Shape::Any),
    ("end_port", Shape::Any),
    ("handlers", Shape::Any),
    ("force_https", Shape::Any),
    ("tls_options", TLS_OPTIONS),
    ("http_options", HTTP_OPTIONS),
    ("proxy_proto_options", PROXY_PROTO_OPTIONS),
]);

const SERVICE: Shape = Shape::Table(&[
    ("protocol", Shape::Any),
    ("internal_port", Shape::Any),
    ("auto_stop_machines", Shape::Any),
    ("auto_start_machines", Shape::Any),
    ("min_machines_running", Shape::Any),
    ("ports", Shape::ListOf(&PORT)),
    ("concurrency", CONCURRENCY),
    ("tcp_checks", Shape::ListOf(&TCP_CHECK)),
    ("http_checks", Shape::ListOf(&HTTP_CHECK)),
    ("processes", Shape::Any),
]);

const HTTP_SERVICE: Shape = Shape::Table(&[
    ("internal_port", Shape::Any),
    ("force_https", Shape::Any),
    ("auto_stop_machines", Shape::Any),
    ("auto_start_machines", Shape::Any),
    ("min_machines_running", Shape::Any),
    ("processes", Shape::Any),
    ("concurrency", CONCURRENCY),
    ("tls_options", TLS_OPTIONS),
    ("http_options", HTTP_OPTIONS),
    ("proxy_proto_options", PROXY_PROTO_OPTIONS),
    ("checks", Shape::ListOf(&HTTP_CHECK)),
]);

const MOUNT: Shape = Shape::Table(&[
    ("source", Shape::Any),
    ("destination", Shape::Any),
    ("initial_size", Shape::Any),
    ("processes", Shape::Any),
]);

const COMPUTE: Shape = Shape::Table(&[
    ("size", Shape::Any),
    ("memory", Shape::Any),
    ("cpus", Shape::Any),
    ("cpu_kind", Shape::Any),
    ("gpu_kind", Shape::Any),
    ("processes", Shape::Any),
]);

const METRICS: Shape = Shape::Table(&[("port", Shape::Any), ("path", Shape::Any)]);

const ROOT: &[(&str, Shape)] = &[
    ("app", Shape::Any),
    ("primary_region", Shape::Any),
    ("kill_signal", Shape::Any),
    ("kill_timeout", Shape::Any),
    (
        "build",
        Shape::Table(&[
            ("builder", Shape::Any),
            ("buildpacks", Shape::Any),
            ("image", Shape::Any),
            ("builtin", Shape::Any),
            ("settings", Shape::Any),
            ("dockerfile", Shape::Any),
            ("ignorefile", Shape::Any),
            ("build-target", Shape::Any),
            ("build_target", Shape::Any),
            ("args", Shape::Any),
        ]),
    ),
    (
        "deploy",
        Shape::Table(&[("release_command", Shape::Any), ("strategy", Shape::Any)]),
    ),
    (
        "experimental",
        Shape::Table(&[
            ("cmd", Shape::Any),
            ("entrypoint", Shape::Any),
            ("exec", Shape::Any),
            ("auto_rollback", Shape::Any),
            ("enable_consul", Shape::Any),
            ("enable_etcd", Shape::Any),
            ("kill_timeout", Shape::Any),
            ("metrics_port", Shape::Any),
            ("metrics_path", Shape::Any),
        ]),
    ),
    ("env", Shape::Any),
    ("processes", Shape::Any),
    ("mount", Shape::ListOf(&MOUNT)),
    ("mounts", Shape::ListOf(&MOUNT)),
    ("http_service", HTTP_SERVICE),
    ("services", Shape::ListOf(&SERVICE)),
    ("checks", Shape::MapOf(&TOPLEVEL_CHECK)),
    (
        "statics",
        Shape::ListOf(&Shape::Table(&[
            ("guest_path", Shape::Any),
            ("url_prefix", Shape::Any),
        ])),
    ),
    ("metric", Shape::ListOf(&METRICS)),
    ("metrics", Shape::ListOf(&METRICS)),
    ("vm", Shape::ListOf(&COMPUTE)),
    ("compute", Shape::ListOf(&COMPUTE)),
    ("computes", Shape::ListOf(&COMPUTE)),
    (
        "restart",
        Shape::ListOf(&Shape::Table(&[
            ("policy", Shape::Any),
            ("max_retries", Shape::Any),
            ("processes", Shape::Any),
        ])),
    ),
];

/// Findings of strict validation.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct StrictReport {
    /// Unknown toplevel sections.
    pub unrecognized_sections: Vec<String>,

    /// Unknown keys keyed by the path of the section holding them, e.g.,
    /// "http_service.checks[0]".
    pub unrecognized_keys: BTreeMap<String, Vec<String>>,
}

impl StrictReport {
    pub fn is_empty(&self) -> bool {
        self.unrecognized_sections.is_empty() && self.unrecognized_keys.is_empty()
    }
}

impl fmt::Display for StrictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.unrecognized_sections {
            writeln!(f, "unrecognized section: [{section}]")?;
        }

        for (section, keys) in &self.unrecognized_keys {
            writeln!(f, "unrecognized keys in [{section}]: {}", keys.join(", "))?;
        }

        Ok(())
    }
}

/// Report sections and keys of raw document that are not part of the
/// manifest layout.
///
/// Values that do not have the expected type are skipped, since reporting
/// them is the job of the patch pipeline.
#[instrument(skip(raw), level = "debug")]
pub fn strict_validate(raw: &Value) -> StrictReport {
    let mut report = StrictReport::default();
    let Some(root) = raw.as_object() else {
        return report;
    };

    for (key, value) in root {
        match ROOT.iter().find(|(name, _)| name == key) {
            Some((_, shape)) => walk(shape, key, value, &mut report),
            None => report.unrecognized_sections.push(key.clone()),
        }
    }

    debug!(
        "strict validation found {} unknown section(s), and {} section(s) with unknown keys",
        report.unrecognized_sections.len(),
        report.unrecognized_keys.len()
    );
    report
}

fn walk(shape: &Shape, path: &str, value: &Value, report: &mut StrictReport) {
    match (shape, value) {
        (Shape::Any, _) => {}
        (Shape::Table(fields), Value::Object(table)) => {
            let mut unknown = Vec::new();
            for (key, value) in table {
                match fields.iter().find(|(name, _)| name == key) {
                    Some((_, shape)) => walk(shape, &format!("{path}.{key}"), value, report),
                    None => unknown.push(key.clone()),
                }
            }

            if !unknown.is_empty() {
                report.unrecognized_keys.insert(path.to_string(), unknown);
            }
        }
        (Shape::MapOf(shape), Value::Object(table)) => {
            for (key, value) in table {
                walk(shape, &format!("{path}.{key}"), value, report);
            }
        }
        (Shape::ListOf(shape), Value::Array(items)) => {
            for (index, item) in items.iter().enumerate() {
                walk(shape, &format!("{path}[{index}]"), item, report);
            }
        }
        (Shape::ListOf(shape), Value::Object(_)) => walk(shape, path, value, report),
        _ => {}
    }
}

/// Every error found by semantic validation.
#[derive(Debug, thiserror::Error)]
#[error(
    "application config has {} error(s):\n{}",
    errors.len(),
    errors.iter().map(|error| format!("  - {error}")).collect::<Vec<_>>().join("\n")
)]
pub struct ValidationError {
    pub errors: Vec<ConfigError>,
}

impl Config {
    /// Validate configuration by compiling every process group.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError`] holding every distinct error found.
    #[instrument(skip(self), level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if let Err(error) = self.ensure_machines_platform() {
            return Err(ValidationError {
                errors: vec![error],
            });
        }

        let mut errors = Vec::new();
        if let Err(error) = self.process_configs() {
            errors.push(error);
        }

        for group in self.process_names() {
            if let Err(error) = self.to_machine_config(&group, None) {
                errors.push(error);
            }
        }

        // INVARIANT: Groups often trip over the same section, report it once.
        let mut seen = Vec::new();
        errors.retain(|error| {
            let message = error.to_string();
            if seen.contains(&message) {
                return false;
            }
            seen.push(message);
            true
        });

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { errors })
        }
    }
}

/// Friendly result alias :3
type Result<T, E = ValidationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn raw(document: &str) -> anyhow::Result<Value> {
        Ok(toml::de::from_str(document)?)
    }

    #[test]
    fn strict_validate_accepts_known_layout() -> anyhow::Result<()> {
        let report = strict_validate(&raw(indoc! {r#"
            app = "test-app"
            primary_region = "iad"

            [build]
            builder = "dockerfile"

            [env]
            NODE_ENV = "production"

            [[services]]
            internal_port = 8080
            concurrency = "20,25"

            [[services.ports]]
            port = 80
            handlers = ["http"]
        "#})?);
        assert!(report.is_empty());

        Ok(())
    }

    #[test]
    fn strict_validate_reports_unknown_sections_and_keys() -> anyhow::Result<()> {
        let report = strict_validate(&raw(indoc! {r#"
            app = "bla"

            [unknown_section]
            key = "value"

            [deploy]
            processes = ["app"]
            release_command = "./bin/rails db:prepare"

            [http_service]
            internal_port = 3000

            [[http_service.checks]]
            processes = ["app"]
            path = "/up"

            [http_service.http_options]
            h2_backend = true
            xyz = "123"

            [checks.health_check]
            type = "http"
            invalid_key = 123
        "#})?);

        let expect = StrictReport {
            unrecognized_sections: vec!["unknown_section".into()],
            unrecognized_keys: BTreeMap::from([
                ("checks.health_check".into(), vec!["invalid_key".into()]),
                ("deploy".into(), vec!["processes".into()]),
                ("http_service.checks[0]".into(), vec!["processes".into()]),
                ("http_service.http_options".into(), vec!["xyz".into()]),
            ]),
        };
        assert_eq!(report, expect);
        assert!(report.to_string().contains("unrecognized section: [unknown_section]"));

        Ok(())
    }

    #[test]
    fn validate_collects_errors_of_every_group() -> anyhow::Result<()> {
        let config: Config = indoc! {r#"
            app = "hello"

            [processes]
            web = "run web"
            worker = "run 'worker"

            [checks.alive]
            type = "script"
            port = 8080
            processes = ["web"]
        "#}
        .parse()?;

        let error = config.validate().unwrap_err();
        assert_eq!(error.errors.len(), 2);
        assert!(error.errors.iter().any(|error| matches!(
            error,
            ConfigError::ShellSplit { process_group, .. } if process_group == "worker"
        )));
        assert!(error
            .errors
            .iter()
            .any(|error| matches!(error, ConfigError::InvalidCheckType { .. })));

        Ok(())
    }

    #[test]
    fn validate_accepts_sound_config() -> anyhow::Result<()> {
        let config: Config = indoc! {r#"
            app = "hello"

            [http_service]
            internal_port = 8080

            [checks.alive]
            type = "tcp"
        "#}
        .parse()?;
        config.validate()?;

        Ok(())
    }
}
