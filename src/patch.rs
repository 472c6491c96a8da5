// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Document normalization.
//!
//! Application manifests have gone through several shapes over the years.
//! Some came from hand written TOML files, others came back from the server
//! as JSON definitions that were already partially normalized. Instead of
//! teaching the typed [`Config`](crate::config::Config) layout every shape,
//! the untyped document is rewritten into one canonical shape first, and only
//! then bound to the typed layout.
//!
//! # Pipeline
//!
//! Each patch owns exactly one section of the document, and patches run in a
//! fixed order. Every patch must accept its own output, so running the whole
//! pipeline over an already canonical document changes nothing.
//!
//! # Quirks
//!
//! Integers in the `interval`, `timeout`, and `grace_period` fields of checks
//! always mean __milliseconds__. Integers in `kill_timeout` always mean
//! __seconds__. Numeric strings follow the unit of their field. Both are
//! rewritten into suffixed duration strings.

use crate::duration::Duration;

use serde_json::{Map, Value};
use tracing::{debug, instrument};

type Table = Map<String, Value>;
type PatchFn = fn(&mut Table) -> Result<()>;

const PATCHES: &[(&str, PatchFn)] = &[
    ("env", patch_env),
    ("services", patch_services),
    ("http_service", patch_http_service),
    ("processes", patch_processes),
    ("experimental", patch_experimental),
    ("checks", patch_toplevel_checks),
    ("vm", patch_compute),
    ("mounts", patch_mounts),
    ("metrics", patch_metrics),
    ("restart", patch_restart),
    ("kill_timeout", patch_top_fields),
    ("build", patch_build),
];

/// Normalize untyped document into canonical shape.
///
/// Input document is left untouched, a patched copy is returned instead.
///
/// # Errors
///
/// - Return [`PatchError::NotATable`] if document root is not a table.
/// - Return any other [`PatchError`] if a section has a shape that cannot be
///   migrated.
#[instrument(skip(document), level = "debug")]
pub fn patch_document(document: &Value) -> Result<Value> {
    let Value::Object(root) = document else {
        return Err(PatchError::NotATable {
            found: type_name(document),
        });
    };

    let mut root = root.clone();
    for (section, patch) in PATCHES {
        debug!("patch {section} section");
        patch(&mut root)?;
    }

    Ok(Value::Object(root))
}

fn patch_env(root: &mut Table) -> Result<()> {
    let Some(raw) = root.remove("env") else {
        return Ok(());
    };

    let env = coerce_env(raw)?;
    if !env.is_empty() {
        root.insert("env".into(), Value::Object(env));
    }

    Ok(())
}

fn coerce_env(raw: Value) -> Result<Table> {
    match raw {
        Value::Object(table) => Ok(table
            .into_iter()
            .map(|(key, value)| (key, Value::String(display_value(&value))))
            .collect()),
        Value::Array(items) => {
            let mut env = Table::new();
            for item in items {
                env.extend(coerce_env(item)?);
            }
            Ok(env)
        }
        other => Err(PatchError::Env {
            found: type_name(&other),
        }),
    }
}

fn patch_processes(root: &mut Table) -> Result<()> {
    let processes = match root.get("processes") {
        None | Some(Value::Object(_)) => return Ok(()),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|item| {
                let name = display_value(item.get("name")?);
                let command = item.get("command").map(display_value).unwrap_or_default();
                Some((name, Value::String(command)))
            })
            .collect::<Table>(),
        Some(other) => {
            return Err(PatchError::Processes {
                found: type_name(other),
            })
        }
    };

    // INVARIANT: Empty process list means no process groups at all.
    if processes.is_empty() {
        root.remove("processes");
    } else {
        root.insert("processes".into(), Value::Object(processes));
    }

    Ok(())
}

fn patch_experimental(root: &mut Table) -> Result<()> {
    let Some(raw) = root.remove("experimental") else {
        return Ok(());
    };

    let mut experimental = match raw {
        Value::Object(experimental) => experimental,
        other => {
            return Err(PatchError::Experimental {
                found: type_name(&other),
            })
        }
    };

    for field in ["cmd", "entrypoint", "exec"] {
        normalize_string_list(&mut experimental, field)?;
    }

    if let Some(value) = experimental.remove("kill_timeout") {
        if !root.contains_key("kill_timeout") {
            if let Some(timeout) = cast_duration("kill_timeout", &value, DurationUnit::Seconds)? {
                root.insert("kill_timeout".into(), timeout);
            }
        }
    }

    let mut metrics = Table::new();
    for (field, key) in [("metrics_port", "port"), ("metrics_path", "path")] {
        if let Some(value) = experimental.remove(field) {
            metrics.insert(key.into(), value);
        }
    }
    if !metrics.is_empty() && !root.contains_key("metrics") {
        root.insert("metrics".into(), Value::Object(metrics));
    }

    if !experimental.is_empty() {
        root.insert("experimental".into(), Value::Object(experimental));
    }

    Ok(())
}

fn patch_compute(root: &mut Table) -> Result<()> {
    let mut compute = Vec::new();
    for key in ["compute", "computes", "vm"] {
        if let Some(raw) = root.remove(key) {
            compute.extend(ensure_array_of_tables(key, raw)?);
        }
    }

    for section in compute.iter_mut() {
        if let Some(memory) = section.get("memory") {
            let memory = display_value(memory);
            section.insert("memory".into(), Value::String(memory));
        }
        normalize_string_list(section, "processes")?;
    }

    insert_tables(root, "vm", compute);
    Ok(())
}

fn patch_mounts(root: &mut Table) -> Result<()> {
    let mut mounts = Vec::new();
    for key in ["mount", "mounts"] {
        if let Some(raw) = root.remove(key) {
            mounts.extend(ensure_array_of_tables(key, raw)?);
        }
    }

    for mount in mounts.iter_mut() {
        if let Some(size) = mount.get("initial_size") {
            let size = display_value(size);
            mount.insert("initial_size".into(), Value::String(size));
        }
        normalize_string_list(mount, "processes")?;
    }

    insert_tables(root, "mounts", mounts);
    Ok(())
}

fn patch_metrics(root: &mut Table) -> Result<()> {
    let mut metrics = Vec::new();
    for key in ["metric", "metrics"] {
        if let Some(raw) = root.remove(key) {
            metrics.extend(ensure_array_of_tables(key, raw)?);
        }
    }

    if metrics.len() > 1 {
        return Err(PatchError::Metrics {
            count: metrics.len(),
        });
    }

    if let Some(mut metrics) = metrics.pop() {
        coerce_int_field(&mut metrics, "port")?;
        root.insert("metrics".into(), Value::Object(metrics));
    }

    Ok(())
}

fn patch_restart(root: &mut Table) -> Result<()> {
    let Some(raw) = root.remove("restart") else {
        return Ok(());
    };

    let mut restarts = ensure_array_of_tables("restart", raw)?;
    for restart in restarts.iter_mut() {
        coerce_int_field(restart, "max_retries")?;
        normalize_string_list(restart, "processes")?;
    }

    insert_tables(root, "restart", restarts);
    Ok(())
}

fn patch_top_fields(root: &mut Table) -> Result<()> {
    let Some(raw) = root.remove("kill_timeout") else {
        return Ok(());
    };

    if let Some(timeout) = cast_duration("kill_timeout", &raw, DurationUnit::Seconds)? {
        root.insert("kill_timeout".into(), timeout);
    }

    Ok(())
}

fn patch_build(root: &mut Table) -> Result<()> {
    let Some(raw) = root.remove("build") else {
        return Ok(());
    };

    let mut build = match raw {
        Value::Object(build) => build,
        other => {
            return Err(PatchError::Build {
                found: type_name(&other),
            })
        }
    };

    if let Some(target) = build.remove("build_target") {
        build.entry("build-target").or_insert(target);
    }

    if let Some(Value::Object(args)) = build.get_mut("args") {
        for value in args.values_mut() {
            *value = Value::String(display_value(value));
        }
    }

    if !build.is_empty() {
        root.insert("build".into(), Value::Object(build));
    }

    Ok(())
}

fn patch_services(root: &mut Table) -> Result<()> {
    let Some(raw) = root.remove("services") else {
        return Ok(());
    };

    let mut services = Vec::new();
    for mut service in ensure_array_of_tables("services", raw)? {
        patch_service(&mut service)?;
        if !service.is_empty() {
            services.push(service);
        }
    }

    insert_tables(root, "services", services);
    Ok(())
}

fn patch_http_service(root: &mut Table) -> Result<()> {
    let service = match root.get_mut("http_service") {
        None => return Ok(()),
        Some(Value::Object(service)) => service,
        Some(other) => {
            return Err(PatchError::ArrayOfTables {
                section: "http_service",
                found: type_name(other),
            })
        }
    };

    normalize_string_list(service, "processes")?;
    patch_concurrency(service)?;
    coerce_int_field(service, "internal_port")?;
    patch_service_checks(service, "checks")?;

    Ok(())
}

fn patch_service(service: &mut Table) -> Result<()> {
    normalize_string_list(service, "processes")?;
    patch_concurrency(service)?;
    coerce_int_field(service, "internal_port")?;

    if let Some(raw) = service.remove("ports") {
        let mut ports = ensure_array_of_tables("ports", raw)?;
        for port in ports.iter_mut() {
            for field in ["port", "start_port", "end_port"] {
                coerce_int_field(port, field)?;
            }
        }
        insert_tables(service, "ports", ports);
    }

    for field in ["tcp_checks", "http_checks"] {
        patch_service_checks(service, field)?;
    }

    Ok(())
}

fn patch_concurrency(service: &mut Table) -> Result<()> {
    let concurrency = match service.get("concurrency") {
        None | Some(Value::Object(_)) => return Ok(()),
        Some(Value::String(limits)) => parse_concurrency(limits)?,
        Some(other) => {
            return Err(PatchError::Concurrency {
                value: display_value(other),
            })
        }
    };

    service.insert("concurrency".into(), concurrency);
    Ok(())
}

fn parse_concurrency(limits: &str) -> Result<Value> {
    let invalid = || PatchError::Concurrency {
        value: limits.to_string(),
    };

    // INVARIANT: Legacy limits are written as "soft,hard".
    let (soft, hard) = limits.split_once(',').ok_or_else(invalid)?;
    let soft_limit = soft.trim().parse::<u32>().map_err(|_| invalid())?;
    let hard_limit = hard.trim().parse::<u32>().map_err(|_| invalid())?;

    Ok(serde_json::json!({
        "type": "requests",
        "hard_limit": hard_limit,
        "soft_limit": soft_limit,
    }))
}

fn patch_service_checks(service: &mut Table, field: &'static str) -> Result<()> {
    let Some(raw) = service.remove(field) else {
        return Ok(());
    };

    let mut checks = ensure_array_of_tables(field, raw)?;
    for check in checks.iter_mut() {
        patch_check(check)?;
    }

    insert_tables(service, field, checks);
    Ok(())
}

fn patch_toplevel_checks(root: &mut Table) -> Result<()> {
    let Some(raw) = root.remove("checks") else {
        return Ok(());
    };

    let mut checks = Table::new();
    match raw {
        Value::Object(table) => {
            if let Some(check) = table.values().find(|check| !check.is_object()) {
                return Err(PatchError::Checks {
                    found: type_name(check),
                });
            }
            checks = table;
        }
        Value::Array(items) => {
            for item in items {
                let mut check = match item {
                    Value::Object(check) => check,
                    other => {
                        return Err(PatchError::Checks {
                            found: type_name(&other),
                        })
                    }
                };
                let Some(Value::String(name)) = check.remove("name") else {
                    return Err(PatchError::CheckName);
                };
                checks.insert(name, Value::Object(check));
            }
        }
        other => {
            return Err(PatchError::Checks {
                found: type_name(&other),
            })
        }
    }

    for check in checks.values_mut() {
        if let Value::Object(check) = check {
            normalize_string_list(check, "processes")?;
            coerce_int_field(check, "port")?;
            patch_check(check)?;
        }
    }

    if !checks.is_empty() {
        root.insert("checks".into(), Value::Object(checks));
    }

    Ok(())
}

fn patch_check(check: &mut Table) -> Result<()> {
    for field in ["interval", "timeout", "grace_period"] {
        if let Some(raw) = check.remove(field) {
            if let Some(duration) = cast_duration(field, &raw, DurationUnit::Millis)? {
                check.insert(field.into(), duration);
            }
        }
    }

    if let Some(raw) = check.remove("headers") {
        let headers = coerce_headers(raw)?;
        if !headers.is_empty() {
            check.insert("headers".into(), Value::Object(headers));
        }
    }

    Ok(())
}

fn coerce_headers(raw: Value) -> Result<Table> {
    match raw {
        Value::Object(table) => Ok(table
            .into_iter()
            .map(|(name, value)| (name, Value::String(display_value(&value))))
            .collect()),
        Value::Array(items) => {
            let mut headers = Table::new();
            for item in items {
                let Some(name) = item.get("name") else {
                    return Err(PatchError::Headers {
                        found: type_name(&item),
                    });
                };
                let value = item.get("value").map(display_value).unwrap_or_default();
                headers.insert(display_value(name), Value::String(value));
            }
            Ok(headers)
        }
        other => Err(PatchError::Headers {
            found: type_name(&other),
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum DurationUnit {
    Millis,
    Seconds,
}

/// Convert duration-ish value into duration string.
///
/// Empty strings, and values of unrelated type, are dropped by returning
/// `None`.
fn cast_duration(field: &'static str, value: &Value, unit: DurationUnit) -> Result<Option<Value>> {
    let invalid = || PatchError::Duration {
        field,
        value: display_value(value),
    };

    let number = match value {
        Value::String(text) if text.trim().is_empty() => return Ok(None),
        // INVARIANT: Bare numeric strings use the same unit as numbers.
        Value::String(text) => match text.trim().parse::<serde_json::Number>() {
            Ok(number) => number,
            Err(_) => return Ok(Some(Value::String(text.clone()))),
        },
        Value::Number(number) => number.clone(),
        _ => return Ok(None),
    };

    let duration = match (number.as_u64(), number.as_f64()) {
        (Some(whole), _) => match unit {
            DurationUnit::Millis => Duration::from_millis(whole),
            DurationUnit::Seconds => Duration::from_secs(whole),
        },
        (None, Some(fraction)) if fraction >= 0.0 && fraction.is_finite() => {
            let millis = match unit {
                DurationUnit::Millis => fraction,
                DurationUnit::Seconds => fraction * 1000.0,
            };
            Duration::from_millis(millis as u64)
        }
        _ => return Err(invalid()),
    };

    Ok(Some(Value::String(duration.to_string())))
}

fn coerce_int_field(table: &mut Table, field: &'static str) -> Result<()> {
    let Some(raw) = table.get(field) else {
        return Ok(());
    };

    let invalid = || PatchError::Integer {
        field,
        value: display_value(raw),
    };

    let number = match raw {
        Value::Number(number) if number.is_i64() || number.is_u64() => return Ok(()),
        Value::Number(number) => number.as_f64().map(|float| float as i64).ok_or_else(invalid)?,
        Value::String(text) => text.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };

    table.insert(field.into(), Value::from(number));
    Ok(())
}

/// Normalize string-or-list field into a list of strings.
fn normalize_string_list(table: &mut Table, field: &'static str) -> Result<()> {
    let Some(raw) = table.remove(field) else {
        return Ok(());
    };

    let list = match raw {
        Value::Null => return Ok(()),
        Value::String(item) => vec![Value::String(item)],
        Value::Array(items) => {
            if let Some(item) = items.iter().find(|item| !item.is_string()) {
                return Err(PatchError::StringList {
                    field,
                    found: type_name(item),
                });
            }
            items
        }
        other => {
            return Err(PatchError::StringList {
                field,
                found: type_name(&other),
            })
        }
    };

    table.insert(field.into(), Value::Array(list));
    Ok(())
}

fn ensure_array_of_tables(section: &'static str, raw: Value) -> Result<Vec<Table>> {
    match raw {
        Value::Object(table) => Ok(vec![table]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(table) => Ok(table),
                other => Err(PatchError::ArrayOfTables {
                    section,
                    found: type_name(&other),
                }),
            })
            .collect(),
        other => Err(PatchError::ArrayOfTables {
            section,
            found: type_name(&other),
        }),
    }
}

fn insert_tables(table: &mut Table, key: &str, tables: Vec<Table>) {
    if !tables.is_empty() {
        let tables = tables.into_iter().map(Value::Object).collect();
        table.insert(key.into(), Value::Array(tables));
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "table",
    }
}

/// Document normalization error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    /// Document root is not a table.
    #[error("document root must be a table, found {found}")]
    NotATable { found: &'static str },

    /// Environment section of unknown shape.
    #[error("do not know how to process 'env' section of type: {found}")]
    Env { found: &'static str },

    /// Processes section of unknown shape.
    #[error("unknown processes type: {found}")]
    Processes { found: &'static str },

    /// Experimental section of unknown shape.
    #[error("experimental section of unknown type: {found}")]
    Experimental { found: &'static str },

    /// Build section of unknown shape.
    #[error("build section of unknown type: {found}")]
    Build { found: &'static str },

    /// Section expected to be a table, or a list of tables.
    #[error("error processing {section}: unknown type '{found}'")]
    ArrayOfTables {
        section: &'static str,
        found: &'static str,
    },

    /// Field expected to be a string, or a list of strings.
    #[error("could not cast {found} to list of strings on {field}")]
    StringList {
        field: &'static str,
        found: &'static str,
    },

    /// Legacy concurrency string could not be understood.
    #[error("unknown value '{value}' for concurrency limits")]
    Concurrency { value: String },

    /// Value could not be converted into an integer.
    #[error("can not convert '{value}' to integer on {field}")]
    Integer { field: &'static str, value: String },

    /// Value could not be converted into a duration.
    #[error("can not convert '{value}' to duration on {field}")]
    Duration { field: &'static str, value: String },

    /// Toplevel checks of unknown shape.
    #[error("'checks' section of unknown type: {found}")]
    Checks { found: &'static str },

    /// Toplevel check listed without a name.
    #[error("check item name not a string")]
    CheckName,

    /// Check headers of unknown shape.
    #[error("unsupported headers format: {found}")]
    Headers { found: &'static str },

    /// More than one metrics section.
    #[error("expected at most one metrics section, found {count}")]
    Metrics { count: usize },

    /// Patched document does not fit the typed layout.
    #[error("failed to bind patched document: {0}")]
    Bind(String),
}

/// Friendly result alias :3
type Result<T, E = PatchError> = std::result::Result<T, E>;
