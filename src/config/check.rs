// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Toplevel health check layout.

use crate::duration::Duration;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Health check declared outside of any service.
///
/// A toplevel check without a port inherits the internal port of the
/// `[http_service]` section when compiled.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ToplevelCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Raw check type. See [`ToplevelCheck::kind`] for the typed view.
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
    pub http_tls_skip_verify: Option<bool>,

    #[serde(rename = "tls_server_name", default, skip_serializing_if = "Option::is_none")]
    pub http_tls_server_name: Option<String>,

    #[serde(rename = "headers", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<String>,
}

impl ToplevelCheck {
    /// Typed check kind.
    ///
    /// Returns `None` if the type is missing, or is anything besides exactly
    /// "http" or "tcp".
    pub fn kind(&self) -> Option<CheckKind> {
        self.kind.as_deref().and_then(|kind| CheckKind::try_from(kind).ok())
    }
}

/// Kind of health check.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CheckKind {
    Http,
    Tcp,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Http => "http",
            CheckKind::Tcp => "tcp",
        }
    }
}

impl TryFrom<&str> for CheckKind {
    type Error = UnknownCheckKind;

    fn try_from(kind: &str) -> Result<Self, Self::Error> {
        match kind {
            "http" => Ok(CheckKind::Http),
            "tcp" => Ok(CheckKind::Tcp),
            _ => Err(UnknownCheckKind(kind.to_string())),
        }
    }
}

impl Display for CheckKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Check type is neither "http" nor "tcp".
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown check type {0:?}")]
pub struct UnknownCheckKind(pub String);
