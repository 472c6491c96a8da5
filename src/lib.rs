// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Application manifest compiler.
//!
//! Turn an application manifest, usually named "fly.toml", into the runtime
//! configuration of the machines that run the application.
//!
//! # Pipeline
//!
//! 1. Decode TOML or JSON text into an untyped document.
//! 2. [Patch](patch) historical shapes of the document into the current one.
//! 3. Bind patched document to [`Config`]. A document that cannot be
//!    patched degrades into a best-effort [`Document::Degraded`].
//! 4. [Flatten](Config::flatten) configuration to one process group.
//! 5. [Compile](Config::to_machine_config) flattened configuration into a
//!    [`MachineConfig`].
//!
//! Everything after decoding is pure, and never touches the file system.

pub mod compile;
pub mod config;
pub mod document;
pub mod duration;
pub mod machine;
pub mod patch;
pub mod path;
pub mod process;
pub mod service;
pub mod setters;
pub mod validate;

#[doc(inline)]
pub use crate::{
    config::{Config, ConfigError},
    document::{load_config, Document},
    machine::MachineConfig,
    patch::{patch_document, PatchError},
    path::resolve_config_path,
    process::ProcessConfig,
    service::{CollectingDiagnostics, Diagnostic, Diagnostics, TracingDiagnostics},
    validate::{strict_validate, StrictReport, ValidationError},
};
