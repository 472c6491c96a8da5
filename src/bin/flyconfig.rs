// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use flyconfig::{load_config, resolve_config_path, strict_validate, Config, MachineConfig};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::{fs::read_to_string, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  flyconfig [options] <flyconfig-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Validate(opts) => run_validate(opts),
            Command::Groups(opts) => run_groups(opts),
            Command::MachineConfig(opts) => run_machine_config(opts),
            Command::ReleaseConfig(opts) => run_release_config(opts),
            Command::ConsoleConfig(opts) => run_console_config(opts),
            Command::StrictCheck(opts) => run_strict_check(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Validate every process group of application config.
    #[command(override_usage = "flyconfig validate [options]")]
    Validate(ConfigOptions),

    /// List process groups of application config.
    #[command(override_usage = "flyconfig groups [options]")]
    Groups(ConfigOptions),

    /// Compile machine config of a process group.
    #[command(override_usage = "flyconfig machine-config [options]")]
    MachineConfig(MachineConfigOptions),

    /// Compile machine config of the release command.
    #[command(override_usage = "flyconfig release-config [options]")]
    ReleaseConfig(ConfigOptions),

    /// Compile machine config of an ephemeral console.
    #[command(override_usage = "flyconfig console-config [options]")]
    ConsoleConfig(ConfigOptions),

    /// Report unknown sections and keys of application config.
    #[command(override_usage = "flyconfig strict-check [options]")]
    StrictCheck(ConfigOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ConfigOptions {
    /// Path to application config, or directory holding a fly.toml.
    #[arg(short, long, value_name = "path")]
    pub config: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct MachineConfigOptions {
    #[command(flatten)]
    pub config: ConfigOptions,

    /// Process group to compile, default group if not set.
    #[arg(short, long, value_name = "group")]
    pub group: Option<String>,

    /// JSON machine config of a deployed machine to start from.
    #[arg(short, long, value_name = "path")]
    pub previous: Option<PathBuf>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn open_config(opts: &ConfigOptions) -> Result<Config> {
    let path = resolve_config_path(opts.config.as_deref().unwrap_or_default())?;
    let config = load_config(&path)?.into_config()?;
    info!("loaded application config {path:?}");

    Ok(config)
}

fn print_json(config: &MachineConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn run_validate(opts: ConfigOptions) -> Result<()> {
    let config = open_config(&opts)?;
    config.validate()?;
    info!("application config of {:?} is valid", config.app_name);

    Ok(())
}

fn run_groups(opts: ConfigOptions) -> Result<()> {
    let config = open_config(&opts)?;
    let default = config.default_process_name();
    for name in config.process_names() {
        if name == default {
            println!("{name} (default)");
        } else {
            println!("{name}");
        }
    }

    Ok(())
}

fn run_machine_config(opts: MachineConfigOptions) -> Result<()> {
    let config = open_config(&opts.config)?;
    let previous = match opts.previous {
        Some(path) => {
            let data = read_to_string(&path).with_context(|| format!("failed to read {path:?}"))?;
            Some(serde_json::from_str::<MachineConfig>(&data)?)
        }
        None => None,
    };

    let group = opts.group.unwrap_or_default();
    print_json(&config.to_machine_config(&group, previous.as_ref())?)
}

fn run_release_config(opts: ConfigOptions) -> Result<()> {
    let config = open_config(&opts)?;
    print_json(&config.to_release_machine_config()?)
}

fn run_console_config(opts: ConfigOptions) -> Result<()> {
    let config = open_config(&opts)?;
    print_json(&config.to_console_machine_config())
}

fn run_strict_check(opts: ConfigOptions) -> Result<()> {
    let path = resolve_config_path(opts.config.as_deref().unwrap_or_default())?;
    let document = load_config(&path)?;
    let report = strict_validate(document.config().raw_definition());
    if report.is_empty() {
        info!("no unrecognized sections or keys in {path:?}");
        return Ok(());
    }

    for line in report.to_string().lines() {
        warn!("{line}");
    }
    bail!("application config {path:?} has unrecognized sections or keys");
}
