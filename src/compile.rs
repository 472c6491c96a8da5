// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Machine configuration compiler.
//!
//! Compile an application manifest into the runtime configuration of one
//! machine. The manifest is always flattened to the requested process group
//! first, so callers hand over the full manifest.
//!
//! # Merge Semantics
//!
//! Compilation may start from the configuration of a machine that is already
//! deployed. Only the fields that the manifest manages are overwritten, i.e.,
//! init command, metadata keys of the platform, services, checks, env,
//! statics, mounts, metrics, stop config, and restart policy. The guest is
//! only replaced when a compute section applies to the group. Everything
//! else, like schedule, image, or foreign metadata keys, is left untouched.

use crate::{
    config::{Compute, Config, ConfigError, Restart, Service},
    machine::{
        DnsConfig, MachineConfig, MachineGuest, MachineInit, MachineRestart,
        MachineRestartPolicy, MachineService, Static, StopConfig, DEFAULT_GPU_VM_SIZE,
        DEFAULT_VM_SIZE, METADATA_FLYCTL_VERSION, METADATA_PLATFORM_VERSION,
        METADATA_PROCESS_GROUP, PLATFORM_VERSION_V2, PROCESS_GROUP_CONSOLE,
        PROCESS_GROUP_RELEASE_COMMAND,
    },
    process::compile_mounts,
};

use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Version of this crate recorded in machine metadata.
pub const FLYCTL_VERSION: &str = env!("CARGO_PKG_VERSION");

const ENV_PROCESS_GROUP: &str = "FLY_PROCESS_GROUP";
const ENV_PRIMARY_REGION: &str = "PRIMARY_REGION";
const ENV_RELEASE_COMMAND: &str = "RELEASE_COMMAND";

impl Config {
    /// Compile machine configuration for a process group.
    ///
    /// An empty group name selects the default group. When `previous` is
    /// given, compilation starts from a copy of it. See the
    /// [module documentation](crate::compile) for what survives.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::AmbiguousHttpService`] if unscoped http service
    ///   is declared alongside more than one process group.
    /// - Return [`ConfigError::NotMachinesPlatform`] if configuration came
    ///   out of a degraded parse.
    /// - Return [`ConfigError::ShellSplit`] if command of group has
    ///   unbalanced quotes.
    /// - Return [`ConfigError::InvalidCheckType`] or
    ///   [`ConfigError::CheckWithoutPort`] if a toplevel check can not be
    ///   compiled.
    /// - Return [`ConfigError::MountCollision`] if more than one mount
    ///   resolves to the group.
    /// - Return [`ConfigError::ConcurrencyLimits`] if a service has a soft
    ///   limit above its hard limit.
    /// - Return compute or restart errors if those sections are invalid.
    #[instrument(skip(self, previous), level = "debug")]
    pub fn to_machine_config(
        &self,
        group_name: &str,
        previous: Option<&MachineConfig>,
    ) -> Result<MachineConfig> {
        self.ensure_http_service_scope()?;
        let flat = self.flatten(group_name)?;
        flat.update_machine_config(previous)
    }

    /// Compile configuration of the one-shot release command machine.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingReleaseCommand`] if no release command
    ///   is set.
    /// - Return [`ConfigError::ReleaseCommandSplit`] if release command has
    ///   unbalanced quotes.
    #[instrument(skip(self), level = "debug")]
    pub fn to_release_machine_config(&self) -> Result<MachineConfig> {
        let command = self
            .deploy
            .as_ref()
            .map(|deploy| deploy.release_command.as_str())
            .filter(|command| !command.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingReleaseCommand {
                app_name: self.app_name.clone(),
            })?;
        let cmd = shlex::split(command).ok_or_else(|| ConfigError::ReleaseCommandSplit {
            command: command.to_string(),
        })?;
        info!("compile release command machine for app {:?}", self.app_name);

        let mut config = self.one_shot_machine_config(PROCESS_GROUP_RELEASE_COMMAND);
        config.init = MachineInit {
            cmd: Some(cmd),
            entrypoint: self.experimental_entrypoint(),
            ..Default::default()
        };
        if let Some(env) = config.env.as_mut() {
            env.insert(ENV_RELEASE_COMMAND.into(), "1".into());
        }
        config.stop_config = self.stop_config();

        Ok(config)
    }

    /// Compile configuration of an ephemeral console machine.
    ///
    /// The machine idles forever so that a shell can be attached to it.
    pub fn to_console_machine_config(&self) -> MachineConfig {
        debug!("compile console machine for app {:?}", self.app_name);
        let mut config = self.one_shot_machine_config(PROCESS_GROUP_CONSOLE);
        config.init.exec = Some(vec!["/bin/sleep".into(), "inf".into()]);
        config
    }

    /// Overwrite managed fields of `previous` with flattened configuration.
    fn update_machine_config(&self, previous: Option<&MachineConfig>) -> Result<MachineConfig> {
        // INVARIANT: Flattened configuration only knows the group it was flattened for.
        let group = self.default_process_name();
        debug!("compile machine config for process group {group:?}");

        let mut config = previous.cloned().unwrap_or_default();
        config.metrics = self.metrics.clone();

        let mut cmd = self.init_cmd(&group)?;
        match &self.experimental {
            Some(experimental) => {
                if cmd.is_none() {
                    cmd = non_empty(&experimental.cmd);
                }
                config.init.entrypoint = non_empty(&experimental.entrypoint);
                config.init.exec = non_empty(&experimental.exec);
            }
            None => {
                config.init.entrypoint = None;
                config.init.exec = None;
            }
        }
        config.init.cmd = cmd;

        let metadata = config.metadata.get_or_insert_with(BTreeMap::new);
        metadata.extend(platform_metadata(&group));

        let services = self
            .all_services()
            .iter()
            .map(|service| compile_service(&group, service))
            .collect::<Result<Vec<_>>>()?;
        config.services = (!services.is_empty()).then_some(services);

        let checks = self
            .checks
            .iter()
            .map(|(name, check)| {
                let check = self.compile_toplevel_check(name, check, &group)?;
                Ok((name.clone(), check))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        config.checks = (!checks.is_empty()).then_some(checks);

        config.env = Some(self.machine_env(&group));

        let statics = self
            .statics
            .iter()
            .map(|mapping| Static {
                guest_path: mapping.guest_path.clone(),
                url_prefix: mapping.url_prefix.clone(),
            })
            .collect::<Vec<_>>();
        config.statics = (!statics.is_empty()).then_some(statics);

        let mounts = compile_mounts(&group, &self.mounts.iter().collect::<Vec<_>>())?;
        config.mounts = (!mounts.is_empty()).then_some(mounts);

        config.stop_config = self.stop_config();

        if let Some(guest) = self.machine_guest(&group)? {
            config.guest = Some(guest);
        }

        config.restart = self.machine_restart(&group)?;

        Ok(config)
    }

    fn one_shot_machine_config(&self, group: &str) -> MachineConfig {
        MachineConfig {
            restart: Some(MachineRestart {
                policy: Some(MachineRestartPolicy::No),
                max_retries: 0,
            }),
            auto_destroy: true,
            dns: Some(DnsConfig {
                skip_registration: true,
                ..Default::default()
            }),
            metadata: Some(platform_metadata(group)),
            env: Some(self.machine_env(group)),
            ..Default::default()
        }
    }

    /// Env of the manifest plus what the platform injects.
    ///
    /// Primary region always wins over an env entry of the same name.
    fn machine_env(&self, group: &str) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert(ENV_PROCESS_GROUP.into(), group.into());
        if !self.primary_region.is_empty() {
            env.insert(ENV_PRIMARY_REGION.into(), self.primary_region.clone());
        }

        env
    }

    fn experimental_entrypoint(&self) -> Option<Vec<String>> {
        self.experimental
            .as_ref()
            .and_then(|experimental| non_empty(&experimental.entrypoint))
    }

    fn stop_config(&self) -> Option<StopConfig> {
        if self.kill_signal.is_none() && self.kill_timeout.is_none() {
            return None;
        }

        Some(StopConfig {
            timeout: self.kill_timeout,
            signal: self.kill_signal.clone(),
        })
    }

    /// Resolve guest of flattened configuration.
    ///
    /// Returns `None` without a compute section, so that sizes set outside
    /// of the manifest survive.
    fn machine_guest(&self, group: &str) -> Result<Option<MachineGuest>> {
        match self.compute.as_slice() {
            [] => Ok(None),
            [compute] => compute_to_guest(group, compute).map(Some),
            many => Err(ConfigError::TooManyComputes {
                process_group: group.to_string(),
                count: many.len(),
            }),
        }
    }

    fn machine_restart(&self, group: &str) -> Result<Option<MachineRestart>> {
        match self.restart.as_slice() {
            [] => Ok(None),
            [restart] => Ok(Some(MachineRestart {
                policy: Some(parse_restart_policy(group, restart)?),
                max_retries: restart.max_retries,
            })),
            many => Err(ConfigError::TooManyRestarts {
                process_group: group.to_string(),
                count: many.len(),
            }),
        }
    }
}

/// Compile compute section into guest shape.
///
/// The size preset defaults to the GPU preset when a GPU kind is requested.
/// Explicit memory, CPU count, CPU kind, and GPU kind override the preset.
///
/// # Errors
///
/// - Return [`ConfigError::InvalidVmSize`] if size preset is unknown.
/// - Return [`ConfigError::InvalidMemory`] if memory is zero or malformed.
pub fn compute_to_guest(group: &str, compute: &Compute) -> Result<MachineGuest> {
    let size = match (&compute.size, &compute.gpu_kind) {
        (Some(size), _) if !size.is_empty() => size.as_str(),
        (_, Some(gpu)) if !gpu.is_empty() => DEFAULT_GPU_VM_SIZE,
        _ => DEFAULT_VM_SIZE,
    };
    let mut guest = MachineGuest::preset(size).ok_or_else(|| ConfigError::InvalidVmSize {
        size: size.to_string(),
    })?;

    if let Some(memory) = compute.memory.as_deref().filter(|memory| !memory.is_empty()) {
        guest.memory_mb = parse_memory_mb(memory).ok_or_else(|| ConfigError::InvalidMemory {
            process_group: group.to_string(),
            value: memory.to_string(),
        })?;
    }

    if let Some(cpus) = compute.cpus.filter(|cpus| *cpus > 0) {
        guest.cpus = cpus;
    }

    if let Some(cpu_kind) = compute.cpu_kind.as_ref().filter(|kind| !kind.is_empty()) {
        guest.cpu_kind = cpu_kind.clone();
    }

    if let Some(gpu_kind) = compute.gpu_kind.as_ref().filter(|kind| !kind.is_empty()) {
        guest.gpu_kind = gpu_kind.clone();
    }

    Ok(guest)
}

/// Parse human readable memory size into megabytes.
///
/// Plain numbers are megabytes. Units are binary, so "1gb" is 1024
/// megabytes. Zero is rejected.
pub fn parse_memory_mb(value: &str) -> Option<u32> {
    let value = value.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let number = number.parse::<u64>().ok()?;
    let factor = match unit.trim() {
        "" | "m" | "mb" | "mib" => 1,
        "g" | "gb" | "gib" => 1024,
        _ => return None,
    };

    number
        .checked_mul(factor)
        .and_then(|mb| u32::try_from(mb).ok())
        .filter(|mb| *mb > 0)
}

fn parse_restart_policy(group: &str, restart: &Restart) -> Result<MachineRestartPolicy> {
    match restart.policy.as_str() {
        "always" => Ok(MachineRestartPolicy::Always),
        "on-failure" => Ok(MachineRestartPolicy::OnFailure),
        "never" => Ok(MachineRestartPolicy::No),
        policy => Err(ConfigError::InvalidRestartPolicy {
            process_group: group.to_string(),
            policy: policy.to_string(),
        }),
    }
}

pub(crate) fn compile_service(group: &str, service: &Service) -> Result<MachineService> {
    if let Some(limits) = &service.concurrency {
        // INVARIANT: A hard limit of zero means no hard limit at all.
        if limits.hard_limit > 0 && limits.soft_limit > limits.hard_limit {
            return Err(ConfigError::ConcurrencyLimits {
                process_group: group.to_string(),
                internal_port: service.internal_port,
                soft_limit: limits.soft_limit,
                hard_limit: limits.hard_limit,
            });
        }
    }

    Ok(service.to_machine_service())
}

fn platform_metadata(group: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (METADATA_FLYCTL_VERSION.into(), FLYCTL_VERSION.into()),
        (METADATA_PLATFORM_VERSION.into(), PLATFORM_VERSION_V2.into()),
        (METADATA_PROCESS_GROUP.into(), group.into()),
    ])
}

fn non_empty(args: &[String]) -> Option<Vec<String>> {
    (!args.is_empty()).then(|| args.to_vec())
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
