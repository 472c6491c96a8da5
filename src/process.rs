// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Process group resolution.
//!
//! One application manifest may declare several __process groups__ through
//! its `[processes]` table. Services, checks, mounts, and friends opt into
//! groups through their own `processes` list. __Flattening__ reduces a
//! manifest to the declarations relevant to exactly one group, which is what
//! the [compiler](crate::compile) works with.
//!
//! # Default Group
//!
//! The default group is "app" if the manifest declares it, or declares no
//! groups at all. Otherwise it is the lexicographically first declared group.
//! Sections with an empty `processes` list only apply to the default group,
//! except for `[[vm]]` and `[[restart]]` sections, which apply to every
//! group unless a more specific section exists.

use crate::{
    config::{Compute, Config, ConfigError, Mount, PlatformVersion, Restart},
    machine::{MachineCheck, MachineMount, MachineService, PROCESS_GROUP_APP},
};

use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Runtime settings of one process group.
#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct ProcessConfig {
    /// Command of the group, `None` means image default.
    pub cmd: Option<Vec<String>>,
    pub services: Vec<MachineService>,
    pub checks: BTreeMap<String, MachineCheck>,
    pub mounts: Vec<MachineMount>,
}

impl Config {
    /// List declared process group names in lexicographical order.
    ///
    /// Falls back to the default group name, which is usually "app", when no
    /// groups are declared.
    pub fn process_names(&self) -> Vec<String> {
        let mut names = self.processes.keys().cloned().collect::<Vec<_>>();

        // INVARIANT: Degraded configs only know their groups through the raw definition.
        if names.is_empty() && self.platform_version == PlatformVersion::Nomad {
            if let Some(processes) = self
                .raw_definition
                .get("processes")
                .and_then(serde_json::Value::as_object)
            {
                names = processes.keys().cloned().collect();
            }
        }

        names.sort();
        if names.is_empty() {
            names.push(self.default_group_override().to_string());
        }

        names
    }

    /// Determine default process group name.
    pub fn default_process_name(&self) -> String {
        let preferred = self.default_group_override();
        let mut names = self.process_names();
        if names.iter().any(|name| name == preferred) {
            return preferred.to_string();
        }

        names.remove(0)
    }

    /// Format process group names like `['web', 'worker']`.
    pub fn format_process_names(&self) -> String {
        let names = self
            .process_names()
            .iter()
            .map(|name| format!("'{name}'"))
            .collect::<Vec<_>>();
        format!("[{}]", names.join(", "))
    }

    fn default_group_override(&self) -> &str {
        if self.default_group_name.is_empty() {
            PROCESS_GROUP_APP
        } else {
            self.default_group_name.as_str()
        }
    }

    /// Reduce configuration to declarations relevant to one process group.
    ///
    /// An empty group name selects the default group. The receiver is left
    /// untouched. Every kept section is rescoped to the resolved group, so
    /// the result flattens to itself.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::NotMachinesPlatform`] if configuration came
    ///   out of a degraded parse.
    /// - Return [`ConfigError::TooManyComputes`] or
    ///   [`ConfigError::TooManyRestarts`] if more than one equally specific
    ///   section applies to the group.
    #[instrument(skip(self), level = "debug")]
    pub fn flatten(&self, group_name: &str) -> Result<Config> {
        self.ensure_machines_platform()?;

        let scope = GroupScope::new(self, group_name);
        debug!("flatten application config for process group {:?}", scope.group);

        let mut flat = self.clone();
        flat.default_group_name = scope.group.clone();
        flat.processes = self
            .processes
            .get(&scope.group)
            .map(|command| BTreeMap::from([(scope.group.clone(), command.clone())]))
            .unwrap_or_default();

        flat.checks = self
            .checks
            .iter()
            .filter(|(_, check)| scope.matches(&check.processes))
            .map(|(name, check)| {
                let mut check = check.clone();
                check.processes = scope.rescoped();
                (name.clone(), check)
            })
            .collect();

        flat.http_service = self
            .http_service
            .as_ref()
            .filter(|service| scope.matches(&service.processes))
            .map(|service| {
                let mut service = service.clone();
                service.processes = scope.rescoped();
                service
            });

        flat.services = self
            .services
            .iter()
            .filter(|service| scope.matches(&service.processes))
            .map(|service| {
                let mut service = service.clone();
                service.processes = scope.rescoped();
                service
            })
            .collect();

        flat.mounts = self
            .mounts
            .iter()
            .filter(|mount| scope.matches(&mount.processes))
            .map(|mount| {
                let mut mount = mount.clone();
                mount.processes = scope.rescoped();
                mount
            })
            .collect();

        flat.compute = most_specific(&self.compute, &scope)
            .map_err(|count| ConfigError::TooManyComputes {
                process_group: scope.group.clone(),
                count,
            })?
            .map(|compute| Compute {
                processes: scope.rescoped(),
                ..compute.clone()
            })
            .into_iter()
            .collect();

        flat.restart = most_specific(&self.restart, &scope)
            .map_err(|count| ConfigError::TooManyRestarts {
                process_group: scope.group.clone(),
                count,
            })?
            .map(|restart| Restart {
                processes: scope.rescoped(),
                ..restart.clone()
            })
            .into_iter()
            .collect();

        Ok(flat)
    }

    /// Split command of a process group into arguments.
    ///
    /// Returns `None` when the group is not declared or has an empty command,
    /// meaning the image default command should be used.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellSplit`] if command has unbalanced quotes.
    pub fn init_cmd(&self, group_name: &str) -> Result<Option<Vec<String>>> {
        let group = if group_name.is_empty() {
            self.default_process_name()
        } else {
            group_name.to_string()
        };

        match self.processes.get(&group) {
            Some(command) if !command.trim().is_empty() => split_command(&group, command).map(Some),
            _ => Ok(None),
        }
    }

    /// Compute runtime settings of every declared process group at once.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::AmbiguousHttpService`] if unscoped http service
    ///   is declared alongside more than one process group.
    /// - Return [`ConfigError::ServiceWithoutProcesses`] if a service has no
    ///   processes set while process groups are declared.
    /// - Return [`ConfigError::UnknownServiceProcess`] if a service is scoped
    ///   to an undeclared process group.
    /// - Return [`ConfigError::MountCollision`] if more than one mount
    ///   resolves to the same process group.
    /// - Return any check or command error of [`Config::to_machine_config`].
    #[instrument(skip(self), level = "debug")]
    pub fn process_configs(&self) -> Result<BTreeMap<String, ProcessConfig>> {
        self.ensure_http_service_scope()?;

        let default = self.default_process_name();
        let declared = self.processes.len();
        let mut configs = BTreeMap::new();

        if declared == 0 {
            configs.insert(default.clone(), ProcessConfig::default());
        }
        for (group, command) in &self.processes {
            let cmd = if command.trim().is_empty() {
                None
            } else {
                Some(split_command(group, command)?)
            };
            configs.insert(
                group.clone(),
                ProcessConfig {
                    cmd,
                    ..Default::default()
                },
            );
        }

        for service in self.all_services() {
            if service.processes.is_empty() && declared > 1 {
                return Err(ConfigError::ServiceWithoutProcesses {
                    internal_port: service.internal_port,
                    count: declared,
                });
            }

            let targets = if service.processes.is_empty() {
                vec![default.clone()]
            } else {
                service.processes.clone()
            };

            let machine_service = service.to_machine_service();
            for target in targets {
                let config = configs
                    .get_mut(&target)
                    .ok_or_else(|| ConfigError::UnknownServiceProcess {
                        process_group: target.clone(),
                    })?;
                config.services.push(machine_service.clone());
            }
        }

        for (group, config) in configs.iter_mut() {
            let scope = GroupScope::resolved(group.clone(), default.clone());
            for (name, check) in &self.checks {
                if scope.matches(&check.processes) {
                    let check = self.compile_toplevel_check(name, check, group)?;
                    config.checks.insert(name.clone(), check);
                }
            }

            let mounts = self
                .mounts
                .iter()
                .filter(|mount| scope.matches(&mount.processes))
                .collect::<Vec<_>>();
            config.mounts = compile_mounts(group, &mounts)?;
        }

        Ok(configs)
    }

    /// Refuse unscoped http service in applications with several groups.
    pub(crate) fn ensure_http_service_scope(&self) -> Result<()> {
        match &self.http_service {
            Some(service) if service.processes.is_empty() && self.processes.len() > 1 => {
                Err(ConfigError::AmbiguousHttpService {
                    count: self.processes.len(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Resolved target group of a flatten operation.
struct GroupScope {
    group: String,
    default: String,
}

impl GroupScope {
    fn new(config: &Config, group_name: &str) -> Self {
        let default = config.default_process_name();
        let group = if group_name.is_empty() {
            default.clone()
        } else {
            group_name.to_string()
        };

        Self { group, default }
    }

    fn resolved(group: String, default: String) -> Self {
        Self { group, default }
    }

    /// Check if a section scoped to `processes` applies to target group.
    fn matches(&self, processes: &[String]) -> bool {
        if processes.is_empty() {
            return self.group == self.default;
        }

        processes.iter().any(|name| *name == self.group)
    }

    fn rescoped(&self) -> Vec<String> {
        vec![self.group.clone()]
    }
}

/// Section that applies to every group unless scoped.
trait GroupWide {
    fn processes(&self) -> &[String];
}

impl GroupWide for Compute {
    fn processes(&self) -> &[String] {
        &self.processes
    }
}

impl GroupWide for Restart {
    fn processes(&self) -> &[String] {
        &self.processes
    }
}

/// Pick the most specific section for target group.
///
/// Sections naming the group win over unscoped sections. Returns the number
/// of competing sections as error if more than one section is equally
/// specific.
fn most_specific<'a, T: GroupWide>(
    sections: &'a [T],
    scope: &GroupScope,
) -> std::result::Result<Option<&'a T>, usize> {
    let specific = sections
        .iter()
        .filter(|section| section.processes().contains(&scope.group))
        .collect::<Vec<_>>();
    let candidates = if specific.is_empty() {
        sections
            .iter()
            .filter(|section| section.processes().is_empty())
            .collect::<Vec<_>>()
    } else {
        specific
    };

    match candidates.as_slice() {
        [] => Ok(None),
        [section] => Ok(Some(section)),
        many => Err(many.len()),
    }
}

pub(crate) fn split_command(group: &str, command: &str) -> Result<Vec<String>> {
    shlex::split(command).ok_or_else(|| ConfigError::ShellSplit {
        process_group: group.to_string(),
        command: command.to_string(),
    })
}

pub(crate) fn compile_mounts(group: &str, mounts: &[&Mount]) -> Result<Vec<MachineMount>> {
    if mounts.len() > 1 {
        return Err(ConfigError::MountCollision {
            process_group: group.to_string(),
            sources: mounts.iter().map(|mount| mount.source.clone()).collect(),
        });
    }

    Ok(mounts
        .iter()
        .map(|mount| MachineMount {
            path: mount.destination.clone(),
            name: mount.source.clone(),
            ..Default::default()
        })
        .collect())
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpService, Service, ToplevelCheck};
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn multi_group_config() -> Config {
        Config {
            app_name: "hello".into(),
            processes: BTreeMap::from([
                ("web".into(), "run web".into()),
                ("worker".into(), "run worker".into()),
            ]),
            services: vec![Service {
                protocol: "tcp".into(),
                internal_port: 8080,
                processes: vec!["web".into()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test_case(&[], "app"; "no groups")]
    #[test_case(&["worker", "app"], "app"; "app declared")]
    #[test_case(&["worker", "web"], "web"; "first in order")]
    #[test]
    fn resolve_default_process_name(groups: &[&str], expect: &str) {
        let config = Config {
            processes: groups
                .iter()
                .map(|group| (group.to_string(), String::new()))
                .collect(),
            ..Default::default()
        };
        pretty_assertions::assert_eq!(config.default_process_name(), expect);
    }

    #[test]
    fn list_and_format_process_names() {
        let config = multi_group_config();
        assert_eq!(config.process_names(), vec!["web", "worker"]);
        assert_eq!(config.format_process_names(), "['web', 'worker']");
        assert_eq!(Config::new().format_process_names(), "['app']");
    }

    #[test]
    fn flatten_scopes_services() -> anyhow::Result<()> {
        let config = multi_group_config();

        let web = config.flatten("web")?;
        assert_eq!(web.services.len(), 1);
        assert_eq!(web.processes, BTreeMap::from([("web".into(), "run web".into())]));
        assert_eq!(web.default_process_name(), "web");

        let worker = config.flatten("worker")?;
        assert!(worker.services.is_empty());
        assert_eq!(worker.default_process_name(), "worker");

        let default = config.flatten("")?;
        assert_eq!(default, web);

        Ok(())
    }

    #[test]
    fn flatten_leaves_source_untouched() -> anyhow::Result<()> {
        let config = multi_group_config();
        let mut flat = config.flatten("web")?;
        flat.services[0].internal_port = 9999;
        flat.env.insert("LEAK".into(), "yes".into());

        assert_eq!(config.services[0].internal_port, 8080);
        assert!(config.env.is_empty());

        Ok(())
    }

    #[test]
    fn flatten_unscoped_sections_to_default_group() -> anyhow::Result<()> {
        let mut config = multi_group_config();
        config.mounts = vec![Mount {
            source: "data".into(),
            destination: "/data".into(),
            ..Default::default()
        }];
        config.checks = BTreeMap::from([(
            "alive".into(),
            ToplevelCheck {
                kind: Some("tcp".into()),
                port: Some(8080),
                ..Default::default()
            },
        )]);
        config.http_service = Some(HttpService {
            internal_port: 8080,
            processes: vec!["web".into()],
            ..Default::default()
        });

        let web = config.flatten("web")?;
        assert_eq!(web.mounts.len(), 1);
        assert_eq!(web.checks.len(), 1);
        assert!(web.http_service.is_some());

        let worker = config.flatten("worker")?;
        assert!(worker.mounts.is_empty());
        assert!(worker.checks.is_empty());
        assert!(worker.http_service.is_none());

        Ok(())
    }

    #[test]
    fn flatten_picks_most_specific_compute() -> anyhow::Result<()> {
        let mut config = multi_group_config();
        config.compute = vec![
            Compute {
                size: Some("shared-cpu-1x".into()),
                ..Default::default()
            },
            Compute {
                size: Some("performance-2x".into()),
                processes: vec!["worker".into()],
                ..Default::default()
            },
        ];

        let worker = config.flatten("worker")?;
        assert_eq!(worker.compute.len(), 1);
        assert_eq!(worker.compute[0].size.as_deref(), Some("performance-2x"));

        let web = config.flatten("web")?;
        assert_eq!(web.compute[0].size.as_deref(), Some("shared-cpu-1x"));
        assert_eq!(web.compute[0].processes, vec!["web"]);

        config.compute.push(Compute::default());
        assert!(matches!(
            config.flatten("web"),
            Err(ConfigError::TooManyComputes { count: 2, .. })
        ));

        Ok(())
    }

    #[test]
    fn refuse_to_flatten_degraded_config() {
        let config = Config {
            platform_version: PlatformVersion::Nomad,
            ..Default::default()
        };
        assert!(matches!(
            config.flatten("app"),
            Err(ConfigError::NotMachinesPlatform { .. })
        ));
    }

    #[test]
    fn split_init_command() -> anyhow::Result<()> {
        let mut config = multi_group_config();
        config
            .processes
            .insert("quoted".into(), r#"sh -c "echo 'hi there'""#.into());

        assert_eq!(
            config.init_cmd("quoted")?,
            Some(vec!["sh".into(), "-c".into(), "echo 'hi there'".into()])
        );
        assert_eq!(config.init_cmd("missing")?, None);

        config.processes.insert("broken".into(), r#"echo "oops"#.into());
        assert!(matches!(
            config.init_cmd("broken"),
            Err(ConfigError::ShellSplit { process_group, .. }) if process_group == "broken"
        ));

        Ok(())
    }

    #[test]
    fn process_configs_route_services() -> anyhow::Result<()> {
        let configs = multi_group_config().process_configs()?;

        assert_eq!(configs["web"].cmd, Some(vec!["run".into(), "web".into()]));
        assert_eq!(configs["web"].services.len(), 1);
        assert!(configs["worker"].services.is_empty());

        Ok(())
    }

    #[test]
    fn process_configs_refuse_mount_collision() {
        let mut config = multi_group_config();
        config.mounts = vec![
            Mount {
                source: "data".into(),
                destination: "/data".into(),
                processes: vec!["worker".into()],
                ..Default::default()
            },
            Mount {
                source: "logs".into(),
                destination: "/logs".into(),
                processes: vec!["worker".into()],
                ..Default::default()
            },
        ];

        let error = config.process_configs().unwrap_err();
        assert!(matches!(
            &error,
            ConfigError::MountCollision { process_group, sources }
                if process_group == "worker" && sources == &["data", "logs"]
        ));
        assert!(error.to_string().contains("data, logs"));
    }

    #[test]
    fn process_configs_refuse_bad_service_scoping() {
        let mut config = multi_group_config();
        config.services[0].processes.clear();
        assert!(matches!(
            config.process_configs(),
            Err(ConfigError::ServiceWithoutProcesses { count: 2, .. })
        ));

        config.services[0].processes = vec!["cron".into()];
        assert!(matches!(
            config.process_configs(),
            Err(ConfigError::UnknownServiceProcess { process_group }) if process_group == "cron"
        ));

        config.services.clear();
        config.http_service = Some(HttpService {
            internal_port: 8080,
            ..Default::default()
        });
        assert!(matches!(
            config.process_configs(),
            Err(ConfigError::AmbiguousHttpService { count: 2 })
        ));
    }
}
