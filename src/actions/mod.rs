//! Action registry: every administrative action the launcher knows about,
//! gated by host tags.

mod builder;

pub use builder::{
    compose_services_command, container_names_command, CommandBuilder, CommandParams,
};

use crate::models::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    Ssh,
    Health,
    Docker,
    Compose,
    #[allow(dead_code)]
    Logs,
    /// Reserved, see [`gcp_actions`].
    #[allow(dead_code)]
    Gcp,
    /// Reserved, see [`terraform_actions`].
    #[allow(dead_code)]
    Terraform,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Ssh => "ssh",
            ActionCategory::Health => "health",
            ActionCategory::Docker => "docker",
            ActionCategory::Compose => "compose",
            ActionCategory::Logs => "logs",
            ActionCategory::Gcp => "gcp",
            ActionCategory::Terraform => "terraform",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: &'static str,
    pub label: &'static str,
    pub category: ActionCategory,
    pub required_tags: &'static [&'static str],
    /// Needs an explicit confirmation before it runs.
    pub destructive: bool,
    pub description: &'static str,
}

impl Action {
    /// Every required tag must be on the host; no tags means universal.
    pub fn is_available_for(&self, host: &Host) -> bool {
        self.required_tags.iter().all(|tag| host.has_tag(tag))
    }

    /// Actions that keep streaming until the operator stops them.
    pub fn follows_output(&self) -> bool {
        matches!(self.name, "docker_logs" | "compose_logs")
    }
}

const fn action(
    name: &'static str,
    label: &'static str,
    category: ActionCategory,
    required_tags: &'static [&'static str],
    destructive: bool,
    description: &'static str,
) -> Action {
    Action {
        name,
        label,
        category,
        required_tags,
        destructive,
        description,
    }
}

const DOCKER: &[&str] = &["docker"];

#[rustfmt::skip]
pub static BUILTIN_ACTIONS: &[Action] = &[
    action("ssh", "SSH Connect", ActionCategory::Ssh, &[], false,
        "Open an interactive SSH session."),
    action("health", "Health Check", ActionCategory::Health, &[], false,
        "Run basic health checks (uptime, disk, memory, load)."),
    action("docker_ps", "Docker PS", ActionCategory::Docker, DOCKER, false,
        "List running containers."),
    action("docker_stats", "Docker Stats", ActionCategory::Docker, DOCKER, false,
        "Show container resource usage."),
    action("docker_logs", "Docker Logs (select service)", ActionCategory::Docker, DOCKER, false,
        "Tail logs for a docker compose service."),
    action("compose_ps", "Compose PS", ActionCategory::Compose, DOCKER, false,
        "Show compose service status."),
    action("compose_up", "Compose Up", ActionCategory::Compose, DOCKER, false,
        "Start compose services (detached)."),
    action("compose_down", "Compose Down", ActionCategory::Compose, DOCKER, true,
        "Stop and remove compose services."),
    action("compose_restart", "Compose Restart", ActionCategory::Compose, DOCKER, true,
        "Restart compose services."),
    action("compose_logs", "Compose Logs (follow)", ActionCategory::Compose, DOCKER, false,
        "Tail all compose logs."),
    action("nginx_status", "Nginx Status", ActionCategory::Health, &["nginx"], false,
        "Show nginx status and active connections."),
    action("nginx_reload", "Nginx Reload", ActionCategory::Health, &["nginx"], true,
        "Reload nginx configuration."),
    action("postgres_status", "PostgreSQL Status", ActionCategory::Health, &["postgres"], false,
        "Show PostgreSQL connections and DB sizes."),
    action("redis_info", "Redis Info", ActionCategory::Health, &["redis"], false,
        "Show Redis server info and memory usage."),
    action("celery_inspect", "Celery Inspect", ActionCategory::Health, &["celery"], false,
        "Show active Celery workers and queues."),
    action("traefik_status", "Traefik Status", ActionCategory::Health, &["traefik"], false,
        "Show Traefik routers and services."),
];

/// Actions applicable to `host`, in registry order.
pub fn actions_for_host(host: &Host) -> Vec<&'static Action> {
    BUILTIN_ACTIONS
        .iter()
        .filter(|a| a.is_available_for(host))
        .collect()
}

pub fn find_action(name: &str) -> Option<&'static Action> {
    BUILTIN_ACTIONS.iter().find(|a| a.name == name)
}

// TODO: gcloud auth login / config set project / container clusters list.
pub fn gcp_actions() -> Vec<Action> {
    Vec::new()
}

// TODO: terraform init / plan / apply (apply is destructive).
pub fn terraform_actions() -> Vec<Action> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const TAG_UNIVERSE: &[&str] = &[
        "docker", "nginx", "postgres", "redis", "celery", "traefik", "prod", "stg",
    ];

    fn tagged(tags: &[&str]) -> Host {
        let mut host = Host::new("h", "h.example.com", "c");
        host.tags = tags.iter().map(|t| t.to_string()).collect();
        host
    }

    fn names(actions: &[&Action]) -> Vec<&'static str> {
        actions.iter().map(|a| a.name).collect()
    }

    #[test]
    fn names_are_unique() {
        let unique: HashSet<_> = BUILTIN_ACTIONS.iter().map(|a| a.name).collect();
        assert_eq!(unique.len(), BUILTIN_ACTIONS.len());
    }

    #[test]
    fn untagged_host_gets_universal_actions_only() {
        assert_eq!(names(&actions_for_host(&tagged(&[]))), ["ssh", "health"]);
    }

    #[test]
    fn tag_specific_actions_need_their_tag() {
        let actions = names(&actions_for_host(&tagged(&["nginx", "redis"])));
        assert_eq!(
            actions,
            ["ssh", "health", "nginx_status", "nginx_reload", "redis_info"]
        );
    }

    #[test]
    fn docker_hosts_from_config_get_docker_and_compose_actions() {
        let config = sample_config();
        let host = config.resolve_host("acme:acme-stg").unwrap();
        let actions = actions_for_host(host);
        assert_eq!(
            names(&actions),
            [
                "ssh",
                "health",
                "docker_ps",
                "docker_stats",
                "docker_logs",
                "compose_ps",
                "compose_up",
                "compose_down",
                "compose_restart",
                "compose_logs",
            ]
        );
        assert!(actions.iter().all(|a| matches!(
            a.category,
            ActionCategory::Ssh
                | ActionCategory::Health
                | ActionCategory::Docker
                | ActionCategory::Compose
        )));
    }

    #[test]
    fn destructive_flags() {
        let destructive: Vec<_> = BUILTIN_ACTIONS
            .iter()
            .filter(|a| a.destructive)
            .map(|a| a.name)
            .collect();
        assert_eq!(destructive, ["compose_down", "compose_restart", "nginx_reload"]);
    }

    #[test]
    fn extension_lists_are_empty() {
        assert!(gcp_actions().is_empty());
        assert!(terraform_actions().is_empty());
        assert!(!BUILTIN_ACTIONS
            .iter()
            .any(|a| matches!(a.category, ActionCategory::Gcp | ActionCategory::Terraform)));
    }

    #[test]
    fn find_action_by_name() {
        assert_eq!(find_action("compose_up").map(|a| a.label), Some("Compose Up"));
        assert!(find_action("reboot").is_none());
    }

    proptest! {
        #[test]
        fn eligibility_is_tag_subset(mask in 0u32..(1 << 8)) {
            let tags: Vec<&str> = TAG_UNIVERSE
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, t)| *t)
                .collect();
            let host = tagged(&tags);
            let eligible = actions_for_host(&host);
            for action in BUILTIN_ACTIONS {
                let subset = action.required_tags.iter().all(|t| tags.contains(t));
                prop_assert_eq!(eligible.contains(&action), subset);
            }
        }
    }
}
