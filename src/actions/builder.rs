use std::collections::{BTreeSet, HashMap};

use crate::actions::{Action, BUILTIN_ACTIONS};
use crate::error::BuildError;
use crate::models::{CommandLine, Host, SshDefaults};
use crate::ssh_service::{build_remote_command, build_ssh_command};

type BuildFn = fn(&Host, &SshDefaults, &CommandParams) -> Result<CommandLine, BuildError>;

/// Optional inputs some actions need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandParams {
    /// Container or compose service, required by `docker_logs`.
    pub service: Option<String>,
    /// Keep the remote command attached (`-f`) and allocate a TTY.
    pub follow: bool,
    /// Remote directory to `cd` into before compose commands.
    pub compose_path: Option<String>,
}

/// Maps every registered action name to the function that builds its command.
#[derive(Debug)]
pub struct CommandBuilder {
    builders: HashMap<&'static str, BuildFn>,
}

impl CommandBuilder {
    /// Builder for the built-in registry, checked for a one-to-one match.
    pub fn new() -> Result<Self, BuildError> {
        Self::checked(default_builders(), BUILTIN_ACTIONS)
    }

    fn checked(
        builders: HashMap<&'static str, BuildFn>,
        registry: &[Action],
    ) -> Result<Self, BuildError> {
        let registered: BTreeSet<&str> = registry.iter().map(|a| a.name).collect();
        let built: BTreeSet<&str> = builders.keys().copied().collect();

        if registered != built {
            return Err(BuildError::RegistryMismatch {
                missing: registered.difference(&built).map(|s| s.to_string()).collect(),
                unregistered: built.difference(&registered).map(|s| s.to_string()).collect(),
            });
        }

        Ok(Self { builders })
    }

    pub fn build(
        &self,
        action: &Action,
        host: &Host,
        defaults: &SshDefaults,
        params: &CommandParams,
    ) -> Result<CommandLine, BuildError> {
        let build = self
            .builders
            .get(action.name)
            .ok_or_else(|| BuildError::InvalidAction(action.name.to_string()))?;
        build(host, defaults, params)
    }
}

fn default_builders() -> HashMap<&'static str, BuildFn> {
    let entries: [(&'static str, BuildFn); 16] = [
        ("ssh", ssh),
        ("health", health),
        ("docker_ps", docker_ps),
        ("docker_stats", docker_stats),
        ("docker_logs", docker_logs),
        ("compose_ps", compose_ps),
        ("compose_up", compose_up),
        ("compose_down", compose_down),
        ("compose_restart", compose_restart),
        ("compose_logs", compose_logs),
        ("nginx_status", nginx_status),
        ("nginx_reload", nginx_reload),
        ("postgres_status", postgres_status),
        ("redis_info", redis_info),
        ("celery_inspect", celery_inspect),
        ("traefik_status", traefik_status),
    ];
    entries.into_iter().collect()
}

fn quote(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

/// Run `command` as the host's docker user when one is configured.
fn docker_command(host: &Host, command: &str) -> String {
    match &host.docker_user {
        Some(user) => format!("sudo -n -u {} {}", quote(user), command),
        None => command.to_string(),
    }
}

fn compose_cd(compose_path: Option<&str>) -> String {
    match compose_path {
        Some(path) if !path.is_empty() => format!("cd {} && ", quote(path)),
        _ => String::new(),
    }
}

fn remote(host: &Host, defaults: &SshDefaults, script: &str) -> Result<CommandLine, BuildError> {
    Ok(build_remote_command(host, defaults, script, false))
}

fn ssh(host: &Host, defaults: &SshDefaults, _: &CommandParams) -> Result<CommandLine, BuildError> {
    Ok(build_ssh_command(host, defaults, None, false, &[]))
}

fn health(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    let mut script = String::from(concat!(
        "echo '=== Uptime ===' && uptime && ",
        "echo '\\n=== OS ===' && ",
        "(cat /etc/os-release 2>/dev/null | head -2 || sw_vers 2>/dev/null || uname -a) && ",
        "echo '\\n=== Disk ===' && df -h / && ",
        "echo '\\n=== Memory ===' && (free -h 2>/dev/null || vm_stat 2>/dev/null) && ",
        "echo '\\n=== Load ===' && ",
        "(cat /proc/loadavg 2>/dev/null || sysctl -n vm.loadavg 2>/dev/null || uptime) && ",
        "echo '\\n=== Docker ===' && ",
    ));
    script.push_str(&docker_command(
        host,
        "docker ps --format \"table {{.Names}}\\t{{.Status}}\" 2>/dev/null || echo \"Docker not available\"",
    ));
    remote(host, defaults, &script)
}

fn docker_ps(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    let script = docker_command(
        host,
        "docker ps --format 'table {{.Names}}\\t{{.Status}}\\t{{.Ports}}'",
    );
    remote(host, defaults, &script)
}

fn docker_stats(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    let script = docker_command(
        host,
        "docker stats --no-stream --format 'table {{.Name}}\\t{{.CPUPerc}}\\t{{.MemUsage}}'",
    );
    remote(host, defaults, &script)
}

fn docker_logs(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
) -> Result<CommandLine, BuildError> {
    let service = params
        .service
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(BuildError::MissingParameter {
            action: "docker_logs",
            parameter: "service",
        })?;

    let follow = if params.follow { "-f " } else { "" };
    let logs = format!("docker logs --tail 100 {}{}", follow, quote(service));
    Ok(build_remote_command(
        host,
        defaults,
        &docker_command(host, &logs),
        params.follow,
    ))
}

fn compose(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
    subcommand: &str,
    allocate_tty: bool,
) -> Result<CommandLine, BuildError> {
    let script = format!(
        "{}{}",
        compose_cd(params.compose_path.as_deref()),
        docker_command(host, &format!("docker compose {}", subcommand))
    );
    Ok(build_remote_command(host, defaults, &script, allocate_tty))
}

fn compose_ps(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
) -> Result<CommandLine, BuildError> {
    compose(host, defaults, params, "ps", false)
}

fn compose_up(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
) -> Result<CommandLine, BuildError> {
    compose(host, defaults, params, "up -d", false)
}

fn compose_down(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
) -> Result<CommandLine, BuildError> {
    compose(host, defaults, params, "down", false)
}

fn compose_restart(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
) -> Result<CommandLine, BuildError> {
    compose(host, defaults, params, "restart", false)
}

fn compose_logs(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
) -> Result<CommandLine, BuildError> {
    compose(host, defaults, params, "logs --tail 100 -f", true)
}

fn nginx_status(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    remote(
        host,
        defaults,
        concat!(
            "echo '=== Nginx Status ===' && ",
            "sudo nginx -t 2>&1 && ",
            "echo '\\n=== Active Connections ===' && ",
            "curl -s http://localhost/nginx_status 2>/dev/null ",
            "|| echo 'stub_status not enabled'",
        ),
    )
}

fn nginx_reload(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    remote(host, defaults, "sudo nginx -s reload")
}

fn postgres_status(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    remote(
        host,
        defaults,
        concat!(
            "echo '=== PostgreSQL Connections ===' && ",
            "(sudo -u postgres psql -c ",
            "\"SELECT state, count(*) FROM pg_stat_activity GROUP BY state;\" 2>/dev/null ",
            "|| echo 'psql not available') && ",
            "echo '\\n=== Database Sizes ===' && ",
            "(sudo -u postgres psql -c ",
            "\"SELECT datname, pg_size_pretty(pg_database_size(datname)) FROM pg_database ",
            "ORDER BY pg_database_size(datname) DESC;\" 2>/dev/null ",
            "|| echo 'psql not available')",
        ),
    )
}

fn redis_info(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    remote(
        host,
        defaults,
        concat!(
            "echo '=== Redis Info ===' && ",
            "(redis-cli info server 2>/dev/null | head -15 || echo 'redis-cli not available') && ",
            "echo '\\n=== Memory ===' && ",
            "(redis-cli info memory 2>/dev/null | head -10 || echo 'redis-cli not available') && ",
            "echo '\\n=== Clients ===' && ",
            "(redis-cli info clients 2>/dev/null | head -5 || echo 'redis-cli not available')",
        ),
    )
}

fn celery_inspect(
    host: &Host,
    defaults: &SshDefaults,
    params: &CommandParams,
) -> Result<CommandLine, BuildError> {
    let script = format!(
        "{}{} 2>/dev/null || echo 'Celery inspect not available'",
        compose_cd(params.compose_path.as_deref()),
        docker_command(host, "docker compose exec -T worker celery -A config inspect active")
    );
    remote(host, defaults, &script)
}

fn traefik_status(
    host: &Host,
    defaults: &SshDefaults,
    _: &CommandParams,
) -> Result<CommandLine, BuildError> {
    remote(
        host,
        defaults,
        concat!(
            "echo '=== Traefik Routers ===' && ",
            "curl -s http://localhost:8080/api/http/routers 2>/dev/null ",
            "| python3 -m json.tool 2>/dev/null ",
            "|| echo 'Traefik API not available'",
        ),
    )
}

/// Lists compose service names, one per line.
pub fn compose_services_command(
    host: &Host,
    defaults: &SshDefaults,
    compose_path: Option<&str>,
) -> CommandLine {
    let script = format!(
        "{}{} 2>/dev/null",
        compose_cd(compose_path),
        docker_command(host, "docker compose ps --services")
    );
    build_remote_command(host, defaults, &script, false)
}

/// Lists running container names, one per line.
pub fn container_names_command(host: &Host, defaults: &SshDefaults) -> CommandLine {
    let script = format!(
        "{} 2>/dev/null",
        docker_command(host, "docker ps --format '{{.Names}}'")
    );
    build_remote_command(host, defaults, &script, false)
}
