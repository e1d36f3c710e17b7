use crate::models::{CommandLine, Host, SshDefaults, DEFAULT_SSH_PORT};

/// Assemble an `ssh` invocation for `host`.
///
/// Token order is fixed: program, default options, `-p` (only without an
/// alias and on a non-standard port), `-t`, extra flags, target, remote command.
pub fn build_ssh_command(
    host: &Host,
    defaults: &SshDefaults,
    remote_command: Option<&str>,
    allocate_tty: bool,
    extra_args: &[&str],
) -> CommandLine {
    let mut cmd = CommandLine::new("ssh").args(defaults.options.iter().cloned());

    // An alias carries its own port in ~/.ssh/config
    if host.ssh_alias.is_none() && host.port != DEFAULT_SSH_PORT {
        cmd = cmd.arg("-p").arg(host.port.to_string());
    }

    if allocate_tty {
        cmd = cmd.arg("-t");
    }

    cmd = cmd.args(extra_args.iter().copied()).arg(host.ssh_target());

    if let Some(remote) = remote_command.filter(|r| !r.is_empty()) {
        cmd = cmd.arg(remote);
    }

    tracing::debug!("Built ssh command for {}: {}", host.display(), cmd);
    cmd
}

/// ssh invocation that runs `remote` instead of opening a shell.
pub fn build_remote_command(
    host: &Host,
    defaults: &SshDefaults,
    remote: &str,
    allocate_tty: bool,
) -> CommandLine {
    build_ssh_command(host, defaults, Some(remote), allocate_tty, &[])
}
