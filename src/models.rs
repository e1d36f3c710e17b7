use std::fmt;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// A single managed host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub host: String,
    pub user: String,
    pub port: u16,
    pub tags: Vec<String>,
    /// Entry from `~/.ssh/config`; when set it replaces `user@host` and the port.
    pub ssh_alias: Option<String>,
    /// Name of the owning client, filled in at load time.
    pub client: String,
    pub compose_path: Option<String>,
    pub stack_name: Option<String>,
    pub project_dir: Option<String>,
    /// Remote account docker commands are run as (`sudo -n -u <user>`).
    pub docker_user: Option<String>,
}

impl Host {
    pub fn new(name: impl Into<String>, host: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            user: "root".to_string(),
            port: DEFAULT_SSH_PORT,
            tags: Vec::new(),
            ssh_alias: None,
            client: client.into(),
            compose_path: None,
            stack_name: None,
            project_dir: None,
            docker_user: None,
        }
    }

    /// `client:name` when the host belongs to a client, otherwise the bare name.
    pub fn display(&self) -> String {
        if self.client.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.client, self.name)
        }
    }

    /// Destination argument handed to ssh.
    pub fn ssh_target(&self) -> String {
        match &self.ssh_alias {
            Some(alias) => alias.clone(),
            None => format!("{}@{}", self.user, self.host),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Remote directory compose commands run in.
    pub fn compose_dir(&self) -> Option<&str> {
        self.compose_path
            .as_deref()
            .or(self.project_dir.as_deref())
            .filter(|dir| !dir.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub name: String,
    pub description: String,
    pub hosts: Vec<Host>,
}

/// Options prepended to every ssh invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshDefaults {
    pub options: Vec<String>,
}

impl Default for SshDefaults {
    fn default() -> Self {
        Self {
            options: vec!["-o".to_string(), "ConnectTimeout=10".to_string()],
        }
    }
}

/// One local process invocation: program followed by its arguments.
///
/// Tokens are handed to the OS as-is. The only shell fragment is the remote
/// command, which travels as a single argument for ssh to pass on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    tokens: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            tokens: vec![program.into()],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.tokens.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    pub fn arguments(&self) -> &[String] {
        &self.tokens[1..]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Human readable form used for previews only.
    pub fn preview(&self) -> String {
        self.tokens().join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.preview())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_qualified_only_with_client() {
        let host = Host::new("web1", "10.0.0.1", "acme");
        assert_eq!(host.display(), "acme:web1");

        let bare = Host::new("web1", "10.0.0.1", "");
        assert_eq!(bare.display(), "web1");
    }

    #[test]
    fn ssh_target_prefers_alias() {
        let mut host = Host::new("web1", "10.0.0.1", "acme");
        host.user = "deploy".to_string();
        assert_eq!(host.ssh_target(), "deploy@10.0.0.1");

        host.ssh_alias = Some("acme-web".to_string());
        assert_eq!(host.ssh_target(), "acme-web");
    }

    #[test]
    fn compose_dir_falls_back_to_project_dir() {
        let mut host = Host::new("web1", "10.0.0.1", "acme");
        assert_eq!(host.compose_dir(), None);

        host.project_dir = Some("/opt/app".to_string());
        assert_eq!(host.compose_dir(), Some("/opt/app"));

        host.compose_path = Some("/srv/app".to_string());
        assert_eq!(host.compose_dir(), Some("/srv/app"));
    }

    #[test]
    fn command_line_keeps_tokens_separate() {
        let cmd = CommandLine::new("ssh")
            .args(["-o", "ConnectTimeout=10"])
            .arg("echo 'a b' && uptime");
        assert_eq!(cmd.program(), "ssh");
        assert_eq!(cmd.arguments().len(), 3);
        assert_eq!(cmd.arguments()[2], "echo 'a b' && uptime");
        assert_eq!(cmd.preview(), "ssh -o ConnectTimeout=10 echo 'a b' && uptime");
    }
}
