use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::IsTerminal;
use std::sync::Arc;

use crate::actions::{
    find_action, gcp_actions, terraform_actions, Action, CommandBuilder, CommandParams,
};
use crate::app::Navigator;
use crate::config::{ConfigManager, OpsConfig, ENV_CONFIG_VAR};
use crate::console::Console;
use crate::executor::{exec_replace, Executor};
use crate::history::RecentHosts;
use crate::models::Host;
use crate::ssh_service::build_ssh_command;

#[derive(Parser, Debug)]
#[command(name = "ops")]
#[command(version, about = "Interactive launcher for SSH sessions and remote ops actions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List clients and hosts
    Ls {
        /// Only hosts whose name, address, client or tags contain this
        search: Option<String>,
    },
    /// Open an SSH session (replaces this process)
    Ssh {
        /// Host name or client:host
        host: String,
    },
    /// Run health checks (uptime, disk, memory, load)
    Health {
        /// Host name or client:host
        host: String,
    },
    /// Docker commands on a remote host
    #[command(subcommand)]
    Docker(DockerCommand),
    /// Docker Compose commands on a remote host
    #[command(subcommand)]
    Compose(ComposeCommand),
    /// Show the active config path and validate it
    Config {
        /// Open the config file with the system default editor
        #[arg(long)]
        edit: bool,
    },
    /// Google Cloud shortcuts (not implemented yet)
    Gcp {
        #[command(subcommand)]
        command: Option<GcpCommand>,
    },
    /// Terraform shortcuts (not implemented yet)
    Tf {
        #[command(subcommand)]
        command: Option<TfCommand>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DockerCommand {
    /// List running containers
    Ps { host: String },
    /// Show container resource usage
    Stats { host: String },
    /// Tail logs for a container
    Logs {
        host: String,
        /// Container or service name
        service: String,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },
}

#[derive(Args, Debug)]
pub struct ComposeArgs {
    /// Host name or client:host
    pub host: String,
    /// Remote compose project directory
    #[arg(short = 'd', long = "project-dir", value_name = "DIR")]
    pub project_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ComposeCommand {
    /// Show service status
    Ps(ComposeArgs),
    /// Start services (detached)
    Up(ComposeArgs),
    /// Stop and remove services (asks for confirmation)
    Down(ComposeArgs),
    /// Restart services (asks for confirmation)
    Restart(ComposeArgs),
    /// Follow all service logs
    Logs(ComposeArgs),
}

impl ComposeCommand {
    fn split(self) -> (&'static str, ComposeArgs) {
        match self {
            ComposeCommand::Ps(args) => ("compose_ps", args),
            ComposeCommand::Up(args) => ("compose_up", args),
            ComposeCommand::Down(args) => ("compose_down", args),
            ComposeCommand::Restart(args) => ("compose_restart", args),
            ComposeCommand::Logs(args) => ("compose_logs", args),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum GcpCommand {
    Auth,
    SetProject {
        /// GCP project ID
        project_id: String,
    },
    Clusters,
}

#[derive(Subcommand, Debug)]
pub enum TfCommand {
    Init,
    Plan,
    Apply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Interactive,
    /// Streams to a terminal; buffered when stdout is redirected.
    Output,
}

const CONFIG_TEMPLATE: &str = r#"version: 1
defaults:
  ssh_options: ["-o", "ConnectTimeout=10"]
clients:
  example:
    description: "Example client"
    hosts:
      - name: "web"
        host: "web.example.com"
        user: "deploy"
        tags: ["docker"]
"#;

/// Executes one parsed command line and returns the process exit code.
pub struct Runner {
    manager: ConfigManager,
    builder: CommandBuilder,
    console: Arc<dyn Console>,
    executor: Arc<dyn Executor>,
}

impl Runner {
    pub fn new(
        manager: ConfigManager,
        builder: CommandBuilder,
        console: Arc<dyn Console>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            manager,
            builder,
            console,
            executor,
        }
    }

    pub async fn run(self, command: Option<Commands>) -> Result<i32> {
        let Some(command) = command else {
            return self.interactive().await;
        };

        match command {
            Commands::Ls { search } => Ok(self.list(search.as_deref())),
            Commands::Ssh { host } => self.ssh(&host),
            Commands::Health { host } => {
                self.run_action(&host, "health", CommandParams::default(), RunMode::Output)
                    .await
            }
            Commands::Docker(DockerCommand::Ps { host }) => {
                self.run_action(&host, "docker_ps", CommandParams::default(), RunMode::Output)
                    .await
            }
            Commands::Docker(DockerCommand::Stats { host }) => {
                self.run_action(&host, "docker_stats", CommandParams::default(), RunMode::Output)
                    .await
            }
            Commands::Docker(DockerCommand::Logs {
                host,
                service,
                follow,
            }) => {
                let params = CommandParams {
                    service: Some(service),
                    follow,
                    ..CommandParams::default()
                };
                let mode = if follow {
                    RunMode::Interactive
                } else {
                    RunMode::Output
                };
                self.run_action(&host, "docker_logs", params, mode).await
            }
            Commands::Compose(compose) => {
                let (action, args) = compose.split();
                let params = CommandParams {
                    compose_path: args.project_dir,
                    ..CommandParams::default()
                };
                let mode = if action == "compose_logs" {
                    RunMode::Interactive
                } else {
                    RunMode::Output
                };
                self.run_action(&args.host, action, params, mode).await
            }
            Commands::Config { edit } => self.config(edit),
            Commands::Gcp { command } => Ok(self.gcp(command)),
            Commands::Tf { command } => self.terraform(command).await,
        }
    }

    fn load_config(&self) -> Option<OpsConfig> {
        match self.manager.load_config() {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::error!("Failed to load config: {}", e);
                self.console.error(&e.to_string());
                None
            }
        }
    }

    fn resolve<'a>(&self, config: &'a OpsConfig, reference: &str) -> Option<&'a Host> {
        match config.resolve_host(reference) {
            Ok(host) => Some(host),
            Err(e) => {
                tracing::warn!("Failed to resolve {}: {}", reference, e);
                self.console.error(&e.to_string());
                None
            }
        }
    }

    fn history(&self) -> RecentHosts {
        RecentHosts::new(self.manager.history_path())
    }

    async fn interactive(self) -> Result<i32> {
        let Some(config) = self.load_config() else {
            return Ok(1);
        };
        let history = self.history();
        Navigator::new(config, self.builder, self.console, self.executor, history)
            .run()
            .await
    }

    fn list(&self, search: Option<&str>) -> i32 {
        let Some(config) = self.load_config() else {
            return 1;
        };

        let groups: Vec<(&str, Vec<&Host>)> = match search.filter(|s| !s.is_empty()) {
            None => config
                .clients
                .iter()
                .map(|c| (c.name.as_str(), c.hosts.iter().collect()))
                .collect(),
            Some(query) => {
                let matched = config.search_hosts(query);
                if matched.is_empty() {
                    self.console
                        .info(&format!("No hosts matching '{}'.", query));
                    return 0;
                }
                config
                    .clients
                    .iter()
                    .map(|c| {
                        let hosts = c
                            .hosts
                            .iter()
                            .filter(|h| matched.iter().any(|m| std::ptr::eq(*m, *h)))
                            .collect::<Vec<_>>();
                        (c.name.as_str(), hosts)
                    })
                    .filter(|(_, hosts)| !hosts.is_empty())
                    .collect()
            }
        };

        for line in hosts_table(&groups) {
            self.console.print(&line);
        }
        0
    }

    fn ssh(&self, reference: &str) -> Result<i32> {
        let Some(config) = self.load_config() else {
            return Ok(1);
        };
        let Some(host) = self.resolve(&config, reference) else {
            return Ok(1);
        };

        let cmd = build_ssh_command(host, &config.ssh_defaults, None, false, &[]);
        // nothing after exec runs, so persist first
        self.history().record(&host.display());
        Ok(exec_replace(&cmd, self.console.as_ref(), true))
    }

    async fn run_action(
        &self,
        reference: &str,
        action_name: &str,
        mut params: CommandParams,
        mode: RunMode,
    ) -> Result<i32> {
        let Some(config) = self.load_config() else {
            return Ok(1);
        };
        let Some(host) = self.resolve(&config, reference) else {
            return Ok(1);
        };
        let action = find_action(action_name)
            .with_context(|| format!("Action '{}' is not registered", action_name))?;

        if action.destructive {
            let question = format!("Run '{}' on {}?", action.label, host.display());
            if !self.console.confirm(&question, false).await? {
                self.console.info("Cancelled.");
                return Ok(0);
            }
        }

        if params.compose_path.is_none() {
            params.compose_path = host.compose_dir().map(str::to_string);
        }

        let cmd = self
            .builder
            .build(action, host, &config.ssh_defaults, &params)?;
        self.history().record(&host.display());
        tracing::info!("Running {} on {} from the command line", action.name, host.display());

        match mode {
            RunMode::Interactive => self.executor.run_interactive(&cmd, true).await,
            RunMode::Output if std::io::stdout().is_terminal() => {
                self.executor.run_streaming(&cmd, true).await
            }
            RunMode::Output => {
                let captured = self.executor.run_capture(&cmd, false).await?;
                self.console.print(captured.output.trim_end());
                Ok(captured.code)
            }
        }
    }

    fn config(&self, edit: bool) -> Result<i32> {
        let path = self.manager.get_config_path();
        self.console
            .print(&format!("Config path: {}", path.display()));
        let env = if self.manager.is_from_env() {
            format!("{}={}", ENV_CONFIG_VAR, path.display())
        } else {
            "not set".to_string()
        };
        self.console.print(&format!("Env var:     {}", env));

        if edit {
            self.manager.ensure_config_parent()?;
            if !path.exists() {
                fs::write(path, CONFIG_TEMPLATE)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                self.console
                    .info(&format!("Created a starter config at {}", path.display()));
            }
            if let Err(e) = open::that(path) {
                tracing::error!("Failed to open editor: {}", e);
                self.console
                    .error(&format!("Failed to open editor: {}", e));
                return Ok(1);
            }
            return Ok(0);
        }

        match self.manager.validate() {
            Ok(summary) => {
                self.console.success(&summary);
                Ok(0)
            }
            Err(e) => {
                self.console.error(&e.to_string());
                Ok(1)
            }
        }
    }

    fn gcp(&self, command: Option<GcpCommand>) -> i32 {
        let planned = match command {
            None => {
                self.console
                    .warn("GCP subcommands coming soon. See `ops gcp --help`.");
                return 0;
            }
            Some(GcpCommand::Auth) => "gcloud auth login".to_string(),
            Some(GcpCommand::SetProject { project_id }) => {
                format!("gcloud config set project {}", project_id)
            }
            Some(GcpCommand::Clusters) => "gcloud container clusters list".to_string(),
        };
        self.not_implemented(gcp_actions(), &planned);
        0
    }

    async fn terraform(&self, command: Option<TfCommand>) -> Result<i32> {
        let planned = match command {
            None => {
                self.console
                    .warn("Terraform subcommands coming soon. See `ops tf --help`.");
                return Ok(0);
            }
            Some(TfCommand::Init) => "terraform init",
            Some(TfCommand::Plan) => "terraform plan",
            Some(TfCommand::Apply) => {
                if !self.console.confirm("Run terraform apply?", false).await? {
                    self.console.info("Cancelled.");
                    return Ok(0);
                }
                "terraform apply"
            }
        };
        self.not_implemented(terraform_actions(), planned);
        Ok(0)
    }

    fn not_implemented(&self, registered: Vec<Action>, planned: &str) {
        tracing::info!(
            "Stub invoked for '{}' ({} registered action(s))",
            planned,
            registered.len()
        );
        self.console
            .warn(&format!("Not implemented yet. Will run: {}", planned));
    }
}

/// Plain-text table of hosts grouped by client, a blank row between clients.
fn hosts_table(groups: &[(&str, Vec<&Host>)]) -> Vec<String> {
    const HEADERS: [&str; 5] = ["CLIENT", "HOST", "SSH TARGET", "PORT", "TAGS"];

    let mut rows: Vec<Option<[String; 5]>> = Vec::new();
    for (gi, (client, hosts)) in groups.iter().enumerate() {
        if gi > 0 {
            rows.push(None);
        }
        for (hi, host) in hosts.iter().enumerate() {
            let tags = if host.tags.is_empty() {
                "-".to_string()
            } else {
                host.tags.join(", ")
            };
            rows.push(Some([
                if hi == 0 { client.to_string() } else { String::new() },
                host.name.clone(),
                host.ssh_target(),
                host.port.to_string(),
                tags,
            ]));
        }
    }

    let mut widths = HEADERS.map(str::len);
    for row in rows.iter().flatten() {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: [&str; 5]| {
        format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {:>w3$}  {}",
            cells[0],
            cells[1],
            cells[2],
            cells[3],
            cells[4],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2],
            w3 = widths[3],
        )
        .trim_end()
        .to_string()
    };

    let mut lines = vec![render(HEADERS)];
    for row in &rows {
        lines.push(match row {
            Some(cells) => render(cells.each_ref().map(String::as_str)),
            None => String::new(),
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE_YAML;
    use crate::console::testing::ScriptedConsole;
    use crate::executor::testing::RecordingExecutor;
    use clap::CommandFactory;
    use tempfile::TempDir;

    struct Setup {
        console: Arc<ScriptedConsole>,
        executor: Arc<RecordingExecutor>,
        dir: TempDir,
    }

    impl Setup {
        fn new(inputs: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            fs::write(dir.path().join("hosts.yaml"), SAMPLE_YAML).unwrap();
            Self {
                console: Arc::new(ScriptedConsole::new(inputs)),
                executor: Arc::new(RecordingExecutor::default()),
                dir,
            }
        }

        async fn run(&self, args: &[&str]) -> i32 {
            let cli = Cli::try_parse_from(std::iter::once("ops").chain(args.iter().copied())).unwrap();
            let manager = ConfigManager::at(
                self.dir.path().to_path_buf(),
                self.dir.path().join("hosts.yaml"),
            );
            Runner::new(
                manager,
                CommandBuilder::new().unwrap(),
                self.console.clone(),
                self.executor.clone(),
            )
            .run(cli.command)
            .await
            .unwrap()
        }

        fn history(&self) -> Vec<String> {
            RecentHosts::new(self.dir.path().join("history.json")).load()
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_compose_project_dir() {
        let cli = Cli::try_parse_from(["ops", "compose", "up", "acme-prod", "-d", "/srv/x"]).unwrap();
        match cli.command {
            Some(Commands::Compose(ComposeCommand::Up(args))) => {
                assert_eq!(args.host, "acme-prod");
                assert_eq!(args.project_dir.as_deref(), Some("/srv/x"));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_docker_logs_follow() {
        let cli = Cli::try_parse_from(["ops", "docker", "logs", "web", "api", "-f"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Docker(DockerCommand::Logs { follow: true, .. }))
        ));
    }

    #[test]
    fn parses_gcp_set_project() {
        let cli = Cli::try_parse_from(["ops", "gcp", "set-project", "my-proj"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Gcp {
                command: Some(GcpCommand::SetProject { .. })
            })
        ));
    }

    #[test]
    fn table_groups_hosts_under_first_row() {
        let mut web = Host::new("web", "10.0.0.1", "acme");
        web.tags = vec!["docker".to_string()];
        let db = Host::new("db", "10.0.0.2", "acme");
        let lines = hosts_table(&[("acme", vec![&web, &db])]);

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("CLIENT"));
        assert!(lines[1].starts_with("acme"));
        assert!(lines[1].ends_with("docker"));
        assert!(lines[2].trim_start().starts_with("db"));
        assert!(lines[2].ends_with('-'));
    }

    #[tokio::test]
    async fn ls_search_shows_only_matches() {
        let setup = Setup::new(&[]);
        assert_eq!(setup.run(&["ls", "stg"]).await, 0);
        assert!(setup.console.contains("acme-stg"));
        assert!(!setup.console.contains("acme-prod"));
        assert!(!setup.console.contains("personal"));
    }

    #[tokio::test]
    async fn ls_without_matches_reports_info() {
        let setup = Setup::new(&[]);
        assert_eq!(setup.run(&["ls", "nothing-here"]).await, 0);
        assert!(setup.console.contains("info: No hosts matching 'nothing-here'."));
    }

    #[tokio::test]
    async fn unknown_host_exits_with_one() {
        let setup = Setup::new(&[]);
        assert_eq!(setup.run(&["health", "ghost"]).await, 1);
        assert!(setup.console.contains("error: Unknown host 'ghost'"));
        assert!(setup.executor.calls().is_empty());
    }

    #[tokio::test]
    async fn compose_down_needs_confirmation() {
        let setup = Setup::new(&["n"]);
        assert_eq!(setup.run(&["compose", "down", "acme-prod"]).await, 0);
        assert!(setup.executor.calls().is_empty());
        assert!(setup.console.contains("info: Cancelled."));
    }

    #[tokio::test]
    async fn compose_project_dir_overrides_host_path() {
        let setup = Setup::new(&[]);
        setup
            .run(&["compose", "logs", "acme-prod", "--project-dir", "/opt/other"])
            .await;

        let calls = setup.executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "interactive");
        assert!(calls[0]
            .1
            .last()
            .unwrap()
            .starts_with("cd /opt/other && docker compose logs"));
        assert_eq!(setup.history(), ["acme:acme-prod"]);
    }

    #[tokio::test]
    async fn docker_logs_without_follow_is_not_interactive() {
        let setup = Setup::new(&[]);
        setup.run(&["docker", "logs", "acme-stg", "web"]).await;

        let calls = setup.executor.calls();
        assert_ne!(calls[0].0, "interactive");
        assert_eq!(
            calls[0].1.last().map(String::as_str),
            Some("docker logs --tail 100 web")
        );
    }

    #[tokio::test]
    async fn exit_code_comes_from_the_command() {
        let setup = Setup {
            executor: Arc::new(RecordingExecutor::with_code(3)),
            ..Setup::new(&[])
        };
        assert_eq!(setup.run(&["docker", "ps", "acme:acme-prod"]).await, 3);
    }

    #[tokio::test]
    async fn config_reports_summary() {
        let setup = Setup::new(&[]);
        assert_eq!(setup.run(&["config"]).await, 0);
        assert!(setup.console.contains("Env var:     not set"));
        assert!(setup
            .console
            .contains("success: Config OK - 2 client(s), 3 host(s) loaded from"));
    }

    #[tokio::test]
    async fn tf_apply_asks_first() {
        let setup = Setup::new(&["y"]);
        assert_eq!(setup.run(&["tf", "apply"]).await, 0);
        assert!(setup
            .console
            .contains("warn: Not implemented yet. Will run: terraform apply"));
    }
}
