use anyhow::Result;
use std::sync::Arc;

use crate::actions::{
    actions_for_host, compose_services_command, container_names_command, Action, CommandBuilder,
    CommandParams,
};
use crate::app::menu::select;
use crate::app::types::{Choice, Flow, MenuItem};
use crate::config::{OpsConfig, APP_NAME};
use crate::console::Console;
use crate::executor::{Executor, DISCOVERY_TIMEOUT};
use crate::history::RecentHosts;
use crate::models::{Client, CommandLine, Host};

enum TopEntry<'a> {
    Recent(&'a Host),
    Client(&'a Client),
}

/// Interactive menu flow: clients or recent hosts, then hosts, then actions.
pub struct Navigator {
    config: OpsConfig,
    builder: CommandBuilder,
    console: Arc<dyn Console>,
    executor: Arc<dyn Executor>,
    history: RecentHosts,
}

impl Navigator {
    pub fn new(
        config: OpsConfig,
        builder: CommandBuilder,
        console: Arc<dyn Console>,
        executor: Arc<dyn Executor>,
        history: RecentHosts,
    ) -> Self {
        Self {
            config,
            builder,
            console,
            executor,
            history,
        }
    }

    /// Runs until the operator quits; the result is the process exit code.
    pub async fn run(&self) -> Result<i32> {
        tracing::info!(
            "Interactive session started with {} client(s)",
            self.config.clients.len()
        );

        loop {
            let (entries, items) = self.top_menu();
            if items.is_empty() {
                self.console.warn(&format!(
                    "No clients configured in {}. Run `ops config --edit` to add some.",
                    self.config.config_path.display()
                ));
                return Ok(0);
            }

            let flow = match select(self.console.as_ref(), APP_NAME, &items, true).await? {
                Choice::Selected(i) => match entries[i] {
                    TopEntry::Recent(host) => self.action_loop(host).await?,
                    TopEntry::Client(client) => self.host_loop(client).await?,
                },
                Choice::Back | Choice::Exit => Flow::Exit,
            };

            if flow == Flow::Exit {
                tracing::info!("Interactive session ended");
                return Ok(0);
            }
        }
    }

    /// Recent hosts first (re-read every time, unresolvable ones skipped),
    /// then every client.
    fn top_menu(&self) -> (Vec<TopEntry<'_>>, Vec<MenuItem>) {
        let mut entries = Vec::new();
        let mut items = Vec::new();

        for recent in self.history.load() {
            match self.config.resolve_host(&recent) {
                Ok(host) => {
                    items.push(MenuItem::new(
                        recent.as_str(),
                        format!("★ {:<28} {}", recent, host.ssh_target()),
                    ));
                    entries.push(TopEntry::Recent(host));
                }
                Err(e) => tracing::debug!("Skipping recent host {}: {}", recent, e),
            }
        }

        for client in &self.config.clients {
            let mut label = format!("{:<30} {} host(s)", client.name, client.hosts.len());
            if !client.description.is_empty() {
                label.push_str(&format!("  {}", client.description));
            }
            items.push(MenuItem::new(client.name.as_str(), label));
            entries.push(TopEntry::Client(client));
        }

        (entries, items)
    }

    async fn host_loop(&self, client: &Client) -> Result<Flow> {
        if client.hosts.is_empty() {
            self.console
                .warn(&format!("Client '{}' has no hosts.", client.name));
            return Ok(Flow::Back);
        }

        let items: Vec<MenuItem> = client
            .hosts
            .iter()
            .map(|host| {
                let mut label = format!(
                    "{:<24} {:<32} [{}]",
                    host.name,
                    host.ssh_target(),
                    host.tags.join(", ")
                );
                if let Some(stack) = &host.stack_name {
                    label.push_str(&format!("  stack: {}", stack));
                }
                MenuItem::new(host.name.as_str(), label)
            })
            .collect();

        loop {
            match select(self.console.as_ref(), &client.name, &items, false).await? {
                Choice::Selected(i) => {
                    if self.action_loop(&client.hosts[i]).await? == Flow::Exit {
                        return Ok(Flow::Exit);
                    }
                }
                Choice::Back => return Ok(Flow::Back),
                Choice::Exit => return Ok(Flow::Exit),
            }
        }
    }

    async fn action_loop(&self, host: &Host) -> Result<Flow> {
        let actions = actions_for_host(host);
        if actions.is_empty() {
            self.console
                .error(&format!("No actions available for {}.", host.display()));
            return Ok(Flow::Back);
        }

        let items: Vec<MenuItem> = actions
            .iter()
            .map(|action| {
                let marker = if action.destructive { " ⚠" } else { "" };
                MenuItem::new(
                    action.label,
                    format!(
                        "{:<30} {:<8} {}{}",
                        action.label,
                        action.category.as_str(),
                        action.description,
                        marker
                    ),
                )
            })
            .collect();
        let title = format!("{} ({})", host.display(), host.ssh_target());

        loop {
            match select(self.console.as_ref(), &title, &items, false).await? {
                Choice::Selected(i) => self.execute(host, actions[i]).await?,
                Choice::Back => return Ok(Flow::Back),
                Choice::Exit => return Ok(Flow::Exit),
            }
        }
    }

    async fn execute(&self, host: &Host, action: &Action) -> Result<()> {
        if action.destructive {
            let question = format!("{} on {}?", action.label, host.display());
            if !self.console.confirm(&question, false).await? {
                self.console.info("Cancelled.");
                return Ok(());
            }
        }

        let mut params = CommandParams {
            compose_path: host.compose_dir().map(str::to_string),
            ..CommandParams::default()
        };

        if action.name == "docker_logs" {
            match self.pick_service(host).await? {
                Some(service) => {
                    params.service = Some(service);
                    params.follow = true;
                }
                None => {
                    self.console.info("Cancelled.");
                    return Ok(());
                }
            }
        }

        let cmd = match self
            .builder
            .build(action, host, &self.config.ssh_defaults, &params)
        {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::error!("Failed to build {} for {}: {}", action.name, host.display(), e);
                self.console.error(&e.to_string());
                return Ok(());
            }
        };

        self.history.record(&host.display());
        tracing::info!("Running {} on {}", action.name, host.display());

        let code = if action.name == "ssh" || action.follows_output() {
            self.executor.run_interactive(&cmd, true).await?
        } else {
            self.executor.run_streaming(&cmd, true).await?
        };

        if code == 0 {
            self.console
                .success(&format!("{} completed on {}.", action.label, host.display()));
        } else {
            self.console
                .error(&format!("{} exited with code {}.", action.label, code));
        }
        Ok(())
    }

    /// Compose services, then running containers, then manual entry.
    /// `None` means the operator cancelled.
    async fn pick_service(&self, host: &Host) -> Result<Option<String>> {
        self.console.info("Looking up services...");
        let defaults = &self.config.ssh_defaults;

        let mut names = self
            .discover(compose_services_command(host, defaults, host.compose_dir()))
            .await?;
        if names.is_empty() {
            names = self
                .discover(container_names_command(host, defaults))
                .await?;
        }

        if names.is_empty() {
            self.console.warn("No services discovered.");
            let entered = self
                .console
                .read_line("Service name (empty to cancel):")
                .await?;
            return Ok(entered.filter(|name| !name.is_empty()));
        }

        let items: Vec<MenuItem> = names
            .iter()
            .map(|name| MenuItem::new(name.as_str(), name.as_str()))
            .collect();
        let title = format!("Services on {}", host.display());

        Ok(match select(self.console.as_ref(), &title, &items, false).await? {
            Choice::Selected(i) => Some(names[i].clone()),
            Choice::Back | Choice::Exit => None,
        })
    }

    /// Non-empty output lines of a probe; failures and timeouts read as nothing.
    async fn discover(&self, cmd: CommandLine) -> Result<Vec<String>> {
        let captured = self
            .executor
            .run_capture_silent(&cmd, DISCOVERY_TIMEOUT)
            .await?;

        if captured.code != 0 {
            tracing::debug!("Discovery probe exited with {}: {}", captured.code, cmd);
            return Ok(Vec::new());
        }

        Ok(captured
            .output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
