use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ResolveError};
use crate::models::{Client, Host, SshDefaults, DEFAULT_SSH_PORT};

pub const APP_NAME: &str = "ops-launcher";
pub const ENV_CONFIG_VAR: &str = "OPS_CONFIG";
pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct RawConfig {
    version: Option<u32>,
    defaults: Option<RawDefaults>,
    clients: Option<IndexMap<String, Option<RawClient>>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDefaults {
    ssh_options: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawClient {
    description: Option<String>,
    hosts: Option<Vec<RawHost>>,
}

#[derive(Debug, Deserialize)]
struct RawHost {
    name: Option<String>,
    host: Option<String>,
    user: Option<String>,
    port: Option<u16>,
    #[serde(default)]
    tags: Vec<String>,
    ssh_alias: Option<String>,
    compose_path: Option<String>,
    stack_name: Option<String>,
    project_dir: Option<String>,
    docker_user: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Loaded configuration plus the lookup index used for host resolution.
#[derive(Debug, Clone)]
pub struct OpsConfig {
    pub version: u32,
    pub ssh_defaults: SshDefaults,
    pub clients: Vec<Client>,
    pub config_path: PathBuf,
    // host name -> (client index, host index)
    hosts_by_name: HashMap<String, Vec<(usize, usize)>>,
}

impl OpsConfig {
    pub fn new(clients: Vec<Client>, ssh_defaults: SshDefaults, config_path: PathBuf) -> Self {
        let mut hosts_by_name: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (ci, client) in clients.iter().enumerate() {
            for (hi, host) in client.hosts.iter().enumerate() {
                hosts_by_name
                    .entry(host.name.clone())
                    .or_default()
                    .push((ci, hi));
            }
        }

        Self {
            version: SUPPORTED_CONFIG_VERSION,
            ssh_defaults,
            clients,
            config_path,
            hosts_by_name,
        }
    }

    pub fn all_hosts(&self) -> impl Iterator<Item = &Host> {
        self.clients.iter().flat_map(|c| c.hosts.iter())
    }

    pub fn host_count(&self) -> usize {
        self.clients.iter().map(|c| c.hosts.len()).sum()
    }

    /// Resolve `name` (unique across clients) or `client:name`.
    pub fn resolve_host(&self, reference: &str) -> Result<&Host, ResolveError> {
        if let Some((client_name, host_name)) = reference.split_once(':') {
            return self
                .get_client(client_name)
                .and_then(|client| client.hosts.iter().find(|h| h.name == host_name))
                .ok_or_else(|| ResolveError::NotFoundUnderClient {
                    client: client_name.to_string(),
                    host: host_name.to_string(),
                });
        }

        let matches = self
            .hosts_by_name
            .get(reference)
            .map(Vec::as_slice)
            .unwrap_or_default();

        match matches {
            [] => Err(ResolveError::Unknown(reference.to_string())),
            [(ci, hi)] => Ok(&self.clients[*ci].hosts[*hi]),
            many => Err(ResolveError::Ambiguous {
                name: reference.to_string(),
                clients: many
                    .iter()
                    .map(|(ci, _)| self.clients[*ci].name.clone())
                    .collect(),
            }),
        }
    }

    /// Case-insensitive substring search over name, address, client and tags.
    pub fn search_hosts(&self, query: &str) -> Vec<&Host> {
        let query = query.to_lowercase();
        self.all_hosts()
            .filter(|host| {
                let haystack = format!(
                    "{} {} {} {}",
                    host.name,
                    host.host,
                    host.client,
                    host.tags.join(" ")
                )
                .to_lowercase();
                haystack.contains(&query)
            })
            .collect()
    }

    pub fn get_client(&self, name: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.name == name)
    }
}

/// Parse config text. `path` is only used for error messages and bookkeeping.
pub fn parse_config(
    content: &str,
    format: ConfigFormat,
    path: &Path,
) -> Result<OpsConfig, ConfigError> {
    let raw: RawConfig = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
    };

    let version = raw.version.unwrap_or(SUPPORTED_CONFIG_VERSION);
    if version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion {
            found: version,
            expected: SUPPORTED_CONFIG_VERSION,
        });
    }

    let ssh_defaults = raw
        .defaults
        .and_then(|d| d.ssh_options)
        .map(|options| SshDefaults { options })
        .unwrap_or_default();

    let mut clients = Vec::new();
    for (name, data) in raw.clients.unwrap_or_default() {
        clients.push(build_client(name, data.unwrap_or_default())?);
    }

    let mut config = OpsConfig::new(clients, ssh_defaults, path.to_path_buf());
    config.version = version;
    Ok(config)
}

fn build_client(name: String, data: RawClient) -> Result<Client, ConfigError> {
    let hosts = data
        .hosts
        .unwrap_or_default()
        .into_iter()
        .map(|raw| build_host(raw, &name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Client {
        description: data.description.unwrap_or_default(),
        name,
        hosts,
    })
}

fn build_host(raw: RawHost, client: &str) -> Result<Host, ConfigError> {
    let name = raw
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ConfigError::MissingName {
            client: client.to_string(),
        })?;
    let address = raw
        .host
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::MissingAddress {
            client: client.to_string(),
            host: name.clone(),
        })?;

    Ok(Host {
        name,
        host: address,
        user: raw.user.unwrap_or_else(|| "root".to_string()),
        port: raw.port.unwrap_or(DEFAULT_SSH_PORT),
        tags: raw.tags,
        ssh_alias: raw.ssh_alias.filter(|a| !a.is_empty()),
        client: client.to_string(),
        compose_path: raw.compose_path,
        stack_name: raw.stack_name,
        project_dir: raw.project_dir,
        docker_user: raw.docker_user.filter(|u| !u.is_empty()),
    })
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

/// Knows where the launcher keeps its files.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
    from_env: bool,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join(APP_NAME);

        let (config_file, from_env) = match std::env::var(ENV_CONFIG_VAR) {
            Ok(value) if !value.trim().is_empty() => (expand_home(value.trim()), true),
            _ => (config_dir.join("hosts.yaml"), false),
        };

        Ok(Self {
            config_dir,
            config_file,
            from_env,
        })
    }

    #[cfg(test)]
    pub fn at(config_dir: PathBuf, config_file: PathBuf) -> Self {
        Self {
            config_dir,
            config_file,
            from_env: false,
        }
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_file
    }

    pub fn is_from_env(&self) -> bool {
        self.from_env
    }

    pub fn history_path(&self) -> PathBuf {
        self.config_dir.join("history.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn load_config(&self) -> Result<OpsConfig, ConfigError> {
        load_config_from(&self.config_file)
    }

    /// Load and summarize, for `ops config`.
    pub fn validate(&self) -> Result<String, ConfigError> {
        let config = self.load_config()?;
        Ok(format!(
            "Config OK - {} client(s), {} host(s) loaded from {}",
            config.clients.len(),
            config.host_count(),
            config.config_path.display()
        ))
    }

    pub fn ensure_config_parent(&self) -> Result<()> {
        if let Some(parent) = self.config_file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }
        Ok(())
    }
}

pub fn load_config_from(path: &Path) -> Result<OpsConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config = parse_config(&content, ConfigFormat::from_path(path), path)?;
    tracing::info!(
        "Loaded config v{}: {} clients / {} hosts from {:?}",
        config.version,
        config.clients.len(),
        config.host_count(),
        path
    );
    Ok(config)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_YAML: &str = r#"
version: 1
defaults:
  ssh_options:
    - "-o"
    - "ConnectTimeout=5"
clients:
  acme:
    description: "Acme Corp"
    hosts:
      - name: "acme-prod"
        host: "prod.acme.io"
        user: "deploy"
        port: 22
        tags: ["prod", "docker", "django"]
        compose_path: "/srv/acme"
      - name: "acme-stg"
        host: "stg.acme.io"
        user: "ubuntu"
        port: 2222
        tags: ["stg", "docker"]
  personal:
    description: "Personal"
    hosts:
      - name: "myserver"
        host: "my.server.dev"
        user: "user"
        tags: ["prod", "personal"]
        ssh_alias: "myalias"
"#;

    pub(crate) fn sample_config() -> OpsConfig {
        parse_config(SAMPLE_YAML, ConfigFormat::Yaml, Path::new("hosts.yaml"))
            .expect("sample config parses")
    }

    const DUPLICATE_YAML: &str = r#"
version: 1
clients:
  alpha:
    hosts:
      - name: "shared"
        host: "a.example.com"
  beta:
    hosts:
      - name: "shared"
        host: "b.example.com"
"#;

    #[test]
    fn loads_clients_in_document_order() {
        let config = sample_config();
        let names: Vec<_> = config.clients.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["acme", "personal"]);
        assert_eq!(config.host_count(), 3);
        assert_eq!(config.ssh_defaults.options, ["-o", "ConnectTimeout=5"]);
    }

    #[test]
    fn host_defaults_are_applied() {
        let text = "version: 1\nclients:\n  test:\n    hosts:\n      - name: t1\n        host: t1.example.com\n";
        let config = parse_config(text, ConfigFormat::Yaml, Path::new("x.yaml")).unwrap();
        let host = config.resolve_host("t1").unwrap();
        assert_eq!(host.user, "root");
        assert_eq!(host.port, 22);
        assert!(host.tags.is_empty());
        assert_eq!(host.client, "test");
        assert_eq!(config.ssh_defaults, SshDefaults::default());
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = parse_config("version: 99\nclients: {}\n", ConfigFormat::Yaml, Path::new("x"))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnsupportedVersion { found: 99, .. }
        ));
    }

    #[test]
    fn rejects_host_without_address() {
        let text = "version: 1\nclients:\n  broken:\n    hosts:\n      - name: no-host-field\n";
        let err = parse_config(text, ConfigFormat::Yaml, Path::new("x")).unwrap_err();
        assert!(err.to_string().contains("no-host-field"));
    }

    #[test]
    fn rejects_host_without_name() {
        let text = "version: 1\nclients:\n  broken:\n    hosts:\n      - host: h.example.com\n";
        let err = parse_config(text, ConfigFormat::Yaml, Path::new("x")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingName { .. }));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = parse_config("clients: [unclosed", ConfigFormat::Yaml, Path::new("x"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn parses_toml_configs() {
        let text = r#"
version = 1

[defaults]
ssh_options = ["-o", "BatchMode=yes"]

[clients.acme]
description = "Acme"

[[clients.acme.hosts]]
name = "web"
host = "web.acme.io"
tags = ["docker"]
docker_user = "deployer"
"#;
        let config = parse_config(text, ConfigFormat::Toml, Path::new("hosts.toml")).unwrap();
        let host = config.resolve_host("acme:web").unwrap();
        assert_eq!(host.docker_user.as_deref(), Some("deployer"));
        assert_eq!(config.ssh_defaults.options, ["-o", "BatchMode=yes"]);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/hosts.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a/hosts.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a/hosts")), ConfigFormat::Yaml);
    }

    #[test]
    fn resolves_unique_bare_name() {
        let config = sample_config();
        let host = config.resolve_host("acme-stg").unwrap();
        assert_eq!(host.port, 2222);
        assert_eq!(host.display(), "acme:acme-stg");
    }

    #[test]
    fn resolves_qualified_name() {
        let config = sample_config();
        let host = config.resolve_host("personal:myserver").unwrap();
        assert_eq!(host.ssh_alias.as_deref(), Some("myalias"));
    }

    #[test]
    fn ambiguous_bare_name_names_all_clients() {
        let config = parse_config(DUPLICATE_YAML, ConfigFormat::Yaml, Path::new("x")).unwrap();
        let err = config.resolve_host("shared").unwrap_err();
        assert_eq!(
            err,
            ResolveError::Ambiguous {
                name: "shared".to_string(),
                clients: vec!["alpha".to_string(), "beta".to_string()],
            }
        );
        assert_eq!(config.resolve_host("beta:shared").unwrap().host, "b.example.com");
    }

    #[test]
    fn unknown_and_not_found_under_client_are_distinct() {
        let config = sample_config();
        assert_eq!(
            config.resolve_host("nope").unwrap_err(),
            ResolveError::Unknown("nope".to_string())
        );
        assert!(matches!(
            config.resolve_host("ghost:acme-prod").unwrap_err(),
            ResolveError::NotFoundUnderClient { .. }
        ));
        assert!(matches!(
            config.resolve_host("acme:nope").unwrap_err(),
            ResolveError::NotFoundUnderClient { .. }
        ));
    }

    #[test]
    fn search_matches_name_address_client_and_tags() {
        let config = sample_config();
        let names = |q: &str| -> Vec<String> {
            config.search_hosts(q).iter().map(|h| h.name.clone()).collect()
        };
        assert_eq!(names("STG"), ["acme-stg"]);
        assert_eq!(names("server.dev"), ["myserver"]);
        assert_eq!(names("acme"), ["acme-prod", "acme-stg"]);
        assert_eq!(names("django"), ["acme-prod"]);
        assert_eq!(names("prod"), ["acme-prod", "myserver"]);
        assert!(names("zzz").is_empty());
    }

    #[test]
    fn load_config_from_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_from(&dir.path().join("hosts.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
        assert!(err.to_string().contains(ENV_CONFIG_VAR));
    }

    #[test]
    fn load_config_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.yaml");
        fs::write(&path, SAMPLE_YAML).unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.clients.len(), 2);
    }
}
