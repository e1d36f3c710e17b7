use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Config file not found at {}\nCopy an example hosts.yaml there or set the OPS_CONFIG environment variable.",
        .path.display()
    )]
    NotFound { path: PathBuf },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported config version {found}. Expected {expected}.")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Host under client '{client}' is missing required field 'name'.")]
    MissingName { client: String },

    #[error("Host '{host}' under client '{client}' is missing 'host' field.")]
    MissingAddress { client: String, host: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Host '{host}' not found under client '{client}'.")]
    NotFoundUnderClient { client: String, host: String },

    #[error("{}", ambiguous_message(.name, .clients))]
    Ambiguous { name: String, clients: Vec<String> },

    #[error("Unknown host '{0}'. Run `ops ls` to see available hosts.")]
    Unknown(String),
}

fn ambiguous_message(name: &str, clients: &[String]) -> String {
    let mut message = format!(
        "Ambiguous host name '{}' exists in clients: {}.",
        name,
        clients.join(", ")
    );
    if let Some(first) = clients.first() {
        message.push_str(&format!(" Use client:host format (e.g. '{}:{}').", first, name));
    }
    message
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Unknown action: {0}")]
    InvalidAction(String),

    #[error("Action '{action}' requires the '{parameter}' parameter")]
    MissingParameter {
        action: &'static str,
        parameter: &'static str,
    },

    #[error("Action registry and command builder disagree (missing builders: {missing:?}, unregistered builders: {unregistered:?})")]
    RegistryMismatch {
        missing: Vec<String>,
        unregistered: Vec<String>,
    },
}
