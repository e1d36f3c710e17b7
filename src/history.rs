use std::fs;
use std::path::PathBuf;

pub const MAX_RECENT: usize = 5;

/// Most-recently-used host display names, newest first.
///
/// Every failure degrades silently: a missing or corrupt file reads as an
/// empty list and write errors are only logged.
#[derive(Debug, Clone)]
pub struct RecentHosts {
    path: PathBuf,
}

impl RecentHosts {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Vec<String> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };

        match serde_json::from_str::<Vec<String>>(&content) {
            Ok(mut entries) => {
                entries.truncate(MAX_RECENT);
                entries
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable history file {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Move `display` to the front, dropping duplicates and the overflow.
    pub fn record(&self, display: &str) {
        let mut recent = self.load();
        recent.retain(|entry| entry != display);
        recent.insert(0, display.to_string());
        recent.truncate(MAX_RECENT);

        if let Err(e) = self.save(&recent) {
            tracing::warn!("Failed to write history file {:?}: {}", self.path, e);
        }
    }

    fn save(&self, entries: &[String]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string(entries)?)?;
        Ok(())
    }
}
