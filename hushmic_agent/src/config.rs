use hushmic_protocol::ApplicationKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const APP_DIR: &str = "hushmic";
pub const DEFAULT_DEBUG_PORT: u16 = 9222;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings path has no parent directory: {0}")]
    NoParent(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSettings {
    pub enabled: bool,
    pub enabled_apps: BTreeSet<ApplicationKind>,
    pub discord: DiscordSettings,
    pub debug_port: u16,
    pub poll_interval_ms: u64,
    pub running_refresh_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscordSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            enabled_apps: ApplicationKind::ALL.into_iter().collect(),
            discord: DiscordSettings::default(),
            debug_port: DEFAULT_DEBUG_PORT,
            poll_interval_ms: 300,
            running_refresh_ms: 2000,
        }
    }
}

impl AgentSettings {
    /// `DISCORD_CLIENT_ID` / `DISCORD_CLIENT_SECRET` win over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(id) = non_empty_env("DISCORD_CLIENT_ID") {
            self.discord.client_id = Some(id);
        }
        if let Some(secret) = non_empty_env("DISCORD_CLIENT_SECRET") {
            self.discord.client_secret = Some(secret);
        }
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn default_settings_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_DIR).join("settings.json")
}

pub fn default_token_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(APP_DIR).join("tokens")
}

/// Source of the enabled-application set, consulted on every activation.
pub trait EnabledApps: Send + Sync {
    fn enabled_apps(&self) -> BTreeSet<ApplicationKind>;
}

impl EnabledApps for BTreeSet<ApplicationKind> {
    fn enabled_apps(&self) -> BTreeSet<ApplicationKind> {
        self.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_default(&self) -> AgentSettings {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<AgentSettings>(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "settings unreadable, using defaults");
                    AgentSettings::default()
                }
            },
            Err(_) => AgentSettings::default(),
        }
    }

    pub fn save(&self, settings: &AgentSettings) -> Result<(), SettingsError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| SettingsError::NoParent(self.path.clone()))?;
        fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, contents).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut AgentSettings)) -> Result<AgentSettings, SettingsError> {
        let mut settings = self.load_or_default();
        f(&mut settings);
        self.save(&settings)?;
        Ok(settings)
    }
}

impl EnabledApps for SettingsStore {
    fn enabled_apps(&self) -> BTreeSet<ApplicationKind> {
        self.load_or_default().enabled_apps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be set")
            .as_nanos();
        std::env::temp_dir()
            .join(format!("hushmic-{name}-{nanos}"))
            .join("settings.json")
    }

    #[test]
    fn defaults_enable_every_app() {
        let settings = AgentSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.enabled_apps.len(), ApplicationKind::ALL.len());
        assert_eq!(settings.debug_port, 9222);
        assert!(settings.discord.client_id.is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: AgentSettings =
            serde_json::from_str(r#"{ "enabled_apps": ["zoom", "google_meet"] }"#).unwrap();
        assert!(parsed.enabled);
        assert_eq!(
            parsed.enabled_apps,
            [ApplicationKind::Zoom, ApplicationKind::GoogleMeet].into_iter().collect()
        );
        assert_eq!(parsed.poll_interval_ms, 300);
    }

    #[test]
    fn enabled_apps_are_reread_after_update() {
        let store = SettingsStore::new(temp_file("settings"));
        assert_eq!(store.enabled_apps().len(), ApplicationKind::ALL.len());

        store
            .update(|s| {
                s.enabled_apps.remove(&ApplicationKind::Slack);
            })
            .unwrap();
        assert!(!store.enabled_apps().contains(&ApplicationKind::Slack));

        let _ = fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let store = SettingsStore::new(temp_file("corrupt"));
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load_or_default(), AgentSettings::default());
        let _ = fs::remove_dir_all(store.path().parent().unwrap());
    }
}
