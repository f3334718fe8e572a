use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::source::DEFAULT_PER_PAGE;

const APP_DIR_NAME: &str = "snapview";
const SETTINGS_FILE_NAME: &str = "settings.toml";
const FAVORITES_FILE_NAME: &str = "favorites.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Unsplash,
    Backend,
}

impl SourceKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unsplash" => Some(Self::Unsplash),
            "backend" | "snapsync" => Some(Self::Backend),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source: SourceKind,
    pub unsplash_access_key: String,
    pub api_base_url: String,
    pub api_token: String,
    /// Account name of the stored backend session, shown in the menu.
    pub api_username: String,
    pub download_dir: Option<PathBuf>,
    pub per_page: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            unsplash_access_key: String::new(),
            api_base_url: String::new(),
            api_token: String::new(),
            api_username: String::new(),
            download_dir: None,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Settings {
    /// Settings file plus environment overrides. Never fails: problems are logged.
    pub fn load() -> Self {
        let mut settings = settings_file_path()
            .map(|path| Self::load_file(&path))
            .unwrap_or_default();
        settings.apply_env(|key| env::var(key).ok());
        settings
    }

    pub fn load_file(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        match Self::parse(&text) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("ignoring settings file {}: {err:#}", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("settings TOML parsing failed")
    }

    pub fn apply_env(&mut self, mut lookup: impl FnMut(&str) -> Option<String>) {
        let mut non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(key) = non_empty("UNSPLASH_ACCESS_KEY") {
            self.unsplash_access_key = key;
        }
        if let Some(url) = non_empty("SNAPVIEW_API_BASE_URL") {
            self.api_base_url = url;
        }
        if let Some(token) = non_empty("SNAPVIEW_API_TOKEN") {
            self.api_token = token;
        }
        if let Some(dir) = non_empty("SNAPVIEW_DOWNLOAD_DIR") {
            self.download_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn is_signed_in(&self) -> bool {
        !self.api_token.trim().is_empty()
    }

    pub fn sign_in(&mut self, access_token: &str, username: &str) {
        self.api_token = access_token.trim().to_string();
        self.api_username = username.trim().to_string();
        self.source = SourceKind::Backend;
    }

    pub fn sign_out(&mut self) {
        self.api_token.clear();
        self.api_username.clear();
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(default_download_dir)
            .unwrap_or_else(env::temp_dir)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create directory {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(self).context("Could not encode settings")?;
        fs::write(path, text)
            .with_context(|| format!("Could not write settings file {}", path.display()))
    }
}

fn default_download_dir() -> Option<PathBuf> {
    let home = env::var_os("HOME").or_else(|| env::var_os("USERPROFILE"))?;
    let downloads = PathBuf::from(home).join("Downloads");
    downloads.is_dir().then_some(downloads)
}

pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join(APP_DIR_NAME));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join(APP_DIR_NAME)
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join(APP_DIR_NAME));
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join(APP_DIR_NAME))
    }
}

pub fn settings_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(SETTINGS_FILE_NAME))
}

pub fn favorites_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(FAVORITES_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_toml_roundtrip() {
        let settings = Settings {
            source: SourceKind::Backend,
            unsplash_access_key: "key".to_string(),
            api_base_url: "https://api.example.com".to_string(),
            api_token: "token".to_string(),
            api_username: "ana".to_string(),
            download_dir: Some(PathBuf::from("/tmp/pictures")),
            per_page: 30,
        };
        let text = toml::to_string_pretty(&settings).expect("should encode");
        assert_eq!(Settings::parse(&text).expect("should parse"), settings);
    }

    #[test]
    fn missing_keys_use_defaults() {
        let settings = Settings::parse("source = \"backend\"\n").expect("should parse");
        assert_eq!(settings.source, SourceKind::Backend);
        assert_eq!(settings.per_page, DEFAULT_PER_PAGE);
        assert!(settings.download_dir.is_none());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!(
            "snapview-settings-test-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        fs::write(&path, "source = [unterminated").expect("should write temp settings");
        assert_eq!(Settings::load_file(&path), Settings::default());
        let _ = fs::remove_file(path);
    }

    #[test]
    fn env_overrides_non_empty_values() {
        let mut settings = Settings {
            unsplash_access_key: "from-file".to_string(),
            ..Settings::default()
        };
        settings.apply_env(|key| match key {
            "UNSPLASH_ACCESS_KEY" => Some("from-env".to_string()),
            "SNAPVIEW_API_TOKEN" => Some("   ".to_string()),
            "SNAPVIEW_DOWNLOAD_DIR" => Some("/data/downloads".to_string()),
            _ => None,
        });
        assert_eq!(settings.unsplash_access_key, "from-env");
        assert_eq!(settings.api_token, "");
        assert_eq!(settings.download_dir(), PathBuf::from("/data/downloads"));
    }

    #[test]
    fn sign_in_and_out_round_trip_through_toml() {
        let mut settings = Settings::default();
        assert!(!settings.is_signed_in());
        settings.sign_in(" tok ", "ana");
        assert!(settings.is_signed_in());
        assert_eq!(settings.source, SourceKind::Backend);

        let text = toml::to_string_pretty(&settings).expect("should encode");
        let restored = Settings::parse(&text).expect("should parse");
        assert_eq!(restored.api_token, "tok");
        assert_eq!(restored.api_username, "ana");

        settings.sign_out();
        assert!(!settings.is_signed_in());
        assert!(settings.api_username.is_empty());
    }

    #[test]
    fn source_kind_parses_aliases() {
        assert_eq!(SourceKind::parse(" Unsplash "), Some(SourceKind::Unsplash));
        assert_eq!(SourceKind::parse("snapsync"), Some(SourceKind::Backend));
        assert_eq!(SourceKind::parse("flickr"), None);
    }
}
