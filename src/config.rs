use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: default_base_url(),
            key: None,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            width: 900,
            height: 700,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        if config_path.exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => eprintln!("Error parsing config.toml: {}. Using defaults.", e),
                },
                Err(e) => eprintln!("Error reading config.toml: {}. Using defaults.", e),
            }
        } else if let Some(parent) = config_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        Config::default()
    }

    /// API key resolution: environment first, config file second.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }
        self.api
            .key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
            .cloned()
    }

    pub fn get_config_path() -> PathBuf {
        Self::get_config_dir().join("config.toml")
    }

    pub fn get_config_dir() -> PathBuf {
        if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config/gembar")
        } else {
            PathBuf::from(".")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePref {
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Zephyr,
    Puck,
    Charon,
    Kore,
    Fenrir,
}

impl Voice {
    pub const ALL: [Voice; 5] = [
        Voice::Zephyr,
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
    ];
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Voice::Zephyr => "Zephyr",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextModel {
    #[serde(rename = "gemini-2.5-flash")]
    Flash,
    #[serde(rename = "gemini-2.5-flash-lite")]
    FlashLite,
}

impl TextModel {
    pub const ALL: [TextModel; 2] = [TextModel::Flash, TextModel::FlashLite];

    pub fn id(&self) -> &'static str {
        match self {
            TextModel::Flash => "gemini-2.5-flash",
            TextModel::FlashLite => "gemini-2.5-flash-lite",
        }
    }
}

impl fmt::Display for TextModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// User preferences, persisted as a single JSON blob at a fixed path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub system_prompt: String,
    pub voice: Voice,
    pub text_model: TextModel,
    pub theme: ThemePref,
    pub send_on_enter: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            system_prompt: "You are a helpful assistant.".to_string(),
            voice: Voice::Zephyr,
            text_model: TextModel::Flash,
            theme: ThemePref::Dark,
            send_on_enter: true,
        }
    }
}

/// Partial settings update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub system_prompt: Option<String>,
    pub voice: Option<Voice>,
    pub text_model: Option<TextModel>,
    pub theme: Option<ThemePref>,
    pub send_on_enter: Option<bool>,
}

impl Settings {
    pub fn settings_path() -> PathBuf {
        Config::get_config_dir().join("settings.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::settings_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("Error parsing settings: {}. Using defaults.", e);
                    Settings::default()
                }
            },
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    eprintln!("Error reading settings: {}. Using defaults.", e);
                }
                Settings::default()
            }
        }
    }

    /// Merges a partial update and persists synchronously; persistence
    /// failures are logged, not surfaced.
    pub fn update(&mut self, patch: SettingsPatch) {
        self.update_at(patch, &Self::settings_path());
    }

    pub fn update_at(&mut self, patch: SettingsPatch, path: &Path) {
        self.apply(patch);
        self.persist(path);
    }

    fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.system_prompt {
            self.system_prompt = v;
        }
        if let Some(v) = patch.voice {
            self.voice = v;
        }
        if let Some(v) = patch.text_model {
            self.text_model = v;
        }
        if let Some(v) = patch.theme {
            self.theme = v;
        }
        if let Some(v) = patch.send_on_enter {
            self.send_on_enter = v;
        }
    }

    fn persist(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    eprintln!("Error writing settings: {}", e);
                }
            }
            Err(e) => eprintln!("Error serializing settings: {}", e),
        }
    }
}
