use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeMode {
    Light,
    Dark,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Locale {
    En,
    Ko,
}

impl Locale {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ko => "ko",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub theme_mode: ThemeMode,
    pub locale: Locale,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme_mode: ThemeMode::System,
            locale: Locale::En,
        }
    }
}

impl Settings {
    /// Resolves the `System` mode against the host preference.
    pub fn effective_theme(&self, system_prefers_dark: bool) -> ThemeMode {
        match self.theme_mode {
            ThemeMode::System => {
                if system_prefers_dark {
                    ThemeMode::Dark
                } else {
                    ThemeMode::Light
                }
            }
            mode => mode,
        }
    }

    /// Missing or unreadable settings fall back to defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "resetting corrupt settings");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|err| AppError::Io(err.to_string()))?;
        Ok(())
    }
}
