//! Runtime settings with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/functree/functree.toml`
//! 3. Local config: an explicit file passed to [`Settings::load`]
//! 4. Environment variables: `FUNCTREE__<SECTION>__<KEY>`

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::RuntimeError;

/// Forest behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ForestSettings {
    /// Remove a detached subtree when it holds no handlers and no children
    pub collect_detached: bool,
    /// Fire an attached handler right away when it is registered on a root
    pub fire_attach_handlers_on_register: bool,
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            collect_detached: true,
            fire_attach_handlers_on_register: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PropertySettings {
    /// Invoke change callbacks even when a set stores an equal value
    pub notify_unchanged: bool,
}

impl Default for PropertySettings {
    fn default() -> Self {
        Self {
            notify_unchanged: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventSettings {
    /// Log every computed route at debug level
    pub log_routes: bool,
}

/// All runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub forest: ForestSettings,
    pub properties: PropertySettings,
    pub events: EventSettings,
}

/// Raw settings for layering; `None` means "not specified, keep the lower layer".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    forest: RawForestSettings,
    properties: RawPropertySettings,
    events: RawEventSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawForestSettings {
    collect_detached: Option<bool>,
    fire_attach_handlers_on_register: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawPropertySettings {
    notify_unchanged: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawEventSettings {
    log_routes: Option<bool>,
}

/// Get the XDG config directory for functree.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "functree").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("functree.toml"))
}

fn load_raw_settings(path: &Path) -> Result<RawSettings, RuntimeError> {
    let content = std::fs::read_to_string(path).map_err(|e| RuntimeError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| RuntimeError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            forest: ForestSettings {
                collect_detached: overlay
                    .forest
                    .collect_detached
                    .unwrap_or(self.forest.collect_detached),
                fire_attach_handlers_on_register: overlay
                    .forest
                    .fire_attach_handlers_on_register
                    .unwrap_or(self.forest.fire_attach_handlers_on_register),
            },
            properties: PropertySettings {
                notify_unchanged: overlay
                    .properties
                    .notify_unchanged
                    .unwrap_or(self.properties.notify_unchanged),
            },
            events: EventSettings {
                log_routes: overlay.events.log_routes.unwrap_or(self.events.log_routes),
            },
        }
    }

    /// Load settings with layered precedence.
    ///
    /// `local` is an optional extra TOML file; a missing file is skipped, an
    /// unparsable one is an error.
    pub fn load(local: Option<&Path>) -> Result<Self, RuntimeError> {
        let mut current = Self::default();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                current = current.merge_with(&load_raw_settings(&global_path)?);
            }
        }

        if let Some(local_path) = local {
            if local_path.exists() {
                current = current.merge_with(&load_raw_settings(local_path)?);
            }
        }

        Self::apply_env_overrides(current)
    }

    /// Load only one file on top of the defaults, ignoring global config and env.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        Ok(Self::default().merge_with(&load_raw_settings(path)?))
    }

    /// Apply FUNCTREE__* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, RuntimeError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("FUNCTREE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_bool("forest.collect_detached") {
            settings.forest.collect_detached = val;
        }
        if let Ok(val) = config.get_bool("forest.fire_attach_handlers_on_register") {
            settings.forest.fire_attach_handlers_on_register = val;
        }
        if let Ok(val) = config.get_bool("properties.notify_unchanged") {
            settings.properties.notify_unchanged = val;
        }
        if let Ok(val) = config.get_bool("events.log_routes") {
            settings.events.log_routes = val;
        }

        Ok(settings)
    }

    /// Serialize settings to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| RuntimeError::Config {
            message: format!("serialize: {}", e),
        })
    }

    /// Commented template listing every key with its default.
    pub fn template() -> String {
        r#"# functree configuration
# Location: ~/.config/functree/functree.toml
# Env override: FUNCTREE__<SECTION>__<KEY>, e.g. FUNCTREE__EVENTS__LOG_ROUTES=true

[forest]
# collect_detached = true
# fire_attach_handlers_on_register = false

[properties]
# notify_unchanged = true

[events]
# log_routes = false
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> RuntimeError {
    RuntimeError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_defaults_when_created_then_match_documented_values() {
        let settings = Settings::default();
        assert!(settings.forest.collect_detached);
        assert!(!settings.forest.fire_attach_handlers_on_register);
        assert!(settings.properties.notify_unchanged);
        assert!(!settings.events.log_routes);
    }

    #[test]
    fn given_partial_overlay_when_merging_then_unspecified_keys_are_kept() {
        let raw: RawSettings = toml::from_str("[events]\nlog_routes = true\n").unwrap();
        let merged = Settings::default().merge_with(&raw);
        assert!(merged.events.log_routes);
        assert!(merged.forest.collect_detached);
        assert!(merged.properties.notify_unchanged);
    }

    #[test]
    fn given_template_when_parsed_then_yields_defaults() {
        let raw: RawSettings = toml::from_str(&Settings::template()).unwrap();
        assert_eq!(Settings::default().merge_with(&raw), Settings::default());
    }

    #[test]
    fn given_settings_when_serialized_then_round_trips() {
        let mut settings = Settings::default();
        settings.forest.collect_detached = false;
        let text = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
