//! Persistent Settings Management
//!
//! Handles saving/loading application state to disk.
//!
//! # Storage Locations
//! - Linux: `~/.config/hush/settings.json`
//! - Windows: `%APPDATA%\hush\hush\config\settings.json`
//! - macOS: `~/Library/Application Support/com.hush.hush/settings.json`

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use hush_dsp::{BackendKind, ParamValue};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{ArchiveConfig, EngineConfig};
use crate::error::{EngineError, EngineResult};

/// Named snapshot of one backend's parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreset {
    pub name: String,
    pub backend: BackendKind,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    pub created_at: DateTime<Utc>,
}

/// Root settings structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HushSettings {
    /// Backend installed at startup
    #[serde(default)]
    pub backend: BackendKind,

    /// Stored parameter values, per backend
    #[serde(default)]
    pub parameters: HashMap<BackendKind, BTreeMap<String, ParamValue>>,

    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub monitor_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub active_preset: Option<String>,
    #[serde(default)]
    pub user_presets: Vec<UserPreset>,
}

impl Default for HushSettings {
    fn default() -> Self {
        let mut parameters = HashMap::new();
        // Voice processing is opt-in per engine; start with suppression on
        parameters.insert(
            BackendKind::Preprocess,
            BTreeMap::from([("noise_reduction_enabled".to_string(), ParamValue::Bool(true))]),
        );
        parameters.insert(
            BackendKind::Apm,
            BTreeMap::from([("noise_reduction_enabled".to_string(), ParamValue::Bool(true))]),
        );

        Self {
            backend: BackendKind::default(),
            parameters,
            input_device: None,
            monitor_device: None,
            output_device: None,
            archive: ArchiveConfig::default(),
            active_preset: None,
            user_presets: Vec::new(),
        }
    }
}

impl HushSettings {
    /// Load settings from the platform config dir, or defaults if missing/corrupt
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("Could not determine config path, using default settings");
                Self::default()
            }
        }
    }

    /// Load settings from `path`, or defaults if missing/corrupt
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::File::open(path) {
                Ok(file) => match serde_json::from_reader(file) {
                    Ok(settings) => {
                        info!("Settings loaded from {:?}", path);
                        return settings;
                    }
                    Err(e) => error!("Failed to parse settings file: {}", e),
                },
                Err(e) => error!("Failed to open settings file: {}", e),
            }
        }

        info!("Using default settings");
        Self::default()
    }

    /// Save settings to the platform config dir
    pub fn save(&self) -> EngineResult<()> {
        let path = Self::config_path()
            .ok_or_else(|| EngineError::Settings("Could not determine config path".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(|e| EngineError::Settings(e.to_string()))?;

        info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Platform-specific settings file path
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "hush", "hush").map(|proj| proj.config_dir().join("settings.json"))
    }

    /// Stored parameters for `backend`, in name order
    pub fn parameters_for(&self, backend: BackendKind) -> impl Iterator<Item = (&str, ParamValue)> {
        self.parameters
            .get(&backend)
            .into_iter()
            .flat_map(|params| params.iter().map(|(name, value)| (name.as_str(), *value)))
    }

    /// Remember a parameter value for `backend`
    pub fn set_parameter(&mut self, backend: BackendKind, name: &str, value: ParamValue) {
        self.parameters
            .entry(backend)
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Snapshot the active backend's parameters under `name`, replacing any
    /// preset with the same name
    pub fn save_preset(&mut self, name: &str) {
        let preset = UserPreset {
            name: name.to_string(),
            backend: self.backend,
            parameters: self.parameters.get(&self.backend).cloned().unwrap_or_default(),
            created_at: Utc::now(),
        };
        self.user_presets.retain(|p| p.name != name);
        self.user_presets.push(preset);
        self.active_preset = Some(name.to_string());
    }

    /// Make a stored preset current; returns false if no such preset exists
    pub fn apply_preset(&mut self, name: &str) -> bool {
        let Some(preset) = self.user_presets.iter().find(|p| p.name == name).cloned() else {
            return false;
        };
        self.backend = preset.backend;
        self.parameters.insert(preset.backend, preset.parameters);
        self.active_preset = Some(preset.name);
        true
    }
}

impl From<&HushSettings> for EngineConfig {
    fn from(settings: &HushSettings) -> Self {
        let mut config = EngineConfig::speech();
        config.pipeline.backend = settings.backend;
        config.pipeline.archive = settings.archive.clone();
        config.input_device = settings.input_device.clone();
        config.monitor_device = settings.monitor_device.clone();
        config.output_device = settings.output_device.clone();
        config
    }
}
