use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::DEFAULT_MODEL;
use crate::translations::{DEFAULT_BATCH_SIZE, DEFAULT_DELAY};

const SETTINGS_DIR_NAME: &str = ".po-translator";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: String,
    pub batch_size: usize,
    pub delay: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            delay: DEFAULT_DELAY,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    translate: Option<TranslateSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TranslateSettings {
    model: Option<String>,
    batch_size: Option<usize>,
    delay_secs: Option<f64>,
}

/// Loads settings from, in increasing precedence: `settings.toml` and
/// `settings.local.toml` in the working directory, the same pair under
/// `$HOME/.po-translator`, then `extra_path` which must exist.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(home) = home_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.is_file() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings
                .merge(parsed)
                .with_context(|| format!("invalid settings: {}", path.display()))?;
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) -> Result<()> {
        let Some(translate) = incoming.translate else {
            return Ok(());
        };
        if let Some(model) = translate.model
            && !model.trim().is_empty()
        {
            self.model = model.trim().to_string();
        }
        if let Some(batch_size) = translate.batch_size {
            if batch_size == 0 {
                return Err(anyhow!("translate.batch_size must be greater than zero"));
            }
            self.batch_size = batch_size;
        }
        if let Some(secs) = translate.delay_secs {
            self.delay = parse_delay(secs)?;
        }
        Ok(())
    }
}

pub fn parse_delay(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("delay must be a non-negative number of seconds (got {})", secs))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().and_then(|home| {
        let home = home.trim();
        if home.is_empty() {
            None
        } else {
            Some(Path::new(home).join(SETTINGS_DIR_NAME))
        }
    })
}
