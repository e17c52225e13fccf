use serde::{Deserialize, Serialize};

use crate::common::types::AnyResult;
use crate::configs::*;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  #[serde(default)]
  pub generation: GenerationConfig,
  #[serde(default)]
  pub player: PlayerConfig,
  pub logging: Option<LoggingConfig>,
}

impl Config {
  /// Load `config.toml` when present, otherwise start from defaults, then
  /// apply environment overrides. Settings are immutable after this point.
  pub fn load() -> AnyResult<Self> {
    let mut config = if std::path::Path::new("config.toml").exists() {
      let config_str = std::fs::read_to_string("config.toml")?;
      if config_str.is_empty() {
        return Err("config.toml is empty".into());
      }
      toml::from_str(&config_str)?
    } else {
      Config::default()
    };

    config.apply_env();
    Ok(config)
  }

  fn apply_env(&mut self) {
    if let Ok(url) = std::env::var("OLLAMA_URL") {
      self.generation.base_url = url;
    }
    if let Ok(model) = std::env::var("OLLAMA_MODEL") {
      self.generation.model = model;
    }
    if let Ok(dir) = std::env::var("DOWNLOADS_DIR") {
      self.player.downloads_dir = dir;
    }
    if let Ok(level) = std::env::var("LOG_LEVEL") {
      let logging = self.logging.get_or_insert(LoggingConfig {
        level: None,
        filters: None,
      });
      logging.level = Some(level);
    }
  }
}
