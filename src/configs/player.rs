use serde::{Deserialize, Serialize};

/// Settings for the playback engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlayerConfig {
    /// Directory where downloaded audio files are cached, keyed by song id.
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: String,
    /// Whether the bot joins voice channels self-deafened.
    #[serde(default = "default_self_deaf")]
    pub self_deaf: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            downloads_dir: default_downloads_dir(),
            self_deaf: default_self_deaf(),
        }
    }
}

fn default_downloads_dir() -> String {
    "downloads".to_string()
}

fn default_self_deaf() -> bool {
    true
}
