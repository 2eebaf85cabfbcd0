use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_FLOWS_DIR: &str = "/var/lib/dialflow/flows";
pub const DEFAULT_SOUNDS_DIR: &str = "/var/lib/dialflow/sounds";
pub const DEFAULT_DIALPLAN_DIR: &str = "/etc/asterisk/extensions_extra.d";
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/dialflow/tts";

/// Filesystem layout of an installation. Every path has a conventional
/// default and a `DIALFLOW_*` environment override.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Flow documents, one YAML/JSON file per flow.
    pub flows_dir: PathBuf,
    /// Prompt audio, laid out as `{tenant}/{flow_id}/{prompt}_{lang}.wav`.
    pub sounds_dir: PathBuf,
    /// Where generated dialplan files land; the engine includes this
    /// directory.
    pub dialplan_dir: PathBuf,
    /// Content-addressed synthesis cache.
    pub cache_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            flows_dir: PathBuf::from(DEFAULT_FLOWS_DIR),
            sounds_dir: PathBuf::from(DEFAULT_SOUNDS_DIR),
            dialplan_dir: PathBuf::from(DEFAULT_DIALPLAN_DIR),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
        }
    }
}

/// Generated dialplan filename for one flow. The numeric prefix keeps the
/// engine's include ordering stable.
pub fn dialplan_file_name(flow_id: &str) -> String {
    format!("50-ivr-{flow_id}.conf")
}

impl Settings {
    /// Defaults with `DIALFLOW_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(dir) = std::env::var("DIALFLOW_FLOWS_DIR") {
            settings.flows_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DIALFLOW_SOUNDS_DIR") {
            settings.sounds_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DIALFLOW_DIALPLAN_DIR") {
            settings.dialplan_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("DIALFLOW_CACHE_DIR") {
            settings.cache_dir = PathBuf::from(dir);
        }
        settings
    }

    /// Generated dialplan file for one flow.
    pub fn dialplan_path(&self, flow_id: &str) -> PathBuf {
        self.dialplan_dir.join(dialplan_file_name(flow_id))
    }
}
