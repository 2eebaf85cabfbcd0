use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Queue name -> routing attributes, materialized by the platform client
/// (or read from a file) and handed to the compiler.
pub type QueueMap = IndexMap<String, QueueTarget>;

fn default_tenant() -> String {
    "default".to_string()
}

fn default_languages() -> Vec<Language> {
    vec![Language {
        code: "en-US".to_string(),
        voice: "Joanna".to_string(),
    }]
}

fn default_timeout_sec() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_call_duration() -> u32 {
    300
}

fn default_recording_format() -> String {
    "wav".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_queue_strategy() -> String {
    "leastrecent".to_string()
}

fn default_queue_timeout() -> u32 {
    20
}

/// A tenant-scoped IVR definition: the menu graph plus everything needed to
/// render it (prompts, languages, hours, recording policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// Dialplan context answered calls enter; empty means `dp-ivr-{id}`,
    /// filled in by [`Flow::normalize`].
    #[serde(default)]
    pub entry_context: String,
    #[serde(default)]
    pub tts_backend: TtsBackend,
    /// First entry is the default language.
    #[serde(default = "default_languages")]
    pub languages: Vec<Language>,
    /// prompt id -> language code -> spoken text.
    #[serde(default)]
    pub prompts: IndexMap<String, IndexMap<String, String>>,
    /// menu id -> menu; insertion order is emission order.
    #[serde(default)]
    pub menus: IndexMap<String, Menu>,
    /// Applied when an option routes out of the flow (queue, extension,
    /// voicemail, transfer).
    #[serde(default)]
    pub recording: RecordingPolicy,
    /// Applied once at call entry.
    #[serde(default)]
    pub call_recording: RecordingPolicy,
    #[serde(default)]
    pub business_hours: Option<BusinessHours>,
    /// Mailbox used by menu fallbacks and the after-hours path when no
    /// menu-specific target applies.
    #[serde(default)]
    pub voicemail_fallback: Option<String>,
    /// Advisory ceiling in seconds; not enforced by the compiler.
    #[serde(default = "default_max_call_duration")]
    pub max_call_duration: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Fill in derived defaults after deserialization: the entry context and
    /// a non-empty language list.
    pub fn normalize(&mut self) {
        if self.entry_context.is_empty() {
            self.entry_context = format!("dp-ivr-{}", self.id);
        }
        if self.languages.is_empty() {
            self.languages = default_languages();
        }
    }

    /// Code of the first configured language.
    pub fn default_language(&self) -> &str {
        self.languages
            .first()
            .map(|l| l.code.as_str())
            .unwrap_or("en-US")
    }

    /// Ids of menus that declare no parent, in insertion order.
    pub fn root_menu_ids(&self) -> Vec<&str> {
        self.menus
            .iter()
            .filter(|(_, menu)| menu.parent_menu.is_none())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Highest `max_retries` across all menus; seeds the call-scoped retry
    /// ceiling variable.
    pub fn retry_ceiling(&self) -> u32 {
        self.menus
            .values()
            .map(|m| m.max_retries)
            .max()
            .unwrap_or_else(default_max_retries)
    }

    /// Refresh `updated_at`; call sites persist the flow right after.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One decision point in the call tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Menu {
    /// Prompt id played on entry; must exist in `Flow.prompts`.
    pub prompt: String,
    /// Seconds to wait for input after the prompt.
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u32,
    /// Timeout/invalid cycles allowed before the fallback fires.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Input token (digit or keyword) -> option.
    #[serde(default)]
    pub options: IndexMap<String, MenuOption>,
    /// Absent means "repeat the prompt".
    #[serde(default)]
    pub fallback_action: Option<FallbackAction>,
    /// Back-reference used only to locate the root; the flow owns all menus
    /// flat.
    #[serde(default)]
    pub parent_menu: Option<String>,
}

/// What pressing an option key does. Closed set; each case carries only its
/// required fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MenuOption {
    /// Descend into another menu of this flow.
    Menu { menu_ref: String },
    /// Hand the call to a queue; resolved against the queue map at compile
    /// time.
    Queue { queue_ref: String },
    /// Opaque pass-through to an external dialplan location.
    Extension { context: String, extension: String },
    /// Route to a mailbox; `context` defaults to the flow tenant.
    Voicemail {
        voicemail_box: String,
        #[serde(default)]
        context: Option<String>,
    },
    /// Play a closing prompt, then terminate.
    Hangup { prompt: String },
    /// Dial a destination directly.
    Transfer {
        destination: String,
        #[serde(default)]
        timeout: Option<u32>,
    },
    /// Switch the caller language and replay the current menu.
    Language { language: String },
}

impl MenuOption {
    /// Action tag as it appears in flow documents and trace lines.
    pub fn action(&self) -> &'static str {
        match self {
            MenuOption::Menu { .. } => "menu",
            MenuOption::Queue { .. } => "queue",
            MenuOption::Extension { .. } => "extension",
            MenuOption::Voicemail { .. } => "voicemail",
            MenuOption::Hangup { .. } => "hangup",
            MenuOption::Transfer { .. } => "transfer",
            MenuOption::Language { .. } => "language",
        }
    }
}

/// Where a menu sends the caller once its retry budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    Voicemail,
    Queue,
    Hangup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsBackend {
    #[default]
    Polly,
    Local,
}

/// A `(code, voice)` pair, e.g. `("en-US", "Joanna")`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Language {
    pub code: String,
    pub voice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_recording_format")]
    pub format: String,
}

impl Default for RecordingPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            format: default_recording_format(),
        }
    }
}

/// Weekly opening hours: weekday name (lowercase English) -> list of
/// `"HH:MM-HH:MM"` ranges, evaluated in `timezone`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub timeframes: IndexMap<String, Vec<String>>,
}

/// Routing attributes of one queue, as reported by the telephony platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueTarget {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub number: String,
    #[serde(default = "default_queue_strategy")]
    pub strategy: String,
    #[serde(default = "default_queue_timeout")]
    pub timeout: u32,
}
