use crate::error::PlatformError;
use crate::model::{QueueMap, QueueTarget};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use url::Url;

const QUEUES_PATH: &str = "api/confd/1.1/queues?recurse=false";
const AGENTS_PATH: &str = "api/confd/1.1/agents?recurse=false";
const EXTENSIONS_PATH: &str = "api/confd/1.1/extensions?recurse=false";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent record from the platform directory, trimmed to what deployment
/// reporting uses.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub number: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
}

/// Extension record from the platform directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExtensionEntry {
    pub exten: String,
    pub context: String,
}

/// Authenticated client for the telephony platform's configuration API.
/// All calls are blocking; deployment is a batch operation.
pub struct PlatformClient {
    http: reqwest::blocking::Client,
    base: Url,
    token: String,
}

impl PlatformClient {
    pub fn new(base: Url, token: impl Into<String>) -> Result<Self, PlatformError> {
        Self::with_options(base, token, false)
    }

    /// `accept_invalid_certs` disables TLS verification for installations
    /// running on self-signed certificates.
    pub fn with_options(
        base: Url,
        token: impl Into<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| PlatformError::Transport {
                url: base.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            base,
            token: token.into(),
        })
    }

    /// Convenience constructor from a bare hostname, HTTPS assumed.
    pub fn for_host(
        host: &str,
        token: impl Into<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self, PlatformError> {
        let raw = format!("https://{host}");
        let base = Url::parse(&raw).map_err(|e| PlatformError::Transport {
            url: raw,
            message: e.to_string(),
        })?;
        Self::with_options(base, token, accept_invalid_certs)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn agents(&self) -> Result<Vec<Agent>, PlatformError> {
        let payload = self.get_json(AGENTS_PATH)?;
        Ok(parse_items(&payload))
    }

    pub fn extensions(&self) -> Result<Vec<ExtensionEntry>, PlatformError> {
        let payload = self.get_json(EXTENSIONS_PATH)?;
        Ok(parse_items(&payload))
    }

    fn get_json(&self, path: &str) -> Result<Value, PlatformError> {
        let url = self.base.join(path).map_err(|e| PlatformError::Transport {
            url: format!("{}{path}", self.base),
            message: e.to_string(),
        })?;
        let response = self
            .http
            .get(url.clone())
            .header("X-Auth-Token", &self.token)
            .send()
            .map_err(|e| PlatformError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.json().map_err(|e| PlatformError::Payload {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// Produces the queue-resolution table the compiler consumes. The platform
/// client is the production source; tests and offline tooling substitute
/// their own.
pub trait QueueSource {
    fn queues(&self) -> Result<QueueMap, PlatformError>;
}

impl QueueSource for PlatformClient {
    /// All queues known to the platform, keyed by queue name.
    fn queues(&self) -> Result<QueueMap, PlatformError> {
        let payload = self.get_json(QUEUES_PATH)?;
        Ok(parse_queue_items(&payload))
    }
}

/// Parse the platform's queue-list payload (`{"items": [...]}`) into a
/// `QueueMap`. Items without a name, and items that fail to decode, are
/// skipped with a warning; a missing or empty list yields an empty map.
pub fn parse_queue_items(payload: &Value) -> QueueMap {
    let mut queues = QueueMap::new();
    let Some(items) = payload.get("items").and_then(Value::as_array) else {
        return queues;
    };
    for item in items {
        let Some(name) = item.get("name").and_then(Value::as_str) else {
            tracing::warn!("skipping queue item without a name");
            continue;
        };
        match serde_json::from_value::<QueueTarget>(item.clone()) {
            Ok(target) => {
                queues.insert(name.to_string(), target);
            }
            Err(err) => {
                tracing::warn!(queue = name, error = %err, "skipping malformed queue item");
            }
        }
    }
    queues
}

fn parse_items<T: serde::de::DeserializeOwned>(payload: &Value) -> Vec<T> {
    let Some(items) = payload.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Reload/validate surface of the call-processing engine. Deployment only
/// needs these two operations; tests substitute a fake.
pub trait CallEngine {
    /// Ask the engine about the dialplan file, returning its warnings.
    fn validate_dialplan(&self, path: &Path) -> Result<Vec<String>, PlatformError>;

    /// Reload dialplan configuration. `Ok(false)` means the engine was
    /// reachable but refused.
    fn reload(&self) -> Result<bool, PlatformError>;
}

/// `CallEngine` over the local `asterisk -rx` console.
pub struct AsteriskCli {
    binary: String,
}

impl Default for AsteriskCli {
    fn default() -> Self {
        Self::new()
    }
}

impl AsteriskCli {
    pub fn new() -> Self {
        Self {
            binary: "asterisk".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, command: &str) -> Result<std::process::Output, PlatformError> {
        Command::new(&self.binary)
            .arg("-rx")
            .arg(command)
            .output()
            .map_err(|e| {
                PlatformError::Engine(format!("failed to run {} -rx '{command}': {e}", self.binary))
            })
    }
}

impl CallEngine for AsteriskCli {
    fn validate_dialplan(&self, path: &Path) -> Result<Vec<String>, PlatformError> {
        let output = self.run(&format!("dialplan show {}", path.display()))?;
        let mut warnings = Vec::new();
        if !output.status.success() {
            warnings.push(format!(
                "dialplan check exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(warnings)
    }

    fn reload(&self) -> Result<bool, PlatformError> {
        let output = self.run("dialplan reload")?;
        if output.status.success() {
            tracing::info!("dialplan reloaded");
            Ok(true)
        } else {
            tracing::warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "dialplan reload refused"
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn queue_payload_parses_with_defaults() {
        let payload = json!({
            "total": 2,
            "items": [
                {
                    "id": 7,
                    "name": "sales",
                    "context": "queue-ctx",
                    "number": "600",
                    "strategy": "ringall",
                    "timeout": 45,
                    "music_on_hold": "default"
                },
                {"name": "support"}
            ]
        });
        let queues = parse_queue_items(&payload);
        assert_eq!(queues.len(), 2);
        assert_eq!(
            queues["sales"],
            QueueTarget {
                context: "queue-ctx".to_string(),
                number: "600".to_string(),
                strategy: "ringall".to_string(),
                timeout: 45,
            }
        );
        // Missing fields fall back to platform defaults.
        assert_eq!(queues["support"].strategy, "leastrecent");
        assert_eq!(queues["support"].timeout, 20);
    }

    #[test]
    fn queue_payload_skips_nameless_and_malformed_items() {
        let payload = json!({
            "items": [
                {"context": "orphan"},
                {"name": "broken", "timeout": "soon"},
                {"name": "ok"}
            ]
        });
        let queues = parse_queue_items(&payload);
        assert_eq!(queues.len(), 1);
        assert!(queues.contains_key("ok"));
    }

    #[test]
    fn empty_or_missing_items_yield_an_empty_map() {
        assert!(parse_queue_items(&json!({})).is_empty());
        assert!(parse_queue_items(&json!({"items": []})).is_empty());
        assert!(parse_queue_items(&json!({"items": "nope"})).is_empty());
    }

    #[test]
    fn agent_and_extension_payloads_parse() {
        let agents: Vec<Agent> = parse_items(&json!({
            "items": [{"number": "1001", "firstname": "Ada"}]
        }));
        assert_eq!(
            agents,
            vec![Agent {
                number: "1001".to_string(),
                firstname: "Ada".to_string(),
                lastname: String::new(),
            }]
        );

        let extensions: Vec<ExtensionEntry> = parse_items(&json!({
            "items": [
                {"exten": "600", "context": "queue-ctx"},
                {"exten": "601"}
            ]
        }));
        // The second item lacks a context and is dropped.
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0].exten, "600");
    }
}
