use crate::compiler::prompts;
use crate::error::SynthesisError;
use crate::model::{FallbackAction, Flow, MenuOption, TtsBackend};
use indexmap::IndexSet;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

/// Turns prompt text into an audio file. Implementations cover one backend
/// (Polly, flite); the cache and asset layout live here, not in backends.
pub trait Synthesizer {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Render `text` spoken by `voice` into a wav file at `out`. The parent
    /// directory exists when this is called.
    fn synthesize(
        &self,
        text: &str,
        voice: &str,
        language: &str,
        out: &Path,
    ) -> std::result::Result<(), SynthesisError>;
}

/// Local backend shelling out to the `flite` engine. Expects a flite voice
/// name (`slt`, `kal16`) in the language's `voice` field.
pub struct FliteSynthesizer {
    binary: String,
}

impl Default for FliteSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FliteSynthesizer {
    pub fn new() -> Self {
        Self {
            binary: "flite".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Synthesizer for FliteSynthesizer {
    fn name(&self) -> &str {
        "flite"
    }

    fn synthesize(
        &self,
        text: &str,
        voice: &str,
        _language: &str,
        out: &Path,
    ) -> std::result::Result<(), SynthesisError> {
        let output = Command::new(&self.binary)
            .arg("-voice")
            .arg(voice)
            .arg("-t")
            .arg(text)
            .arg("-o")
            .arg(out)
            .output()
            .map_err(|e| SynthesisError::Backend {
                backend: "flite".to_string(),
                message: format!("failed to run {}: {e}", self.binary),
            })?;
        if !output.status.success() {
            return Err(SynthesisError::Backend {
                backend: "flite".to_string(),
                message: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

/// Backend for a flow's `tts_backend` setting. Cloud synthesis is not
/// bundled; flows asking for it fall back to the local engine.
pub fn synthesizer_for(backend: TtsBackend) -> Box<dyn Synthesizer> {
    match backend {
        TtsBackend::Local => Box::new(FliteSynthesizer::new()),
        TtsBackend::Polly => {
            tracing::warn!("polly backend is not bundled; using the local engine");
            Box::new(FliteSynthesizer::new())
        }
    }
}

/// Directory holding one flow's prompt audio.
pub fn flow_sounds_dir(root: &Path, tenant: &str, flow_id: &str) -> PathBuf {
    root.join(tenant).join(flow_id)
}

/// Path the generated dialplan expects for one `(prompt, language)` pair.
pub fn prompt_asset_path(sounds_dir: &Path, prompt: &str, language: &str) -> PathBuf {
    sounds_dir.join(format!("{prompt}_{language}.wav"))
}

/// Content-addressed cache key; identical text/voice/language reuse the
/// same rendered audio across flows and tenants.
pub fn cache_key(text: &str, voice: &str, language: &str) -> String {
    let digest = Sha256::digest(format!("{text}|{voice}|{language}").as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Every `(prompt id, language code)` pair the compiled dialplan will try to
/// play: reachable menus' prompts, hangup-option closing prompts, and the
/// notice prompts the generated states reference. Ordered, deduplicated.
pub fn required_assets(flow: &Flow) -> Vec<(String, String)> {
    let reachable = reachable_menus(flow);
    let mut prompt_ids: IndexSet<String> = IndexSet::new();

    for id in &reachable {
        let Some(menu) = flow.menus.get(*id) else {
            continue;
        };
        if !menu.prompt.is_empty() {
            prompt_ids.insert(menu.prompt.clone());
        }
        for option in menu.options.values() {
            if let MenuOption::Hangup { prompt } = option {
                prompt_ids.insert(prompt.clone());
            }
        }
    }

    prompt_ids.insert(prompts::INVALID.to_string());
    for id in &reachable {
        match flow.menus.get(*id).and_then(|m| m.fallback_action) {
            Some(FallbackAction::Voicemail) => {
                prompt_ids.insert(prompts::VOICEMAIL.to_string());
            }
            Some(FallbackAction::Queue) => {
                prompt_ids.insert(prompts::TRANSFER.to_string());
            }
            Some(FallbackAction::Hangup) => {
                prompt_ids.insert(prompts::GOODBYE.to_string());
            }
            None => {}
        }
    }
    if flow.business_hours.is_some() {
        prompt_ids.insert(prompts::AFTER_HOURS.to_string());
    }
    if flow.languages.len() > 1 {
        prompt_ids.insert(prompts::LANGUAGE_PROMPT.to_string());
        prompt_ids.insert(prompts::LANGUAGE_CONFIRMED.to_string());
    }

    let mut assets = Vec::new();
    for prompt in &prompt_ids {
        for language in &flow.languages {
            assets.push((prompt.clone(), language.code.clone()));
        }
    }
    assets
}

/// Menus reachable from the root candidates by following `menu` options.
/// Tolerates dangling references and multiple roots; the validator reports
/// those separately.
fn reachable_menus(flow: &Flow) -> Vec<&str> {
    let mut seen: IndexSet<&str> = IndexSet::new();
    let mut queue: VecDeque<&str> = flow.root_menu_ids().into_iter().collect();
    while let Some(id) = queue.pop_front() {
        if flow.menus.get(id).is_none() || !seen.insert(id) {
            continue;
        }
        if let Some(menu) = flow.menus.get(id) {
            for option in menu.options.values() {
                if let MenuOption::Menu { menu_ref } = option {
                    queue.push_back(menu_ref.as_str());
                }
            }
        }
    }
    seen.into_iter().collect()
}

/// Render every required prompt for which the flow defines text, reusing
/// cached audio where the content matches. Returns the asset paths written.
///
/// A prompt defined in `flow.prompts` but lacking text for a configured
/// language is an error. A notice prompt the flow never defines is skipped
/// with a warning; installations may ship those as static files.
pub fn synthesize_flow_prompts(
    flow: &Flow,
    synthesizer: &dyn Synthesizer,
    sounds_root: &Path,
    cache_dir: &Path,
) -> std::result::Result<Vec<PathBuf>, SynthesisError> {
    let sounds_dir = flow_sounds_dir(sounds_root, &flow.tenant, &flow.id);
    fs::create_dir_all(&sounds_dir).map_err(|e| io_err(&sounds_dir, &e))?;
    fs::create_dir_all(cache_dir).map_err(|e| io_err(cache_dir, &e))?;

    let mut written = Vec::new();
    for (prompt, language) in required_assets(flow) {
        let text = match flow.prompts.get(&prompt) {
            Some(texts) => match texts.get(&language) {
                Some(text) => text.clone(),
                None => {
                    return Err(SynthesisError::MissingText { prompt, language });
                }
            },
            None => {
                tracing::warn!(
                    flow = %flow.id,
                    prompt = %prompt,
                    "prompt has no configured text; expecting a static audio file"
                );
                continue;
            }
        };
        let voice = flow
            .languages
            .iter()
            .find(|l| l.code == language)
            .map(|l| l.voice.as_str())
            .unwrap_or_default();

        let cached = cache_dir.join(format!("{}.wav", cache_key(&text, voice, &language)));
        if !cached.exists() {
            tracing::debug!(
                backend = synthesizer.name(),
                prompt = %prompt,
                language = %language,
                "synthesizing prompt audio"
            );
            synthesizer.synthesize(&text, voice, &language, &cached)?;
        }

        let asset = prompt_asset_path(&sounds_dir, &prompt, &language);
        fs::copy(&cached, &asset).map_err(|e| io_err(&asset, &e))?;
        written.push(asset);
    }
    tracing::info!(flow = %flow.id, assets = written.len(), "prompt audio in place");
    Ok(written)
}

/// Remove cache entries untouched for longer than `max_age_days`. Returns
/// the number of files removed; a missing cache directory counts as empty.
pub fn cleanup_cache(
    cache_dir: &Path,
    max_age_days: u64,
) -> std::result::Result<usize, SynthesisError> {
    let cutoff = SystemTime::now() - Duration::from_secs(max_age_days * 86_400);
    let entries = match fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_err(cache_dir, &e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(cache_dir, &e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("wav") {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        if let Ok(modified) = modified {
            if modified < cutoff {
                fs::remove_file(&path).map_err(|e| io_err(&path, &e))?;
                tracing::debug!(path = %path.display(), "evicted stale cache entry");
                removed += 1;
            }
        }
    }
    Ok(removed)
}

fn io_err(path: &Path, err: &std::io::Error) -> SynthesisError {
    SynthesisError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
