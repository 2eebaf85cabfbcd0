use crate::compiler::Compiler;
use crate::error::{DeployError, FlowError};
use crate::model::Flow;
use crate::platform::{CallEngine, QueueSource};
use crate::settings::Settings;
use crate::synth::{self, Synthesizer};
use crate::validate::validate;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// What a successful build produced.
#[derive(Debug)]
pub struct BuildOutcome {
    pub flow_id: String,
    pub dialplan_path: PathBuf,
    pub assets_written: usize,
    /// Engine validation output; non-fatal, surfaced to the operator.
    pub engine_warnings: Vec<String>,
    /// False when the engine was reachable but refused to reload.
    pub reloaded: bool,
}

/// Full deployment of one flow: validate, render prompt audio, fetch the
/// queue map, compile, write the dialplan atomically, then ask the engine
/// to check and reload. Stops at the first failing stage; a failed build
/// never leaves a partial dialplan behind.
pub fn build_flow(
    flow: &Flow,
    queues: &dyn QueueSource,
    synthesizer: &dyn Synthesizer,
    engine: &dyn CallEngine,
    settings: &Settings,
) -> Result<BuildOutcome, DeployError> {
    let violations = validate(flow);
    if !violations.is_empty() {
        return Err(FlowError::Validation {
            id: flow.id.clone(),
            violations,
        }
        .into());
    }
    tracing::info!(flow = %flow.id, "flow validated");

    let assets = synth::synthesize_flow_prompts(
        flow,
        synthesizer,
        &settings.sounds_dir,
        &settings.cache_dir,
    )?;

    let queue_map = queues.queues()?;
    tracing::info!(flow = %flow.id, queues = queue_map.len(), "fetched queue map");

    let compiler = Compiler::new()
        .with_queues(queue_map)
        .with_sounds_root(settings.sounds_dir.clone());
    let dialplan = compiler.compile_to_string(flow)?;

    let dialplan_path = settings.dialplan_path(&flow.id);
    write_dialplan(&dialplan_path, &dialplan).map_err(DeployError::Flow)?;
    tracing::info!(flow = %flow.id, path = %dialplan_path.display(), "wrote dialplan");

    let engine_warnings = engine.validate_dialplan(&dialplan_path)?;
    for warning in &engine_warnings {
        tracing::warn!(flow = %flow.id, warning = %warning, "engine validation warning");
    }

    let reloaded = engine.reload()?;
    if reloaded {
        tracing::info!(flow = %flow.id, "flow deployed");
    } else {
        tracing::warn!(flow = %flow.id, "engine refused to reload");
    }

    Ok(BuildOutcome {
        flow_id: flow.id.clone(),
        dialplan_path,
        assets_written: assets.len(),
        engine_warnings,
        reloaded,
    })
}

/// Remove a flow's generated dialplan and reload. Returns the reload
/// outcome; a missing dialplan file is not an error.
pub fn undeploy_flow(
    flow_id: &str,
    engine: &dyn CallEngine,
    settings: &Settings,
) -> Result<bool, DeployError> {
    let path = settings.dialplan_path(flow_id);
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(flow = flow_id, path = %path.display(), "removed dialplan");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(flow = flow_id, path = %path.display(), "no dialplan to remove");
        }
        Err(e) => {
            return Err(FlowError::Write {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into());
        }
    }
    Ok(engine.reload()?)
}

/// Write dialplan text through a temp file in the target directory plus an
/// atomic rename, so the engine never sees a half-written file.
pub fn write_dialplan(path: &Path, contents: &str) -> crate::error::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(|e| write_err(dir, &e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(dir, &e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| write_err(path, &e))?;
    tmp.persist(path).map_err(|e| write_err(path, &e.error))?;
    Ok(())
}

fn write_err(path: &Path, err: &std::io::Error) -> FlowError {
    FlowError::Write {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
