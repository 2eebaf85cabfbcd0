use crate::error::{FlowError, Result};
use crate::loader::{load_flow_from_path, save_flow_to_path};
use crate::model::{Flow, Language, TtsBackend};
use crate::settings::dialplan_file_name;
use crate::validate::validate;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One row of `FlowStore::list`.
#[derive(Debug, Clone, Serialize)]
pub struct FlowSummary {
    pub id: String,
    pub tenant: String,
    pub entry_context: String,
    pub tts_backend: TtsBackend,
    pub languages: Vec<Language>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// True when a generated dialplan file exists for this flow.
    pub active: bool,
}

/// Directory-backed flow collection keyed by flow id. Documents persist as
/// `{flows_dir}/{id}.yml`; mutations validate first and are written through
/// before the in-memory map changes. The lock serializes writers.
pub struct FlowStore {
    flows_dir: PathBuf,
    dialplan_dir: PathBuf,
    flows: RwLock<IndexMap<String, Flow>>,
}

impl FlowStore {
    /// Open a store over `flows_dir`, creating it when absent, and load
    /// every flow document found there. Files that fail to decode are
    /// skipped and logged; one bad document never hides the rest.
    pub fn open(flows_dir: impl Into<PathBuf>, dialplan_dir: impl Into<PathBuf>) -> Result<Self> {
        let flows_dir = flows_dir.into();
        let dialplan_dir = dialplan_dir.into();
        fs::create_dir_all(&flows_dir).map_err(|e| FlowError::Write {
            path: flows_dir.display().to_string(),
            message: e.to_string(),
        })?;

        let mut flows = IndexMap::new();
        for path in flow_documents(&flows_dir)? {
            match load_flow_from_path(&path) {
                Ok(flow) => {
                    if let Some(previous) = flows.insert(flow.id.clone(), flow) {
                        tracing::warn!(
                            flow = %previous.id,
                            path = %path.display(),
                            "duplicate flow id; later document wins"
                        );
                    } else {
                        tracing::info!(path = %path.display(), "loaded flow");
                    }
                }
                Err(err) => {
                    tracing::error!(path = %path.display(), error = %err, "skipping flow document");
                }
            }
        }

        Ok(Self {
            flows_dir,
            dialplan_dir,
            flows: RwLock::new(flows),
        })
    }

    /// Add a new flow. Fails on validation violations or a duplicate id;
    /// on success the document is on disk before this returns.
    pub fn create(&self, mut flow: Flow) -> Result<Flow> {
        self.check_valid(&flow)?;
        let mut flows = self.write_lock();
        if flows.contains_key(&flow.id) {
            return Err(FlowError::AlreadyExists(flow.id));
        }
        flow.touch();
        save_flow_to_path(&flow, &self.document_path(&flow.id))?;
        flows.insert(flow.id.clone(), flow.clone());
        tracing::info!(flow = %flow.id, "created flow");
        Ok(flow)
    }

    /// Replace an existing flow wholesale. The id selects the target;
    /// `created_at` survives the replacement, `updated_at` is refreshed.
    pub fn update(&self, mut flow: Flow) -> Result<Flow> {
        self.check_valid(&flow)?;
        let mut flows = self.write_lock();
        let Some(current) = flows.get(&flow.id) else {
            return Err(FlowError::NotFound(flow.id));
        };
        flow.created_at = current.created_at;
        flow.touch();
        save_flow_to_path(&flow, &self.document_path(&flow.id))?;
        flows.insert(flow.id.clone(), flow.clone());
        tracing::info!(flow = %flow.id, "updated flow");
        Ok(flow)
    }

    /// Remove a flow's document and its generated dialplan file.
    pub fn delete(&self, flow_id: &str) -> Result<()> {
        let mut flows = self.write_lock();
        if flows.shift_remove(flow_id).is_none() {
            return Err(FlowError::NotFound(flow_id.to_string()));
        }
        // The document may predate this store under any supported
        // extension.
        for extension in ["yml", "yaml", "json"] {
            let candidate = self.flows_dir.join(format!("{flow_id}.{extension}"));
            if candidate.exists() {
                fs::remove_file(&candidate).map_err(|e| FlowError::Write {
                    path: candidate.display().to_string(),
                    message: e.to_string(),
                })?;
            }
        }
        let dialplan = self.dialplan_path(flow_id);
        if dialplan.exists() {
            fs::remove_file(&dialplan).map_err(|e| FlowError::Write {
                path: dialplan.display().to_string(),
                message: e.to_string(),
            })?;
        }
        tracing::info!(flow = flow_id, "deleted flow");
        Ok(())
    }

    pub fn get(&self, flow_id: &str) -> Option<Flow> {
        self.read_lock().get(flow_id).cloned()
    }

    pub fn list(&self) -> Vec<FlowSummary> {
        self.read_lock()
            .values()
            .map(|flow| FlowSummary {
                id: flow.id.clone(),
                tenant: flow.tenant.clone(),
                entry_context: flow.entry_context.clone(),
                tts_backend: flow.tts_backend,
                languages: flow.languages.clone(),
                created_at: flow.created_at,
                updated_at: flow.updated_at,
                active: self.dialplan_path(&flow.id).exists(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// Path the generated dialplan lands at for one flow.
    pub fn dialplan_path(&self, flow_id: &str) -> PathBuf {
        self.dialplan_dir.join(dialplan_file_name(flow_id))
    }

    fn document_path(&self, flow_id: &str) -> PathBuf {
        self.flows_dir.join(format!("{flow_id}.yml"))
    }

    fn check_valid(&self, flow: &Flow) -> Result<()> {
        let violations = validate(flow);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(FlowError::Validation {
                id: flow.id.clone(),
                violations,
            })
        }
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, IndexMap<String, Flow>> {
        match self.flows.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, IndexMap<String, Flow>> {
        match self.flows.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Flow documents under `dir`, sorted by file name for a stable load order.
fn flow_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| FlowError::Read {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;
    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FlowError::Read {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        let supported = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml" | "yaml" | "json")
        );
        if path.is_file() && supported {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_flow_from_yaml_str;

    const VALID_FLOW: &str = r#"
id: reception
prompts:
  welcome: {en-US: hello}
menus:
  main:
    prompt: welcome
"#;

    fn store(tmp: &tempfile::TempDir) -> FlowStore {
        FlowStore::open(tmp.path().join("flows"), tmp.path().join("dialplan")).unwrap()
    }

    #[test]
    fn open_creates_the_directory_and_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        assert!(store.is_empty());
        assert!(tmp.path().join("flows").is_dir());
    }

    #[test]
    fn create_persists_and_rejects_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        let flow = load_flow_from_yaml_str(VALID_FLOW).unwrap();

        store.create(flow.clone()).unwrap();
        assert!(tmp.path().join("flows/reception.yml").is_file());
        assert_eq!(store.len(), 1);

        let err = store.create(flow).unwrap_err();
        assert!(matches!(err, FlowError::AlreadyExists(id) if id == "reception"));
    }

    #[test]
    fn create_rejects_invalid_flows_with_the_full_violation_list() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        let flow = load_flow_from_yaml_str(
            r#"
id: broken
menus:
  main:
    prompt: missing
    options:
      "1": {action: menu, menu_ref: nowhere}
"#,
        )
        .unwrap();
        let err = store.create(flow).unwrap_err();
        match err {
            FlowError::Validation { id, violations } => {
                assert_eq!(id, "broken");
                assert!(violations.len() >= 2, "expected several violations, got {violations:?}");
            }
            other => panic!("expected validation error, got {other}"),
        }
        assert!(store.is_empty());
    }

    #[test]
    fn update_replaces_and_keeps_created_at() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        let created = store
            .create(load_flow_from_yaml_str(VALID_FLOW).unwrap())
            .unwrap();

        let mut replacement = load_flow_from_yaml_str(VALID_FLOW).unwrap();
        replacement.tenant = "acme".to_string();
        let updated = store.update(replacement).unwrap();

        assert_eq!(updated.tenant, "acme");
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(store.get("reception").unwrap().tenant, "acme");
    }

    #[test]
    fn update_of_an_unknown_flow_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        let err = store
            .update(load_flow_from_yaml_str(VALID_FLOW).unwrap())
            .unwrap_err();
        assert!(matches!(err, FlowError::NotFound(id) if id == "reception"));
    }

    #[test]
    fn delete_removes_document_and_dialplan() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        store
            .create(load_flow_from_yaml_str(VALID_FLOW).unwrap())
            .unwrap();
        let dialplan = store.dialplan_path("reception");
        fs::create_dir_all(dialplan.parent().unwrap()).unwrap();
        fs::write(&dialplan, "[dp-ivr-reception]\n").unwrap();

        store.delete("reception").unwrap();
        assert!(!tmp.path().join("flows/reception.yml").exists());
        assert!(!dialplan.exists());
        assert!(store.get("reception").is_none());

        let err = store.delete("reception").unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));
    }

    #[test]
    fn open_skips_undecodable_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let flows_dir = tmp.path().join("flows");
        fs::create_dir_all(&flows_dir).unwrap();
        fs::write(flows_dir.join("good.yml"), VALID_FLOW).unwrap();
        fs::write(flows_dir.join("bad.yml"), "menus: [not, a, map]").unwrap();
        fs::write(flows_dir.join("notes.txt"), "ignored").unwrap();

        let store = FlowStore::open(&flows_dir, tmp.path().join("dialplan")).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("reception").is_some());
    }

    #[test]
    fn list_reports_the_active_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(&tmp);
        store
            .create(load_flow_from_yaml_str(VALID_FLOW).unwrap())
            .unwrap();

        let summaries = store.list();
        assert_eq!(summaries.len(), 1);
        assert!(!summaries[0].active);
        assert_eq!(summaries[0].entry_context, "dp-ivr-reception");

        let dialplan = store.dialplan_path("reception");
        fs::create_dir_all(dialplan.parent().unwrap()).unwrap();
        fs::write(&dialplan, "[dp-ivr-reception]\n").unwrap();
        assert!(store.list()[0].active);
    }
}
