use crate::{
    error::{FlowError, Result},
    model::Flow,
};
use std::{fs, path::Path};

const INLINE_SOURCE: &str = "<inline>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocFormat {
    Yaml,
    Json,
}

fn format_for(path: &Path) -> Option<DocFormat> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => Some(DocFormat::Yaml),
        Some("json") => Some(DocFormat::Json),
        _ => None,
    }
}

/// Load a flow document from a YAML string.
pub fn load_flow_from_yaml_str(yaml: &str) -> Result<Flow> {
    load_yaml(yaml, INLINE_SOURCE)
}

/// Load a flow document from a JSON string.
pub fn load_flow_from_json_str(json: &str) -> Result<Flow> {
    load_json(json, INLINE_SOURCE)
}

/// Load a flow document from a file; the extension picks the format.
pub fn load_flow_from_path(path: &Path) -> Result<Flow> {
    let format = format_for(path).ok_or_else(|| FlowError::UnsupportedExtension {
        path: path.display().to_string(),
    })?;
    let content = fs::read_to_string(path).map_err(|e| FlowError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    match format {
        DocFormat::Yaml => load_yaml(&content, path.display().to_string()),
        DocFormat::Json => load_json(&content, path.display().to_string()),
    }
}

/// Serialize a flow to the format implied by the target extension and write
/// it. Parent directories are created as needed.
pub fn save_flow_to_path(flow: &Flow, path: &Path) -> Result<()> {
    let format = format_for(path).ok_or_else(|| FlowError::UnsupportedExtension {
        path: path.display().to_string(),
    })?;
    let content = match format {
        DocFormat::Yaml => flow_to_yaml_string(flow)?,
        DocFormat::Json => flow_to_json_string(flow)?,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| FlowError::Write {
            path: parent.display().to_string(),
            message: e.to_string(),
        })?;
    }
    fs::write(path, content).map_err(|e| FlowError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Render a flow as YAML with a trailing newline.
pub fn flow_to_yaml_string(flow: &Flow) -> Result<String> {
    let mut yaml = serde_yaml::to_string(flow)
        .map_err(|e| FlowError::Internal(format!("flow '{}' to YAML: {e}", flow.id)))?;
    if !yaml.ends_with('\n') {
        yaml.push('\n');
    }
    Ok(yaml)
}

/// Render a flow as pretty-printed JSON with a trailing newline.
pub fn flow_to_json_string(flow: &Flow) -> Result<String> {
    let mut json = serde_json::to_string_pretty(flow)
        .map_err(|e| FlowError::Internal(format!("flow '{}' to JSON: {e}", flow.id)))?;
    if !json.ends_with('\n') {
        json.push('\n');
    }
    Ok(json)
}

fn load_yaml(yaml: &str, source: impl Into<String>) -> Result<Flow> {
    let source = source.into();
    let mut flow: Flow = serde_yaml::from_str(yaml).map_err(|e| FlowError::Yaml {
        path: source,
        message: e.to_string(),
    })?;
    flow.normalize();
    Ok(flow)
}

fn load_json(json: &str, source: impl Into<String>) -> Result<Flow> {
    let source = source.into();
    let mut flow: Flow = serde_json::from_str(json).map_err(|e| FlowError::Json {
        path: source,
        message: e.to_string(),
    })?;
    flow.normalize();
    Ok(flow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_context_defaults_from_flow_id() {
        let yaml = r#"
id: reception
menus:
  main:
    prompt: welcome
"#;
        let flow = load_flow_from_yaml_str(yaml).unwrap();
        assert_eq!(flow.entry_context, "dp-ivr-reception");
        assert_eq!(flow.tenant, "default");
        assert_eq!(flow.default_language(), "en-US");
    }

    #[test]
    fn explicit_entry_context_is_kept() {
        let yaml = r#"
id: reception
entry_context: from-external
menus:
  main:
    prompt: welcome
"#;
        let flow = load_flow_from_yaml_str(yaml).unwrap();
        assert_eq!(flow.entry_context, "from-external");
    }

    #[test]
    fn menu_defaults_apply() {
        let yaml = r#"
id: reception
menus:
  main:
    prompt: welcome
"#;
        let flow = load_flow_from_yaml_str(yaml).unwrap();
        let menu = &flow.menus["main"];
        assert_eq!(menu.timeout_sec, 5);
        assert_eq!(menu.max_retries, 3);
        assert!(menu.options.is_empty());
        assert!(menu.fallback_action.is_none());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_flow_from_path(Path::new("flow.toml")).unwrap_err();
        assert!(matches!(err, FlowError::UnsupportedExtension { .. }));
    }

    #[test]
    fn option_variants_decode_by_action_tag() {
        let yaml = r#"
id: reception
menus:
  main:
    prompt: welcome
    options:
      "1":
        action: queue
        queue_ref: sales
      "2":
        action: transfer
        destination: "1000"
      "9":
        action: language
        language: es-ES
"#;
        let flow = load_flow_from_yaml_str(yaml).unwrap();
        let options = &flow.menus["main"].options;
        assert_eq!(options["1"].action(), "queue");
        assert_eq!(options["2"].action(), "transfer");
        assert_eq!(options["9"].action(), "language");
    }
}
