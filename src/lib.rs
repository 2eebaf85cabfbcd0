//! Tenant-scoped IVR flow schema, validator, and dialplan compiler for
//! Asterisk-compatible call engines. Flows load from YAML or JSON documents,
//! validate structurally, and compile deterministically into one generated
//! dialplan file per flow; deployment renders prompt audio, resolves queues
//! against the telephony platform, and reloads the engine.
#![forbid(unsafe_code)]

pub mod compiler;
pub mod deploy;
pub mod dialplan;
pub mod error;
pub mod hours;
pub mod loader;
pub mod model;
pub mod platform;
pub mod settings;
pub mod store;
pub mod synth;
pub mod util;
pub mod validate;

pub use compiler::{Compiler, HoursMode};
pub use model::{Flow, QueueMap};

use crate::error::{CompileError, FlowError, Result};

/// Load a flow from YAML and validate it, failing with the complete
/// violation list.
pub fn load_and_validate(flow_yaml: &str) -> Result<Flow> {
    let flow = loader::load_flow_from_yaml_str(flow_yaml)?;
    let violations = validate::validate(&flow);
    if violations.is_empty() {
        Ok(flow)
    } else {
        Err(FlowError::Validation {
            id: flow.id.clone(),
            violations,
        })
    }
}

/// Compile an already validated flow against a queue map with default
/// compiler options.
pub fn compile(flow: &Flow, queues: QueueMap) -> std::result::Result<String, CompileError> {
    Compiler::new().with_queues(queues).compile_to_string(flow)
}
