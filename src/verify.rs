//! Checks on a solved graph
//!
//! A backend may rely on everything reachable from a solved entry being
//! complete, typed, free of closure values and self-contained per function.

use crate::errors::{CompileError, CompileResult};
use crate::label::LabelId;
use crate::session::Session;
use crate::types::TYPE_UNKNOWN;

pub fn verify_closed(session: &Session, entry: LabelId) -> CompileResult<()> {
    for label in session.reachable_labels(entry) {
        let data = session.label(label);
        let name = session.label_name(label);
        if !data.is_instance() {
            return Err(CompileError::location(
                data.anchor,
                format!("{} is an unspecialized template", name),
            ));
        }
        if !data.body.is_complete() {
            return Err(CompileError::location(
                data.body.anchor,
                format!("body of {} is incomplete", name),
            ));
        }
        for p in &data.params {
            if session.param(*p).ty == TYPE_UNKNOWN {
                return Err(CompileError::location(
                    session.param(*p).anchor,
                    format!("parameter {} of {} has no type", session.param_name(*p), name),
                ));
            }
        }
        if data.body.values().any(|v| session.is_closure_value(v)) {
            return Err(CompileError::location(
                data.body.anchor,
                format!("closure value remains in {}", name),
            ));
        }
        if !session.is_basic_block_like(label) {
            let captured = session.captured_params(label);
            if let Some(p) = captured.first() {
                return Err(CompileError::location(
                    data.anchor,
                    format!(
                        "{} uses parameter {} of another function",
                        name,
                        session.param_name(*p)
                    ),
                ));
            }
        }
    }
    Ok(())
}
