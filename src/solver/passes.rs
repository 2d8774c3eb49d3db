//! Graph passes run after every body is complete
//!
//! Closure elimination lifts captured parameters into explicit ones
//! instead of respecializing the escaping function for unknown arguments.
//! The instance keeps every constant it was specialized for; the values it
//! captured from an enclosing function arrive as ordinary arguments, and
//! its callers pass them along.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::errors::{CompileError, CompileResult};
use crate::label::{Argument, Body, LabelId, LabelKind, ParamId};
use crate::session::Session;
use crate::value::{Any, Payload};

/// Replace jumps to parameterless blocks with the blocks' bodies
pub fn fold_useless_labels(session: &mut Session, entry: LabelId) {
    let mut folded = 0usize;
    for label in session.reachable_labels(entry) {
        let mut visited: HashSet<LabelId> = HashSet::from([label]);
        loop {
            let body = &session.label(label).body;
            let Some(target) = body.enter.as_label() else {
                break;
            };
            let data = session.label(target);
            let useless = data.is_instance()
                && session.is_basic_block_like(target)
                && data.is_parameterless()
                && data.body.is_complete()
                && !data.flags.reentrant
                && body.args.len() == 1
                && body.args[0].value.is_nothing();
            if !useless || !visited.insert(target) {
                break;
            }
            let replacement = data.body.clone();
            session.label_mut(label).body = replacement;
            folded += 1;
        }
    }
    debug!("folded {} jumps to parameterless blocks", folded);
}

fn substitute_body(body: &Body, params: &HashMap<ParamId, Any>, labels: &HashMap<LabelId, LabelId>) -> Body {
    let map = |value: &Any| match value.payload {
        Payload::Parameter(p) => params.get(&p).cloned().unwrap_or_else(|| value.clone()),
        Payload::Label(l) => labels.get(&l).map(|t| Any::label(*t)).unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    };
    Body {
        anchor: body.anchor,
        enter: map(&body.enter),
        args: body
            .args
            .iter()
            .map(|arg| Argument {
                key: arg.key,
                value: map(&arg.value),
            })
            .collect(),
        flags: body.flags,
    }
}

/// Lift parameters captured by functions into explicit parameters
///
/// Each function instance that uses parameters of another function is
/// duplicated with one extra parameter per captured value, and every call
/// to it passes those values along. Lifting one function may make its
/// callers capture in turn, so this repeats until nothing is captured.
pub fn lower2cff(session: &mut Session, entry: LabelId) -> CompileResult<()> {
    let limit = session.config.max_cff_iterations;
    for _ in 0..limit {
        let labels = session.reachable_labels(entry);
        let escaping = labels.iter().copied().find_map(|label| {
            if !session.label(label).is_instance() || session.is_basic_block_like(label) {
                return None;
            }
            let captured = session.captured_params(label);
            (!captured.is_empty()).then_some((label, captured))
        });
        let Some((function, captured)) = escaping else {
            return Ok(());
        };
        if function == entry {
            return Err(CompileError::location(
                session.label(entry).anchor,
                format!(
                    "closure elimination failed: {} uses parameter {} of an enclosing function",
                    session.label_name(entry),
                    session.param_name(captured[0])
                ),
            ));
        }
        lift(session, entry, function, &captured)?;
    }
    Err(CompileError::location(
        session.label(entry).anchor,
        format!("closure elimination failed after {} iterations", limit),
    ))
}

fn lift(session: &mut Session, entry: LabelId, function: LabelId, captured: &[ParamId]) -> CompileResult<()> {
    let cfg = session.function_cfg(function);
    let mut labels: HashMap<LabelId, LabelId> = HashMap::new();
    let mut params: HashMap<ParamId, Any> = HashMap::new();
    for label in &cfg {
        let source = session.label(*label);
        let (name, anchor, flags, frame, source_params) =
            (source.name, source.anchor, source.flags, source.frame, source.params.clone());
        let copy = session.new_label(name, anchor, LabelKind::Instance);
        {
            let data = session.label_mut(copy);
            data.flags = flags;
            data.frame = frame;
            data.original = Some(*label);
        }
        for p in source_params {
            let param = session.param(p).clone();
            let new_p = session.new_param(copy, param.name, param.ty, param.vararg, param.anchor);
            session.param_mut(new_p).typed_at = param.typed_at;
            params.insert(p, Any::param(new_p));
        }
        labels.insert(*label, copy);
    }
    let lifted = labels[&function];
    let mut extra = Vec::with_capacity(captured.len());
    for p in captured {
        let param = session.param(*p).clone();
        let new_p = session.new_param(lifted, param.name, param.ty, false, param.anchor);
        params.insert(*p, Any::param(new_p));
        extra.push(Any::param(new_p));
    }
    for label in &cfg {
        let body = substitute_body(&session.label(*label).body, &params, &labels);
        session.label_mut(labels[label]).body = body;
    }

    let copies: HashSet<LabelId> = labels.values().copied().collect();
    let outside: Vec<Any> = captured.iter().map(|p| Any::param(*p)).collect();
    let mut sites = session.reachable_labels(entry);
    for label in &cfg {
        if !sites.contains(&labels[label]) {
            sites.push(labels[label]);
        }
    }
    let mut rewritten = 0usize;
    for label in sites {
        let body = &session.label(label).body;
        let escapes = body
            .args
            .iter()
            .any(|arg| matches!(arg.value.as_label(), Some(l) if l == function || l == lifted));
        if escapes {
            return Err(CompileError::location(
                body.anchor,
                format!(
                    "closure elimination failed: {} is used as a value",
                    session.label_name(function)
                ),
            ));
        }
        if !matches!(body.enter.as_label(), Some(l) if l == function || l == lifted) {
            continue;
        }
        let values = if copies.contains(&label) { &extra } else { &outside };
        let data = &mut session.label_mut(label).body;
        data.enter = Any::label(lifted);
        data.args.extend(values.iter().cloned().map(Argument::new));
        rewritten += 1;
    }
    debug!(
        "lifted {} captured parameters into {} ({} call sites)",
        captured.len(),
        lifted,
        rewritten
    );
    Ok(())
}

/// Merge blocks entered from exactly one call into that call
pub fn cleanup_labels(session: &mut Session, entry: LabelId) {
    let mut merged = 0usize;
    loop {
        let labels = session.reachable_labels(entry);
        let mut uses: HashMap<LabelId, usize> = HashMap::new();
        for label in &labels {
            for value in session.label(*label).body.values() {
                if let Some(target) = value.as_label() {
                    *uses.entry(target).or_insert(0) += 1;
                }
            }
        }
        let candidate = labels.iter().copied().find_map(|caller| {
            let body = &session.label(caller).body;
            let target = body.enter.as_label()?;
            let data = session.label(target);
            let mergeable = target != entry
                && target != caller
                && data.is_instance()
                && !data.flags.reentrant
                && session.is_basic_block_like(target)
                && uses.get(&target) == Some(&1)
                && body.args.len() == data.params.len();
            mergeable.then_some((caller, target))
        });
        let Some((caller, target)) = candidate else {
            break;
        };
        let args: Vec<Any> = session
            .label(caller)
            .body
            .args
            .iter()
            .map(|arg| arg.value.clone())
            .collect();
        let substitution: HashMap<ParamId, Any> = session
            .label(target)
            .params
            .iter()
            .copied()
            .zip(args)
            .skip(1)
            .collect();
        let none = HashMap::new();
        let body = substitute_body(&session.label(target).body, &substitution, &none);
        session.label_mut(caller).body = body;
        for label in session.reachable_labels(entry) {
            let body = substitute_body(&session.label(label).body, &substitution, &none);
            session.label_mut(label).body = body;
        }
        trace!("merged {} into {}", target, caller);
        merged += 1;
    }
    debug!("merged {} single-use blocks", merged);
}

/// Fail if a closure value survived closure elimination
pub fn verify_closure_free(session: &Session, entry: LabelId) -> CompileResult<()> {
    for label in session.reachable_labels(entry) {
        let body = &session.label(label).body;
        if body.values().any(|v| session.is_closure_value(v)) {
            return Err(CompileError::location(
                body.anchor,
                format!(
                    "closure elimination failed: a closure remains in {}",
                    session.label_name(label)
                ),
            ));
        }
    }
    Ok(())
}
