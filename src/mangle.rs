//! Template specialization
//!
//! `mangle` duplicates a template together with its local scope (the blocks
//! that use its parameters) and substitutes the given arguments:
//!
//! - a constant (or any non-Unknown value) erases the parameter and is
//!   substituted wherever the parameter was used
//! - `Any::unknown_of(T)` keeps the parameter and types it `T`
//! - `Any::unknown()` keeps the parameter with the template's type
//!
//! The continuation slot is never removed. Inside the new instance's body,
//! references to templates become closures over the frame they need, so
//! later calls know which environment to specialize against.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::errors::{CompileError, CompileResult};
use crate::frame::{Binding, Frame, FrameId};
use crate::label::{Argument, Body, BodyFlags, InstanceKey, LabelId, LabelKind, ParamId, Parameter};
use crate::session::Session;
use crate::types::{TypeId, TYPE_NOTHING, TYPE_UNKNOWN};
use crate::value::{Any, Payload};

/// Labels reachable from `template` that use its parameters, or use labels
/// that do; discovered in breadth-first order
pub fn local_scope(session: &mut Session, template: LabelId) -> Vec<LabelId> {
    if let Some(scope) = session.cached_scope(template) {
        return scope.clone();
    }
    let candidates: Vec<LabelId> = session
        .reachable_labels(template)
        .into_iter()
        .filter(|l| *l != template)
        .collect();
    let mut owners: HashSet<LabelId> = HashSet::from([template]);
    let mut scope: HashSet<LabelId> = HashSet::new();
    loop {
        let mut changed = false;
        for label in &candidates {
            if scope.contains(label) {
                continue;
            }
            let uses_param = session
                .param_refs(*label)
                .iter()
                .any(|p| owners.contains(&session.param(*p).label));
            let uses_scope = session
                .label_refs(*label)
                .iter()
                .any(|target| scope.contains(target));
            if uses_param || uses_scope {
                scope.insert(*label);
                owners.insert(*label);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    let ordered: Vec<LabelId> = candidates.into_iter().filter(|l| scope.contains(l)).collect();
    session.cache_scope(template, ordered.clone());
    ordered
}

struct Substitution {
    params: HashMap<ParamId, Binding>,
    labels: HashMap<LabelId, LabelId>,
}

/// The frame of the instance being built, for closure conversion
struct InstanceContext {
    frame: FrameId,
}

fn bind_argument(
    session: &mut Session,
    instance: LabelId,
    param: &Parameter,
    arg: &Any,
) -> CompileResult<Any> {
    let expected = param.ty;
    match arg.unknown_type() {
        Some(ty) => {
            let ty = if ty == TYPE_UNKNOWN { expected } else { ty };
            if expected != TYPE_UNKNOWN && ty != expected {
                return Err(argument_mismatch(session, param, ty));
            }
            let p = session.new_param(instance, param.name, ty, false, param.anchor);
            Ok(Any::param(p))
        }
        None => {
            let actual = session.value_type(arg);
            if expected != TYPE_UNKNOWN && actual != expected {
                return Err(argument_mismatch(session, param, actual));
            }
            Ok(arg.clone())
        }
    }
}

fn argument_mismatch(session: &Session, param: &Parameter, actual: TypeId) -> CompileError {
    CompileError::location(
        param.anchor,
        format!(
            "parameter {} is typed {}, but the argument has type {}",
            session.symbol_name(param.name),
            session.type_name(param.ty),
            session.type_name(actual)
        ),
    )
}

/// Duplicate `template` as an instance specialized for `args`
pub fn mangle(
    session: &mut Session,
    template: LabelId,
    frame: Option<FrameId>,
    args: &[Any],
) -> CompileResult<LabelId> {
    let scope = local_scope(session, template);
    let source = session.label(template);
    let (name, anchor, params, body, flags) = (
        source.name,
        source.anchor,
        source.params.clone(),
        source.body.clone(),
        source.flags,
    );

    let new_frame = session.new_frame(Frame::new(template, frame));
    let instance = session.new_label(name, anchor, LabelKind::Instance);
    {
        let label = session.label_mut(instance);
        label.frame = Some(new_frame);
        label.original = Some(template);
        label.flags.impure = flags.impure;
    }

    let mut map = Substitution {
        params: HashMap::new(),
        labels: HashMap::new(),
    };
    let mut bindings = Vec::with_capacity(params.len());
    for (index, p) in params.iter().enumerate() {
        let param = session.param(*p).clone();
        let binding = if index == 0 {
            let arg = args.first().cloned().unwrap_or_else(Any::unknown);
            match arg.unknown_type() {
                Some(ty) => {
                    let ty = if ty == TYPE_UNKNOWN { param.ty } else { ty };
                    let cont = session.new_param(instance, param.name, ty, false, param.anchor);
                    Binding::One(Any::param(cont))
                }
                None => {
                    // any value other than Nothing replaces the continuation
                    let cont = session.new_param(instance, param.name, TYPE_NOTHING, false, param.anchor);
                    if arg.is_nothing() {
                        Binding::One(Any::param(cont))
                    } else {
                        Binding::One(arg)
                    }
                }
            }
        } else if param.vararg {
            let tail = args.get(index..).unwrap_or(&[]);
            let mut values = Vec::with_capacity(tail.len());
            for arg in tail {
                values.push(bind_argument(session, instance, &param, arg)?);
            }
            Binding::Many(values)
        } else {
            let arg = args.get(index).cloned().unwrap_or_else(Any::nothing);
            Binding::One(bind_argument(session, instance, &param, &arg)?)
        };
        map.params.insert(*p, binding.clone());
        bindings.push(binding);
    }
    {
        let f = session.frame_mut(new_frame);
        f.bindings = bindings;
        f.instance = Some(instance);
    }

    for label in &scope {
        let source = session.label(*label);
        let (name, anchor, source_params, flags) =
            (source.name, source.anchor, source.params.clone(), source.flags);
        let copy = session.new_label(name, anchor, LabelKind::Template);
        {
            let l = session.label_mut(copy);
            l.original = Some(*label);
            l.flags = flags;
        }
        for p in source_params {
            let param = session.param(p).clone();
            let new_p = session.new_param(copy, param.name, param.ty, param.vararg, param.anchor);
            session.param_mut(new_p).typed_at = param.typed_at;
            map.params.insert(p, Binding::One(Any::param(new_p)));
        }
        map.labels.insert(*label, copy);
    }

    for label in &scope {
        let body = session.label(*label).body.clone();
        let rewritten = rewrite_body(session, &map, &body, new_frame, None)?;
        let copy = map.labels[label];
        session.label_mut(copy).body = rewritten;
    }
    let context = InstanceContext { frame: new_frame };
    let rewritten = rewrite_body(session, &map, &body, new_frame, Some(&context))?;
    session.label_mut(instance).body = rewritten;

    debug!(
        "specialized {} as {} ({} params, {} scope labels)",
        session.label_name(template),
        instance,
        session.label(instance).params.len(),
        scope.len()
    );
    Ok(instance)
}

enum Rewritten {
    One(Any),
    Many(Vec<Any>),
}

fn rewrite_body(
    session: &mut Session,
    map: &Substitution,
    body: &Body,
    frame: FrameId,
    instance: Option<&InstanceContext>,
) -> CompileResult<Body> {
    let enter = match rewrite_value(session, map, &body.enter, frame, instance)? {
        Rewritten::One(value) => value,
        Rewritten::Many(mut values) if values.len() == 1 => values.remove(0),
        Rewritten::Many(_) => {
            return Err(CompileError::location(
                body.anchor,
                "cannot call a variadic parameter",
            ))
        }
    };
    let mut args = Vec::with_capacity(body.args.len());
    for arg in &body.args {
        match rewrite_value(session, map, &arg.value, frame, instance)? {
            Rewritten::One(value) => args.push(Argument {
                key: arg.key,
                value,
            }),
            Rewritten::Many(values) => args.extend(values.into_iter().map(Argument::new)),
        }
    }
    Ok(Body {
        anchor: body.anchor,
        enter,
        args,
        flags: BodyFlags {
            complete: false,
            rawcall: body.flags.rawcall,
        },
    })
}

fn resolve_in_frames(session: &Session, p: ParamId, frame: FrameId) -> Option<Binding> {
    let param = session.param(p);
    let mut cursor = Some(frame);
    while let Some(f) = cursor {
        let data = session.frame(f);
        if data.template == param.label {
            return data.binding(param.index).cloned();
        }
        cursor = data.parent;
    }
    None
}

fn rewrite_value(
    session: &mut Session,
    map: &Substitution,
    value: &Any,
    frame: FrameId,
    instance: Option<&InstanceContext>,
) -> CompileResult<Rewritten> {
    let rewritten = match value.payload {
        Payload::Parameter(p) => {
            let binding = match map.params.get(&p) {
                Some(binding) => Some(binding.clone()),
                None if session.label(session.param(p).label).is_template() => {
                    match resolve_in_frames(session, p, frame) {
                        Some(binding) => Some(binding),
                        None if instance.is_some() => {
                            return Err(CompileError::internal(format!(
                                "parameter {} of {} is not bound in any enclosing frame",
                                session.param_name(p),
                                session.label_name(session.param(p).label)
                            )))
                        }
                        None => None,
                    }
                }
                None => None,
            };
            match binding {
                Some(Binding::One(value)) => Rewritten::One(value),
                Some(Binding::Many(values)) => Rewritten::Many(values),
                None => Rewritten::One(value.clone()),
            }
        }
        Payload::Label(l) => {
            let target = map.labels.get(&l).copied().unwrap_or(l);
            match instance {
                Some(context) if session.label(target).is_template() => {
                    let capture = session.capture_frame(target, Some(context.frame));
                    Rewritten::One(session.closure(target, capture))
                }
                _ => Rewritten::One(Any::label(target)),
            }
        }
        _ => Rewritten::One(value.clone()),
    };
    Ok(rewritten)
}

/// Memoized specialization of `template` in `frame`
///
/// A hit may return an instance that is not solved yet; whether that is a
/// recursive entry is up to the caller. A template specialized for more
/// than `max_unroll` distinct argument lists is a loop over changing
/// constants and fails.
pub fn fold_type_label(
    session: &mut Session,
    template: LabelId,
    frame: Option<FrameId>,
    args: &[Any],
) -> CompileResult<LabelId> {
    let impure = session.label(template).flags.impure;
    let key = InstanceKey {
        frame,
        args: args.to_vec(),
    };
    if impure {
        return mangle(session, template, frame, args);
    }
    if let Some(instance) = session.label(template).instances.get(&key).copied() {
        trace!("reusing {} for {}", instance, session.label_name(template));
        return Ok(instance);
    }
    let limit = session.config.max_unroll;
    if session.label(template).instances.len() >= limit {
        return Err(CompileError::location(
            session.label(template).anchor,
            format!(
                "loop unrolling exceeded {} iterations: {} keeps being specialized for new constants",
                limit,
                session.label_name(template)
            ),
        ));
    }
    let instance = mangle(session, template, frame, args)?;
    session.label_mut(template).instances.insert(key, instance);
    Ok(instance)
}

/// Specialize without consulting or filling the instance table
pub fn fold_type_label_single(
    session: &mut Session,
    template: LabelId,
    frame: Option<FrameId>,
    args: &[Any],
) -> CompileResult<LabelId> {
    mangle(session, template, frame, args)
}

/// Specialize `template` for runtime arguments of `arg_types` and an
/// inferred return type
pub fn typify(
    session: &mut Session,
    template: LabelId,
    arg_types: &[TypeId],
) -> CompileResult<LabelId> {
    let label = session.label(template);
    let expected = label.params.len().saturating_sub(1);
    let variadic = label
        .params
        .last()
        .map(|p| session.param(*p).vararg)
        .unwrap_or(false);
    let accepted = if variadic {
        arg_types.len() + 1 >= expected
    } else {
        arg_types.len() == expected
    };
    if !accepted {
        return Err(CompileError::location(
            label.anchor,
            format!(
                "{} takes {} arguments, got {}",
                session.label_name(template),
                expected,
                arg_types.len()
            ),
        ));
    }
    let mut args = Vec::with_capacity(arg_types.len() + 1);
    args.push(Any::unknown());
    args.extend(arg_types.iter().map(|t| Any::unknown_of(*t)));
    mangle(session, template, None, &args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::builtins::Builtin;
    use crate::types::TYPE_I32;

    #[test]
    fn test_local_scope_contains_blocks_using_params() {
        let mut session = Session::default();
        let mut b = GraphBuilder::new(&mut session);
        let f = b.function("f", &["x"]);
        let then = b.block("then", &[]);
        let helper = b.function("helper", &[]);
        let x = b.param(f, 1);
        let ret = b.cont(f);
        b.call(then, ret, Any::nothing(), vec![x]);
        b.ret(helper, vec![]);
        b.jump(f, Any::label(then), vec![]);
        let scope = local_scope(&mut session, f);
        assert_eq!(scope, vec![then]);
        assert!(session.enclosing_templates(helper).is_empty());
        assert_eq!(session.enclosing_templates(then), vec![f]);
    }

    #[test]
    fn test_constant_argument_erases_parameter() {
        let mut session = Session::default();
        let mut b = GraphBuilder::new(&mut session);
        let f = b.function("f", &["x", "y"]);
        let (x, y) = (b.param(f, 1), b.param(f, 2));
        let ret = b.cont(f);
        b.call(f, Any::builtin(Builtin::Add), ret, vec![x, y]);
        let instance = mangle(
            &mut session,
            f,
            None,
            &[Any::unknown(), Any::i32(3), Any::unknown_of(TYPE_I32)],
        )
        .unwrap();
        let label = session.label(instance);
        assert_eq!(label.params.len(), 2);
        assert_eq!(session.param(label.params[1]).ty, TYPE_I32);
        assert_eq!(label.body.args[1].value, Any::i32(3));
        assert_eq!(label.body.args[2].value, Any::param(label.params[1]));
    }

    #[test]
    fn test_memo_returns_same_instance() {
        let mut session = Session::default();
        let mut b = GraphBuilder::new(&mut session);
        let f = b.function("f", &["x"]);
        let x = b.param(f, 1);
        b.ret(f, vec![x]);
        let args = [Any::unknown(), Any::unknown_of(TYPE_I32)];
        let a = fold_type_label(&mut session, f, None, &args).unwrap();
        let b = fold_type_label(&mut session, f, None, &args).unwrap();
        assert_eq!(a, b);
        assert!(!session.label(a).flags.reentrant);
        let c = fold_type_label_single(&mut session, f, None, &args).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_specializations_per_template_are_bounded() {
        let mut session = Session::new(crate::config::SolverConfig::default().with_max_unroll(3));
        let mut b = GraphBuilder::new(&mut session);
        let f = b.function("f", &["x"]);
        let x = b.param(f, 1);
        b.ret(f, vec![x]);
        for i in 0..3 {
            fold_type_label(&mut session, f, None, &[Any::unknown(), Any::i32(i)]).unwrap();
        }
        let again = fold_type_label(&mut session, f, None, &[Any::unknown(), Any::i32(0)]);
        assert!(again.is_ok());
        let err = fold_type_label(&mut session, f, None, &[Any::unknown(), Any::i32(3)]).unwrap_err();
        assert!(err.to_string().contains("loop unrolling exceeded 3"));
    }

    #[test]
    fn test_varargs_spread_into_calls() {
        let mut session = Session::default();
        let mut b = GraphBuilder::new(&mut session);
        let f = b.function("f", &[]);
        let rest = b.vararg(f, "rest");
        let ret = b.cont(f);
        b.call(f, Any::builtin(Builtin::Dump), ret, vec![Any::param(rest)]);
        let instance = mangle(
            &mut session,
            f,
            None,
            &[Any::unknown(), Any::i32(1), Any::unknown_of(TYPE_I32)],
        )
        .unwrap();
        let label = session.label(instance);
        assert_eq!(label.body.args.len(), 3);
        assert_eq!(label.body.args[1].value, Any::i32(1));
    }

    #[test]
    fn test_typify_checks_arity() {
        let mut session = Session::default();
        let mut b = GraphBuilder::new(&mut session);
        let f = b.function("f", &["x"]);
        let x = b.param(f, 1);
        b.ret(f, vec![x]);
        assert!(typify(&mut session, f, &[]).is_err());
        let instance = typify(&mut session, f, &[TYPE_I32]).unwrap();
        assert_eq!(session.return_type(instance), TYPE_UNKNOWN);
    }
}
