//! Call handlers, one per kind of `enter` value

use log::{debug, trace};

use super::{Flow, Solver, TailCall};
use crate::anchor::Anchor;
use crate::builtins::{self, Builtin};
use crate::errors::{find_similar, CompileError, CompileResult};
use crate::frame::ClosureId;
use crate::label::{Argument, Body, BodyFlags, LabelId, ParamId};
use crate::mangle::{fold_type_label, fold_type_label_single};
use crate::types::{TypeId, FN_PURE, FN_VARIADIC, TYPE_BOOL, TYPE_EMPTY_TUPLE, TYPE_NOTHING, TYPE_UNKNOWN};
use crate::value::{Any, Payload};

impl<'s> Solver<'s> {
    fn body(&self, label: LabelId) -> Body {
        self.session.label(label).body.clone()
    }

    fn set_call(&mut self, label: LabelId, enter: Any, cont: Any, args: Vec<Any>) {
        let body = &mut self.session.label_mut(label).body;
        body.enter = enter;
        body.args = std::iter::once(cont).chain(args).map(Argument::new).collect();
    }

    // ========================================================================
    // Closures
    // ========================================================================

    /// Match keyed and positional arguments to the template's parameters
    fn resolve_arguments(
        &self,
        template: LabelId,
        args: &[Argument],
        anchor: Anchor,
    ) -> CompileResult<Vec<Any>> {
        let params = &self.session.label(template).params;
        let names: Vec<_> = params.iter().skip(1).map(|p| self.session.param(*p).name).collect();
        let variadic = params.len() > 1
            && params
                .last()
                .map(|p| self.session.param(*p).vararg)
                .unwrap_or(false);
        let fixed = if variadic { names.len() - 1 } else { names.len() };

        let mut slots: Vec<Option<Any>> = vec![None; fixed];
        let mut tail = Vec::new();
        let mut next = 0;
        for arg in args {
            match arg.key {
                Some(key) => {
                    let Some(index) = names[..fixed].iter().position(|n| *n == key) else {
                        let candidates: Vec<&str> =
                            names.iter().map(|n| self.session.symbol_name(*n)).collect();
                        let key_name = self.session.symbol_name(key);
                        return Err(CompileError::location(
                            anchor,
                            format!(
                                "{} has no parameter named {}",
                                self.session.label_name(template),
                                key_name
                            ),
                        )
                        .with_suggestions(find_similar(key_name, candidates, 2)));
                    };
                    if slots[index].is_some() {
                        return Err(CompileError::location(
                            anchor,
                            format!(
                                "duplicate binding to parameter {}",
                                self.session.symbol_name(key)
                            ),
                        ));
                    }
                    slots[index] = Some(arg.value.clone());
                }
                None => {
                    while next < fixed && slots[next].is_some() {
                        next += 1;
                    }
                    if next < fixed {
                        slots[next] = Some(arg.value.clone());
                        next += 1;
                    } else if variadic {
                        tail.push(arg.value.clone());
                    } else {
                        trace!("dropping extra argument to {}", self.session.label_name(template));
                    }
                }
            }
        }
        let mut positional: Vec<Any> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(Any::nothing))
            .collect();
        positional.extend(tail);
        Ok(positional)
    }

    fn check_recursion(&self, template: LabelId, anchor: Anchor) -> CompileResult<()> {
        let root = self.session.root_template(template);
        let depth = self
            .active
            .iter()
            .filter(|l| self.session.root_template(**l) == root)
            .count();
        let limit = self.session.config.max_recursions;
        if depth >= limit {
            return Err(CompileError::MaxRecursions { anchor, limit });
        }
        Ok(())
    }

    /// Replace the body of `label` with a copy of the body of `source`
    fn splice(&mut self, label: LabelId, source: LabelId, anchor: Anchor) -> CompileResult<()> {
        if let Some(frame) = self.session.label(label).frame {
            let count = {
                let frame = self.session.frame_mut(frame);
                frame.loop_count += 1;
                frame.loop_count
            };
            let limit = self.session.config.max_unroll;
            if count > limit {
                return Err(CompileError::location(
                    anchor,
                    format!("loop unrolling exceeded {} iterations", limit),
                ));
            }
        }
        let mut body = self.body(source);
        body.flags = BodyFlags {
            complete: false,
            rawcall: body.flags.rawcall,
        };
        self.spliced.entry(label).or_default().insert(source);
        trace!("splicing {} into {}", source, label);
        self.session.label_mut(label).body = body;
        Ok(())
    }

    fn spliced_into(&self, label: LabelId, source: LabelId) -> bool {
        self.spliced.get(&label).is_some_and(|sources| sources.contains(&source))
    }

    fn should_inline(&self, instance: LabelId) -> bool {
        let label = self.session.label(instance);
        if label.flags.reentrant || !label.body.is_complete() {
            return false;
        }
        let policy = self.session.config.inline;
        let ret = self.session.return_type(instance);
        (policy.inline_parameterless && label.is_parameterless())
            || self.session.function_cfg(instance).len() <= policy.max_trivial_labels
            || self.session.types.contains_closure(ret)
            || self.session.types.is_local_pointer(ret)
    }

    pub(super) fn call_closure(&mut self, label: LabelId, closure: ClosureId) -> CompileResult<Flow> {
        let closure = self.session.closure_data(closure);
        let template = closure.label;
        let body = self.body(label);
        let anchor = body.anchor;
        let cont = body.continuation();
        let positional = self.resolve_arguments(template, &body.args[1..], anchor)?;

        let mut mangle_args = Vec::with_capacity(positional.len() + 1);
        mangle_args.push(Any::unknown());
        let mut runtime = Vec::new();
        for value in &positional {
            match value.as_param() {
                Some(p) => {
                    mangle_args.push(Any::unknown_of(self.session.param(p).ty));
                    runtime.push(value.clone());
                }
                None => mangle_args.push(value.clone()),
            }
        }

        let types: Vec<TypeId> = positional.iter().map(|v| self.session.value_type(v)).collect();
        self.check_typed_params(template, &types, anchor)?;
        self.check_recursion(template, anchor)?;
        let instance = fold_type_label(self.session, template, closure.frame, &mangle_args)?;
        if self.active.contains(&instance) {
            self.session.label_mut(instance).flags.reentrant = true;
        }

        if self.session.is_basic_block_like(instance) {
            if !cont.is_nothing() {
                return Err(CompileError::location(
                    anchor,
                    format!(
                        "{} never returns, but is called with a continuation",
                        self.session.label_name(template)
                    ),
                ));
            }
            if self.spliced_into(label, instance) {
                // the block jumps back into itself
                self.session.label_mut(instance).flags.reentrant = true;
            }
            let data = self.session.label(instance);
            if data.is_parameterless() && !data.flags.reentrant {
                self.splice(label, instance, anchor)?;
                return Ok(Flow::Continue);
            }
            self.set_call(label, Any::label(instance), Any::nothing(), runtime);
            return Ok(Flow::Complete);
        }

        if !self.session.label(instance).body.is_complete() && !self.active.contains(&instance) {
            self.complete_function(instance)?;
        }
        if self.should_inline(instance) {
            let ret = self.session.return_type(instance);
            if cont.is_nothing() && ret != TYPE_NOTHING && ret != TYPE_UNKNOWN {
                self.type_continuation(&cont, ret, anchor)?;
            }
            let mut inline_args = Vec::with_capacity(positional.len() + 1);
            inline_args.push(cont);
            inline_args.extend(positional);
            let inlined = fold_type_label_single(self.session, template, closure.frame, &inline_args)?;
            debug!("inlining {} into {}", self.session.label_name(template), label);
            self.splice(label, inlined, anchor)?;
            return Ok(Flow::Continue);
        }

        let cont = match self.returning_continuation(instance, cont, anchor)? {
            Some(cont) => cont,
            None => return Ok(Flow::Defer),
        };
        self.set_call(label, Any::label(instance), cont, runtime);
        Ok(Flow::Complete)
    }

    /// The continuation a call to the function `callee` should pass, or
    /// `None` if the call must wait for the callee's return type
    fn returning_continuation(
        &mut self,
        callee: LabelId,
        cont: Any,
        anchor: Anchor,
    ) -> CompileResult<Option<Any>> {
        let ret = self.session.return_type(callee);
        if ret == TYPE_NOTHING {
            return Ok(Some(Any::nothing()));
        }
        if ret != TYPE_UNKNOWN {
            return self.type_continuation(&cont, ret, anchor).map(Some);
        }
        if !self.return_pending(callee) {
            // solved without ever returning
            if let Some(p) = self.session.label(callee).continuation_param() {
                self.session.param_mut(p).ty = TYPE_NOTHING;
            }
            return Ok(Some(Any::nothing()));
        }
        match cont.payload {
            Payload::Parameter(param) => {
                self.tail_calls.push(TailCall {
                    param,
                    callee,
                    anchor,
                });
                Ok(Some(cont))
            }
            Payload::Nothing => Ok(Some(cont)),
            _ => Ok(None),
        }
    }

    /// Type the continuation `cont` for values of return type `ret`
    fn type_continuation(&mut self, cont: &Any, ret: TypeId, anchor: Anchor) -> CompileResult<Any> {
        let values = match self.session.types.return_label_values(ret) {
            Some(values) => values.to_vec(),
            None => {
                return Err(CompileError::internal(format!(
                    "{} is not a return type",
                    self.session.type_name(ret)
                )))
            }
        };
        match cont.payload {
            Payload::Nothing => Err(CompileError::location(
                anchor,
                format!("returned values {} are discarded", self.session.type_name(ret)),
            )),
            Payload::Parameter(p) => {
                self.session.unify_param(p, ret, anchor)?;
                Ok(cont.clone())
            }
            Payload::Closure(c) => {
                let closure = self.session.closure_data(c);
                self.check_continuation_arity(closure.label, values.len(), anchor)?;
                self.check_typed_params(closure.label, &values, anchor)?;
                let mut args = Vec::with_capacity(values.len() + 1);
                args.push(Any::nothing());
                args.extend(values.iter().map(|t| Any::unknown_of(*t)));
                let target = fold_type_label(self.session, closure.label, closure.frame, &args)?;
                Ok(Any::label(target))
            }
            Payload::Label(target) => {
                let params = self.session.label(target).params.clone();
                if params.len() != values.len() + 1 {
                    return Err(self.arity_error(target, params.len() - 1, values.len(), anchor));
                }
                for (p, ty) in params.iter().skip(1).zip(&values) {
                    self.session.unify_param(*p, *ty, anchor)?;
                }
                Ok(cont.clone())
            }
            _ => Err(CompileError::location(
                anchor,
                format!(
                    "cannot return to value of type {}",
                    self.session.type_name(self.session.value_type(cont))
                ),
            )),
        }
    }

    fn check_continuation_arity(&self, template: LabelId, count: usize, anchor: Anchor) -> CompileResult<()> {
        let params = &self.session.label(template).params;
        let expected = params.len().saturating_sub(1);
        let variadic = params
            .last()
            .map(|p| self.session.param(*p).vararg)
            .unwrap_or(false)
            && expected > 0;
        let accepted = if variadic {
            count + 1 >= expected
        } else {
            count == expected
        };
        if !accepted {
            return Err(self.arity_error(template, expected, count, anchor));
        }
        Ok(())
    }

    /// Arguments of type `types` against the declared parameter types of
    /// `template`, reported at the call site
    fn check_typed_params(&self, template: LabelId, types: &[TypeId], anchor: Anchor) -> CompileResult<()> {
        let params = &self.session.label(template).params;
        let vararg = params.last().filter(|p| params.len() > 1 && self.session.param(**p).vararg);
        for (i, ty) in types.iter().enumerate() {
            let Some(p) = params.get(i + 1).or(vararg) else {
                break;
            };
            let declared = self.session.param(*p).ty;
            if declared == TYPE_UNKNOWN || declared == *ty || *ty == TYPE_NOTHING || *ty == TYPE_UNKNOWN {
                continue;
            }
            return Err(self.session.type_mismatch(*p, *ty, anchor));
        }
        Ok(())
    }

    fn arity_error(&self, target: LabelId, expected: usize, got: usize, anchor: Anchor) -> CompileError {
        CompileError::location(
            anchor,
            format!(
                "{} takes {} arguments, but {} are passed",
                self.session.label_name(target),
                expected,
                got
            ),
        )
    }

    // ========================================================================
    // Builtins
    // ========================================================================

    pub(super) fn call_builtin(&mut self, label: LabelId, b: Builtin) -> CompileResult<Flow> {
        let body = self.body(label);
        let anchor = body.anchor;
        let cont = body.continuation();
        let args = &body.args[1..];
        let contract = b.contract();

        let count = args.len();
        if count < contract.min_args || contract.max_args.map_or(false, |max| count > max) {
            let expected = match contract.max_args {
                Some(max) if max == contract.min_args => max.to_string(),
                Some(max) => format!("{} to {}", contract.min_args, max),
                None => format!("at least {}", contract.min_args),
            };
            return Err(CompileError::location(
                anchor,
                format!("{} expects {} arguments, got {}", b.name(), expected, count),
            ));
        }
        if !contract.keyed_args_allowed && args.iter().any(|arg| arg.key.is_some()) {
            return Err(CompileError::location(
                anchor,
                format!("{} does not accept keyed arguments", b.name()),
            ));
        }
        let values: Vec<Any> = args.iter().map(|arg| arg.value.clone()).collect();

        if b == Builtin::Branch {
            return self.branch(label, &values, anchor);
        }

        let constant = values.iter().all(|v| self.session.is_constant(v));
        let results = builtins::result_types(self.session, b, &values, anchor)?;
        if contract.never_folds || (!constant && !contract.always_folds) {
            let cont = match results {
                None => Any::nothing(),
                Some(types) => {
                    let ret = self.session.types.return_label(types);
                    self.type_continuation(&cont, ret, anchor)?
                }
            };
            self.set_call(label, Any::builtin(b), cont, values);
            return Ok(Flow::Complete);
        }

        let folded = builtins::fold(self.session, b, &values, anchor)?;
        trace!("folded {} in {}", b.name(), label);
        self.set_call(label, cont, Any::nothing(), folded);
        Ok(Flow::Continue)
    }

    fn branch(&mut self, label: LabelId, values: &[Any], anchor: Anchor) -> CompileResult<Flow> {
        let cond = &values[0];
        let ty = self.session.value_type(cond);
        if ty != TYPE_BOOL {
            return Err(CompileError::location(
                anchor,
                format!("branch condition must be bool, got {}", self.session.type_name(ty)),
            ));
        }
        if let Some(taken) = cond.as_bool() {
            let arm = if taken { values[1].clone() } else { values[2].clone() };
            self.set_call(label, arm, Any::nothing(), Vec::new());
            return Ok(Flow::Continue);
        }
        let then_arm = self.branch_target(&values[1], anchor)?;
        let else_arm = self.branch_target(&values[2], anchor)?;
        self.set_call(
            label,
            Any::builtin(Builtin::Branch),
            Any::nothing(),
            vec![cond.clone(), then_arm, else_arm],
        );
        Ok(Flow::Complete)
    }

    fn branch_target(&mut self, arm: &Any, anchor: Anchor) -> CompileResult<Any> {
        match arm.payload {
            Payload::Closure(c) => {
                let closure = self.session.closure_data(c);
                let target = fold_type_label(self.session, closure.label, closure.frame, &[Any::nothing()])?;
                Ok(Any::label(target))
            }
            Payload::Label(target) if self.session.label(target).is_instance() => Ok(arm.clone()),
            _ => Err(CompileError::location(
                anchor,
                format!(
                    "branch target must be a label, got {}",
                    self.session.type_name(self.session.value_type(arm))
                ),
            )),
        }
    }

    // ========================================================================
    // Labels and Returns
    // ========================================================================

    pub(super) fn call_label(&mut self, label: LabelId, target: LabelId) -> CompileResult<Flow> {
        if self.session.label(target).is_template() {
            let from = self.session.label(label).frame;
            let capture = self.session.capture_frame(target, from);
            let closure = self.session.closure(target, capture);
            self.session.label_mut(label).body.enter = closure;
            return Ok(Flow::Continue);
        }
        let body = self.body(label);
        let anchor = body.anchor;
        let params = self.session.label(target).params.clone();
        if body.args.len() != params.len() {
            return Err(self.arity_error(target, params.len() - 1, body.args.len() - 1, anchor));
        }
        for (p, arg) in params.iter().zip(&body.args).skip(1) {
            let expected = self.session.param(*p).ty;
            let actual = self.session.value_type(&arg.value);
            if expected != actual {
                return Err(CompileError::location(
                    anchor,
                    format!(
                        "argument {} of {} must be {}, got {}",
                        self.session.param_name(*p),
                        self.session.label_name(target),
                        self.session.type_name(expected),
                        self.session.type_name(actual)
                    ),
                ));
            }
        }
        let cont = body.continuation();
        let cont = if self.session.is_basic_block_like(target) {
            if !cont.is_nothing() {
                return Err(CompileError::location(
                    anchor,
                    format!(
                        "{} never returns, but is called with a continuation",
                        self.session.label_name(target)
                    ),
                ));
            }
            cont
        } else {
            match self.returning_continuation(target, cont, anchor)? {
                Some(cont) => cont,
                None => return Ok(Flow::Defer),
            }
        };
        self.session.label_mut(label).body.args[0].value = cont;
        Ok(Flow::Complete)
    }

    /// A call to a continuation parameter: a return
    pub(super) fn call_parameter(&mut self, label: LabelId, p: ParamId) -> CompileResult<Flow> {
        let body = self.body(label);
        let anchor = body.anchor;
        let ty = self.session.param(p).ty;
        let returnable = ty == TYPE_UNKNOWN || self.session.types.return_label_values(ty).is_some();
        if !returnable {
            return Err(CompileError::location(
                anchor,
                format!(
                    "cannot call {} of type {}",
                    self.session.param_name(p),
                    self.session.type_name(ty)
                ),
            ));
        }
        let types: Vec<TypeId> = body.args[1..]
            .iter()
            .map(|arg| self.session.value_type(&arg.value))
            .collect();
        let ret = self.session.types.return_label(types);
        self.session.unify_param(p, ret, anchor)?;
        Ok(Flow::Complete)
    }

    // ========================================================================
    // Foreign Functions and Callable Values
    // ========================================================================

    pub(super) fn call_value(&mut self, label: LabelId, enter: &Any) -> CompileResult<Flow> {
        let ty = self.session.value_type(enter);
        if let Some(signature) = self.session.types.foreign_signature(ty) {
            return self.call_foreign(label, enter, signature);
        }
        let body = self.body(label);
        if !body.flags.rawcall {
            let call = self.session.intern("__call");
            if let Some(handler) = self.session.types.lookup(ty, call) {
                trace!("dispatching call on {} through __call", self.session.type_name(ty));
                let data = &mut self.session.label_mut(label).body;
                data.enter = handler;
                data.args.insert(1, Argument::new(enter.clone()));
                return Ok(Flow::Continue);
            }
        }
        Err(CompileError::location(
            body.anchor,
            format!("cannot call value of type {}", self.session.type_name(ty)),
        ))
    }

    fn call_foreign(
        &mut self,
        label: LabelId,
        enter: &Any,
        (ret, params, flags): (TypeId, Vec<TypeId>, u32),
    ) -> CompileResult<Flow> {
        let body = self.body(label);
        let anchor = body.anchor;
        let values: Vec<Any> = body.args[1..].iter().map(|arg| arg.value.clone()).collect();
        let variadic = flags & FN_VARIADIC != 0;
        if values.len() < params.len() || (values.len() > params.len() && !variadic) {
            return Err(CompileError::location(
                anchor,
                format!(
                    "foreign function expects {} arguments, got {}",
                    params.len(),
                    values.len()
                ),
            ));
        }
        for (i, (value, expected)) in values.iter().zip(&params).enumerate() {
            let actual = self.session.value_type(value);
            if actual != *expected {
                return Err(CompileError::location(
                    anchor,
                    format!(
                        "argument {} of foreign call must be {}, got {}",
                        i + 1,
                        self.session.type_name(*expected),
                        self.session.type_name(actual)
                    ),
                ));
            }
        }
        let returns_value = ret != TYPE_NOTHING && ret != TYPE_EMPTY_TUPLE;
        let cont = body.continuation();
        let constant = values.iter().all(|v| self.session.is_constant(v));
        if flags & FN_PURE != 0 && constant {
            let result = self
                .session
                .ffi()
                .run_ffi_function(enter, &values)
                .map_err(|message| CompileError::location(anchor, format!("foreign call failed: {}", message)))?;
            debug!("folded foreign call in {}", label);
            let results = if returns_value { vec![result] } else { Vec::new() };
            self.set_call(label, cont, Any::nothing(), results);
            return Ok(Flow::Continue);
        }
        let results = if returns_value { vec![ret] } else { Vec::new() };
        let ret = self.session.types.return_label(results);
        let cont = self.type_continuation(&cont, ret, anchor)?;
        self.session.label_mut(label).body.args[0].value = cont;
        Ok(Flow::Complete)
    }
}
