//! Test support infrastructure for building, solving and inspecting label graphs.
//!
//! This module provides tools for:
//! - Specializing and solving a template in one step
//! - Inspecting the solved graph (labels by name, calls, returned values)
//! - A handful of small programs shared by the integration tests
//!
//! # Philosophy
//! Tests should check not only that a program solves, but what the solved
//! graph looks like: which calls survive, what was folded away and which
//! continuations got typed.

use crate::builder::GraphBuilder;
use crate::builtins::Builtin;
use crate::errors::{format_solve_error, ErrorConfig, SolveError};
use crate::label::LabelId;
use crate::mangle::typify;
use crate::session::Session;
use crate::solver::solve;
use crate::types::TypeId;
use crate::value::{Any, Payload};
use crate::verify::verify_closed;

// ============================================================================
// Pipeline
// ============================================================================

/// Specialize `template` for `arg_types` and solve it
pub fn try_solve(session: &mut Session, template: LabelId, arg_types: &[TypeId]) -> Result<LabelId, SolveError> {
    let entry = typify(session, template, arg_types).map_err(|error| SolveError {
        error,
        traceback: Vec::new(),
    })?;
    solve(session, entry)
}

/// Like `try_solve`, rendering failures and checking the result is closed
pub fn solve_template(session: &mut Session, template: LabelId, arg_types: &[TypeId]) -> Result<LabelId, String> {
    let entry = try_solve(session, template, arg_types)
        .map_err(|e| format_solve_error(session, &e, &ErrorConfig::new(false)))?;
    verify_closed(session, entry).map_err(|e| format!("Verify error: {}", e))?;
    Ok(entry)
}

/// Solve and return the error, failing if solving succeeds
pub fn solve_error(session: &mut Session, template: LabelId, arg_types: &[TypeId]) -> Result<SolveError, String> {
    match try_solve(session, template, arg_types) {
        Ok(entry) => Err(format!(
            "expected an error, but {} solved:\n{}",
            session.label_name(entry),
            crate::printer::stream_graph(session, entry)
        )),
        Err(e) => Ok(e),
    }
}

// ============================================================================
// Graph Inspection
// ============================================================================

/// Reachable labels specialized from a template called `name`
pub fn labels_named(session: &Session, entry: LabelId, name: &str) -> Vec<LabelId> {
    session
        .reachable_labels(entry)
        .into_iter()
        .filter(|l| session.label_name(*l) == name)
        .collect()
}

/// Builtins still called anywhere in the graph
pub fn builtins_called(session: &Session, entry: LabelId) -> Vec<Builtin> {
    session
        .reachable_labels(entry)
        .into_iter()
        .filter_map(|l| session.label(l).body.enter.as_builtin())
        .collect()
}

/// Values passed to the entry's continuation, if some body returns directly
pub fn returned_values(session: &Session, entry: LabelId) -> Option<Vec<Any>> {
    let cont = session.label(entry).continuation_param()?;
    session.reachable_labels(entry).into_iter().find_map(|l| {
        let body = &session.label(l).body;
        match body.enter.payload {
            Payload::Parameter(p) if p == cont => {
                Some(body.args[1..].iter().map(|arg| arg.value.clone()).collect())
            }
            _ => None,
        }
    })
}

/// Labels that call other functions, as (caller, callee) pairs
pub fn function_calls(session: &Session, entry: LabelId) -> Vec<(LabelId, LabelId)> {
    session
        .reachable_labels(entry)
        .into_iter()
        .filter_map(|l| {
            let callee = session.label(l).body.enter.as_label()?;
            (!session.is_basic_block_like(callee)).then_some((l, callee))
        })
        .collect()
}

// ============================================================================
// Sample Programs
// ============================================================================

/// `main() = op(a, b)` for a builtin `op`
pub fn binary_constant_program(session: &mut Session, op: Builtin, a: Any, b: Any) -> LabelId {
    let mut g = GraphBuilder::new(session);
    let main = g.function("main", &[]);
    let ret = g.cont(main);
    g.call(main, Any::builtin(op), ret, vec![a, b]);
    main
}

/// `add2(x, y) = add(x, y)` and `main(a) = add2(a, 1)`
pub fn add2_program(session: &mut Session) -> LabelId {
    let mut g = GraphBuilder::new(session);
    let add2 = g.function("add2", &["x", "y"]);
    let (x, y) = (g.param(add2, 1), g.param(add2, 2));
    let ret = g.cont(add2);
    g.call(add2, Any::builtin(Builtin::Add), ret, vec![x, y]);

    let main = g.function("main", &["a"]);
    let a = g.param(main, 1);
    let ret = g.cont(main);
    g.call(main, Any::label(add2), ret, vec![a, Any::i32(1)]);
    main
}

/// `main(c) = if c then 1 else 2`, with `c` fixed to `cond` when given
pub fn choose_program(session: &mut Session, cond: Option<bool>) -> LabelId {
    let mut g = GraphBuilder::new(session);
    let params: &[&str] = if cond.is_some() { &[] } else { &["c"] };
    let main = g.function("main", params);
    let ret = g.cont(main);
    let then_block = g.block("then", &[]);
    let else_block = g.block("else", &[]);
    g.jump(then_block, ret.clone(), vec![Any::i32(1)]);
    g.jump(else_block, ret, vec![Any::i32(2)]);
    let c = match cond {
        Some(value) => Any::bool(value),
        None => g.param(main, 1),
    };
    g.call(
        main,
        Any::builtin(Builtin::Branch),
        Any::nothing(),
        vec![c, Any::label(then_block), Any::label(else_block)],
    );
    main
}

/// `countdown(n) = if n == 0 then 0 else countdown(n - 1) + 1`
pub fn countdown_program(session: &mut Session) -> LabelId {
    let mut g = GraphBuilder::new(session);
    let countdown = g.function("countdown", &["n"]);
    let n = g.param(countdown, 1);
    let ret = g.cont(countdown);

    let test = g.block("test", &["c"]);
    let done = g.block("done", &[]);
    let again = g.block("again", &[]);
    let dec = g.block("dec", &["m"]);
    let inc = g.block("inc", &["v"]);

    g.call(
        countdown,
        Any::builtin(Builtin::ICmpEQ),
        Any::label(test),
        vec![n.clone(), Any::i32(0)],
    );
    let c = g.param(test, 1);
    g.call(
        test,
        Any::builtin(Builtin::Branch),
        Any::nothing(),
        vec![c, Any::label(done), Any::label(again)],
    );
    g.jump(done, ret.clone(), vec![Any::i32(0)]);
    g.call(again, Any::builtin(Builtin::Sub), Any::label(dec), vec![n, Any::i32(1)]);
    let m = g.param(dec, 1);
    g.call(dec, Any::label(countdown), Any::label(inc), vec![m]);
    let v = g.param(inc, 1);
    g.call(inc, Any::builtin(Builtin::Add), ret, vec![v, Any::i32(1)]);
    countdown
}

/// `outer(x)` defines `inner(y) = x + y` and returns `inner(1)`
pub fn capture_program(session: &mut Session) -> LabelId {
    let mut g = GraphBuilder::new(session);
    let outer = g.function("outer", &["x"]);
    let x = g.param(outer, 1);
    let inner = g.function("inner", &["y"]);
    let y = g.param(inner, 1);
    let inner_ret = g.cont(inner);
    g.call(inner, Any::builtin(Builtin::Add), inner_ret, vec![x, y]);
    let ret = g.cont(outer);
    g.call(outer, Any::label(inner), ret, vec![Any::i32(1)]);
    outer
}
