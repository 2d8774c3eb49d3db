//! Recursion tests
//!
//! Categories:
//! 1. Runtime recursion - one reentrant instance, return type inferred
//! 2. Mutual recursion - A calls B calls A
//! 3. Compile-time recursion limits - constants that change on every call
//! 4. Loops - blocks that jump back to an earlier block
//! 5. Unresolvable recursion - no base case to learn the return type from

use larch::builtins::Builtin;
use larch::errors::ErrorKind;
use larch::label::LabelId;
use larch::test_support::{
    builtins_called, countdown_program, function_calls, labels_named, solve_error, solve_template,
};
use larch::types::{TYPE_BOOL, TYPE_I32, TYPE_NOTHING};
use larch::mangle::typify;
use larch::value::Any;
use larch::{GraphBuilder, Session, Solver, SolverConfig};

/// `name(n) = if n == 0 then base else ...`; returns the template and the
/// block receiving `n - 1`
fn parity(g: &mut GraphBuilder, name: &str, base: bool) -> (LabelId, LabelId) {
    let f = g.function(name, &["n"]);
    let n = g.param(f, 1);
    let ret = g.cont(f);
    let test = g.block("test", &["c"]);
    let yes = g.block("yes", &[]);
    let no = g.block("no", &[]);
    let next = g.block("next", &["m"]);
    g.call(f, Any::builtin(Builtin::ICmpEQ), Any::label(test), vec![n.clone(), Any::i32(0)]);
    let c = g.param(test, 1);
    g.call(
        test,
        Any::builtin(Builtin::Branch),
        Any::nothing(),
        vec![c, Any::label(yes), Any::label(no)],
    );
    g.jump(yes, ret, vec![Any::bool(base)]);
    g.call(no, Any::builtin(Builtin::Sub), Any::label(next), vec![n, Any::i32(1)]);
    (f, next)
}

mod runtime {
    use super::*;

    #[test]
    fn countdown_solves_with_reentrant_instance() {
        let mut session = Session::default();
        let countdown = countdown_program(&mut session);
        let entry = solve_template(&mut session, countdown, &[TYPE_I32]).unwrap();
        let ret = session.return_type(entry);
        assert_eq!(session.type_name(ret), "λ(i32)");

        let instances = labels_named(&session, entry, "countdown");
        assert!(instances.len() >= 2, "expected a recursive instance");
        assert!(instances.iter().any(|l| session.label(*l).flags.reentrant));
        let calls = function_calls(&session, entry);
        assert!(calls.iter().any(|(_, callee)| session.label(*callee).flags.reentrant));
    }

    #[test]
    fn countdown_is_deterministic() {
        let render = || {
            let mut session = Session::default();
            let countdown = countdown_program(&mut session);
            let entry = solve_template(&mut session, countdown, &[TYPE_I32]).unwrap();
            larch::printer::stream_graph(&session, entry)
        };
        assert_eq!(render(), render());
    }
}

mod mutual {
    use super::*;

    #[test]
    fn even_odd_infers_bool() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let (even, even_next) = parity(&mut g, "even", true);
        let (odd, odd_next) = parity(&mut g, "odd", false);
        for (from, next, to) in [(even, even_next, odd), (odd, odd_next, even)] {
            let m = g.param(next, 1);
            let ret = g.cont(from);
            g.call(next, Any::label(to), ret, vec![m]);
        }
        let entry = solve_template(&mut session, even, &[TYPE_I32]).unwrap();
        let ret = session.return_type(entry);
        assert_eq!(session.type_name(ret), "λ(bool)");
        assert!(!labels_named(&session, entry, "odd").is_empty());
    }
}

mod limits {
    use super::*;

    /// `count(n) = count(n + 1)`, called with a constant
    fn count_up(session: &mut Session) -> LabelId {
        let mut g = GraphBuilder::new(session);
        let count = g.function("count", &["n"]);
        let n = g.param(count, 1);
        let ret = g.cont(count);
        let next = g.block("next", &["m"]);
        g.call(count, Any::builtin(Builtin::Add), Any::label(next), vec![n, Any::i32(1)]);
        let m = g.param(next, 1);
        g.call(next, Any::label(count), ret, vec![m]);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call(main, Any::label(count), ret, vec![Any::i32(0)]);
        main
    }

    #[test]
    fn changing_constant_hits_recursion_limit() {
        let mut session = Session::new(SolverConfig::default().with_max_recursions(16));
        let main = count_up(&mut session);
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("recursions"), "got: {}", err);
        assert!(err.traceback.len() >= 16);
        assert!(err.traceback.iter().any(|entry| entry.label == "count"));
    }

    #[test]
    fn solver_is_reusable_after_a_failure() {
        let mut session = Session::new(SolverConfig::default().with_max_recursions(4));
        let main = count_up(&mut session);
        let entry = typify(&mut session, main, &[]).unwrap();
        let mut solver = Solver::new(&mut session);
        let err = solver.solve(entry).unwrap_err();
        assert!(!err.traceback.is_empty());

        let mut g = GraphBuilder::new(solver.session());
        let ok = g.function("ok", &[]);
        g.ret(ok, vec![Any::i32(1)]);
        let ok_entry = typify(solver.session(), ok, &[]).unwrap();
        assert_eq!(solver.solve(ok_entry).unwrap(), ok_entry);
    }

    #[test]
    fn runaway_unrolling_is_an_error() {
        let mut session = Session::new(SolverConfig::default().with_max_unroll(64));
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &[]);
        let step = g.block("step", &["i"]);
        let again = g.block("again", &["j"]);
        let i = g.param(step, 1);
        g.call(step, Any::builtin(Builtin::Add), Any::label(again), vec![i, Any::i32(1)]);
        let j = g.param(again, 1);
        g.jump(again, Any::label(step), vec![j]);
        g.jump(main, Any::label(step), vec![Any::i32(0)]);
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("unrolling"), "got: {}", err);
    }

    #[test]
    fn small_stack_limit_is_a_resource_error() {
        let mut session = Session::new(SolverConfig::default().with_stack_limit(64).without_inlining());
        let countdown = countdown_program(&mut session);
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &["x"]);
        let x = g.param(main, 1);
        let ret = g.cont(main);
        g.call(main, Any::label(countdown), ret, vec![x]);
        let err = solve_error(&mut session, main, &[TYPE_I32]).unwrap();
        assert_eq!(err.kind(), ErrorKind::Resource);
        assert!(err.to_string().contains("stack overflow"), "got: {}", err);
    }
}

mod loops {
    use super::*;

    /// `main(n, start) { i = start; while i < n { i = i + 1 }; return i }`;
    /// `start` is the initial value of the counter
    fn counter(session: &mut Session, start: Option<Any>) -> LabelId {
        let mut g = GraphBuilder::new(session);
        let params: &[&str] = if start.is_some() { &["n"] } else { &["n", "s"] };
        let main = g.function("main", params);
        let n = g.param(main, 1);
        let ret = g.cont(main);

        let head = g.block("loop", &["i"]);
        let test = g.block("test", &["c"]);
        let body = g.block("body", &[]);
        let next = g.block("next", &["j"]);
        let exit = g.block("exit", &[]);

        let i = g.param(head, 1);
        g.call(head, Any::builtin(Builtin::ICmpSLT), Any::label(test), vec![i.clone(), n]);
        let c = g.param(test, 1);
        g.call(
            test,
            Any::builtin(Builtin::Branch),
            Any::nothing(),
            vec![c, Any::label(body), Any::label(exit)],
        );
        g.call(body, Any::builtin(Builtin::Add), Any::label(next), vec![i.clone(), Any::i32(1)]);
        let j = g.param(next, 1);
        g.jump(next, Any::label(head), vec![j]);
        g.jump(exit, ret, vec![i]);

        let start = match start {
            Some(value) => value,
            None => g.param(main, 2),
        };
        g.jump(main, Any::label(head), vec![start]);
        main
    }

    #[test]
    fn runtime_counter_specializes_once() {
        let mut session = Session::default();
        let main = counter(&mut session, None);
        let entry = solve_template(&mut session, main, &[TYPE_I32, TYPE_I32]).unwrap();
        let ret = session.return_type(entry);
        assert_eq!(session.type_name(ret), "λ(i32)");
        assert_eq!(labels_named(&session, entry, "loop").len(), 1);
        let called = builtins_called(&session, entry);
        assert!(called.contains(&Builtin::ICmpSLT) && called.contains(&Builtin::Add), "got: {:?}", called);
    }

    #[test]
    fn constant_start_with_runtime_bound_is_bounded() {
        let mut session = Session::new(SolverConfig::default().with_max_unroll(32));
        let main = counter(&mut session, Some(Any::i32(0)));
        let err = solve_error(&mut session, main, &[TYPE_I32]).unwrap();
        assert_eq!(err.kind(), ErrorKind::Location);
        assert!(err.to_string().contains("loop unrolling exceeded 32 iterations"), "got: {}", err);
    }

    #[test]
    fn unconst_start_keeps_the_loop_at_runtime() {
        let mut session = Session::new(SolverConfig::default().with_max_unroll(32));
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &["n"]);
        let n = g.param(main, 1);
        let start = g.block("start", &["s"]);
        g.call(main, Any::builtin(Builtin::Unconst), Any::label(start), vec![Any::i32(0)]);
        let inner = counter(g.session(), None);
        let s = g.param(start, 1);
        let ret = g.cont(main);
        g.call(start, Any::label(inner), ret, vec![n, s]);
        let entry = solve_template(&mut session, main, &[TYPE_I32]).unwrap();
        let ret = session.return_type(entry);
        assert_eq!(session.type_name(ret), "λ(i32)");
        assert_eq!(labels_named(&session, entry, "loop").len(), 1);
    }

    #[test]
    fn sibling_arms_share_a_block_without_reentry() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &["c"]);
        let c = g.param(main, 1);
        let ret = g.cont(main);
        let join = g.block("join", &[]);
        g.jump(join, ret, vec![Any::i32(7)]);
        g.call(
            main,
            Any::builtin(Builtin::Branch),
            Any::nothing(),
            vec![c, Any::label(join), Any::label(join)],
        );
        let entry = solve_template(&mut session, main, &[TYPE_BOOL]).unwrap();
        let joins = labels_named(&session, entry, "join");
        assert_eq!(joins.len(), 1);
        assert!(!session.label(joins[0]).flags.reentrant);
    }

    #[test]
    fn arms_jumping_to_a_join_block_splice_it() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &["c"]);
        let c = g.param(main, 1);
        let ret = g.cont(main);
        let join = g.block("join", &[]);
        g.jump(join, ret, vec![Any::i32(7)]);
        let then_block = g.block("then", &[]);
        g.jump(then_block, Any::label(join), vec![]);
        let else_block = g.block("else", &[]);
        g.jump(else_block, Any::label(join), vec![]);
        g.call(
            main,
            Any::builtin(Builtin::Branch),
            Any::nothing(),
            vec![c, Any::label(then_block), Any::label(else_block)],
        );
        let entry = solve_template(&mut session, main, &[TYPE_BOOL]).unwrap();
        assert!(labels_named(&session, entry, "join").is_empty());
        let reachable = session.reachable_labels(entry);
        assert!(reachable.iter().all(|l| !session.label(*l).flags.reentrant));
        let ret = session.return_type(entry);
        assert_eq!(session.type_name(ret), "λ(i32)");
    }

    #[test]
    fn block_jumping_to_itself_is_reentrant() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let spin = g.block("spin", &[]);
        g.jump(spin, Any::label(spin), vec![]);
        let main = g.function("main", &[]);
        g.jump(main, Any::label(spin), vec![]);
        let entry = solve_template(&mut session, main, &[]).unwrap();
        let spins = labels_named(&session, entry, "spin");
        assert_eq!(spins.len(), 1);
        assert!(session.label(spins[0]).flags.reentrant);
        assert_eq!(session.label(entry).body.enter, Any::label(spins[0]));
        assert_eq!(session.return_type(entry), TYPE_NOTHING);
    }

    #[test]
    fn blocks_jumping_to_each_other_terminate() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let ping = g.block("ping", &["i"]);
        let pong = g.block("pong", &["i"]);
        let i = g.param(ping, 1);
        g.jump(ping, Any::label(pong), vec![i]);
        let i = g.param(pong, 1);
        g.jump(pong, Any::label(ping), vec![i]);
        let main = g.function("main", &["x"]);
        let x = g.param(main, 1);
        g.jump(main, Any::label(ping), vec![x]);
        let entry = solve_template(&mut session, main, &[TYPE_I32]).unwrap();
        assert_eq!(labels_named(&session, entry, "ping").len(), 1);
        assert!(labels_named(&session, entry, "pong").len() <= 1);
        assert_eq!(session.return_type(entry), TYPE_NOTHING);
    }
}

mod unresolvable {
    use super::*;

    #[test]
    fn recursion_without_base_case_cannot_infer_return() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let f = g.function("f", &["n"]);
        let n = g.param(f, 1);
        let ret = g.cont(f);
        let after = g.block("after", &["v"]);
        let v = g.param(after, 1);
        g.jump(after, ret, vec![v]);
        g.call(f, Any::label(f), Any::label(after), vec![n]);
        let err = solve_error(&mut session, f, &[TYPE_I32]).unwrap();
        assert!(err.to_string().contains("cannot infer return type"), "got: {}", err);
        assert_eq!(err.kind(), ErrorKind::Location);
    }

    #[test]
    fn tail_recursion_without_base_case_never_returns() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let f = g.function("f", &["n"]);
        let n = g.param(f, 1);
        let ret = g.cont(f);
        g.call(f, Any::label(f), ret, vec![n]);
        let entry = solve_template(&mut session, f, &[TYPE_I32]).unwrap();
        assert_eq!(session.return_type(entry), TYPE_NOTHING);
    }
}
