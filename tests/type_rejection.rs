//! Rejection tests - programs the solver must refuse
//!
//! Categories:
//! 1. Return type conflicts - two returns that disagree
//! 2. Argument binding - keyed arguments, typed parameters
//! 3. Calls - values that cannot be called, builtin contracts
//! 4. Types - typename misuse
//! 5. Rendering - what the user sees when solving fails

use larch::anchor::Anchor;
use larch::builtins::Builtin;
use larch::errors::{format_solve_error, ErrorConfig, ErrorKind};
use larch::label::LabelId;
use larch::test_support::{returned_values, solve_error, solve_template};
use larch::types::{TYPE_BOOL, TYPE_F64, TYPE_I32};
use larch::value::Any;
use larch::{GraphBuilder, Session, SolverConfig};

const SOURCE: &str = "(fn main (c) (if c 1 2.5))";

/// `main(c) = if c then 1 else 2.5`, with anchors into `SOURCE`
fn conflicting_returns(session: &mut Session) -> LabelId {
    let mut g = GraphBuilder::new(session).with_source("main.sc", SOURCE);
    let anchor = g.find("(fn main");
    g.at(anchor);
    let main = g.function("main", &["c"]);
    let c = g.param(main, 1);
    let ret = g.cont(main);

    let anchor = g.find("1");
    g.at(anchor);
    let then_block = g.block("then", &[]);
    g.jump(then_block, ret.clone(), vec![Any::i32(1)]);

    let anchor = g.find("2.5");
    g.at(anchor);
    let else_block = g.block("else", &[]);
    g.jump(else_block, ret, vec![Any::f64(2.5)]);

    let anchor = g.find("(if");
    g.at(anchor);
    g.call(
        main,
        Any::builtin(Builtin::Branch),
        Any::nothing(),
        vec![c, Any::label(then_block), Any::label(else_block)],
    );
    main
}

const CALLS: &str = "(fn f (x) x) (fn main (a) (let v:i32 (f a) (let w:f64 (f a) w)))";

/// `main(a)` passes `f(a)` to a block expecting `i32`, then to one expecting
/// `f64`; returns the template and the anchor of the second call
fn conflicting_call_sites(session: &mut Session) -> (LabelId, Anchor) {
    let mut g = GraphBuilder::new(session).with_source("calls.sc", CALLS);
    let anchor = g.find("(fn f");
    g.at(anchor);
    let f = g.function("f", &["x"]);
    let x = g.param(f, 1);
    g.ret(f, vec![x]);

    let anchor = g.find("(fn main");
    g.at(anchor);
    let main = g.function("main", &["a"]);
    let a = g.param(main, 1);
    let ret = g.cont(main);

    let anchor = g.find("v:i32");
    g.at(anchor);
    let first_block = g.block("k1", &[]);
    g.typed_param(first_block, "v", TYPE_I32);

    let anchor = g.find("w:f64");
    g.at(anchor);
    let second_block = g.block("k2", &[]);
    let w = g.typed_param(second_block, "w", TYPE_F64);
    g.jump(second_block, ret, vec![w]);

    let first = CALLS.find("(f a)").unwrap();
    let anchor = g.span(first, first + 5);
    g.at(anchor);
    g.call(main, Any::label(f), Any::label(first_block), vec![a.clone()]);

    let second = CALLS.rfind("(f a)").unwrap();
    let call_site = g.span(second, second + 5);
    g.at(call_site);
    g.call(first_block, Any::label(f), Any::label(second_block), vec![a]);
    (main, call_site)
}

/// `f(count, value) = count - value`
fn subtract(g: &mut GraphBuilder) -> LabelId {
    let f = g.function("f", &["count", "value"]);
    let (count, value) = (g.param(f, 1), g.param(f, 2));
    let ret = g.cont(f);
    g.call(f, Any::builtin(Builtin::Sub), ret, vec![count, value]);
    f
}

// ============================================================================
// Return Type Conflicts
// ============================================================================

mod returns {
    use super::*;

    #[test]
    fn conflicting_return_types() {
        let mut session = Session::default();
        let main = conflicting_returns(&mut session);
        let err = solve_error(&mut session, main, &[TYPE_BOOL]).unwrap();
        assert_eq!(err.kind(), ErrorKind::Location);
        assert!(err.to_string().contains("type mismatch for return"), "got: {}", err);

        let related = err.error.related();
        assert_eq!(related.len(), 1);
        let here = err.error.anchor().unwrap();
        assert!(!here.is_unknown());
        assert!(!related[0].anchor.is_unknown());
        assert_ne!(here, related[0].anchor);
    }

    #[test]
    fn typed_continuation_reports_the_call_site() {
        let mut session = Session::new(SolverConfig::default().without_inlining());
        let (main, call_site) = conflicting_call_sites(&mut session);
        let err = solve_error(&mut session, main, &[TYPE_I32]).unwrap();
        assert_eq!(err.kind(), ErrorKind::Location);
        assert!(err.to_string().contains("type mismatch for w: expected f64, got i32"), "got: {}", err);
        assert_eq!(err.error.anchor(), Some(call_site));

        let related = err.error.related();
        assert_eq!(related.len(), 1);
        assert!(!related[0].anchor.is_unknown());
        assert_ne!(related[0].anchor, call_site);
        assert!(related[0].note.contains("w was typed f64 here"), "got: {}", related[0].note);
    }

    #[test]
    fn inlined_typed_continuation_keeps_the_parameter_note() {
        let mut session = Session::default();
        let (main, _) = conflicting_call_sites(&mut session);
        let err = solve_error(&mut session, main, &[TYPE_I32]).unwrap();
        assert!(err.to_string().contains("type mismatch for w"), "got: {}", err);
        assert_eq!(err.error.related().len(), 1);
    }

    #[test]
    fn discarded_return_value() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let f = g.function("f", &[]);
        g.ret(f, vec![Any::i32(1)]);
        let main = g.function("main", &[]);
        g.call(main, Any::label(f), Any::nothing(), vec![]);
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("discarded"), "got: {}", err);
    }
}

// ============================================================================
// Argument Binding
// ============================================================================

mod binding {
    use super::*;

    #[test]
    fn keyed_arguments_bind_by_name() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let f = subtract(&mut g);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call_keyed(
            main,
            Any::label(f),
            ret,
            vec![(Some("value"), Any::i32(1)), (Some("count"), Any::i32(10))],
        );
        let entry = solve_template(&mut session, main, &[]).unwrap();
        assert_eq!(returned_values(&session, entry), Some(vec![Any::i32(9)]));
    }

    #[test]
    fn duplicate_keyed_argument() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let f = subtract(&mut g);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call_keyed(
            main,
            Any::label(f),
            ret,
            vec![(Some("count"), Any::i32(1)), (Some("count"), Any::i32(2))],
        );
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("duplicate binding to parameter count"), "got: {}", err);
    }

    #[test]
    fn unknown_keyed_argument_suggests_a_name() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let f = subtract(&mut g);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call_keyed(
            main,
            Any::label(f),
            ret,
            vec![(Some("cont"), Any::i32(1)), (Some("value"), Any::i32(2))],
        );
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("f has no parameter named cont"), "got: {}", err);
        let rendered = format_solve_error(&session, &err, &ErrorConfig::new(false));
        assert!(rendered.contains("Did you mean count?"), "got: {}", rendered);
    }

    #[test]
    fn typed_parameter_rejects_other_types() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let f = g.function("f", &[]);
        let x = g.typed_param(f, "x", TYPE_I32);
        g.ret(f, vec![x]);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call(main, Any::label(f), ret, vec![Any::f64(2.5)]);
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("type mismatch for x: expected i32, got f64"), "got: {}", err);
        assert_eq!(err.error.related().len(), 1);
    }
}

// ============================================================================
// Calls
// ============================================================================

mod calls {
    use super::*;

    #[test]
    fn integer_is_not_callable() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call(main, Any::i32(5), ret, vec![]);
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("cannot call value of type i32"), "got: {}", err);
    }

    #[test]
    fn builtin_arity_is_checked() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call(main, Any::builtin(Builtin::Add), ret, vec![Any::i32(1)]);
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("expects 2 arguments, got 1"), "got: {}", err);
    }

    #[test]
    fn builtin_rejects_keyed_arguments() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call_keyed(
            main,
            Any::builtin(Builtin::Add),
            ret,
            vec![(Some("lhs"), Any::i32(1)), (None, Any::i32(2))],
        );
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("does not accept keyed arguments"), "got: {}", err);
    }

    #[test]
    fn mixed_operand_types_are_rejected() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let main = g.function("main", &["x"]);
        let x = g.param(main, 1);
        let ret = g.cont(main);
        g.call(main, Any::builtin(Builtin::Add), ret, vec![x, Any::f64(1.0)]);
        let err = solve_error(&mut session, main, &[TYPE_I32]).unwrap();
        assert!(err.to_string().contains("must have the same type"), "got: {}", err);
    }

    #[test]
    fn block_called_with_continuation() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let stop = g.block("stop", &[]);
        g.call(stop, Any::builtin(Builtin::Unreachable), Any::nothing(), vec![]);
        let main = g.function("main", &[]);
        let ret = g.cont(main);
        g.call(main, Any::label(stop), ret, vec![]);
        let err = solve_error(&mut session, main, &[]).unwrap();
        assert!(err.to_string().contains("never returns"), "got: {}", err);
    }
}

// ============================================================================
// Types
// ============================================================================

mod types {
    use super::*;

    #[test]
    fn typename_finalizes_once() {
        let mut session = Session::default();
        let point = session.types.typename("Point");
        assert!(session.types.finalize(point, TYPE_I32, Anchor::unknown()).is_ok());
        let err = session.types.finalize(point, TYPE_I32, Anchor::unknown()).unwrap_err();
        assert!(err.to_string().contains("already finalized"), "got: {}", err);
    }

    #[test]
    fn typename_storage_cannot_be_a_typename() {
        let mut session = Session::default();
        let a = session.types.typename("A");
        let b = session.types.typename("B");
        assert!(session.types.finalize(a, b, Anchor::unknown()).is_err());
    }

    #[test]
    fn supertype_cycle_is_rejected() {
        let mut session = Session::default();
        let a = session.types.typename("A");
        let b = session.types.typename("B");
        assert!(session.types.set_super(b, a, Anchor::unknown()).is_ok());
        assert!(session.types.set_super(a, b, Anchor::unknown()).is_err());
    }
}

// ============================================================================
// Rendering
// ============================================================================

mod rendering {
    use super::*;

    #[test]
    fn report_shows_locations_and_traceback() {
        let mut session = Session::default();
        let main = conflicting_returns(&mut session);
        let err = solve_error(&mut session, main, &[TYPE_BOOL]).unwrap();
        let rendered = format_solve_error(&session, &err, &ErrorConfig::new(false));
        assert!(rendered.starts_with("-- SPECIALIZATION ERROR"), "got: {}", rendered);
        assert!(rendered.contains("main.sc:1:"), "got: {}", rendered);
        assert!(rendered.contains("return was typed λ(i32) here") || rendered.contains("return was typed λ(f64) here"));
        assert!(rendered.contains("traceback (innermost last):"));
        assert!(rendered.contains("in main at main.sc:1:1"), "got: {}", rendered);
    }

    #[test]
    fn report_can_hide_traceback() {
        let mut session = Session::default();
        let main = conflicting_returns(&mut session);
        let err = solve_error(&mut session, main, &[TYPE_BOOL]).unwrap();
        let config = ErrorConfig::new(false).without_traceback();
        let rendered = format_solve_error(&session, &err, &config);
        assert!(!rendered.contains("traceback"));
    }
}
