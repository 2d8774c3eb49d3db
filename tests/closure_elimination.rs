//! Closure elimination tests
//!
//! Functions defined inside other functions use their parameters directly.
//! After solving, every such capture must have become an explicit
//! parameter, and no closure value may survive.

use larch::builtins::Builtin;
use larch::label::LabelId;
use larch::test_support::{builtins_called, capture_program, labels_named, solve_error, solve_template};
use larch::types::TYPE_I32;
use larch::value::Any;
use larch::{GraphBuilder, Session, SolverConfig};

fn no_inlining() -> Session {
    Session::new(SolverConfig::default().without_inlining())
}

/// `outer(x)` defines `mid() = inner()` and `inner() = x + 1`, returning `mid()`
fn nested_capture_program(session: &mut Session) -> LabelId {
    let mut g = GraphBuilder::new(session);
    let outer = g.function("outer", &["x"]);
    let x = g.param(outer, 1);
    let inner = g.function("inner", &[]);
    let inner_ret = g.cont(inner);
    g.call(inner, Any::builtin(Builtin::Add), inner_ret, vec![x, Any::i32(1)]);
    let mid = g.function("mid", &[]);
    let mid_ret = g.cont(mid);
    g.call(mid, Any::label(inner), mid_ret, vec![]);
    let ret = g.cont(outer);
    g.call(outer, Any::label(mid), ret, vec![]);
    outer
}

mod lifting {
    use super::*;

    #[test]
    fn inlined_closure_leaves_one_function() {
        let mut session = Session::default();
        let outer = capture_program(&mut session);
        let entry = solve_template(&mut session, outer, &[TYPE_I32]).unwrap();
        assert!(labels_named(&session, entry, "inner").is_empty());
        assert_eq!(builtins_called(&session, entry), vec![Builtin::Add]);
    }

    #[test]
    fn captured_parameter_becomes_explicit() {
        let mut session = no_inlining();
        let outer = capture_program(&mut session);
        let entry = solve_template(&mut session, outer, &[TYPE_I32]).unwrap();

        let inner = labels_named(&session, entry, "inner");
        assert_eq!(inner.len(), 1);
        let inner = inner[0];
        assert_eq!(session.label(inner).params.len(), 2);
        assert!(session.captured_params(inner).is_empty());

        let call = &session.label(entry).body;
        assert_eq!(call.enter, Any::label(inner));
        let x = session.label(entry).params[1];
        assert_eq!(call.args.last().map(|arg| arg.value.clone()), Some(Any::param(x)));
        let ret = session.return_type(inner);
        assert_eq!(session.type_name(ret), "λ(i32)");
    }

    #[test]
    fn lifting_propagates_through_callers() {
        let mut session = no_inlining();
        let outer = nested_capture_program(&mut session);
        let entry = solve_template(&mut session, outer, &[TYPE_I32]).unwrap();
        for name in ["mid", "inner"] {
            let found = labels_named(&session, entry, name);
            assert_eq!(found.len(), 1, "expected one {}", name);
            assert_eq!(session.label(found[0]).params.len(), 2, "{} was not lifted", name);
        }
        for label in session.reachable_labels(entry) {
            if !session.is_basic_block_like(label) {
                assert!(session.captured_params(label).is_empty());
            }
        }
    }

    #[test]
    fn lifting_keeps_original_link() {
        let mut session = no_inlining();
        let outer = capture_program(&mut session);
        let entry = solve_template(&mut session, outer, &[TYPE_I32]).unwrap();
        let inner = labels_named(&session, entry, "inner")[0];
        let original = session.label(inner).original.unwrap();
        assert_eq!(session.label_name(original), "inner");
        assert_ne!(original, inner);
    }
}

mod escaping {
    use super::*;

    #[test]
    fn returned_closure_is_rejected() {
        let mut session = Session::default();
        let mut g = GraphBuilder::new(&mut session);
        let outer = g.function("outer", &["x"]);
        let x = g.param(outer, 1);
        let inner = g.function("inner", &[]);
        let inner_ret = g.cont(inner);
        g.call(inner, Any::builtin(Builtin::Add), inner_ret, vec![x, Any::i32(1)]);
        g.ret(outer, vec![Any::label(inner)]);
        let err = solve_error(&mut session, outer, &[TYPE_I32]).unwrap();
        assert!(err.to_string().contains("closure"), "got: {}", err);
    }
}
