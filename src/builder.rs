//! Construction API for template graphs
//!
//! The macro expander produces templates through this interface; tests use
//! it to write programs directly. Every label gets a continuation parameter
//! at index 0: `function` leaves it untyped so the solver infers the return
//! type, `block` types it `Nothing` so the label is a jump target.

use crate::anchor::{Anchor, SourceId, Span};
use crate::builtins::Builtin;
use crate::label::{Argument, Body, LabelId, LabelKind, ParamId};
use crate::session::Session;
use crate::types::{TypeId, TYPE_NOTHING, TYPE_UNKNOWN};
use crate::value::{mask, Any};

pub struct GraphBuilder<'a> {
    session: &'a mut Session,
    source: Option<SourceId>,
    anchor: Anchor,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        Self {
            session,
            source: None,
            anchor: Anchor::unknown(),
        }
    }

    /// Register `text` as the source subsequent anchors point into
    pub fn with_source(mut self, name: &str, text: &str) -> Self {
        self.source = Some(self.session.add_source(name, text));
        self
    }

    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    /// Anchor over `start..end` of the current source
    pub fn span(&self, start: usize, end: usize) -> Anchor {
        match self.source {
            Some(source) => Anchor::new(source, Span::new(start, end)),
            None => Anchor::unknown(),
        }
    }

    /// Anchor given to labels and bodies created from now on
    pub fn at(&mut self, anchor: Anchor) -> &mut Self {
        self.anchor = anchor;
        self
    }

    /// Anchor of the first occurrence of `needle` in the current source
    pub fn find(&self, needle: &str) -> Anchor {
        let found = self
            .source
            .and_then(|id| self.session.source(id))
            .and_then(|map| map.source().find(needle));
        match found {
            Some(start) => self.span(start, start + needle.len()),
            None => Anchor::unknown(),
        }
    }

    // ========================================================================
    // Labels
    // ========================================================================

    fn label(&mut self, name: &str, cont_type: TypeId, params: &[&str]) -> LabelId {
        let sym = self.session.intern(name);
        let label = self.session.new_label(sym, self.anchor, LabelKind::Template);
        let ret = self.session.intern("return");
        self.session.new_param(label, ret, cont_type, false, self.anchor);
        for param in params {
            let sym = self.session.intern(param);
            self.session.new_param(label, sym, TYPE_UNKNOWN, false, self.anchor);
        }
        label
    }

    /// A template that returns through its continuation
    pub fn function(&mut self, name: &str, params: &[&str]) -> LabelId {
        self.label(name, TYPE_UNKNOWN, params)
    }

    /// A template that never returns
    pub fn block(&mut self, name: &str, params: &[&str]) -> LabelId {
        self.label(name, TYPE_NOTHING, params)
    }

    pub fn typed_param(&mut self, label: LabelId, name: &str, ty: TypeId) -> Any {
        let sym = self.session.intern(name);
        Any::param(self.session.new_param(label, sym, ty, false, self.anchor))
    }

    /// Trailing parameter that binds every remaining argument
    pub fn vararg(&mut self, label: LabelId, name: &str) -> ParamId {
        let sym = self.session.intern(name);
        self.session.new_param(label, sym, TYPE_UNKNOWN, true, self.anchor)
    }

    pub fn param(&self, label: LabelId, index: usize) -> Any {
        Any::param(self.session.label(label).params[index])
    }

    pub fn cont(&self, label: LabelId) -> Any {
        self.param(label, 0)
    }

    pub fn impure(&mut self, label: LabelId) {
        self.session.label_mut(label).flags.impure = true;
    }

    pub fn rawcall(&mut self, label: LabelId) {
        self.session.label_mut(label).body.flags.rawcall = true;
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    pub fn call(&mut self, label: LabelId, enter: Any, cont: Any, args: Vec<Any>) {
        let keyed = args.into_iter().map(|value| (None, value)).collect();
        self.call_keyed(label, enter, cont, keyed);
    }

    pub fn call_keyed(&mut self, label: LabelId, enter: Any, cont: Any, args: Vec<(Option<&str>, Any)>) {
        let mut body = Body::new(self.anchor);
        let rawcall = self.session.label(label).body.flags.rawcall;
        body.enter = enter;
        body.args = vec![Argument::new(cont)];
        for (key, value) in args {
            let argument = match key {
                Some(key) => Argument::keyed(self.session.intern(key), value),
                None => Argument::new(value),
            };
            body.args.push(argument);
        }
        body.flags.rawcall = rawcall;
        self.session.label_mut(label).body = body;
    }

    /// Return `values` through the label's own continuation
    pub fn ret(&mut self, label: LabelId, values: Vec<Any>) {
        let cont = self.cont(label);
        self.call(label, cont, Any::nothing(), values);
    }

    pub fn jump(&mut self, label: LabelId, target: Any, args: Vec<Any>) {
        self.call(label, target, Any::nothing(), args);
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Integer constant of type `ty`, masked to its width
    pub fn int(&self, ty: TypeId, value: i64) -> Any {
        let width = self
            .session
            .types
            .integer_info(ty)
            .map(|(width, _)| width)
            .unwrap_or(64);
        Any::int(ty, mask(value as u64, width))
    }

    pub fn builtin(&self, name: &str) -> Option<Any> {
        Builtin::from_name(name).map(Any::builtin)
    }

    pub fn symbol(&mut self, name: &str) -> Any {
        Any::symbol(self.session.intern(name))
    }
}
