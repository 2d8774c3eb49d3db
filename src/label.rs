//! Labels, parameters and bodies
//!
//! A `Label` is one node of the continuation-passing graph: a parameter
//! list and a single call. By convention `params[0]` and `args[0]` are the
//! continuation slot; a label whose continuation parameter is typed
//! `Nothing` never returns and is used as a basic block.

use std::collections::HashMap;
use std::fmt;

use crate::anchor::Anchor;
use crate::frame::FrameId;
use crate::symbol::Symbol;
use crate::types::TypeId;
use crate::value::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub label: LabelId,
    pub index: usize,
    pub name: Symbol,
    /// `Unknown` until typed; written at most once
    pub ty: TypeId,
    pub vararg: bool,
    pub anchor: Anchor,
    /// Where the type was inferred, for mismatch reports
    pub typed_at: Option<Anchor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub key: Option<Symbol>,
    pub value: Any,
}

impl Argument {
    pub fn new(value: Any) -> Self {
        Self { key: None, value }
    }

    pub fn keyed(key: Symbol, value: Any) -> Self {
        Self {
            key: Some(key),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyFlags {
    pub complete: bool,
    /// Call `enter` as is, without `__call` dispatch
    pub rawcall: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub anchor: Anchor,
    pub enter: Any,
    pub args: Vec<Argument>,
    pub flags: BodyFlags,
}

impl Body {
    pub fn new(anchor: Anchor) -> Self {
        Self {
            anchor,
            enter: Any::nothing(),
            args: vec![Argument::new(Any::nothing())],
            flags: BodyFlags::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.flags.complete
    }

    pub fn set_complete(&mut self) {
        self.flags.complete = true;
    }

    pub fn continuation(&self) -> Any {
        self.args
            .first()
            .map(|arg| arg.value.clone())
            .unwrap_or_else(Any::nothing)
    }

    /// `enter` followed by every argument value
    pub fn values(&self) -> impl Iterator<Item = &Any> {
        std::iter::once(&self.enter).chain(self.args.iter().map(|arg| &arg.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Template,
    Instance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelFlags {
    /// Called again before its own return type was known
    pub reentrant: bool,
    /// Repeated specialization may differ; never memoized
    pub impure: bool,
}

/// Memo key of a template's instance table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub frame: Option<FrameId>,
    pub args: Vec<Any>,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: Symbol,
    pub anchor: Anchor,
    pub params: Vec<ParamId>,
    pub body: Body,
    pub kind: LabelKind,
    pub frame: Option<FrameId>,
    /// The label this one was duplicated from
    pub original: Option<LabelId>,
    pub flags: LabelFlags,
    pub instances: HashMap<InstanceKey, LabelId>,
}

impl Label {
    pub fn new(name: Symbol, anchor: Anchor, kind: LabelKind) -> Self {
        Self {
            name,
            anchor,
            params: Vec::new(),
            body: Body::new(anchor),
            kind,
            frame: None,
            original: None,
            flags: LabelFlags::default(),
            instances: HashMap::new(),
        }
    }

    pub fn is_template(&self) -> bool {
        self.kind == LabelKind::Template
    }

    pub fn is_instance(&self) -> bool {
        self.kind == LabelKind::Instance
    }

    pub fn continuation_param(&self) -> Option<ParamId> {
        self.params.first().copied()
    }

    /// Only the continuation slot
    pub fn is_parameterless(&self) -> bool {
        self.params.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TYPE_I32;

    #[test]
    fn test_new_body_jumps_nowhere() {
        let body = Body::new(Anchor::unknown());
        assert!(body.enter.is_nothing());
        assert!(body.continuation().is_nothing());
        assert!(!body.is_complete());
    }

    #[test]
    fn test_body_values_start_with_enter() {
        let mut body = Body::new(Anchor::unknown());
        body.enter = Any::i32(1);
        body.args.push(Argument::new(Any::i32(2)));
        let values: Vec<_> = body.values().cloned().collect();
        assert_eq!(values, vec![Any::i32(1), Any::nothing(), Any::i32(2)]);
        assert_eq!(values[0].ty, TYPE_I32);
    }
}
