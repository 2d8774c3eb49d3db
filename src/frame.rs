//! Frames and closures
//!
//! A frame records how one instance was specialized: which template, the
//! enclosing frame, and what each template parameter was bound to. The
//! parent chain is the lexical environment; a free template parameter is
//! resolved by walking it.

use std::fmt;

use crate::label::LabelId;
use crate::value::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureId(pub u32);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// What a template parameter was bound to
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    One(Any),
    /// A variadic parameter's tail
    Many(Vec<Any>),
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub template: LabelId,
    pub parent: Option<FrameId>,
    pub instance: Option<LabelId>,
    /// Indexed like the template's parameters
    pub bindings: Vec<Binding>,
    /// Basic blocks spliced into this frame's instance so far
    pub loop_count: usize,
}

impl Frame {
    pub fn new(template: LabelId, parent: Option<FrameId>) -> Self {
        Self {
            template,
            parent,
            instance: None,
            bindings: Vec::new(),
            loop_count: 0,
        }
    }

    pub fn binding(&self, index: usize) -> Option<&Binding> {
        self.bindings.get(index)
    }
}

/// A template paired with the frame it closes over; hash-consed by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Closure {
    pub label: LabelId,
    pub frame: Option<FrameId>,
}
