//! The `Any` value model
//!
//! Every operand in the graph is an `Any`: a type tag plus an inline
//! payload. Aggregates share their elements behind an `Rc`, so cloning a
//! value is cheap and equality and hashing stay structural.

use std::rc::Rc;

use crate::builtins::Builtin;
use crate::frame::{ClosureId, FrameId};
use crate::label::{LabelId, ParamId};
use crate::symbol::Symbol;
use crate::types::{
    TypeId, TYPE_BOOL, TYPE_BUILTIN, TYPE_CLOSURE, TYPE_F32, TYPE_F64, TYPE_FRAME, TYPE_I32,
    TYPE_I64, TYPE_LABEL, TYPE_NOTHING, TYPE_PARAMETER, TYPE_STRING, TYPE_SYMBOL, TYPE_TYPE,
    TYPE_UNKNOWN,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Payload {
    Nothing,
    /// Integer bits, masked to the type's width
    Int(u64),
    /// Bits of an `f64`; `f32` values are stored widened
    Real(u64),
    Pointer(u64),
    Symbol(Symbol),
    Str(Rc<str>),
    Type(TypeId),
    Label(LabelId),
    Parameter(ParamId),
    Closure(ClosureId),
    Frame(FrameId),
    Builtin(Builtin),
    /// Elements of a tuple, array, vector or union constant
    Aggregate(Rc<[Any]>),
    /// Address of an extern resolved by name
    Extern(Symbol),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Any {
    pub ty: TypeId,
    pub payload: Payload,
}

impl Any {
    pub fn new(ty: TypeId, payload: Payload) -> Self {
        Self { ty, payload }
    }

    pub fn nothing() -> Self {
        Self::new(TYPE_NOTHING, Payload::Nothing)
    }

    /// Integer of type `ty`; the caller is responsible for masking
    pub fn int(ty: TypeId, bits: u64) -> Self {
        Self::new(ty, Payload::Int(bits))
    }

    pub fn bool(value: bool) -> Self {
        Self::int(TYPE_BOOL, value as u64)
    }

    pub fn i32(value: i32) -> Self {
        Self::int(TYPE_I32, u64::from(value as u32))
    }

    pub fn i64(value: i64) -> Self {
        Self::int(TYPE_I64, value as u64)
    }

    pub fn real(ty: TypeId, value: f64) -> Self {
        let value = if ty == TYPE_F32 { value as f32 as f64 } else { value };
        Self::new(ty, Payload::Real(value.to_bits()))
    }

    pub fn f32(value: f32) -> Self {
        Self::real(TYPE_F32, f64::from(value))
    }

    pub fn f64(value: f64) -> Self {
        Self::real(TYPE_F64, value)
    }

    pub fn pointer(ty: TypeId, address: u64) -> Self {
        Self::new(ty, Payload::Pointer(address))
    }

    pub fn extern_symbol(ty: TypeId, name: Symbol) -> Self {
        Self::new(ty, Payload::Extern(name))
    }

    pub fn symbol(sym: Symbol) -> Self {
        Self::new(TYPE_SYMBOL, Payload::Symbol(sym))
    }

    pub fn string(text: &str) -> Self {
        Self::new(TYPE_STRING, Payload::Str(Rc::from(text)))
    }

    pub fn ty(t: TypeId) -> Self {
        Self::new(TYPE_TYPE, Payload::Type(t))
    }

    pub fn label(l: LabelId) -> Self {
        Self::new(TYPE_LABEL, Payload::Label(l))
    }

    pub fn param(p: ParamId) -> Self {
        Self::new(TYPE_PARAMETER, Payload::Parameter(p))
    }

    pub fn closure(c: ClosureId) -> Self {
        Self::new(TYPE_CLOSURE, Payload::Closure(c))
    }

    pub fn frame(f: FrameId) -> Self {
        Self::new(TYPE_FRAME, Payload::Frame(f))
    }

    pub fn builtin(b: Builtin) -> Self {
        Self::new(TYPE_BUILTIN, Payload::Builtin(b))
    }

    pub fn aggregate(ty: TypeId, values: Vec<Any>) -> Self {
        Self::new(ty, Payload::Aggregate(Rc::from(values)))
    }

    /// Marker asking the mangler to keep a parameter and type it `t`
    pub fn unknown_of(t: TypeId) -> Self {
        Self::new(TYPE_UNKNOWN, Payload::Type(t))
    }

    /// Marker asking the mangler to keep a parameter untouched
    pub fn unknown() -> Self {
        Self::unknown_of(TYPE_UNKNOWN)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_nothing(&self) -> bool {
        self.ty == TYPE_NOTHING
    }

    pub fn is_unknown(&self) -> bool {
        self.ty == TYPE_UNKNOWN
    }

    pub fn is_bare_unknown(&self) -> bool {
        *self == Self::unknown()
    }

    /// Type carried by an Unknown marker
    pub fn unknown_type(&self) -> Option<TypeId> {
        match (&self.payload, self.ty) {
            (Payload::Type(t), TYPE_UNKNOWN) => Some(*t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self.payload {
            Payload::Int(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match (self.ty, &self.payload) {
            (TYPE_BOOL, Payload::Int(bits)) => Some(*bits != 0),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self.payload {
            Payload::Real(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<TypeId> {
        match (self.ty, &self.payload) {
            (TYPE_TYPE, Payload::Type(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<LabelId> {
        match self.payload {
            Payload::Label(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_param(&self) -> Option<ParamId> {
        match self.payload {
            Payload::Parameter(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<ClosureId> {
        match self.payload {
            Payload::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_builtin(&self) -> Option<Builtin> {
        match self.payload {
            Payload::Builtin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_aggregate(&self) -> Option<&[Any]> {
        match &self.payload {
            Payload::Aggregate(values) => Some(values),
            _ => None,
        }
    }

    /// Whether the value mentions a closure, looking inside aggregates
    pub fn contains_closure(&self) -> bool {
        match &self.payload {
            Payload::Closure(_) => true,
            Payload::Aggregate(values) => values.iter().any(Any::contains_closure),
            _ => false,
        }
    }
}

// ============================================================================
// Integer Helpers
// ============================================================================

pub fn mask(bits: u64, width: u32) -> u64 {
    if width >= 64 {
        bits
    } else {
        bits & ((1u64 << width) - 1)
    }
}

pub fn sign_extend(bits: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return bits as i64;
    }
    let shift = 64 - width;
    ((bits << shift) as i64) >> shift
}
