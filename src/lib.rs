//! Larch - a label IR and the partial-evaluation solver that specializes it

pub mod anchor;
pub mod builder;
pub mod builtins;
pub mod config;
pub mod errors;
pub mod ffi;
pub mod frame;
pub mod label;
pub mod mangle;
pub mod printer;
pub mod session;
pub mod solver;
pub mod symbol;
pub mod test_support;
pub mod types;
pub mod value;
pub mod verify;

pub use anchor::{Anchor, LocatedSpan, Position, SourceId, SourceMap, Span};
pub use builder::GraphBuilder;
pub use builtins::Builtin;
pub use config::{InlinePolicy, SolverConfig};
pub use errors::{
    find_similar, format_header, format_location, format_snippet, format_solve_error,
    format_suggestions, levenshtein_distance, Colors, CompileError, CompileResult, ErrorConfig,
    ErrorKind, SolveError, TraceEntry,
};
pub use ffi::{ForeignCall, NativeRegistry, NoForeignCalls};
pub use label::{LabelId, ParamId};
pub use mangle::{fold_type_label, fold_type_label_single, mangle, typify};
pub use session::Session;
pub use solver::{solve, Solver};
pub use types::{TypeId, TypeTable};
pub use value::Any;
pub use verify::verify_closed;
