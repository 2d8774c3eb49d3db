//! Builtin operations
//!
//! Every builtin declares a fixed `Contract`: arity bounds, whether keyed
//! arguments are accepted, whether it folds regardless of operand constness
//! (introspection) or never folds (control flow, memory), and how its result
//! types are derived. The solver dispatches on this table alone.
//!
//! Integer operands are stored masked to their width; signed operations
//! sign-extend before computing. Arithmetic, comparisons and conversions
//! apply element-wise to vector constants.

use log::info;

use crate::anchor::Anchor;
use crate::errors::{CompileError, CompileResult};
use crate::printer;
use crate::session::Session;
use crate::types::{
    StorageClass, TypeId, TypeKind, PTF_NON_READABLE, PTF_NON_WRITABLE, TYPE_BOOL, TYPE_TYPE,
    TYPE_USIZE,
};
use crate::value::{mask, sign_extend, Any};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    // control flow
    Branch,
    Unreachable,
    Discard,
    // introspection
    TypeOf,
    SizeOf,
    AlignOf,
    StorageOf,
    Dump,
    Unconst,
    // integer arithmetic
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    BAnd,
    BOr,
    BXor,
    // real arithmetic
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    FAbs,
    FNeg,
    Sqrt,
    Floor,
    // comparisons
    ICmpEQ,
    ICmpNE,
    ICmpSGT,
    ICmpSGE,
    ICmpSLT,
    ICmpSLE,
    ICmpUGT,
    ICmpUGE,
    ICmpULT,
    ICmpULE,
    FCmpOEQ,
    FCmpONE,
    FCmpOGT,
    FCmpOGE,
    FCmpOLT,
    FCmpOLE,
    // conversions
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToUI,
    FPToSI,
    UIToFP,
    SIToFP,
    Bitcast,
    // aggregates
    ExtractValue,
    InsertValue,
    ExtractElement,
    InsertElement,
    Select,
    // memory
    Alloca,
    Malloc,
    Free,
    Load,
    Store,
    GetElementPtr,
}

/// How a builtin's result types are derived from its operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultRule {
    /// Control never reaches the continuation
    NoReturn,
    /// Returns no values
    Empty,
    /// Returns its operands unchanged
    Passthrough,
    /// Same type as the first operand
    SameAsFirst,
    /// `bool`, or a vector of `bool` for vector operands
    Compare,
    /// The type given as second operand
    Cast,
    TypeOf,
    /// `usize`
    Layout,
    StorageOf,
    Unconst,
    ExtractValue,
    InsertValue,
    ExtractElement,
    InsertElement,
    Select,
    Alloca,
    Malloc,
    Load,
    GetElementPtr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contract {
    pub min_args: usize,
    /// `None` for no upper bound
    pub max_args: Option<usize>,
    pub keyed_args_allowed: bool,
    pub always_folds: bool,
    pub never_folds: bool,
    pub result: ResultRule,
}

const fn contract(min_args: usize, max_args: Option<usize>, result: ResultRule) -> Contract {
    Contract {
        min_args,
        max_args,
        keyed_args_allowed: false,
        always_folds: false,
        never_folds: false,
        result,
    }
}

const fn folding(mut c: Contract) -> Contract {
    c.always_folds = true;
    c
}

const fn runtime(mut c: Contract) -> Contract {
    c.never_folds = true;
    c
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::Branch,
        Builtin::Unreachable,
        Builtin::Discard,
        Builtin::TypeOf,
        Builtin::SizeOf,
        Builtin::AlignOf,
        Builtin::StorageOf,
        Builtin::Dump,
        Builtin::Unconst,
        Builtin::Add,
        Builtin::Sub,
        Builtin::Mul,
        Builtin::SDiv,
        Builtin::UDiv,
        Builtin::SRem,
        Builtin::URem,
        Builtin::Shl,
        Builtin::LShr,
        Builtin::AShr,
        Builtin::BAnd,
        Builtin::BOr,
        Builtin::BXor,
        Builtin::FAdd,
        Builtin::FSub,
        Builtin::FMul,
        Builtin::FDiv,
        Builtin::FRem,
        Builtin::FAbs,
        Builtin::FNeg,
        Builtin::Sqrt,
        Builtin::Floor,
        Builtin::ICmpEQ,
        Builtin::ICmpNE,
        Builtin::ICmpSGT,
        Builtin::ICmpSGE,
        Builtin::ICmpSLT,
        Builtin::ICmpSLE,
        Builtin::ICmpUGT,
        Builtin::ICmpUGE,
        Builtin::ICmpULT,
        Builtin::ICmpULE,
        Builtin::FCmpOEQ,
        Builtin::FCmpONE,
        Builtin::FCmpOGT,
        Builtin::FCmpOGE,
        Builtin::FCmpOLT,
        Builtin::FCmpOLE,
        Builtin::Trunc,
        Builtin::ZExt,
        Builtin::SExt,
        Builtin::FPTrunc,
        Builtin::FPExt,
        Builtin::FPToUI,
        Builtin::FPToSI,
        Builtin::UIToFP,
        Builtin::SIToFP,
        Builtin::Bitcast,
        Builtin::ExtractValue,
        Builtin::InsertValue,
        Builtin::ExtractElement,
        Builtin::InsertElement,
        Builtin::Select,
        Builtin::Alloca,
        Builtin::Malloc,
        Builtin::Free,
        Builtin::Load,
        Builtin::Store,
        Builtin::GetElementPtr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Branch => "branch",
            Builtin::Unreachable => "unreachable",
            Builtin::Discard => "discard",
            Builtin::TypeOf => "typeof",
            Builtin::SizeOf => "sizeof",
            Builtin::AlignOf => "alignof",
            Builtin::StorageOf => "storageof",
            Builtin::Dump => "dump",
            Builtin::Unconst => "unconst",
            Builtin::Add => "add",
            Builtin::Sub => "sub",
            Builtin::Mul => "mul",
            Builtin::SDiv => "sdiv",
            Builtin::UDiv => "udiv",
            Builtin::SRem => "srem",
            Builtin::URem => "urem",
            Builtin::Shl => "shl",
            Builtin::LShr => "lshr",
            Builtin::AShr => "ashr",
            Builtin::BAnd => "band",
            Builtin::BOr => "bor",
            Builtin::BXor => "bxor",
            Builtin::FAdd => "fadd",
            Builtin::FSub => "fsub",
            Builtin::FMul => "fmul",
            Builtin::FDiv => "fdiv",
            Builtin::FRem => "frem",
            Builtin::FAbs => "fabs",
            Builtin::FNeg => "fneg",
            Builtin::Sqrt => "sqrt",
            Builtin::Floor => "floor",
            Builtin::ICmpEQ => "icmp==",
            Builtin::ICmpNE => "icmp!=",
            Builtin::ICmpSGT => "icmp>s",
            Builtin::ICmpSGE => "icmp>=s",
            Builtin::ICmpSLT => "icmp<s",
            Builtin::ICmpSLE => "icmp<=s",
            Builtin::ICmpUGT => "icmp>u",
            Builtin::ICmpUGE => "icmp>=u",
            Builtin::ICmpULT => "icmp<u",
            Builtin::ICmpULE => "icmp<=u",
            Builtin::FCmpOEQ => "fcmp==o",
            Builtin::FCmpONE => "fcmp!=o",
            Builtin::FCmpOGT => "fcmp>o",
            Builtin::FCmpOGE => "fcmp>=o",
            Builtin::FCmpOLT => "fcmp<o",
            Builtin::FCmpOLE => "fcmp<=o",
            Builtin::Trunc => "trunc",
            Builtin::ZExt => "zext",
            Builtin::SExt => "sext",
            Builtin::FPTrunc => "fptrunc",
            Builtin::FPExt => "fpext",
            Builtin::FPToUI => "fptoui",
            Builtin::FPToSI => "fptosi",
            Builtin::UIToFP => "uitofp",
            Builtin::SIToFP => "sitofp",
            Builtin::Bitcast => "bitcast",
            Builtin::ExtractValue => "extractvalue",
            Builtin::InsertValue => "insertvalue",
            Builtin::ExtractElement => "extractelement",
            Builtin::InsertElement => "insertelement",
            Builtin::Select => "select",
            Builtin::Alloca => "alloca",
            Builtin::Malloc => "malloc",
            Builtin::Free => "free",
            Builtin::Load => "load",
            Builtin::Store => "store",
            Builtin::GetElementPtr => "getelementptr",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    pub fn contract(self) -> Contract {
        use ResultRule::*;
        match self {
            Builtin::Branch => contract(3, Some(3), NoReturn),
            Builtin::Unreachable | Builtin::Discard => runtime(contract(0, Some(0), NoReturn)),
            Builtin::TypeOf => folding(contract(1, Some(1), TypeOf)),
            Builtin::SizeOf | Builtin::AlignOf => folding(contract(1, Some(1), Layout)),
            Builtin::StorageOf => folding(contract(1, Some(1), StorageOf)),
            Builtin::Dump => {
                let mut c = folding(contract(0, None, Passthrough));
                c.keyed_args_allowed = true;
                c
            }
            Builtin::Unconst => runtime(contract(1, Some(1), Unconst)),
            Builtin::FAbs | Builtin::FNeg | Builtin::Sqrt | Builtin::Floor => {
                contract(1, Some(1), SameAsFirst)
            }
            b if b.is_int_binary() || b.is_real_binary() => contract(2, Some(2), SameAsFirst),
            b if b.is_icmp() || b.is_fcmp() => contract(2, Some(2), Compare),
            b if b.is_cast() => contract(2, Some(2), Cast),
            Builtin::ExtractValue => contract(2, Some(2), ExtractValue),
            Builtin::InsertValue => contract(3, Some(3), InsertValue),
            Builtin::ExtractElement => contract(2, Some(2), ExtractElement),
            Builtin::InsertElement => contract(3, Some(3), InsertElement),
            Builtin::Select => contract(3, Some(3), Select),
            Builtin::Alloca => runtime(contract(1, Some(1), Alloca)),
            Builtin::Malloc => runtime(contract(1, Some(1), Malloc)),
            Builtin::Free => runtime(contract(1, Some(1), Empty)),
            Builtin::Load => runtime(contract(1, Some(1), Load)),
            Builtin::Store => runtime(contract(2, Some(2), Empty)),
            Builtin::GetElementPtr => runtime(contract(1, None, GetElementPtr)),
            _ => contract(0, None, Empty),
        }
    }

    pub fn is_int_binary(self) -> bool {
        matches!(
            self,
            Builtin::Add
                | Builtin::Sub
                | Builtin::Mul
                | Builtin::SDiv
                | Builtin::UDiv
                | Builtin::SRem
                | Builtin::URem
                | Builtin::Shl
                | Builtin::LShr
                | Builtin::AShr
                | Builtin::BAnd
                | Builtin::BOr
                | Builtin::BXor
        )
    }

    pub fn is_real_binary(self) -> bool {
        matches!(
            self,
            Builtin::FAdd | Builtin::FSub | Builtin::FMul | Builtin::FDiv | Builtin::FRem
        )
    }

    pub fn is_real_unary(self) -> bool {
        matches!(
            self,
            Builtin::FAbs | Builtin::FNeg | Builtin::Sqrt | Builtin::Floor
        )
    }

    pub fn is_icmp(self) -> bool {
        matches!(
            self,
            Builtin::ICmpEQ
                | Builtin::ICmpNE
                | Builtin::ICmpSGT
                | Builtin::ICmpSGE
                | Builtin::ICmpSLT
                | Builtin::ICmpSLE
                | Builtin::ICmpUGT
                | Builtin::ICmpUGE
                | Builtin::ICmpULT
                | Builtin::ICmpULE
        )
    }

    pub fn is_fcmp(self) -> bool {
        matches!(
            self,
            Builtin::FCmpOEQ
                | Builtin::FCmpONE
                | Builtin::FCmpOGT
                | Builtin::FCmpOGE
                | Builtin::FCmpOLT
                | Builtin::FCmpOLE
        )
    }

    pub fn is_cast(self) -> bool {
        matches!(
            self,
            Builtin::Trunc
                | Builtin::ZExt
                | Builtin::SExt
                | Builtin::FPTrunc
                | Builtin::FPExt
                | Builtin::FPToUI
                | Builtin::FPToSI
                | Builtin::UIToFP
                | Builtin::SIToFP
                | Builtin::Bitcast
        )
    }
}

// ============================================================================
// Operand Checks
// ============================================================================

fn expect_type(session: &Session, value: &Any, anchor: Anchor) -> CompileResult<TypeId> {
    value.as_type().ok_or_else(|| {
        CompileError::location(
            anchor,
            format!(
                "expected a constant type, got value of type {}",
                session.type_name(session.value_type(value))
            ),
        )
    })
}

fn expect_index(session: &Session, value: &Any, anchor: Anchor) -> CompileResult<u64> {
    match (session.is_constant(value), value.as_int()) {
        (true, Some(index)) => Ok(index),
        _ => Err(CompileError::location(
            anchor,
            format!(
                "expected a constant integer index, got value of type {}",
                session.type_name(session.value_type(value))
            ),
        )),
    }
}

fn expect_same(session: &Session, b: Builtin, types: &[TypeId], anchor: Anchor) -> CompileResult<()> {
    if let Some(first) = types.first() {
        if let Some(other) = types.iter().find(|t| *t != first) {
            return Err(CompileError::location(
                anchor,
                format!(
                    "operands of {} must have the same type, got {} and {}",
                    b.name(),
                    session.type_name(*first),
                    session.type_name(*other)
                ),
            ));
        }
    }
    Ok(())
}

fn expect_scalar(
    session: &Session,
    b: Builtin,
    ty: TypeId,
    integer: bool,
    anchor: Anchor,
) -> CompileResult<()> {
    let scalar = session.types.scalar_of(ty);
    let ok = if integer {
        session.types.is_integer(scalar)
    } else {
        session.types.is_real(scalar)
    };
    if ok {
        Ok(())
    } else {
        Err(CompileError::location(
            anchor,
            format!(
                "{} expects {} operands, got {}",
                b.name(),
                if integer { "integer" } else { "real" },
                session.type_name(ty)
            ),
        ))
    }
}

fn pointer_parts(
    session: &Session,
    b: Builtin,
    ty: TypeId,
    anchor: Anchor,
) -> CompileResult<(TypeId, u32, StorageClass)> {
    match session.types.kind(ty) {
        Some(TypeKind::Pointer {
            element,
            flags,
            storage_class,
        }) => Ok((*element, *flags, *storage_class)),
        _ => Err(CompileError::location(
            anchor,
            format!("{} expects a pointer, got {}", b.name(), session.type_name(ty)),
        )),
    }
}

fn vector_count(session: &Session, ty: TypeId) -> Option<u64> {
    match session.types.kind(ty) {
        Some(TypeKind::Vector { count, .. }) => Some(*count),
        _ => None,
    }
}

fn check_cast(session: &mut Session, b: Builtin, from: TypeId, to: TypeId, anchor: Anchor) -> CompileResult<()> {
    let same_size = if b == Builtin::Bitcast {
        let from_size = session.types.size_of(from, anchor);
        let to_size = session.types.size_of(to, anchor);
        matches!((from_size, to_size), (Ok(a), Ok(b)) if a == b)
    } else {
        false
    };
    let (src, dst) = (session.types.scalar_of(from), session.types.scalar_of(to));
    let src_int = session.types.integer_info(src).map(|(w, _)| w);
    let dst_int = session.types.integer_info(dst).map(|(w, _)| w);
    let src_real = session.types.real_width(src);
    let dst_real = session.types.real_width(dst);
    let ok = match b {
        Builtin::Trunc => matches!((src_int, dst_int), (Some(a), Some(b)) if b < a),
        Builtin::ZExt | Builtin::SExt => matches!((src_int, dst_int), (Some(a), Some(b)) if b > a),
        Builtin::FPTrunc => matches!((src_real, dst_real), (Some(a), Some(b)) if b < a),
        Builtin::FPExt => matches!((src_real, dst_real), (Some(a), Some(b)) if b > a),
        Builtin::FPToUI | Builtin::FPToSI => src_real.is_some() && dst_int.is_some(),
        Builtin::UIToFP | Builtin::SIToFP => src_int.is_some() && dst_real.is_some(),
        Builtin::Bitcast => same_size,
        _ => false,
    };
    if ok && vector_count(session, from) == vector_count(session, to) {
        Ok(())
    } else {
        Err(CompileError::location(
            anchor,
            format!(
                "cannot {} from {} to {}",
                b.name(),
                session.type_name(from),
                session.type_name(to)
            ),
        ))
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Types the builtin passes to its continuation; `None` if it never returns
pub fn result_types(
    session: &mut Session,
    b: Builtin,
    args: &[Any],
    anchor: Anchor,
) -> CompileResult<Option<Vec<TypeId>>> {
    let types: Vec<TypeId> = args.iter().map(|a| session.value_type(a)).collect();
    let result = match b.contract().result {
        ResultRule::NoReturn => return Ok(None),
        ResultRule::Empty => {
            if b == Builtin::Free {
                pointer_parts(session, b, types[0], anchor)?;
            } else if b == Builtin::Store {
                let (element, flags, _) = pointer_parts(session, b, types[1], anchor)?;
                if flags & PTF_NON_WRITABLE != 0 {
                    return Err(CompileError::location(anchor, "cannot store through a readonly pointer"));
                }
                expect_same(session, b, &[element, types[0]], anchor)?;
            }
            Vec::new()
        }
        ResultRule::Passthrough => types,
        ResultRule::SameAsFirst => {
            expect_same(session, b, &types, anchor)?;
            expect_scalar(session, b, types[0], b.is_int_binary(), anchor)?;
            vec![types[0]]
        }
        ResultRule::Compare => {
            expect_same(session, b, &types, anchor)?;
            expect_scalar(session, b, types[0], b.is_icmp(), anchor)?;
            match vector_count(session, types[0]) {
                Some(count) => vec![session.types.vector(TYPE_BOOL, count)],
                None => vec![TYPE_BOOL],
            }
        }
        ResultRule::Cast => {
            let target = expect_type(session, &args[1], anchor)?;
            check_cast(session, b, types[0], target, anchor)?;
            vec![target]
        }
        ResultRule::TypeOf | ResultRule::StorageOf => vec![TYPE_TYPE],
        ResultRule::Layout => vec![TYPE_USIZE],
        ResultRule::Unconst => vec![types[0]],
        ResultRule::ExtractValue => {
            let index = expect_index(session, &args[1], anchor)?;
            vec![session.types.element_at(types[0], index, anchor)?]
        }
        ResultRule::InsertValue => {
            let index = expect_index(session, &args[2], anchor)?;
            let element = session.types.element_at(types[0], index, anchor)?;
            expect_same(session, b, &[element, types[1]], anchor)?;
            vec![types[0]]
        }
        ResultRule::ExtractElement | ResultRule::InsertElement => {
            let element = match session.types.kind(types[0]) {
                Some(TypeKind::Vector { element, .. }) => *element,
                _ => {
                    return Err(CompileError::location(
                        anchor,
                        format!("{} expects a vector, got {}", b.name(), session.type_name(types[0])),
                    ))
                }
            };
            if b == Builtin::ExtractElement {
                vec![element]
            } else {
                expect_same(session, b, &[element, types[1]], anchor)?;
                vec![types[0]]
            }
        }
        ResultRule::Select => {
            if session.types.scalar_of(types[0]) != TYPE_BOOL {
                return Err(CompileError::location(
                    anchor,
                    format!("select condition must be bool, got {}", session.type_name(types[0])),
                ));
            }
            expect_same(session, b, &types[1..], anchor)?;
            vec![types[1]]
        }
        ResultRule::Alloca | ResultRule::Malloc => {
            let element = expect_type(session, &args[0], anchor)?;
            let storage_class = if b == Builtin::Alloca {
                StorageClass::Function
            } else {
                StorageClass::Generic
            };
            vec![session.types.pointer(element, 0, storage_class)]
        }
        ResultRule::Load => {
            let (element, flags, _) = pointer_parts(session, b, types[0], anchor)?;
            if flags & PTF_NON_READABLE != 0 {
                return Err(CompileError::location(anchor, "cannot load through a writeonly pointer"));
            }
            vec![element]
        }
        ResultRule::GetElementPtr => {
            let (mut element, flags, storage_class) = pointer_parts(session, b, types[0], anchor)?;
            for (index, ty) in args.iter().zip(&types).skip(2) {
                if !session.types.is_integer(*ty) {
                    return Err(CompileError::location(anchor, "getelementptr indices must be integers"));
                }
                let position = match session.types.kind(element) {
                    Some(TypeKind::Tuple { .. }) | Some(TypeKind::Union { .. }) => {
                        expect_index(session, index, anchor)?
                    }
                    _ => 0,
                };
                element = session.types.element_at(element, position, anchor)?;
            }
            vec![session.types.pointer(element, flags, storage_class)]
        }
    };
    Ok(Some(result))
}

// ============================================================================
// Folding
// ============================================================================

fn elementwise(
    a: &Any,
    b: Option<&Any>,
    result_ty: TypeId,
    f: &mut dyn FnMut(&Any, Option<&Any>) -> CompileResult<Any>,
) -> CompileResult<Any> {
    match a.as_aggregate() {
        Some(xs) => {
            let ys = b.and_then(Any::as_aggregate);
            let mut out = Vec::with_capacity(xs.len());
            for (i, x) in xs.iter().enumerate() {
                out.push(f(x, ys.and_then(|ys| ys.get(i)))?);
            }
            Ok(Any::aggregate(result_ty, out))
        }
        None => f(a, b),
    }
}

fn int_bits(value: &Any, anchor: Anchor) -> CompileResult<u64> {
    value
        .as_int()
        .ok_or_else(|| CompileError::location(anchor, "expected an integer constant"))
}

fn real_value(value: &Any, anchor: Anchor) -> CompileResult<f64> {
    value
        .as_real()
        .ok_or_else(|| CompileError::location(anchor, "expected a real constant"))
}

pub fn fold_int_binary(b: Builtin, x: u64, y: u64, width: u32, anchor: Anchor) -> CompileResult<u64> {
    let (x, y) = (mask(x, width), mask(y, width));
    let (sx, sy) = (sign_extend(x, width), sign_extend(y, width));
    let divides = matches!(b, Builtin::SDiv | Builtin::UDiv | Builtin::SRem | Builtin::URem);
    if divides && y == 0 {
        return Err(CompileError::location(anchor, "division by zero"));
    }
    let shifts = matches!(b, Builtin::Shl | Builtin::LShr | Builtin::AShr);
    if shifts && y >= u64::from(width) {
        return Err(CompileError::location(
            anchor,
            format!("shift amount {} is out of range for a {}-bit integer", y, width),
        ));
    }
    let result = match b {
        Builtin::Add => x.wrapping_add(y),
        Builtin::Sub => x.wrapping_sub(y),
        Builtin::Mul => x.wrapping_mul(y),
        Builtin::UDiv => x / y,
        Builtin::URem => x % y,
        Builtin::SDiv => sx.wrapping_div(sy) as u64,
        Builtin::SRem => sx.wrapping_rem(sy) as u64,
        Builtin::Shl => x << y,
        Builtin::LShr => x >> y,
        Builtin::AShr => (sx >> y) as u64,
        Builtin::BAnd => x & y,
        Builtin::BOr => x | y,
        Builtin::BXor => x ^ y,
        _ => return Err(CompileError::internal(format!("{} is not an integer operation", b.name()))),
    };
    Ok(mask(result, width))
}

pub fn fold_real(b: Builtin, x: f64, y: f64) -> CompileResult<f64> {
    let result = match b {
        Builtin::FAdd => x + y,
        Builtin::FSub => x - y,
        Builtin::FMul => x * y,
        Builtin::FDiv => x / y,
        Builtin::FRem => x % y,
        Builtin::FAbs => x.abs(),
        Builtin::FNeg => -x,
        Builtin::Sqrt => x.sqrt(),
        Builtin::Floor => x.floor(),
        _ => return Err(CompileError::internal(format!("{} is not a real operation", b.name()))),
    };
    Ok(result)
}

pub fn fold_icmp(b: Builtin, x: u64, y: u64, width: u32) -> bool {
    let (sx, sy) = (sign_extend(x, width), sign_extend(y, width));
    match b {
        Builtin::ICmpEQ => x == y,
        Builtin::ICmpNE => x != y,
        Builtin::ICmpSGT => sx > sy,
        Builtin::ICmpSGE => sx >= sy,
        Builtin::ICmpSLT => sx < sy,
        Builtin::ICmpSLE => sx <= sy,
        Builtin::ICmpUGT => x > y,
        Builtin::ICmpUGE => x >= y,
        Builtin::ICmpULT => x < y,
        Builtin::ICmpULE => x <= y,
        _ => false,
    }
}

/// Ordered comparisons are false whenever either operand is NaN
pub fn fold_fcmp(b: Builtin, x: f64, y: f64) -> bool {
    if x.is_nan() || y.is_nan() {
        return false;
    }
    match b {
        Builtin::FCmpOEQ => x == y,
        Builtin::FCmpONE => x != y,
        Builtin::FCmpOGT => x > y,
        Builtin::FCmpOGE => x >= y,
        Builtin::FCmpOLT => x < y,
        Builtin::FCmpOLE => x <= y,
        _ => false,
    }
}

fn fold_cast(session: &Session, b: Builtin, value: &Any, to: TypeId, anchor: Anchor) -> CompileResult<Any> {
    let from = value.ty;
    let src_int = session.types.integer_info(from);
    let dst_int = session.types.integer_info(to);
    let dst_real = session.types.real_width(to);
    let folded = match b {
        Builtin::Trunc | Builtin::ZExt => {
            let (width, _) = dst_int.unwrap_or((64, false));
            Any::int(to, mask(int_bits(value, anchor)?, width))
        }
        Builtin::SExt => {
            let (src_width, _) = src_int.unwrap_or((64, true));
            let (width, _) = dst_int.unwrap_or((64, true));
            let extended = sign_extend(int_bits(value, anchor)?, src_width) as u64;
            Any::int(to, mask(extended, width))
        }
        Builtin::FPTrunc | Builtin::FPExt => Any::real(to, real_value(value, anchor)?),
        Builtin::FPToUI => {
            let (width, _) = dst_int.unwrap_or((64, false));
            Any::int(to, mask(real_value(value, anchor)? as u64, width))
        }
        Builtin::FPToSI => {
            let (width, _) = dst_int.unwrap_or((64, true));
            Any::int(to, mask(real_value(value, anchor)? as i64 as u64, width))
        }
        Builtin::UIToFP => Any::real(to, int_bits(value, anchor)? as f64),
        Builtin::SIToFP => {
            let (width, _) = src_int.unwrap_or((64, true));
            Any::real(to, sign_extend(int_bits(value, anchor)?, width) as f64)
        }
        Builtin::Bitcast => match (src_int, session.types.real_width(from), dst_int, dst_real) {
            (Some((32, _)), None, None, Some(32)) => {
                Any::real(to, f64::from(f32::from_bits(int_bits(value, anchor)? as u32)))
            }
            (Some((64, _)), None, None, Some(64)) => Any::real(to, f64::from_bits(int_bits(value, anchor)?)),
            (None, Some(32), Some(_), None) => {
                Any::int(to, u64::from((real_value(value, anchor)? as f32).to_bits()))
            }
            (None, Some(64), Some(_), None) => Any::int(to, real_value(value, anchor)?.to_bits()),
            _ => Any::new(to, value.payload.clone()),
        },
        _ => return Err(CompileError::internal(format!("{} is not a conversion", b.name()))),
    };
    Ok(folded)
}

/// Evaluate a builtin on operands the contract allows folding
pub fn fold(session: &mut Session, b: Builtin, args: &[Any], anchor: Anchor) -> CompileResult<Vec<Any>> {
    let contract = b.contract();
    if contract.never_folds {
        return Err(CompileError::internal(format!("{} cannot be folded", b.name())));
    }
    match b {
        Builtin::TypeOf => Ok(vec![Any::ty(session.value_type(&args[0]))]),
        Builtin::SizeOf | Builtin::AlignOf => {
            let ty = expect_type(session, &args[0], anchor)?;
            let bytes = if b == Builtin::SizeOf {
                session.types.size_of(ty, anchor)?
            } else {
                session.types.align_of(ty, anchor)?
            };
            Ok(vec![Any::int(TYPE_USIZE, bytes)])
        }
        Builtin::StorageOf => {
            let ty = expect_type(session, &args[0], anchor)?;
            Ok(vec![Any::ty(session.types.storage_type(ty, anchor)?)])
        }
        Builtin::Dump => {
            for arg in args {
                info!("dump: {}", printer::format_value(session, arg));
            }
            Ok(args.to_vec())
        }
        _ if b.is_int_binary() => {
            let (width, _) = session
                .types
                .integer_info(session.types.scalar_of(args[0].ty))
                .unwrap_or((64, false));
            let folded = elementwise(&args[0], Some(&args[1]), args[0].ty, &mut |x, y| {
                let y = y.ok_or_else(|| CompileError::internal("missing operand"))?;
                let bits = fold_int_binary(b, int_bits(x, anchor)?, int_bits(y, anchor)?, width, anchor)?;
                Ok(Any::int(x.ty, bits))
            })?;
            Ok(vec![folded])
        }
        _ if b.is_real_binary() || b.is_real_unary() => {
            let rhs = args.get(1);
            let folded = elementwise(&args[0], rhs, args[0].ty, &mut |x, y| {
                let y = match y {
                    Some(y) => real_value(y, anchor)?,
                    None => 0.0,
                };
                Ok(Any::real(x.ty, fold_real(b, real_value(x, anchor)?, y)?))
            })?;
            Ok(vec![folded])
        }
        _ if b.is_icmp() || b.is_fcmp() => {
            let result_ty = match vector_count(session, args[0].ty) {
                Some(count) => session.types.vector(TYPE_BOOL, count),
                None => TYPE_BOOL,
            };
            let (width, _) = session
                .types
                .integer_info(session.types.scalar_of(args[0].ty))
                .unwrap_or((64, false));
            let folded = elementwise(&args[0], Some(&args[1]), result_ty, &mut |x, y| {
                let y = y.ok_or_else(|| CompileError::internal("missing operand"))?;
                let result = if b.is_icmp() {
                    fold_icmp(b, int_bits(x, anchor)?, int_bits(y, anchor)?, width)
                } else {
                    fold_fcmp(b, real_value(x, anchor)?, real_value(y, anchor)?)
                };
                Ok(Any::bool(result))
            })?;
            Ok(vec![folded])
        }
        _ if b.is_cast() => {
            let to = expect_type(session, &args[1], anchor)?;
            let element = session.types.scalar_of(to);
            let session = &*session;
            let folded = elementwise(&args[0], None, to, &mut |x, _| fold_cast(session, b, x, element, anchor))?;
            Ok(vec![folded])
        }
        Builtin::ExtractValue | Builtin::ExtractElement => {
            let index = expect_index(session, &args[1], anchor)?;
            let element = args[0]
                .as_aggregate()
                .and_then(|values| values.get(index as usize))
                .cloned()
                .ok_or_else(|| {
                    CompileError::location(anchor, format!("index {} is out of bounds", index))
                })?;
            Ok(vec![element])
        }
        Builtin::InsertValue | Builtin::InsertElement => {
            let index = expect_index(session, &args[2], anchor)? as usize;
            let mut values = args[0]
                .as_aggregate()
                .map(<[Any]>::to_vec)
                .ok_or_else(|| CompileError::location(anchor, "expected an aggregate constant"))?;
            match values.get_mut(index) {
                Some(slot) => *slot = args[1].clone(),
                None => {
                    return Err(CompileError::location(
                        anchor,
                        format!("index {} is out of bounds", index),
                    ))
                }
            }
            Ok(vec![Any::aggregate(args[0].ty, values)])
        }
        Builtin::Select => {
            let picked = elementwise(&args[0], None, args[1].ty, &mut |cond, _| {
                let cond = cond
                    .as_bool()
                    .ok_or_else(|| CompileError::location(anchor, "select condition must be bool"))?;
                Ok(Any::bool(cond))
            })?;
            match (picked.as_bool(), picked.as_aggregate()) {
                (Some(true), _) => Ok(vec![args[1].clone()]),
                (Some(false), _) => Ok(vec![args[2].clone()]),
                (None, Some(lanes)) => {
                    let lhs = args[1].as_aggregate().unwrap_or(&[]);
                    let rhs = args[2].as_aggregate().unwrap_or(&[]);
                    let mut out = Vec::with_capacity(lanes.len());
                    for (i, m) in lanes.iter().enumerate() {
                        let source = if m.as_bool() == Some(true) { lhs } else { rhs };
                        let value = source.get(i).cloned().ok_or_else(|| {
                            CompileError::location(anchor, "select operands differ in length")
                        })?;
                        out.push(value);
                    }
                    Ok(vec![Any::aggregate(args[1].ty, out)])
                }
                (None, None) => Err(CompileError::location(anchor, "select condition must be bool")),
            }
        }
        _ => Err(CompileError::internal(format!("{} cannot be folded", b.name()))),
    }
}
