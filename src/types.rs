//! Structural and nominal types
//!
//! Structural types are hash-consed: every constructor looks its argument
//! tuple up in the session's memo table first, so two structurally equal
//! types are always the same `TypeId` and type equality is an integer
//! compare. Typenames are nominal: each `typename` call yields a fresh
//! opaque type that is finalized exactly once with a storage type.

use std::collections::HashMap;
use std::fmt;

use crate::anchor::Anchor;
use crate::errors::{CompileError, CompileResult};
use crate::symbol::Symbol;
use crate::value::{Any, Payload};

/// Handle of an interned type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type{}", self.0)
    }
}

// ============================================================================
// Builtin Types
// ============================================================================
// Registered by `TypeTable::new` in exactly this order.

pub const TYPE_UNKNOWN: TypeId = TypeId(0);
pub const TYPE_NOTHING: TypeId = TypeId(1);
pub const TYPE_ANY: TypeId = TypeId(2);
pub const TYPE_TYPE: TypeId = TypeId(3);
pub const TYPE_SYMBOL: TypeId = TypeId(4);
pub const TYPE_STRING: TypeId = TypeId(5);
pub const TYPE_LABEL: TypeId = TypeId(6);
pub const TYPE_PARAMETER: TypeId = TypeId(7);
pub const TYPE_CLOSURE: TypeId = TypeId(8);
pub const TYPE_FRAME: TypeId = TypeId(9);
pub const TYPE_BUILTIN: TypeId = TypeId(10);
pub const TYPE_EMPTY_TUPLE: TypeId = TypeId(11);
pub const TYPE_BOOL: TypeId = TypeId(12);
pub const TYPE_I8: TypeId = TypeId(13);
pub const TYPE_I16: TypeId = TypeId(14);
pub const TYPE_I32: TypeId = TypeId(15);
pub const TYPE_I64: TypeId = TypeId(16);
pub const TYPE_U8: TypeId = TypeId(17);
pub const TYPE_U16: TypeId = TypeId(18);
pub const TYPE_U32: TypeId = TypeId(19);
pub const TYPE_U64: TypeId = TypeId(20);
pub const TYPE_F32: TypeId = TypeId(21);
pub const TYPE_F64: TypeId = TypeId(22);
pub const TYPE_USIZE: TypeId = TYPE_U64;

const BUILTIN_TYPENAMES: [(&str, TypeId); 11] = [
    ("Unknown", TYPE_UNKNOWN),
    ("Nothing", TYPE_NOTHING),
    ("Any", TYPE_ANY),
    ("type", TYPE_TYPE),
    ("Symbol", TYPE_SYMBOL),
    ("string", TYPE_STRING),
    ("Label", TYPE_LABEL),
    ("Parameter", TYPE_PARAMETER),
    ("Closure", TYPE_CLOSURE),
    ("Frame", TYPE_FRAME),
    ("Builtin", TYPE_BUILTIN),
];

// Pointer flags
pub const PTF_NON_WRITABLE: u32 = 1 << 0;
pub const PTF_NON_READABLE: u32 = 1 << 1;

// Function flags
pub const FN_VARIADIC: u32 = 1 << 0;
pub const FN_PURE: u32 = 1 << 1;

/// Address space a pointer or extern lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Generic,
    /// Stack memory of the current function; must not escape it
    Function,
    Private,
    Workgroup,
    Uniform,
    Input,
    Output,
    PushConstant,
}

impl StorageClass {
    pub fn name(self) -> &'static str {
        match self {
            StorageClass::Generic => "Generic",
            StorageClass::Function => "Function",
            StorageClass::Private => "Private",
            StorageClass::Workgroup => "Workgroup",
            StorageClass::Uniform => "Uniform",
            StorageClass::Input => "Input",
            StorageClass::Output => "Output",
            StorageClass::PushConstant => "PushConstant",
        }
    }
}

// ============================================================================
// Type Definitions
// ============================================================================

/// Structural type shapes; also the memo key of the type table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Integer {
        width: u32,
        signed: bool,
    },
    Real {
        width: u32,
    },
    Pointer {
        element: TypeId,
        flags: u32,
        storage_class: StorageClass,
    },
    Array {
        element: TypeId,
        count: u64,
    },
    Vector {
        element: TypeId,
        count: u64,
    },
    Tuple {
        types: Vec<TypeId>,
        packed: bool,
        /// Explicit alignment, 0 for natural
        align: u64,
    },
    Union {
        types: Vec<TypeId>,
    },
    Function {
        return_type: TypeId,
        params: Vec<TypeId>,
        flags: u32,
    },
    /// Type of a continuation receiving `values`
    ReturnLabel {
        values: Vec<TypeId>,
        flags: u32,
    },
    Extern {
        element: TypeId,
        flags: u32,
        storage_class: StorageClass,
        location: i32,
        binding: i32,
    },
    Image {
        sampled_type: TypeId,
        dim: String,
        depth: i32,
        arrayed: i32,
        multisampled: i32,
        sampled: i32,
        format: String,
        access: String,
    },
}

/// A nominal type
#[derive(Debug, Clone)]
pub struct Typename {
    pub name: String,
    pub super_type: Option<TypeId>,
    pub storage: Option<TypeId>,
    pub symbols: HashMap<Symbol, Any>,
}

#[derive(Debug, Clone)]
pub enum TypeDef {
    Structural(TypeKind),
    Typename(Typename),
}

#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub def: TypeDef,
    pub name: String,
}

// ============================================================================
// Type Table
// ============================================================================

#[derive(Debug)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
    memo: HashMap<TypeKind, TypeId>,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = TypeTable {
            entries: Vec::new(),
            memo: HashMap::new(),
        };
        for (name, expected) in BUILTIN_TYPENAMES {
            let id = table.typename(name);
            debug_assert_eq!(id, expected);
        }
        let empty = table.tuple(Vec::new());
        debug_assert_eq!(empty, TYPE_EMPTY_TUPLE);
        let builtins = [
            (table.integer(1, false), TYPE_BOOL),
            (table.integer(8, true), TYPE_I8),
            (table.integer(16, true), TYPE_I16),
            (table.integer(32, true), TYPE_I32),
            (table.integer(64, true), TYPE_I64),
            (table.integer(8, false), TYPE_U8),
            (table.integer(16, false), TYPE_U16),
            (table.integer(32, false), TYPE_U32),
            (table.integer(64, false), TYPE_U64),
            (table.real(32), TYPE_F32),
            (table.real(64), TYPE_F64),
        ];
        for (got, expected) in builtins {
            debug_assert_eq!(got, expected);
        }
        if let TypeDef::Typename(info) = &mut table.entries[TYPE_NOTHING.0 as usize].def {
            info.storage = Some(TYPE_EMPTY_TUPLE);
        }
        if let TypeDef::Typename(info) = &mut table.entries[TYPE_ANY.0 as usize].def {
            info.super_type = None;
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: TypeId) -> &TypeEntry {
        &self.entries[id.0 as usize]
    }

    pub fn name(&self, id: TypeId) -> &str {
        self.entries
            .get(id.0 as usize)
            .map(|e| e.name.as_str())
            .unwrap_or("<invalid type>")
    }

    /// Structural shape, `None` for typenames
    pub fn kind(&self, id: TypeId) -> Option<&TypeKind> {
        match &self.entry(id).def {
            TypeDef::Structural(kind) => Some(kind),
            TypeDef::Typename(_) => None,
        }
    }

    pub fn typename_info(&self, id: TypeId) -> Option<&Typename> {
        match &self.entry(id).def {
            TypeDef::Typename(info) => Some(info),
            TypeDef::Structural(_) => None,
        }
    }

    fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(id) = self.memo.get(&kind) {
            return *id;
        }
        let name = self.structural_name(&kind);
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            def: TypeDef::Structural(kind.clone()),
            name,
        });
        self.memo.insert(kind, id);
        id
    }

    fn names(&self, types: &[TypeId]) -> String {
        types
            .iter()
            .map(|t| self.name(*t))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn structural_name(&self, kind: &TypeKind) -> String {
        match kind {
            TypeKind::Integer { width: 1, signed: false } => "bool".to_string(),
            TypeKind::Integer { width, signed } => {
                format!("{}{}", if *signed { "i" } else { "u" }, width)
            }
            TypeKind::Real { width } => format!("f{}", width),
            TypeKind::Pointer {
                element,
                flags,
                storage_class,
            } => {
                let mut name = format!("{}*", self.name(*element));
                if flags & PTF_NON_WRITABLE != 0 {
                    name.push_str(" readonly");
                }
                if flags & PTF_NON_READABLE != 0 {
                    name.push_str(" writeonly");
                }
                if *storage_class != StorageClass::Generic {
                    name.push('@');
                    name.push_str(storage_class.name());
                }
                name
            }
            TypeKind::Array { element, count } => format!("[{} x {}]", self.name(*element), count),
            TypeKind::Vector { element, count } => format!("<{} x {}>", self.name(*element), count),
            TypeKind::Tuple { types, packed, align } => {
                let mut name = if *packed {
                    format!("<{{{}}}>", self.names(types))
                } else {
                    format!("{{{}}}", self.names(types))
                };
                if *align != 0 {
                    name.push_str(&format!(" align {}", align));
                }
                name
            }
            TypeKind::Union { types } => format!("(union {})", self.names(types)),
            TypeKind::Function {
                return_type,
                params,
                flags,
            } => {
                let mut params = self.names(params);
                if flags & FN_VARIADIC != 0 {
                    params.push_str(" ...");
                }
                let pure = if flags & FN_PURE != 0 { " pure" } else { "" };
                format!("(fn ({}) {}{})", params.trim(), self.name(*return_type), pure)
            }
            TypeKind::ReturnLabel { values, .. } => format!("λ({})", self.names(values)),
            TypeKind::Extern { element, .. } => format!("(extern {})", self.name(*element)),
            TypeKind::Image {
                sampled_type,
                dim,
                format,
                ..
            } => format!("(image {} {} {})", self.name(*sampled_type), dim, format),
        }
    }

    // ========================================================================
    // Constructors
    // ========================================================================

    pub fn integer(&mut self, width: u32, signed: bool) -> TypeId {
        self.intern(TypeKind::Integer { width, signed })
    }

    pub fn real(&mut self, width: u32) -> TypeId {
        self.intern(TypeKind::Real { width })
    }

    pub fn pointer(&mut self, element: TypeId, flags: u32, storage_class: StorageClass) -> TypeId {
        self.intern(TypeKind::Pointer {
            element,
            flags,
            storage_class,
        })
    }

    pub fn array(&mut self, element: TypeId, count: u64) -> TypeId {
        self.intern(TypeKind::Array { element, count })
    }

    pub fn vector(&mut self, element: TypeId, count: u64) -> TypeId {
        self.intern(TypeKind::Vector { element, count })
    }

    pub fn tuple(&mut self, types: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Tuple {
            types,
            packed: false,
            align: 0,
        })
    }

    pub fn tuple_with_layout(&mut self, types: Vec<TypeId>, packed: bool, align: u64) -> TypeId {
        self.intern(TypeKind::Tuple {
            types,
            packed,
            align,
        })
    }

    /// Tuple of the types of `values`; `Type` constants contribute themselves
    pub fn mixed_tuple(&mut self, values: &[Any]) -> TypeId {
        let types = values.iter().map(type_or_type_of).collect();
        self.tuple(types)
    }

    pub fn union(&mut self, types: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Union { types })
    }

    pub fn mixed_union(&mut self, values: &[Any]) -> TypeId {
        let types = values.iter().map(type_or_type_of).collect();
        self.union(types)
    }

    pub fn function(&mut self, return_type: TypeId, params: Vec<TypeId>, flags: u32) -> TypeId {
        self.intern(TypeKind::Function {
            return_type,
            params,
            flags,
        })
    }

    pub fn return_label(&mut self, values: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::ReturnLabel { values, flags: 0 })
    }

    pub fn extern_type(
        &mut self,
        element: TypeId,
        flags: u32,
        storage_class: StorageClass,
        location: i32,
        binding: i32,
    ) -> TypeId {
        self.intern(TypeKind::Extern {
            element,
            flags,
            storage_class,
            location,
            binding,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn image(
        &mut self,
        sampled_type: TypeId,
        dim: &str,
        depth: i32,
        arrayed: i32,
        multisampled: i32,
        sampled: i32,
        format: &str,
        access: &str,
    ) -> TypeId {
        self.intern(TypeKind::Image {
            sampled_type,
            dim: dim.to_string(),
            depth,
            arrayed,
            multisampled,
            sampled,
            format: format.to_string(),
            access: access.to_string(),
        })
    }

    // ========================================================================
    // Typenames
    // ========================================================================

    /// Create a fresh opaque nominal type deriving from `Any`
    pub fn typename(&mut self, name: &str) -> TypeId {
        let id = TypeId(self.entries.len() as u32);
        self.entries.push(TypeEntry {
            def: TypeDef::Typename(Typename {
                name: name.to_string(),
                super_type: Some(TYPE_ANY),
                storage: None,
                symbols: HashMap::new(),
            }),
            name: name.to_string(),
        });
        id
    }

    fn typename_mut(&mut self, id: TypeId, anchor: Anchor) -> CompileResult<&mut Typename> {
        let name = self.name(id).to_string();
        match &mut self.entries[id.0 as usize].def {
            TypeDef::Typename(info) => Ok(info),
            TypeDef::Structural(_) => Err(CompileError::location(
                anchor,
                format!("type {} is not a typename", name),
            )),
        }
    }

    pub fn is_typename(&self, id: TypeId) -> bool {
        self.typename_info(id).is_some()
    }

    /// Give a typename its storage type; allowed exactly once
    pub fn finalize(&mut self, id: TypeId, storage: TypeId, anchor: Anchor) -> CompileResult<()> {
        if self.is_typename(storage) {
            return Err(CompileError::location(
                anchor,
                format!(
                    "typename {} cannot use typename {} as storage type",
                    self.name(id),
                    self.name(storage)
                ),
            ));
        }
        let info = self.typename_mut(id, anchor)?;
        if info.storage.is_some() {
            let msg = format!("typename {} is already finalized", info.name);
            return Err(CompileError::location(anchor, msg));
        }
        info.storage = Some(storage);
        Ok(())
    }

    pub fn set_super(&mut self, id: TypeId, super_type: TypeId, anchor: Anchor) -> CompileResult<()> {
        let mut cursor = Some(super_type);
        while let Some(t) = cursor {
            if t == id {
                return Err(CompileError::location(
                    anchor,
                    format!("supertype {} would make a cycle", self.name(super_type)),
                ));
            }
            cursor = self.super_of(t);
        }
        self.typename_mut(id, anchor)?.super_type = Some(super_type);
        Ok(())
    }

    pub fn super_of(&self, id: TypeId) -> Option<TypeId> {
        match &self.entry(id).def {
            TypeDef::Typename(info) => info.super_type,
            TypeDef::Structural(_) => Some(TYPE_ANY),
        }
    }

    pub fn set_symbol(&mut self, id: TypeId, sym: Symbol, value: Any, anchor: Anchor) -> CompileResult<()> {
        self.typename_mut(id, anchor)?.symbols.insert(sym, value);
        Ok(())
    }

    /// Look a symbol up on `id`, then along its supertype chain
    pub fn lookup(&self, id: TypeId, sym: Symbol) -> Option<Any> {
        let mut cursor = Some(id);
        while let Some(t) = cursor {
            if let Some(value) = self.typename_info(t).and_then(|info| info.symbols.get(&sym)) {
                return Some(value.clone());
            }
            cursor = self.super_of(t);
        }
        None
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_opaque(&self, id: TypeId) -> bool {
        matches!(self.typename_info(id), Some(info) if info.storage.is_none())
    }

    /// Types whose values exist only while compiling
    pub fn is_compile_time_only(&self, id: TypeId) -> bool {
        matches!(
            id,
            TYPE_UNKNOWN
                | TYPE_ANY
                | TYPE_TYPE
                | TYPE_SYMBOL
                | TYPE_STRING
                | TYPE_LABEL
                | TYPE_PARAMETER
                | TYPE_CLOSURE
                | TYPE_FRAME
                | TYPE_BUILTIN
        )
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), Some(TypeKind::Integer { .. }))
    }

    pub fn is_real(&self, id: TypeId) -> bool {
        matches!(self.kind(id), Some(TypeKind::Real { .. }))
    }

    /// Scalar element of a vector, or the type itself
    pub fn scalar_of(&self, id: TypeId) -> TypeId {
        match self.kind(id) {
            Some(TypeKind::Vector { element, .. }) => *element,
            _ => id,
        }
    }

    pub fn integer_info(&self, id: TypeId) -> Option<(u32, bool)> {
        match self.kind(id) {
            Some(TypeKind::Integer { width, signed }) => Some((*width, *signed)),
            _ => None,
        }
    }

    pub fn real_width(&self, id: TypeId) -> Option<u32> {
        match self.kind(id) {
            Some(TypeKind::Real { width }) => Some(*width),
            _ => None,
        }
    }

    /// Whether `id` mentions the closure type anywhere in its structure
    pub fn contains_closure(&self, id: TypeId) -> bool {
        let mut stack = vec![id];
        while let Some(t) = stack.pop() {
            if t == TYPE_CLOSURE {
                return true;
            }
            match self.kind(t) {
                Some(TypeKind::Tuple { types, .. }) | Some(TypeKind::Union { types }) => {
                    stack.extend(types.iter().copied())
                }
                Some(TypeKind::ReturnLabel { values, .. }) => stack.extend(values.iter().copied()),
                Some(TypeKind::Array { element, .. }) | Some(TypeKind::Vector { element, .. }) => {
                    stack.push(*element)
                }
                _ => {}
            }
        }
        false
    }

    /// Whether a value of this type is a pointer into the current stack frame
    pub fn is_local_pointer(&self, id: TypeId) -> bool {
        let mut stack = vec![id];
        while let Some(t) = stack.pop() {
            match self.kind(t) {
                Some(TypeKind::Pointer { storage_class, .. }) => {
                    if *storage_class == StorageClass::Function {
                        return true;
                    }
                }
                Some(TypeKind::Tuple { types, .. }) | Some(TypeKind::Union { types }) => {
                    stack.extend(types.iter().copied())
                }
                Some(TypeKind::ReturnLabel { values, .. }) => stack.extend(values.iter().copied()),
                _ => {}
            }
        }
        false
    }

    pub fn return_label_values(&self, id: TypeId) -> Option<&[TypeId]> {
        match self.kind(id) {
            Some(TypeKind::ReturnLabel { values, .. }) => Some(values),
            _ => None,
        }
    }

    /// Signature of a callable foreign value: function pointers and externs
    pub fn foreign_signature(&self, id: TypeId) -> Option<(TypeId, Vec<TypeId>, u32)> {
        let target = match self.kind(id) {
            Some(TypeKind::Pointer { element, .. }) | Some(TypeKind::Extern { element, .. }) => *element,
            _ => return None,
        };
        match self.kind(target) {
            Some(TypeKind::Function {
                return_type,
                params,
                flags,
            }) => Some((*return_type, params.clone(), *flags)),
            _ => None,
        }
    }

    // ========================================================================
    // Storage and Layout
    // ========================================================================

    /// Peel typenames and return labels down to the layout representation
    pub fn storage_type(&mut self, id: TypeId, anchor: Anchor) -> CompileResult<TypeId> {
        let mut current = id;
        loop {
            match &self.entry(current).def {
                TypeDef::Typename(info) => match info.storage {
                    Some(storage) => current = storage,
                    None => {
                        return Err(CompileError::location(
                            anchor,
                            format!("opaque type {} has no storage", info.name),
                        ))
                    }
                },
                TypeDef::Structural(TypeKind::ReturnLabel { values, .. }) => {
                    let values = values.clone();
                    return match values.as_slice() {
                        [] => Ok(TYPE_EMPTY_TUPLE),
                        [single] => self.storage_type(*single, anchor),
                        many => {
                            let mut storage = Vec::with_capacity(many.len());
                            for v in many {
                                storage.push(self.storage_type(*v, anchor)?);
                            }
                            Ok(self.tuple(storage))
                        }
                    };
                }
                TypeDef::Structural(_) => return Ok(current),
            }
        }
    }

    pub fn size_of(&mut self, id: TypeId, anchor: Anchor) -> CompileResult<u64> {
        Ok(self.layout(id, anchor)?.0)
    }

    pub fn align_of(&mut self, id: TypeId, anchor: Anchor) -> CompileResult<u64> {
        Ok(self.layout(id, anchor)?.1)
    }

    /// Byte offsets of the fields of a tuple type
    pub fn field_offsets(&mut self, id: TypeId, anchor: Anchor) -> CompileResult<Vec<u64>> {
        let storage = self.storage_type(id, anchor)?;
        let (types, packed) = match self.kind(storage) {
            Some(TypeKind::Tuple { types, packed, .. }) => (types.clone(), *packed),
            _ => {
                return Err(CompileError::location(
                    anchor,
                    format!("type {} has no fields", self.name(id)),
                ))
            }
        };
        let mut offsets = Vec::with_capacity(types.len());
        let mut offset = 0u64;
        for t in types {
            let (size, align) = self.layout(t, anchor)?;
            if !packed {
                offset = align_to(offset, align);
            }
            offsets.push(offset);
            offset += size;
        }
        Ok(offsets)
    }

    /// (size, alignment) in bytes
    fn layout(&mut self, id: TypeId, anchor: Anchor) -> CompileResult<(u64, u64)> {
        let storage = self.storage_type(id, anchor)?;
        let kind = match self.kind(storage) {
            Some(kind) => kind.clone(),
            None => {
                return Err(CompileError::internal(format!(
                    "storage of {} is not structural",
                    self.name(id)
                )))
            }
        };
        let unsized_err = |table: &TypeTable| {
            CompileError::location(
                anchor,
                format!("type {} has no size", table.name(id)),
            )
        };
        match kind {
            TypeKind::Integer { width, .. } => {
                let bytes = u64::from(width.max(1)).div_ceil(8).next_power_of_two();
                Ok((bytes, bytes))
            }
            TypeKind::Real { width } => {
                let bytes = u64::from(width) / 8;
                Ok((bytes, bytes))
            }
            TypeKind::Pointer { .. } => Ok((8, 8)),
            TypeKind::Array { element, count } => {
                let (size, align) = self.layout(element, anchor)?;
                Ok((size * count, align))
            }
            TypeKind::Vector { element, count } => {
                let (size, _) = self.layout(element, anchor)?;
                let total = size * count;
                Ok((total, total.max(1).next_power_of_two()))
            }
            TypeKind::Tuple { types, packed, align } => {
                let mut offset = 0u64;
                let mut max_align = 1u64;
                for t in types {
                    let (size, field_align) = self.layout(t, anchor)?;
                    if !packed {
                        offset = align_to(offset, field_align);
                        max_align = max_align.max(field_align);
                    }
                    offset += size;
                }
                if align != 0 {
                    if !align.is_power_of_two() {
                        return Err(CompileError::location(
                            anchor,
                            format!("alignment {} is not a power of two", align),
                        ));
                    }
                    max_align = align;
                }
                Ok((align_to(offset, max_align), max_align))
            }
            TypeKind::Union { types } => {
                let mut max_size = 0u64;
                let mut max_align = 1u64;
                for t in types {
                    let (size, align) = self.layout(t, anchor)?;
                    max_size = max_size.max(size);
                    max_align = max_align.max(align);
                }
                Ok((align_to(max_size, max_align), max_align))
            }
            TypeKind::Function { .. }
            | TypeKind::ReturnLabel { .. }
            | TypeKind::Extern { .. }
            | TypeKind::Image { .. } => Err(unsized_err(self)),
        }
    }

    /// Type of element `index` of an aggregate
    pub fn element_at(&mut self, id: TypeId, index: u64, anchor: Anchor) -> CompileResult<TypeId> {
        let storage = self.storage_type(id, anchor)?;
        let found = match self.kind(storage) {
            Some(TypeKind::Array { element, count }) | Some(TypeKind::Vector { element, count }) => {
                (index < *count).then_some(*element)
            }
            Some(TypeKind::Tuple { types, .. }) | Some(TypeKind::Union { types }) => {
                types.get(index as usize).copied()
            }
            _ => {
                return Err(CompileError::location(
                    anchor,
                    format!("type {} is not an aggregate", self.name(id)),
                ))
            }
        };
        found.ok_or_else(|| {
            CompileError::location(
                anchor,
                format!("index {} is out of bounds for type {}", index, self.name(id)),
            )
        })
    }
}

fn align_to(offset: u64, align: u64) -> u64 {
    let align = align.max(1);
    offset.div_ceil(align) * align
}

fn type_or_type_of(value: &Any) -> TypeId {
    match value.payload {
        Payload::Type(t) => t,
        _ => value.ty,
    }
}

// ============================================================================
// Tests
// ============================================================================
