//! The compilation session
//!
//! Owns everything a compile creates: symbols, types, the label, parameter,
//! frame and closure arenas, registered sources and the foreign-call
//! capability. Entities are never removed while the session lives, so their
//! `u32` handles stay valid until the session is dropped.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::anchor::{Anchor, SourceId, SourceMap};
use crate::config::SolverConfig;
use crate::errors::{CompileError, CompileResult};
use crate::ffi::{ForeignCall, NoForeignCalls};
use crate::frame::{Closure, ClosureId, Frame, FrameId};
use crate::label::{Label, LabelId, LabelKind, ParamId, Parameter};
use crate::symbol::{Symbol, SymbolTable};
use crate::types::{TypeId, TypeTable, TYPE_CLOSURE, TYPE_NOTHING, TYPE_UNKNOWN};
use crate::value::{Any, Payload};

pub struct Session {
    pub config: SolverConfig,
    pub symbols: SymbolTable,
    pub types: TypeTable,
    labels: Vec<Label>,
    params: Vec<Parameter>,
    frames: Vec<Frame>,
    closures: Vec<Closure>,
    closure_ids: HashMap<Closure, ClosureId>,
    sources: Vec<SourceMap>,
    ffi: Box<dyn ForeignCall>,
    /// Templates owning the free parameters of a template's reach
    enclosing_cache: HashMap<LabelId, Vec<LabelId>>,
    scope_cache: HashMap<LabelId, Vec<LabelId>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl Session {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            symbols: SymbolTable::new(),
            types: TypeTable::new(),
            labels: Vec::new(),
            params: Vec::new(),
            frames: Vec::new(),
            closures: Vec::new(),
            closure_ids: HashMap::new(),
            sources: Vec::new(),
            ffi: Box::new(NoForeignCalls),
            enclosing_cache: HashMap::new(),
            scope_cache: HashMap::new(),
        }
    }

    // ========================================================================
    // Sources and Symbols
    // ========================================================================

    pub fn add_source(&mut self, name: &str, text: &str) -> SourceId {
        let id = SourceId(self.sources.len() as u32);
        self.sources.push(SourceMap::new(name, text));
        id
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceMap> {
        self.sources.get(id.0 as usize)
    }

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    pub fn symbol_name(&self, sym: Symbol) -> &str {
        self.symbols.name(sym)
    }

    pub fn type_name(&self, ty: TypeId) -> &str {
        self.types.name(ty)
    }

    pub fn set_ffi(&mut self, ffi: impl ForeignCall + 'static) {
        self.ffi = Box::new(ffi);
    }

    pub fn ffi(&self) -> &dyn ForeignCall {
        self.ffi.as_ref()
    }

    // ========================================================================
    // Arenas
    // ========================================================================

    pub fn new_label(&mut self, name: Symbol, anchor: Anchor, kind: LabelKind) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(Label::new(name, anchor, kind));
        id
    }

    /// Append a parameter to `label`
    pub fn new_param(
        &mut self,
        label: LabelId,
        name: Symbol,
        ty: TypeId,
        vararg: bool,
        anchor: Anchor,
    ) -> ParamId {
        let id = ParamId(self.params.len() as u32);
        let index = self.label(label).params.len();
        self.params.push(Parameter {
            label,
            index,
            name,
            ty,
            vararg,
            anchor,
            typed_at: None,
        });
        self.label_mut(label).params.push(id);
        id
    }

    pub fn new_frame(&mut self, frame: Frame) -> FrameId {
        let id = FrameId(self.frames.len() as u32);
        self.frames.push(frame);
        id
    }

    /// Hash-consed closure value
    pub fn closure(&mut self, label: LabelId, frame: Option<FrameId>) -> Any {
        let key = Closure { label, frame };
        if let Some(id) = self.closure_ids.get(&key) {
            return Any::closure(*id);
        }
        let id = ClosureId(self.closures.len() as u32);
        self.closures.push(key);
        self.closure_ids.insert(key, id);
        Any::closure(id)
    }

    pub fn closure_data(&self, id: ClosureId) -> Closure {
        self.closures[id.0 as usize]
    }

    pub fn label(&self, id: LabelId) -> &Label {
        &self.labels[id.0 as usize]
    }

    pub fn label_mut(&mut self, id: LabelId) -> &mut Label {
        &mut self.labels[id.0 as usize]
    }

    pub fn param(&self, id: ParamId) -> &Parameter {
        &self.params[id.0 as usize]
    }

    pub fn param_mut(&mut self, id: ParamId) -> &mut Parameter {
        &mut self.params[id.0 as usize]
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0 as usize]
    }

    pub fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0 as usize]
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn label_name(&self, id: LabelId) -> &str {
        self.symbols.name(self.label(id).name)
    }

    pub fn param_name(&self, id: ParamId) -> &str {
        self.symbols.name(self.param(id).name)
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Runtime type of a value; parameters report their own type
    pub fn value_type(&self, value: &Any) -> TypeId {
        match value.payload {
            Payload::Parameter(p) => self.param(p).ty,
            _ => value.ty,
        }
    }

    pub fn is_constant(&self, value: &Any) -> bool {
        value.as_param().is_none()
    }

    /// Type a parameter, or check it against the type it already has
    pub fn unify_param(&mut self, p: ParamId, ty: TypeId, anchor: Anchor) -> CompileResult<()> {
        let current = self.param(p).ty;
        if current == ty {
            return Ok(());
        }
        if current == TYPE_UNKNOWN {
            let param = self.param_mut(p);
            param.ty = ty;
            param.typed_at = Some(anchor);
            return Ok(());
        }
        Err(self.type_mismatch(p, ty, anchor))
    }

    /// A mismatch between the type `p` carries and `ty`, reported at `anchor`
    /// with a note on where `p` got its type
    pub fn type_mismatch(&self, p: ParamId, ty: TypeId, anchor: Anchor) -> CompileError {
        let param = self.param(p);
        let current = param.ty;
        let previous = param.typed_at.unwrap_or(param.anchor);
        CompileError::location(
            anchor,
            format!(
                "type mismatch for {}: expected {}, got {}",
                self.param_name(p),
                self.type_name(current),
                self.type_name(ty)
            ),
        )
        .with_related(previous, format!("{} was typed {} here", self.param_name(p), self.type_name(current)))
    }

    pub fn return_type(&self, label: LabelId) -> TypeId {
        self.label(label)
            .continuation_param()
            .map(|p| self.param(p).ty)
            .unwrap_or(TYPE_NOTHING)
    }

    /// Whether `label` never returns and serves as a jump target
    pub fn is_basic_block_like(&self, label: LabelId) -> bool {
        self.return_type(label) == TYPE_NOTHING
    }

    /// The template every duplicate of `label` descends from
    pub fn root_template(&self, label: LabelId) -> LabelId {
        let mut current = label;
        while let Some(original) = self.label(current).original {
            current = original;
        }
        current
    }

    // ========================================================================
    // Graph Queries
    // ========================================================================

    /// Labels mentioned directly in the body of `label`, in operand order
    pub fn label_refs(&self, label: LabelId) -> Vec<LabelId> {
        let mut refs = Vec::new();
        for value in self.label(label).body.values() {
            if let Some(target) = value.as_label() {
                if !refs.contains(&target) {
                    refs.push(target);
                }
            }
        }
        refs
    }

    /// Parameters mentioned directly in the body of `label`
    pub fn param_refs(&self, label: LabelId) -> Vec<ParamId> {
        self.label(label)
            .body
            .values()
            .filter_map(Any::as_param)
            .collect()
    }

    /// Breadth-first walk over label references, `entry` first
    pub fn reachable_labels(&self, entry: LabelId) -> Vec<LabelId> {
        self.walk(entry, |_| true)
    }

    fn walk(&self, entry: LabelId, follow: impl Fn(LabelId) -> bool) -> Vec<LabelId> {
        let mut order = vec![entry];
        let mut seen: HashSet<LabelId> = HashSet::from([entry]);
        let mut queue = VecDeque::from([entry]);
        while let Some(label) = queue.pop_front() {
            for target in self.label_refs(label) {
                if follow(target) && seen.insert(target) {
                    order.push(target);
                    queue.push_back(target);
                }
            }
        }
        order
    }

    /// A function and the basic blocks it reaches without entering another function
    pub fn function_cfg(&self, function: LabelId) -> Vec<LabelId> {
        self.walk(function, |target| self.is_basic_block_like(target))
    }

    /// Parameters used inside the CFG of `function` but owned outside it
    pub fn captured_params(&self, function: LabelId) -> Vec<ParamId> {
        let cfg = self.function_cfg(function);
        let members: HashSet<LabelId> = cfg.iter().copied().collect();
        let mut captured = Vec::new();
        for label in cfg {
            for p in self.param_refs(label) {
                if !members.contains(&self.param(p).label) && !captured.contains(&p) {
                    captured.push(p);
                }
            }
        }
        captured
    }

    /// Templates owning parameters that the reach of `template` uses but
    /// does not own; empty when `template` can be specialized in any frame
    pub fn enclosing_templates(&mut self, template: LabelId) -> Vec<LabelId> {
        if let Some(owners) = self.enclosing_cache.get(&template) {
            return owners.clone();
        }
        let reach = self.reachable_labels(template);
        let members: HashSet<LabelId> = reach.iter().copied().collect();
        let mut owners = Vec::new();
        for label in &reach {
            for p in self.param_refs(*label) {
                let owner = self.param(p).label;
                if !members.contains(&owner) && self.label(owner).is_template() && !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
        }
        self.enclosing_cache.insert(template, owners.clone());
        owners
    }

    /// The frame a closure over `template` captures: the innermost frame
    /// from `from` outwards that binds one of its free parameters
    ///
    /// Templates without free template parameters capture nothing, so their
    /// instances are shared no matter which block refers to them.
    pub fn capture_frame(&mut self, template: LabelId, from: Option<FrameId>) -> Option<FrameId> {
        let owners = self.enclosing_templates(template);
        if owners.is_empty() {
            return None;
        }
        let mut cursor = from;
        while let Some(f) = cursor {
            let frame = self.frame(f);
            if owners.contains(&frame.template) {
                return Some(f);
            }
            cursor = frame.parent;
        }
        from
    }

    pub(crate) fn cached_scope(&self, template: LabelId) -> Option<&Vec<LabelId>> {
        self.scope_cache.get(&template)
    }

    pub(crate) fn cache_scope(&mut self, template: LabelId, scope: Vec<LabelId>) {
        self.scope_cache.insert(template, scope);
    }

    pub fn is_closure_value(&self, value: &Any) -> bool {
        value.ty == TYPE_CLOSURE || value.contains_closure()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("labels", &self.labels.len())
            .field("params", &self.params.len())
            .field("frames", &self.frames.len())
            .field("types", &self.types.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TYPE_I32;

    #[test]
    fn test_closures_are_hash_consed() {
        let mut session = Session::default();
        let name = session.intern("f");
        let l = session.new_label(name, Anchor::unknown(), LabelKind::Template);
        let a = session.closure(l, None);
        let b = session.closure(l, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unify_param_is_write_once() {
        let mut session = Session::default();
        let name = session.intern("f");
        let l = session.new_label(name, Anchor::unknown(), LabelKind::Instance);
        let x = session.intern("x");
        let p = session.new_param(l, x, TYPE_UNKNOWN, false, Anchor::unknown());
        session.unify_param(p, TYPE_I32, Anchor::unknown()).unwrap();
        assert_eq!(session.param(p).ty, TYPE_I32);
        assert!(session.unify_param(p, TYPE_I32, Anchor::unknown()).is_ok());
        let err = session.unify_param(p, TYPE_NOTHING, Anchor::unknown()).unwrap_err();
        assert_eq!(err.related().len(), 1);
    }

    #[test]
    fn test_parameter_value_type() {
        let mut session = Session::default();
        let name = session.intern("f");
        let l = session.new_label(name, Anchor::unknown(), LabelKind::Instance);
        let p = session.new_param(l, name, TYPE_I32, false, Anchor::unknown());
        assert_eq!(session.value_type(&Any::param(p)), TYPE_I32);
        assert!(!session.is_constant(&Any::param(p)));
        assert!(session.is_constant(&Any::i32(3)));
    }
}
