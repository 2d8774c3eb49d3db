//! The specializing solver
//!
//! `solve` turns a typed entry instance into a closed, fully typed graph:
//!
//! 1. Every reachable body is normalized: calls to closures become calls
//!    to specialized instances, builtins with constant operands fold, and
//!    continuations pick up the types of the values passed to them.
//! 2. Return types still unknown afterwards belong to functions that never
//!    return and are fixed to `Nothing`.
//! 3. Trivial jumps fold, captured parameters are lifted into explicit
//!    arguments and single-use blocks merge into their caller.
//!
//! Functions are solved depth-first: a call to an unsolved function solves
//! the callee before the caller continues. The stack of functions being
//! solved doubles as the recursion detector; a call that re-enters one of
//! them marks the instance reentrant and its return type is resolved later
//! through the tail calls recorded while it was pending. A block is
//! reentrant when a label jumps to it again after its body was already
//! spliced into that label.

mod calls;
mod passes;

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, trace};

use crate::anchor::Anchor;
use crate::errors::{CompileError, CompileResult, SolveError, TraceEntry};
use crate::label::{LabelId, ParamId};
use crate::session::Session;
use crate::types::{TYPE_NOTHING, TYPE_UNKNOWN};
use crate::value::{Any, Payload};

pub use passes::{cleanup_labels, fold_useless_labels, lower2cff, verify_closure_free};

/// A continuation parameter forwarded to a callee whose return type was
/// not yet known
#[derive(Debug, Clone, Copy)]
struct TailCall {
    param: ParamId,
    callee: LabelId,
    anchor: Anchor,
}

/// Outcome of normalizing one label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Done,
    /// Waiting on the return type of a function still being solved
    Deferred,
}

/// What a call handler did to the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// The body was rewritten into another call; normalize again
    Continue,
    /// The body is final
    Complete,
    Defer,
}

pub struct Solver<'s> {
    session: &'s mut Session,
    /// Functions whose solving is in progress, outermost first
    active: Vec<LabelId>,
    traceback: Vec<TraceEntry>,
    tail_calls: Vec<TailCall>,
    /// Block instances whose bodies were copied into each label
    spliced: HashMap<LabelId, HashSet<LabelId>>,
    stack_base: usize,
}

/// Specialize, type and close the graph rooted at `entry`
pub fn solve(session: &mut Session, entry: LabelId) -> Result<LabelId, SolveError> {
    Solver::new(session).solve(entry)
}

#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

impl<'s> Solver<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self {
            session,
            active: Vec::new(),
            traceback: Vec::new(),
            tail_calls: Vec::new(),
            spliced: HashMap::new(),
            stack_base: 0,
        }
    }

    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    pub fn solve(&mut self, entry: LabelId) -> Result<LabelId, SolveError> {
        self.stack_base = stack_address();
        let result = self.solve_graph(entry);
        self.active.clear();
        self.tail_calls.clear();
        self.spliced.clear();
        match result {
            Ok(()) => {
                self.traceback.clear();
                Ok(entry)
            }
            Err(error) => {
                debug!("solving {} failed: {}", self.session.label_name(entry), error);
                Err(SolveError {
                    error,
                    traceback: std::mem::take(&mut self.traceback),
                })
            }
        }
    }

    fn solve_graph(&mut self, entry: LabelId) -> CompileResult<()> {
        let label = self.session.label(entry);
        if !label.is_instance() {
            return Err(CompileError::location(
                label.anchor,
                format!(
                    "{} must be specialized before it is solved",
                    self.session.label_name(entry)
                ),
            ));
        }
        self.complete_function(entry)?;
        self.finalize_returns(entry)?;
        fold_useless_labels(self.session, entry);
        lower2cff(self.session, entry)?;
        cleanup_labels(self.session, entry);
        verify_closure_free(self.session, entry)?;
        debug!(
            "solved {}: {} labels reachable",
            self.session.label_name(entry),
            self.session.reachable_labels(entry).len()
        );
        Ok(())
    }

    // ========================================================================
    // Function Completion
    // ========================================================================

    /// Normalize `function` and every basic block it reaches
    pub fn complete_function(&mut self, function: LabelId) -> CompileResult<()> {
        debug!("solving {} ({})", self.session.label_name(function), function);
        self.active.push(function);
        let result = self.run_worklist(function);
        self.active.pop();
        if let Err(error) = result {
            self.push_trace(function, self.session.label(function).anchor);
            return Err(error);
        }
        self.propagate_returns()?;
        Ok(())
    }

    fn push_trace(&mut self, label: LabelId, anchor: Anchor) {
        self.traceback.push(TraceEntry {
            anchor,
            label: self.session.label_name(label).to_string(),
        });
    }

    fn run_worklist(&mut self, function: LabelId) -> CompileResult<()> {
        let mut queue = VecDeque::from([function]);
        let mut queued: HashSet<LabelId> = HashSet::from([function]);
        let mut stalled = 0usize;
        while let Some(label) = queue.pop_front() {
            let step = match self.normalize_label(label) {
                Ok(step) => step,
                Err(error) => {
                    if label != function {
                        self.push_trace(label, self.session.label(label).body.anchor);
                    }
                    return Err(error);
                }
            };
            match step {
                Step::Done => {
                    stalled = 0;
                    for target in self.session.label_refs(label) {
                        let data = self.session.label(target);
                        if data.is_instance()
                            && !data.body.is_complete()
                            && self.session.is_basic_block_like(target)
                            && queued.insert(target)
                        {
                            queue.push_back(target);
                        }
                    }
                }
                Step::Deferred => {
                    queue.push_back(label);
                    stalled += 1;
                    if stalled >= queue.len() {
                        if self.propagate_returns()? {
                            stalled = 0;
                            continue;
                        }
                        let callee = self.session.label(label).body.enter.clone();
                        return Err(CompileError::location(
                            self.session.label(label).body.anchor,
                            format!(
                                "cannot infer return type of recursive call to {}",
                                self.callee_name(&callee)
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn callee_name(&self, value: &Any) -> String {
        match value.payload {
            Payload::Closure(c) => self.session.label_name(self.session.closure_data(c).label).to_string(),
            Payload::Label(l) => self.session.label_name(l).to_string(),
            _ => crate::printer::format_value(&*self.session, value),
        }
    }

    // ========================================================================
    // Normalization
    // ========================================================================

    fn check_stack(&self, anchor: Anchor) -> CompileResult<()> {
        let used = self.stack_base.abs_diff(stack_address());
        let limit = self.session.config.stack_limit;
        if used > limit {
            return Err(CompileError::StackOverflow { anchor, used, limit });
        }
        Ok(())
    }

    /// Rewrite the body of `label` until it is a final call or must wait
    pub fn normalize_label(&mut self, label: LabelId) -> CompileResult<Step> {
        loop {
            let body = &self.session.label(label).body;
            let anchor = body.anchor;
            self.check_stack(anchor)?;
            if body.is_complete() {
                return Ok(Step::Done);
            }
            let enter = body.enter.clone();
            trace!("normalizing {}", crate::printer::stream_label(&*self.session, label).trim_end());
            let flow = match enter.payload {
                Payload::Closure(c) => self.call_closure(label, c)?,
                Payload::Builtin(b) => self.call_builtin(label, b)?,
                Payload::Label(target) => self.call_label(label, target)?,
                Payload::Parameter(p) => self.call_parameter(label, p)?,
                _ => self.call_value(label, &enter)?,
            };
            match flow {
                Flow::Continue => continue,
                Flow::Complete => {
                    self.session.label_mut(label).body.set_complete();
                    return Ok(Step::Done);
                }
                Flow::Defer => return Ok(Step::Deferred),
            }
        }
    }

    // ========================================================================
    // Return Types
    // ========================================================================

    /// Whether the return type of `label` may still be learned from a
    /// function being solved
    fn return_pending(&self, label: LabelId) -> bool {
        let mut stack = vec![label];
        let mut seen: HashSet<LabelId> = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if self.active.contains(&current) {
                return true;
            }
            let Some(cont) = self.session.label(current).continuation_param() else {
                continue;
            };
            if self.session.param(cont).ty != TYPE_UNKNOWN {
                continue;
            }
            stack.extend(
                self.tail_calls
                    .iter()
                    .filter(|call| call.param == cont)
                    .map(|call| call.callee),
            );
        }
        false
    }

    /// Copy known callee return types into the continuations forwarded to
    /// them; returns whether anything was typed
    fn propagate_returns(&mut self) -> CompileResult<bool> {
        let mut progress = false;
        loop {
            let mut changed = false;
            for i in 0..self.tail_calls.len() {
                let TailCall { param, callee, anchor } = self.tail_calls[i];
                let ret = self.session.return_type(callee);
                if self.session.types.return_label_values(ret).is_none() {
                    continue;
                }
                if self.session.param(param).ty == ret {
                    continue;
                }
                self.session.unify_param(param, ret, anchor)?;
                trace!("{} returns like {}", param, callee);
                changed = true;
            }
            if !changed {
                return Ok(progress);
            }
            progress = true;
        }
    }

    /// Fix unresolved return types to `Nothing` and drop the continuations
    /// passed to functions that never return
    fn finalize_returns(&mut self, entry: LabelId) -> CompileResult<()> {
        self.propagate_returns()?;
        let labels = self.session.reachable_labels(entry);
        for label in &labels {
            let data = self.session.label(*label);
            if !data.is_instance() {
                continue;
            }
            if let Some(cont) = data.continuation_param() {
                if self.session.param(cont).ty == TYPE_UNKNOWN {
                    debug!("{} never returns", self.session.label_name(*label));
                    self.session.param_mut(cont).ty = TYPE_NOTHING;
                }
            }
        }
        for label in &labels {
            let body = &self.session.label(*label).body;
            let Some(callee) = body.enter.as_label() else {
                continue;
            };
            let returns = self.session.return_type(callee) != TYPE_NOTHING;
            let discarded = body.continuation().is_nothing();
            if returns && discarded {
                return Err(CompileError::location(
                    body.anchor,
                    format!("return value of {} is discarded", self.session.label_name(callee)),
                ));
            }
            if !returns && !discarded {
                self.session.label_mut(*label).body.args[0].value = Any::nothing();
            }
        }
        Ok(())
    }
}
