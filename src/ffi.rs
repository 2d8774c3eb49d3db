//! Compile-time execution of foreign functions
//!
//! The solver folds calls to pure foreign functions whose arguments are all
//! constant. It never executes native code itself; it asks the session's
//! `ForeignCall` capability, which the embedder provides.

use std::collections::HashMap;
use std::fmt;

use crate::value::Any;

pub trait ForeignCall {
    /// Call `function` (a function pointer or extern value) with constant `args`
    fn run_ffi_function(&self, function: &Any, args: &[Any]) -> Result<Any, String>;
}

/// Refuses every call
#[derive(Debug, Default)]
pub struct NoForeignCalls;

impl ForeignCall for NoForeignCalls {
    fn run_ffi_function(&self, _function: &Any, _args: &[Any]) -> Result<Any, String> {
        Err("no foreign function executor is available".to_string())
    }
}

type NativeFn = Box<dyn Fn(&[Any]) -> Result<Any, String>>;

/// Foreign functions implemented by Rust closures, keyed by callee value
#[derive(Default)]
pub struct NativeRegistry {
    functions: HashMap<Any, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        function: Any,
        implementation: impl Fn(&[Any]) -> Result<Any, String> + 'static,
    ) {
        self.functions.insert(function, Box::new(implementation));
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl ForeignCall for NativeRegistry {
    fn run_ffi_function(&self, function: &Any, args: &[Any]) -> Result<Any, String> {
        match self.functions.get(function) {
            Some(implementation) => implementation(args),
            None => Err("foreign function is not registered".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TYPE_I32;

    #[test]
    fn test_registry_dispatch() {
        let mut registry = NativeRegistry::new();
        let callee = Any::pointer(TYPE_I32, 0x1000);
        registry.register(callee.clone(), |args| Ok(args[0].clone()));
        assert_eq!(registry.run_ffi_function(&callee, &[Any::i32(5)]), Ok(Any::i32(5)));
        assert!(registry
            .run_ffi_function(&Any::pointer(TYPE_I32, 0x2000), &[])
            .is_err());
        assert!(NoForeignCalls.run_ffi_function(&callee, &[]).is_err());
    }
}
