//! Solver limits and inlining policy

use log::warn;

pub const DEFAULT_MAX_RECURSIONS: usize = 32;
pub const DEFAULT_STACK_LIMIT: usize = 1 << 20;
pub const DEFAULT_MAX_CFF_ITERATIONS: usize = 256;
pub const DEFAULT_MAX_UNROLL: usize = 4096;

/// When a specialized function is spliced into its caller instead of
/// being kept as a standalone callable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlinePolicy {
    /// Functions whose control-flow graph has at most this many labels
    pub max_trivial_labels: usize,
    /// Inline functions whose every argument was constant
    pub inline_parameterless: bool,
}

impl Default for InlinePolicy {
    fn default() -> Self {
        Self {
            max_trivial_labels: 1,
            inline_parameterless: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverConfig {
    /// Active specializations of one template before giving up
    pub max_recursions: usize,
    /// Host stack bytes the solver may consume below its entry point
    pub stack_limit: usize,
    pub max_cff_iterations: usize,
    /// Basic blocks spliced into a single instance before giving up
    pub max_unroll: usize,
    pub inline: InlinePolicy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_recursions: DEFAULT_MAX_RECURSIONS,
            stack_limit: DEFAULT_STACK_LIMIT,
            max_cff_iterations: DEFAULT_MAX_CFF_ITERATIONS,
            max_unroll: DEFAULT_MAX_UNROLL,
            inline: InlinePolicy::default(),
        }
    }
}

impl SolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_recursions(mut self, limit: usize) -> Self {
        self.max_recursions = limit;
        self
    }

    pub fn with_stack_limit(mut self, bytes: usize) -> Self {
        self.stack_limit = bytes;
        self
    }

    pub fn with_max_cff_iterations(mut self, limit: usize) -> Self {
        self.max_cff_iterations = limit;
        self
    }

    pub fn with_max_unroll(mut self, limit: usize) -> Self {
        self.max_unroll = limit;
        self
    }

    pub fn with_inline(mut self, inline: InlinePolicy) -> Self {
        self.inline = inline;
        self
    }

    /// Never inline; every specialized function stays a callable
    pub fn without_inlining(self) -> Self {
        self.with_inline(InlinePolicy {
            max_trivial_labels: 0,
            inline_parameterless: false,
        })
    }

    /// Defaults overlaid with `LARCH_*` environment variables
    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fields: [(&str, &mut usize); 4] = [
            ("LARCH_MAX_RECURSIONS", &mut self.max_recursions),
            ("LARCH_STACK_LIMIT", &mut self.stack_limit),
            ("LARCH_MAX_CFF_ITERATIONS", &mut self.max_cff_iterations),
            ("LARCH_MAX_UNROLL", &mut self.max_unroll),
        ];
        for (name, field) in fields {
            let Some(text) = lookup(name) else {
                continue;
            };
            match text.trim().parse::<usize>() {
                Ok(value) => *field = value,
                Err(_) => warn!("ignoring {}={:?}: not an unsigned integer", name, text),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SolverConfig::default();
        assert_eq!(config.max_recursions, 32);
        assert_eq!(config.stack_limit, 1 << 20);
        assert_eq!(config.max_cff_iterations, 256);
        assert_eq!(config.inline.max_trivial_labels, 1);
    }

    #[test]
    fn test_overlay_ignores_garbage() {
        let config = SolverConfig::default().overlay(|name| match name {
            "LARCH_MAX_RECURSIONS" => Some("8".to_string()),
            "LARCH_STACK_LIMIT" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config.max_recursions, 8);
        assert_eq!(config.stack_limit, DEFAULT_STACK_LIMIT);
    }

    #[test]
    fn test_from_env_reads_larch_variables() {
        std::env::set_var("LARCH_MAX_RECURSIONS", " 12 ");
        std::env::set_var("LARCH_MAX_UNROLL", "-3");
        let config = SolverConfig::from_env();
        std::env::remove_var("LARCH_MAX_RECURSIONS");
        std::env::remove_var("LARCH_MAX_UNROLL");
        assert_eq!(config.max_recursions, 12);
        assert_eq!(config.max_unroll, DEFAULT_MAX_UNROLL);
        assert_eq!(config.stack_limit, DEFAULT_STACK_LIMIT);
    }

    #[test]
    fn test_builders() {
        let config = SolverConfig::new().with_max_recursions(4).without_inlining();
        assert_eq!(config.max_recursions, 4);
        assert!(!config.inline.inline_parameterless);
    }
}
