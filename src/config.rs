use lazy_static::lazy_static;
use std::sync::RwLock;

/// Engine configuration
///
/// Documents take a copy of the process-wide default when they are built, so
/// changing the global afterwards does not affect trees already in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether nested atomic blocks join the enclosing frame by default
    pub join_contexts: bool,

    /// Assign a uuid `_id` to new embedded children that lack one
    pub generate_ids: bool,

    /// Log a warning when one flush touches overlapping paths
    pub warn_on_conflicts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref GLOBAL_CONFIG: RwLock<EngineConfig> = RwLock::new(EngineConfig::new());
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self {
            join_contexts: false,
            generate_ids: true,
            warn_on_conflicts: true,
        }
    }

    /// Set the default nesting policy
    pub fn join_contexts(mut self, join: bool) -> Self {
        self.join_contexts = join;
        self
    }

    /// Set id generation for new children
    pub fn generate_ids(mut self, generate: bool) -> Self {
        self.generate_ids = generate;
        self
    }

    /// Set conflict warnings
    pub fn warn_on_conflicts(mut self, warn: bool) -> Self {
        self.warn_on_conflicts = warn;
        self
    }

    /// Current process-wide default
    pub fn global() -> Self {
        match GLOBAL_CONFIG.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the process-wide default
    pub fn set_global(config: EngineConfig) {
        match GLOBAL_CONFIG.write() {
            Ok(mut current) => *current = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }
}
