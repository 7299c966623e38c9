use crate::error::AgentError;

pub const DEFAULT_MAX_STEPS: usize = 20;
pub const DEFAULT_MEMORY_CAPACITY: usize = 100;
pub const DEFAULT_HISTORY_WINDOW: usize = 20;
pub const DEFAULT_MAX_OBSERVE: usize = 10_000;
pub const DEFAULT_DUPLICATE_THRESHOLD: usize = 2;
pub const DEFAULT_DUPLICATE_WINDOW: usize = 5;

/// Numeric bounds applied to one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentLimits {
    pub max_steps: usize,
    pub memory_capacity: usize,
    /// Memory entries sent with each model request.
    pub history_window: usize,
    /// Largest tool observation, in characters, kept in memory.
    pub max_observe: usize,
    pub duplicate_threshold: usize,
    pub duplicate_window: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            history_window: DEFAULT_HISTORY_WINDOW,
            max_observe: DEFAULT_MAX_OBSERVE,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }
}

impl AgentLimits {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        let named = [
            ("max_steps", self.max_steps),
            ("memory_capacity", self.memory_capacity),
            ("history_window", self.history_window),
            ("max_observe", self.max_observe),
            ("duplicate_threshold", self.duplicate_threshold),
            ("duplicate_window", self.duplicate_window),
        ];
        if let Some((name, _)) = named.iter().find(|(_, value)| *value == 0) {
            return Err(AgentError::Configuration(format!("{name} must be greater than zero")));
        }
        if self.duplicate_threshold > self.duplicate_window {
            return Err(AgentError::Configuration(format!(
                "duplicate_threshold ({}) cannot exceed duplicate_window ({})",
                self.duplicate_threshold, self.duplicate_window
            )));
        }
        Ok(())
    }
}

/// Parse a strictly positive integer, as accepted from environment overrides.
pub fn parse_positive_usize(value: &str) -> Option<usize> {
    let parsed = value.trim().parse::<usize>().ok()?;
    if parsed == 0 {
        None
    } else {
        Some(parsed)
    }
}
