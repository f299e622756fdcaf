//! Stamina level labels shared across the core boundary.
//!
//! The continuous fatigue model lives in its own crate; the derived label is
//! a core type because queue gating and level-change events both carry it.

use serde::{Deserialize, Serialize};

/// A derived label over the current-to-max stamina ratio.
///
/// `critical` is strictly below the configured critical threshold: a value
/// sitting exactly on the threshold is still `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaminaLevel {
    High,
    Medium,
    Low,
    Critical,
}

impl std::fmt::Display for StaminaLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StaminaLevel::High => "high",
            StaminaLevel::Medium => "medium",
            StaminaLevel::Low => "low",
            StaminaLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_labels() {
        assert_eq!(StaminaLevel::High.to_string(), "high");
        assert_eq!(StaminaLevel::Critical.to_string(), "critical");
    }
}
