//! Enum types for ARBITER entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// FINDING STATUS
// ============================================================================

/// Lifecycle status of a finding within a processing cycle.
///
/// # State Transition Diagram
///
/// ```text
/// Pending ──(no relation)──────────────→ UniqueValid ─┐
/// Pending ──(is original)──────────────→ BestValid ───┼─(judge: invalid)─→ Disputed
/// Pending ──(duplicate, first of agent)→ SimilarValid ┘
/// Pending ──(duplicate, repeat of agent)→ AlreadyReported ──(group verdict: invalid)─→ Disputed
/// ```
///
/// `AlreadyReported` members ride along in their group's evaluation batch,
/// so an invalid group verdict disputes them with the rest of the group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    /// Submitted, not yet processed
    #[default]
    Pending,
    /// No duplicates identified
    UniqueValid,
    /// Selected as the best report of a duplicate group
    BestValid,
    /// Duplicate of another agent's report (or the first from this agent)
    SimilarValid,
    /// Same agent already holds a representative in the group
    AlreadyReported,
    /// Judge found the finding invalid
    Disputed,
}

impl FindingStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [FindingStatus; 6] = [
        FindingStatus::Pending,
        FindingStatus::UniqueValid,
        FindingStatus::BestValid,
        FindingStatus::SimilarValid,
        FindingStatus::AlreadyReported,
        FindingStatus::Disputed,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            FindingStatus::Pending => "pending",
            FindingStatus::UniqueValid => "unique_valid",
            FindingStatus::BestValid => "best_valid",
            FindingStatus::SimilarValid => "similar_valid",
            FindingStatus::AlreadyReported => "already_reported",
            FindingStatus::Disputed => "disputed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, FindingStatusParseError> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(FindingStatus::Pending),
            "unique_valid" => Ok(FindingStatus::UniqueValid),
            "best_valid" => Ok(FindingStatus::BestValid),
            "similar_valid" => Ok(FindingStatus::SimilarValid),
            "already_reported" => Ok(FindingStatus::AlreadyReported),
            "disputed" => Ok(FindingStatus::Disputed),
            _ => Err(FindingStatusParseError(s.to_string())),
        }
    }

    /// Whether the finding earned credit and is eligible for a validity verdict.
    pub fn is_credited(&self) -> bool {
        matches!(
            self,
            FindingStatus::UniqueValid | FindingStatus::BestValid | FindingStatus::SimilarValid
        )
    }

    /// Whether this status ends a processing cycle.
    pub fn is_cycle_terminal(&self) -> bool {
        !matches!(self, FindingStatus::Pending)
    }

    /// Check whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Re-assigning the same status is always allowed so that retried
    /// cycles stay idempotent.
    pub fn can_transition_to(&self, next: FindingStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            FindingStatus::Pending => matches!(
                next,
                FindingStatus::UniqueValid
                    | FindingStatus::BestValid
                    | FindingStatus::SimilarValid
                    | FindingStatus::AlreadyReported
            ),
            FindingStatus::UniqueValid
            | FindingStatus::BestValid
            | FindingStatus::SimilarValid
            | FindingStatus::AlreadyReported => next == FindingStatus::Disputed,
            FindingStatus::Disputed => false,
        }
    }
}

impl fmt::Display for FindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for FindingStatus {
    type Err = FindingStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid finding status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingStatusParseError(pub String);

impl fmt::Display for FindingStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid finding status: {}", self.0)
    }
}

impl std::error::Error for FindingStatusParseError {}

// ============================================================================
// SEVERITY
// ============================================================================

/// Severity claimed by the submitting agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportedSeverity {
    High,
    Medium,
    Low,
    Info,
}

impl ReportedSeverity {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ReportedSeverity::High => "High",
            ReportedSeverity::Medium => "Medium",
            ReportedSeverity::Low => "Low",
            ReportedSeverity::Info => "Info",
        }
    }
}

impl fmt::Display for ReportedSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Severity assigned by the judge after evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvaluatedSeverity {
    Low,
    Medium,
    High,
}

impl EvaluatedSeverity {
    /// Normalize free-form severity text from the judge.
    ///
    /// "low"/"trivial" map to Low, "medium" to Medium, "high"/"critical" to
    /// High. Anything else falls back to Medium.
    pub fn normalize(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "low" | "trivial" => EvaluatedSeverity::Low,
            "medium" => EvaluatedSeverity::Medium,
            "high" | "critical" => EvaluatedSeverity::High,
            _ => EvaluatedSeverity::Medium,
        }
    }

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EvaluatedSeverity::Low => "Low",
            EvaluatedSeverity::Medium => "Medium",
            EvaluatedSeverity::High => "High",
        }
    }
}

impl fmt::Display for EvaluatedSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_str_roundtrip() {
        for status in FindingStatus::ALL {
            assert_eq!(FindingStatus::from_db_str(status.as_db_str()), Ok(status));
        }
        assert!(FindingStatus::from_db_str("archived").is_err());
    }

    #[test]
    fn test_pending_transitions() {
        let pending = FindingStatus::Pending;
        assert!(pending.can_transition_to(FindingStatus::UniqueValid));
        assert!(pending.can_transition_to(FindingStatus::BestValid));
        assert!(pending.can_transition_to(FindingStatus::SimilarValid));
        assert!(pending.can_transition_to(FindingStatus::AlreadyReported));
        assert!(!pending.can_transition_to(FindingStatus::Disputed));
    }

    #[test]
    fn test_only_assigned_statuses_can_be_disputed() {
        for status in FindingStatus::ALL {
            let allowed = status.can_transition_to(FindingStatus::Disputed);
            assert_eq!(allowed, status != FindingStatus::Pending, "{status}");
        }
    }

    #[test]
    fn test_terminal_states_do_not_move() {
        assert!(!FindingStatus::Disputed.can_transition_to(FindingStatus::UniqueValid));
        assert!(!FindingStatus::AlreadyReported.can_transition_to(FindingStatus::SimilarValid));
        assert!(!FindingStatus::SimilarValid.can_transition_to(FindingStatus::AlreadyReported));
        assert!(!FindingStatus::BestValid.can_transition_to(FindingStatus::Pending));
    }

    #[test]
    fn test_severity_normalization() {
        assert_eq!(EvaluatedSeverity::normalize("Critical"), EvaluatedSeverity::High);
        assert_eq!(EvaluatedSeverity::normalize(" high "), EvaluatedSeverity::High);
        assert_eq!(EvaluatedSeverity::normalize("TRIVIAL"), EvaluatedSeverity::Low);
        assert_eq!(EvaluatedSeverity::normalize("low"), EvaluatedSeverity::Low);
        assert_eq!(EvaluatedSeverity::normalize("Medium"), EvaluatedSeverity::Medium);
        assert_eq!(EvaluatedSeverity::normalize("n/a"), EvaluatedSeverity::Medium);
        assert_eq!(EvaluatedSeverity::normalize(""), EvaluatedSeverity::Medium);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&FindingStatus::AlreadyReported).unwrap();
        assert_eq!(json, "\"already_reported\"");
    }
}
