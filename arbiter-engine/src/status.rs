//! Status Engine
//!
//! Maps each pending finding to its post-deduplication status from the
//! cycle's duplicate graph. Pure and deterministic: the same finding and
//! graph always produce the same decision.

use crate::graph::DuplicateGraph;
use arbiter_core::{Finding, FindingId, FindingStatus};
use std::collections::HashMap;

pub const UNIQUE_COMMENT: &str = "Unique finding with no duplicates identified";
pub const BEST_COMMENT: &str = "Selected as the best quality finding among duplicates";
const DEFAULT_EXPLANATION: &str = "Identified as a duplicate";

/// Status assigned to one finding, plus its deduplication comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDecision {
    pub status: FindingStatus,
    pub comment: Option<String>,
    /// The finding is both an original and a duplicate; left pending.
    pub inconsistent: bool,
}

impl StatusDecision {
    fn assigned(status: FindingStatus, comment: impl Into<String>) -> Self {
        Self {
            status,
            comment: Some(comment.into()),
            inconsistent: false,
        }
    }

    fn inconsistent() -> Self {
        Self {
            status: FindingStatus::Pending,
            comment: None,
            inconsistent: true,
        }
    }
}

/// Decide the status of `finding` given the graph and the current view of
/// the other findings in the task.
///
/// `by_id` supplies the statuses of the other group members, which is what
/// separates `SimilarValid` from `AlreadyReported`.
pub fn next_status(
    finding: &Finding,
    graph: &DuplicateGraph,
    by_id: &HashMap<FindingId, Finding>,
) -> StatusDecision {
    let is_original = graph.is_original(finding.id);
    let original = graph.original_of(finding.id);

    match (is_original, original) {
        (false, None) => StatusDecision::assigned(FindingStatus::UniqueValid, UNIQUE_COMMENT),
        (true, Some(original)) => {
            tracing::error!(
                finding_id = %finding.id,
                original = %original,
                "Finding is both an original and a duplicate; leaving it pending"
            );
            StatusDecision::inconsistent()
        }
        (true, None) => StatusDecision::assigned(FindingStatus::BestValid, BEST_COMMENT),
        (false, Some(original)) => {
            let explanation = graph
                .explanation(finding.id)
                .filter(|e| !e.trim().is_empty())
                .unwrap_or(DEFAULT_EXPLANATION);

            let reported_by_same_agent = graph
                .group_of(original)
                .into_iter()
                .filter(|id| *id != finding.id)
                .filter_map(|id| by_id.get(&id))
                .any(|member| {
                    member.agent_id == finding.agent_id
                        && member.status == FindingStatus::SimilarValid
                });

            if reported_by_same_agent {
                StatusDecision::assigned(
                    FindingStatus::AlreadyReported,
                    format!(
                        "Already reported by same agent (original: '{}'): {}",
                        original, explanation
                    ),
                )
            } else {
                StatusDecision::assigned(
                    FindingStatus::SimilarValid,
                    format!("Similar to finding '{}': {}", original, explanation),
                )
            }
        }
    }
}

/// Decide statuses for `findings` in input order.
///
/// Each decision is recorded in a working copy before the next finding is
/// considered, so the first same-agent duplicate in a group becomes
/// `SimilarValid` and later ones `AlreadyReported`.
pub fn assign_statuses(
    findings: &[Finding],
    graph: &DuplicateGraph,
) -> Vec<(FindingId, StatusDecision)> {
    let mut by_id: HashMap<FindingId, Finding> =
        findings.iter().map(|f| (f.id, f.clone())).collect();

    let mut decisions = Vec::with_capacity(findings.len());
    for finding in findings {
        let decision = next_status(finding, graph, &by_id);
        if let Some(working) = by_id.get_mut(&finding.id) {
            working.status = decision.status;
        }
        decisions.push((finding.id, decision));
    }
    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::DuplicateRelationship;
    use arbiter_test_utils::fixtures;

    fn rel(finding_id: FindingId, duplicate_of: FindingId, why: &str) -> DuplicateRelationship {
        DuplicateRelationship {
            finding_id,
            duplicate_of,
            explanation: why.to_string(),
        }
    }

    fn decisions_by_id(decisions: Vec<(FindingId, StatusDecision)>) -> HashMap<FindingId, StatusDecision> {
        decisions.into_iter().collect()
    }

    #[test]
    fn test_unique_when_not_in_graph() {
        let findings = fixtures::pending_findings("t1", &["a1"]);
        let decision = next_status(&findings[0], &DuplicateGraph::new(), &HashMap::new());
        assert_eq!(decision.status, FindingStatus::UniqueValid);
        assert_eq!(decision.comment.as_deref(), Some(UNIQUE_COMMENT));
        assert!(!decision.inconsistent);
    }

    #[test]
    fn test_cross_agent_duplicate_is_similar() {
        let findings = fixtures::pending_findings("t1", &["agent1", "agent2"]);
        let (a, b) = (findings[0].id, findings[1].id);
        let graph = DuplicateGraph::from_relationships(&[rel(b, a, "same overflow")]);

        let decisions = decisions_by_id(assign_statuses(&findings, &graph));
        assert_eq!(decisions[&a].status, FindingStatus::BestValid);
        assert_eq!(decisions[&a].comment.as_deref(), Some(BEST_COMMENT));
        assert_eq!(decisions[&b].status, FindingStatus::SimilarValid);
        assert_eq!(
            decisions[&b].comment,
            Some(format!("Similar to finding '{}': same overflow", a))
        );
    }

    #[test]
    fn test_second_same_agent_duplicate_is_already_reported() {
        let findings = fixtures::pending_findings("t1", &["agent1", "agent2", "agent2"]);
        let (a, b, c) = (findings[0].id, findings[1].id, findings[2].id);
        let graph = DuplicateGraph::from_relationships(&[rel(b, a, "x"), rel(c, a, "y")]);

        let decisions = decisions_by_id(assign_statuses(&findings, &graph));
        assert_eq!(decisions[&b].status, FindingStatus::SimilarValid);
        assert_eq!(decisions[&c].status, FindingStatus::AlreadyReported);
        assert_eq!(
            decisions[&c].comment,
            Some(format!("Already reported by same agent (original: '{}'): y", a))
        );
    }

    #[test]
    fn test_same_agent_as_original_is_first_similar() {
        // The original's BestValid status does not count as a prior report.
        let findings = fixtures::pending_findings("t1", &["agent1", "agent1"]);
        let (a, c) = (findings[0].id, findings[1].id);
        let graph = DuplicateGraph::from_relationships(&[rel(c, a, "dup")]);

        let decisions = decisions_by_id(assign_statuses(&findings, &graph));
        assert_eq!(decisions[&a].status, FindingStatus::BestValid);
        assert_eq!(decisions[&c].status, FindingStatus::SimilarValid);
    }

    #[test]
    fn test_inconsistent_graph_leaves_pending() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2", "a3"]);
        let (a, b, c) = (findings[0].id, findings[1].id, findings[2].id);
        // Built without validation: b is both a duplicate and an original.
        let graph = DuplicateGraph::from_relationships(&[rel(b, a, "x"), rel(c, b, "y")]);

        let decision = next_status(&findings[1], &graph, &HashMap::new());
        assert_eq!(decision.status, FindingStatus::Pending);
        assert!(decision.inconsistent);
        assert!(decision.comment.is_none());
    }

    #[test]
    fn test_blank_explanation_falls_back() {
        let findings = fixtures::pending_findings("t1", &["a1", "a2"]);
        let (a, b) = (findings[0].id, findings[1].id);
        let graph = DuplicateGraph::from_relationships(&[rel(b, a, "  ")]);

        let decision = next_status(&findings[1], &graph, &HashMap::new());
        assert_eq!(
            decision.comment,
            Some(format!("Similar to finding '{}': {}", a, DEFAULT_EXPLANATION))
        );
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::resolver::validate_relationships;
    use arbiter_test_utils::generators;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: next_status is deterministic for the same inputs
        #[test]
        fn prop_next_status_is_idempotent(
            (findings, candidates) in generators::arb_findings_with_relationships(10)
        ) {
            let (kept, _) = validate_relationships(&findings, candidates);
            let graph = DuplicateGraph::from_relationships(&kept);
            let by_id: HashMap<_, _> = findings.iter().map(|f| (f.id, f.clone())).collect();

            for finding in &findings {
                let first = next_status(finding, &graph, &by_id);
                let second = next_status(finding, &graph, &by_id);
                prop_assert_eq!(first, second);
            }
            prop_assert_eq!(assign_statuses(&findings, &graph), assign_statuses(&findings, &graph));
        }

        /// Property: a validated graph never leaves a finding pending
        #[test]
        fn prop_validated_graph_assigns_every_finding(
            (findings, candidates) in generators::arb_findings_with_relationships(10)
        ) {
            let (kept, _) = validate_relationships(&findings, candidates);
            let graph = DuplicateGraph::from_relationships(&kept);

            for (_, decision) in assign_statuses(&findings, &graph) {
                prop_assert!(!decision.inconsistent);
                prop_assert_ne!(decision.status, FindingStatus::Pending);
                prop_assert_ne!(decision.status, FindingStatus::Disputed);
            }
        }
    }
}
