//! Evaluation Batcher
//!
//! Splits a task's findings into judge-sized evaluation batches. Duplicate
//! groups always travel together so every member gets the same verdict.

use arbiter_core::{DuplicateRelationship, Finding, FindingEvaluation, FindingId};
use std::collections::{HashMap, HashSet};

/// One unit of work for the evaluation judge.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationBatch {
    /// An original with its duplicates; judged as one verdict.
    Group {
        original: FindingId,
        members: Vec<Finding>,
    },
    /// Unrelated findings; judged individually.
    Chunk(Vec<Finding>),
}

impl EvaluationBatch {
    pub fn members(&self) -> &[Finding] {
        match self {
            Self::Group { members, .. } => members,
            Self::Chunk(members) => members,
        }
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }

    pub fn ids(&self) -> Vec<FindingId> {
        self.members().iter().map(|f| f.id).collect()
    }
}

/// Group `findings` for evaluation.
///
/// Every original with at least one duplicate in the input becomes a
/// `Group` (original first, then duplicates in input order), regardless of
/// `max_batch_size`. Everything else is chunked in input order. Each input
/// finding lands in exactly one batch; relationships naming ids outside the
/// input are ignored.
pub fn group_for_evaluation(
    findings: &[Finding],
    relationships: &[DuplicateRelationship],
    max_batch_size: usize,
) -> Vec<EvaluationBatch> {
    let chunk_size = max_batch_size.max(1);
    let present: HashSet<FindingId> = findings.iter().map(|f| f.id).collect();

    let mut duplicates_by_original: HashMap<FindingId, HashSet<FindingId>> = HashMap::new();
    for rel in relationships {
        if rel.finding_id != rel.duplicate_of
            && present.contains(&rel.finding_id)
            && present.contains(&rel.duplicate_of)
        {
            duplicates_by_original
                .entry(rel.duplicate_of)
                .or_default()
                .insert(rel.finding_id);
        }
    }

    let mut placed: HashSet<FindingId> = HashSet::new();
    let mut batches = Vec::new();

    for original in findings {
        let Some(duplicate_ids) = duplicates_by_original.get(&original.id) else {
            continue;
        };
        if placed.contains(&original.id) {
            continue;
        }

        let duplicates: Vec<Finding> = findings
            .iter()
            .filter(|f| duplicate_ids.contains(&f.id) && !placed.contains(&f.id))
            .cloned()
            .collect();
        if duplicates.is_empty() {
            continue;
        }

        placed.insert(original.id);
        placed.extend(duplicates.iter().map(|f| f.id));

        let mut members = Vec::with_capacity(duplicates.len() + 1);
        members.push(original.clone());
        members.extend(duplicates);
        batches.push(EvaluationBatch::Group {
            original: original.id,
            members,
        });
    }

    let remaining: Vec<Finding> = findings
        .iter()
        .filter(|f| !placed.contains(&f.id))
        .cloned()
        .collect();
    batches.extend(
        remaining
            .chunks(chunk_size)
            .map(|chunk| EvaluationBatch::Chunk(chunk.to_vec())),
    );

    tracing::debug!(
        findings = findings.len(),
        batches = batches.len(),
        groups = batches.iter().filter(|b| b.is_group()).count(),
        "Findings grouped for evaluation"
    );
    batches
}

/// Fan one group verdict out to every member.
///
/// The original's evaluation wins; otherwise the first evaluation that names
/// a member, otherwise the first one returned. No evaluations, no verdict.
pub fn consolidate_group_verdict(
    original: FindingId,
    members: &[Finding],
    evaluations: &[FindingEvaluation],
) -> Vec<FindingEvaluation> {
    let member_ids: HashSet<FindingId> = members.iter().map(|f| f.id).collect();
    let verdict = evaluations
        .iter()
        .find(|e| e.finding_id == original)
        .or_else(|| evaluations.iter().find(|e| member_ids.contains(&e.finding_id)))
        .or_else(|| evaluations.first());

    let Some(verdict) = verdict else {
        return Vec::new();
    };

    members
        .iter()
        .map(|member| FindingEvaluation {
            finding_id: member.id,
            is_valid: verdict.is_valid,
            severity: verdict.severity.clone(),
            comment: verdict.comment.clone(),
        })
        .collect()
}

/// Evaluations for one batch, reconciled against its members.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchVerdict {
    pub evaluations: Vec<FindingEvaluation>,
    /// Members the judge said nothing about.
    pub missing: Vec<FindingId>,
    /// Evaluations naming ids outside the batch, or repeats.
    pub discarded: usize,
}

/// Match the judge's answer for `batch` to its members.
///
/// Groups are consolidated into a single verdict. Chunks keep the first
/// evaluation per member and discard anything naming a non-member.
pub fn reconcile_batch(batch: &EvaluationBatch, evaluations: Vec<FindingEvaluation>) -> BatchVerdict {
    match batch {
        EvaluationBatch::Group { original, members } => {
            let consolidated = consolidate_group_verdict(*original, members, &evaluations);
            let missing = if consolidated.is_empty() {
                members.iter().map(|f| f.id).collect()
            } else {
                Vec::new()
            };
            BatchVerdict {
                evaluations: consolidated,
                missing,
                discarded: 0,
            }
        }
        EvaluationBatch::Chunk(members) => {
            let member_ids: HashSet<FindingId> = members.iter().map(|f| f.id).collect();
            let mut seen = HashSet::new();
            let mut kept = Vec::with_capacity(members.len());
            let mut discarded = 0;

            for evaluation in evaluations {
                if member_ids.contains(&evaluation.finding_id) && seen.insert(evaluation.finding_id)
                {
                    kept.push(evaluation);
                } else {
                    discarded += 1;
                }
            }

            let missing = members
                .iter()
                .map(|f| f.id)
                .filter(|id| !seen.contains(id))
                .collect();

            BatchVerdict {
                evaluations: kept,
                missing,
                discarded,
            }
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use arbiter_test_utils::generators;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: flattened batches are a permutation of the input
        #[test]
        fn prop_batching_is_complete(
            (findings, rels) in generators::arb_findings_with_relationships(25),
            max_batch_size in 0usize..12,
        ) {
            let batches = group_for_evaluation(&findings, &rels, max_batch_size);

            let mut flattened: Vec<FindingId> = batches.iter().flat_map(|b| b.ids()).collect();
            let mut input: Vec<FindingId> = findings.iter().map(|f| f.id).collect();
            prop_assert_eq!(flattened.len(), input.len());
            flattened.sort();
            input.sort();
            prop_assert_eq!(flattened, input);
        }

        /// Property: chunks respect max_batch_size
        #[test]
        fn prop_chunks_are_bounded(
            (findings, rels) in generators::arb_findings_with_relationships(25),
            max_batch_size in 1usize..12,
        ) {
            for batch in group_for_evaluation(&findings, &rels, max_batch_size) {
                if !batch.is_group() {
                    prop_assert!(batch.len() <= max_batch_size);
                    prop_assert!(!batch.is_empty());
                }
            }
        }
    }
}
