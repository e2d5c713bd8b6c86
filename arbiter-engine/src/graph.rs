//! Duplicate relationship graph for one cycle

use arbiter_core::{DuplicateRelationship, FindingId};
use std::collections::HashMap;

/// Original/duplicate maps built from one cycle's relationships.
///
/// Built as-is from whatever relationships it is given. The resolver only
/// hands over validated ones, so in normal operation no id is both an
/// original and a duplicate; the status engine still checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateGraph {
    original_to_duplicates: HashMap<FindingId, Vec<FindingId>>,
    duplicate_to_original: HashMap<FindingId, FindingId>,
    explanations: HashMap<FindingId, String>,
}

impl DuplicateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph. A duplicate claimed twice keeps its first original.
    pub fn from_relationships(relationships: &[DuplicateRelationship]) -> Self {
        let mut graph = Self::new();
        for rel in relationships {
            graph.insert(rel);
        }
        graph
    }

    fn insert(&mut self, rel: &DuplicateRelationship) {
        if self.duplicate_to_original.contains_key(&rel.finding_id) {
            return;
        }
        self.duplicate_to_original
            .insert(rel.finding_id, rel.duplicate_of);
        self.original_to_duplicates
            .entry(rel.duplicate_of)
            .or_default()
            .push(rel.finding_id);
        self.explanations
            .insert(rel.finding_id, rel.explanation.clone());
    }

    pub fn original_of(&self, id: FindingId) -> Option<FindingId> {
        self.duplicate_to_original.get(&id).copied()
    }

    /// Duplicates of `id` in relationship order; empty if it is no original.
    pub fn duplicates_of(&self, id: FindingId) -> &[FindingId] {
        self.original_to_duplicates
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_original(&self, id: FindingId) -> bool {
        self.original_to_duplicates.contains_key(&id)
    }

    pub fn is_duplicate(&self, id: FindingId) -> bool {
        self.duplicate_to_original.contains_key(&id)
    }

    pub fn explanation(&self, id: FindingId) -> Option<&str> {
        self.explanations.get(&id).map(String::as_str)
    }

    /// Original first, then its duplicates. Empty for a non-original.
    pub fn group_of(&self, original: FindingId) -> Vec<FindingId> {
        match self.original_to_duplicates.get(&original) {
            Some(duplicates) => std::iter::once(original)
                .chain(duplicates.iter().copied())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn original_count(&self) -> usize {
        self.original_to_duplicates.len()
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicate_to_original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.duplicate_to_original.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(finding_id: FindingId, duplicate_of: FindingId) -> DuplicateRelationship {
        DuplicateRelationship {
            finding_id,
            duplicate_of,
            explanation: "same root cause".to_string(),
        }
    }

    #[test]
    fn test_group_lists_original_first() {
        let (a, b, c) = (FindingId::now_v7(), FindingId::now_v7(), FindingId::now_v7());
        let graph = DuplicateGraph::from_relationships(&[rel(b, a), rel(c, a)]);

        assert_eq!(graph.group_of(a), vec![a, b, c]);
        assert_eq!(graph.original_of(c), Some(a));
        assert!(graph.is_original(a));
        assert!(!graph.is_duplicate(a));
        assert_eq!(graph.explanation(b), Some("same root cause"));
        assert_eq!(graph.original_count(), 1);
        assert_eq!(graph.duplicate_count(), 2);
    }

    #[test]
    fn test_first_claim_wins() {
        let (a, b, c) = (FindingId::now_v7(), FindingId::now_v7(), FindingId::now_v7());
        let graph = DuplicateGraph::from_relationships(&[rel(c, a), rel(c, b)]);

        assert_eq!(graph.original_of(c), Some(a));
        assert!(graph.duplicates_of(b).is_empty());
        assert!(!graph.is_original(b));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DuplicateGraph::new();
        let id = FindingId::now_v7();
        assert!(graph.is_empty());
        assert!(graph.group_of(id).is_empty());
        assert!(graph.duplicates_of(id).is_empty());
    }
}
