//! Care pathway graph builder.
//!
//! Walks transfer events sorted by `(hadm_id, intime)` and counts transitions
//! between consecutive care locations of the same admission. Each admission
//! starts at the synthetic "Admissions" node; discharge events map to the
//! synthetic "Discharge" node.
//!
//! # Collapsing
//!
//! Consecutive events that map to the same node produce no edge, so the
//! graph never contains self-loops:
//!
//! ```text
//! [A, A, B, B, B, A]  →  (Admissions, A), (A, B), (B, A)
//! ```
//!
//! # Ordering
//!
//! The builder checks the ordering as it goes and fails with
//! [`Error::UnsortedInput`] instead of silently producing a wrong graph.

use std::collections::{BTreeSet, HashMap};

use atlas_core::{TransferEvent, TransferKind, collections, labels};
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A weighted directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub count: u64,
}

/// Directed weighted edges, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct TransitionGraph {
    index: HashMap<(String, String), usize>,
    edges: Vec<Edge>,
}

impl TransitionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one transition. Self-transitions are ignored.
    pub fn record(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        let key = (from.to_string(), to.to_string());
        match self.index.get(&key) {
            Some(&i) => self.edges[i].count += 1,
            None => {
                self.index.insert(key, self.edges.len());
                self.edges.push(Edge {
                    from: from.to_string(),
                    to: to.to_string(),
                    count: 1,
                });
            }
        }
    }

    pub fn weight(&self, from: &str, to: &str) -> u64 {
        self.index
            .get(&(from.to_string(), to.to_string()))
            .map_or(0, |&i| self.edges[i].count)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn into_edges(self) -> Vec<Edge> {
        self.edges
    }

    /// Distinct node labels touched by any edge, sorted.
    pub fn nodes(&self) -> BTreeSet<&str> {
        self.edges
            .iter()
            .flat_map(|e| [e.from.as_str(), e.to.as_str()])
            .collect()
    }

    /// Sum of all edge weights.
    pub fn total_transitions(&self) -> u64 {
        self.edges.iter().map(|e| e.count).sum()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Event accounting for a pathway build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathwayStats {
    pub events: u64,
    /// Distinct admissions seen.
    pub entities: u64,
    pub missing_entity: u64,
    /// Events with an empty or "UNKNOWN" location.
    pub unknown_location: u64,
    /// Events suppressed as consecutive duplicates.
    pub collapsed: u64,
    pub transitions: u64,
}

/// Node label an event maps to, before the unknown-location check.
pub fn node_for(event: &TransferEvent) -> Option<&str> {
    match event.eventtype {
        TransferKind::Discharge => Some(labels::END),
        TransferKind::Ed => Some(labels::EMERGENCY_DEPARTMENT),
        _ => event.careunit.as_deref(),
    }
}

/// Single-pass state machine over sorted transfer events.
#[derive(Debug)]
pub struct PathwayBuilder {
    graph: TransitionGraph,
    current: Option<i64>,
    previous: String,
    last_intime: Option<NaiveDateTime>,
    stats: PathwayStats,
}

impl Default for PathwayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PathwayBuilder {
    pub fn new() -> Self {
        Self {
            graph: TransitionGraph::new(),
            current: None,
            previous: labels::START.to_string(),
            last_intime: None,
            stats: PathwayStats::default(),
        }
    }

    /// Feed the next event.
    ///
    /// Events without an admission id are skipped. Fails if the event sorts
    /// before the previous one.
    pub fn push(&mut self, event: &TransferEvent) -> Result<()> {
        self.stats.events += 1;

        let Some(entity) = event.hadm_id else {
            self.stats.missing_entity += 1;
            return Ok(());
        };
        // Stores order timestamps at millisecond precision.
        let intime = event.intime.map(|t| t.round_subsecs(3));

        match self.current {
            Some(current) if entity < current => {
                return Err(Error::UnsortedInput {
                    collection: collections::TRANSFERS,
                    detail: format!("hadm_id {} after {}", entity, current),
                });
            }
            Some(current) if entity == current => {
                if intime < self.last_intime {
                    return Err(Error::UnsortedInput {
                        collection: collections::TRANSFERS,
                        detail: format!(
                            "hadm_id {}: intime {:?} after {:?}",
                            entity, intime, self.last_intime
                        ),
                    });
                }
            }
            _ => {
                self.current = Some(entity);
                self.previous = labels::START.to_string();
                self.stats.entities += 1;
            }
        }
        self.last_intime = intime;

        let candidate = match node_for(event) {
            Some(label) if labels::is_node_label(label) => label,
            _ => {
                self.stats.unknown_location += 1;
                return Ok(());
            }
        };

        if candidate == self.previous {
            self.stats.collapsed += 1;
            return Ok(());
        }

        self.graph.record(&self.previous, candidate);
        self.stats.transitions += 1;
        self.previous = candidate.to_string();
        Ok(())
    }

    pub fn finish(self) -> (TransitionGraph, PathwayStats) {
        (self.graph, self.stats)
    }
}

/// Build a graph from events already sorted by `(hadm_id, intime)`.
pub fn build_pathways<'a, I>(events: I) -> Result<(TransitionGraph, PathwayStats)>
where
    I: IntoIterator<Item = &'a TransferEvent>,
{
    let mut builder = PathwayBuilder::new();
    for event in events {
        builder.push(event)?;
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(2180, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
    }

    fn event(hadm_id: i64, kind: &str, careunit: Option<&str>, hour: u32) -> TransferEvent {
        TransferEvent {
            hadm_id: Some(hadm_id),
            eventtype: TransferKind::parse(kind),
            careunit: careunit.map(String::from),
            intime: at(hour),
        }
    }

    fn assert_no_self_loops(graph: &TransitionGraph) {
        for edge in graph.edges() {
            assert_ne!(edge.from, edge.to);
        }
    }

    #[test]
    fn test_collapsing_consecutive_duplicates() {
        let events: Vec<_> = ["A", "A", "B", "B", "B", "A"]
            .iter()
            .enumerate()
            .map(|(i, unit)| event(1, "transfer", Some(*unit), i as u32))
            .collect();

        let (graph, stats) = build_pathways(&events).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.weight(labels::START, "A"), 1);
        assert_eq!(graph.weight("A", "B"), 1);
        assert_eq!(graph.weight("B", "A"), 1);
        assert_eq!(stats.collapsed, 3);
        assert_no_self_loops(&graph);
    }

    #[test]
    fn test_two_admissions_share_discharge_edge() {
        let events = vec![
            event(1, "admit", Some("UNKNOWN"), 0),
            event(1, "transfer", Some("ICU"), 1),
            event(1, "transfer", Some("ICU"), 2),
            event(1, "discharge", None, 3),
            event(2, "admit", Some("UNKNOWN"), 0),
            event(2, "ED", Some("Emergency Department Observation"), 1),
            event(2, "transfer", Some("ICU"), 2),
            event(2, "discharge", None, 3),
        ];

        let (graph, stats) = build_pathways(&events).unwrap();

        assert_eq!(graph.weight(labels::START, "ICU"), 1);
        assert_eq!(graph.weight(labels::START, labels::EMERGENCY_DEPARTMENT), 1);
        assert_eq!(graph.weight(labels::EMERGENCY_DEPARTMENT, "ICU"), 1);
        assert_eq!(graph.weight("ICU", labels::END), 2);
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.total_transitions(), 5);
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.unknown_location, 2);
        assert_no_self_loops(&graph);
    }

    #[test]
    fn test_state_resets_per_admission() {
        let events = vec![
            event(1, "transfer", Some("Ward"), 0),
            event(2, "transfer", Some("Ward"), 0),
        ];
        let (graph, _) = build_pathways(&events).unwrap();
        assert_eq!(graph.weight(labels::START, "Ward"), 2);
    }

    #[test]
    fn test_missing_location_and_entity_are_skipped() {
        let mut orphan = event(0, "transfer", Some("ICU"), 0);
        orphan.hadm_id = None;
        let events = vec![
            orphan,
            event(1, "transfer", None, 1),
            event(1, "transfer", Some("Ward"), 2),
        ];

        let (graph, stats) = build_pathways(&events).unwrap();
        assert_eq!(stats.missing_entity, 1);
        assert_eq!(stats.unknown_location, 1);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.weight(labels::START, "Ward"), 1);
    }

    #[test]
    fn test_discharge_label_is_not_taken_from_careunit() {
        let events = vec![
            event(1, "transfer", Some("ICU"), 0),
            event(1, "discharge", Some("ICU"), 1),
        ];
        let (graph, _) = build_pathways(&events).unwrap();
        assert_eq!(graph.weight("ICU", labels::END), 1);
    }

    #[test]
    fn test_unsorted_entities_fail() {
        let events = vec![
            event(2, "transfer", Some("ICU"), 0),
            event(1, "transfer", Some("Ward"), 0),
        ];
        let err = build_pathways(&events).unwrap_err();
        assert!(matches!(err, Error::UnsortedInput { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_unsorted_times_fail() {
        let events = vec![
            event(1, "transfer", Some("ICU"), 5),
            event(1, "transfer", Some("Ward"), 2),
        ];
        assert!(matches!(
            build_pathways(&events),
            Err(Error::UnsortedInput { .. })
        ));
    }

    #[test]
    fn test_empty_input_gives_empty_graph() {
        let (graph, stats) = build_pathways(Vec::<TransferEvent>::new().iter()).unwrap();
        assert!(graph.is_empty());
        assert_eq!(stats, PathwayStats::default());
    }

    #[test]
    fn test_nodes_are_sorted_and_distinct() {
        let events = vec![
            event(1, "transfer", Some("Ward"), 0),
            event(1, "transfer", Some("ICU"), 1),
            event(1, "discharge", None, 2),
        ];
        let (graph, _) = build_pathways(&events).unwrap();
        let nodes: Vec<&str> = graph.nodes().into_iter().collect();
        assert_eq!(nodes, vec!["Admissions", "Discharge", "ICU", "Ward"]);
    }

    #[test]
    fn test_record_ignores_self_transition() {
        let mut graph = TransitionGraph::new();
        graph.record("ICU", "ICU");
        assert!(graph.is_empty());
    }
}
