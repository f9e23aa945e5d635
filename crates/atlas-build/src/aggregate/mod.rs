//! Aggregation primitives.
//!
//! - [`frequency`] - flat and two-level count tables
//! - [`hierarchy`] - category trees folded from leaf-code counts
//! - [`pathway`] - weighted transition graphs from ordered event sequences
//!
//! All accumulators are owned by the builder invocation that creates them.

pub mod frequency;
pub mod hierarchy;
pub mod pathway;

pub use frequency::{CountStats, FrequencyTable, NestedCounts, count_by, nest};
pub use hierarchy::{
    CategoryNode, GapPolicy, HierarchyBuilder, HierarchyOptions, HierarchyStats, build_hierarchy,
};
pub use pathway::{Edge, PathwayBuilder, PathwayStats, TransitionGraph, build_pathways};
