//! `transfer_edges_chord`: care pathway edges between hospital locations.

use atlas_core::TransferEvent;

use super::{Artifact, record_scan};
use crate::Result;
use crate::aggregate::{Edge, PathwayBuilder, PathwayStats, TransitionGraph};
use crate::store::{RecordStore, ScanQuery, SortAs, scan_records};

/// Transfers ordered the way the pathway builder requires.
///
/// Both keys are compared as the schema reads them, so string ids and mixed
/// timestamp layouts arrive in the same order the builder checks.
pub fn transfer_query() -> ScanQuery {
    ScanQuery::for_record::<TransferEvent>()
        .sort_ascending_as("hadm_id", SortAs::Integer)
        .sort_ascending_as("intime", SortAs::Timestamp)
}

/// Scan every transfer and build the transition graph.
pub fn build_graph<S: RecordStore>(store: &S) -> Result<(TransitionGraph, PathwayStats)> {
    let mut builder = PathwayBuilder::new();
    let scan = scan_records::<S, TransferEvent, _>(store, &transfer_query(), |event| {
        builder.push(&event)?;
        Ok(true)
    })?;
    let (graph, stats) = builder.finish();

    record_scan(
        Artifact::TransferEdges,
        scan.scanned,
        scan.invalid + stats.missing_entity + stats.unknown_location,
    );
    tracing::info!(
        events = scan.scanned,
        invalid = scan.invalid,
        admissions = stats.entities,
        missing_entity = stats.missing_entity,
        unknown_location = stats.unknown_location,
        collapsed = stats.collapsed,
        edges = graph.len(),
        "transfer pathways scanned"
    );
    if graph.is_empty() {
        tracing::warn!("No transfer edges generated");
    }

    Ok((graph, stats))
}

/// Artifact documents: one `{from, to, count}` per edge.
pub fn build_edges<S: RecordStore>(store: &S) -> Result<Vec<Edge>> {
    Ok(build_graph(store)?.0.into_edges())
}
