// src/retrieval/graph.rs
// Graph expansion: surface related-but-not-directly-matched chunks
//
// Expanded chunks are always ranked strictly below every primary fused
// result; the decay curve (lowest fused score x 0.5, divided by position)
// is a presentation heuristic, not a contract.

use crate::error::Result;
use crate::retrieval::options::RetrievalOptions;
use crate::store::{MetadataStore, SymbolGraphStore};
use crate::types::{FusedScoredChunk, GraphExpansion};
use std::collections::BTreeSet;

/// Decay factor applied to the lowest primary score before positional decay
const GRAPH_SCORE_DECAY: f32 = 0.5;

/// Expand the symbol graph from the fused results.
///
/// Returns the expansion metadata and the expanded chunks as fused entries
/// with no contributing search source, scored strictly below the primaries.
pub async fn expand_results(
    graph: &dyn SymbolGraphStore,
    store: &MetadataStore,
    fused: &[FusedScoredChunk],
    options: &RetrievalOptions,
) -> Result<(Vec<FusedScoredChunk>, GraphExpansion)> {
    if fused.is_empty() {
        return Ok((Vec::new(), GraphExpansion::default()));
    }

    let seed_ids: Vec<String> = fused.iter().map(|f| f.chunk.id.clone()).collect();
    let expansion = graph
        .expand_from_chunks(seed_ids, options.graph_depth, options.max_graph_nodes)
        .await?;

    if expansion.related_chunk_ids.is_empty() {
        return Ok((Vec::new(), expansion));
    }

    let min_primary = fused
        .iter()
        .map(|f| f.fused_score)
        .fold(f32::INFINITY, f32::min);
    let base = min_primary * GRAPH_SCORE_DECAY;

    let chunks = store
        .get_chunks_by_ids(expansion.related_chunk_ids.clone())
        .await?;

    let expanded = chunks
        .into_iter()
        .enumerate()
        .map(|(position, chunk)| FusedScoredChunk {
            chunk,
            fused_score: base / (position + 1) as f32,
            sources: BTreeSet::new(),
        })
        .collect();

    Ok((expanded, expansion))
}
