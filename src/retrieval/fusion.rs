// src/retrieval/fusion.rs
// Reciprocal-rank fusion and post-fusion heuristics
//
// RRF sums weight/(k + rank) per chunk across source lists, avoiding any
// need to normalize raw scores across heterogeneous sources.

use crate::retrieval::options::{RetrievalOptions, SourceWeights};
use crate::types::{FusedScoredChunk, ScoredChunk, SearchSource};
use std::collections::HashMap;

/// Standard RRF smoothing constant.
pub const RRF_K: f32 = 60.0;

/// Weight applied to a source's ranked list. HyDE hits ride the vector
/// weight; they are dense-path results under a rewritten query.
pub fn source_weight(source: SearchSource, weights: &SourceWeights) -> f32 {
    match source {
        SearchSource::Bm25 => weights.bm25,
        SearchSource::Vector | SearchSource::Hyde => weights.vector,
        SearchSource::Recent => weights.recent,
    }
}

/// Fuse ranked per-source lists into a single list.
///
/// Deterministic for a fixed input snapshot: descending fused score, ties
/// broken by first-seen order across the input lists.
pub fn fuse(lists: Vec<Vec<ScoredChunk>>, weights: &SourceWeights) -> Vec<FusedScoredChunk> {
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut fused: Vec<FusedScoredChunk> = Vec::new();

    for list in lists {
        for scored in list {
            let contribution =
                source_weight(scored.source, weights) / (RRF_K + scored.rank as f32);
            match by_id.get(&scored.chunk.id) {
                Some(&idx) => {
                    fused[idx].fused_score += contribution;
                    fused[idx].sources.insert(scored.source);
                }
                None => {
                    by_id.insert(scored.chunk.id.clone(), fused.len());
                    let mut sources = std::collections::BTreeSet::new();
                    sources.insert(scored.source);
                    fused.push(FusedScoredChunk {
                        chunk: scored.chunk,
                        fused_score: contribution,
                        sources,
                    });
                }
            }
        }
    }

    // Stable sort keeps first-seen order on ties.
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

/// Is this path a test/spec/fixture file?
pub fn is_test_file(path: &str) -> bool {
    let p = path.to_lowercase();
    let file_name = p.rsplit('/').next().unwrap_or(&p);

    p.contains("/tests/")
        || p.contains("/test/")
        || p.contains("/__tests__/")
        || p.contains("/spec/")
        || p.contains("/fixtures/")
        || p.contains("/testdata/")
        || p.starts_with("tests/")
        || p.starts_with("test/")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.contains("_test.")
        || file_name.starts_with("test_")
        || file_name.ends_with("_spec.rb")
}

/// Post-fusion heuristics, in order: multi-source boost, test-file penalty
/// (skipped for test-related queries), minimum-score filter, re-sort.
pub fn apply_heuristics(
    mut fused: Vec<FusedScoredChunk>,
    options: &RetrievalOptions,
    query_is_test_related: bool,
) -> Vec<FusedScoredChunk> {
    for item in fused.iter_mut() {
        if item.sources.len() >= 2 {
            item.fused_score *= options.multi_source_boost;
        }
        if !query_is_test_related && is_test_file(&item.chunk.file_path) {
            item.fused_score *= options.test_file_penalty;
        }
    }

    if options.min_score_threshold > 0.0 {
        fused.retain(|item| item.fused_score >= options.min_score_threshold);
    }

    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkKind};
    use std::collections::HashMap;

    fn chunk(id: &str, path: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            file_path: path.to_string(),
            content: format!("content of {id}"),
            start_line: 1,
            end_line: 10,
            index: 0,
            content_hash: format!("h-{id}"),
            kind: ChunkKind::Block,
            metadata: HashMap::new(),
        }
    }

    fn scored(id: &str, path: &str, rank: usize, source: SearchSource) -> ScoredChunk {
        ScoredChunk {
            chunk: chunk(id, path),
            score: 1.0 / rank as f32,
            rank,
            source,
        }
    }

    #[test]
    fn test_single_source_rrf_score() {
        let fused = fuse(
            vec![vec![scored("a", "src/a.rs", 1, SearchSource::Bm25)]],
            &SourceWeights::default(),
        );
        assert_eq!(fused.len(), 1);
        assert!((fused[0].fused_score - 1.0 / 61.0).abs() < 1e-6);
    }

    #[test]
    fn test_two_source_overlap_sums() {
        // Chunk ranked 1st in both bm25 and vector, weights 1.0:
        // base fused score = 2 * (1/61) ~= 0.03279
        let fused = fuse(
            vec![
                vec![scored("a", "src/a.rs", 1, SearchSource::Bm25)],
                vec![scored("a", "src/a.rs", 1, SearchSource::Vector)],
            ],
            &SourceWeights::default(),
        );
        assert_eq!(fused.len(), 1);
        assert!((fused[0].fused_score - 0.032787).abs() < 1e-4);
        assert_eq!(fused[0].sources.len(), 2);
    }

    #[test]
    fn test_multi_source_boost_worked_example() {
        // 0.03279 * 1.3 ~= 0.04262 with the default boost
        let fused = fuse(
            vec![
                vec![scored("a", "src/a.rs", 1, SearchSource::Bm25)],
                vec![scored("a", "src/a.rs", 1, SearchSource::Vector)],
            ],
            &SourceWeights::default(),
        );
        let boosted = apply_heuristics(fused, &RetrievalOptions::default(), false);
        assert!((boosted[0].fused_score - 0.042623).abs() < 1e-4);
    }

    #[test]
    fn test_fusion_monotonic_in_weight() {
        let lists = || {
            vec![
                vec![
                    scored("a", "src/a.rs", 1, SearchSource::Bm25),
                    scored("b", "src/b.rs", 2, SearchSource::Bm25),
                ],
                vec![scored("b", "src/b.rs", 1, SearchSource::Vector)],
            ]
        };
        let low = fuse(
            lists(),
            &SourceWeights {
                bm25: 0.5,
                ..Default::default()
            },
        );
        let high = fuse(
            lists(),
            &SourceWeights {
                bm25: 1.5,
                ..Default::default()
            },
        );

        // Raising the bm25 weight with ranks fixed never decreases any
        // member's fused score.
        for item in &low {
            let after = high.iter().find(|h| h.chunk.id == item.chunk.id).unwrap();
            assert!(after.fused_score >= item.fused_score - 1e-7);
        }
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        // Same rank in two separate bm25 lists: identical scores, order of
        // first appearance wins.
        let fused = fuse(
            vec![
                vec![scored("first", "src/a.rs", 1, SearchSource::Bm25)],
                vec![scored("second", "src/b.rs", 1, SearchSource::Bm25)],
            ],
            &SourceWeights::default(),
        );
        assert_eq!(fused[0].chunk.id, "first");
        assert_eq!(fused[1].chunk.id, "second");
    }

    #[test]
    fn test_is_test_file() {
        assert!(is_test_file("src/foo.test.ts"));
        assert!(is_test_file("src/foo.spec.js"));
        assert!(is_test_file("pkg/parser_test.go"));
        assert!(is_test_file("tests/integration.rs"));
        assert!(is_test_file("src/__tests__/app.tsx"));
        assert!(is_test_file("python/test_scanner.py"));
        assert!(!is_test_file("src/testament.rs"));
        assert!(!is_test_file("src/retrieval/fusion.rs"));
        assert!(!is_test_file("src/contest/mod.rs"));
    }

    #[test]
    fn test_penalty_applied_and_reranked() {
        let mut fused = vec![
            FusedScoredChunk {
                chunk: chunk("t", "src/foo.test.ts"),
                fused_score: 1.0,
                sources: [SearchSource::Bm25].into_iter().collect(),
            },
            FusedScoredChunk {
                chunk: chunk("i", "src/foo.ts"),
                fused_score: 0.5,
                sources: [SearchSource::Bm25].into_iter().collect(),
            },
        ];
        fused = apply_heuristics(fused, &RetrievalOptions::default(), false);

        // 1.0 * 0.1 = 0.1 drops the test chunk below the implementation
        assert_eq!(fused[0].chunk.id, "i");
        assert!((fused[1].fused_score - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_penalty_skipped_for_test_queries() {
        let fused = vec![FusedScoredChunk {
            chunk: chunk("t", "src/foo.test.ts"),
            fused_score: 1.0,
            sources: [SearchSource::Bm25].into_iter().collect(),
        }];
        let result = apply_heuristics(fused, &RetrievalOptions::default(), true);
        assert!((result[0].fused_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_min_score_threshold_filters() {
        let fused = vec![
            FusedScoredChunk {
                chunk: chunk("hi", "src/a.rs"),
                fused_score: 0.9,
                sources: [SearchSource::Bm25].into_iter().collect(),
            },
            FusedScoredChunk {
                chunk: chunk("lo", "src/b.rs"),
                fused_score: 0.001,
                sources: [SearchSource::Bm25].into_iter().collect(),
            },
        ];
        let options = RetrievalOptions {
            min_score_threshold: 0.01,
            ..Default::default()
        };
        let result = apply_heuristics(fused, &options, false);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].chunk.id, "hi");
    }

    #[test]
    fn test_hyde_uses_vector_weight() {
        let weights = SourceWeights {
            vector: 2.0,
            ..Default::default()
        };
        assert!((source_weight(SearchSource::Hyde, &weights) - 2.0).abs() < f32::EPSILON);
        assert!((source_weight(SearchSource::Recent, &weights) - 0.5).abs() < f32::EPSILON);
    }
}
