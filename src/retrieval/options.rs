// src/retrieval/options.rs
// Retrieval request options with documented defaults

/// Per-source fusion weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceWeights {
    pub bm25: f32,
    pub vector: f32,
    pub recent: f32,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            bm25: 1.0,
            vector: 1.0,
            recent: 0.5,
        }
    }
}

/// Options bag for a retrieval request. Unknown knobs don't exist: this is
/// the whole contract.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOptions {
    /// Final result count
    pub top_k: usize,
    /// Context budget for the text view
    pub max_tokens: usize,
    pub enable_graph: bool,
    pub graph_depth: usize,
    pub max_graph_nodes: usize,
    pub weights: SourceWeights,
    pub enable_rerank: bool,
    /// Multiplier applied to test-file chunks on non-test queries;
    /// clamped to [0.1, 1.0]
    pub test_file_penalty: f32,
    /// Multiplier for chunks found by two or more sources;
    /// clamped to [1.0, 2.0]
    pub multi_source_boost: f32,
    /// Fused scores below this are dropped
    pub min_score_threshold: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 20,
            max_tokens: 8000,
            enable_graph: true,
            graph_depth: 2,
            max_graph_nodes: 50,
            weights: SourceWeights::default(),
            enable_rerank: true,
            test_file_penalty: 0.1,
            multi_source_boost: 1.3,
            min_score_threshold: 0.0,
        }
    }
}

impl RetrievalOptions {
    /// Clamp out-of-range knobs into their documented ranges.
    pub fn normalized(mut self) -> Self {
        self.test_file_penalty = self.test_file_penalty.clamp(0.1, 1.0);
        self.multi_source_boost = self.multi_source_boost.clamp(1.0, 2.0);
        self.min_score_threshold = self.min_score_threshold.max(0.0);
        self.top_k = self.top_k.max(1);
        self
    }
}
