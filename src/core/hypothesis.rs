//! Search hypotheses and the arena that stores their token history.
//!
//! A hypothesis never changes once created. Extending it appends one node
//! to a [`HypothesisArena`] and produces a new hypothesis pointing at that
//! node, so siblings share their common prefix through parent links:
//!
//! ```text
//!            root
//!           /    \
//!        [a]      [b]        <- step 0
//!       /   \        \
//!   [a a]  [a b]    [b a]    <- step 1 (each node stores one token + parent)
//! ```
//!
//! The full sequence of a hypothesis is recovered by walking parent links
//! back to the root.

use crate::core::vocab::TokenId;

/// Index of a node in a [`HypothesisArena`].
pub type NodeId = usize;

#[derive(Debug, Clone, Copy)]
struct Node {
    token: TokenId,
    parent: Option<NodeId>,
}

/// Append-only storage for hypothesis token histories.
#[derive(Debug, Default)]
pub struct HypothesisArena {
    nodes: Vec<Node>,
}

impl HypothesisArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an arena with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    /// Record `token` as a child of `parent` (or of the root).
    pub fn push(&mut self, parent: Option<NodeId>, token: TokenId) -> NodeId {
        self.nodes.push(Node { token, parent });
        self.nodes.len() - 1
    }

    /// Number of nodes stored.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reconstruct the token sequence ending at `node`, oldest first.
    pub fn tokens(&self, node: Option<NodeId>) -> Vec<TokenId> {
        let mut tokens = Vec::new();
        let mut cursor = node;
        while let Some(id) = cursor {
            let node = self.nodes[id];
            tokens.push(node.token);
            cursor = node.parent;
        }
        tokens.reverse();
        tokens
    }
}

/// One partial or complete candidate sequence.
///
/// `S` is the language-model context state after the last token.
#[derive(Debug, Clone)]
pub struct Hypothesis<S> {
    node: Option<NodeId>,
    len: usize,
    score: f32,
    state: S,
    finished: bool,
}

impl<S> Hypothesis<S> {
    /// The empty hypothesis at the start of a search.
    pub fn root(state: S) -> Self {
        Self {
            node: None,
            len: 0,
            score: 0.0,
            state,
            finished: false,
        }
    }

    /// Create the child obtained by appending `token`.
    ///
    /// The parent is left untouched so it can spawn further children.
    pub fn extend(&self, arena: &mut HypothesisArena, token: TokenId, score: f32, state: S) -> Self {
        Self {
            node: Some(arena.push(self.node, token)),
            len: self.len + 1,
            score,
            state,
            finished: false,
        }
    }

    // ========== Getters ==========

    /// Cumulative combined score.
    pub fn score(&self) -> f32 {
        self.score
    }

    /// Language-model state after the last token.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Number of tokens in the sequence.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Token sequence, oldest first.
    pub fn tokens(&self, arena: &HypothesisArena) -> Vec<TokenId> {
        arena.tokens(self.node)
    }

    // ========== Final updates ==========

    /// Mark the hypothesis as complete.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Add a terminal score (e.g. the end-of-sequence LM score).
    pub fn add_score(&mut self, delta: f32) {
        self.score += delta;
    }
}
