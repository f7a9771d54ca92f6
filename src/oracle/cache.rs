//! Prefix-tree cache of scored n-gram contexts.
//!
//! A context is stored along the path of its tokens, most distant first, so
//! contexts that share history share nodes. Nodes live in one arena and are
//! freed together with the cache.

use super::{BackoffState, ContextToken, NGramScore};
use ahash::AHashMap;

#[derive(Debug, Default)]
struct CacheNode {
    children: AHashMap<ContextToken, usize>,
    prob: Option<f32>,
    state: Option<BackoffState>,
}

#[derive(Debug)]
pub struct NGramCache {
    nodes: Vec<CacheNode>,
    /// Next back-off state to hand out.
    generation: u64,
    resolved: usize,
}

impl Default for NGramCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NGramCache {
    pub fn new() -> Self {
        Self {
            nodes: vec![CacheNode::default()],
            generation: 0,
            resolved: 0,
        }
    }

    pub fn get(&self, tokens: &[ContextToken]) -> Option<NGramScore> {
        let node = &self.nodes[self.find(tokens)?];
        node.prob.map(|prob| NGramScore {
            prob,
            state: node.state,
        })
    }

    pub fn contains(&self, tokens: &[ContextToken]) -> bool {
        self.get(tokens).is_some()
    }

    /// Store `prob` for the context. The first time a node is resolved it
    /// receives a fresh back-off state; later inserts keep it.
    pub fn insert(&mut self, tokens: &[ContextToken], prob: f32) -> NGramScore {
        let idx = self.walk(tokens);
        let generation = &mut self.generation;
        let node = &mut self.nodes[idx];

        let state = *node.state.get_or_insert_with(|| {
            let state = BackoffState(*generation);
            *generation += 1;
            state
        });
        if node.prob.is_none() {
            self.resolved += 1;
        }
        node.prob = Some(prob);

        NGramScore {
            prob,
            state: Some(state),
        }
    }

    /// Number of resolved contexts.
    pub fn len(&self) -> usize {
        self.resolved
    }

    pub fn is_empty(&self) -> bool {
        self.resolved == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    fn find(&self, tokens: &[ContextToken]) -> Option<usize> {
        tokens.iter().try_fold(0usize, |idx, token| {
            self.nodes[idx].children.get(token).copied()
        })
    }

    fn walk(&mut self, tokens: &[ContextToken]) -> usize {
        let mut idx = 0;
        for token in tokens {
            idx = match self.nodes[idx].children.get(token) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(CacheNode::default());
                    self.nodes[idx].children.insert(token.clone(), child);
                    child
                }
            };
        }
        idx
    }
}
