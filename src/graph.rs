//! Preference graph: per-vertex judgments and leaf-level aggregation.
//!
//! Every internal vertex owns pairwise judgments over its immediate children.
//! Leaves (alternatives) own none. Aggregation walks the graph post-order and
//! caches each vertex's distribution over leaves, so a criterion shared by
//! several parents is resolved once and reused by all of them.
//!
//! Results are only meaningful when the graph has one root, is acyclic, and no
//! two children of one parent are connected by a path. Those properties are
//! not checked unless [`GraphConfig::validate_shape`] is set or
//! [`PreferenceGraph::validate`] is called.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

use crate::engine::{ComparisonEngine, Engine, EngineError, PriorityVector};
use crate::pairwise::{to_pairwise_map, PairwiseError, PairwiseJudgments};

/// Distribution over leaves, normalized to sum to one.
pub type LeafWeights = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Run [`PreferenceGraph::validate`] before every weight query.
    pub validate_shape: bool,
    /// Allowed drift of a resolved distribution's sum from 1 before warning.
    pub sum_tolerance: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            validate_shape: false,
            sum_tolerance: 1e-9,
        }
    }
}

/// First shape violation found by [`PreferenceGraph::validate`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShapeViolation {
    #[error("root {root} has no judgments")]
    MissingRoot { root: String },
    #[error("cycle through vertex {vertex}")]
    Cycle { vertex: String },
    #[error("vertices without a parent: {roots:?}")]
    MultipleRoots { roots: Vec<String> },
    #[error("children {from} and {to} of {parent} are connected by a path")]
    SiblingPath {
        parent: String,
        from: String,
        to: String,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error(transparent)]
    Pairwise(#[from] PairwiseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("root {root} has no judgments")]
    RootHasNoJudgments { root: String },
    #[error("vertex {vertex} has no judgments")]
    NoJudgments { vertex: String },
    #[error("cycle through vertex {vertex}")]
    Cycle { vertex: String },
    #[error("malformed graph: {0}")]
    MalformedGraph(ShapeViolation),
}

impl From<ShapeViolation> for GraphError {
    fn from(v: ShapeViolation) -> Self {
        GraphError::MalformedGraph(v)
    }
}

/// Leaf distributions of every internal vertex resolved during one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedWeights {
    distributions: BTreeMap<String, LeafWeights>,
}

impl ResolvedWeights {
    pub fn get(&self, vertex: &str) -> Option<&LeafWeights> {
        self.distributions.get(vertex)
    }

    pub fn contains(&self, vertex: &str) -> bool {
        self.distributions.contains_key(vertex)
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LeafWeights)> {
        self.distributions.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn insert(&mut self, vertex: String, weights: LeafWeights) {
        self.distributions.insert(vertex, weights);
    }

    fn take(&mut self, vertex: &str) -> Option<LeafWeights> {
        self.distributions.remove(vertex)
    }
}

#[derive(Default)]
struct Resolution {
    resolved: ResolvedWeights,
    in_progress: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct PreferenceGraph {
    root: String,
    judgments: HashMap<String, PairwiseJudgments>,
    engine: Engine,
    config: GraphConfig,
}

impl PreferenceGraph {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            judgments: HashMap::new(),
            engine: Engine::default(),
            config: GraphConfig::default(),
        }
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Attach judgments to `context`, merging pair by pair into any existing entry.
    pub fn set_weights(&mut self, context: impl Into<String>, judgments: PairwiseJudgments) {
        let context = context.into();
        match self.judgments.get_mut(&context) {
            Some(existing) => existing.merge(judgments),
            None => {
                self.judgments.insert(context, judgments);
            }
        }
    }

    pub fn remove_context(&mut self, context: &str) -> Option<PairwiseJudgments> {
        self.judgments.remove(context)
    }

    pub fn judgments_of(&self, vertex: &str) -> Option<&PairwiseJudgments> {
        self.judgments.get(vertex)
    }

    /// A vertex is a leaf when it has no children, including a context whose
    /// judgment set is empty.
    pub fn is_leaf(&self, vertex: &str) -> bool {
        self.internal(vertex).is_none()
    }

    /// Names appearing in any pair of `vertex`'s judgments; empty for a leaf.
    pub fn get_children_of(&self, vertex: &str) -> BTreeSet<String> {
        self.judgments
            .get(vertex)
            .map(PairwiseJudgments::names)
            .unwrap_or_default()
    }

    /// Internal vertices, sorted by name.
    pub fn contexts(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .judgments
            .iter()
            .filter(|(_, judgments)| !judgments.is_empty())
            .map(|(ctx, _)| ctx.as_str())
            .collect();
        out.sort_unstable();
        out
    }

    /// Vertices referenced as children that have no children of their own.
    pub fn leaves(&self) -> BTreeSet<String> {
        self.judgments
            .values()
            .flat_map(PairwiseJudgments::names)
            .filter(|name| self.is_leaf(name))
            .collect()
    }

    /// Engine priorities of `vertex`'s immediate children, without aggregation.
    pub fn local_weights(&self, vertex: &str) -> Result<PriorityVector, GraphError> {
        let judgments = self.judgments_for_query(vertex)?;
        Ok(self.engine.compare(vertex, judgments)?)
    }

    /// Weight of every leaf reachable from the root.
    pub fn get_weights(&self) -> Result<LeafWeights, GraphError> {
        self.weights_of_with(&self.root, &self.engine)
    }

    /// Same as [`get_weights`](Self::get_weights) with a caller-supplied engine.
    pub fn get_weights_with(
        &self,
        engine: &dyn ComparisonEngine,
    ) -> Result<LeafWeights, GraphError> {
        self.weights_of_with(&self.root, engine)
    }

    /// Weight of every leaf reachable from `vertex`, assessed in its context.
    pub fn get_weights_of(&self, vertex: &str) -> Result<LeafWeights, GraphError> {
        self.weights_of_with(vertex, &self.engine)
    }

    /// Every internal vertex's leaf distribution computed while resolving the root.
    pub fn resolve_all(&self) -> Result<ResolvedWeights, GraphError> {
        self.query(&self.root, &self.engine)
    }

    fn weights_of_with(
        &self,
        vertex: &str,
        engine: &dyn ComparisonEngine,
    ) -> Result<LeafWeights, GraphError> {
        let mut resolved = self.query(vertex, engine)?;
        resolved.take(vertex).ok_or_else(|| GraphError::NoJudgments {
            vertex: vertex.to_string(),
        })
    }

    /// Judgments of `vertex` when it has at least one child.
    fn internal(&self, vertex: &str) -> Option<&PairwiseJudgments> {
        self.judgments
            .get(vertex)
            .filter(|judgments| !judgments.is_empty())
    }

    fn judgments_for_query(&self, vertex: &str) -> Result<&PairwiseJudgments, GraphError> {
        self.internal(vertex).ok_or_else(|| {
            if vertex == self.root {
                GraphError::RootHasNoJudgments {
                    root: vertex.to_string(),
                }
            } else {
                GraphError::NoJudgments {
                    vertex: vertex.to_string(),
                }
            }
        })
    }

    fn query(
        &self,
        vertex: &str,
        engine: &dyn ComparisonEngine,
    ) -> Result<ResolvedWeights, GraphError> {
        self.judgments_for_query(vertex)?;
        if self.config.validate_shape {
            self.validate()?;
        }
        let mut state = Resolution::default();
        self.resolve(vertex, engine, &mut state)?;
        Ok(state.resolved)
    }

    fn resolve(
        &self,
        vertex: &str,
        engine: &dyn ComparisonEngine,
        state: &mut Resolution,
    ) -> Result<(), GraphError> {
        let Some(judgments) = self.internal(vertex) else {
            return Ok(());
        };
        if !state.in_progress.insert(vertex.to_string()) {
            return Err(GraphError::Cycle {
                vertex: vertex.to_string(),
            });
        }

        let children = judgments.names();
        trace!(vertex = %vertex, children = ?children, "resolving");
        for child in &children {
            if !state.resolved.contains(child) {
                self.resolve(child, engine, state)?;
            }
        }

        let local = engine.compare(vertex, judgments)?;
        let mut combined = LeafWeights::new();
        for (child, weight) in local.iter() {
            match state.resolved.get(child) {
                Some(distribution) => {
                    for (leaf, w) in rederive(engine, child, distribution)? {
                        *combined.entry(leaf).or_insert(0.0) += weight * w;
                    }
                }
                None => *combined.entry(child.to_string()).or_insert(0.0) += weight,
            }
        }

        let total: f64 = combined.values().sum();
        if (total - 1.0).abs() > self.config.sum_tolerance {
            warn!(vertex = %vertex, total, "leaf distribution does not sum to one");
        }
        trace!(vertex = %vertex, leaves = combined.len(), "resolved");

        state.in_progress.remove(vertex);
        state.resolved.insert(vertex.to_string(), combined);
        Ok(())
    }

    /// Check the shape the aggregation relies on.
    ///
    /// Reachability of every vertex and of some leaf from every vertex follow
    /// from a single parentless root in a finite acyclic graph: an internal
    /// vertex detached from the root has a parentless ancestor of its own, so
    /// it is reported through [`ShapeViolation::MultipleRoots`].
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.internal(&self.root).is_none() {
            return Err(ShapeViolation::MissingRoot {
                root: self.root.clone(),
            }
            .into());
        }

        let mut marks = HashMap::new();
        for ctx in self.contexts() {
            if let Some(vertex) = self.find_cycle(ctx, &mut marks) {
                return Err(ShapeViolation::Cycle { vertex }.into());
            }
        }

        let referenced: HashSet<String> = self
            .judgments
            .values()
            .flat_map(PairwiseJudgments::names)
            .collect();
        let parentless: Vec<String> = self
            .contexts()
            .into_iter()
            .filter(|ctx| !referenced.contains(*ctx))
            .map(str::to_string)
            .collect();
        if parentless != [self.root.clone()] {
            return Err(ShapeViolation::MultipleRoots { roots: parentless }.into());
        }

        let mut descendants = HashMap::new();
        for parent in self.contexts() {
            let children: Vec<String> = self.get_children_of(parent).into_iter().collect();
            for from in &children {
                let reach = self.descendants(from, &mut descendants).clone();
                for to in &children {
                    if from != to && reach.contains(to) {
                        return Err(ShapeViolation::SiblingPath {
                            parent: parent.to_string(),
                            from: from.clone(),
                            to: to.clone(),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Depth-first search; `false` marks a vertex on the current path, `true` a finished one.
    fn find_cycle(&self, vertex: &str, marks: &mut HashMap<String, bool>) -> Option<String> {
        match marks.get(vertex).copied() {
            Some(true) => return None,
            Some(false) => return Some(vertex.to_string()),
            None => {}
        }
        if self.is_leaf(vertex) {
            return None;
        }
        marks.insert(vertex.to_string(), false);
        for child in self.get_children_of(vertex) {
            if let Some(found) = self.find_cycle(&child, marks) {
                return Some(found);
            }
        }
        marks.insert(vertex.to_string(), true);
        None
    }

    /// Vertices reachable from `vertex`, excluding itself. Assumes no cycles.
    fn descendants<'m>(
        &self,
        vertex: &str,
        memo: &'m mut HashMap<String, BTreeSet<String>>,
    ) -> &'m BTreeSet<String> {
        if !memo.contains_key(vertex) {
            let mut out = BTreeSet::new();
            for child in self.get_children_of(vertex) {
                out.extend(self.descendants(&child, memo).iter().cloned());
                out.insert(child);
            }
            memo.insert(vertex.to_string(), out);
        }
        &memo[vertex]
    }
}

/// Re-derive a child's leaf priorities through the engine from its cached distribution.
///
/// Leaves whose weight underflowed to zero cannot form a ratio; they keep
/// weight zero and only the positive part goes back through the engine.
fn rederive(
    engine: &dyn ComparisonEngine,
    child: &str,
    distribution: &LeafWeights,
) -> Result<LeafWeights, GraphError> {
    let (positive, zero): (LeafWeights, LeafWeights) = distribution
        .iter()
        .map(|(leaf, w)| (leaf.clone(), *w))
        .partition(|(_, w)| *w > 0.0);
    if positive.len() < 2 {
        return Ok(distribution.clone());
    }
    let synthetic = to_pairwise_map(positive)?;
    let mut weights = engine.compare(child, &synthetic)?.into_weights();
    weights.extend(zero);
    Ok(weights)
}
