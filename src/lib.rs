#![forbid(unsafe_code)]

//! # ahp-dag
//!
//! Analytic Hierarchy Process priorities over criteria graphs that are not
//! trees.
//!
//! A plain AHP hierarchy gives every criterion exactly one parent. Here a
//! criterion may be shared by several parents (a diamond), and its
//! distribution over the alternatives is computed once and reused everywhere
//! it appears. Each vertex holds pairwise ratio judgments over its immediate
//! children; a [`ComparisonEngine`] turns those into local priorities, and
//! [`PreferenceGraph::get_weights`] folds the levels into one weight per
//! alternative relative to the root.
//!
//! ```
//! use ahp_dag::{to_pairwise_map, PreferenceGraph};
//!
//! let mut graph = PreferenceGraph::new("goal");
//! graph.set_weights("goal", to_pairwise_map([("price", 1.0), ("comfort", 3.0)])?);
//! graph.set_weights("price", to_pairwise_map([("car_a", 2.0), ("car_b", 1.0)])?);
//! graph.set_weights("comfort", to_pairwise_map([("car_a", 1.0), ("car_b", 4.0)])?);
//!
//! let weights = graph.get_weights()?;
//! assert!((weights.values().sum::<f64>() - 1.0).abs() < 1e-9);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod document;
pub mod engine;
pub mod graph;
pub mod pairwise;

pub use document::{ContextDocument, GraphDocument};
pub use engine::{
    ComparisonEngine, EigenvectorEngine, Engine, EngineError, LogLeastSquaresEngine,
    PriorityVector,
};
pub use graph::{
    GraphConfig, GraphError, LeafWeights, PreferenceGraph, ResolvedWeights, ShapeViolation,
};
pub use pairwise::{
    invert, to_pairwise, to_pairwise_map, Judgment, PairwiseError, PairwiseJudgments,
};
