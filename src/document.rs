//! JSON-friendly description of a whole preference graph.
//!
//! ```json
//! {
//!   "root": "goal",
//!   "engine": { "method": "eigenvector" },
//!   "contexts": [
//!     { "context": "goal", "weights": { "cost": 1, "safety": 3 } },
//!     { "context": "cost", "judgments": [{ "a": "car_a", "b": "car_b", "ratio": 2.0 }] }
//!   ]
//! }
//! ```

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::engine::Engine;
use crate::graph::{GraphConfig, GraphError, PreferenceGraph};
use crate::pairwise::{to_pairwise_map, Judgment, PairwiseJudgments};

/// Judgments attached to one context, as explicit pairs and/or plain magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub context: String,
    #[serde(default)]
    pub judgments: Vec<Judgment>,
    /// Non-normalized magnitudes, turned into pairwise ratios on load. Kept in
    /// document order, which sets the orientation of the stored pairs.
    #[serde(default, with = "ordered_weights", skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<(String, f64)>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<GraphConfig>,
    #[serde(default)]
    pub contexts: Vec<ContextDocument>,
}

impl GraphDocument {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl PreferenceGraph {
    /// Build a graph from a document. Contexts listed twice are merged in order.
    pub fn from_document(doc: GraphDocument) -> Result<Self, GraphError> {
        let mut graph = PreferenceGraph::new(doc.root)
            .with_engine(doc.engine.unwrap_or_default())
            .with_config(doc.config.unwrap_or_default());
        for ctx in doc.contexts {
            let mut judgments = PairwiseJudgments::from(ctx.judgments);
            if let Some(weights) = ctx.weights {
                judgments.merge(to_pairwise_map(weights)?);
            }
            graph.set_weights(ctx.context, judgments);
        }
        Ok(graph)
    }

    /// Explicit-pair document for this graph; contexts sorted by name.
    pub fn to_document(&self) -> GraphDocument {
        let contexts = self
            .contexts()
            .into_iter()
            .map(|ctx| ContextDocument {
                context: ctx.to_string(),
                judgments: self
                    .judgments_of(ctx)
                    .cloned()
                    .map(Vec::from)
                    .unwrap_or_default(),
                weights: None,
            })
            .collect();
        GraphDocument {
            root: self.root().to_string(),
            engine: Some(self.engine().clone()),
            config: Some(self.config().clone()),
            contexts,
        }
    }
}

/// A JSON object of magnitudes read and written in key order.
mod ordered_weights {
    use super::*;

    pub fn serialize<S: Serializer>(
        weights: &Option<Vec<(String, f64)>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let Some(weights) = weights else {
            return serializer.serialize_none();
        };
        let mut map = serializer.serialize_map(Some(weights.len()))?;
        for (name, magnitude) in weights {
            map.serialize_entry(name, magnitude)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<(String, f64)>>, D::Error> {
        deserializer.deserialize_option(OptionalWeights)
    }

    struct OptionalWeights;

    impl<'de> Visitor<'de> for OptionalWeights {
        type Value = Option<Vec<(String, f64)>>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of names to magnitudes, or null")
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(
            self,
            deserializer: D,
        ) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_map(InOrder).map(Some)
        }
    }

    struct InOrder;

    impl<'de> Visitor<'de> for InOrder {
        type Value = Vec<(String, f64)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of names to magnitudes")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(entry) = access.next_entry::<String, f64>()? {
                out.push(entry);
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LogLeastSquaresEngine;
    use crate::pairwise::PairwiseError;

    const DOC: &str = r#"{
        "root": "goal",
        "engine": { "method": "log_least_squares" },
        "contexts": [
            { "context": "goal", "weights": { "cost": 1, "safety": 3 } },
            { "context": "cost", "judgments": [{ "a": "x", "b": "y", "ratio": 2.0 }] },
            { "context": "safety", "weights": { "x": 1, "y": 4 } }
        ]
    }"#;

    #[test]
    fn document_loads_engine_and_both_judgment_forms() {
        let doc = GraphDocument::from_json(DOC).unwrap();
        let graph = PreferenceGraph::from_document(doc).unwrap();

        assert_eq!(graph.root(), "goal");
        assert_eq!(
            graph.engine(),
            &Engine::LogLeastSquares(LogLeastSquaresEngine::default())
        );
        assert_eq!(graph.config(), &GraphConfig::default());
        let goal = graph.judgments_of("goal").unwrap();
        assert!((goal.ratio("safety", "cost").unwrap() - 3.0).abs() < 1e-12);

        let weights = graph.get_weights().unwrap();
        // cost 0.25 * (2/3, 1/3) + safety 0.75 * (1/5, 4/5)
        assert!((weights["x"] - (0.25 * 2.0 / 3.0 + 0.75 * 0.2)).abs() < 1e-6);
        assert!((weights["y"] - (0.25 / 3.0 + 0.75 * 0.8)).abs() < 1e-6);
    }

    #[test]
    fn document_round_trips_through_graph() {
        let doc = GraphDocument::from_json(DOC).unwrap();
        let graph = PreferenceGraph::from_document(doc).unwrap();
        let json = graph.to_document().to_json_pretty().unwrap();
        let reloaded = GraphDocument::from_json(&json).unwrap();
        let reloaded = PreferenceGraph::from_document(reloaded).unwrap();

        assert_eq!(reloaded.contexts(), graph.contexts());
        let a = graph.get_weights().unwrap();
        let b = reloaded.get_weights().unwrap();
        for (leaf, w) in &a {
            assert!((b[leaf] - w).abs() < 1e-12);
        }
    }

    #[test]
    fn magnitudes_keep_document_order() {
        let raw = r#"{ "root": "r", "contexts": [{ "context": "r", "weights": { "zeta": 3, "alpha": 1 } }] }"#;
        let doc = GraphDocument::from_json(raw).unwrap();
        assert_eq!(
            doc.contexts[0].weights,
            Some(vec![("zeta".to_string(), 3.0), ("alpha".to_string(), 1.0)])
        );

        let graph = PreferenceGraph::from_document(doc.clone()).unwrap();
        let stored: Vec<_> = graph.judgments_of("r").unwrap().iter().collect();
        assert_eq!(stored, vec![("zeta", "alpha", 3.0)]);

        let json = doc.to_json_pretty().unwrap();
        assert!(json.find("zeta").unwrap() < json.find("alpha").unwrap());
        assert_eq!(GraphDocument::from_json(&json).unwrap(), doc);
    }

    #[test]
    fn duplicate_magnitude_names_are_rejected() {
        let raw = r#"{ "root": "r", "contexts": [{ "context": "r", "weights": { "a": 1, "a": 2 } }] }"#;
        let doc = GraphDocument::from_json(raw).unwrap();
        assert!(matches!(
            PreferenceGraph::from_document(doc),
            Err(GraphError::Pairwise(PairwiseError::InvalidInput { .. }))
        ));
    }

    #[test]
    fn document_surfaces_converter_errors() {
        let raw = r#"{ "root": "r", "contexts": [{ "context": "r", "weights": { "a": 1, "b": 0 } }] }"#;
        let doc = GraphDocument::from_json(raw).unwrap();
        let err = PreferenceGraph::from_document(doc).unwrap_err();
        assert_eq!(
            err,
            GraphError::Pairwise(PairwiseError::DivisionByZero {
                name: "b".to_string()
            })
        );
    }
}
