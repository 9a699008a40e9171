//! Pairwise judgment container and conversion from plain magnitudes.
//!
//! A judgment `(a, b) -> r` reads "a is preferred over b by a factor of r".
//! Only one orientation of every unordered pair is stored; the other one is
//! implied as the reciprocal.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One stored pairwise ratio, as it appears in serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub a: String,
    pub b: String,
    pub ratio: f64,
}

impl Judgment {
    pub fn new(a: impl Into<String>, b: impl Into<String>, ratio: f64) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            ratio,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PairwiseError {
    #[error("invalid pairwise input: {reason}")]
    InvalidInput { reason: String },
    #[error("got {names} names but {magnitudes} magnitudes")]
    LengthMismatch { names: usize, magnitudes: usize },
    #[error("zero magnitude for {name} cannot take part in a ratio")]
    DivisionByZero { name: String },
}

/// Pairwise ratios keyed by unordered pair, one stored orientation per pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Judgment>", into = "Vec<Judgment>")]
pub struct PairwiseJudgments {
    pairs: BTreeMap<(String, String), f64>,
}

impl PairwiseJudgments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `a` over `b`.
    ///
    /// If the pair is already stored as `(b, a)` that entry is overwritten
    /// with the reciprocal, so the first orientation seen stays canonical.
    pub fn insert(&mut self, a: impl Into<String>, b: impl Into<String>, ratio: f64) {
        let a = a.into();
        let b = b.into();
        if a != b {
            if let Some(slot) = self.pairs.get_mut(&(b.clone(), a.clone())) {
                *slot = 1.0 / ratio;
                return;
            }
        }
        self.pairs.insert((a, b), ratio);
    }

    /// Ratio of `a` over `b`, looking through either stored orientation.
    pub fn ratio(&self, a: &str, b: &str) -> Option<f64> {
        let key = (a.to_string(), b.to_string());
        if let Some(r) = self.pairs.get(&key) {
            return Some(*r);
        }
        let (a, b) = key;
        self.pairs.get(&(b, a)).map(|r| 1.0 / r)
    }

    /// Merge `other` into `self` pair by pair; values from `other` win.
    pub fn merge(&mut self, other: PairwiseJudgments) {
        for ((a, b), ratio) in other.pairs {
            self.insert(a, b, ratio);
        }
    }

    /// Every distinct name appearing on either side of a stored pair.
    pub fn names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for (a, b) in self.pairs.keys() {
            out.insert(a.clone());
            out.insert(b.clone());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.pairs
            .iter()
            .map(|((a, b), r)| (a.as_str(), b.as_str(), *r))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<A, B> FromIterator<((A, B), f64)> for PairwiseJudgments
where
    A: Into<String>,
    B: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = ((A, B), f64)>>(iter: I) -> Self {
        let mut out = Self::new();
        for ((a, b), ratio) in iter {
            out.insert(a, b, ratio);
        }
        out
    }
}

impl From<Vec<Judgment>> for PairwiseJudgments {
    fn from(judgments: Vec<Judgment>) -> Self {
        judgments
            .into_iter()
            .map(|j| ((j.a, j.b), j.ratio))
            .collect()
    }
}

impl From<PairwiseJudgments> for Vec<Judgment> {
    fn from(judgments: PairwiseJudgments) -> Self {
        judgments
            .pairs
            .into_iter()
            .map(|((a, b), ratio)| Judgment { a, b, ratio })
            .collect()
    }
}

fn check_magnitudes(names: &[String], magnitudes: &[f64]) -> Result<(), PairwiseError> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(PairwiseError::InvalidInput {
                reason: format!("duplicate name {name}"),
            });
        }
    }
    for (name, m) in names.iter().zip(magnitudes) {
        if !m.is_finite() || *m < 0.0 {
            return Err(PairwiseError::InvalidInput {
                reason: format!("magnitude for {name} must be finite and non-negative, got {m}"),
            });
        }
        if *m == 0.0 && names.len() > 1 {
            return Err(PairwiseError::DivisionByZero { name: name.clone() });
        }
    }
    Ok(())
}

fn build_pairs(names: Vec<String>, magnitudes: &[f64]) -> PairwiseJudgments {
    let mut out = PairwiseJudgments::new();
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            out.insert(names[i].clone(), names[j].clone(), magnitudes[i] / magnitudes[j]);
        }
    }
    out
}

/// Turn parallel name / magnitude slices into pairwise ratios.
///
/// Every pair `i < j` in input order becomes `(names[i], names[j]) -> m[i] / m[j]`.
pub fn to_pairwise<N: AsRef<str>>(
    names: &[N],
    magnitudes: &[f64],
) -> Result<PairwiseJudgments, PairwiseError> {
    if names.len() != magnitudes.len() {
        return Err(PairwiseError::LengthMismatch {
            names: names.len(),
            magnitudes: magnitudes.len(),
        });
    }
    let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
    check_magnitudes(&names, magnitudes)?;
    Ok(build_pairs(names, magnitudes))
}

/// Same as [`to_pairwise`], taking `(name, magnitude)` entries in iteration order.
pub fn to_pairwise_map<I, K>(weights: I) -> Result<PairwiseJudgments, PairwiseError>
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<String>,
{
    let (names, magnitudes): (Vec<String>, Vec<f64>) =
        weights.into_iter().map(|(k, m)| (k.into(), m)).unzip();
    check_magnitudes(&names, &magnitudes)?;
    Ok(build_pairs(names, &magnitudes))
}

/// Reciprocal judgments: every stored ratio `r` becomes `1 / r`.
///
/// Useful for criteria where less is better (cost, risk).
pub fn invert(judgments: &PairwiseJudgments) -> PairwiseJudgments {
    judgments
        .iter()
        .map(|(a, b, r)| ((a.to_string(), b.to_string()), 1.0 / r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_pairwise_map_keeps_input_orientation() {
        let pairs = to_pairwise_map([("x", 2.0), ("y", 4.0)]).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs.ratio("x", "y"), Some(0.5));
        assert_eq!(pairs.ratio("y", "x"), Some(2.0));
        let stored: Vec<_> = pairs.iter().collect();
        assert_eq!(stored, vec![("x", "y", 0.5)]);
    }

    #[test]
    fn to_pairwise_builds_every_forward_pair() {
        let pairs = to_pairwise(&["a", "b", "c"], &[33.0, 44.0, 66.0]).unwrap();
        assert_eq!(pairs.len(), 3);
        assert!((pairs.ratio("a", "b").unwrap() - 0.75).abs() < 1e-12);
        assert!((pairs.ratio("a", "c").unwrap() - 0.5).abs() < 1e-12);
        assert!((pairs.ratio("b", "c").unwrap() - 44.0 / 66.0).abs() < 1e-12);
    }

    #[test]
    fn to_pairwise_rejects_length_mismatch() {
        let err = to_pairwise(&["a", "b"], &[1.0]).unwrap_err();
        assert_eq!(
            err,
            PairwiseError::LengthMismatch {
                names: 2,
                magnitudes: 1
            }
        );
    }

    #[test]
    fn to_pairwise_rejects_zero_magnitude() {
        let err = to_pairwise(&["a", "b"], &[1.0, 0.0]).unwrap_err();
        assert_eq!(
            err,
            PairwiseError::DivisionByZero {
                name: "b".to_string()
            }
        );
        // A lone zero never divides anything.
        assert!(to_pairwise(&["a"], &[0.0]).unwrap().is_empty());
    }

    #[test]
    fn to_pairwise_rejects_duplicates_and_negatives() {
        assert!(matches!(
            to_pairwise(&["a", "a"], &[1.0, 2.0]),
            Err(PairwiseError::InvalidInput { .. })
        ));
        assert!(matches!(
            to_pairwise_map([("a", 1.0), ("b", -2.0)]),
            Err(PairwiseError::InvalidInput { .. })
        ));
        assert!(matches!(
            to_pairwise_map([("a", f64::NAN), ("b", 2.0)]),
            Err(PairwiseError::InvalidInput { .. })
        ));
    }

    #[test]
    fn insert_reversed_pair_overwrites_with_reciprocal() {
        let mut pairs = PairwiseJudgments::new();
        pairs.insert("a", "b", 2.0);
        pairs.insert("b", "a", 4.0);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs.ratio("a", "b"), Some(0.25));
        assert_eq!(pairs.ratio("b", "a"), Some(4.0));
    }

    #[test]
    fn merge_adds_and_overwrites_pairs() {
        let mut base: PairwiseJudgments = [(("a", "b"), 2.0)].into_iter().collect();
        let update: PairwiseJudgments = [(("a", "c"), 3.0), (("b", "a"), 5.0)]
            .into_iter()
            .collect();
        base.merge(update);
        assert_eq!(base.len(), 2);
        assert_eq!(base.ratio("a", "c"), Some(3.0));
        assert!((base.ratio("b", "a").unwrap() - 5.0).abs() < 1e-12);
        let names: Vec<_> = base.names().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn invert_flips_every_preference() {
        let pairs = to_pairwise(&["s_attack", "s_hide"], &[1.5, 1.0]).unwrap();
        let inv = invert(&pairs);
        assert!((inv.ratio("s_attack", "s_hide").unwrap() - 1.0 / 1.5).abs() < 1e-12);
        assert_eq!(inv.names(), pairs.names());
    }

    #[test]
    fn judgments_serialize_as_a_list() {
        let pairs: PairwiseJudgments = [(("a", "b"), 4.0)].into_iter().collect();
        let json = serde_json::to_value(&pairs).unwrap();
        assert_eq!(json, serde_json::json!([{ "a": "a", "b": "b", "ratio": 4.0 }]));
    }
}
