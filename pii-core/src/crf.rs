//! # CRF Linear-Chain
//!
//! Modelo de pontuação do detector estatístico:
//!
//! ```text
//! score(y, x) = Σ_i [emission(y_i, x, i) + transition(y_{i-1}, y_i)]
//! ```
//!
//! Os pesos de emissão ligam uma feature a uma tag; os de transição capturam a
//! regularidade das sequências BIO (ex: `B-PER → I-PER` é muito provável).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;
use crate::tagger::Tag;

/// Pesos do CRF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrfModel {
    /// Pesos de emissão: `"feature|tag_label"` → peso
    pub emission_weights: HashMap<String, f64>,
    /// Pesos de transição indexados por `[prev.index()][next.index()]`
    pub transition_weights: Vec<Vec<f64>>,
}

impl CrfModel {
    /// Cria um modelo CRF com pesos zerados
    pub fn new() -> Self {
        let n = Tag::COUNT;
        Self {
            emission_weights: HashMap::new(),
            transition_weights: vec![vec![0.0f64; n]; n],
        }
    }

    /// `score = Σ_k w_{k, tag} * f_k(x, i)`
    pub fn emission_score(&self, features: &FeatureVector, tag: &Tag) -> f64 {
        let tag_label = tag.label();
        features
            .features
            .iter()
            .map(|(feat_name, feat_val)| {
                let key = format!("{feat_name}|{tag_label}");
                feat_val * self.emission_weights.get(&key).unwrap_or(&0.0)
            })
            .sum()
    }

    pub fn transition_score(&self, prev: &Tag, next: &Tag) -> f64 {
        self.transition_weights[prev.index()][next.index()]
    }

    pub fn set_emission(&mut self, feature: &str, tag: &Tag, weight: f64) {
        let key = format!("{feature}|{}", tag.label());
        self.emission_weights.insert(key, weight);
    }

    pub fn set_transition(&mut self, from: &Tag, to: &Tag, weight: f64) {
        self.transition_weights[from.index()][to.index()] = weight;
    }
}

impl Default for CrfModel {
    fn default() -> Self {
        Self::new()
    }
}

/// Scores de emissão de todos os tokens: `emission[i][tag.index()]`
pub fn compute_emission_scores(
    model: &CrfModel,
    feature_vectors: &[FeatureVector],
) -> Vec<Vec<f64>> {
    let tags = Tag::all();
    feature_vectors
        .iter()
        .map(|fv| tags.iter().map(|tag| model.emission_score(fv, tag)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagger::PiiCategory;

    #[test]
    fn test_emission_score_positive() {
        let mut model = CrfModel::new();
        let tag = Tag::Begin(PiiCategory::Person);
        model.set_emission("is_capitalized", &tag, 2.5);

        let mut fv = FeatureVector::new(0);
        fv.insert("is_capitalized", 1.0);

        let score = model.emission_score(&fv, &tag);
        assert!((score - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_transition_score() {
        let mut model = CrfModel::new();
        let b_per = Tag::Begin(PiiCategory::Person);
        let i_per = Tag::Inside(PiiCategory::Person);
        model.set_transition(&b_per, &i_per, 3.0);

        assert!((model.transition_score(&b_per, &i_per) - 3.0).abs() < 1e-9);
        assert!((model.transition_score(&Tag::Outside, &i_per)).abs() < 1e-9);
    }
}
