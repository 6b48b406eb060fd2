//! # Decodificação de Viterbi
//!
//! Encontra a sequência de tags de maior score sob o [`CrfModel`] em
//! `O(N × T²)` por programação dinâmica:
//!
//! ```text
//! viterbi[0][t] = emission(t, x_0)
//! viterbi[i][t] = max_{t'} [viterbi[i-1][t'] + transition(t', t)] + emission(t, x_i)
//! ```
//!
//! Além do caminho ótimo, devolve os scores acumulados de cada passo; o
//! detector estatístico converte esses scores em probabilidades (softmax) para
//! obter a confiança de cada token.

use crate::crf::{compute_emission_scores, CrfModel};
use crate::features::FeatureVector;
use crate::tagger::Tag;

/// Resultado do Viterbi
#[derive(Debug, Clone)]
pub struct ViterbiResult {
    /// Sequência de tags mais provável (uma por token)
    pub best_sequence: Vec<Tag>,
    /// `step_scores[i][t]`: melhor score acumulado até o token `i` terminando na tag `t`
    pub step_scores: Vec<Vec<f64>>,
}

impl ViterbiResult {
    /// Probabilidade (softmax dos scores do passo) da tag escolhida em cada token.
    pub fn confidences(&self) -> Vec<f64> {
        self.best_sequence
            .iter()
            .zip(&self.step_scores)
            .map(|(tag, scores)| {
                scores_to_probs(scores)
                    .get(tag.index())
                    .copied()
                    .unwrap_or(0.0)
            })
            .collect()
    }
}

pub fn viterbi_decode(model: &CrfModel, feature_vectors: &[FeatureVector]) -> ViterbiResult {
    if feature_vectors.is_empty() {
        return ViterbiResult {
            best_sequence: vec![],
            step_scores: vec![],
        };
    }

    let n_tokens = feature_vectors.len();
    let tags = Tag::all();
    let n_tags = tags.len();

    let emission = compute_emission_scores(model, feature_vectors);

    let mut viterbi: Vec<f64> = emission[0].clone();
    let mut backptr: Vec<Vec<usize>> = vec![vec![0usize; n_tags]; n_tokens];
    let mut step_scores: Vec<Vec<f64>> = Vec::with_capacity(n_tokens);

    // === Inicialização (token 0) ===
    // Um I-X não pode abrir a sequência
    for (t, tag) in tags.iter().enumerate() {
        if matches!(tag, Tag::Inside(_)) {
            viterbi[t] -= 10.0;
        }
        backptr[0][t] = t;
    }
    step_scores.push(viterbi.clone());

    // === Recursão (tokens 1..N-1) ===
    for i in 1..n_tokens {
        let mut new_viterbi = vec![f64::NEG_INFINITY; n_tags];

        for t in 0..n_tags {
            let mut best_prev_score = f64::NEG_INFINITY;
            let mut best_prev_tag = 0;

            for prev_t in 0..n_tags {
                let score = viterbi[prev_t] + model.transition_score(&tags[prev_t], &tags[t]);
                if score > best_prev_score {
                    best_prev_score = score;
                    best_prev_tag = prev_t;
                }
            }

            // Penaliza transições inválidas no esquema BIO
            let penalty = if Tag::is_valid_transition(&tags[best_prev_tag], &tags[t]) {
                0.0
            } else {
                10.0
            };
            new_viterbi[t] = best_prev_score + emission[i][t] - penalty;
            backptr[i][t] = best_prev_tag;
        }

        viterbi = new_viterbi;
        step_scores.push(viterbi.clone());
    }

    // === Backtracking ===
    let mut best_last = best_index(&viterbi);
    let mut best_sequence: Vec<Tag> = vec![Tag::Outside; n_tokens];
    best_sequence[n_tokens - 1] = tags[best_last].clone();

    for i in (0..n_tokens - 1).rev() {
        best_last = backptr[i + 1][best_last];
        best_sequence[i] = tags[best_last].clone();
    }

    ViterbiResult {
        best_sequence,
        step_scores,
    }
}

/// Índice do maior score
fn best_index(scores: &[f64]) -> usize {
    scores
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map_or(0, |(i, _)| i)
}

/// Converte scores em probabilidades softmax
pub fn scores_to_probs(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return vec![];
    }
    let max_score = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|&s| (s - max_score).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}
