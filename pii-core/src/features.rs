//! # Engenharia de Features
//!
//! Para cada token, extrai um vetor esparso de features que o CRF pontua.
//!
//! ### Token atual
//! - Forma (lowercase), capitalização (`is_capitalized`, `is_all_caps`,
//!   `is_lower_initial`, `is_mixed_case`)
//! - Prefixos e sufixos de 2 a 4 caracteres
//! - Dígitos, hífens, pontos, pontuação isolada
//!
//! ### Contexto (janela de 2 tokens)
//! - Palavras anterior/posterior, capitalização dos vizinhos, bigrama
//!
//! ### Gazetteers
//! - Pertence à lista de pessoas, locais ou organizações do idioma

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::tokenizer::Token;

/// Vetor esparso de features de um token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Features ativas. Ex: `{"is_capitalized": 1.0, "word=smith": 1.0}`.
    pub features: HashMap<String, f64>,
    pub token_index: usize,
}

impl FeatureVector {
    pub fn new(token_index: usize) -> Self {
        Self {
            features: HashMap::new(),
            token_index,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.features.insert(key.into(), value);
    }
}

/// Listas de entidades conhecidas de um idioma (sempre em lowercase)
#[derive(Debug, Clone, Default)]
pub struct Gazetteers {
    pub persons: HashSet<String>,
    pub locations: HashSet<String>,
    pub organizations: HashSet<String>,
}

impl Gazetteers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insere cada palavra de `names` com mais de `min_len` bytes no conjunto.
    pub fn extend_words(set: &mut HashSet<String>, names: &[&str], min_len: usize) {
        for name in names {
            for word in name.split_whitespace() {
                if word.len() > min_len {
                    set.insert(word.to_lowercase());
                }
            }
        }
    }
}

/// Gera vetores de features alinhados com `tokens` (índice `i` ↔ token `i`).
pub fn extract_features(tokens: &[Token], gazetteers: &Gazetteers) -> Vec<FeatureVector> {
    (0..tokens.len())
        .map(|i| extract_for_token(tokens, i, gazetteers))
        .collect()
}

fn starts_upper(word: &str) -> bool {
    word.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
}

/// Extrai features para um único token em seu contexto
pub fn extract_for_token(tokens: &[Token], i: usize, gazetteers: &Gazetteers) -> FeatureVector {
    let mut fv = FeatureVector::new(i);
    let word = &tokens[i].text;
    let lower = word.to_lowercase();

    // === Features da palavra atual ===
    fv.insert(format!("word={lower}"), 1.0);
    fv.insert("bias", 1.0);

    let first_char = word.chars().next();
    let all_upper = word.chars().all(|c| c.is_uppercase() || !c.is_alphabetic());
    let has_upper_in_middle = word.chars().skip(1).any(|c| c.is_uppercase());

    if starts_upper(word) {
        fv.insert("is_capitalized", 1.0);
    }
    if first_char.map(|c| c.is_lowercase()).unwrap_or(false) {
        fv.insert("is_lower_initial", 1.0);
    }
    if all_upper && word.chars().filter(|c| c.is_alphabetic()).count() > 1 {
        fv.insert("is_all_caps", 1.0);
    }
    if has_upper_in_middle {
        fv.insert("is_mixed_case", 1.0);
    }

    let chars: Vec<char> = word.chars().collect();
    for n in 2..=4 {
        if chars.len() >= n {
            let prefix: String = chars[..n].iter().collect();
            let suffix: String = chars[chars.len() - n..].iter().collect();
            fv.insert(format!("prefix{n}={}", prefix.to_lowercase()), 1.0);
            fv.insert(format!("suffix{n}={}", suffix.to_lowercase()), 1.0);
        }
    }

    if word.chars().all(char::is_numeric) {
        fv.insert("is_digit", 1.0);
    } else if word.chars().any(char::is_numeric) {
        fv.insert("has_digit", 1.0);
    }
    if word.contains('-') {
        fv.insert("has_hyphen", 1.0);
    }
    if word.contains('.') {
        fv.insert("has_period", 1.0);
    }
    if chars.len() == 1 && !chars[0].is_alphanumeric() {
        fv.insert("is_punctuation", 1.0);
    }

    if i == tokens.len() - 1 {
        fv.insert("is_last", 1.0);
    }

    // === Features de contexto ===
    if i > 0 {
        let prev = &tokens[i - 1].text;
        fv.insert(format!("prev_word={}", prev.to_lowercase()), 1.0);
        if starts_upper(prev) {
            fv.insert("prev_is_capitalized", 1.0);
        }
        // Início de frase depois de ponto final
        if prev == "." || prev == "!" || prev == "?" {
            fv.insert("BOS", 1.0);
        }
    } else {
        fv.insert("BOS", 1.0);
    }

    if i > 1 {
        fv.insert(format!("prev2_word={}", tokens[i - 2].text.to_lowercase()), 1.0);
    }

    if i + 1 < tokens.len() {
        let next = &tokens[i + 1].text;
        fv.insert(format!("next_word={}", next.to_lowercase()), 1.0);
        if starts_upper(next) {
            fv.insert("next_is_capitalized", 1.0);
        }
    } else {
        fv.insert("EOS", 1.0);
    }

    if i > 0 && i + 1 < tokens.len() {
        fv.insert(
            format!(
                "bigram={}_{}",
                tokens[i - 1].text.to_lowercase(),
                tokens[i + 1].text.to_lowercase()
            ),
            1.0,
        );
    }

    // === Features de Gazetteer ===
    if gazetteers.persons.contains(&lower) {
        fv.insert("in_person_gazetteer", 1.0);
    }
    if gazetteers.locations.contains(&lower) {
        fv.insert("in_location_gazetteer", 1.0);
    }
    if gazetteers.organizations.contains(&lower) {
        fv.insert("in_org_gazetteer", 1.0);
    }

    fv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    #[test]
    fn test_capitalization_features() {
        let tokens = tokenize("Smith met bob");
        let features = extract_features(&tokens, &Gazetteers::default());

        assert_eq!(features[0].features.get("is_capitalized"), Some(&1.0));
        assert!(features[1].features.get("is_capitalized").is_none());
        assert_eq!(features[2].features.get("is_lower_initial"), Some(&1.0));
    }

    #[test]
    fn test_prefix_suffix_features() {
        let tokens = tokenize("Petrobras");
        let features = extract_features(&tokens, &Gazetteers::default());

        assert!(features[0].features.contains_key("prefix2=pe"));
        assert!(features[0].features.contains_key("suffix3=ras"));
    }

    #[test]
    fn test_context_features() {
        let tokens = tokenize("said Mr. Smith today");
        let features = extract_features(&tokens, &Gazetteers::default());

        let smith = &features[2].features;
        assert!(smith.contains_key("prev_word=mr."));
        assert!(smith.contains_key("next_word=today"));
        assert!(smith.contains_key("prev_is_capitalized"));
    }

    #[test]
    fn test_sentence_start_after_period() {
        let tokens = tokenize("Done. Contact us");
        let features = extract_features(&tokens, &Gazetteers::default());
        assert!(features[2].features.contains_key("BOS"));
        assert!(!features[3].features.contains_key("BOS"));
    }

    #[test]
    fn test_gazetteer_feature() {
        let tokens = tokenize("Brasília é bonita");
        let mut gaz = Gazetteers::default();
        Gazetteers::extend_words(&mut gaz.locations, &["Brasília"], 3);

        let features = extract_features(&tokens, &gaz);
        assert_eq!(features[0].features.get("in_location_gazetteer"), Some(&1.0));
    }
}
