//! # Reescrita Generativa
//!
//! Modo alternativo do pipeline: em vez de trechos com offsets, o backend
//! devolve o texto inteiro já anonimizado. Não há posições, logo nada a fundir
//! nem mascarar; o texto reescrito vai direto para a unidade.
//!
//! O backend embutido, [`LexicalRewriter`], roda o modelo NER do idioma e
//! troca **toda** ocorrência de cada forma superficial encontrada por
//! `[ANONYMIZED]`, respeitando fronteiras de palavra (UAX #29). Se "Smith" for
//! reconhecido uma vez, "Smith" some do texto inteiro, mas "Smithson" fica.
//! Backends seq2seq externos entram pela mesma trait.

use std::collections::BTreeSet;

use unicode_segmentation::UnicodeSegmentation;

use crate::entity::FailureReason;
use crate::model::ModelRegistry;

/// Marcador usado pela reescrita embutida.
pub const ANONYMIZED_TOKEN: &str = "[ANONYMIZED]";

/// Backend de reescrita integral do texto.
pub trait TextRewriter: Send + Sync {
    /// Nome do backend para logs e diagnósticos.
    fn name(&self) -> &str;

    fn rewrite(&self, text: &str, language_hint: Option<&str>) -> Result<String, FailureReason>;
}

#[derive(Debug, Clone)]
pub struct LexicalRewriter {
    models: ModelRegistry,
    default_language: String,
}

impl LexicalRewriter {
    pub fn new(models: ModelRegistry, default_language: &str) -> Self {
        Self {
            models,
            default_language: default_language.to_string(),
        }
    }
}

impl TextRewriter for LexicalRewriter {
    fn name(&self) -> &str {
        "lexical"
    }

    fn rewrite(&self, text: &str, language_hint: Option<&str>) -> Result<String, FailureReason> {
        if self.models.is_empty() {
            return Err(FailureReason::Unavailable);
        }
        let language = language_hint.unwrap_or(self.default_language.as_str());
        let model = self
            .models
            .get(language)
            .ok_or_else(|| FailureReason::UnsupportedLanguage(language.to_string()))?;

        let surfaces: BTreeSet<&str> = model
            .predict(text)
            .iter()
            .filter_map(|e| text.get(e.start..e.end))
            .collect();

        Ok(replace_surface_forms(text, &surfaces, ANONYMIZED_TOKEN))
    }
}

/// Substitui toda ocorrência delimitada por fronteiras de palavra de cada forma.
///
/// Ocorrências sobrepostas de formas diferentes: fica a que começa antes e,
/// em empate, a mais longa.
pub fn replace_surface_forms(text: &str, surfaces: &BTreeSet<&str>, replacement: &str) -> String {
    let boundaries: BTreeSet<usize> = text
        .split_word_bound_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut hits: Vec<(usize, usize)> = surfaces
        .iter()
        .filter(|s| !s.is_empty())
        .flat_map(|surface| {
            text.match_indices(surface)
                .map(|(start, m)| (start, start + m.len()))
                .collect::<Vec<_>>()
        })
        .filter(|(start, end)| boundaries.contains(start) && boundaries.contains(end))
        .collect();
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in hits {
        if start < cursor {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(replacement);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}
