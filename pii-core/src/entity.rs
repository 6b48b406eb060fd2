//! # Entidades Detectadas e Conjunto Fundido
//!
//! Tipos de dados que trafegam entre detectores, orquestrador e mascarador.
//!
//! ## Offsets
//!
//! Assim como os [`Token`](crate::tokenizer::Token)s, todas as posições são
//! **offsets de byte** no texto UTF-8 da unidade, no intervalo semiaberto
//! `[start, end)`. Uma entidade nunca guarda o texto original do trecho:
//! apenas tipo, posição, confiança e origem.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RedactionError, Result};

/// Backend que produziu uma detecção.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Regras regex determinísticas.
    Pattern,
    /// Modelo NER estatístico (CRF + Viterbi).
    Statistical,
    /// Reescrita do texto inteiro, sem posições.
    Generative,
}

impl DetectorKind {
    /// Prioridade no desempate da fusão: maior vence.
    ///
    /// `Statistical > Pattern`. O modo generativo nunca participa da fusão.
    pub fn priority(&self) -> u8 {
        match self {
            DetectorKind::Statistical => 2,
            DetectorKind::Pattern => 1,
            DetectorKind::Generative => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::Pattern => "pattern",
            DetectorKind::Statistical => "statistical",
            DetectorKind::Generative => "generative",
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Um trecho de PII encontrado por um detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    /// Categoria da PII (ex: "EMAIL", "PERSON").
    pub entity_type: String,
    /// Byte inicial (inclusivo).
    pub start: usize,
    /// Byte final (exclusivo).
    pub end: usize,
    /// Confiança em `[0, 1]`.
    pub confidence: f64,
    pub source: DetectorKind,
}

impl DetectedEntity {
    pub fn new(
        entity_type: impl Into<String>,
        start: usize,
        end: usize,
        confidence: f64,
        source: DetectorKind,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            start,
            end,
            confidence,
            source,
        }
    }

    /// Tamanho do trecho em bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dois trechos semiabertos se sobrepõem quando compartilham ao menos um byte.
    pub fn overlaps(&self, other: &DetectedEntity) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Verifica `0 <= start < end <= len(text)`, fronteiras de caractere e confiança válida.
    pub fn validate_against(&self, text: &str) -> std::result::Result<(), String> {
        if self.start >= self.end {
            return Err(format!(
                "{} com intervalo vazio ou invertido [{}, {})",
                self.entity_type, self.start, self.end
            ));
        }
        if self.end > text.len() {
            return Err(format!(
                "{} termina em {} mas o texto tem {} bytes",
                self.entity_type,
                self.end,
                text.len()
            ));
        }
        if !text.is_char_boundary(self.start) || !text.is_char_boundary(self.end) {
            return Err(format!(
                "{} [{}, {}) corta um caractere UTF-8",
                self.entity_type, self.start, self.end
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "{} com confiança fora de [0, 1]: {}",
                self.entity_type, self.confidence
            ));
        }
        Ok(())
    }
}

/// Motivo pelo qual um backend não produziu resultado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// O backend não foi construído ou não está carregado.
    Unavailable,
    /// Não há modelo para o idioma pedido.
    UnsupportedLanguage(String),
    /// A inferência excedeu o tempo limite.
    Timeout,
    /// Erro interno (inclusive panic capturado).
    Fault(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unavailable => f.write_str("indisponível"),
            FailureReason::UnsupportedLanguage(lang) => write!(f, "idioma não suportado: {lang}"),
            FailureReason::Timeout => f.write_str("tempo limite excedido"),
            FailureReason::Fault(msg) => write!(f, "falha interna: {msg}"),
        }
    }
}

/// Falha registrada de um backend. Nunca entra no conjunto de entidades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorFailure {
    pub source: DetectorKind,
    pub reason: FailureReason,
}

impl DetectorFailure {
    pub fn new(source: DetectorKind, reason: FailureReason) -> Self {
        Self { source, reason }
    }
}

impl fmt::Display for DetectorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

/// Sequência de entidades ordenada por `start` e sem sobreposição.
///
/// Só pode ser construída pela fusão do orquestrador
/// ([`merge_entities`](crate::orchestrator::merge_entities)) ou por
/// [`MergedEntitySet::from_sorted`], que valida o invariante.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MergedEntitySet(Vec<DetectedEntity>);

impl MergedEntitySet {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Constrói o conjunto a partir de entidades já ordenadas e disjuntas.
    ///
    /// Retorna [`RedactionError::MergeInvariantViolation`] se a ordem ou a
    /// disjunção não forem respeitadas.
    pub fn from_sorted(entities: Vec<DetectedEntity>) -> Result<Self> {
        check_invariant(&entities)?;
        Ok(Self(entities))
    }

    pub fn entities(&self) -> &[DetectedEntity] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DetectedEntity> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a MergedEntitySet {
    type Item = &'a DetectedEntity;
    type IntoIter = std::slice::Iter<'a, DetectedEntity>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Checa `entries[i].end <= entries[i+1].start` para todo `i`.
pub(crate) fn check_invariant(entities: &[DetectedEntity]) -> Result<()> {
    for pair in entities.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if a.end > b.start {
            return Err(RedactionError::MergeInvariantViolation(format!(
                "{} [{}, {}) sobrepõe ou antecede {} [{}, {})",
                a.entity_type, a.start, a.end, b.entity_type, b.start, b.end
            )));
        }
    }
    if let Some(bad) = entities.iter().find(|e| e.start >= e.end) {
        return Err(RedactionError::MergeInvariantViolation(format!(
            "{} com intervalo vazio [{}, {})",
            bad.entity_type, bad.start, bad.end
        )));
    }
    Ok(())
}
