//! # Detectores de PII
//!
//! Três backends independentes, com semânticas de saída diferentes:
//!
//! | Backend                                   | Saída                       | Confiança          |
//! |-------------------------------------------|-----------------------------|--------------------|
//! | [`PatternDetector`](pattern::PatternDetector)         | trechos (offsets de byte)  | sempre 1.0         |
//! | [`StatisticalDetector`](statistical::StatisticalDetector) | trechos (offsets de byte)  | softmax do Viterbi |
//! | [`TextRewriter`](generative::TextRewriter)            | texto inteiro reescrito     | n/a                |
//!
//! Os dois primeiros implementam [`SpanDetector`] e têm seus resultados
//! fundidos pelo orquestrador. A reescrita generativa é um modo à parte do
//! pipeline e nunca entra na fusão.
//!
//! Um detector nunca deixa escapar um erro interno: toda falha vira um
//! [`DetectorFailure`] dentro do [`DetectionOutcome`].

pub mod generative;
pub mod pattern;
pub mod statistical;

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::entity::{DetectedEntity, DetectorFailure, DetectorKind, FailureReason};
use crate::error::Result;
use crate::model::ModelRegistry;

pub use generative::{LexicalRewriter, TextRewriter, ANONYMIZED_TOKEN};
pub use pattern::PatternDetector;
pub use statistical::StatisticalDetector;

/// Backend que devolve trechos endereçáveis do texto.
///
/// Implementações são compartilhadas entre threads e precisam tolerar
/// chamadas concorrentes: `detect` recebe `&self` e não pode alterar estado.
pub trait SpanDetector: Send + Sync {
    fn kind(&self) -> DetectorKind;

    /// Detecta PII em `text`. Não modifica a entrada.
    fn detect(&self, text: &str, language_hint: Option<&str>) -> DetectionOutcome;
}

/// Resultado de uma chamada de detector: entidades ou falha, nunca os dois.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub entities: Vec<DetectedEntity>,
    pub failure: Option<DetectorFailure>,
}

impl DetectionOutcome {
    pub fn found(entities: Vec<DetectedEntity>) -> Self {
        Self {
            entities,
            failure: None,
        }
    }

    pub fn failed(source: DetectorKind, reason: FailureReason) -> Self {
        Self {
            entities: Vec::new(),
            failure: Some(DetectorFailure::new(source, reason)),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Backends construídos na inicialização e injetados no pipeline.
///
/// Um campo `None` significa backend não carregado: pedi-lo numa requisição
/// resulta em `DetectorFailure{Unavailable}`.
#[derive(Clone, Default)]
pub struct Detectors {
    pub pattern: Option<Arc<dyn SpanDetector>>,
    pub statistical: Option<Arc<dyn SpanDetector>>,
    pub rewriter: Option<Arc<dyn TextRewriter>>,
}

impl Detectors {
    /// Nenhum backend carregado.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Constrói os backends embutidos a partir da configuração de processo.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let models = ModelRegistry::builtin();
        let pattern = PatternDetector::from_config(config)?;
        let statistical = StatisticalDetector::new(
            models.clone(),
            &config.default_language,
            config.min_statistical_confidence,
        );
        let rewriter = LexicalRewriter::new(models, &config.default_language);

        Ok(Self {
            pattern: Some(Arc::new(pattern)),
            statistical: Some(Arc::new(statistical)),
            rewriter: Some(Arc::new(rewriter)),
        })
    }

    pub fn with_pattern(mut self, detector: impl SpanDetector + 'static) -> Self {
        self.pattern = Some(Arc::new(detector));
        self
    }

    pub fn with_statistical(mut self, detector: impl SpanDetector + 'static) -> Self {
        self.statistical = Some(Arc::new(detector));
        self
    }

    pub fn with_rewriter(mut self, rewriter: impl TextRewriter + 'static) -> Self {
        self.rewriter = Some(Arc::new(rewriter));
        self
    }

    /// Backend de trechos para `kind`, se carregado.
    pub fn span_detector(&self, kind: DetectorKind) -> Option<&Arc<dyn SpanDetector>> {
        match kind {
            DetectorKind::Pattern => self.pattern.as_ref(),
            DetectorKind::Statistical => self.statistical.as_ref(),
            DetectorKind::Generative => None,
        }
    }
}

impl std::fmt::Debug for Detectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detectors")
            .field("pattern", &self.pattern.is_some())
            .field("statistical", &self.statistical.is_some())
            .field("rewriter", &self.rewriter.as_ref().map(|r| r.name().to_string()))
            .finish()
    }
}

// Os modelos são compartilhados entre threads de detecção.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<PatternDetector>();
    assert_send_sync::<StatisticalDetector>();
    assert_send_sync::<LexicalRewriter>();
    assert_send_sync::<Detectors>();
};
