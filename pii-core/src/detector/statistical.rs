//! # Detector Estatístico
//!
//! Envolve os [`NerModel`](crate::model::NerModel)s por idioma atrás da
//! interface [`SpanDetector`]. O idioma vem da dica da requisição ou, na
//! falta dela, do idioma padrão configurado.

use tracing::debug;

use super::{DetectionOutcome, SpanDetector};
use crate::entity::{DetectorKind, FailureReason};
use crate::model::ModelRegistry;

#[derive(Debug, Clone)]
pub struct StatisticalDetector {
    models: ModelRegistry,
    default_language: String,
    /// Spans com confiança abaixo deste valor são descartados.
    min_confidence: f64,
}

impl StatisticalDetector {
    pub fn new(models: ModelRegistry, default_language: &str, min_confidence: f64) -> Self {
        Self {
            models,
            default_language: default_language.to_string(),
            min_confidence,
        }
    }

    /// Modelos embutidos, inglês como padrão, sem corte de confiança.
    pub fn builtin() -> Self {
        Self::new(ModelRegistry::builtin(), "en", 0.0)
    }

    pub fn languages(&self) -> Vec<&str> {
        self.models.languages()
    }
}

impl SpanDetector for StatisticalDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Statistical
    }

    fn detect(&self, text: &str, language_hint: Option<&str>) -> DetectionOutcome {
        if self.models.is_empty() {
            return DetectionOutcome::failed(DetectorKind::Statistical, FailureReason::Unavailable);
        }

        let language = language_hint.unwrap_or(self.default_language.as_str());
        let Some(model) = self.models.get(language) else {
            return DetectionOutcome::failed(
                DetectorKind::Statistical,
                FailureReason::UnsupportedLanguage(language.to_string()),
            );
        };

        let mut entities = model.predict(text);
        let before = entities.len();
        entities.retain(|e| e.confidence >= self.min_confidence);
        debug!(
            language = %model.language,
            kept = entities.len(),
            dropped = before - entities.len(),
            "detecção estatística concluída"
        );

        DetectionOutcome::found(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_person_with_default_language() {
        let detector = StatisticalDetector::builtin();
        let text = "John Smith lives at 123 Main St";
        let outcome = detector.detect(text, None);

        assert!(!outcome.is_failure());
        let person = outcome
            .entities
            .iter()
            .find(|e| e.entity_type == "PERSON")
            .expect("PERSON esperado");
        assert_eq!(&text[person.start..person.end], "John Smith");
        assert_eq!(person.source, DetectorKind::Statistical);
    }

    #[test]
    fn test_language_hint_selects_model() {
        let detector = StatisticalDetector::builtin();
        let outcome = detector.detect("O presidente Lula visitou Brasília.", Some("pt-BR"));
        assert!(outcome.entities.iter().any(|e| e.entity_type == "LOCATION"));
    }

    #[test]
    fn test_unsupported_language_is_failure() {
        let detector = StatisticalDetector::builtin();
        let outcome = detector.detect("Hallo Welt", Some("de"));
        let failure = outcome.failure.expect("falha esperada");
        assert_eq!(failure.reason, FailureReason::UnsupportedLanguage("de".into()));
    }

    #[test]
    fn test_empty_registry_is_unavailable() {
        let detector = StatisticalDetector::new(ModelRegistry::new(), "en", 0.0);
        let outcome = detector.detect("John Smith", None);
        assert_eq!(outcome.failure.map(|f| f.reason), Some(FailureReason::Unavailable));
    }

    #[test]
    fn test_min_confidence_filters_spans() {
        let strict = StatisticalDetector::new(ModelRegistry::builtin(), "en", 1.0);
        let outcome = strict.detect("John Smith lives in London", None);
        assert!(outcome.entities.iter().all(|e| e.confidence >= 1.0));
    }
}
