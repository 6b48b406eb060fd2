//! # Orquestrador de Detecção
//!
//! Executa os detectores configurados sobre o texto de uma unidade, isola a
//! falha de cada backend e funde os trechos sobreviventes num único
//! [`MergedEntitySet`] sem sobreposição.
//!
//! ## Execução
//!
//! Cada detector roda na sua própria thread e devolve o resultado por um
//! canal `mpsc`. O orquestrador espera até o prazo (`início + timeout`); quem
//! não respondeu vira `DetectorFailure{Timeout}` e o resultado tardio é
//! descartado quando chegar. Um panic dentro do detector é capturado e vira
//! `DetectorFailure{Fault}`.
//!
//! ## Fusão
//!
//! Ordena por `start` e percorre da esquerda para a direita. Ao sobrepor a
//! última entidade aceita:
//!
//! 1. maior confiança vence;
//! 2. empate → trecho mais longo vence;
//! 3. empate → prioridade do backend (`Statistical > Pattern`);
//! 4. empate total → a entidade já aceita permanece.
//!
//! A perdedora é descartada inteira.

use std::cmp::Ordering;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::detector::{DetectionOutcome, Detectors, SpanDetector};
use crate::entity::{
    DetectedEntity, DetectorFailure, DetectorKind, FailureReason, MergedEntitySet,
};
use crate::error::{RedactionError, Result};

/// Backends de trechos na ordem em que são disparados.
const SPAN_BACKENDS: [DetectorKind; 2] = [DetectorKind::Statistical, DetectorKind::Pattern];

/// Falhas de backend registradas durante um `run`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub failures: Vec<DetectorFailure>,
}

impl DetectionReport {
    pub fn degraded_backends(&self) -> Vec<DetectorKind> {
        let mut kinds: Vec<DetectorKind> = self.failures.iter().map(|f| f.source).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Executa detectores de trechos com prazo e isolamento de falhas.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    detectors: Detectors,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(detectors: Detectors, timeout: Duration) -> Self {
        Self { detectors, timeout }
    }

    pub fn detectors(&self) -> &Detectors {
        &self.detectors
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Roda os detectores habilitados em `config` e funde os resultados.
    ///
    /// Retorna [`RedactionError::Anonymization`] se todos os detectores
    /// habilitados falharem, e [`RedactionError::InvalidConfig`] se nenhum
    /// detector de trechos estiver habilitado.
    pub fn run(
        &self,
        unit_id: &str,
        text: &str,
        config: &DetectorConfig,
        language_hint: Option<&str>,
    ) -> Result<(MergedEntitySet, DetectionReport)> {
        let requested: Vec<DetectorKind> = SPAN_BACKENDS
            .into_iter()
            .filter(|kind| match kind {
                DetectorKind::Statistical => config.use_statistical,
                DetectorKind::Pattern => config.use_pattern,
                DetectorKind::Generative => false,
            })
            .collect();

        if requested.is_empty() {
            return Err(RedactionError::InvalidConfig(
                "nenhum detector de trechos habilitado".into(),
            ));
        }

        let outcomes = self.collect_outcomes(&requested, text, language_hint);

        let mut report = DetectionReport::default();
        let mut pooled = Vec::new();
        for (_, outcome) in outcomes {
            match outcome.failure {
                Some(failure) => {
                    warn!(unit = unit_id, backend = %failure.source, reason = %failure.reason, "detector degradado");
                    report.failures.push(failure);
                }
                None => pooled.extend(validated(unit_id, text, outcome.entities)),
            }
        }

        if report.failures.len() == requested.len() {
            return Err(RedactionError::Anonymization {
                unit_id: unit_id.to_string(),
                failures: report.failures,
            });
        }

        let merged = merge_entities(pooled)?;
        debug!(unit = unit_id, entities = merged.len(), "fusão concluída");
        Ok((merged, report))
    }

    /// Dispara um worker por backend e recolhe os resultados até o prazo.
    fn collect_outcomes(
        &self,
        requested: &[DetectorKind],
        text: &str,
        language_hint: Option<&str>,
    ) -> Vec<(DetectorKind, DetectionOutcome)> {
        let (tx, rx) = mpsc::channel::<(DetectorKind, DetectionOutcome)>();
        let mut pending: Vec<DetectorKind> = Vec::new();
        let mut outcomes: Vec<(DetectorKind, DetectionOutcome)> = Vec::new();

        for &kind in requested {
            let Some(detector) = self.detectors.span_detector(kind) else {
                outcomes.push((kind, DetectionOutcome::failed(kind, FailureReason::Unavailable)));
                continue;
            };
            let detector: Arc<dyn SpanDetector> = Arc::clone(detector);
            let text = text.to_string();
            let hint = language_hint.map(str::to_string);
            let tx = tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("pii-{kind}"))
                .spawn(move || {
                    let outcome = guarded(kind, || detector.detect(&text, hint.as_deref()));
                    // O receptor pode já ter desistido (timeout)
                    let _ = tx.send((kind, outcome));
                });

            match spawned {
                Ok(_) => pending.push(kind),
                Err(e) => outcomes.push((
                    kind,
                    DetectionOutcome::failed(
                        kind,
                        FailureReason::Fault(format!("falha ao criar thread: {e}")),
                    ),
                )),
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.timeout;
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((kind, outcome)) => {
                    pending.retain(|k| *k != kind);
                    outcomes.push((kind, outcome));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        // Quem não respondeu a tempo
        for kind in pending {
            outcomes.push((kind, DetectionOutcome::failed(kind, FailureReason::Timeout)));
        }

        // Ordem de chegada não pode influenciar o resultado
        outcomes.sort_by_key(|(kind, _)| *kind);
        outcomes
    }
}

/// Executa `f` capturando panics como `DetectorFailure{Fault}`.
pub(crate) fn guarded<F>(kind: DetectorKind, f: F) -> DetectionOutcome
where
    F: FnOnce() -> DetectionOutcome,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => DetectionOutcome::failed(kind, FailureReason::Fault(panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

/// Descarta entidades com offsets inválidos para o texto da unidade.
fn validated(unit_id: &str, text: &str, entities: Vec<DetectedEntity>) -> Vec<DetectedEntity> {
    entities
        .into_iter()
        .filter(|e| match e.validate_against(text) {
            Ok(()) => true,
            Err(reason) => {
                warn!(unit = unit_id, backend = %e.source, %reason, "entidade descartada");
                false
            }
        })
        .collect()
}

/// `Greater` quando `candidate` deve substituir `incumbent`.
fn compare_claims(candidate: &DetectedEntity, incumbent: &DetectedEntity) -> Ordering {
    candidate
        .confidence
        .total_cmp(&incumbent.confidence)
        .then(candidate.len().cmp(&incumbent.len()))
        .then(candidate.source.priority().cmp(&incumbent.source.priority()))
}

/// Funde entidades possivelmente sobrepostas num conjunto ordenado e disjunto.
pub fn merge_entities(mut entities: Vec<DetectedEntity>) -> Result<MergedEntitySet> {
    entities.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(b.end.cmp(&a.end))
            .then(b.source.priority().cmp(&a.source.priority()))
    });

    let mut accepted: Vec<DetectedEntity> = Vec::with_capacity(entities.len());
    for candidate in entities {
        match accepted.last_mut() {
            Some(last) if last.overlaps(&candidate) => {
                if compare_claims(&candidate, last) == Ordering::Greater {
                    *last = candidate;
                }
            }
            _ => accepted.push(candidate),
        }
    }

    // Reconfere ordem e disjunção antes de entregar
    MergedEntitySet::from_sorted(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ent(t: &str, start: usize, end: usize, conf: f64, source: DetectorKind) -> DetectedEntity {
        DetectedEntity::new(t, start, end, conf, source)
    }

    struct Fixed(DetectorKind, Vec<DetectedEntity>);

    impl SpanDetector for Fixed {
        fn kind(&self) -> DetectorKind {
            self.0
        }
        fn detect(&self, _text: &str, _hint: Option<&str>) -> DetectionOutcome {
            DetectionOutcome::found(self.1.clone())
        }
    }

    struct Panics;

    impl SpanDetector for Panics {
        fn kind(&self) -> DetectorKind {
            DetectorKind::Statistical
        }
        fn detect(&self, _text: &str, _hint: Option<&str>) -> DetectionOutcome {
            panic!("modelo corrompido")
        }
    }

    #[test]
    fn test_merge_higher_confidence_wins() {
        let merged = merge_entities(vec![
            ent("ADDRESS", 20, 32, 1.0, DetectorKind::Pattern),
            ent("LOCATION", 20, 30, 0.6, DetectorKind::Statistical),
        ])
        .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.entities()[0].entity_type, "ADDRESS");
    }

    #[test]
    fn test_merge_longer_span_on_equal_confidence() {
        let merged = merge_entities(vec![
            ent("PHONE", 0, 14, 1.0, DetectorKind::Pattern),
            ent("CREDIT_CARD", 0, 19, 1.0, DetectorKind::Pattern),
        ])
        .unwrap();
        assert_eq!(merged.entities()[0].entity_type, "CREDIT_CARD");
    }

    #[test]
    fn test_merge_priority_on_full_tie() {
        let merged = merge_entities(vec![
            ent("ORG_ID", 5, 10, 0.9, DetectorKind::Pattern),
            ent("ORGANIZATION", 5, 10, 0.9, DetectorKind::Statistical),
        ])
        .unwrap();
        assert_eq!(merged.entities()[0].source, DetectorKind::Statistical);
    }

    #[test]
    fn test_merge_output_sorted_and_disjoint() {
        let merged = merge_entities(vec![
            ent("C", 30, 35, 0.5, DetectorKind::Statistical),
            ent("A", 0, 4, 1.0, DetectorKind::Pattern),
            ent("B", 2, 8, 0.7, DetectorKind::Statistical),
            ent("D", 10, 12, 1.0, DetectorKind::Pattern),
        ])
        .unwrap();
        let spans: Vec<(usize, usize)> = merged.iter().map(|e| (e.start, e.end)).collect();
        assert_eq!(spans, vec![(0, 4), (10, 12), (30, 35)]);
    }

    #[test]
    fn test_merge_loser_does_not_block_next() {
        // B perde para A; C começa onde A termina e entra
        let merged = merge_entities(vec![
            ent("A", 0, 5, 1.0, DetectorKind::Pattern),
            ent("C", 5, 8, 0.3, DetectorKind::Statistical),
            ent("B", 4, 9, 0.9, DetectorKind::Statistical),
        ])
        .unwrap();
        let types: Vec<&str> = merged.iter().map(|e| e.entity_type.as_str()).collect();
        assert_eq!(types, vec!["A", "C"]);
    }

    #[test]
    fn test_run_records_failure_and_keeps_survivor() {
        let detectors = Detectors::empty()
            .with_pattern(Fixed(DetectorKind::Pattern, vec![ent("EMAIL", 0, 3, 1.0, DetectorKind::Pattern)]))
            .with_statistical(Panics);
        let orchestrator = Orchestrator::new(detectors, Duration::from_secs(2));

        let (merged, report) = orchestrator
            .run("u0", "a@b mais texto", &DetectorConfig::default(), None)
            .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(report.degraded_backends(), vec![DetectorKind::Statistical]);
        assert!(matches!(report.failures[0].reason, FailureReason::Fault(_)));
    }

    #[test]
    fn test_run_all_failed() {
        let orchestrator = Orchestrator::new(Detectors::empty(), Duration::from_secs(1));
        let err = orchestrator
            .run("u0", "texto", &DetectorConfig::default(), None)
            .unwrap_err();
        match err {
            RedactionError::Anonymization { failures, .. } => assert_eq!(failures.len(), 2),
            other => panic!("erro inesperado: {other}"),
        }
    }

    #[test]
    fn test_run_requires_a_span_detector() {
        let orchestrator = Orchestrator::new(Detectors::empty(), Duration::from_secs(1));
        let err = orchestrator
            .run("u0", "texto", &DetectorConfig::generative(), None)
            .unwrap_err();
        assert!(matches!(err, RedactionError::InvalidConfig(_)));
    }

    #[test]
    fn test_out_of_range_entities_are_dropped() {
        let detectors = Detectors::empty()
            .with_pattern(Fixed(DetectorKind::Pattern, vec![ent("EMAIL", 0, 99, 1.0, DetectorKind::Pattern)]));
        let orchestrator = Orchestrator::new(detectors, Duration::from_secs(1));
        let (merged, _) = orchestrator
            .run("u0", "curto", &DetectorConfig::pattern_only(), None)
            .unwrap();
        assert!(merged.is_empty());
    }
}
