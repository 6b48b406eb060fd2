//! Cenários de ponta a ponta do pipeline com detectores roteirizados.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pii_core::detector::{DetectionOutcome, PatternDetector, StatisticalDetector};
use pii_core::document::{Page, Paragraph};
use pii_core::{
    AbortHandle, Anonymizer, DetectedEntity, DetectorConfig, DetectorKind, Detectors, ErrorKind,
    FailureReason, FormatKind, OutputDocument, PipelineConfig, PipelineEvent, RedactionRequest,
    RedactionResponse, RunControl, SourceDocument, SpanDetector, Stage, TextRewriter,
};

const E2E_TEXT: &str = "John Smith lives at 123 Main St, contact john@example.com";
const E2E_MASKED: &str = "[PERSON] lives at [ADDRESS], contact [EMAIL]";

// =====================================================================
// Detectores roteirizados
// =====================================================================

/// Devolve sempre as mesmas entidades.
struct Scripted {
    kind: DetectorKind,
    entities: Vec<DetectedEntity>,
}

impl SpanDetector for Scripted {
    fn kind(&self) -> DetectorKind {
        self.kind
    }
    fn detect(&self, _text: &str, _hint: Option<&str>) -> DetectionOutcome {
        DetectionOutcome::found(self.entities.clone())
    }
}

/// Sempre falha com o motivo dado.
struct Failing(DetectorKind, FailureReason);

impl SpanDetector for Failing {
    fn kind(&self) -> DetectorKind {
        self.0
    }
    fn detect(&self, _text: &str, _hint: Option<&str>) -> DetectionOutcome {
        DetectionOutcome::failed(self.0, self.1.clone())
    }
}

/// Demora `delay` antes de responder.
struct Slow {
    kind: DetectorKind,
    delay: Duration,
}

impl SpanDetector for Slow {
    fn kind(&self) -> DetectorKind {
        self.kind
    }
    fn detect(&self, _text: &str, _hint: Option<&str>) -> DetectionOutcome {
        thread::sleep(self.delay);
        DetectionOutcome::found(vec![DetectedEntity::new("LATE", 0, 1, 1.0, self.kind)])
    }
}

struct Panicking;

impl SpanDetector for Panicking {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Statistical
    }
    fn detect(&self, _text: &str, _hint: Option<&str>) -> DetectionOutcome {
        panic!("pesos corrompidos")
    }
}

/// Dispara o cancelamento da requisição enquanto detecta.
struct AbortsDuringDetect(AbortHandle);

impl SpanDetector for AbortsDuringDetect {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Statistical
    }
    fn detect(&self, _text: &str, _hint: Option<&str>) -> DetectionOutcome {
        self.0.abort();
        DetectionOutcome::found(vec![])
    }
}

struct SlowRewriter(Duration);

impl TextRewriter for SlowRewriter {
    fn name(&self) -> &str {
        "slow"
    }
    fn rewrite(&self, text: &str, _hint: Option<&str>) -> Result<String, FailureReason> {
        thread::sleep(self.0);
        Ok(text.to_uppercase())
    }
}

// =====================================================================
// Helpers
// =====================================================================

fn span(text: &str, needle: &str, entity_type: &str, confidence: f64, kind: DetectorKind) -> DetectedEntity {
    let start = text.find(needle).expect("trecho presente no texto");
    DetectedEntity::new(entity_type, start, start + needle.len(), confidence, kind)
}

fn config(timeout_ms: u64) -> PipelineConfig {
    PipelineConfig {
        detector_timeout_ms: timeout_ms,
        ..PipelineConfig::default()
    }
}

fn pipeline_with(detectors: Detectors, timeout_ms: u64) -> Anonymizer {
    Anonymizer::new(config(timeout_ms), detectors).unwrap()
}

fn plain_request(text: &str) -> RedactionRequest {
    RedactionRequest::new(FormatKind::PlainText, DetectorConfig::default()).with_unit("u0", text)
}

fn masked_text(response: &RedactionResponse) -> &str {
    response.unit_texts()[0].1
}

fn stages(events: &[PipelineEvent]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::StageEntered { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

// =====================================================================
// Ponta a ponta
// =====================================================================

#[test]
fn test_end_to_end_with_scripted_statistical() {
    let statistical = Scripted {
        kind: DetectorKind::Statistical,
        entities: vec![
            span(E2E_TEXT, "John Smith", "PERSON", 0.85, DetectorKind::Statistical),
            span(E2E_TEXT, "Main St", "LOCATION", 0.6, DetectorKind::Statistical),
        ],
    };
    let detectors = Detectors::empty()
        .with_pattern(PatternDetector::new())
        .with_statistical(statistical);
    let pipeline = pipeline_with(detectors, 2_000);

    let response = pipeline.redact(&plain_request(E2E_TEXT)).unwrap();
    assert_eq!(masked_text(&response), E2E_MASKED);
    assert!(response.degraded_backends().is_empty());
}

#[test]
fn test_end_to_end_with_builtin_models() {
    let pipeline = Anonymizer::from_config(PipelineConfig::default()).unwrap();
    let response = pipeline.redact(&plain_request(E2E_TEXT)).unwrap();
    assert_eq!(masked_text(&response), E2E_MASKED);
}

#[test]
fn test_detect_reports_end_to_end_offsets() {
    let pipeline = Anonymizer::from_config(PipelineConfig::default()).unwrap();
    let response = pipeline.detect(&plain_request(E2E_TEXT)).unwrap();

    let spans: Vec<(&str, usize, usize)> = response.units[0]
        .entities
        .iter()
        .map(|e| (e.entity_type.as_str(), e.start, e.end))
        .collect();
    assert_eq!(
        spans,
        vec![("PERSON", 0, 10), ("ADDRESS", 20, 31), ("EMAIL", 41, 57)]
    );
    assert!(response.diagnostics.degraded_backends.is_empty());
}

#[test]
fn test_masking_keeps_line_breaks() {
    let pipeline = Anonymizer::from_config(PipelineConfig::default()).unwrap();
    for text in ["Regards,\nMary\nJohnson and co", "São Paulo\r\nRio"] {
        let response = pipeline.redact(&plain_request(text)).unwrap();
        let masked = masked_text(&response);
        assert_eq!(masked.matches('\n').count(), text.matches('\n').count(), "{masked}");
    }
}

#[test]
fn test_statistical_finds_person_in_builtin_model() {
    let detector = StatisticalDetector::builtin();
    let outcome = detector.detect(E2E_TEXT, Some("en"));
    let person = outcome
        .entities
        .iter()
        .find(|e| e.entity_type == "PERSON")
        .expect("PERSON esperado");
    assert_eq!(&E2E_TEXT[person.start..person.end], "John Smith");
}

#[test]
fn test_portuguese_request() {
    let pipeline = Anonymizer::from_config(PipelineConfig::default()).unwrap();
    let text = "O presidente Lula informou o CPF 529.982.247-25 em Brasília.";
    let request = plain_request(text).with_language("pt");
    let response = pipeline.redact(&request).unwrap();
    let masked = masked_text(&response);

    assert!(masked.contains("[CPF]"), "{masked}");
    assert!(masked.contains("[PERSON]"), "{masked}");
    assert!(!masked.contains("529.982.247-25"));
    assert!(!masked.contains("Lula"));
}

// =====================================================================
// Fusão
// =====================================================================

#[test]
fn test_tie_break_pattern_beats_weaker_statistical() {
    let text = "Delivery address: 12 Longbridge Avenue, nothing else";
    let detectors = Detectors::empty()
        .with_pattern(Scripted {
            kind: DetectorKind::Pattern,
            entities: vec![DetectedEntity::new("ADDRESS", 18, 38, 1.0, DetectorKind::Pattern)],
        })
        .with_statistical(Scripted {
            kind: DetectorKind::Statistical,
            entities: vec![DetectedEntity::new("LOCATION", 18, 30, 0.6, DetectorKind::Statistical)],
        });
    let pipeline = pipeline_with(detectors, 2_000);

    let response = pipeline.redact(&plain_request(text)).unwrap();
    assert_eq!(masked_text(&response), "Delivery address: [ADDRESS], nothing else");
}

#[test]
fn test_statistical_wins_full_tie() {
    let text = "Acme sent it";
    let detectors = Detectors::empty()
        .with_pattern(Scripted {
            kind: DetectorKind::Pattern,
            entities: vec![DetectedEntity::new("BRAND", 0, 4, 0.9, DetectorKind::Pattern)],
        })
        .with_statistical(Scripted {
            kind: DetectorKind::Statistical,
            entities: vec![DetectedEntity::new("ORGANIZATION", 0, 4, 0.9, DetectorKind::Statistical)],
        });
    let pipeline = pipeline_with(detectors, 2_000);

    let response = pipeline.redact(&plain_request(text)).unwrap();
    assert_eq!(masked_text(&response), "[ORGANIZATION] sent it");
}

// =====================================================================
// Degradação e falhas
// =====================================================================

#[test]
fn test_degrades_when_statistical_fails() {
    let detectors = Detectors::empty()
        .with_pattern(PatternDetector::new())
        .with_statistical(Failing(
            DetectorKind::Statistical,
            FailureReason::Fault("modelo não carregado".into()),
        ));
    let pipeline = pipeline_with(detectors, 2_000);

    let response = pipeline
        .redact(&plain_request("Call 555-1234 or mail a@b.io"))
        .unwrap();
    assert_eq!(masked_text(&response), "Call [PHONE] or mail [EMAIL]");
    assert_eq!(response.degraded_backends(), &[DetectorKind::Statistical]);
}

#[test]
fn test_missing_backend_is_degraded_not_fatal() {
    let pipeline = pipeline_with(Detectors::empty().with_pattern(PatternDetector::new()), 2_000);
    let response = pipeline.redact(&plain_request("mail a@b.io")).unwrap();
    assert_eq!(masked_text(&response), "mail [EMAIL]");
    assert_eq!(response.degraded_backends(), &[DetectorKind::Statistical]);
}

#[test]
fn test_all_detectors_failed_commits_nothing() {
    let detectors = Detectors::empty()
        .with_pattern(Failing(DetectorKind::Pattern, FailureReason::Unavailable))
        .with_statistical(Failing(DetectorKind::Statistical, FailureReason::Timeout));
    let pipeline = pipeline_with(detectors, 2_000);

    let document = SourceDocument::Paragraph {
        paragraphs: vec![
            Paragraph { text: "primeiro".into(), style: None },
            Paragraph { text: "segundo".into(), style: None },
        ],
    };
    let (tx, rx) = mpsc::channel();
    let failure = pipeline
        .rewrite_document_with(document, &DetectorConfig::default(), None, &RunControl::with_events(tx))
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::AnonymizationError);
    assert_eq!(failure.stage, Stage::Detecting);

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    assert!(!stages(&events).contains(&Stage::Committing));
    assert!(matches!(events.last(), Some(PipelineEvent::Failed { kind: ErrorKind::AnonymizationError, .. })));
}

#[test]
fn test_slow_detector_times_out() {
    let detectors = Detectors::empty()
        .with_pattern(PatternDetector::new())
        .with_statistical(Slow {
            kind: DetectorKind::Statistical,
            delay: Duration::from_millis(800),
        });
    let pipeline = pipeline_with(detectors, 50);

    let (tx, rx) = mpsc::channel();
    let response = pipeline
        .redact_with(&plain_request("mail a@b.io"), &RunControl::with_events(tx))
        .unwrap();

    // O resultado tardio ("LATE") não pode aparecer
    assert_eq!(masked_text(&response), "mail [EMAIL]");
    assert_eq!(response.degraded_backends(), &[DetectorKind::Statistical]);
    let timed_out = rx.try_iter().any(|e| {
        matches!(e, PipelineEvent::BackendDegraded { failure, .. } if failure.reason == FailureReason::Timeout)
    });
    assert!(timed_out);
}

#[test]
fn test_panicking_detector_is_isolated() {
    let detectors = Detectors::empty()
        .with_pattern(PatternDetector::new())
        .with_statistical(Panicking);
    let pipeline = pipeline_with(detectors, 2_000);

    let response = pipeline.redact(&plain_request("ip 10.0.0.1")).unwrap();
    assert_eq!(masked_text(&response), "ip [IP_ADDRESS]");
    assert_eq!(response.degraded_backends(), &[DetectorKind::Statistical]);
}

#[test]
fn test_abort_discards_results() {
    let abort = AbortHandle::new();
    let detectors = Detectors::empty()
        .with_pattern(PatternDetector::new())
        .with_statistical(AbortsDuringDetect(abort.clone()));
    let pipeline = pipeline_with(detectors, 2_000);

    let (tx, rx) = mpsc::channel();
    let control = RunControl::with_events(tx).with_abort(abort);
    let failure = pipeline
        .redact_with(&plain_request("mail a@b.io"), &control)
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Aborted);
    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    assert!(!events.iter().any(|e| matches!(e, PipelineEvent::Done { .. })));
    assert!(!stages(&events).contains(&Stage::Masking));
}

// =====================================================================
// Estrutura de documentos
// =====================================================================

#[test]
fn test_paragraph_round_trip_preserves_count_and_order() {
    let pipeline = pipeline_with(Detectors::empty().with_pattern(PatternDetector::new()), 2_000);
    let document = SourceDocument::Paragraph {
        paragraphs: vec![
            Paragraph { text: "Relatório".into(), style: Some("Title".into()) },
            Paragraph { text: "Contato: ana@example.com".into(), style: None },
            Paragraph { text: "Telefone 555-1234".into(), style: None },
        ],
    };

    let output = pipeline
        .rewrite_document(document, &DetectorConfig::pattern_only(), None)
        .unwrap();
    let OutputDocument::Paragraph { paragraphs } = output else {
        panic!("formato de saída errado");
    };
    let texts: Vec<&str> = paragraphs.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, vec!["Relatório", "Contato: [EMAIL]", "Telefone [PHONE]"]);
    assert_eq!(paragraphs[0].style.as_deref(), Some("Title"));
}

#[test]
fn test_page_document_keeps_dimensions() {
    let pipeline = pipeline_with(Detectors::empty().with_pattern(PatternDetector::new()), 2_000);
    let document = SourceDocument::Page {
        pages: vec![
            Page { width: 612.0, height: 792.0, text: "SSN 123-45-6789".into() },
            Page { width: 595.0, height: 842.0, text: "sem dados".into() },
        ],
    };

    let output = pipeline
        .rewrite_document(document, &DetectorConfig::pattern_only(), None)
        .unwrap();
    let OutputDocument::Page { pages } = output else {
        panic!("formato de saída errado");
    };
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].text, "SSN [US_SSN]");
    assert_eq!((pages[1].width, pages[1].height), (595.0, 842.0));
    assert_eq!((pages[0].anchor.x, pages[0].anchor.y), (72.0, 72.0));
}

#[test]
fn test_many_units_in_parallel_keep_order() {
    let pipeline = pipeline_with(Detectors::empty().with_pattern(PatternDetector::new()), 2_000);
    assert!(pipeline.config().parallel_units);

    let mut request = RedactionRequest::new(FormatKind::Paragraph, DetectorConfig::pattern_only());
    for i in 0..32 {
        request = request.with_unit(format!("p{i}"), format!("user{i}@example.com"));
    }
    let response = pipeline.redact(&request).unwrap();
    let ids: Vec<&str> = response.unit_texts().iter().map(|(id, _)| *id).collect();
    let expected: Vec<String> = (0..32).map(|i| format!("p{i}")).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(response.unit_texts().iter().all(|(_, text)| *text == "[EMAIL]"));
}

// =====================================================================
// Determinismo e concorrência
// =====================================================================

#[test]
fn test_masking_is_deterministic() {
    let pipeline = Anonymizer::from_config(PipelineConfig::default()).unwrap();
    let request = plain_request(E2E_TEXT);
    let first = pipeline.redact(&request).unwrap();
    for _ in 0..5 {
        assert_eq!(pipeline.redact(&request).unwrap(), first);
    }
}

#[test]
fn test_concurrent_requests_share_models() {
    let pipeline = Arc::new(Anonymizer::from_config(PipelineConfig::default()).unwrap());
    let expected = pipeline.redact(&plain_request(E2E_TEXT)).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.redact(&plain_request(E2E_TEXT)).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_concurrent_inference_on_one_detector() {
    let detector = Arc::new(StatisticalDetector::builtin());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let detector = Arc::clone(&detector);
            thread::spawn(move || detector.detect(E2E_TEXT, None))
        })
        .collect();
    let outcomes: Vec<DetectionOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outcomes.windows(2).all(|w| w[0] == w[1]));
}

// =====================================================================
// Modo generativo
// =====================================================================

#[test]
fn test_generative_mode_rewrites_whole_unit() {
    let pipeline = Anonymizer::from_config(PipelineConfig::default()).unwrap();
    let config = DetectorConfig {
        use_statistical: true,
        use_pattern: true,
        use_generative: true,
    };
    let request = RedactionRequest::new(FormatKind::PlainText, config)
        .with_unit("u0", "John Smith wrote to John Smith.");
    let response = pipeline.redact(&request).unwrap();

    match &response {
        RedactionResponse::Rewritten { units, .. } => {
            let text = &units[0].rewritten_text;
            assert!(text.starts_with("[ANONYMIZED] wrote to"), "{text}");
            assert!(!text.contains("John") && !text.contains("Smith"), "{text}");
        }
        other => panic!("resposta inesperada: {other:?}"),
    }
    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("diagnostics").is_none());
}

#[test]
fn test_generative_timeout_is_anonymization_error() {
    let detectors = Detectors::empty().with_rewriter(SlowRewriter(Duration::from_millis(800)));
    let pipeline = pipeline_with(detectors, 50);
    let request = RedactionRequest::new(FormatKind::PlainText, DetectorConfig::generative())
        .with_unit("u0", "texto");

    let failure = pipeline.redact(&request).unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::AnonymizationError);
    assert!(failure.to_string().contains("generative"));
}
