//! # Pipeline de Anonimização — Reescritor de Documentos com Eventos Observáveis
//!
//! Coordena orquestrador, mascarador e adaptadores estruturais para uma
//! requisição inteira, emitindo um [`PipelineEvent`] a cada transição de
//! estágio por um canal `mpsc`.
//!
//! ## Máquina de estados por requisição
//!
//! ```text
//! Received → Extracting → por unidade { Detecting → Merging → Masking }
//!          → Committing → Assembling → Done
//!
//! Failed é alcançável de qualquer estágio.
//! ```
//!
//! As unidades são independentes e podem ser processadas em paralelo
//! (`rayon`). Qualquer falha numa unidade aborta o documento inteiro: o
//! commit só acontece depois que **todas** as unidades foram mascaradas, então
//! uma falha nunca deixa saída parcial.
//!
//! ## Modo generativo
//!
//! Com `use_generative`, cada unidade é reescrita por inteiro pelo
//! [`TextRewriter`](crate::detector::TextRewriter). Os detectores de trechos
//! não rodam nesse modo e a resposta não traz diagnósticos de fusão.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{DetectorConfig, PipelineConfig};
use crate::detector::{Detectors, TextRewriter};
use crate::document::{FormatKind, OutputDocument, SourceDocument, TextUnit};
use crate::entity::{DetectorFailure, DetectorKind, FailureReason, MergedEntitySet};
use crate::error::{ErrorKind, RedactionError};
use crate::masker::{self, AnonymizationResult, MaskingRules};
use crate::orchestrator::{panic_message, DetectionReport, Orchestrator};

/// Estágio da requisição.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Extracting,
    Detecting,
    Merging,
    Masking,
    Committing,
    Assembling,
    Done,
    Failed,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Extracting => "extracting",
            Stage::Detecting => "detecting",
            Stage::Merging => "merging",
            Stage::Masking => "masking",
            Stage::Committing => "committing",
            Stage::Assembling => "assembling",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Eventos emitidos durante o processamento de uma requisição.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// Entrada num estágio; `unit_id` presente nos estágios por unidade.
    StageEntered {
        stage: Stage,
        unit_id: Option<String>,
    },
    /// Um backend falhou nesta unidade e foi descartado.
    BackendDegraded {
        unit_id: String,
        failure: DetectorFailure,
    },
    /// Unidade mascarada (ou reescrita), ainda sem commit.
    UnitProcessed {
        unit_id: String,
        replacements: usize,
    },
    /// **Conclusão**: todas as unidades com commit e saída montada.
    Done {
        units: usize,
        degraded_backends: Vec<DetectorKind>,
        processing_ms: u64,
    },
    /// **Falha**: a requisição foi abortada no estágio indicado.
    Failed {
        stage: Stage,
        kind: ErrorKind,
        message: String,
    },
}

/// Cancelamento cooperativo de uma requisição.
///
/// Chamadas de detector em andamento terminam, mas seus resultados são
/// descartados e a requisição falha com [`RedactionError::Aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Erro fatal de uma requisição, com o estágio onde ocorreu.
#[derive(Debug, Error)]
#[error("falha em {stage}: {error}")]
pub struct RequestFailure {
    pub stage: Stage,
    #[source]
    pub error: RedactionError,
}

impl RequestFailure {
    pub fn new(stage: Stage, error: RedactionError) -> Self {
        Self { stage, error }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Forma estruturada `{kind, stage, message}`.
    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            stage: self.stage,
            message: self.error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
}

/// Unidade de texto na requisição.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInput {
    pub id: String,
    pub raw_text: String,
}

/// Requisição de anonimização sobre unidades já extraídas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionRequest {
    pub text_units: Vec<UnitInput>,
    pub format_kind: FormatKind,
    #[serde(default)]
    pub detector_config: DetectorConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub masking_rules: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_hint: Option<String>,
}

impl RedactionRequest {
    pub fn new(format_kind: FormatKind, detector_config: DetectorConfig) -> Self {
        Self {
            text_units: Vec::new(),
            format_kind,
            detector_config,
            masking_rules: None,
            language_hint: None,
        }
    }

    pub fn with_unit(mut self, id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        self.text_units.push(UnitInput {
            id: id.into(),
            raw_text: raw_text.into(),
        });
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language_hint = Some(language.into());
        self
    }

    pub fn with_masking_rule(mut self, entity_type: &str, template: &str) -> Self {
        self.masking_rules
            .get_or_insert_with(BTreeMap::new)
            .insert(entity_type.to_string(), template.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedUnit {
    pub id: String,
    pub masked_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewrittenUnit {
    pub id: String,
    pub rewritten_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub degraded_backends: Vec<DetectorKind>,
}

/// Entidades fundidas de uma unidade, sem mascaramento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedUnit {
    pub id: String,
    pub entities: MergedEntitySet,
}

/// Resposta de [`Anonymizer::detect`]: offsets no texto original de cada unidade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub format_kind: FormatKind,
    pub units: Vec<DetectedUnit>,
    pub diagnostics: Diagnostics,
}

/// Resposta de sucesso. A forma depende do modo (trechos ou reescrita).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RedactionResponse {
    Masked {
        format_kind: FormatKind,
        units: Vec<MaskedUnit>,
        diagnostics: Diagnostics,
    },
    Rewritten {
        format_kind: FormatKind,
        units: Vec<RewrittenUnit>,
    },
}

impl RedactionResponse {
    pub fn format_kind(&self) -> FormatKind {
        match self {
            RedactionResponse::Masked { format_kind, .. }
            | RedactionResponse::Rewritten { format_kind, .. } => *format_kind,
        }
    }

    /// `(id, texto final)` de cada unidade, na ordem da requisição.
    pub fn unit_texts(&self) -> Vec<(&str, &str)> {
        match self {
            RedactionResponse::Masked { units, .. } => units
                .iter()
                .map(|u| (u.id.as_str(), u.masked_text.as_str()))
                .collect(),
            RedactionResponse::Rewritten { units, .. } => units
                .iter()
                .map(|u| (u.id.as_str(), u.rewritten_text.as_str()))
                .collect(),
        }
    }

    pub fn degraded_backends(&self) -> &[DetectorKind] {
        match self {
            RedactionResponse::Masked { diagnostics, .. } => &diagnostics.degraded_backends,
            RedactionResponse::Rewritten { .. } => &[],
        }
    }
}

/// Controle de uma execução: cancelamento e canal de eventos opcional.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub abort: AbortHandle,
    pub events: Option<mpsc::Sender<PipelineEvent>>,
}

impl RunControl {
    pub fn with_events(events: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            abort: AbortHandle::new(),
            events: Some(events),
        }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }
}

/// Canal de eventos compartilhável entre as threads do rayon.
struct EventSink(Option<Mutex<mpsc::Sender<PipelineEvent>>>);

impl EventSink {
    fn new(events: Option<mpsc::Sender<PipelineEvent>>) -> Self {
        Self(events.map(Mutex::new))
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.0 {
            if let Ok(tx) = tx.lock() {
                // O receptor pode ter sido descartado
                let _ = tx.send(event);
            }
        }
    }

    fn stage(&self, stage: Stage, unit_id: Option<&str>) {
        self.emit(PipelineEvent::StageEntered {
            stage,
            unit_id: unit_id.map(str::to_string),
        });
    }
}

/// Saída de uma unidade antes do commit.
#[derive(Debug)]
enum UnitOutput {
    Masked {
        result: AnonymizationResult,
        report: DetectionReport,
    },
    Rewritten {
        unit_id: String,
        text: String,
    },
}

impl UnitOutput {
    fn unit_id(&self) -> &str {
        match self {
            UnitOutput::Masked { result, .. } => &result.unit_id,
            UnitOutput::Rewritten { unit_id, .. } => unit_id,
        }
    }

    fn text(&self) -> &str {
        match self {
            UnitOutput::Masked { result, .. } => &result.masked_text,
            UnitOutput::Rewritten { text, .. } => text,
        }
    }
}

/// Parâmetros por requisição, já resolvidos.
struct RequestPlan<'a> {
    detector_config: &'a DetectorConfig,
    rules: MaskingRules,
    language_hint: Option<&'a str>,
    generative: bool,
}

/// O pipeline de anonimização.
///
/// Construído uma vez na inicialização com os detectores injetados; depois
/// disso só é lido, então pode atender requisições concorrentes.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    orchestrator: Orchestrator,
    rules: MaskingRules,
    config: PipelineConfig,
}

impl Anonymizer {
    /// Valida a configuração e monta o pipeline com os `detectors` dados.
    pub fn new(config: PipelineConfig, detectors: Detectors) -> Result<Self, RedactionError> {
        config.validate()?;
        let rules = MaskingRules::from_config(&config);
        let orchestrator = Orchestrator::new(detectors, config.detector_timeout());
        Ok(Self {
            orchestrator,
            rules,
            config,
        })
    }

    /// Pipeline com os backends embutidos.
    pub fn from_config(config: PipelineConfig) -> Result<Self, RedactionError> {
        let detectors = Detectors::from_config(&config)?;
        Self::new(config, detectors)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processa uma requisição do contrato externo de forma síncrona.
    pub fn redact(&self, request: &RedactionRequest) -> Result<RedactionResponse, RequestFailure> {
        self.redact_with(request, &RunControl::default())
    }

    /// Como [`Anonymizer::redact`], com cancelamento e eventos.
    pub fn redact_with(
        &self,
        request: &RedactionRequest,
        control: &RunControl,
    ) -> Result<RedactionResponse, RequestFailure> {
        let sink = EventSink::new(control.events.clone());
        let start = Instant::now();
        sink.stage(Stage::Received, None);

        let result = self.redact_inner(request, control, &sink, start);
        if let Err(failure) = &result {
            report_failure(&sink, failure);
        }
        result
    }

    fn redact_inner(
        &self,
        request: &RedactionRequest,
        control: &RunControl,
        sink: &EventSink,
        start: Instant,
    ) -> Result<RedactionResponse, RequestFailure> {
        // === Passo 1: Extração (as unidades já chegam extraídas) ===
        sink.stage(Stage::Extracting, None);
        let units = units_from_request(request)
            .map_err(|e| RequestFailure::new(Stage::Extracting, e))?;

        let plan = self.plan(&request.detector_config, request.masking_rules.as_ref(), request.language_hint.as_deref());

        // === Passo 2: Detecção, fusão e mascaramento por unidade ===
        let outputs = self.process_units(&units, &plan, &control.abort, sink)?;

        // === Passo 3: Commit ===
        sink.stage(Stage::Committing, None);
        let degraded = degraded_backends(&outputs);

        // === Passo 4: Montagem da resposta ===
        sink.stage(Stage::Assembling, None);
        let response = if plan.generative {
            RedactionResponse::Rewritten {
                format_kind: request.format_kind,
                units: outputs
                    .iter()
                    .map(|o| RewrittenUnit {
                        id: o.unit_id().to_string(),
                        rewritten_text: o.text().to_string(),
                    })
                    .collect(),
            }
        } else {
            RedactionResponse::Masked {
                format_kind: request.format_kind,
                units: outputs
                    .iter()
                    .map(|o| MaskedUnit {
                        id: o.unit_id().to_string(),
                        masked_text: o.text().to_string(),
                    })
                    .collect(),
                diagnostics: Diagnostics {
                    degraded_backends: degraded.clone(),
                },
            }
        };

        finish(sink, outputs.len(), degraded, start);
        Ok(response)
    }

    /// Só detecção: roda os detectores de trechos e a fusão em cada unidade e
    /// devolve as entidades, sem mascarar nada.
    ///
    /// Estágios: `Received → Extracting → {Detecting → Merging} → Assembling → Done`.
    /// `use_generative` não tem efeito aqui, já que a reescrita não produz offsets.
    pub fn detect(&self, request: &RedactionRequest) -> Result<DetectionResponse, RequestFailure> {
        self.detect_with(request, &RunControl::default())
    }

    pub fn detect_with(
        &self,
        request: &RedactionRequest,
        control: &RunControl,
    ) -> Result<DetectionResponse, RequestFailure> {
        let sink = EventSink::new(control.events.clone());
        let start = Instant::now();
        sink.stage(Stage::Received, None);

        let result = self.detect_inner(request, control, &sink, start);
        if let Err(failure) = &result {
            report_failure(&sink, failure);
        }
        result
    }

    fn detect_inner(
        &self,
        request: &RedactionRequest,
        control: &RunControl,
        sink: &EventSink,
        start: Instant,
    ) -> Result<DetectionResponse, RequestFailure> {
        sink.stage(Stage::Extracting, None);
        let units = units_from_request(request)
            .map_err(|e| RequestFailure::new(Stage::Extracting, e))?;

        let detector_config = DetectorConfig {
            use_generative: false,
            ..request.detector_config
        };
        let hint = request.language_hint.as_deref();
        let detected = self.for_each_unit(&units, &control.abort, |unit| {
            let (merged, report) = self.detect_unit(unit, &detector_config, hint, &control.abort, sink)?;
            Ok((unit.id.clone(), merged, report))
        })?;

        sink.stage(Stage::Assembling, None);
        let degraded = merge_degraded(detected.iter().map(|(_, _, report)| report));
        let response = DetectionResponse {
            format_kind: request.format_kind,
            units: detected
                .into_iter()
                .map(|(id, entities, _)| DetectedUnit { id, entities })
                .collect(),
            diagnostics: Diagnostics {
                degraded_backends: degraded.clone(),
            },
        };

        finish(sink, response.units.len(), degraded, start);
        Ok(response)
    }

    /// Anonimiza um documento estruturado e monta a saída no mesmo formato.
    pub fn rewrite_document(
        &self,
        document: SourceDocument,
        detector_config: &DetectorConfig,
        language_hint: Option<&str>,
    ) -> Result<OutputDocument, RequestFailure> {
        self.rewrite_document_with(document, detector_config, language_hint, &RunControl::default())
    }

    pub fn rewrite_document_with(
        &self,
        document: SourceDocument,
        detector_config: &DetectorConfig,
        language_hint: Option<&str>,
        control: &RunControl,
    ) -> Result<OutputDocument, RequestFailure> {
        let sink = EventSink::new(control.events.clone());
        let start = Instant::now();
        sink.stage(Stage::Received, None);

        let result =
            self.rewrite_document_inner(document, detector_config, language_hint, control, &sink, start);
        if let Err(failure) = &result {
            report_failure(&sink, failure);
        }
        result
    }

    fn rewrite_document_inner(
        &self,
        document: SourceDocument,
        detector_config: &DetectorConfig,
        language_hint: Option<&str>,
        control: &RunControl,
        sink: &EventSink,
        start: Instant,
    ) -> Result<OutputDocument, RequestFailure> {
        sink.stage(Stage::Extracting, None);
        let mut adapter = document.into_adapter();
        let units = adapter.enumerate_units();
        debug!(format = ?adapter.format_kind(), units = units.len(), "documento enumerado");

        let plan = self.plan(detector_config, None, language_hint);
        let outputs = self.process_units(&units, &plan, &control.abort, sink)?;

        // Só chega aqui se todas as unidades deram certo
        sink.stage(Stage::Committing, None);
        for output in &outputs {
            adapter
                .commit(output.unit_id(), output.text().to_string())
                .map_err(|e| RequestFailure::new(Stage::Committing, e))?;
        }

        sink.stage(Stage::Assembling, None);
        let document = adapter
            .assemble()
            .map_err(|e| RequestFailure::new(Stage::Assembling, e))?;

        finish(sink, outputs.len(), degraded_backends(&outputs), start);
        Ok(document)
    }

    fn plan<'a>(
        &self,
        detector_config: &'a DetectorConfig,
        overrides: Option<&BTreeMap<String, String>>,
        language_hint: Option<&'a str>,
    ) -> RequestPlan<'a> {
        let mut rules = self.rules.clone();
        if let Some(overrides) = overrides {
            rules.extend(overrides);
        }
        if detector_config.use_generative && detector_config.any_span_detector() {
            warn!("modo generativo ativo: detectores de trechos ignorados");
        }
        RequestPlan {
            detector_config,
            rules,
            language_hint,
            generative: detector_config.use_generative,
        }
    }

    fn process_units(
        &self,
        units: &[TextUnit],
        plan: &RequestPlan<'_>,
        abort: &AbortHandle,
        sink: &EventSink,
    ) -> Result<Vec<UnitOutput>, RequestFailure> {
        self.for_each_unit(units, abort, |unit| self.process_unit(unit, plan, abort, sink))
    }

    /// Aplica `f` a todas as unidades, em ordem; a primeira falha aborta o lote.
    fn for_each_unit<T, F>(&self, units: &[TextUnit], abort: &AbortHandle, f: F) -> Result<Vec<T>, RequestFailure>
    where
        T: Send,
        F: Fn(&TextUnit) -> Result<T, RequestFailure> + Sync,
    {
        let outputs = if self.config.parallel_units && units.len() > 1 {
            units.par_iter().map(&f).collect::<Result<Vec<_>, _>>()?
        } else {
            units.iter().map(&f).collect::<Result<Vec<_>, _>>()?
        };

        // Resultados já calculados são descartados
        if abort.is_aborted() {
            return Err(RequestFailure::new(Stage::Committing, RedactionError::Aborted));
        }
        Ok(outputs)
    }

    fn process_unit(
        &self,
        unit: &TextUnit,
        plan: &RequestPlan<'_>,
        abort: &AbortHandle,
        sink: &EventSink,
    ) -> Result<UnitOutput, RequestFailure> {
        let unit_id = unit.id.as_str();
        if abort.is_aborted() {
            return Err(RequestFailure::new(Stage::Detecting, RedactionError::Aborted));
        }

        sink.stage(Stage::Detecting, Some(unit_id));
        debug!(unit = unit_id, bytes = unit.raw_text.len(), "detectando");

        if plan.generative {
            let text = self.rewrite_unit(unit, plan.language_hint)?;
            if abort.is_aborted() {
                return Err(RequestFailure::new(Stage::Detecting, RedactionError::Aborted));
            }
            sink.emit(PipelineEvent::UnitProcessed {
                unit_id: unit_id.to_string(),
                replacements: 0,
            });
            return Ok(UnitOutput::Rewritten {
                unit_id: unit_id.to_string(),
                text,
            });
        }

        let (merged, report) =
            self.run_detectors(unit, plan.detector_config, plan.language_hint, abort, sink)?;

        sink.stage(Stage::Masking, Some(unit_id));
        let result = masker::apply(unit_id, &unit.raw_text, &merged, &plan.rules)
            .map_err(|e| RequestFailure::new(Stage::Masking, e))?;

        sink.emit(PipelineEvent::UnitProcessed {
            unit_id: unit_id.to_string(),
            replacements: result.applied_entities.len(),
        });
        Ok(UnitOutput::Masked { result, report })
    }

    /// Entra em `Detecting` e roda os detectores de trechos de uma unidade.
    fn detect_unit(
        &self,
        unit: &TextUnit,
        detector_config: &DetectorConfig,
        language_hint: Option<&str>,
        abort: &AbortHandle,
        sink: &EventSink,
    ) -> Result<(MergedEntitySet, DetectionReport), RequestFailure> {
        if abort.is_aborted() {
            return Err(RequestFailure::new(Stage::Detecting, RedactionError::Aborted));
        }
        sink.stage(Stage::Detecting, Some(unit.id.as_str()));
        debug!(unit = unit.id.as_str(), bytes = unit.raw_text.len(), "detectando");
        self.run_detectors(unit, detector_config, language_hint, abort, sink)
    }

    /// Orquestrador + fusão, com eventos de degradação e checagem de cancelamento.
    fn run_detectors(
        &self,
        unit: &TextUnit,
        detector_config: &DetectorConfig,
        language_hint: Option<&str>,
        abort: &AbortHandle,
        sink: &EventSink,
    ) -> Result<(MergedEntitySet, DetectionReport), RequestFailure> {
        let unit_id = unit.id.as_str();
        let (merged, report) = self
            .orchestrator
            .run(unit_id, &unit.raw_text, detector_config, language_hint)
            .map_err(|e| {
                let stage = match e {
                    RedactionError::MergeInvariantViolation(_) => Stage::Merging,
                    _ => Stage::Detecting,
                };
                RequestFailure::new(stage, e)
            })?;

        if abort.is_aborted() {
            return Err(RequestFailure::new(Stage::Detecting, RedactionError::Aborted));
        }

        for failure in &report.failures {
            sink.emit(PipelineEvent::BackendDegraded {
                unit_id: unit_id.to_string(),
                failure: failure.clone(),
            });
        }
        sink.stage(Stage::Merging, Some(unit_id));
        Ok((merged, report))
    }

    /// Reescrita integral com o mesmo prazo e isolamento dos detectores.
    fn rewrite_unit(&self, unit: &TextUnit, language_hint: Option<&str>) -> Result<String, RequestFailure> {
        let anonymization = |reason: FailureReason| {
            RequestFailure::new(
                Stage::Detecting,
                RedactionError::Anonymization {
                    unit_id: unit.id.clone(),
                    failures: vec![DetectorFailure::new(DetectorKind::Generative, reason)],
                },
            )
        };

        let Some(rewriter) = self.orchestrator.detectors().rewriter.as_ref() else {
            return Err(anonymization(FailureReason::Unavailable));
        };
        let rewriter: Arc<dyn TextRewriter> = Arc::clone(rewriter);
        let text = unit.raw_text.clone();
        let hint = language_hint.map(str::to_string);
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("pii-generative".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| rewriter.rewrite(&text, hint.as_deref())))
                    .unwrap_or_else(|payload| Err(FailureReason::Fault(panic_message(&*payload))));
                let _ = tx.send(result);
            })
            .map_err(|e| anonymization(FailureReason::Fault(format!("falha ao criar thread: {e}"))))?;

        match rx.recv_timeout(self.orchestrator.timeout()) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(reason)) => Err(anonymization(reason)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(anonymization(FailureReason::Timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(anonymization(FailureReason::Fault(
                "reescrita encerrada sem resultado".into(),
            ))),
        }
    }
}

/// Converte as unidades da requisição, rejeitando ids repetidos.
fn units_from_request(request: &RedactionRequest) -> Result<Vec<TextUnit>, RedactionError> {
    let mut seen = HashSet::new();
    request
        .text_units
        .iter()
        .map(|u| {
            if !seen.insert(u.id.as_str()) {
                return Err(RedactionError::Extraction(format!("id de unidade repetido: {}", u.id)));
            }
            Ok(TextUnit::new(u.id.as_str(), u.raw_text.as_str(), request.format_kind))
        })
        .collect()
}

fn degraded_backends(outputs: &[UnitOutput]) -> Vec<DetectorKind> {
    merge_degraded(outputs.iter().filter_map(|o| match o {
        UnitOutput::Masked { report, .. } => Some(report),
        UnitOutput::Rewritten { .. } => None,
    }))
}

/// União ordenada dos backends degradados em todas as unidades.
fn merge_degraded<'a>(reports: impl Iterator<Item = &'a DetectionReport>) -> Vec<DetectorKind> {
    reports
        .flat_map(DetectionReport::degraded_backends)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn finish(sink: &EventSink, units: usize, degraded: Vec<DetectorKind>, start: Instant) {
    let processing_ms = start.elapsed().as_millis() as u64;
    info!(units, degraded = ?degraded, processing_ms, "requisição concluída");
    sink.stage(Stage::Done, None);
    sink.emit(PipelineEvent::Done {
        units,
        degraded_backends: degraded,
        processing_ms,
    });
}

fn report_failure(sink: &EventSink, failure: &RequestFailure) {
    warn!(stage = %failure.stage, kind = ?failure.kind(), error = %failure.error, "requisição falhou");
    sink.emit(PipelineEvent::Failed {
        stage: failure.stage,
        kind: failure.kind(),
        message: failure.error.to_string(),
    });
}
