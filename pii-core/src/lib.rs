//! # pii-core — Detecção e Mascaramento de PII com Preservação de Offsets
//!
//! Este crate implementa o núcleo de um serviço de anonimização de documentos:
//! vários detectores independentes analisam o texto extraído, seus achados são
//! reconciliados num conjunto sem sobreposição e cada trecho é trocado por um
//! token de máscara sem corromper a estrutura do documento.
//!
//! ## Arquitetura do Sistema
//!
//! O dado flui por um pipeline linear, unidade por unidade:
//!
//! 1.  **Entrada**: documento já extraído ([`document`]), dividido em unidades
//!     (texto inteiro, parágrafos ou páginas).
//! 2.  **Detecção** ([`detector`]):
//!     *   **Padrões** ([`detector::pattern`]): regras regex (e-mail, telefone, CPF...).
//!     *   **Estatístico** ([`detector::statistical`]): CRF + Viterbi sobre
//!         [`tokenizer`], [`features`] e [`tagger`], com um [`model`] por idioma.
//!     *   **Generativo** ([`detector::generative`]): reescrita integral, modo à parte.
//! 3.  **Fusão** ([`orchestrator`]): falhas isoladas por backend, trechos fundidos
//!     por confiança, tamanho e prioridade.
//! 4.  **Mascaramento** ([`masker`]): substituição da direita para a esquerda.
//! 5.  **Saída**: commit de cada unidade e montagem do documento ([`pipeline`]).
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use pii_core::{Anonymizer, DetectorConfig, FormatKind, PipelineConfig, RedactionRequest};
//!
//! // 1. Instancia o pipeline (carrega modelos e regras uma única vez)
//! let anonymizer = Anonymizer::from_config(PipelineConfig::default()).unwrap();
//!
//! // 2. Requisição com uma unidade de texto
//! let request = RedactionRequest::new(FormatKind::PlainText, DetectorConfig::pattern_only())
//!     .with_unit("u0", "Contato: maria@example.com");
//!
//! // 3. Executa e lê o texto mascarado
//! let response = anonymizer.redact(&request).unwrap();
//! assert_eq!(response.unit_texts()[0].1, "Contato: [EMAIL]");
//! ```

pub mod config;
pub mod crf;
pub mod detector;
pub mod document;
pub mod entity;
pub mod error;
pub mod features;
pub mod masker;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod tagger;
pub mod tokenizer;
pub mod viterbi;

pub use config::{DetectorConfig, PipelineConfig};
pub use detector::{Detectors, SpanDetector, TextRewriter};
pub use document::{FormatKind, OutputDocument, SourceDocument, StructuralAdapter, TextUnit};
pub use entity::{DetectedEntity, DetectorFailure, DetectorKind, FailureReason, MergedEntitySet};
pub use error::{ErrorKind, RedactionError, Result};
pub use masker::{mask_with_pattern, AnonymizationResult, MaskingRules};
pub use orchestrator::{merge_entities, DetectionReport, Orchestrator};
pub use pipeline::{
    AbortHandle, Anonymizer, DetectedUnit, DetectionResponse, PipelineEvent, RedactionRequest,
    RedactionResponse, RequestFailure, RunControl, Stage,
};
