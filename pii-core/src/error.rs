//! # Taxonomia de Erros
//!
//! Todos os erros fatais do pipeline passam por [`RedactionError`]. Falhas de
//! backend de detecção **não** aparecem aqui: elas viram
//! [`DetectorFailure`](crate::entity::DetectorFailure) e são absorvidas pelo
//! orquestrador, a menos que todos os detectores configurados falhem.
//!
//! | Variante                   | Origem                               | Efeito                 |
//! |----------------------------|--------------------------------------|------------------------|
//! | `Extraction`               | colaborador externo de extração      | aborta a requisição    |
//! | `MergeInvariantViolation`  | bug na fusão de entidades            | aborta a requisição    |
//! | `Masking`                  | offsets fora do texto da unidade     | aborta a unidade       |
//! | `Anonymization`            | todos os detectores falharam         | aborta a requisição    |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::DetectorFailure;

/// Resultado padrão das operações do crate.
pub type Result<T> = std::result::Result<T, RedactionError>;

/// Erros que interrompem uma requisição de anonimização.
#[derive(Error, Debug)]
pub enum RedactionError {
    /// Entrada malformada ou formato não suportado, vindo da extração externa.
    #[error("erro de extração: {0}")]
    Extraction(String),

    /// A fusão produziu entidades sobrepostas ou fora de ordem.
    #[error("invariante de fusão violada: {0}")]
    MergeInvariantViolation(String),

    /// Offsets de entidade incompatíveis com o texto da unidade.
    #[error("erro de mascaramento na unidade {unit_id}: {reason}")]
    Masking { unit_id: String, reason: String },

    /// Todos os detectores configurados falharam para a unidade.
    #[error("anonimização impossível na unidade {unit_id}: todos os detectores falharam ({})", summarize(.failures))]
    Anonymization {
        unit_id: String,
        failures: Vec<DetectorFailure>,
    },

    /// Configuração inválida (timeout zero, nenhum detector habilitado...).
    #[error("configuração inválida: {0}")]
    InvalidConfig(String),

    /// Expressão regular inválida.
    #[error("padrão inválido: {0}")]
    Pattern(#[from] regex::Error),

    /// A requisição foi cancelada pelo chamador.
    #[error("requisição cancelada")]
    Aborted,

    #[error("erro de json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("erro de io: {0}")]
    Io(#[from] std::io::Error),
}

/// Categoria serializável de um [`RedactionError`], usada nas respostas estruturadas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ExtractionError,
    MergeInvariantViolation,
    MaskingError,
    AnonymizationError,
    InvalidConfig,
    PatternError,
    Aborted,
    IoError,
}

impl RedactionError {
    /// Categoria do erro para a falha estruturada `{kind, message}`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RedactionError::Extraction(_) => ErrorKind::ExtractionError,
            RedactionError::MergeInvariantViolation(_) => ErrorKind::MergeInvariantViolation,
            RedactionError::Masking { .. } => ErrorKind::MaskingError,
            RedactionError::Anonymization { .. } => ErrorKind::AnonymizationError,
            RedactionError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            RedactionError::Pattern(_) => ErrorKind::PatternError,
            RedactionError::Aborted => ErrorKind::Aborted,
            // JSON malformado chega pela borda de extração
            RedactionError::Json(_) => ErrorKind::ExtractionError,
            RedactionError::Io(_) => ErrorKind::IoError,
        }
    }

    pub(crate) fn masking(unit_id: &str, reason: impl Into<String>) -> Self {
        RedactionError::Masking {
            unit_id: unit_id.to_string(),
            reason: reason.into(),
        }
    }
}

fn summarize(failures: &[DetectorFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
