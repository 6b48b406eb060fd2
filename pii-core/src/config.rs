//! # Configuração do Pipeline
//!
//! Configuração de processo, lida uma vez na inicialização e somente leitura
//! depois disso. Todos os campos têm valor padrão, então um JSON vazio (`{}`)
//! já é uma configuração válida.
//!
//! ```rust
//! use pii_core::config::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{ "detector_timeout_ms": 250 }"#).unwrap();
//! assert_eq!(config.default_language, "en");
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RedactionError, Result};

/// Quais backends uma requisição deve usar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub use_statistical: bool,
    pub use_pattern: bool,
    /// Ativa o modo de reescrita integral (exclusivo; ignora os demais).
    pub use_generative: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            use_statistical: true,
            use_pattern: true,
            use_generative: false,
        }
    }
}

impl DetectorConfig {
    /// Apenas o detector de padrões: o modo mais barato e sempre disponível.
    pub fn pattern_only() -> Self {
        Self {
            use_statistical: false,
            use_pattern: true,
            use_generative: false,
        }
    }

    pub fn generative() -> Self {
        Self {
            use_statistical: false,
            use_pattern: false,
            use_generative: true,
        }
    }

    pub fn any_span_detector(&self) -> bool {
        self.use_statistical || self.use_pattern
    }
}

/// Regra regex extra registrada no detector de padrões.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPatternConfig {
    pub entity_type: String,
    pub pattern: String,
}

/// Configuração de processo do pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Idioma usado quando a requisição não traz `language_hint`.
    pub default_language: String,
    /// Tempo limite por chamada de detector (e por reescrita), em milissegundos.
    pub detector_timeout_ms: u64,
    /// Processa unidades em paralelo (rayon).
    pub parallel_units: bool,
    /// Spans estatísticos abaixo deste valor são descartados.
    pub min_statistical_confidence: f64,
    /// `entity_type -> template`. Sobrepõe os tokens padrão `[TIPO]`.
    pub masking_rules: BTreeMap<String, String>,
    /// Restringe as regras embutidas do detector de padrões a estes tipos.
    pub pattern_entity_types: Option<Vec<String>>,
    pub custom_patterns: Vec<CustomPatternConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            detector_timeout_ms: 5_000,
            parallel_units: true,
            min_statistical_confidence: 0.0,
            masking_rules: BTreeMap::new(),
            pattern_entity_types: None,
            custom_patterns: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    /// Rejeita valores que tornariam o pipeline inoperante.
    pub fn validate(&self) -> Result<()> {
        if self.detector_timeout_ms == 0 {
            return Err(RedactionError::InvalidConfig(
                "detector_timeout_ms deve ser maior que zero".into(),
            ));
        }
        if self.default_language.trim().is_empty() {
            return Err(RedactionError::InvalidConfig(
                "default_language não pode ser vazio".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_statistical_confidence) {
            return Err(RedactionError::InvalidConfig(format!(
                "min_statistical_confidence fora de [0, 1]: {}",
                self.min_statistical_confidence
            )));
        }
        if let Some(bad) = self.custom_patterns.iter().find(|p| p.entity_type.trim().is_empty()) {
            return Err(RedactionError::InvalidConfig(format!(
                "padrão customizado sem entity_type: {}",
                bad.pattern
            )));
        }
        Ok(())
    }
}
