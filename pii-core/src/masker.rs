//! # Mascarador
//!
//! Substitui cada entidade do [`MergedEntitySet`] por um token de máscara.
//!
//! As substituições são feitas **da direita para a esquerda** (`start`
//! decrescente): trocar um trecho só desloca o que vem depois dele, então os
//! offsets das entidades ainda não aplicadas continuam válidos.
//!
//! ```text
//! "John Smith lives at 123 Main St"
//!                      [20.......31)  → "[ADDRESS]"   (primeiro)
//!  [0......10)                        → "[PERSON]"    (depois)
//! ```
//!
//! O log de auditoria ([`AppliedEntity`]) guarda tipo, posição, origem,
//! confiança e o token usado, nunca o texto original.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::detector::pattern::builtin_entity_types;
use crate::entity::{DetectorKind, MergedEntitySet};
use crate::error::{RedactionError, Result};
use crate::tagger::PiiCategory;

/// Token para tipos sem regra nem padrão conhecido.
pub const FALLBACK_TOKEN: &str = "[REDACTED]";

/// Substituição padrão de [`mask_with_pattern`].
pub const DEFAULT_PATTERN_REPLACEMENT: &str = "***";

/// Placeholder aceito nos templates de máscara.
const TYPE_PLACEHOLDER: &str = "{entity_type}";

/// Tabela `entity_type -> template`, somente leitura depois de construída.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskingRules {
    templates: BTreeMap<String, String>,
}

impl MaskingRules {
    /// `[TIPO]` para todos os tipos que os detectores embutidos emitem.
    pub fn new() -> Self {
        let templates = builtin_entity_types()
            .into_iter()
            .chain(PiiCategory::ALL.iter().map(|c| c.entity_type()))
            .map(|t| (t.to_string(), default_template(t)))
            .collect();
        Self { templates }
    }

    /// Regras padrão + tipos dos padrões customizados + sobreposições da configuração.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut rules = Self::new();
        for custom in &config.custom_patterns {
            rules
                .templates
                .entry(custom.entity_type.clone())
                .or_insert_with(|| default_template(&custom.entity_type));
        }
        rules.extend(&config.masking_rules);
        rules
    }

    /// Aplica sobreposições por tipo (ex: as `masking_rules` de uma requisição).
    pub fn extend(&mut self, overrides: &BTreeMap<String, String>) {
        for (entity_type, template) in overrides {
            self.templates.insert(entity_type.clone(), template.clone());
        }
    }

    pub fn with_rule(mut self, entity_type: &str, template: &str) -> Self {
        self.templates
            .insert(entity_type.to_string(), template.to_string());
        self
    }

    /// Token de máscara para `entity_type`; [`FALLBACK_TOKEN`] se o tipo for desconhecido.
    pub fn token_for(&self, entity_type: &str) -> String {
        match self.templates.get(entity_type) {
            Some(template) => template.replace(TYPE_PLACEHOLDER, entity_type),
            None => FALLBACK_TOKEN.to_string(),
        }
    }
}

impl Default for MaskingRules {
    fn default() -> Self {
        Self::new()
    }
}

fn default_template(entity_type: &str) -> String {
    format!("[{entity_type}]")
}

/// Entrada do log de auditoria de uma substituição.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEntity {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub source: DetectorKind,
    pub confidence: f64,
    pub token: String,
}

/// Resultado do mascaramento de uma unidade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizationResult {
    pub unit_id: String,
    pub masked_text: String,
    /// Substituições aplicadas, em ordem crescente de `start` (offsets do texto original).
    pub applied_entities: Vec<AppliedEntity>,
}

/// Aplica o conjunto fundido sobre o texto de uma unidade.
pub fn apply(
    unit_id: &str,
    text: &str,
    entities: &MergedEntitySet,
    rules: &MaskingRules,
) -> Result<AnonymizationResult> {
    for entity in entities {
        entity
            .validate_against(text)
            .map_err(|reason| RedactionError::masking(unit_id, reason))?;
    }

    let mut masked = text.to_string();
    let mut applied = Vec::with_capacity(entities.len());

    for entity in entities.entities().iter().rev() {
        let token = rules.token_for(&entity.entity_type);
        masked.replace_range(entity.start..entity.end, &token);
        applied.push(AppliedEntity {
            entity_type: entity.entity_type.clone(),
            start: entity.start,
            end: entity.end,
            source: entity.source,
            confidence: entity.confidence,
            token,
        });
    }
    applied.reverse();

    Ok(AnonymizationResult {
        unit_id: unit_id.to_string(),
        masked_text: masked,
        applied_entities: applied,
    })
}

/// Substituição regex direta, sem detectores.
///
/// Todo casamento de `pattern` é trocado por `replacement` (que aceita
/// referências `$1`/`$name` a grupos de captura).
///
/// ```rust
/// use pii_core::masker::mask_with_pattern;
///
/// let masked = mask_with_pattern("call 555-1234", r"\d{3}-\d{4}", "***").unwrap();
/// assert_eq!(masked, "call ***");
/// ```
pub fn mask_with_pattern(text: &str, pattern: &str, replacement: &str) -> Result<String> {
    let regex = Regex::new(pattern)?;
    Ok(regex.replace_all(text, replacement).into_owned())
}
