//! # Detector de Padrões
//!
//! Regras regex determinísticas por tipo de entidade. Sempre disponível e
//! sem dependência de idioma, serve de base quando o modelo estatístico falha.
//!
//! Alguns tipos têm validação extra além do regex (dígito verificador de CPF,
//! algoritmo de Luhn para cartões), o que evita marcar qualquer sequência de
//! dígitos com o formato certo.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DetectionOutcome, SpanDetector};
use crate::config::PipelineConfig;
use crate::entity::{DetectedEntity, DetectorKind};
use crate::error::{RedactionError, Result};

/// Regra embutida.
struct PatternRule {
    entity_type: &'static str,
    pattern: Lazy<Regex>,
    /// Validação adicional sobre o trecho casado.
    validate: Option<fn(&str) -> bool>,
}

static BUILTIN_RULES: [PatternRule; 10] = [
    PatternRule {
        entity_type: "EMAIL",
        pattern: Lazy::new(|| {
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
        }),
        validate: None,
    },
    PatternRule {
        entity_type: "URL",
        pattern: Lazy::new(|| Regex::new(r#"\b(?:https?://|www\.)[^\s<>"']+[^\s<>"'.,;:!?)]"#).unwrap()),
        validate: None,
    },
    PatternRule {
        entity_type: "US_SSN",
        pattern: Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
        validate: None,
    },
    PatternRule {
        entity_type: "CREDIT_CARD",
        pattern: Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").unwrap()),
        validate: Some(luhn_valid),
    },
    PatternRule {
        entity_type: "CPF",
        pattern: Lazy::new(|| Regex::new(r"\b\d{3}\.\d{3}\.\d{3}-\d{2}\b").unwrap()),
        validate: Some(cpf_valid),
    },
    PatternRule {
        entity_type: "CNPJ",
        pattern: Lazy::new(|| Regex::new(r"\b\d{2}\.\d{3}\.\d{3}/\d{4}-\d{2}\b").unwrap()),
        validate: None,
    },
    PatternRule {
        entity_type: "IP_ADDRESS",
        pattern: Lazy::new(|| {
            Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")
                .unwrap()
        }),
        validate: None,
    },
    PatternRule {
        entity_type: "PHONE",
        pattern: Lazy::new(|| {
            // +1 555-123-4567, (11) 98765-4321, 555-1234
            // Miolo de 5 dígitos só com DDD entre parênteses: 12345-6789 é CEP/ZIP+4
            Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)\s?\d{4,5}|\b(?:\d{2,4}[\s.-])?\d{3,4})[\s.-]\d{4}\b")
                .unwrap()
        }),
        validate: None,
    },
    PatternRule {
        entity_type: "ADDRESS",
        pattern: Lazy::new(|| {
            Regex::new(
                r"\b\d{1,5}\s+(?:[A-Z][a-z]+\s+){1,4}(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Way|Court|Ct)\b\.?",
            )
            .unwrap()
        }),
        validate: None,
    },
    PatternRule {
        entity_type: "ADDRESS",
        pattern: Lazy::new(|| {
            // Rua das Flores, 123 / Av. Paulista, nº 1000
            Regex::new(r"\b(?:Rua|Avenida|Av\.|Travessa|Alameda)\s+[^,\n]{2,60}?,\s*(?:n[º°.]?\s*)?\d{1,5}\b")
                .unwrap()
        }),
        validate: None,
    },
];

/// Tipos cobertos pelas regras embutidas.
pub fn builtin_entity_types() -> Vec<&'static str> {
    let mut types: Vec<&'static str> = BUILTIN_RULES.iter().map(|r| r.entity_type).collect();
    types.dedup();
    types
}

/// Detector baseado em regras regex. Confiança fixa em 1.0.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    /// Índices em `BUILTIN_RULES` ativos neste detector.
    builtin: Vec<usize>,
    custom: Vec<(String, Regex)>,
}

impl PatternDetector {
    /// Todas as regras embutidas.
    pub fn new() -> Self {
        Self {
            builtin: (0..BUILTIN_RULES.len()).collect(),
            custom: Vec::new(),
        }
    }

    /// Apenas as regras embutidas dos tipos listados.
    pub fn with_entity_types<S: AsRef<str>>(types: &[S]) -> Self {
        let builtin = BUILTIN_RULES
            .iter()
            .enumerate()
            .filter(|(_, rule)| types.iter().any(|t| t.as_ref() == rule.entity_type))
            .map(|(i, _)| i)
            .collect();
        Self {
            builtin,
            custom: Vec::new(),
        }
    }

    /// Registra uma regra extra. Um regex inválido vira [`RedactionError::Pattern`].
    pub fn add_rule(&mut self, entity_type: &str, pattern: &str) -> Result<()> {
        if entity_type.trim().is_empty() {
            return Err(RedactionError::InvalidConfig(format!(
                "regra sem entity_type: {pattern}"
            )));
        }
        let regex = Regex::new(pattern)?;
        self.custom.push((entity_type.to_string(), regex));
        Ok(())
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut detector = match &config.pattern_entity_types {
            Some(types) => Self::with_entity_types(types.as_slice()),
            None => Self::new(),
        };
        for custom in &config.custom_patterns {
            detector.add_rule(&custom.entity_type, &custom.pattern)?;
        }
        Ok(detector)
    }

    /// Todos os casamentos de todas as regras, possivelmente sobrepostos.
    pub fn find_all(&self, text: &str) -> Vec<DetectedEntity> {
        let mut entities = Vec::new();

        for rule in self.builtin.iter().filter_map(|&i| BUILTIN_RULES.get(i)) {
            for m in rule.pattern.find_iter(text) {
                if rule.validate.map_or(true, |check| check(m.as_str())) {
                    entities.push(DetectedEntity::new(
                        rule.entity_type,
                        m.start(),
                        m.end(),
                        1.0,
                        DetectorKind::Pattern,
                    ));
                }
            }
        }

        for (entity_type, regex) in &self.custom {
            entities.extend(
                regex
                    .find_iter(text)
                    .filter(|m| !m.is_empty())
                    .map(|m| {
                        DetectedEntity::new(
                            entity_type.as_str(),
                            m.start(),
                            m.end(),
                            1.0,
                            DetectorKind::Pattern,
                        )
                    }),
            );
        }

        entities.sort_by_key(|e| (e.start, e.end));
        entities
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanDetector for PatternDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::Pattern
    }

    fn detect(&self, text: &str, _language_hint: Option<&str>) -> DetectionOutcome {
        DetectionOutcome::found(self.find_all(text))
    }
}

fn digits_of(s: &str) -> Vec<u32> {
    s.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// Algoritmo de Luhn (cartões de crédito).
fn luhn_valid(candidate: &str) -> bool {
    let digits = digits_of(candidate);
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Dígitos verificadores do CPF.
fn cpf_valid(candidate: &str) -> bool {
    let digits = digits_of(candidate);
    if digits.len() != 11 || digits.iter().all(|&d| d == digits[0]) {
        return false;
    }
    let check = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .zip((2..=(len as u32 + 1)).rev())
            .map(|(d, w)| d * w)
            .sum();
        (sum * 10) % 11 % 10
    };
    check(9) == digits[9] && check(10) == digits[10]
}
