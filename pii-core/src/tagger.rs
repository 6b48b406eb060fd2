//! # Esquema de Tags BIO para PII
//!
//! O detector estatístico rotula cada token com uma tag **BIO**
//! (Beginning-Inside-Outside) e depois reagrupa as tags em trechos.
//!
//! | Categoria      | Tipo de entidade emitido | Exemplos                    |
//! |----------------|--------------------------|-----------------------------|
//! | Person         | `PERSON`                 | John Smith, João da Silva   |
//! | Organization   | `ORGANIZATION`           | Acme Corp, Petrobras        |
//! | Location       | `LOCATION`               | Springfield, São Paulo      |
//!
//! - `B-X`: primeiro token de uma entidade
//! - `I-X`: tokens seguintes da mesma entidade
//! - `O`: fora de entidade

use serde::{Deserialize, Serialize};

use crate::entity::{DetectedEntity, DetectorKind};
use crate::tokenizer::Token;

/// Categorias que o modelo estatístico sabe reconhecer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PiiCategory {
    Person,
    Organization,
    Location,
}

impl PiiCategory {
    /// Nome curto usado nas tags BIO ("PER", "ORG", "LOC").
    pub fn short(&self) -> &'static str {
        match self {
            PiiCategory::Person => "PER",
            PiiCategory::Organization => "ORG",
            PiiCategory::Location => "LOC",
        }
    }

    /// Tipo de entidade emitido para o mascarador.
    pub fn entity_type(&self) -> &'static str {
        match self {
            PiiCategory::Person => "PERSON",
            PiiCategory::Organization => "ORGANIZATION",
            PiiCategory::Location => "LOCATION",
        }
    }

    pub fn from_short(s: &str) -> Option<Self> {
        match s {
            "PER" => Some(PiiCategory::Person),
            "ORG" => Some(PiiCategory::Organization),
            "LOC" => Some(PiiCategory::Location),
            _ => None,
        }
    }

    pub const ALL: [PiiCategory; 3] = [
        PiiCategory::Person,
        PiiCategory::Organization,
        PiiCategory::Location,
    ];
}

/// Tag BIO aplicada a um token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Begin(PiiCategory),
    Inside(PiiCategory),
    Outside,
}

impl Tag {
    /// Representação textual da tag (ex: "B-PER", "I-ORG", "O")
    pub fn label(&self) -> String {
        match self {
            Tag::Begin(cat) => format!("B-{}", cat.short()),
            Tag::Inside(cat) => format!("I-{}", cat.short()),
            Tag::Outside => "O".to_string(),
        }
    }

    /// Índice numérico da tag para as matrizes CRF/Viterbi.
    pub fn index(&self) -> usize {
        match self {
            Tag::Outside => 0,
            Tag::Begin(PiiCategory::Person) => 1,
            Tag::Inside(PiiCategory::Person) => 2,
            Tag::Begin(PiiCategory::Organization) => 3,
            Tag::Inside(PiiCategory::Organization) => 4,
            Tag::Begin(PiiCategory::Location) => 5,
            Tag::Inside(PiiCategory::Location) => 6,
        }
    }

    /// Número total de tags possíveis
    pub const COUNT: usize = 7;

    /// Todas as tags, na ordem de [`Tag::index`]
    pub fn all() -> [Tag; 7] {
        [
            Tag::Outside,
            Tag::Begin(PiiCategory::Person),
            Tag::Inside(PiiCategory::Person),
            Tag::Begin(PiiCategory::Organization),
            Tag::Inside(PiiCategory::Organization),
            Tag::Begin(PiiCategory::Location),
            Tag::Inside(PiiCategory::Location),
        ]
    }

    /// `I-X` só pode seguir `B-X` ou `I-X`; o resto é sempre válido.
    pub fn is_valid_transition(prev: &Tag, next: &Tag) -> bool {
        match next {
            Tag::Inside(cat) => match prev {
                Tag::Begin(prev_cat) | Tag::Inside(prev_cat) => prev_cat == cat,
                _ => false,
            },
            _ => true,
        }
    }

    /// Parseia uma tag a partir de string (ex: "B-PER" → Begin(Person))
    pub fn from_label(s: &str) -> Option<Self> {
        if s == "O" {
            return Some(Tag::Outside);
        }
        let (prefix, cat) = s.split_once('-')?;
        let cat = PiiCategory::from_short(cat)?;
        match prefix {
            "B" => Some(Tag::Begin(cat)),
            "I" => Some(Tag::Inside(cat)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Um token com sua tag BIO e a probabilidade da tag escolhida
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedToken {
    pub token: Token,
    pub tag: Tag,
    pub confidence: f64,
}

/// Reagrupa tokens BIO em entidades com offsets de byte.
///
/// Uma entidade começa em `B-X` e continua enquanto houver `I-X` da mesma
/// categoria. Um `I-X` órfão (sem `B-X` antes) é ignorado. A confiança da
/// entidade é a média das confianças dos seus tokens.
///
/// Uma entidade nunca atravessa quebra de linha: o `I-X` logo depois de um
/// `\n` abre uma entidade nova, e o mascaramento preserva as linhas.
pub fn tokens_to_entities(text: &str, tagged: &[TaggedToken]) -> Vec<DetectedEntity> {
    let mut entities = Vec::new();
    let mut i = 0;

    while i < tagged.len() {
        let cat = match tagged[i].tag {
            Tag::Begin(cat) => cat,
            Tag::Inside(cat) if i > 0 && line_break_between(text, &tagged[i - 1], &tagged[i]) => cat,
            _ => {
                i += 1;
                continue;
            }
        };

        let start_byte = tagged[i].token.start;
        let mut end_byte = tagged[i].token.end;
        let mut conf_sum = tagged[i].confidence;
        let mut count = 1usize;

        let mut j = i + 1;
        while let Some(next) = tagged.get(j) {
            if next.tag != Tag::Inside(cat) || line_break_between(text, &tagged[j - 1], next) {
                break;
            }
            end_byte = next.token.end;
            conf_sum += next.confidence;
            count += 1;
            j += 1;
        }

        entities.push(DetectedEntity::new(
            cat.entity_type(),
            start_byte,
            end_byte,
            (conf_sum / count as f64).clamp(0.0, 1.0),
            DetectorKind::Statistical,
        ));
        i = j;
    }

    entities
}

fn line_break_between(text: &str, prev: &TaggedToken, next: &TaggedToken) -> bool {
    text.get(prev.token.end..next.token.start)
        .map_or(false, |gap| gap.contains('\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn tag_all(text: &str, tags: &[Tag]) -> Vec<TaggedToken> {
        tokenize(text)
            .into_iter()
            .zip(tags.iter().cloned())
            .map(|(token, tag)| TaggedToken { token, tag, confidence: 0.8 })
            .collect()
    }

    #[test]
    fn test_tag_labels_roundtrip() {
        for tag in Tag::all() {
            assert_eq!(Tag::from_label(&tag.label()), Some(tag));
        }
        assert_eq!(Tag::from_label("B-MISC"), None);
    }

    #[test]
    fn test_all_tags_have_unique_indices() {
        let mut indices: Vec<usize> = Tag::all().iter().map(|t| t.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), Tag::COUNT);
    }

    #[test]
    fn test_valid_transitions() {
        let b_per = Tag::Begin(PiiCategory::Person);
        let i_per = Tag::Inside(PiiCategory::Person);
        assert!(Tag::is_valid_transition(&b_per, &i_per));
        assert!(!Tag::is_valid_transition(&Tag::Outside, &i_per));
        assert!(!Tag::is_valid_transition(&Tag::Begin(PiiCategory::Location), &i_per));
    }

    #[test]
    fn test_tokens_to_entities_offsets() {
        let text = "John Smith lives in Springfield";
        let tagged = tag_all(
            text,
            &[
                Tag::Begin(PiiCategory::Person),
                Tag::Inside(PiiCategory::Person),
                Tag::Outside,
                Tag::Outside,
                Tag::Begin(PiiCategory::Location),
            ],
        );
        let entities = tokens_to_entities(text, &tagged);
        assert_eq!(entities.len(), 2);
        assert_eq!(&text[entities[0].start..entities[0].end], "John Smith");
        assert_eq!(entities[0].entity_type, "PERSON");
        assert_eq!(&text[entities[1].start..entities[1].end], "Springfield");
        assert_eq!(entities[1].source, DetectorKind::Statistical);
    }

    #[test]
    fn test_orphan_inside_is_ignored() {
        let text = "acme rocks";
        let tagged = tag_all(text, &[Tag::Inside(PiiCategory::Organization), Tag::Outside]);
        assert!(tokens_to_entities(text, &tagged).is_empty());
    }

    #[test]
    fn test_entity_stops_at_line_break() {
        let text = "Regards,\nMary\r\nJohnson and co";
        let tagged = tag_all(
            text,
            &[
                Tag::Outside,
                Tag::Outside,
                Tag::Begin(PiiCategory::Person),
                Tag::Inside(PiiCategory::Person),
                Tag::Outside,
                Tag::Outside,
            ],
        );
        let entities = tokens_to_entities(text, &tagged);
        let spans: Vec<&str> = entities.iter().map(|e| &text[e.start..e.end]).collect();
        assert_eq!(spans, vec!["Mary", "Johnson"]);
        assert!(entities.iter().all(|e| e.entity_type == "PERSON"));
    }
}
