//! # Modelos NER Pré-treinados por Idioma
//!
//! Cada [`NerModel`] encapsula:
//! - **Pesos CRF** de emissão e transição
//! - **Gazetteers** de pessoas, locais e organizações do idioma
//!
//! ## Como os pesos foram derivados
//!
//! Os pesos são heurísticos: refletem os sinais mais fortes para PII em texto
//! corrido (capitalização, pertença a gazetteer, títulos antes de nomes,
//! sufixos societários depois de organizações). Em produção seriam estimados
//! por máxima verossimilhança condicional; o formato do modelo não muda.
//!
//! Os modelos são construídos uma vez na inicialização do processo e depois só
//! são lidos (`&self`), então podem ser compartilhados entre threads via `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crf::CrfModel;
use crate::features::{extract_features, Gazetteers};
use crate::tagger::{tokens_to_entities, PiiCategory, Tag, TaggedToken};
use crate::tokenizer::tokenize;
use crate::viterbi::viterbi_decode;
use crate::entity::DetectedEntity;

/// Modelo NER de um idioma.
#[derive(Debug, Clone)]
pub struct NerModel {
    /// Código ISO 639-1 do idioma (ex: "en", "pt")
    pub language: String,
    pub crf: CrfModel,
    gazetteers: Gazetteers,
}

impl NerModel {
    /// Modelo para inglês.
    pub fn english() -> Self {
        let mut crf = CrfModel::new();
        add_shared_weights(&mut crf);

        for title in ["mr", "mr.", "mrs", "mrs.", "ms", "ms.", "dr", "dr.", "miss", "sir", "prof."] {
            crf.set_emission(&format!("prev_word={title}"), &Tag::Begin(PiiCategory::Person), 2.5);
        }
        for prep in ["in", "at", "from", "near"] {
            crf.set_emission(&format!("prev_word={prep}"), &Tag::Begin(PiiCategory::Location), 0.8);
        }
        for cue in ["bank", "university", "company", "firm"] {
            crf.set_emission(&format!("prev_word={cue}"), &Tag::Begin(PiiCategory::Organization), 1.5);
        }
        for suffix in ["inc", "inc.", "corp", "corp.", "ltd", "ltd.", "llc", "co."] {
            crf.set_emission(&format!("next_word={suffix}"), &Tag::Begin(PiiCategory::Organization), 2.0);
            crf.set_emission(&format!("word={suffix}"), &Tag::Inside(PiiCategory::Organization), 5.0);
        }
        for street in ["st", "st.", "street", "ave", "ave.", "avenue", "rd", "road", "blvd", "lane"] {
            crf.set_emission(&format!("next_word={street}"), &Tag::Begin(PiiCategory::Location), 3.0);
            crf.set_emission(&format!("word={street}"), &Tag::Inside(PiiCategory::Location), 4.0);
        }

        let mut gazetteers = Gazetteers::new();
        Gazetteers::extend_words(&mut gazetteers.persons, EN_PERSONS, 2);
        Gazetteers::extend_words(&mut gazetteers.locations, EN_LOCATIONS, 2);
        Gazetteers::extend_words(&mut gazetteers.organizations, EN_ORGANIZATIONS, 1);

        Self {
            language: "en".to_string(),
            crf,
            gazetteers,
        }
    }

    /// Modelo para português brasileiro.
    pub fn portuguese() -> Self {
        let mut crf = CrfModel::new();
        add_shared_weights(&mut crf);

        for title in [
            "presidente", "governador", "deputado", "deputada", "senador", "senadora",
            "ministro", "ministra", "dr", "dr.", "dra.", "prof", "prof.", "sr.", "sra.", "dom",
        ] {
            crf.set_emission(&format!("prev_word={title}"), &Tag::Begin(PiiCategory::Person), 2.5);
        }
        // Partículas de nomes compostos: "João da Silva"
        for particle in ["da", "de", "do", "dos", "das"] {
            crf.set_emission(&format!("word={particle}"), &Tag::Inside(PiiCategory::Person), 7.0);
        }
        for cue in ["ministério", "instituto", "tribunal", "empresa", "banco", "universidade"] {
            crf.set_emission(&format!("prev_word={cue}"), &Tag::Begin(PiiCategory::Organization), 2.0);
        }
        for suffix in ["ltda", "ltda.", "s.a.", "s/a", "eireli", "me"] {
            crf.set_emission(&format!("next_word={suffix}"), &Tag::Begin(PiiCategory::Organization), 2.0);
            crf.set_emission(&format!("word={suffix}"), &Tag::Inside(PiiCategory::Organization), 5.0);
        }
        crf.set_emission("suffix3=ras", &Tag::Begin(PiiCategory::Organization), 1.8);
        for cue in ["cidade", "estado", "município", "rua", "avenida", "bairro", "em", "no", "na"] {
            crf.set_emission(&format!("prev_word={cue}"), &Tag::Begin(PiiCategory::Location), 1.5);
        }
        crf.set_emission("suffix4=ília", &Tag::Begin(PiiCategory::Location), 1.5);

        let mut gazetteers = Gazetteers::new();
        Gazetteers::extend_words(&mut gazetteers.persons, PT_PERSONS, 2);
        Gazetteers::extend_words(&mut gazetteers.locations, PT_LOCATIONS, 3);
        Gazetteers::extend_words(&mut gazetteers.organizations, PT_ORGANIZATIONS, 1);

        Self {
            language: "pt".to_string(),
            crf,
            gazetteers,
        }
    }

    /// Executa tokenização → features → Viterbi e reagrupa as tags em entidades.
    pub fn predict(&self, text: &str) -> Vec<DetectedEntity> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Vec::new();
        }

        let feature_vectors = extract_features(&tokens, &self.gazetteers);
        let result = viterbi_decode(&self.crf, &feature_vectors);
        let confidences = result.confidences();

        let tagged: Vec<TaggedToken> = tokens
            .into_iter()
            .zip(result.best_sequence)
            .zip(confidences)
            .map(|((token, tag), confidence)| TaggedToken { token, tag, confidence })
            .collect();

        tokens_to_entities(text, &tagged)
    }
}

/// Conjunto de modelos carregados, indexado pelo código do idioma.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Arc<NerModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Carrega todos os modelos embutidos ("en" e "pt").
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.insert(NerModel::english());
        registry.insert(NerModel::portuguese());
        registry
    }

    pub fn insert(&mut self, model: NerModel) {
        self.models
            .insert(normalize_language(&model.language), Arc::new(model));
    }

    pub fn get(&self, language: &str) -> Option<&Arc<NerModel>> {
        self.models.get(&normalize_language(language))
    }

    pub fn languages(&self) -> Vec<&str> {
        self.models.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// "en-US", "EN_gb" → "en"
pub fn normalize_language(language: &str) -> String {
    language
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Pesos comuns a todos os idiomas: capitalização, gazetteers, pontuação e transições BIO.
fn add_shared_weights(model: &mut CrfModel) {
    // =====================================================================
    // PESOS DE EMISSÃO (Feature -> Tag)
    // =====================================================================
    model.set_emission("is_capitalized", &Tag::Begin(PiiCategory::Person), 2.8);
    model.set_emission("is_capitalized", &Tag::Begin(PiiCategory::Organization), 1.5);
    model.set_emission("is_capitalized", &Tag::Begin(PiiCategory::Location), 1.5);
    model.set_emission("is_all_caps", &Tag::Begin(PiiCategory::Organization), 1.5);

    model.set_emission("in_person_gazetteer", &Tag::Begin(PiiCategory::Person), 5.0);
    model.set_emission("in_person_gazetteer", &Tag::Inside(PiiCategory::Person), 4.5);
    model.set_emission("in_location_gazetteer", &Tag::Begin(PiiCategory::Location), 5.0);
    model.set_emission("in_location_gazetteer", &Tag::Inside(PiiCategory::Location), 4.5);
    model.set_emission("in_org_gazetteer", &Tag::Begin(PiiCategory::Organization), 5.0);
    model.set_emission("in_org_gazetteer", &Tag::Inside(PiiCategory::Organization), 4.5);

    // Início de frase: capitalização não indica nome próprio
    model.set_emission("BOS", &Tag::Outside, 2.5);
    model.set_emission("bias", &Tag::Outside, 1.0);
    model.set_emission("is_lower_initial", &Tag::Outside, 6.0);
    model.set_emission("is_punctuation", &Tag::Outside, 5.0);
    model.set_emission("is_digit", &Tag::Outside, 2.0);
    model.set_emission("has_digit", &Tag::Outside, 2.0);

    // =====================================================================
    // PESOS DE TRANSIÇÃO
    // =====================================================================
    let tags = Tag::all();
    for prev in &tags {
        for next in &tags {
            if !Tag::is_valid_transition(prev, next) {
                model.set_transition(prev, next, -8.0);
            }
        }
    }

    for cat in PiiCategory::ALL {
        let b = Tag::Begin(cat);
        let i = Tag::Inside(cat);
        model.set_transition(&b, &i, 4.0);
        model.set_transition(&i, &i, 3.5);
        model.set_transition(&b, &Tag::Outside, 2.0);
        model.set_transition(&i, &Tag::Outside, 2.5);
        model.set_transition(&Tag::Outside, &b, 1.5);
    }
    model.set_transition(&Tag::Outside, &Tag::Outside, 2.5);
}

const EN_PERSONS: &[&str] = &[
    "John", "Jane", "Mary", "James", "Robert", "Patricia", "Jennifer", "Michael",
    "Linda", "William", "Elizabeth", "David", "Barbara", "Richard", "Susan", "Joseph",
    "Jessica", "Thomas", "Sarah", "Charles", "Karen", "Daniel", "Emily", "Alice", "Bob",
    "Smith", "Johnson", "Williams", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Wilson", "Anderson", "Taylor", "Thomas", "Moore", "Jackson", "Harris",
    "Clark", "Lewis", "Walker", "Doe", "Roe",
];

const EN_LOCATIONS: &[&str] = &[
    "London", "Paris", "Berlin", "Madrid", "Tokyo", "Chicago", "Boston", "Seattle",
    "New York", "Los Angeles", "San Francisco", "Springfield", "California", "Texas",
    "Florida", "Ohio", "England", "Scotland", "Ireland", "Canada", "Mexico", "Germany",
    "France", "Spain", "Italy", "Japan", "China", "India", "Brazil",
];

const EN_ORGANIZATIONS: &[&str] = &[
    "Google", "Microsoft", "Apple", "Amazon", "Meta", "IBM", "Intel", "Oracle", "Acme",
    "NASA", "FBI", "UN", "WHO", "Harvard", "Stanford", "MIT", "Reuters",
];

const PT_PERSONS: &[&str] = &[
    "João", "Maria", "José", "Ana", "Pedro", "Paulo", "Lucas", "Mariana", "Fernanda",
    "Carlos", "Rafael", "Juliana", "Lula", "Getúlio", "Vargas", "Juscelino",
    "Kubitschek", "Sarney", "Collor", "Itamar", "Cardoso", "Rousseff", "Temer",
    "Bolsonaro", "Silva", "Santos", "Oliveira", "Souza", "Pereira", "Costa",
    "Rodrigues", "Almeida", "Nascimento", "Lima", "Araújo", "Ferreira", "Machado",
];

const PT_LOCATIONS: &[&str] = &[
    "Brasília", "São Paulo", "Rio de Janeiro", "Salvador", "Fortaleza", "Manaus",
    "Curitiba", "Recife", "Porto Alegre", "Belém", "Goiânia", "Florianópolis",
    "Campinas", "Niterói", "Amazônia", "Pantanal", "Nordeste", "Minas Gerais",
    "Bahia", "Paraná", "Pernambuco", "Argentina", "Portugal", "Brasil",
];

const PT_ORGANIZATIONS: &[&str] = &[
    "Petrobras", "Vale", "Embraer", "Nubank", "Itaú", "Bradesco", "Santander",
    "Caixa", "BNDES", "IBGE", "INPE", "Fiocruz", "Anvisa", "Anatel", "USP",
    "Unicamp", "UFRJ", "UnB", "UFMG", "Globo", "Folha", "STF", "STJ", "TSE",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn spans<'a>(text: &'a str, model: &NerModel) -> Vec<(String, &'a str)> {
        model
            .predict(text)
            .into_iter()
            .map(|e| (e.entity_type.clone(), &text[e.start..e.end]))
            .collect()
    }

    #[test]
    fn test_english_person_from_gazetteer() {
        let model = NerModel::english();
        let found = spans("John Smith lives at 123 Main St, contact john@example.com", &model);
        assert!(found.contains(&("PERSON".to_string(), "John Smith")));
        // "john" minúsculo dentro do e-mail não é nome próprio
        assert!(!found.iter().any(|(_, s)| *s == "john"));
    }

    #[test]
    fn test_portuguese_person_and_location() {
        let model = NerModel::portuguese();
        let found = spans("O presidente Lula visitou Brasília.", &model);
        assert!(found.contains(&("PERSON".to_string(), "Lula")));
        assert!(found.contains(&("LOCATION".to_string(), "Brasília")));
    }

    #[test]
    fn test_confidence_in_unit_interval() {
        let model = NerModel::english();
        for entity in model.predict("Mary Johnson joined Acme Corp in Chicago.") {
            assert!((0.0..=1.0).contains(&entity.confidence));
            assert!(entity.start < entity.end);
        }
    }

    #[test]
    fn test_lowercase_text_has_no_entities() {
        let model = NerModel::english();
        assert!(model.predict("nothing personal in here at all").is_empty());
        assert!(model.predict("").is_empty());
    }

    #[test]
    fn test_registry_normalizes_language() {
        let registry = ModelRegistry::builtin();
        assert!(registry.get("en-US").is_some());
        assert!(registry.get("PT_br").is_some());
        assert!(registry.get("de").is_none());
        assert_eq!(registry.languages(), vec!["en", "pt"]);
    }
}
