//! # Tokenizador
//!
//! Divide o texto de uma unidade em tokens (palavras e pontuações) preservando
//! o offset de byte original de cada um. O detector estatístico trabalha sobre
//! tokens, mas devolve entidades em offsets de byte do texto da unidade, então
//! `start`/`end` precisam ser exatos.
//!
//! ```rust
//! use pii_core::tokenizer::tokenize;
//!
//! let tokens = tokenize("Dr. Silva ligou.");
//! let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
//! assert_eq!(texts, vec!["Dr.", "Silva", "ligou", "."]);
//! ```

use serde::{Deserialize, Serialize};

/// Um token extraído do texto original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub text: String,
    /// Índice de byte inicial no texto original (inclusive).
    pub start: usize,
    /// Índice de byte final no texto original (exclusivo).
    pub end: usize,
    /// Índice sequencial do token na lista (0, 1, 2...).
    pub index: usize,
}

/// Abreviações (EN e PT-BR) cujo ponto não encerra o token
const ABBREVIATIONS: &[&str] = &[
    "Dr", "Dra", "Sr", "Sra", "Prof", "Profa", "Gov", "Dep", "Sen", "Min",
    "Gen", "Cap", "Sgt", "Cel", "Eng", "Mr", "Mrs", "Ms", "Jr", "Sn",
    "St", "Ave", "Blvd", "Rd", "Av", "Inc", "Ltd", "Co", "Corp", "Ltda",
    "tel", "fax", "pág", "etc",
];

/// Tokeniza um texto.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = tokenize_standard(text);
    for (i, token) in tokens.iter_mut().enumerate() {
        token.index = i;
    }
    tokens
}

fn tokenize_standard(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current_start = 0;
    let mut current_text = String::new();
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for (i, &(byte_pos, ch)) in chars.iter().enumerate() {
        if ch.is_alphanumeric() || ch == '-' && !current_text.is_empty() {
            if current_text.is_empty() {
                current_start = byte_pos;
            }
            current_text.push(ch);
        } else if ch == '.' && !current_text.is_empty() {
            let is_abbrev = ABBREVIATIONS.contains(&current_text.as_str());
            // Números com separador (ex: 1.234) permanecem juntos
            let current_is_num = current_text.chars().all(char::is_numeric);
            let next_is_num = chars
                .get(i + 1)
                .map(|(_, c)| c.is_numeric())
                .unwrap_or(false);

            if is_abbrev || (current_is_num && next_is_num) {
                current_text.push('.');
            } else {
                flush_token(&mut tokens, &mut current_text, current_start, byte_pos);
                push_token(&mut tokens, ".".to_string(), byte_pos, byte_pos + 1);
            }
        } else if ch == '\'' || ch == '\u{2019}' {
            if current_text.is_empty() {
                current_start = byte_pos;
            }
            current_text.push(ch);
        } else if ch.is_whitespace() {
            flush_token(&mut tokens, &mut current_text, current_start, byte_pos);
        } else {
            flush_token(&mut tokens, &mut current_text, current_start, byte_pos);
            push_token(&mut tokens, ch.to_string(), byte_pos, byte_pos + ch.len_utf8());
        }
    }

    flush_token(&mut tokens, &mut current_text, current_start, text.len());
    tokens
}

/// Fecha o token acumulado e adiciona à lista (se não vazio)
fn flush_token(tokens: &mut Vec<Token>, text: &mut String, start: usize, end: usize) {
    if !text.is_empty() {
        tokens.push(Token {
            text: std::mem::take(text),
            start,
            end,
            index: 0,
        });
    }
}

fn push_token(tokens: &mut Vec<Token>, text: String, start: usize, end: usize) {
    tokens.push(Token {
        text,
        start,
        end,
        index: 0,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        let tokens = tokenize("Lula ganhou 2022.");
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[3].text, ".");
    }

    #[test]
    fn test_offsets_match_source() {
        let text = "Contato: João da Silva, São Paulo.";
        for token in tokenize(text) {
            assert_eq!(&text[token.start..token.end], token.text);
        }
    }

    #[test]
    fn test_abbreviation_keeps_period() {
        let tokens = tokenize("Mr. Smith");
        assert_eq!(tokens[0].text, "Mr.");
        assert_eq!(tokens[1].text, "Smith");
        assert_eq!(tokens[1].index, 1);
    }

    #[test]
    fn test_decimal_number_stays_together() {
        let tokens = tokenize("R$ 1.234 pagos");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert!(texts.contains(&"1.234"));
    }

    #[test]
    fn test_empty_text() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \n").is_empty());
    }
}
