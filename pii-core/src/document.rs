//! # Documentos e Adaptadores Estruturais
//!
//! Cada formato expõe suas **unidades endereçáveis**:
//!
//! | Formato      | Unidade                 | Saída                                            |
//! |--------------|-------------------------|--------------------------------------------------|
//! | `PlainText`  | o documento inteiro     | texto mascarado                                  |
//! | `Paragraph`  | um parágrafo (docx)     | parágrafos na mesma ordem, estilo preservado     |
//! | `Page`       | uma página (pdf)        | página nova, mesmas dimensões, texto na âncora   |
//!
//! Um [`StructuralAdapter`] enumera as unidades, recebe o texto mascarado de
//! cada uma (`commit`) e monta o documento de saída. A extração do texto a
//! partir do contêiner binário (pdf/docx) acontece fora deste crate: aqui
//! chegam apenas os textos já extraídos.
//!
//! Entidades que atravessam duas unidades (ex: um nome quebrado entre
//! parágrafos) não são detectadas: cada unidade é analisada isoladamente.

use serde::{Deserialize, Serialize};

use crate::error::{RedactionError, Result};

/// Posição onde o texto mascarado é escrito numa página nova, em pontos.
pub const PAGE_TEXT_ANCHOR: TextAnchor = TextAnchor { x: 72.0, y: 72.0 };

/// Formato estrutural do documento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    PlainText,
    Paragraph,
    Page,
}

/// Texto extraído de uma unidade. Imutável depois de criado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: String,
    pub raw_text: String,
    pub format_kind: FormatKind,
}

impl TextUnit {
    pub fn new(id: impl Into<String>, raw_text: impl Into<String>, format_kind: FormatKind) -> Self {
        Self {
            id: id.into(),
            raw_text: raw_text.into(),
            format_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,
    /// Nome do estilo do parágrafo (ex: "Heading 1"), se houver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Largura em pontos.
    pub width: f64,
    /// Altura em pontos.
    pub height: f64,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextAnchor {
    pub x: f64,
    pub y: f64,
}

/// Página de saída: só dimensões e o texto mascarado na âncora.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    pub width: f64,
    pub height: f64,
    pub anchor: TextAnchor,
    pub text: String,
}

/// Documento de entrada, com o texto já extraído.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format_kind", rename_all = "snake_case")]
pub enum SourceDocument {
    PlainText { text: String },
    Paragraph { paragraphs: Vec<Paragraph> },
    Page { pages: Vec<Page> },
}

impl SourceDocument {
    pub fn format_kind(&self) -> FormatKind {
        match self {
            SourceDocument::PlainText { .. } => FormatKind::PlainText,
            SourceDocument::Paragraph { .. } => FormatKind::Paragraph,
            SourceDocument::Page { .. } => FormatKind::Page,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RedactionError::Extraction(e.to_string()))
    }

    /// Escolhe o adaptador pelo formato.
    pub fn into_adapter(self) -> Box<dyn StructuralAdapter> {
        match self {
            SourceDocument::PlainText { text } => Box::new(PlainTextAdapter::new(text)),
            SourceDocument::Paragraph { paragraphs } => Box::new(ParagraphAdapter::new(paragraphs)),
            SourceDocument::Page { pages } => Box::new(PageAdapter::new(pages)),
        }
    }
}

/// Documento de saída, no mesmo formato da entrada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format_kind", rename_all = "snake_case")]
pub enum OutputDocument {
    PlainText { text: String },
    Paragraph { paragraphs: Vec<Paragraph> },
    Page { pages: Vec<RenderedPage> },
}

impl OutputDocument {
    pub fn format_kind(&self) -> FormatKind {
        match self {
            OutputDocument::PlainText { .. } => FormatKind::PlainText,
            OutputDocument::Paragraph { .. } => FormatKind::Paragraph,
            OutputDocument::Page { .. } => FormatKind::Page,
        }
    }
}

/// Contrato de cada formato com o reescritor de documentos.
pub trait StructuralAdapter: Send {
    fn format_kind(&self) -> FormatKind;

    /// Unidades em ordem de documento. Pode ser chamado quantas vezes for preciso.
    fn enumerate_units(&self) -> Vec<TextUnit>;

    /// Grava o texto mascarado de uma unidade. Repetir o commit da mesma
    /// unidade sobrescreve o anterior.
    fn commit(&mut self, unit_id: &str, masked_text: String) -> Result<()>;

    /// Monta a saída. Falha se alguma unidade não recebeu commit.
    fn assemble(&self) -> Result<OutputDocument>;
}

/// Ids e textos mascarados das unidades, na ordem do documento.
#[derive(Debug, Clone)]
struct CommitSlots {
    ids: Vec<String>,
    masked: Vec<Option<String>>,
}

impl CommitSlots {
    fn new(ids: Vec<String>) -> Self {
        let masked = vec![None; ids.len()];
        Self { ids, masked }
    }

    fn commit(&mut self, unit_id: &str, masked_text: String) -> Result<()> {
        let index = self
            .ids
            .iter()
            .position(|id| id == unit_id)
            .ok_or_else(|| RedactionError::masking(unit_id, "unidade inexistente no documento"))?;
        self.masked[index] = Some(masked_text);
        Ok(())
    }

    /// Textos mascarados em ordem, ou erro na primeira unidade sem commit.
    fn texts(&self) -> Result<Vec<&str>> {
        self.ids
            .iter()
            .zip(&self.masked)
            .map(|(id, masked)| {
                masked
                    .as_deref()
                    .ok_or_else(|| RedactionError::masking(id, "unidade sem commit"))
            })
            .collect()
    }
}

/// Documento de texto simples: uma única unidade.
#[derive(Debug, Clone)]
pub struct PlainTextAdapter {
    text: String,
    slots: CommitSlots,
}

impl PlainTextAdapter {
    pub const UNIT_ID: &'static str = "text";

    pub fn new(text: String) -> Self {
        Self {
            text,
            slots: CommitSlots::new(vec![Self::UNIT_ID.to_string()]),
        }
    }
}

impl StructuralAdapter for PlainTextAdapter {
    fn format_kind(&self) -> FormatKind {
        FormatKind::PlainText
    }

    fn enumerate_units(&self) -> Vec<TextUnit> {
        vec![TextUnit::new(Self::UNIT_ID, self.text.clone(), FormatKind::PlainText)]
    }

    fn commit(&mut self, unit_id: &str, masked_text: String) -> Result<()> {
        self.slots.commit(unit_id, masked_text)
    }

    fn assemble(&self) -> Result<OutputDocument> {
        let text = self.slots.texts()?.concat();
        Ok(OutputDocument::PlainText { text })
    }
}

/// Documento em parágrafos (docx): uma unidade por parágrafo, ids `p0`, `p1`...
#[derive(Debug, Clone)]
pub struct ParagraphAdapter {
    paragraphs: Vec<Paragraph>,
    slots: CommitSlots,
}

impl ParagraphAdapter {
    pub fn new(paragraphs: Vec<Paragraph>) -> Self {
        let ids = (0..paragraphs.len()).map(|i| format!("p{i}")).collect();
        Self {
            paragraphs,
            slots: CommitSlots::new(ids),
        }
    }
}

impl StructuralAdapter for ParagraphAdapter {
    fn format_kind(&self) -> FormatKind {
        FormatKind::Paragraph
    }

    fn enumerate_units(&self) -> Vec<TextUnit> {
        self.slots
            .ids
            .iter()
            .zip(&self.paragraphs)
            .map(|(id, p)| TextUnit::new(id.as_str(), p.text.clone(), FormatKind::Paragraph))
            .collect()
    }

    fn commit(&mut self, unit_id: &str, masked_text: String) -> Result<()> {
        self.slots.commit(unit_id, masked_text)
    }

    fn assemble(&self) -> Result<OutputDocument> {
        let paragraphs = self
            .slots
            .texts()?
            .into_iter()
            .zip(&self.paragraphs)
            .map(|(text, original)| Paragraph {
                text: text.to_string(),
                style: original.style.clone(),
            })
            .collect();
        Ok(OutputDocument::Paragraph { paragraphs })
    }
}

/// Documento paginado (pdf): uma unidade por página, ids `page1`, `page2`...
///
/// Layout, imagens e estilos da página original são descartados.
#[derive(Debug, Clone)]
pub struct PageAdapter {
    pages: Vec<Page>,
    slots: CommitSlots,
}

impl PageAdapter {
    pub fn new(pages: Vec<Page>) -> Self {
        let ids = (1..=pages.len()).map(|n| format!("page{n}")).collect();
        Self {
            pages,
            slots: CommitSlots::new(ids),
        }
    }
}

impl StructuralAdapter for PageAdapter {
    fn format_kind(&self) -> FormatKind {
        FormatKind::Page
    }

    fn enumerate_units(&self) -> Vec<TextUnit> {
        self.slots
            .ids
            .iter()
            .zip(&self.pages)
            .map(|(id, page)| TextUnit::new(id.as_str(), page.text.clone(), FormatKind::Page))
            .collect()
    }

    fn commit(&mut self, unit_id: &str, masked_text: String) -> Result<()> {
        self.slots.commit(unit_id, masked_text)
    }

    fn assemble(&self) -> Result<OutputDocument> {
        let pages = self
            .slots
            .texts()?
            .into_iter()
            .zip(&self.pages)
            .map(|(text, original)| RenderedPage {
                width: original.width,
                height: original.height,
                anchor: PAGE_TEXT_ANCHOR,
                text: text.to_string(),
            })
            .collect();
        Ok(OutputDocument::Page { pages })
    }
}
