use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference};
use std::io::BufWriter;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const BOTTOM_MARGIN_MM: f32 = 20.0;
const FONT_SIZE_PT: f32 = 12.0;
const LINE_HEIGHT_MM: f32 = 6.0;
// Average glyph advance as a share of the font size; 1pt = 0.3528mm.
const GLYPH_WIDTH_MM: f32 = FONT_SIZE_PT * 0.5 * 0.3528;

/// Page margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub left: f32,
    pub top: f32,
    pub right: f32,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            left: 30.0,
            top: 50.0,
            right: 30.0,
        }
    }
}

/// Renders translated text into PDF bytes.
pub trait PdfRenderer: Send + Sync {
    fn render(&self, text: &str, margins: &Margins) -> Result<Vec<u8>, RenderError>;
}

/// A4 renderer built on `printpdf`.
///
/// Uses built-in Helvetica unless a TrueType font is supplied; scripts outside
/// WinAnsi (Vietnamese, for one) need the external font to render correctly.
#[derive(Default)]
pub struct PrintPdfRenderer {
    font: Option<Vec<u8>>,
}

impl PrintPdfRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font(font: Vec<u8>) -> Self {
        Self { font: Some(font) }
    }

    fn load_font(&self, doc: &PdfDocumentReference) -> Result<IndirectFontRef, RenderError> {
        match &self.font {
            Some(bytes) => doc
                .add_external_font(bytes.as_slice())
                .map_err(|e| RenderError::Font(e.to_string())),
            None => doc
                .add_builtin_font(BuiltinFont::Helvetica)
                .map_err(|e| RenderError::Font(e.to_string())),
        }
    }
}

impl PdfRenderer for PrintPdfRenderer {
    fn render(&self, text: &str, margins: &Margins) -> Result<Vec<u8>, RenderError> {
        let pages = layout(text, margins);

        let (doc, page1, layer1) =
            PdfDocument::new("Translation", Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
        let font = self.load_font(&doc)?;

        for (index, lines) in pages.iter().enumerate() {
            let layer = if index == 0 {
                doc.get_page(page1).get_layer(layer1)
            } else {
                let (page, layer) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
                doc.get_page(page).get_layer(layer)
            };

            let mut y = Mm(PAGE_HEIGHT_MM - margins.top);
            for line in lines {
                layer.use_text(line.as_str(), FONT_SIZE_PT, Mm(margins.left), y, &font);
                y -= Mm(LINE_HEIGHT_MM);
            }
        }

        let mut buf = BufWriter::new(Vec::new());
        doc.save(&mut buf)
            .map_err(|e| RenderError::Save(e.to_string()))?;
        buf.into_inner()
            .map_err(|e| RenderError::Save(e.to_string()))
    }
}

/// Wrap `text` into pages of lines that fit inside the margins.
///
/// Always returns at least one page so empty input still yields a valid PDF.
pub fn layout(text: &str, margins: &Margins) -> Vec<Vec<String>> {
    let text_width = (PAGE_WIDTH_MM - margins.left - margins.right).max(GLYPH_WIDTH_MM);
    let max_chars = ((text_width / GLYPH_WIDTH_MM) as usize).max(1);
    let usable_height = (PAGE_HEIGHT_MM - margins.top - BOTTOM_MARGIN_MM).max(LINE_HEIGHT_MM);
    let lines_per_page = ((usable_height / LINE_HEIGHT_MM) as usize).max(1);

    let lines: Vec<String> = text
        .lines()
        .flat_map(|paragraph| wrap(paragraph, max_chars))
        .collect();

    if lines.is_empty() {
        return vec![Vec::new()];
    }
    lines.chunks(lines_per_page).map(<[String]>::to_vec).collect()
}

fn wrap(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in paragraph.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        // Words longer than a line are hard-broken.
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }

        let needed = if current.is_empty() { word.len() } else { current_len + 1 + word.len() };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current_len += word.len();
        current.extend(word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to load font: {0}")]
    Font(String),

    #[error("Failed to write PDF: {0}")]
    Save(String),
}
