use anyhow::{anyhow, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use docx_rs::{read_docx, DocumentChild, ParagraphChild, RunChild};
use encoding_rs::UTF_8;
use lopdf::Document as PdfDocument;
use pulldown_cmark::{Event, Options, Parser as MdParser, Tag, TagEnd};
use scraper::{Html, Selector};
use std::io::Cursor;
use tracing::{debug, warn};

/// Classification spec.md §4.2 assigns every extracted block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Title,
    Paragraph,
    List,
    Table,
    Code,
    Summary,
    TableRow,
}

impl BlockType {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Title => "title",
            BlockType::Paragraph => "paragraph",
            BlockType::List => "list",
            BlockType::Table => "table",
            BlockType::Code => "code",
            BlockType::Summary => "summary",
            BlockType::TableRow => "table_row",
        }
    }

    fn base_score(self) -> f64 {
        match self {
            BlockType::Title => 0.6,
            BlockType::Summary => 0.6,
            BlockType::Table => 0.5,
            BlockType::Code => 0.4,
            BlockType::List => 0.4,
            BlockType::Paragraph => 0.3,
            BlockType::TableRow => 0.3,
        }
    }
}

/// A keyword whose presence marks a block as more likely to matter to a
/// reader scanning for the gist of a document, not a formal taxonomy.
const IMPORTANCE_KEYWORDS: &[&str] = &[
    "important", "summary", "key", "note", "warning", "critical", "must", "required", "conclusion",
];

/// One extracted unit of document structure (spec.md §4.2). `page` is
/// `Some` only for paginated formats (PDF); `section` threads through
/// whatever heading or sheet name the block fell under.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub text: String,
    pub block_type: BlockType,
    pub page: Option<usize>,
    pub section: Option<String>,
    pub importance: f64,
}

impl TextBlock {
    pub fn new(text: String, block_type: BlockType, page: Option<usize>, section: Option<String>) -> Self {
        let importance = Self::score(&text, block_type);
        Self {
            text,
            block_type,
            page,
            section,
            importance,
        }
    }

    /// base-by-type + 0.1 per distinct importance keyword present (capped
    /// at 0.1 total) + up to 0.2 proportional to length + 0.1 if the
    /// block carries a digit, clamped to `[0, 1]` and rounded to 2dp.
    fn score(text: &str, block_type: BlockType) -> f64 {
        let lower = text.to_lowercase();

        let keyword_bonus = if IMPORTANCE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            0.1
        } else {
            0.0
        };

        let length_bonus = (text.len() as f64 / 1000.0).min(1.0) * 0.2;
        let digit_bonus = if text.chars().any(|c| c.is_ascii_digit()) {
            0.1
        } else {
            0.0
        };

        let raw = block_type.base_score() + keyword_bonus + length_bonus + digit_bonus;
        (raw.clamp(0.0, 1.0) * 100.0).round() / 100.0
    }
}

pub struct DocumentParser;

impl DocumentParser {
    /// Extract an ordered list of Text Blocks from raw bytes, dispatching
    /// on the file extension recorded alongside the stored document.
    pub fn parse(bytes: &[u8], extension: Option<&str>) -> Result<Vec<TextBlock>> {
        debug!(extension = ?extension, bytes = bytes.len(), "parsing document");

        let blocks = match extension {
            Some("pdf") => Self::parse_pdf(bytes)?,
            Some("docx") => Self::parse_docx(bytes)?,
            Some("xlsx") | Some("xls") => Self::parse_spreadsheet(bytes)?,
            Some("csv") => Self::parse_csv(bytes)?,
            Some("md") => Self::parse_markdown(bytes)?,
            Some("html") | Some("htm") => Self::parse_html(bytes)?,
            _ => Self::parse_plain_text(bytes)?,
        };

        debug!(blocks = blocks.len(), "parsed document");
        Ok(blocks)
    }

    fn parse_pdf(bytes: &[u8]) -> Result<Vec<TextBlock>> {
        let doc = PdfDocument::load_mem(bytes).map_err(|e| anyhow!("failed to load pdf: {e}"))?;
        let pages = doc.get_pages();

        let mut blocks = Vec::new();
        for (page_num, _) in pages.iter() {
            let text = match doc.extract_text(&[*page_num]) {
                Ok(text) => text,
                Err(e) => {
                    warn!(page = page_num, error = %e, "failed to extract page text");
                    continue;
                }
            };

            for paragraph in split_into_paragraphs(&text) {
                let block_type = classify_block(&paragraph);
                blocks.push(TextBlock::new(paragraph, block_type, Some(*page_num as usize), None));
            }
        }

        Ok(blocks)
    }

    fn parse_docx(bytes: &[u8]) -> Result<Vec<TextBlock>> {
        let docx = read_docx(bytes).map_err(|e| anyhow!("failed to read docx: {e:?}"))?;
        let mut blocks = Vec::new();

        for child in docx.document.children {
            if let DocumentChild::Paragraph(paragraph) = child {
                let mut text = String::new();
                for run_child in paragraph.children {
                    if let ParagraphChild::Run(run) = run_child {
                        for text_child in run.children {
                            if let RunChild::Text(t) = text_child {
                                text.push_str(&t.text);
                            }
                        }
                    }
                }

                let text = text.trim().to_string();
                if !text.is_empty() {
                    let block_type = classify_block(&text);
                    blocks.push(TextBlock::new(text, block_type, None, None));
                }
            }
        }

        Ok(blocks)
    }

    /// Markdown headings, list items, and fenced code blocks are tracked
    /// as they arrive in the event stream so their type survives (plain
    /// HTML round-tripping would lose it); the most recent heading text
    /// becomes the `section` every following block is tagged with.
    fn parse_markdown(bytes: &[u8]) -> Result<Vec<TextBlock>> {
        let raw = Self::decode_text(bytes)?;
        let parser = MdParser::new_ext(&raw, Options::all());

        let mut blocks = Vec::new();
        let mut buffer = String::new();
        let mut current_type = BlockType::Paragraph;
        let mut current_section: Option<String> = None;

        for event in parser {
            match event {
                Event::Start(Tag::Heading { .. }) => {
                    buffer.clear();
                    current_type = BlockType::Title;
                }
                Event::Start(Tag::Item) => {
                    buffer.clear();
                    current_type = BlockType::List;
                }
                Event::Start(Tag::CodeBlock(_)) => {
                    buffer.clear();
                    current_type = BlockType::Code;
                }
                Event::Start(Tag::Paragraph) => {
                    buffer.clear();
                    current_type = BlockType::Paragraph;
                }
                Event::Text(t) | Event::Code(t) => buffer.push_str(&t),
                Event::SoftBreak | Event::HardBreak => buffer.push(' '),
                Event::End(
                    TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock | TagEnd::Paragraph,
                ) => {
                    let text = buffer.trim().to_string();
                    buffer.clear();
                    if text.is_empty() {
                        continue;
                    }

                    if current_type == BlockType::Title {
                        current_section = Some(text.clone());
                    }

                    blocks.push(TextBlock::new(text, current_type, None, current_section.clone()));
                }
                _ => {}
            }
        }

        Ok(blocks)
    }

    fn parse_html(bytes: &[u8]) -> Result<Vec<TextBlock>> {
        let raw = Self::decode_text(bytes)?;
        let document = Html::parse_document(&raw);
        let body_selector = Selector::parse("body").map_err(|_| anyhow!("bad selector"))?;

        let mut text = String::new();
        for element in document.select(&body_selector) {
            text.push_str(&element.text().collect::<String>());
            text.push('\n');
        }

        let cleaned = text
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        Self::blocks_from_plain_text(&cleaned)
    }

    fn parse_plain_text(bytes: &[u8]) -> Result<Vec<TextBlock>> {
        let text = Self::decode_text(bytes)?;
        Self::blocks_from_plain_text(&text)
    }

    fn blocks_from_plain_text(text: &str) -> Result<Vec<TextBlock>> {
        let blocks = split_into_paragraphs(text)
            .into_iter()
            .map(|p| {
                let block_type = classify_block(&p);
                TextBlock::new(p, block_type, None, None)
            })
            .collect();
        Ok(blocks)
    }

    /// Each non-empty row becomes a `table_row` block tagged with the
    /// sheet name as its section; a final `summary` block records row
    /// and column counts so the chunker has something to anchor a
    /// sheet-overview chunk on.
    fn parse_spreadsheet(bytes: &[u8]) -> Result<Vec<TextBlock>> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| anyhow!("failed to open spreadsheet: {e}"))?;

        let mut blocks = Vec::new();
        for sheet_name in workbook.sheet_names().to_vec() {
            let range = match workbook.worksheet_range(&sheet_name) {
                Ok(range) => range,
                Err(e) => {
                    warn!(sheet = %sheet_name, error = %e, "failed to read worksheet");
                    continue;
                }
            };

            let mut row_count = 0usize;
            let mut col_count = 0usize;
            for row in range.rows() {
                let cells: Vec<String> = row.iter().map(render_cell).collect();
                let line = cells.join("\t");
                if line.trim().is_empty() {
                    continue;
                }

                row_count += 1;
                col_count = col_count.max(cells.len());
                blocks.push(TextBlock::new(
                    line,
                    BlockType::TableRow,
                    None,
                    Some(sheet_name.clone()),
                ));
            }

            blocks.push(TextBlock::new(
                format!("Sheet \"{sheet_name}\": {row_count} rows, {col_count} columns"),
                BlockType::Summary,
                None,
                Some(sheet_name),
            ));
        }

        Ok(blocks)
    }

    fn parse_csv(bytes: &[u8]) -> Result<Vec<TextBlock>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes);

        let mut blocks = Vec::new();
        let mut row_count = 0usize;
        let mut col_count = 0usize;

        for record in reader.records() {
            let record = record.map_err(|e| anyhow!("failed to read csv row: {e}"))?;
            let line = record.iter().collect::<Vec<_>>().join("\t");
            if line.trim().is_empty() {
                continue;
            }

            row_count += 1;
            col_count = col_count.max(record.len());
            blocks.push(TextBlock::new(line, BlockType::TableRow, None, None));
        }

        blocks.push(TextBlock::new(
            format!("{row_count} rows, {col_count} columns"),
            BlockType::Summary,
            None,
            None,
        ));

        Ok(blocks)
    }

    fn decode_text(bytes: &[u8]) -> Result<String> {
        if let Ok(text) = std::str::from_utf8(bytes) {
            return Ok(text.to_string());
        }

        let (text, _, had_errors) = UTF_8.decode(bytes);
        if had_errors {
            warn!("document bytes contained invalid UTF-8, lossily decoded");
        }
        Ok(text.into_owned())
    }
}

fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(d) => format!("{d:?}"),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#ERR:{e:?}"),
    }
}

fn split_into_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

/// Cheap structural guess used wherever a format doesn't already carry
/// its own block typing (plain text, PDF page text, DOCX paragraphs).
fn classify_block(text: &str) -> BlockType {
    let trimmed = text.trim();
    let first_line = trimmed.lines().next().unwrap_or(trimmed);

    if trimmed.lines().count() <= 1
        && trimmed.len() <= 80
        && !trimmed.ends_with('.')
        && !trimmed.ends_with(',')
    {
        return BlockType::Title;
    }

    if first_line.starts_with('-') || first_line.starts_with('*') || first_line.starts_with('•') {
        return BlockType::List;
    }

    if trimmed
        .lines()
        .next()
        .map(|l| l.trim_start().chars().next().is_some_and(|c| c.is_ascii_digit()))
        .unwrap_or(false)
        && first_line.contains(". ")
    {
        return BlockType::List;
    }

    if trimmed.lines().filter(|l| l.contains('\t')).count() >= 2 {
        return BlockType::Table;
    }

    let code_markers = ["fn ", "def ", "class ", "{", "};", "import ", "function "];
    if code_markers.iter().any(|m| trimmed.contains(m)) {
        return BlockType::Code;
    }

    BlockType::Paragraph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_becomes_one_paragraph_block() {
        let blocks = DocumentParser::parse(b"hello workspace", Some("txt")).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, "hello workspace");
        assert_eq!(blocks[0].page, None);
    }

    #[test]
    fn blank_line_separated_text_splits_into_multiple_blocks() {
        let blocks = DocumentParser::parse(b"First paragraph here.\n\nSecond paragraph here.", Some("txt")).unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn markdown_headings_become_title_blocks() {
        let blocks = DocumentParser::parse(b"# Title\n\nSome body text here.", Some("md")).unwrap();
        assert!(blocks.iter().any(|b| b.block_type == BlockType::Title && b.text == "Title"));
        assert!(blocks.iter().any(|b| b.block_type == BlockType::Paragraph));
    }

    #[test]
    fn markdown_list_items_become_list_blocks() {
        let blocks = DocumentParser::parse(b"- one\n- two\n- three", Some("md")).unwrap();
        assert!(blocks.iter().all(|b| b.block_type == BlockType::List));
        assert_eq!(blocks.len(), 3);
    }

    #[test]
    fn html_body_text_is_extracted() {
        let html = b"<html><head><title>ignored</title></head><body><p>Visible text</p></body></html>";
        let blocks = DocumentParser::parse(html, Some("html")).unwrap();
        assert!(blocks.iter().any(|b| b.text.contains("Visible text")));
    }

    #[test]
    fn csv_rows_become_table_row_blocks_with_trailing_summary() {
        let blocks = DocumentParser::parse(b"name,age\nalice,30\nbob,40", Some("csv")).unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(blocks[..3].iter().all(|b| b.block_type == BlockType::TableRow));
        assert_eq!(blocks.last().unwrap().block_type, BlockType::Summary);
        assert!(blocks.last().unwrap().text.contains("3 rows"));
    }

    #[test]
    fn importance_score_is_clamped_and_rounded() {
        let block = TextBlock::new("short".to_string(), BlockType::Paragraph, None, None);
        assert!(block.importance >= 0.0 && block.importance <= 1.0);

        let long_text = "a".repeat(5000);
        let block = TextBlock::new(long_text, BlockType::Title, None, None);
        assert_eq!(block.importance, 1.0);
    }

    #[test]
    fn unrecognized_extension_falls_back_to_text_decode() {
        let blocks = DocumentParser::parse(b"raw bytes", Some("bin")).unwrap();
        assert_eq!(blocks[0].text, "raw bytes");
    }
}
