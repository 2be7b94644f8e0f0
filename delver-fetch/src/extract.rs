//! Text extraction from fetched documents

use delver_core::{DelverError, DelverResult, ErrorContext, FetchErrorKind};
use scraper::{ElementRef, Html, Selector};
use std::path::Path;

fn text_content(elem: ElementRef<'_>) -> String {
    elem.text().collect::<Vec<_>>().join(" ")
}

fn compact_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract the page title and readable body text from an HTML document.
/// Prefers the article/main region, falling back to the whole body; text
/// is taken from paragraph-level blocks with whitespace compacted.
pub fn extract_html_text(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|elem| compact_ws(&text_content(elem)))
        .filter(|t| !t.is_empty());

    let root = ["article", "main", "body"]
        .iter()
        .filter_map(|name| Selector::parse(name).ok())
        .find_map(|sel| document.select(&sel).next());

    let Some(root) = root else {
        return (title, String::new());
    };

    let Ok(block_sel) = Selector::parse("h1, h2, h3, h4, p, li, blockquote, pre") else {
        return (title, compact_ws(&text_content(root)));
    };

    let mut blocks: Vec<String> = Vec::new();
    for elem in root.select(&block_sel) {
        let text = compact_ws(&text_content(elem));
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    // Pages without paragraph structure still get their raw text.
    if blocks.is_empty() {
        return (title, compact_ws(&text_content(root)));
    }

    (title, blocks.join("\n\n"))
}

/// Extract text from a local PDF file, rendering at most `max_pages` pages.
/// Runs lopdf synchronously; callers dispatch through `spawn_blocking`.
pub fn extract_pdf_text(path: &Path, max_pages: usize) -> DelverResult<String> {
    let document = lopdf::Document::load(path).map_err(|e| DelverError::Parse {
        message: format!("Failed to load PDF: {}", e),
        context: ErrorContext::new("extract").with_operation("load_pdf"),
    })?;

    let pages: Vec<u32> = document
        .get_pages()
        .keys()
        .copied()
        .take(max_pages)
        .collect();

    if pages.is_empty() {
        return Err(DelverError::Fetch {
            kind: FetchErrorKind::UnsupportedType,
            url: path.display().to_string(),
            context: ErrorContext::new("extract").with_operation("extract_pdf"),
        });
    }

    document.extract_text(&pages).map_err(|e| DelverError::Parse {
        message: format!("Failed to extract PDF text: {}", e),
        context: ErrorContext::new("extract").with_operation("extract_pdf"),
    })
}

/// Truncate text to at most `max_chars` characters
pub fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text
    } else {
        text.chars().take(max_chars).collect()
    }
}
