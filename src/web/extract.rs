//! HTML to text extraction for fetched documents.
//!
//! Keeps the title and the main readable region (`<main>`, then `<article>`,
//! then `<body>`), drops page chrome and scripts, and rejects pages whose
//! remaining text is too short to be worth scoring.

use scraper::{ElementRef, Html, Selector};

/// Minimum characters of extracted text for a document to be kept.
pub const MIN_TEXT_CHARS: usize = 250;

/// Content regions in order of preference.
const REGION_SELECTORS: [&str; 3] = ["main", "article", "body"];

/// Elements whose text never counts as content.
const DROPPED_ELEMENTS: [&str; 8] = [
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form",
];

/// Elements that start a new line of text.
const BLOCK_ELEMENTS: [&str; 18] = [
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "blockquote",
    "pre", "ul", "ol", "table", "dd",
];

/// Title and readable text of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub title: Option<String>,
    pub text: String,
}

/// Turns raw fetched bytes into readable text.
pub trait TextExtractor: Send + Sync {
    /// Returns `None` when the document has no usable text.
    fn extract(&self, raw: &[u8]) -> Option<ExtractedText>;
}

/// `scraper`-based extractor for HTML and plain-text documents.
#[derive(Debug, Clone)]
pub struct HtmlTextExtractor {
    min_chars: usize,
}

impl Default for HtmlTextExtractor {
    fn default() -> Self {
        Self {
            min_chars: MIN_TEXT_CHARS,
        }
    }
}

impl HtmlTextExtractor {
    pub fn with_min_chars(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl TextExtractor for HtmlTextExtractor {
    fn extract(&self, raw: &[u8]) -> Option<ExtractedText> {
        let html = String::from_utf8_lossy(raw);
        let document = Html::parse_document(&html);

        let title = Selector::parse("title")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let region = REGION_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .find_map(|sel| document.select(&sel).next())
            .unwrap_or_else(|| document.root_element());

        let text = region_text(region)
            .lines()
            .map(collapse_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if text.chars().count() < self.min_chars {
            return None;
        }
        Some(ExtractedText { title, text })
    }
}

/// Text under `region`, skipping dropped elements, with a line break before
/// every block element.
fn region_text(region: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in region.descendants() {
        if let Some(text) = node.value().as_text() {
            let dropped = node
                .ancestors()
                .take_while(|a| a.id() != region.id())
                .filter_map(|a| a.value().as_element())
                .any(|el| DROPPED_ELEMENTS.contains(&el.name()));
            if !dropped {
                out.push_str(text);
            }
        } else if let Some(el) = node.value().as_element() {
            if BLOCK_ELEMENTS.contains(&el.name()) {
                out.push('\n');
            }
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraph(words: usize) -> String {
        vec!["ownership"; words].join(" ")
    }

    #[test]
    fn test_prefers_main_and_drops_chrome() {
        let html = format!(
            "<html><head><title> Rust &amp; Memory </title><script>var x = 1;</script></head>\
             <body><nav>Home | About</nav><main><h1>Intro</h1><p>{}</p></main>\
             <footer>copyright</footer></body></html>",
            paragraph(40)
        );

        let extracted = HtmlTextExtractor::default()
            .extract(html.as_bytes())
            .expect("long enough");
        assert_eq!(extracted.title.as_deref(), Some("Rust & Memory"));
        assert!(extracted.text.starts_with("Intro\n"));
        assert!(!extracted.text.contains("Home"));
        assert!(!extracted.text.contains("copyright"));
        assert!(!extracted.text.contains("var x"));
    }

    #[test]
    fn test_falls_back_to_body() {
        let html = format!("<body><header>Menu</header><div>{}</div></body>", paragraph(40));
        let extracted = HtmlTextExtractor::default().extract(html.as_bytes()).unwrap();
        assert!(extracted.title.is_none());
        assert!(!extracted.text.contains("Menu"));
    }

    #[test]
    fn test_article_used_without_main() {
        let html = format!(
            "<body><div>sidebar links</div><article><p>{}</p></article></body>",
            paragraph(40)
        );
        let extracted = HtmlTextExtractor::default().extract(html.as_bytes()).unwrap();
        assert!(!extracted.text.contains("sidebar"));
    }

    #[test]
    fn test_unclosed_main_still_extracted() {
        let html = format!("<body><main><p>{}", paragraph(40));
        let extracted = HtmlTextExtractor::default()
            .extract(html.as_bytes())
            .expect("unclosed main is still content");
        assert_eq!(extracted.text, paragraph(40));
    }

    #[test]
    fn test_nested_markup_inside_main() {
        let html = format!(
            "<body><main><div><section><p>{}</p></section></div><p>closing words</p></main>\
             <p>outside main</p></body>",
            paragraph(40)
        );
        let extracted = HtmlTextExtractor::default().extract(html.as_bytes()).unwrap();
        assert!(extracted.text.ends_with("closing words"));
        assert!(!extracted.text.contains("outside main"));
    }

    #[test]
    fn test_chrome_inside_main_does_not_count() {
        // Long navigation inside <main>, short real content.
        let html = format!(
            "<body><main><nav>{}</nav><aside>{}</aside><p>Short body.</p></main></body>",
            paragraph(30),
            paragraph(30)
        );
        assert!(HtmlTextExtractor::default().extract(html.as_bytes()).is_none());
    }

    #[test]
    fn test_script_with_closing_tag_in_string() {
        let html = format!(
            "<body><main><script>var s = \"</scr\" + \"ipt>\"; var t = '<p>';</script><p>{}</p></main></body>",
            paragraph(40)
        );
        let extracted = HtmlTextExtractor::default().extract(html.as_bytes()).unwrap();
        assert_eq!(extracted.text, paragraph(40));
    }

    #[test]
    fn test_short_documents_rejected() {
        let html = "<html><body><p>Too short.</p></body></html>";
        assert!(HtmlTextExtractor::default().extract(html.as_bytes()).is_none());
        assert!(HtmlTextExtractor::with_min_chars(5)
            .extract(html.as_bytes())
            .is_some());
    }

    #[test]
    fn test_plain_text_passes_through() {
        let text = paragraph(50);
        let extracted = HtmlTextExtractor::default().extract(text.as_bytes()).unwrap();
        assert_eq!(extracted.text, text);
    }

    #[test]
    fn test_entities_decoded() {
        let html = format!("<body><p>a&#x41;&#66;&amp;lt; {}</p></body>", paragraph(40));
        let extracted = HtmlTextExtractor::default().extract(html.as_bytes()).unwrap();
        assert!(extracted.text.starts_with("aAB&lt; "));
    }
}
