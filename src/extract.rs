//! Content extraction: raw bytes in, normalized text plus metadata out.
//!
//! Web pages are reduced to a structure-preserving plain-text form: script,
//! style, and chrome elements are dropped, headings survive as ATX markers,
//! and outbound anchors are collected for the crawl frontier. Repository
//! files are classified by extension and filename patterns.
//!
//! The content hash is computed over the *normalized* text, never the raw
//! bytes, so a whitespace-only re-fetch hashes identically and the dedup
//! layer can skip it. Everything here is pure; the caller does the I/O.

use scraper::{ElementRef, Html, Node, Selector};
use sha2::{Digest, Sha256};

use crate::models::{DocType, ExtractedContent, FileClass};

/// Anchor cap per page; beyond this a page contributes no more frontier
/// candidates.
const MAX_ANCHORS: usize = 50;

/// Elements whose subtrees never contribute content text.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "noscript", "svg", "iframe", "form",
    "template",
];

/// Extract normalized text and structural metadata from an HTML page.
pub fn extract_html(html: &str, url: &str) -> ExtractedContent {
    let doc = Html::parse_document(html);

    let mut renderer = TextRenderer::default();
    if let Ok(body_sel) = Selector::parse("body") {
        if let Some(body) = doc.select(&body_sel).next() {
            renderer.render_element(body);
        }
    }

    let text = normalize_text(&renderer.out);
    let title = extract_title(&doc);
    let anchors = extract_anchors(&doc);
    let canonical_url = extract_canonical(&doc).unwrap_or_else(|| url.to_string());

    let language = html_lang(&doc).unwrap_or_else(|| detect_language(&text).to_string());

    let content_hash = content_hash(&text);

    ExtractedContent {
        text,
        title,
        heading_path: renderer.headings,
        anchors,
        language,
        canonical_url,
        content_hash,
    }
}

/// SHA-256 hex digest of normalized text — the dedup key.
pub fn content_hash(normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse runs of spaces/tabs and runs of 3+ newlines.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_lines = 0usize;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_lines += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_lines > 0 {
                out.push('\n');
            }
        }
        blank_lines = 0;
        out.push_str(&collapsed);
    }

    out
}

fn extract_title(doc: &Html) -> Option<String> {
    if let Ok(sel) = Selector::parse("title") {
        if let Some(el) = doc.select(&sel).next() {
            let title = inline_text(el);
            if !title.is_empty() {
                return Some(title);
            }
        }
    }

    // Fall back to the first heading
    if let Ok(sel) = Selector::parse("h1") {
        if let Some(el) = doc.select(&sel).next() {
            let title = inline_text(el);
            if !title.is_empty() {
                return Some(title);
            }
        }
    }

    None
}

fn extract_canonical(doc: &Html) -> Option<String> {
    let sel = Selector::parse(r#"link[rel="canonical"]"#).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(|href| href.to_string())
}

fn extract_anchors(doc: &Html) -> Vec<String> {
    let mut anchors = Vec::new();
    let mut seen = std::collections::HashSet::new();

    if let Ok(sel) = Selector::parse("a[href]") {
        for el in doc.select(&sel) {
            if let Some(href) = el.value().attr("href") {
                if href.is_empty() || href.starts_with('#') {
                    continue;
                }
                if seen.insert(href.to_string()) {
                    anchors.push(href.to_string());
                    if anchors.len() >= MAX_ANCHORS {
                        break;
                    }
                }
            }
        }
    }

    anchors
}

fn html_lang(doc: &Html) -> Option<String> {
    let lang = doc.root_element().value().attr("lang")?;
    let lang = lang.trim();
    if lang.is_empty() {
        return None;
    }
    // "en-US" -> "en"
    Some(lang.split('-').next().unwrap_or(lang).to_ascii_lowercase())
}

/// Script-range heuristic over a small sample of the text.
pub fn detect_language(text: &str) -> &'static str {
    let sample: String = text.chars().take(1000).collect();

    for c in sample.chars() {
        match c {
            '\u{0400}'..='\u{04FF}' => return "ru",
            '\u{4E00}'..='\u{9FFF}' => return "zh",
            '\u{3040}'..='\u{30FF}' => return "ja",
            _ => {}
        }
    }

    "en"
}

/// Renders content elements to plain text, headings as ATX markers.
#[derive(Default)]
struct TextRenderer {
    out: String,
    headings: Vec<String>,
}

impl TextRenderer {
    fn render_element(&mut self, el: ElementRef) {
        let name = el.value().name();
        if SKIP_TAGS.contains(&name) {
            return;
        }

        if let Some(level) = heading_level(name) {
            let text = inline_text(el);
            if !text.is_empty() {
                if level == 2 {
                    self.headings.push(text.clone());
                }
                self.push_block_break();
                for _ in 0..level {
                    self.out.push('#');
                }
                self.out.push(' ');
                self.out.push_str(&text);
                self.push_block_break();
            }
            return;
        }

        if name == "br" {
            self.out.push('\n');
            return;
        }

        let block = is_block(name);
        if block {
            self.push_line_break();
        }

        for child in el.children() {
            match child.value() {
                Node::Text(t) => {
                    let trimmed = t.trim();
                    if !trimmed.is_empty() {
                        if !self.out.is_empty() && !self.out.ends_with(char::is_whitespace) {
                            self.out.push(' ');
                        }
                        self.out.push_str(trimmed);
                    }
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.render_element(child_el);
                    }
                }
                _ => {}
            }
        }

        if block {
            self.push_line_break();
        }
    }

    fn push_line_break(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn push_block_break(&mut self) {
        self.push_line_break();
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }
}

fn heading_level(name: &str) -> Option<usize> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "ul"
            | "ol"
            | "li"
            | "blockquote"
            | "pre"
            | "table"
            | "tr"
            | "body"
            | "figure"
            | "figcaption"
            | "dl"
            | "dt"
            | "dd"
    )
}

fn inline_text(el: ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classify a repository file by extension and filename patterns.
/// `*.test.*` and `*.spec.*` names force the `test` type regardless of
/// extension.
pub fn classify_file(relative_path: &str) -> FileClass {
    let file_name = relative_path
        .rsplit('/')
        .next()
        .unwrap_or(relative_path)
        .to_ascii_lowercase();

    let ext = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");

    let doc_type = if file_name.contains(".test.") || file_name.contains(".spec.") {
        DocType::Test
    } else {
        doc_type_for_ext(ext)
    };

    FileClass {
        doc_type,
        language: language_for_ext(ext),
    }
}

fn doc_type_for_ext(ext: &str) -> DocType {
    match ext {
        "ts" | "tsx" | "js" | "jsx" | "py" | "go" | "rs" | "java" | "c" | "cpp" | "h" | "hpp"
        | "cs" | "rb" | "php" | "swift" | "kt" | "sql" | "sh" | "bash" | "zsh" => DocType::Code,
        "md" | "mdx" => DocType::Markdown,
        "json" | "yaml" | "yml" | "toml" | "xml" => DocType::Config,
        _ => DocType::Other,
    }
}

fn language_for_ext(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "py" => "python",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "md" | "mdx" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "sql" => "sql",
        "sh" | "bash" => "bash",
        "zsh" => "zsh",
        _ => return None,
    };
    Some(lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title_from_title_tag() {
        let html = "<html><head><title>Test Page</title></head><body><h1>Other</h1></body></html>";
        let content = extract_html(html, "https://a.test/");
        assert_eq!(content.title.as_deref(), Some("Test Page"));
    }

    #[test]
    fn test_extract_title_h1_fallback() {
        let html = "<html><head><title>  </title></head><body><h1>Main Heading</h1></body></html>";
        let content = extract_html(html, "https://a.test/");
        assert_eq!(content.title.as_deref(), Some("Main Heading"));
    }

    #[test]
    fn test_skips_chrome_elements() {
        let html = r#"
            <html><body>
                <nav>Navigation menu</nav>
                <script>var x = 1;</script>
                <article><p>Real content here.</p></article>
                <footer>Footer text</footer>
            </body></html>
        "#;
        let content = extract_html(html, "https://a.test/");
        assert!(content.text.contains("Real content here."));
        assert!(!content.text.contains("Navigation menu"));
        assert!(!content.text.contains("var x"));
        assert!(!content.text.contains("Footer text"));
    }

    #[test]
    fn test_headings_become_markers_and_path() {
        let html = "<html><body><h1>Guide</h1><h2>Install</h2><p>steps</p><h2>Usage</h2></body></html>";
        let content = extract_html(html, "https://a.test/");
        assert!(content.text.contains("# Guide"));
        assert!(content.text.contains("## Install"));
        assert_eq!(content.heading_path, vec!["Install", "Usage"]);
    }

    #[test]
    fn test_anchors_deduped_and_fragments_skipped() {
        let html = r##"
            <html><body>
                <a href="/a">one</a>
                <a href="/a">dup</a>
                <a href="#frag">frag</a>
                <a href="/b">two</a>
            </body></html>
        "##;
        let content = extract_html(html, "https://a.test/");
        assert_eq!(content.anchors, vec!["/a", "/b"]);
    }

    #[test]
    fn test_anchor_cap() {
        let mut html = String::from("<html><body>");
        for i in 0..80 {
            html.push_str(&format!("<a href=\"/page/{}\">l</a>", i));
        }
        html.push_str("</body></html>");
        let content = extract_html(&html, "https://a.test/");
        assert_eq!(content.anchors.len(), MAX_ANCHORS);
    }

    #[test]
    fn test_canonical_url_preferred() {
        let html = r#"<html><head><link rel="canonical" href="https://a.test/canonical"></head><body></body></html>"#;
        let content = extract_html(html, "https://a.test/?utm=x");
        assert_eq!(content.canonical_url, "https://a.test/canonical");
    }

    #[test]
    fn test_language_from_lang_attr() {
        let html = r#"<html lang="de-DE"><body><p>Hallo</p></body></html>"#;
        let content = extract_html(html, "https://a.test/");
        assert_eq!(content.language, "de");
    }

    #[test]
    fn test_language_heuristic() {
        assert_eq!(detect_language("привет мир"), "ru");
        assert_eq!(detect_language("你好世界"), "zh");
        assert_eq!(detect_language("こんにちは"), "ja");
        assert_eq!(detect_language("hello world"), "en");
    }

    #[test]
    fn test_whitespace_only_changes_hash_identically() {
        let a = extract_html(
            "<html><body><p>Hello   world</p></body></html>",
            "https://a.test/",
        );
        let b = extract_html(
            "<html><body><p>Hello world</p></body></html>",
            "https://a.test/",
        );
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_content_change_changes_hash() {
        let a = extract_html("<html><body><p>one</p></body></html>", "https://a.test/");
        let b = extract_html("<html><body><p>two</p></body></html>", "https://a.test/");
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_normalize_collapses_blank_runs() {
        let text = "a\n\n\n\nb\t\tc";
        assert_eq!(normalize_text(text), "a\n\nb c");
    }

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(classify_file("src/main.rs").doc_type, DocType::Code);
        assert_eq!(classify_file("src/main.rs").language, Some("rust"));
        assert_eq!(classify_file("README.md").doc_type, DocType::Markdown);
        assert_eq!(classify_file("config.yaml").doc_type, DocType::Config);
        assert_eq!(classify_file("LICENSE").doc_type, DocType::Other);
    }

    #[test]
    fn test_test_filename_overrides_extension() {
        assert_eq!(classify_file("src/app.test.ts").doc_type, DocType::Test);
        assert_eq!(classify_file("lib/util.spec.js").doc_type, DocType::Test);
        // Language label still comes from the extension.
        assert_eq!(classify_file("src/app.test.ts").language, Some("typescript"));
    }
}
