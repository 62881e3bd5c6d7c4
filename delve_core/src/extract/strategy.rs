//! Text extraction strategies over a parsed HTML document.

use crate::utils::{collapse_whitespace, strip_control_chars, truncate_with_marker};
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashMap;

pub const TRUNCATION_MARKER: &str = " [truncated]";

/// Elements that never contribute article text.
const BOILERPLATE_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "form", "script", "style", "noscript", "template", "svg",
    "iframe", "button", "select",
];

/// Elements the fallback strategy drops.
const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "pre", "table", "tr", "td", "th", "dd", "dt", "figcaption", "hr",
];

/// Selectors for containers that usually hold the article body.
const ARTICLE_SELECTORS: &[&str] = &[
    "article",
    "[itemprop='articleBody']",
    "main",
    "[role='main']",
    ".post-content",
    ".article-content",
    ".article__body",
    ".entry-content",
    ".story-body",
    ".post-body",
    "#content",
    ".content",
];

/// A selector match shorter than this is treated as a teaser and density
/// scoring gets a chance to find something better.
const MIN_SELECTOR_CHARS: usize = 140;
/// Paragraphs shorter than this are ignored when scoring containers.
const MIN_PARAGRAPH_CHARS: usize = 25;

/// Turns a parsed document into plain text.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the extracted text, or an empty string when nothing usable was found.
    fn extract(&self, document: &Html) -> String;
}

/// Boilerplate-aware extraction: article selectors first, then paragraph
/// density scoring with a link-density penalty.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadableStrategy;

/// Every visible text node in `<body>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextDumpStrategy;

impl ExtractionStrategy for ReadableStrategy {
    fn name(&self) -> &'static str {
        "readable"
    }

    fn extract(&self, document: &Html) -> String {
        let mut teaser = String::new();
        for raw in ARTICLE_SELECTORS {
            let Ok(selector) = Selector::parse(raw) else {
                continue;
            };
            for element in document.select(&selector) {
                if has_ancestor_in(element, BOILERPLATE_TAGS) {
                    continue;
                }
                let text = element_text(element, BOILERPLATE_TAGS);
                let len = text.trim().chars().count();
                if len >= MIN_SELECTOR_CHARS {
                    return text;
                }
                if len > teaser.trim().chars().count() {
                    teaser = text;
                }
            }
        }

        match best_scored_container(document) {
            Some(element) => {
                let text = element_text(element, BOILERPLATE_TAGS);
                if text.trim().chars().count() >= teaser.trim().chars().count() {
                    text
                } else {
                    teaser
                }
            }
            None => teaser,
        }
    }
}

impl ExtractionStrategy for TextDumpStrategy {
    fn name(&self) -> &'static str {
        "text_dump"
    }

    fn extract(&self, document: &Html) -> String {
        let root = Selector::parse("body")
            .ok()
            .and_then(|sel| document.select(&sel).next())
            .unwrap_or_else(|| document.root_element());
        element_text(root, INVISIBLE_TAGS)
    }
}

/// Score paragraph parents (full weight) and grandparents (half weight), then
/// discount each candidate by the share of its text that sits inside links.
fn best_scored_container(document: &Html) -> Option<ElementRef<'_>> {
    let paragraph_sel = Selector::parse("p, pre, blockquote").ok()?;
    let mut scores = HashMap::new();

    for paragraph in document.select(&paragraph_sel) {
        if has_ancestor_in(paragraph, BOILERPLATE_TAGS) {
            continue;
        }
        let len = element_text(paragraph, BOILERPLATE_TAGS).trim().chars().count();
        if len < MIN_PARAGRAPH_CHARS {
            continue;
        }
        // Commas are a cheap signal of prose versus menus.
        let commas = paragraph.text().map(|t| t.matches(',').count()).sum::<usize>();
        let score = 1.0 + len.min(300) as f64 / 100.0 + commas as f64;

        let parent = paragraph.parent().and_then(ElementRef::wrap);
        if let Some(parent) = parent {
            scores.entry(parent.id()).or_insert((parent, 0.0)).1 += score;
            if let Some(grandparent) = parent.parent().and_then(ElementRef::wrap) {
                scores
                    .entry(grandparent.id())
                    .or_insert((grandparent, 0.0))
                    .1 += score / 2.0;
            }
        }
    }

    scores
        .into_values()
        .map(|(element, score)| (element, score * (1.0 - link_density(element))))
        .filter(|(_, score)| *score > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(element, _)| element)
}

fn link_density(element: ElementRef<'_>) -> f64 {
    let total = element_text(element, BOILERPLATE_TAGS).chars().count();
    if total == 0 {
        return 0.0;
    }
    let Ok(link_sel) = Selector::parse("a") else {
        return 0.0;
    };
    let linked: usize = element
        .select(&link_sel)
        .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

fn has_ancestor_in(element: ElementRef<'_>, tags: &[&str]) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .map(|e| tags.contains(&e.name()))
            .unwrap_or(false)
    })
}

/// Text under `element`, skipping subtrees rooted at any of `skip`. Block
/// elements are separated by newlines.
pub fn element_text(element: ElementRef<'_>, skip: &[&str]) -> String {
    let mut out = String::new();
    push_text(element, skip, &mut out);
    out
}

fn push_text(element: ElementRef<'_>, skip: &[&str], out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if skip.contains(&name) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    push_text(child_el, skip, out);
                }
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Control-character stripping, whitespace collapsing and truncation to
/// `max_chars` (marker included). Input is DOM text, so entities are already
/// decoded and are left alone.
pub fn normalize_text(raw: &str, max_chars: usize) -> String {
    let cleaned = collapse_whitespace(&strip_control_chars(raw));
    truncate_with_marker(cleaned.trim(), max_chars, TRUNCATION_MARKER)
}

/// Document `<title>`, or `None` when absent or blank.
pub fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let raw: String = document.select(&selector).next()?.text().collect();
    let title = collapse_whitespace(&raw).replace('\n', " ");
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_PAGE: &str = r#"
    <html><head><title>  Rates &amp; Small Caps  </title><script>var x = 1;</script></head>
    <body>
      <header><nav><a href="/">Home</a> <a href="/markets">Markets</a></nav></header>
      <article>
        <h1>How rates hit small caps</h1>
        <p>Smaller companies tend to carry more floating-rate debt, so a rising policy rate feeds directly into their interest expense.</p>
        <p>That sensitivity shows up in earnings revisions, which lag the rate move by a quarter or two.</p>
        <aside>Subscribe to our newsletter</aside>
      </article>
      <footer>Copyright 2024</footer>
    </body></html>
    "#;

    const DIV_SOUP_PAGE: &str = r#"
    <html><body>
      <div id="menu"><p><a href="/a">A very long navigation link number one here</a></p>
        <p><a href="/b">Another long navigation link number two here</a></p></div>
      <div id="story">
        <p>The central bank kept rates unchanged on Wednesday, citing sticky services inflation, a tight labour market, and uncertain energy prices.</p>
        <p>Analysts expect the first cut no earlier than the autumn, although futures markets price a somewhat earlier move.</p>
        <p>Smaller listed companies, which rely more on bank lending, have lagged the broader index this year.</p>
      </div>
    </body></html>
    "#;

    #[test]
    fn readable_prefers_article_and_drops_boilerplate() {
        let document = Html::parse_document(ARTICLE_PAGE);
        let text = normalize_text(&ReadableStrategy.extract(&document), 3000);
        assert!(text.starts_with("How rates hit small caps"));
        assert!(text.contains("floating-rate debt"));
        assert!(!text.contains("Subscribe"));
        assert!(!text.contains("Markets"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn readable_scores_dense_paragraphs_over_link_lists() {
        let document = Html::parse_document(DIV_SOUP_PAGE);
        let text = ReadableStrategy.extract(&document);
        assert!(text.contains("central bank kept rates unchanged"));
        assert!(!text.contains("navigation link"));
    }

    #[test]
    fn readable_returns_empty_for_contentless_pages() {
        let document = Html::parse_document("<html><body><nav><a href='/'>Home</a></nav></body></html>");
        assert!(ReadableStrategy.extract(&document).trim().is_empty());
    }

    #[test]
    fn text_dump_keeps_visible_text_only() {
        let document = Html::parse_document(
            "<html><body><script>alert(1)</script><style>p{}</style><span>Quarterly</span> <b>results</b><noscript>enable js</noscript></body></html>",
        );
        let text = normalize_text(&TextDumpStrategy.extract(&document), 3000);
        assert_eq!(text, "Quarterly results");
    }

    #[test]
    fn title_is_decoded_and_trimmed() {
        let document = Html::parse_document(ARTICLE_PAGE);
        assert_eq!(extract_title(&document).as_deref(), Some("Rates & Small Caps"));
        let untitled = Html::parse_document("<html><head><title>   </title></head></html>");
        assert_eq!(extract_title(&untitled), None);
    }

    #[test]
    fn normalize_truncates_with_marker_inside_limit() {
        let raw = "word ".repeat(100);
        let text = normalize_text(&raw, 40);
        assert_eq!(text.chars().count(), 40);
        assert!(text.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn normalize_strips_controls_and_collapses_blank_lines() {
        let text = normalize_text("a\u{0000}b  \t c\n\n\n\nd & e", 3000);
        assert_eq!(text, "ab c\n\nd & e");
    }

    #[test]
    fn escaped_markup_on_the_page_stays_literal() {
        let document = Html::parse_document(
            "<html><head><title>The &amp;lt;b&amp;gt; tag</title></head><body><article>\
             <p>To make text bold, wrap it in &lt;b&gt; and close it with &lt;/b&gt;. \
             Entities such as &amp;amp; are shown escaped on purpose in this tutorial.</p>\
             </article></body></html>",
        );
        let text = normalize_text(&ReadableStrategy.extract(&document), 3000);
        assert!(text.contains("wrap it in <b> and close it with </b>."));
        assert!(text.contains("such as &amp; are shown"));
        assert_eq!(extract_title(&document).as_deref(), Some("The &lt;b&gt; tag"));
    }
}
