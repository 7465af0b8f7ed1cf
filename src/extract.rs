//! Boilerplate removal and main-content selection.
//!
//! Nothing is mutated in the parsed tree. Denylisted subtrees are skipped while
//! measuring text and while serializing the chosen region, which gives the same
//! result as deleting them first.

use std::sync::LazyLock;

use scraper::node::Element;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

const UNWANTED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "advertisement", "banner", "cookie",
    "popup", "modal", "iframe", "embed", "object", "applet", "form", "input", "button", "select",
    "textarea", "noscript",
];

const UNWANTED_CLASSES: &[&str] = &[
    "ad", "ads", "advertisement", "banner", "popup", "modal", "navigation", "nav", "sidebar",
    "footer", "header", "menu", "breadcrumb", "social", "share", "comment", "cookie", "gdpr",
    "newsletter", "subscription",
];

const UNWANTED_IDS: &[&str] = &[
    "header", "footer", "nav", "navigation", "sidebar", "menu", "ads", "advertisement", "social",
    "comments",
];

/// Skeleton elements never dropped by the class/id rules.
const SKELETON: &[&str] = &["html", "head", "body"];

const MAIN_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=\"main\"]",
    ".main-content",
    ".content",
    ".post-content",
    ".entry-content",
    "#main",
    "#content",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

static MAIN_CANDIDATES: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    MAIN_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});
static DIV: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div").unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[property="og:title"]"#).unwrap());
static TWITTER_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="twitter:title"]"#).unwrap());

/// Page-level title hints, read before any cleaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub og_title: Option<String>,
    pub twitter_title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub url: String,
    pub html: String,
    pub meta: PageMeta,
    pub region: Region,
}

/// Which rule picked the main content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    Selector(&'static str),
    LargestDiv,
    Body,
    Document,
}

pub struct ContentExtractor {
    min_content_chars: usize,
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ContentExtractor {
    pub fn new(min_content_chars: usize) -> Self {
        Self { min_content_chars }
    }

    pub fn extract(&self, html: &str, url: &str) -> ExtractedDocument {
        let document = Html::parse_document(html);
        let meta = page_meta(&document);
        let (root, region) = self.main_content(&document);
        debug!(url, region = ?region, "Selected main content");

        let mut out = String::with_capacity(html.len() / 2);
        write_element(root, &mut out);

        ExtractedDocument {
            url: url.to_string(),
            html: out,
            meta,
            region,
        }
    }

    fn main_content<'a>(&self, document: &'a Html) -> (ElementRef<'a>, Region) {
        for (selector, name) in MAIN_CANDIDATES.iter().zip(MAIN_SELECTORS) {
            let first = document.select(selector).find(|el| !is_pruned(*el));
            if let Some(el) = first {
                if self.passes(el) {
                    return (el, Region::Selector(*name));
                }
            }
        }

        let mut largest: Option<(ElementRef<'a>, usize)> = None;
        for div in document.select(&DIV).filter(|el| !is_pruned(*el)) {
            let len = visible_text(div).chars().count();
            if largest.map_or(true, |(_, best)| len > best) {
                largest = Some((div, len));
            }
        }
        if let Some((div, _)) = largest {
            if self.passes(div) {
                return (div, Region::LargestDiv);
            }
        }

        match document.select(&BODY).next() {
            Some(body) => (body, Region::Body),
            None => (document.root_element(), Region::Document),
        }
    }

    fn passes(&self, el: ElementRef) -> bool {
        visible_text(el).trim().chars().count() > self.min_content_chars
    }
}

fn page_meta(document: &Html) -> PageMeta {
    let title = document
        .select(&TITLE)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());
    let content = |sel: &Selector| {
        document
            .select(sel)
            .find_map(|el| el.value().attr("content"))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
    };
    PageMeta {
        title,
        og_title: content(&OG_TITLE),
        twitter_title: content(&TWITTER_TITLE),
    }
}

/// Element matches a tag, class or id denylist entry.
fn is_unwanted(el: &Element) -> bool {
    let name = el.name();
    if UNWANTED_TAGS.contains(&name) {
        return true;
    }
    if SKELETON.contains(&name) {
        return false;
    }
    let class_hit = el.classes().any(|class| {
        let class = class.to_lowercase();
        UNWANTED_CLASSES.iter().any(|frag| class.contains(frag))
    });
    let id_hit = el.id().is_some_and(|id| {
        let id = id.to_lowercase();
        UNWANTED_IDS.iter().any(|frag| id.contains(frag))
    });
    class_hit || id_hit
}

/// Element or one of its ancestors is denylisted.
fn is_pruned(el: ElementRef) -> bool {
    is_unwanted(el.value())
        || el
            .ancestors()
            .filter_map(|n| n.value().as_element())
            .any(is_unwanted)
}

/// Text of the element with denylisted subtrees left out.
fn visible_text(el: ElementRef) -> String {
    let mut out = String::new();
    collect_text(el, &mut out);
    out
}

fn collect_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !is_unwanted(child_el.value()) {
                collect_text(child_el, out);
            }
        } else if let Node::Text(text) = child.value() {
            out.push_str(text);
        }
    }
}

fn allowed_attrs(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title"],
        "img" => &["src", "alt", "title"],
        _ => &[],
    }
}

fn write_element(el: ElementRef, out: &mut String) {
    let element = el.value();
    let name = element.name();

    out.push('<');
    out.push_str(name);
    for attr in allowed_attrs(name) {
        if let Some(value) = element.attr(attr) {
            out.push(' ');
            out.push_str(attr);
            out.push_str("=\"");
            escape_into(value, true, out);
            out.push('"');
        }
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        return;
    }

    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !is_unwanted(child_el.value()) {
                write_element(child_el, out);
            }
        } else if let Node::Text(text) = child.value() {
            escape_into(text, false, out);
        }
    }

    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn escape_into(s: &str, attribute: bool, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}
