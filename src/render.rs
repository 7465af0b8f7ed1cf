use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::Local;
use htmd::options::{BulletListMarker, HeadingStyle, Options};
use htmd::HtmlToMarkdown;
use regex::Regex;
use scraper::{Html, Selector};
use textwrap::{WordSeparator, WordSplitter};

use crate::error::RenderError;
use crate::extract::ExtractedDocument;

pub const UNTITLED: &str = "Untitled Page";

/// Stands in for spaces inside `[text](url)` so a link wraps as one word.
const LINK_SPACE: char = '\u{E000}';

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n").unwrap());
static EMPTY_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\s*\]\([^)]*\)").unwrap());
static STRAY_BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*-\s*\n").unwrap());
static ESCAPED_EMPHASIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\([*_])").unwrap());
static INLINE_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[[^\]\n]*\]\([^)\n]*\)").unwrap());
static ORDERED_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[.)]\s").unwrap());

static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static H2: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownDocument {
    pub title: String,
    pub content: String,
}

pub struct MarkdownRenderer {
    converter: HtmlToMarkdown,
    wrap_width: usize,
    title_max_chars: usize,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(80, 100)
    }
}

impl MarkdownRenderer {
    pub fn new(wrap_width: usize, title_max_chars: usize) -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style", "head"])
            .options(Options {
                heading_style: HeadingStyle::Atx,
                bullet_list_marker: BulletListMarker::Dash,
                ..Default::default()
            })
            .build();
        Self {
            converter,
            wrap_width,
            title_max_chars,
        }
    }

    pub fn render(&self, doc: &ExtractedDocument) -> Result<MarkdownDocument, RenderError> {
        let title = self.resolve_title(doc);
        let body = self.render_body(&doc.html)?;

        let header = format!(
            "# {title}\n\n**Source URL:** {url}\n**Generated:** {generated}\n**Domain:** {domain}\n\n---\n\n",
            url = doc.url,
            generated = Local::now().format("%Y-%m-%d %H:%M:%S"),
            domain = domain_of(&doc.url),
        );

        Ok(MarkdownDocument {
            title,
            content: header + &body,
        })
    }

    /// HTML fragment to cleaned Markdown, without the metadata header.
    pub fn render_body(&self, html: &str) -> Result<String, RenderError> {
        let markdown = self.converter.convert(html).map_err(RenderError::Convert)?;
        let markdown = ESCAPED_EMPHASIS_RE.replace_all(&markdown, "$1");
        let wrapped = wrap_paragraphs(&markdown, self.wrap_width);
        Ok(clean_markdown(&wrapped))
    }

    /// Page title, first h1, first h2, og:title, twitter:title, then a placeholder.
    fn resolve_title(&self, doc: &ExtractedDocument) -> String {
        let fragment = Html::parse_fragment(&doc.html);
        let heading = |sel: &Selector| {
            fragment
                .select(sel)
                .next()
                .map(|el| el.text().collect::<String>())
        };

        [
            doc.meta.title.clone(),
            heading(&H1),
            heading(&H2),
            doc.meta.og_title.clone(),
            doc.meta.twitter_title.clone(),
        ]
        .into_iter()
        .flatten()
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())
        .map(|t| t.chars().take(self.title_max_chars).collect())
        .unwrap_or_else(|| UNTITLED.to_string())
    }
}

/// `host[:port]` of a URL, empty when it does not parse.
pub fn domain_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        },
        Err(_) => String::new(),
    }
}

/// Wrap long prose lines at `width`. Headings, list items, quotes, tables,
/// indented and fenced code are left alone, and words are never split.
fn wrap_paragraphs(markdown: &str, width: usize) -> String {
    let mut out = Vec::new();
    let mut in_fence = false;

    for line in markdown.split('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push(Cow::Borrowed(line));
            continue;
        }
        if in_fence || line.chars().count() <= width || !is_prose(line) {
            out.push(Cow::Borrowed(line));
            continue;
        }
        let options = textwrap::Options::new(width)
            .break_words(false)
            .word_separator(WordSeparator::AsciiSpace)
            .word_splitter(WordSplitter::NoHyphenation);
        let glued = INLINE_LINK_RE.replace_all(line, |caps: &regex::Captures| {
            caps[0].replace(' ', &LINK_SPACE.to_string())
        });
        let filled = textwrap::fill(&glued, options).replace(LINK_SPACE, " ");
        out.push(filled.into());
    }

    out.join("\n")
}

fn is_prose(line: &str) -> bool {
    if line.starts_with(' ') || line.starts_with('\t') {
        return false;
    }
    !(line.starts_with('#')
        || line.starts_with("- ")
        || line.starts_with("* ")
        || line.starts_with("+ ")
        || line.starts_with('>')
        || line.starts_with('|')
        || ORDERED_ITEM_RE.is_match(line))
}

/// Tidy converter output for LLM consumption. Idempotent: passes repeat
/// until the text stops changing.
pub fn clean_markdown(markdown: &str) -> String {
    let mut text = markdown.to_string();
    loop {
        let next = clean_pass(&text);
        if next == text {
            return text;
        }
        text = next;
    }
}

fn clean_pass(markdown: &str) -> String {
    let text = EMPTY_LINK_RE.replace_all(markdown, "");
    let text = STRAY_BULLET_RE.replace_all(&text, "\n");
    let text = BLANK_RUN_RE.replace_all(&text, "\n\n");

    text.split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
