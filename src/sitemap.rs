use std::path::Path;

use quick_xml::events::Event;
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tracing::{debug, info};

use crate::error::SitemapError;

const SITEMAP_NS: &[u8] = b"http://www.sitemaps.org/schemas/sitemap/0.9";

/// Read a sitemap file and return its `<loc>` URLs in document order.
pub fn parse_sitemap(path: &Path) -> Result<Vec<String>, SitemapError> {
    let xml = std::fs::read_to_string(path).map_err(|source| SitemapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let urls = parse_urlset(&xml)?;
    info!(path = %path.display(), urls = urls.len(), "Parsed sitemap");
    Ok(urls)
}

/// Parse a urlset XML and return all <loc> URLs.
///
/// `<loc>` elements in the sitemaps.org namespace win; if there are none, every
/// `<loc>` is taken regardless of namespace.
pub fn parse_urlset(xml: &str) -> Result<Vec<String>, SitemapError> {
    let mut reader = NsReader::from_str(xml);
    let mut namespaced = Vec::new();
    let mut any_ns = Vec::new();
    // (bound to the sitemap namespace, accumulated text)
    let mut current: Option<(bool, String)> = None;
    let mut buf = Vec::new();

    loop {
        let (ns, event) = reader
            .read_resolved_event_into(&mut buf)
            .map_err(|e| SitemapError::Malformed(e.to_string()))?;
        match event {
            Event::Start(e) if e.local_name().as_ref() == b"loc" => {
                current = Some((in_sitemap_ns(&ns), String::new()));
            }
            Event::Empty(e) if e.local_name().as_ref() == b"loc" => {
                push_loc(in_sitemap_ns(&ns), String::new(), &mut namespaced, &mut any_ns);
            }
            Event::Text(e) => {
                if let Some((_, text)) = current.as_mut() {
                    let unescaped = e
                        .unescape()
                        .map_err(|e| SitemapError::Malformed(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::CData(e) => {
                if let Some((_, text)) = current.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"loc" => {
                if let Some((bound, text)) = current.take() {
                    push_loc(bound, text.trim().to_string(), &mut namespaced, &mut any_ns);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if namespaced.is_empty() {
        debug!(count = any_ns.len(), "No namespaced <loc> entries, using unqualified lookup");
        Ok(any_ns)
    } else {
        Ok(namespaced)
    }
}

fn in_sitemap_ns(ns: &ResolveResult) -> bool {
    matches!(ns, ResolveResult::Bound(n) if n.as_ref() == SITEMAP_NS)
}

fn push_loc(bound: bool, url: String, namespaced: &mut Vec<String>, any_ns: &mut Vec<String>) {
    if bound {
        namespaced.push(url.clone());
    }
    any_ns.push(url);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_sitemap_in_order() {
        let xml = std::fs::read_to_string("tests/fixtures/sitemap.xml").unwrap();
        let urls = parse_urlset(&xml).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://example.com/",
                "https://example.com/posts/hello",
                "https://example.com/about?lang=en&ref=1",
            ]
        );
    }

    #[test]
    fn plain_sitemap_without_namespace() {
        let xml = "<urlset><url><loc>https://a.test/one</loc></url><url><loc>https://a.test/two</loc></url></urlset>";
        assert_eq!(
            parse_urlset(xml).unwrap(),
            vec!["https://a.test/one", "https://a.test/two"]
        );
    }

    #[test]
    fn foreign_namespace_falls_back() {
        let xml = r#"<urlset xmlns="http://www.google.com/schemas/sitemap/0.84">
            <url><loc>https://b.test/x</loc></url>
        </urlset>"#;
        assert_eq!(parse_urlset(xml).unwrap(), vec!["https://b.test/x"]);
    }

    #[test]
    fn prefixed_namespace() {
        let xml = r#"<sm:urlset xmlns:sm="http://www.sitemaps.org/schemas/sitemap/0.9">
            <sm:url><sm:loc> https://c.test/a </sm:loc></sm:url>
        </sm:urlset>"#;
        assert_eq!(parse_urlset(xml).unwrap(), vec!["https://c.test/a"]);
    }

    #[test]
    fn duplicates_and_junk_are_kept() {
        let xml = "<urlset><url><loc>not a url</loc></url><url><loc>not a url</loc></url><url><loc/></url></urlset>";
        assert_eq!(parse_urlset(xml).unwrap(), vec!["not a url", "not a url", ""]);
    }

    #[test]
    fn cdata_loc() {
        let xml = "<urlset><url><loc><![CDATA[https://d.test/?a=1&b=2]]></loc></url></urlset>";
        assert_eq!(parse_urlset(xml).unwrap(), vec!["https://d.test/?a=1&b=2"]);
    }

    #[test]
    fn mismatched_tags_are_malformed() {
        let xml = "<urlset><url><loc>https://e.test/</url></urlset>";
        assert!(matches!(parse_urlset(xml), Err(SitemapError::Malformed(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = parse_sitemap(Path::new("tests/fixtures/does-not-exist.xml")).unwrap_err();
        assert!(matches!(err, SitemapError::Io { .. }));
    }

    #[test]
    fn empty_urlset() {
        assert!(parse_urlset("<urlset/>").unwrap().is_empty());
    }
}
