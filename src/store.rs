//! Output directory: Markdown files, the raw-HTML cache, run metadata and the
//! failure table.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::fetch::{FetchMethod, HtmlCache};

pub const RAW_HTML_DIR: &str = "raw_html";
pub const METADATA_FILE: &str = "metadata.json";
pub const FAILURES_FILE: &str = "fetch_failures.csv";

static INVALID_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());
static HYPHEN_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub url: String,
    pub size: usize,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub filename: String,
    pub url: String,
    pub size: usize,
    pub created_at: NaiveDateTime,
    pub fetch_method: FetchMethod,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total_urls: usize,
    pub successful: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub generated_at: NaiveDateTime,
    pub files: Vec<FileEntry>,
    pub stats: RunStats,
    pub raw_html_files: Vec<CacheEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub url: String,
    pub reason: String,
    pub time: NaiveDateTime,
}

pub struct OutputStore {
    output_dir: PathBuf,
    raw_html_dir: PathBuf,
    read_cache: bool,
    cache_max_age: Option<Duration>,
    metadata: RunMetadata,
    failures: Vec<FailureRecord>,
}

impl OutputStore {
    /// Create the output and cache directories if needed.
    pub fn open(
        output_dir: impl Into<PathBuf>,
        read_cache: bool,
        cache_max_age: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let output_dir = output_dir.into();
        let raw_html_dir = output_dir.join(RAW_HTML_DIR);
        fs::create_dir_all(&raw_html_dir).map_err(|source| StoreError::Io {
            path: raw_html_dir.clone(),
            source,
        })?;

        Ok(Self {
            output_dir,
            raw_html_dir,
            read_cache,
            cache_max_age,
            metadata: RunMetadata {
                generated_at: now(),
                files: Vec::new(),
                stats: RunStats::default(),
                raw_html_files: Vec::new(),
            },
            failures: Vec::new(),
        })
    }

    #[cfg(test)]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[cfg(test)]
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn stats(&self) -> RunStats {
        self.metadata.stats
    }

    #[cfg(test)]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn set_total(&mut self, total: usize) {
        self.metadata.stats.total_urls = total;
    }

    pub fn mark_success(&mut self) {
        self.metadata.stats.successful += 1;
    }

    pub fn cache_path(&self, url: &str) -> PathBuf {
        let hash = format!("{:x}", Sha256::digest(url.as_bytes()));
        let domain = sanitize(&domain_slug(url));
        let name = if domain.is_empty() {
            format!("{}.html", hash)
        } else {
            format!("{}-{}.html", domain, hash)
        };
        self.raw_html_dir.join(name)
    }

    /// Cached raw HTML for `url`. Unreadable, empty or stale entries are misses.
    pub fn cache_lookup(&self, url: &str) -> Option<String> {
        if !self.read_cache {
            return None;
        }
        let path = self.cache_path(url);
        if !path.is_file() {
            return None;
        }
        if let Some(max_age) = self.cache_max_age {
            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            if age.map_or(true, |age| age > max_age) {
                debug!(url, path = %path.display(), "Cached HTML is stale");
                return None;
            }
        }
        match fs::read_to_string(&path) {
            Ok(html) if !html.is_empty() => Some(html),
            Ok(_) => None,
            Err(e) => {
                debug!(url, error = %e, "Unreadable cache entry, refetching");
                None
            }
        }
    }

    pub fn cache_store(
        &mut self,
        html: &str,
        url: &str,
        method: FetchMethod,
    ) -> Result<PathBuf, StoreError> {
        let path = self.cache_path(url);
        write_file(&path, html)?;
        self.metadata.raw_html_files.push(CacheEntry {
            filename: file_name(&path),
            url: url.to_string(),
            size: html.len(),
            created_at: now(),
            fetch_method: method,
        });
        Ok(path)
    }

    /// Filesystem-safe `.md` name for `url`, unique within the output directory.
    pub fn filename_for(&self, url: &str) -> String {
        let base = slug_for(url);
        let mut candidate = base.clone();
        let mut counter = 1;
        while self.output_dir.join(format!("{}.md", candidate)).exists() {
            candidate = format!("{}-{}", base, counter);
            counter += 1;
        }
        format!("{}.md", candidate)
    }

    pub fn save_markdown(&mut self, content: &str, url: &str) -> Result<PathBuf, StoreError> {
        let filename = self.filename_for(url);
        let path = self.output_dir.join(&filename);
        write_file(&path, content)?;
        self.metadata.files.push(FileEntry {
            filename,
            url: url.to_string(),
            size: content.len(),
            created_at: now(),
        });
        Ok(path)
    }

    pub fn record_failure(&mut self, url: &str, reason: &str) {
        let reason = reason.replace(',', ";").replace(['\r', '\n'], " ");
        self.failures.push(FailureRecord {
            url: url.to_string(),
            reason,
            time: now(),
        });
        self.metadata.stats.failed += 1;
    }

    /// Write `metadata.json` and, when anything failed, `fetch_failures.csv`.
    /// Errors are logged and swallowed.
    pub fn finalize(&self) {
        let metadata_path = self.output_dir.join(METADATA_FILE);
        match self.write_metadata(&metadata_path) {
            Ok(()) => info!(path = %metadata_path.display(), "Metadata saved"),
            Err(e) => warn!(error = %e, "Could not write metadata"),
        }

        if self.failures.is_empty() {
            return;
        }
        let csv_path = self.output_dir.join(FAILURES_FILE);
        match write_file(&csv_path, &self.failures_csv()) {
            Ok(()) => info!(path = %csv_path.display(), "Failures saved"),
            Err(e) => warn!(error = %e, "Could not write failures CSV"),
        }
    }

    fn write_metadata(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.metadata)?;
        write_file(path, &json)
    }

    fn failures_csv(&self) -> String {
        let mut csv = String::from("url,reason,time\n");
        for f in &self.failures {
            csv.push_str(&format!("{},{},{}\n", f.url, f.reason, f.time.format("%Y-%m-%dT%H:%M:%S%.6f")));
        }
        csv
    }
}

impl HtmlCache for OutputStore {
    fn lookup(&self, url: &str) -> Option<String> {
        self.cache_lookup(url)
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn write_file(path: &Path, contents: &str) -> Result<(), StoreError> {
    fs::write(path, contents).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Host (with port) and path of a URL. Strings that do not parse as absolute
/// URLs are treated as a bare path.
fn split_url(url: &str) -> (String, String) {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let host = match (parsed.host_str(), parsed.port()) {
                (Some(h), Some(p)) => format!("{}:{}", h, p),
                (Some(h), None) => h.to_string(),
                _ => String::new(),
            };
            (host, parsed.path().to_string())
        }
        Err(_) => (String::new(), url.to_string()),
    }
}

fn domain_slug(url: &str) -> String {
    let (host, _) = split_url(url);
    let host = host.strip_prefix("www.").unwrap_or(&host);
    host.replace('.', "-")
}

fn sanitize(raw: &str) -> String {
    let replaced = INVALID_CHARS_RE.replace_all(raw, "-");
    let collapsed = HYPHEN_RUN_RE.replace_all(&replaced, "-");
    collapsed.trim_matches('-').to_string()
}

/// Base filename stem for a URL, before collision handling.
pub fn slug_for(url: &str) -> String {
    let (_, path) = split_url(url);
    let domain = domain_slug(url);
    let path = path.trim_matches('/').replace('/', "-");

    let raw = if path.is_empty() || path == "-" {
        format!("{}-index", domain)
    } else {
        format!("{}-{}", domain, path)
    };
    let slug = sanitize(&raw);
    if slug.is_empty() {
        "index".to_string()
    } else {
        slug
    }
}
