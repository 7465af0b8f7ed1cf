//! Sequential URL → Markdown conversion loop.

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};

use crate::error::PageError;
use crate::extract::ContentExtractor;
use crate::fetch::{FetchMethod, FetchOutcome, PageFetcher};
use crate::render::MarkdownRenderer;
use crate::store::{OutputStore, RunStats};

pub struct Converter {
    fetcher: PageFetcher,
    extractor: ContentExtractor,
    renderer: MarkdownRenderer,
    store: OutputStore,
}

impl Converter {
    pub fn new(
        fetcher: PageFetcher,
        extractor: ContentExtractor,
        renderer: MarkdownRenderer,
        store: OutputStore,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            renderer,
            store,
        }
    }

    /// Convert every URL in order. Per-page failures are recorded, never raised.
    pub async fn run(&mut self, urls: &[String]) {
        self.store.set_total(urls.len());

        let pb = ProgressBar::new(urls.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        for (i, url) in urls.iter().enumerate() {
            pb.set_message(url.clone());
            info!("[{}/{}] Processing {}", i + 1, urls.len(), url);

            match self.process(url).await {
                Ok(path) => {
                    self.store.mark_success();
                    info!(url, path = %path.display(), "Saved");
                }
                Err(e) => {
                    error!(url, error = %e, "Page failed");
                    self.store.record_failure(url, &e.to_string());
                }
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
    }

    async fn process(&mut self, url: &str) -> Result<PathBuf, PageError> {
        let (html, method) = match self.fetcher.fetch(url, &self.store).await {
            FetchOutcome::Fetched { html, method } => (html, method),
            FetchOutcome::Failed { reason } => {
                warn!(url, reason = %reason, "No tier produced a page");
                return Err(PageError::FetchExhausted);
            }
        };

        if method != FetchMethod::Cache {
            if let Err(e) = self.store.cache_store(&html, url, method) {
                warn!(url, error = %e, "Could not cache raw HTML");
            }
        }

        let extracted = self.extractor.extract(&html, url);
        let markdown = self.renderer.render(&extracted)?;
        debug!(url, region = ?extracted.region, title = %markdown.title, "Rendered");
        Ok(self.store.save_markdown(&markdown.content, url)?)
    }

    /// Write metadata and the failure table, then hand back the counters.
    pub fn finish(self) -> RunStats {
        self.store.finalize();
        self.store.stats()
    }
}
