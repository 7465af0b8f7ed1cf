mod config;
mod error;
mod extract;
mod fetch;
mod pipeline;
mod render;
mod sitemap;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;

use config::Settings;
use extract::ContentExtractor;
use fetch::PageFetcher;
use pipeline::Converter;
use render::MarkdownRenderer;
use store::OutputStore;

#[derive(Parser)]
#[command(name = "sitemark", about = "Convert the pages listed in a sitemap to Markdown")]
struct Cli {
    /// Path to the sitemap XML file
    #[arg(long)]
    sitemap: PathBuf,

    /// Output directory for Markdown files
    #[arg(long, default_value = "./markdown-output")]
    output: PathBuf,

    /// Settings file (default: sitemark.toml, if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Max URLs to convert (default: all)
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Ignore cached raw HTML (pages are still cached)
    #[arg(long)]
    no_cache: bool,

    /// Add a fallback tier that skips certificate validation
    #[arg(long)]
    allow_insecure_tls: bool,

    /// Headless-browser helper script for the last fallback tier.
    /// Relative paths resolve against the working directory, not the binary
    /// (default: scripts/fetch_html.js)
    #[arg(long)]
    browser_helper: Option<PathBuf>,

    /// Seed for User-Agent and delay selection
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if self.no_cache {
            settings.cache.read = false;
        }
        if self.allow_insecure_tls {
            settings.fetch.allow_insecure_tls = true;
        }
        if let Some(helper) = &self.browser_helper {
            settings.fetch.browser_helper = Some(helper.clone());
        }
        if let Some(seed) = self.seed {
            settings.fetch.seed = Some(seed);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    if !cli.sitemap.exists() {
        eprintln!("Error: Sitemap file not found: {}", cli.sitemap.display());
        return Ok(ExitCode::FAILURE);
    }

    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    cli.apply(&mut settings);

    println!("Sitemap to Markdown Converter");
    println!("{}", "=".repeat(50));
    println!("Sitemap: {}", cli.sitemap.display());
    println!("Output:  {}", cli.output.display());
    println!("{}", "=".repeat(50));

    let mut urls = match sitemap::parse_sitemap(&cli.sitemap) {
        Ok(urls) => urls,
        Err(e) => {
            eprintln!("Error parsing sitemap: {}", e);
            Vec::new()
        }
    };
    if urls.is_empty() {
        println!("No URLs found in sitemap!");
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(limit) = cli.limit {
        urls.truncate(limit);
    }
    println!("Found {} URLs to process", urls.len());

    let store = OutputStore::open(&cli.output, settings.cache.read, settings.cache.max_age())
        .context("preparing output directory")?;
    let fetcher = PageFetcher::from_settings(&settings.fetch).context("building HTTP clients")?;
    let extractor = ContentExtractor::new(settings.extract.min_content_chars);
    let renderer = MarkdownRenderer::new(settings.render.wrap_width, settings.render.title_max_chars);

    let mut converter = Converter::new(fetcher, extractor, renderer, store);
    converter.run(&urls).await;
    let stats = converter.finish();

    println!("\n{}", "=".repeat(50));
    println!("Conversion Complete!");
    println!("Total URLs:       {}", stats.total_urls);
    println!("Successful:       {}", stats.successful);
    println!("Failed:           {}", stats.failed);
    println!("Output directory: {}", cli.output.display());
    println!("Done in {}", format_duration(t0.elapsed()));

    Ok(ExitCode::SUCCESS)
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "sitemark",
            "--sitemap",
            "s.xml",
            "--no-cache",
            "--allow-insecure-tls",
            "--seed",
            "7",
            "-n",
            "3",
        ]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);

        assert_eq!(cli.output, PathBuf::from("./markdown-output"));
        assert_eq!(cli.limit, Some(3));
        assert!(!settings.cache.read);
        assert!(settings.fetch.allow_insecure_tls);
        assert_eq!(settings.fetch.seed, Some(7));
    }

    #[test]
    fn browser_helper_help_names_resolution_base() {
        use clap::CommandFactory;
        let help = Cli::command().render_long_help().to_string();
        assert!(help.contains("working directory"), "{}", help);
        assert!(help.contains("scripts/fetch_html.js"));
    }

    #[test]
    fn sitemap_flag_is_required() {
        assert!(Cli::try_parse_from(["sitemark"]).is_err());
    }

    #[test]
    fn duration_formats() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
