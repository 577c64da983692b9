use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser as _;

use website_fetch::cli::{Cli, ConversionMode, Mode};
use website_fetch::converter::{Converter, CustomConverter, DefaultConverter, OptimizingConverter, ReadabilityConverter};
use website_fetch::crawler::{agent, simple, smart, CrawlObserver, CrawlOptions};
use website_fetch::fetcher::{Fetcher, FetcherConfig};
use website_fetch::index_gen;
use website_fetch::llm::{LLMProvider, LlmConfig};
use website_fetch::model::{FetchResult, FetchedPage, SkippedPage};
use website_fetch::openai::OpenAiProvider;
use website_fetch::output::{FsOutputWriter, OutputLayout, OutputWriter};
use website_fetch::rate_limiter::RateLimiterConfig;
use website_fetch::{cookies, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init(cli.args.verbose, cli.args.quiet) {
        eprintln!("Error: logging\n  {err:#}");
        return ExitCode::FAILURE;
    }
    tracing::debug!(?cli, "parsed cli");

    if let Err(err) = try_main(cli).await {
        eprintln!("Error: crawl\n  {err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main(cli: Cli) -> anyhow::Result<()> {
    let args = cli.args;

    if matches!(args.mode, Mode::Smart | Mode::Agent) && args.description.is_none() {
        anyhow::bail!("--description is required for --mode smart|agent");
    }

    if args.dry_run {
        eprintln!(
            "Dry run: would crawl {} in {:?} mode, max_depth={}, max_pages={}, output={}",
            args.url, args.mode, args.depth, args.max_pages, args.output
        );
        return Ok(());
    }

    let headers = parse_headers(&args.headers)?;
    let cookies = match &args.cookie_file {
        Some(path) => {
            let contents = std::fs::read_to_string(path).with_context(|| format!("read cookie file: {path}"))?;
            cookies::load_netscape(&contents)
        }
        None => Vec::new(),
    };

    let fetcher = Fetcher::new(FetcherConfig {
        user_agent: website_fetch::fetcher::DEFAULT_USER_AGENT.to_string(),
        respect_robots: !args.ignore_robots,
        headers,
        cookies,
        timeout: Duration::from_secs(30),
        concurrency: args.concurrency,
        rate_limiter: RateLimiterConfig {
            baseline_delay: Duration::from_millis(args.delay),
            max_retries: args.max_retries,
            adaptive: true,
        },
    })
    .context("build fetcher")?;

    let needs_provider = matches!(args.mode, Mode::Smart | Mode::Agent) || args.optimize_conversion_effective();
    let provider: Option<Arc<dyn LLMProvider>> = if needs_provider { Some(build_provider(&args)?) } else { None };

    let base_converter = build_converter(&args).context("build converter")?;
    let converter: Box<dyn Converter> = if args.optimize_conversion_effective() {
        let provider = provider.clone().expect("provider built when optimize-conversion is effective");
        Box::new(OptimizingConverter::new(base_converter, provider))
    } else {
        base_converter
    };

    let layout = if args.flat { OutputLayout::Flat } else { OutputLayout::Mirror };
    let output_dir = PathBuf::from(&args.output);
    let writer = FsOutputWriter::new(output_dir.clone(), layout);

    let description = args.description.clone().unwrap_or_default();
    let observer = ProgressObserver::new(args.verbose, args.quiet);

    let mut result = match args.mode {
        Mode::Simple => {
            let options = crawl_options(&args);
            simple::crawl_with_observer(&args.url, &options, &fetcher, converter.as_ref(), &writer, &observer).await
        }
        Mode::Smart => {
            let provider = provider.clone().expect("provider built for smart mode");
            let options = crawl_options(&args);
            smart::crawl_with_observer(
                &args.url,
                &description,
                args.link_classification.into(),
                provider,
                &options,
                &fetcher,
                converter.as_ref(),
                &writer,
                &observer,
            )
            .await
        }
        Mode::Agent => {
            let provider = provider.clone().expect("provider built for agent mode");
            agent::crawl_with_observer(
                &args.url,
                &description,
                args.max_pages,
                provider.as_ref(),
                &fetcher,
                converter.as_ref(),
                &writer,
                &observer,
            )
            .await
        }
    };
    result.output_path = output_dir.clone();

    if !args.no_index {
        match index_gen::write_index(&result.pages, &output_dir, layout, provider.as_deref()).await {
            Ok(path) => result.index_path = Some(path),
            Err(err) => eprintln!("Error: index\n  {err}"),
        }
    }
    if args.single_file {
        match index_gen::write_aggregated(&result.pages, &output_dir).await {
            Ok(path) => result.single_file_path = Some(path),
            Err(err) => eprintln!("Error: aggregated file\n  {err}"),
        }
    }

    print_summary(&result, &args.output);
    Ok(())
}

fn crawl_options(args: &website_fetch::cli::CrawlArgs) -> CrawlOptions {
    CrawlOptions {
        max_depth: args.depth,
        max_pages: args.max_pages,
        same_domain_only: true,
        include: args.include.clone(),
        exclude: args.exclude.clone(),
        prefix: args.prefix.clone(),
    }
}

fn build_converter(args: &website_fetch::cli::CrawlArgs) -> anyhow::Result<Box<dyn Converter>> {
    match args.conversion {
        ConversionMode::Default => Ok(Box::new(DefaultConverter)),
        ConversionMode::Readability => Ok(Box::new(ReadabilityConverter::new().context("init readability")?)),
        ConversionMode::Custom => {
            let program = args
                .custom_converter_command
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--custom-converter-command is required for --conversion custom"))?;
            Ok(Box::new(CustomConverter { program, args: args.custom_converter_args.clone() }))
        }
    }
}

fn build_provider(args: &website_fetch::cli::CrawlArgs) -> anyhow::Result<Arc<dyn LLMProvider>> {
    if args.provider != "openai" {
        anyhow::bail!("unsupported LLM provider: {}", args.provider);
    }

    let api_key = std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
    let mut config = match &args.llm_config {
        Some(path) => {
            let contents = std::fs::read_to_string(path).with_context(|| format!("read llm config: {path}"))?;
            LlmConfig::from_json(&contents).context("parse llm config")?
        }
        None => LlmConfig::default(),
    };
    if config.defaults.model.is_none() {
        config.defaults.model = Some(args.model.clone());
    }
    if config.defaults.provider.is_none() {
        config.defaults.provider = Some(args.provider.clone());
    }

    Ok(Arc::new(OpenAiProvider::new(api_key, &args.openai_base_url, move |call_site| config.resolve(call_site))))
}

fn parse_headers(raw: &[String]) -> anyhow::Result<std::collections::HashMap<String, String>> {
    let mut headers = std::collections::HashMap::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("--header must be Name:Value, got: {entry}"))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(headers)
}

struct ProgressObserver {
    verbose: bool,
    quiet: bool,
}

impl ProgressObserver {
    fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }
}

impl CrawlObserver for ProgressObserver {
    fn on_page_fetched(&self, page: &FetchedPage) {
        if self.quiet {
            return;
        }
        if self.verbose {
            eprintln!("fetched {} (status={}, depth={})", page.url, page.status_code, page.depth);
        } else {
            eprintln!("fetched {}", page.url);
        }
    }

    fn on_page_skipped(&self, skipped: &SkippedPage) {
        if self.quiet {
            return;
        }
        eprintln!("skipped {} ({})", skipped.url, skipped.reason);
    }

    fn on_error(&self, url: &str, message: &str) {
        eprintln!("Error: {url}\n  {message}");
    }
}

fn print_summary(result: &FetchResult, output: &str) {
    eprintln!(
        "{} pages, {} skipped, {:.1}s, output: {}",
        result.stats.total_pages,
        result.stats.total_skipped,
        result.stats.duration.as_secs_f64(),
        output
    );
}
