use clap::{Args, Parser, ValueEnum};

use crate::crawler::smart::LinkClassification;

#[derive(Debug, Parser)]
#[command(author, version, about, name = "wf")]
pub struct Cli {
    #[command(flatten)]
    pub args: CrawlArgs,
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Seed URL to crawl (must be http/https).
    pub url: String,

    /// Crawl strategy. `smart` and `agent` require `--description`.
    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Simple)]
    pub mode: Mode,

    /// Crawl goal, used by the smart link classifier and the agent router.
    #[arg(short = 'd', long)]
    pub description: Option<String>,

    /// Maximum BFS depth from the root.
    #[arg(long, default_value_t = 5)]
    pub depth: u32,

    /// Maximum pages to store before the crawl stops.
    #[arg(long, default_value_t = 100)]
    pub max_pages: usize,

    /// Glob pattern to admit a link's path (repeatable).
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Glob pattern to reject a link's path (repeatable).
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Output directory.
    #[arg(short = 'o', long, default_value = "./output")]
    pub output: String,

    /// Join URL path segments with `_` into a flat basename instead of mirroring the path.
    #[arg(long, default_value_t = false)]
    pub flat: bool,

    /// Also emit a single aggregated Markdown file at the output root.
    #[arg(long, default_value_t = false)]
    pub single_file: bool,

    /// Suppress the generated `INDEX.md`.
    #[arg(long, default_value_t = false)]
    pub no_index: bool,

    /// HTML→Markdown conversion strategy.
    #[arg(long, value_enum, default_value_t = ConversionMode::Default)]
    pub conversion: ConversionMode,

    /// External command for `--conversion custom` (stdin HTML, stdout Markdown).
    #[arg(long, value_name = "PROGRAM")]
    pub custom_converter_command: Option<String>,

    /// Argument for the custom converter command (repeatable).
    #[arg(long = "custom-converter-arg")]
    pub custom_converter_args: Vec<String>,

    /// Run an LLM optimization pass over each converted page.
    #[arg(long, default_value_t = false)]
    pub optimize_conversion: bool,

    /// Disable `--optimize-conversion` when both are passed.
    #[arg(long, default_value_t = false)]
    pub no_optimize_conversion: bool,

    /// Baseline per-origin delay, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub delay: u64,

    /// Maximum in-flight fetches.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Retry attempts on 5xx responses before giving up.
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Do not consult or enforce robots.txt.
    #[arg(long, default_value_t = false)]
    pub ignore_robots: bool,

    /// Extra request header `Name:Value` (repeatable).
    #[arg(long = "header")]
    pub headers: Vec<String>,

    /// Netscape-format cookie file.
    #[arg(long)]
    pub cookie_file: Option<String>,

    /// LLM provider (only `openai` is built in).
    #[arg(long, default_value = "openai")]
    pub provider: String,

    /// Default model for every call site not overridden by `--llm-config`.
    #[arg(long, default_value = "gpt-4.1")]
    pub model: String,

    /// OpenAI API base URL.
    #[arg(long, default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// LLM config file (JSON), see `LlmConfig`.
    #[arg(long)]
    pub llm_config: Option<String>,

    /// Smart-mode link gating granularity.
    #[arg(long, value_enum, default_value_t = LinkClassificationArg::Batch)]
    pub link_classification: LinkClassificationArg,

    /// Restrict the crawl to URLs whose path starts with this prefix.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Emit one detailed line per fetch/skip event.
    #[arg(short = 'v', long, conflicts_with = "quiet", default_value_t = false)]
    pub verbose: bool,

    /// Suppress per-page lines; print only the terminating summary and errors.
    #[arg(short = 'q', long, conflicts_with = "verbose", default_value_t = false)]
    pub quiet: bool,

    /// Validate arguments and print the plan without crawling.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

impl CrawlArgs {
    pub fn optimize_conversion_effective(&self) -> bool {
        self.optimize_conversion && !self.no_optimize_conversion
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Simple,
    Smart,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConversionMode {
    Default,
    Readability,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LinkClassificationArg {
    Batch,
    PerLink,
}

impl From<LinkClassificationArg> for LinkClassification {
    fn from(value: LinkClassificationArg) -> Self {
        match value {
            LinkClassificationArg::Batch => LinkClassification::Batch,
            LinkClassificationArg::PerLink => LinkClassification::PerLink,
        }
    }
}
