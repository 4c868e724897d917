use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tooltrim::algo::parsers::ParserRegistry;
use tooltrim::algo::reduce::Heuristics;
use tooltrim::algo::tokens::{EstimateCounter, TokenCounter};
use tooltrim::config::{parse_heuristic_pairs, ProxyConfig};
use tooltrim::metrics::create_recorder;
use tooltrim::ops;
use tooltrim::proxy::server::{log_startup, serve_http, serve_stdio, ProxyHandler};

#[derive(Parser)]
#[command(
    name = "tooltrim",
    version,
    about = "MCP reverse proxy that condenses verbose tool results into compact tabular text"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the condensing reverse proxy
    Serve {
        /// Multi-upstream JSON config file (otherwise TOOLTRIM_* env vars)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Serve on stdio instead of streamable HTTP
        #[arg(long)]
        stdio: bool,
    },
    /// Condense a structured file (or stdin) and print the result
    Condense {
        /// Input file (default: stdin, or use '-' explicitly)
        input: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Parser tried first: json, yaml, csv, xml
        #[arg(short, long)]
        format: Option<String>,
        /// Comma-separated name:value heuristic overrides
        #[arg(long)]
        heuristics: Option<String>,
        /// Suppress compression stats on stderr
        #[arg(short, long)]
        quiet: bool,
    },
    /// Encode a structured file directly as tabular text, no reductions
    Encode {
        /// Input file (default: stdin, or use '-' explicitly)
        input: Option<PathBuf>,
        /// Parser tried first: json, yaml, csv, xml
        #[arg(short, long)]
        format: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match Cli::parse().command {
        Commands::Serve { config, stdio } => cmd_serve(config.as_deref(), stdio),
        Commands::Condense {
            input,
            output,
            format,
            heuristics,
            quiet,
        } => cmd_condense(
            input.as_deref(),
            output.as_deref(),
            format.as_deref(),
            heuristics.as_deref(),
            quiet,
        ),
        Commands::Encode { input, format } => cmd_encode(input.as_deref(), format.as_deref()),
    }
}

// ── serve ───────────────────────────────────────────────────────────────────

fn cmd_serve(config_path: Option<&Path>, stdio: bool) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::load()?,
    };
    let config = Arc::new(config);

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    rt.block_on(async {
        let metrics = create_recorder(config.metrics_enabled, &config.host, config.metrics_port)?;
        let registry = Arc::new(ParserRegistry::builtin());
        let counter: Arc<dyn TokenCounter> = Arc::new(EstimateCounter);

        log_startup(&config);
        let handler =
            ProxyHandler::build(config.clone(), registry, counter, metrics).await?;

        if stdio {
            serve_stdio(handler).await?;
        } else {
            serve_http(handler, &config.host, config.port).await?;
        }
        anyhow::Ok(())
    })
}

// ── condense / encode ───────────────────────────────────────────────────────

fn read_input(input: Option<&Path>) -> anyhow::Result<String> {
    match input {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display())),
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("cannot read stdin")?;
            Ok(buf)
        }
    }
}

fn cmd_condense(
    input: Option<&Path>,
    output: Option<&Path>,
    format: Option<&str>,
    heuristics: Option<&str>,
    quiet: bool,
) -> anyhow::Result<()> {
    let raw = read_input(input)?;
    let registry = ParserRegistry::builtin();
    let h = match heuristics {
        Some(pairs) => Heuristics::from_options(&parse_heuristic_pairs(pairs))?,
        None => Heuristics::default(),
    };

    let (result, _) = ops::op_condense_text(&raw, &registry, format, &h)?;

    if !quiet {
        let counter = EstimateCounter;
        let stats = ops::op_stats(&raw, &result, &counter);
        eprintln!("=== Compression Stats ({}) ===", counter.method());
        eprintln!(
            "Original:  {:>8} chars  ({} tokens)",
            stats.orig_chars, stats.orig_tokens
        );
        eprintln!(
            "Condensed: {:>8} chars  ({} tokens)",
            stats.cond_chars, stats.cond_tokens
        );
        eprintln!(
            "Reduction: {}% chars, {}% tokens",
            stats.char_pct(),
            stats.token_pct()
        );
    }

    write_output(output, &result, quiet)
}

fn cmd_encode(input: Option<&Path>, format: Option<&str>) -> anyhow::Result<()> {
    let raw = read_input(input)?;
    let registry = ParserRegistry::builtin();
    let (result, _) = ops::op_encode_text(&raw, &registry, format)?;
    write_output(None, &result, true)
}

fn write_output(output: Option<&Path>, result: &str, quiet: bool) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, result)
                .with_context(|| format!("cannot write {}", path.display()))?;
            if !quiet {
                eprintln!("-> {}", path.display());
            }
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(result.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
