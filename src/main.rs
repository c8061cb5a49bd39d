use std::fs::{self, File};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use simplelog::{Config, LevelFilter, WriteLogger};

use texpane::apply::{ApplySummary, Applier, Operation};
use texpane::engine::RenderEngine;
use texpane::events::LogEvents;
use texpane::fragment::FragmentKind;
use texpane::panic_handler;
use texpane::paths;
use texpane::render::{ArtifactCache, ColorPair, FragmentState, OutputKind};
use texpane::settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "texpane", version, about = "Preview LaTeX fragments as cached images")]
struct Cli {
    /// Settings file (defaults to <config dir>/texpane/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level written to the log file
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    cmd: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Render every fragment in a document (or a range of it)
    Render(RenderArgs),
    /// Discard cached artifacts and render again
    Regenerate(RenderArgs),
    /// List cached artifacts
    List,
    /// Delete every cached artifact
    Clean,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Document to scan
    file: PathBuf,

    /// Start of the byte range to scan
    #[arg(long)]
    start: Option<usize>,

    /// End of the byte range to scan
    #[arg(long)]
    end: Option<usize>,

    /// Only the fragment covering this byte offset
    #[arg(long, conflicts_with_all = ["start", "end"])]
    at: Option<usize>,

    /// Output format (svg or png)
    #[arg(long, value_parser = parse_output_kind)]
    output: Option<OutputKind>,

    /// Foreground color (name or #rrggbb)
    #[arg(long)]
    fg: Option<String>,

    /// Background color (name or #rrggbb)
    #[arg(long)]
    bg: Option<String>,

    /// Maximum concurrent renders
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Seconds to wait for renders to finish
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

fn parse_output_kind(s: &str) -> Result<OutputKind, String> {
    OutputKind::from_extension(s).ok_or_else(|| format!("unknown output format '{s}'"))
}

#[derive(Serialize)]
struct FragmentReport {
    kind: FragmentKind,
    begin: usize,
    end: usize,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct RenderReport {
    summary: ApplySummary,
    idle: bool,
    fragments: Vec<FragmentReport>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);
    panic_handler::initialize_panic_handler();

    info!("Starting texpane {}", env!("CARGO_PKG_VERSION"));
    let settings = Settings::load_or_default(cli.config.as_deref())?;

    let result = match cli.cmd {
        CliCommand::Render(args) => cmd_render(&settings, args, Operation::Render, cli.json),
        CliCommand::Regenerate(args) => {
            cmd_render(&settings, args, Operation::Regenerate, cli.json)
        }
        CliCommand::List => cmd_list(&settings, cli.json),
        CliCommand::Clean => cmd_clean(&settings, cli.json),
    };

    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

fn init_logging(level: LevelFilter) {
    let log_path = match paths::resolve_log_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Logging disabled: {e:#}");
            return;
        }
    };

    match File::create(&log_path) {
        Ok(file) => {
            if let Err(e) = WriteLogger::init(level, Config::default(), file) {
                eprintln!("Logging disabled: {e}");
            }
        }
        Err(e) => eprintln!("Logging disabled: cannot create {}: {e}", log_path.display()),
    }
}

fn cmd_render(
    settings: &Settings,
    args: RenderArgs,
    operation: Operation,
    json: bool,
) -> Result<()> {
    let document = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let mut settings = settings.clone();
    if let Some(output) = args.output {
        settings.output = output;
    }
    if let Some(max) = args.max_concurrent {
        settings.max_concurrent = max;
    }
    if args.fg.is_some() || args.bg.is_some() {
        settings.colors = ColorPair::new(
            args.fg.clone().unwrap_or(settings.colors.foreground),
            args.bg.clone().unwrap_or(settings.colors.background),
        );
    }
    settings.validate()?;

    let document_dir = paths::document_dir(&args.file)?;
    let config = settings.to_engine_config(Some(document_dir))?;
    let mut engine = RenderEngine::activate(
        config,
        Arc::new(settings.renderer()),
        Box::new(LogEvents),
    )?;
    let mut applier = Applier::with_defaults();

    let summary = match args.at {
        Some(offset) => match applier.apply_at_point(&mut engine, &document, &[operation], offset) {
            Some(summary) => summary,
            None => bail!("no fragment at offset {offset}"),
        },
        None => {
            let selection = selection(args.start, args.end, document.len());
            applier.apply(&mut engine, &document, &[operation], selection)
        }
    };

    let idle = engine.run_until_idle(Duration::from_secs(args.timeout));
    if !idle {
        warn!("Timed out with {} renders in flight", engine.in_flight());
        engine.cancel_waiting();
    }

    let fragments: Vec<FragmentReport> = applier
        .parsers()
        .scan(&document, summary.range.clone())
        .filter_map(Result::ok)
        .map(|fragment| {
            let state = engine.state_of(fragment.key());
            let (artifact, error) = match &state {
                FragmentState::Rendered { artifact } => (Some(artifact.clone()), None),
                FragmentState::Error { failure } => (None, Some(failure.to_string())),
                _ => (None, None),
            };
            FragmentReport {
                kind: fragment.kind,
                begin: fragment.begin,
                end: fragment.end,
                state: state.name(),
                artifact,
                error,
            }
        })
        .collect();

    let failed = fragments.iter().filter(|f| f.error.is_some()).count();
    let report = RenderReport {
        summary,
        idle,
        fragments,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !idle {
        bail!("timed out after {}s", args.timeout);
    }
    if failed > 0 {
        bail!("{failed} fragment(s) failed to render");
    }
    Ok(())
}

fn selection(start: Option<usize>, end: Option<usize>, len: usize) -> Option<Range<usize>> {
    if start.is_none() && end.is_none() {
        return None;
    }
    let start = start.unwrap_or(0);
    let end = end.unwrap_or(len).max(start);
    Some(start..end)
}

fn print_report(report: &RenderReport) {
    for fragment in &report.fragments {
        let detail = match (&fragment.artifact, &fragment.error) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(error)) => error.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{:<12} {:>6}..{:<6} {:<10} {}",
            fragment.kind.as_str(),
            fragment.begin,
            fragment.end,
            fragment.state,
            detail
        );
    }
    println!(
        "{} fragments, {} tasks started, {} malformed",
        report.summary.fragments, report.summary.tasks_started, report.summary.malformed
    );
}

fn open_cache(settings: &Settings) -> Result<ArtifactCache> {
    let dir = settings.resolve_cache_dir()?;
    Ok(ArtifactCache::open(dir)?)
}

fn cmd_list(settings: &Settings, json: bool) -> Result<()> {
    let cache = open_cache(settings)?;
    let entries = cache.entries()?;

    if json {
        let paths: Vec<&Path> = entries.iter().map(|e| e.path.as_path()).collect();
        println!("{}", serde_json::to_string_pretty(&paths)?);
    } else {
        for entry in &entries {
            println!("{} {}", entry.kind, entry.path.display());
        }
    }
    Ok(())
}

fn cmd_clean(settings: &Settings, json: bool) -> Result<()> {
    let mut cache = open_cache(settings)?;
    let removed = cache.clear()?;
    info!("Removed {removed} cached artifacts from {:?}", cache.dir());

    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {removed} cached artifacts");
    }
    Ok(())
}
