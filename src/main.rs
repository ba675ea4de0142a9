//! nekohost CLI - run Neko Basic programs on a WebAssembly interpreter
//!
//! Commands:
//!   nekohost run <guest.wasm> <program>  - Run a BASIC program
//!   nekohost inspect <guest.wasm>        - Check a guest against the host ABI
//!   nekohost config                      - Print the effective configuration

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use nekohost::runtime::{inspect_guest, ExportStatus, GuestReport, RunOutcome};
use nekohost::{BridgeConfig, Hooks, Runtime, Scheduler, TextConsole};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "nekohost")]
#[command(about = "Host runtime for the Neko Basic interpreter", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a BASIC program
    Run(RunArgs),

    /// Check which entry points and imports a guest declares
    Inspect {
        /// Path to the interpreter WASM file
        guest: PathBuf,

        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the interpreter WASM file
    guest: PathBuf,

    /// BASIC source file
    program: PathBuf,

    /// Source slot to load the program into
    #[arg(long, default_value_t = 0)]
    slot: i32,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    heap_pages: Option<u32>,

    #[arg(long)]
    steps_per_batch: Option<usize>,

    #[arg(long)]
    frame_interval_ms: Option<u64>,

    /// Give up after this many batches
    #[arg(long)]
    max_batches: Option<usize>,

    /// Render output on a WIDTHxHEIGHT text screen instead of streaming it
    #[arg(long, value_parser = parse_screen)]
    screen: Option<(usize, usize)>,
}

fn parse_screen(raw: &str) -> Result<(usize, usize), String> {
    let (width, height) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("invalid screen dimension '{part}'"))
    };
    Ok((parse(width)?, parse(height)?))
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|expr| EnvFilter::try_new(expr).ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    let _ = fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    match path {
        Some(path) => Ok(BridgeConfig::load(path)?),
        None => Ok(BridgeConfig::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Inspect {
            guest,
            config,
            json,
        } => inspect_command(&guest, config.as_deref(), json),
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Collects output between vsyncs and writes it to stdout on each vsync.
#[derive(Clone, Default)]
struct StdoutBuffer(Arc<Mutex<String>>);

impl StdoutBuffer {
    fn push(&self, code_point: u32) {
        let ch = char::from_u32(code_point).unwrap_or(char::REPLACEMENT_CHARACTER);
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(ch);
    }

    fn flush(&self) {
        let text = std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()));
        if text.is_empty() {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
            warn!(error = %e, "failed to write output");
        }
    }
}

async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(pages) = args.heap_pages {
        config.heap_pages = pages;
    }
    if let Some(steps) = args.steps_per_batch {
        config.steps_per_batch = steps;
    }
    if let Some(interval) = args.frame_interval_ms {
        config.frame_interval_ms = interval;
    }
    config.validate()?;

    let wasm_bytes = std::fs::read(&args.guest)
        .with_context(|| format!("Failed to read {}", args.guest.display()))?;
    let source = std::fs::read_to_string(&args.program)
        .with_context(|| format!("Failed to read {}", args.program.display()))?;

    let base_dir = args
        .program
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let loader = move |name: &str| match std::fs::read_to_string(base_dir.join(name)) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(name, error = %e, "cannot load text file");
            None
        }
    };

    let (width, height) = args.screen.unwrap_or((80, 25));
    let console = TextConsole::new(width, height);
    let stdout = StdoutBuffer::default();
    let hooks = if args.screen.is_some() {
        Hooks::new().on_output(console.output_sink())
    } else {
        let (sink, vsync) = (stdout.clone(), stdout.clone());
        Hooks::new()
            .on_output(move |c| sink.push(c))
            .on_vsync(move || vsync.flush())
    };
    let hooks = hooks
        .on_state_change(|state| info!(?state, "run state"))
        .on_load_text(loader);

    let runtime = Runtime::new();
    let module = runtime.load_guest(&wasm_bytes)?;
    let mut guest = module.instantiate(&config, hooks)?;
    guest.install_available(&console)?;

    let filename = args
        .program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !guest.set_source(args.slot, &filename, &source)? {
        bail!("Guest rejected {}", args.program.display());
    }

    let mut scheduler = Scheduler::new(guest);
    let summary = scheduler.run_until(args.max_batches).await?;
    stdout.flush();

    if args.screen.is_some() {
        println!("{}", console.render());
    }
    if summary.outcome == RunOutcome::BatchLimit {
        warn!(batches = summary.batches, "stopped at batch limit");
    }
    Ok(())
}

fn inspect_command(guest: &Path, config: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let wasm_bytes = std::fs::read(guest)
        .with_context(|| format!("Failed to read {}", guest.display()))?;

    let runtime = Runtime::new();
    let module = runtime.load_guest(&wasm_bytes)?;
    let report = inspect_guest(&module, &config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_compatible() {
        bail!("{} is not compatible with this host", guest.display());
    }
    Ok(())
}

fn print_report(report: &GuestReport) {
    println!("Exports:");
    for export in &report.exports {
        let status = match &export.status {
            ExportStatus::Present => "ok".to_string(),
            ExportStatus::Missing if !export.required => "absent (optional)".to_string(),
            ExportStatus::Missing => "MISSING".to_string(),
            ExportStatus::SignatureMismatch { expected, actual } => {
                format!("MISMATCH: expected {expected}, found {actual}")
            }
        };
        println!("  {:<18} {:<32} {}", export.role, export.name, status);
    }

    println!();
    println!(
        "Memory: {}",
        if report.imports_memory {
            "imports env.memory"
        } else {
            "does not import env.memory"
        }
    );
    if report.unresolved_imports.is_empty() {
        println!("Imports: all provided by host");
    } else {
        println!("Unresolved imports:");
        for import in &report.unresolved_imports {
            println!("  {import}");
        }
    }
}
