//! Folio - live document playground, command line
//!
//! ## Commands
//!
//! - `link`: create or open shareable playground links
//! - `token`: encode/decode raw `cp_`/`gz_` session tokens
//! - `layout`: index a layout snapshot and print its ids
//! - `examples` / `docs`: browse the bundled catalogs
//! - `render`: evaluate a document once against the renderer
//! - `watch`: re-evaluate a document whenever the file changes

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, Level};
use url::Url;

use folio_core::{
    create_link, decode_token, encode_token, normalize_example, parse_link, parse_query,
    EvaluateOptions, EvaluationChannel, EvaluationRequest, ExampleCatalog, FolioConfig,
    FsCatalog, Orchestrator, PreviewState, ProcessLauncher, Scheme, TracingSink, METRICS,
};

#[derive(Parser)]
#[command(name = "folio")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live document playground core", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shareable playground links
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },

    /// Raw session tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Assign stable ids to a layout snapshot (JSON)
    Layout {
        /// Snapshot file, `-` for stdin
        #[arg(default_value = "-")]
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = LayoutFormat::Outline)]
        format: LayoutFormat,
    },

    /// Browse example documents
    Examples {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Browse reference docs
    Docs {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Evaluate a document once and print the result
    Render {
        /// Document source, `-` for stdin
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Print the indexed layout outline
        #[arg(long)]
        layout: bool,
    },

    /// Re-evaluate a document whenever it changes on disk
    Watch {
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Poll interval for file changes
        #[arg(long, default_value = "500")]
        interval_ms: u64,
    },
}

#[derive(Subcommand)]
enum LinkAction {
    /// Pack a source file into a link
    Create {
        /// Source file, `-` for stdin
        #[arg(default_value = "-")]
        file: PathBuf,

        /// Mark the session as ES module code
        #[arg(long)]
        modules: bool,

        /// Playground URL (default: from config)
        #[arg(long)]
        base: Option<String>,
    },

    /// Print the code carried by a link or query string
    Open {
        link: String,

        /// Print code and options as JSON
        #[arg(long)]
        show_options: bool,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    Encode {
        /// Source file, `-` for stdin
        #[arg(default_value = "-")]
        file: PathBuf,

        #[arg(long, default_value = "gz")]
        scheme: Scheme,
    },
    Decode {
        token: String,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// List entry names
    List,
    /// Print one entry
    Show {
        name: String,

        /// Rewrite an example for the playground (imports, default export)
        #[arg(long)]
        normalize: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LayoutFormat {
    Outline,
    Json,
}

#[derive(clap::Args, Clone, Default)]
struct RunArgs {
    /// Evaluation timeout
    #[arg(long, env = "FOLIO_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Renderer command line, e.g. "node renderer/worker.mjs"
    #[arg(long, env = "FOLIO_RENDERER")]
    renderer: Option<String>,

    /// Evaluate as plain script instead of ES module
    #[arg(long)]
    no_modules: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut FolioConfig) -> Result<()> {
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(renderer) = &self.renderer {
            config.renderer = renderer.split_whitespace().map(str::to_string).collect();
        }
        config.validate().context("Invalid configuration")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    folio_core::init_tracing(cli.json, level);

    let config = FolioConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Link { action } => match action {
            LinkAction::Create {
                file,
                modules,
                base,
            } => cmd_link_create(&config, &file, modules, base.as_deref()),
            LinkAction::Open { link, show_options } => cmd_link_open(&link, show_options),
        },
        Commands::Token { action } => match action {
            TokenAction::Encode { file, scheme } => cmd_token_encode(&file, scheme),
            TokenAction::Decode { token } => cmd_token_decode(&token),
        },
        Commands::Layout { file, format } => cmd_layout(&file, format),
        Commands::Examples { action } => {
            cmd_catalog(&FsCatalog::examples(&config.examples_dir), action)
        }
        Commands::Docs { action } => cmd_catalog(&FsCatalog::docs(&config.docs_dir), action),
        Commands::Render { file, run, layout } => cmd_render(config, &file, &run, layout).await,
        Commands::Watch {
            file,
            run,
            interval_ms,
        } => cmd_watch(config, &file, &run, interval_ms).await,
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn cmd_link_create(
    config: &FolioConfig,
    file: &Path,
    modules: bool,
    base: Option<&str>,
) -> Result<()> {
    let code = read_input(file)?;
    let base = match base {
        Some(raw) => Url::parse(raw).with_context(|| format!("Invalid base URL: {raw}"))?,
        None => config.base_url()?,
    };
    let link = create_link(&base, &code, modules).context("Failed to encode code")?;
    println!("{link}");
    Ok(())
}

fn cmd_link_open(link: &str, as_json: bool) -> Result<()> {
    let params = match Url::parse(link) {
        Ok(url) => parse_link(&url),
        Err(_) => parse_query(link),
    };
    for (key, err) in params.failures() {
        eprintln!("warning: could not decode {key}: {err}");
    }

    let session = params.resolve();
    if as_json {
        let out = serde_json::json!({
            "code": session.code,
            "modules": session.modules,
            "from_link": session.from_link,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        if !session.from_link {
            eprintln!("note: link carries no code, showing the default document");
        }
        print!("{}", session.code);
    }
    Ok(())
}

fn cmd_token_encode(file: &Path, scheme: Scheme) -> Result<()> {
    let text = read_input(file)?;
    println!("{}", encode_token(scheme, &text)?);
    Ok(())
}

fn cmd_token_decode(token: &str) -> Result<()> {
    let text = decode_token(token.trim()).context("Failed to decode token")?;
    print!("{text}");
    Ok(())
}

fn cmd_layout(file: &Path, format: LayoutFormat) -> Result<()> {
    let raw = read_input(file)?;
    let value: serde_json::Value = serde_json::from_str(&raw).context("Snapshot is not JSON")?;
    let tree = folio_core::layout::index_value(value).context("Snapshot is not a layout tree")?;

    match format {
        LayoutFormat::Outline => print!("{}", tree.outline()),
        LayoutFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
    }
    Ok(())
}

fn cmd_catalog(catalog: &dyn ExampleCatalog, action: CatalogAction) -> Result<()> {
    match action {
        CatalogAction::List => {
            let names = catalog.list();
            if names.is_empty() {
                println!("No {}s available.", catalog.kind());
            }
            for name in names {
                println!("{name}");
            }
        }
        CatalogAction::Show { name, normalize } => {
            let source = catalog.get(&name)?;
            if normalize {
                print!("{}", normalize_example(&source));
            } else {
                print!("{source}");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RenderSummary {
    artifact: String,
    elapsed_ms: u64,
    renderer_version: String,
    layout_nodes: Option<usize>,
}

async fn cmd_render(
    mut config: FolioConfig,
    file: &Path,
    run: &RunArgs,
    show_layout: bool,
) -> Result<()> {
    run.apply(&mut config)?;
    let code = read_input(file)?;

    let launcher = ProcessLauncher::from_command(&config.renderer)?;
    let channel = EvaluationChannel::new(Arc::new(launcher), config.channel_config());

    let outcome = async {
        channel.start().await?;
        let capability = channel.init().await?;
        let started = std::time::Instant::now();
        let output = channel
            .evaluate(EvaluationRequest {
                code,
                options: EvaluateOptions {
                    modules: !run.no_modules,
                },
                timeout_ms: config.timeout_ms,
            })
            .await?;
        Ok::<_, folio_core::EvalError>((capability, output, started.elapsed()))
    }
    .await;
    channel.terminate().await;
    METRICS.flush();

    let (capability, output, elapsed) = match outcome {
        Ok(done) => done,
        Err(err) if err.is_fatal() => bail!("renderer failure: {}", err.message()),
        Err(err) => bail!("{}", err.message()),
    };

    let summary = RenderSummary {
        artifact: output.artifact.as_str().to_string(),
        elapsed_ms: elapsed.as_millis() as u64,
        renderer_version: capability.version,
        layout_nodes: output.layout.as_ref().map(|tree| tree.len()),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if show_layout {
        match &output.layout {
            Some(tree) => print!("{}", tree.outline()),
            None => eprintln!("renderer returned no layout"),
        }
    }
    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn describe(state: &PreviewState) -> String {
    match (&state.error, &state.artifact) {
        (Some(err), _) if err.fatal => format!("renderer failure: {}", err.message),
        (Some(err), _) => format!("error: {}", err.message),
        (None, Some(artifact)) => format!(
            "rendered {} in {}ms",
            artifact.as_str(),
            state.elapsed_ms.unwrap_or_default()
        ),
        (None, None) if state.ready => "ready".to_string(),
        (None, None) => "starting".to_string(),
    }
}

async fn cmd_watch(
    mut config: FolioConfig,
    file: &Path,
    run: &RunArgs,
    interval_ms: u64,
) -> Result<()> {
    run.apply(&mut config)?;
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let launcher = ProcessLauncher::from_command(&config.renderer)?;
    let channel = EvaluationChannel::new(Arc::new(launcher), config.channel_config());
    let handle = Orchestrator::spawn(
        channel,
        config.orchestrator_config(),
        folio_core::ResolvedSession {
            code,
            modules: !run.no_modules,
            from_link: false,
        },
        Arc::new(TracingSink),
    );
    info!(session_id = %handle.session_id(), file = %file.display(), "watching");

    let mut updates = handle.subscribe();
    let mut last_seen = modified(file);
    let mut last_line = String::new();
    let mut poll = tokio::time::interval(Duration::from_millis(interval_ms.max(50)));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = describe(&updates.borrow_and_update());
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
            }
            _ = poll.tick() => {
                let now = modified(file);
                if now == last_seen {
                    continue;
                }
                last_seen = now;
                match std::fs::read_to_string(file) {
                    Ok(code) => handle.set_code(code)?,
                    Err(err) => eprintln!("warning: could not read {}: {err}", file.display()),
                }
            }
        }
    }

    handle.shutdown().await.ok();
    Ok(())
}
