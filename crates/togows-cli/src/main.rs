use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use togows_core::config_file::{self, ConfigFile, ServiceConfig};
use togows_core::{CancellationToken, CapabilityKind, ClientConfig, ResponseHandle, TogoClient};
use tracing_subscriber::EnvFilter;

mod output;

use output::ColorMode;

/// TogoWS client - fetch, search and convert records across biological databases
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Service root URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Fail on unlisted fields, formats and search databases instead of warning
    #[arg(long, global = true)]
    strict: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log requests to stderr (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch one or more entries
    Fetch {
        /// Database name, e.g. pubmed or uniprot
        db: String,

        /// Entry identifiers (separate arguments or comma-delimited)
        #[arg(required = true)]
        ids: Vec<String>,

        /// Return only this field of each entry
        #[arg(long)]
        field: Option<String>,

        /// Output format, e.g. fasta or json
        #[arg(long)]
        format: Option<String>,
    },

    /// Search a database, optionally for one window of results
    Search {
        db: String,
        query: String,

        /// One-based index of the first result
        #[arg(long, allow_negative_numbers = true)]
        offset: Option<i64>,

        /// Number of results to return
        #[arg(long, allow_negative_numbers = true)]
        count: Option<i64>,

        #[arg(long)]
        format: Option<String>,
    },

    /// Print the number of hits for a query
    Count { db: String, query: String },

    /// Print every identifier matching a query, one per line
    SearchAll {
        db: String,
        query: String,

        /// Identifiers requested per window
        #[arg(long)]
        batch: Option<u64>,
    },

    /// Convert records between formats
    Convert {
        /// Input file, or `-` for stdin
        input: PathBuf,

        /// Input format, e.g. genbank
        #[arg(long)]
        from: String,

        /// Output format, e.g. fasta
        #[arg(long)]
        to: String,
    },

    /// List databases served by entry fetch (or search)
    Databases {
        /// List search databases instead
        #[arg(long)]
        search: bool,
    },

    /// List fields of an entry database
    Fields { db: String },

    /// List output formats of an entry database
    Formats { db: String },

    /// Show the effective configuration
    Config {
        /// Write the effective service settings to the user config file
        #[arg(long)]
        save: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,togows_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: CLI flags > env vars > config file > defaults
fn resolve_config(cli: &Cli, file: &ConfigFile) -> anyhow::Result<ClientConfig> {
    let mut config = file.to_client_config();

    if let Ok(url) = std::env::var("TOGOWS_BASE_URL") {
        config.base_url = url;
    }
    if let Ok(secs) = std::env::var("TOGOWS_TIMEOUT") {
        config.timeout_secs = secs
            .parse()
            .with_context(|| format!("TOGOWS_TIMEOUT is not a number of seconds: {secs}"))?;
    }

    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(secs) = cli.timeout {
        config.timeout_secs = secs;
    }
    if cli.strict {
        config.strict_capabilities = true;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let color = ColorMode(!cli.no_color);
    let file = config_file::load_config();
    let config = resolve_config(&cli, &file)?;
    tracing::debug!(
        base_url = %config.base_url,
        timeout_secs = config.timeout_secs,
        min_interval_ms = config.min_interval_ms,
        strict = config.strict_capabilities,
        "resolved configuration"
    );

    let client = TogoClient::new(config).context("Failed to build HTTP client")?;

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    run(&client, &file, cli.command, color, &cancel).await
}

async fn run(
    client: &TogoClient,
    file: &ConfigFile,
    command: Command,
    color: ColorMode,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match command {
        Command::Fetch {
            db,
            ids,
            field,
            format,
        } => {
            let handle = client
                .fetch(&db, ids, field.as_deref(), format.as_deref(), cancel)
                .await
                .with_context(|| format!("Fetch from {db} failed"))?;
            print_body(handle, &mut out, color).await
        }
        Command::Search {
            db,
            query,
            offset,
            count,
            format,
        } => {
            let handle = client
                .search_window(&db, &query, offset, count, format.as_deref(), cancel)
                .await
                .with_context(|| format!("Search of {db} failed"))?;
            print_body(handle, &mut out, color).await
        }
        Command::Count { db, query } => {
            let total = client
                .search_count(&db, &query, cancel)
                .await
                .with_context(|| format!("Count on {db} failed"))?;
            writeln!(out, "{total}")?;
            Ok(())
        }
        Command::SearchAll { db, query, batch } => {
            let pager = client.search_iter(&db, &query, batch, cancel.clone())?;
            let mut ids = std::pin::pin!(pager.into_stream());
            let mut printed = 0u64;
            while let Some(id) = ids.next().await {
                let id = id.with_context(|| {
                    format!("Search of {db} stopped after {printed} identifiers")
                })?;
                writeln!(out, "{id}")?;
                printed += 1;
            }
            Ok(())
        }
        Command::Convert { input, from, to } => {
            let handle = if input.as_os_str() == "-" {
                client
                    .convert_reader(tokio::io::stdin(), &from, &to, cancel)
                    .await
            } else {
                let reader = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("Cannot open {}", input.display()))?;
                client.convert_reader(reader, &from, &to, cancel).await
            }
            .with_context(|| format!("Conversion {from} -> {to} failed"))?;
            print_body(handle, &mut out, color).await
        }
        Command::Databases { search } => {
            let kind = if search {
                CapabilityKind::Search
            } else {
                CapabilityKind::Entry
            };
            let names = client.supported_databases(kind, cancel).await?;
            output::print_names(&mut out, names.iter())?;
            Ok(())
        }
        Command::Fields { db } => {
            let names = client.fields_for(&db, cancel).await?;
            output::print_names(&mut out, names.iter())?;
            Ok(())
        }
        Command::Formats { db } => {
            let names = client.formats_for(&db, cancel).await?;
            output::print_names(&mut out, names.iter())?;
            Ok(())
        }
        Command::Config { save } => show_config(client.config(), file, save, color),
    }
}

/// Report capability warnings on stderr, then copy the body to `out`.
async fn print_body(
    mut handle: ResponseHandle,
    out: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<()> {
    output::print_warnings(&mut std::io::stderr(), handle.warnings(), color)?;
    while let Some(line) = handle.read_line().await? {
        out.write_all(line.as_bytes())?;
    }
    out.flush()?;
    handle.close();
    Ok(())
}

fn show_config(
    config: &ClientConfig,
    file: &ConfigFile,
    save: bool,
    color: ColorMode,
) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    output::print_config(&mut out, config, color)?;

    if save {
        let updated = config_file::merge(
            file.clone(),
            ConfigFile {
                service: Some(ServiceConfig {
                    base_url: Some(config.base_url.clone()),
                    user_agent: None,
                    timeout_secs: Some(config.timeout_secs),
                }),
                ..Default::default()
            },
        );
        let path = config_file::save_config(&updated).map_err(anyhow::Error::msg)?;
        writeln!(out)?;
        writeln!(out, "Saved to {}", path.display())?;
    }
    Ok(())
}
