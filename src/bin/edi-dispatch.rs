//! Command-line front-end: submit one transaction and download what comes back.
//!
//!   EDI_DISPATCH_TOKEN=... edi-dispatch --transaction ORDER --response SHIPCONFIRM \
//!       --file po.edi --output ./out

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use edi_dispatch::{
    Console, DirectorySink, DispatchConfig, FormatType, InMemorySessionStore, Navigator,
    OrderType, ReqwestHttpClient, RequestOutcome, ResponseType, Route, StagedFile,
    TransactionType,
};

#[derive(Parser, Debug)]
#[command(name = "edi-dispatch")]
#[command(about = "Submit EDI/JSON transactions to a processing backend")]
#[command(version)]
struct Cli {
    /// Bearer token of an existing session
    #[arg(long, env = "EDI_DISPATCH_TOKEN", hide_env_values = true)]
    token: String,

    /// JSON file with dispatcher settings; flags override it
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, env = "EDI_DISPATCH_ENDPOINT")]
    endpoint: Option<String>,

    /// Transaction type (ORDER, ASN, ITEM, GETSCHEMA)
    #[arg(long, short = 't', default_value = "ORDER")]
    transaction: TransactionType,

    /// Response type; defaults to the first legal one for the transaction type
    #[arg(long, short = 'r')]
    response: Option<ResponseType>,

    /// Order type (LTL, PARCEL)
    #[arg(long, default_value = "LTL")]
    order_type: OrderType,

    /// Input format (EDI, JSON)
    #[arg(long, default_value = "EDI")]
    format: FormatType,

    /// Input file; not used for GETSCHEMA
    #[arg(long, short = 'f')]
    file: Option<PathBuf>,

    /// Directory the returned artifacts are written to
    #[arg(long, short = 'o', default_value = ".")]
    output: PathBuf,

    /// Client countdown in seconds
    #[arg(long)]
    countdown_secs: Option<u64>,

    /// Transport timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

/// Navigation has no screen to change here; it is only reported.
struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: Route) {
        tracing::info!(%route, "Session route changed");
    }
}

async fn load_config(cli: &Cli) -> anyhow::Result<DispatchConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => DispatchConfig::default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(secs) = cli.countdown_secs {
        config.countdown_secs = secs;
    }
    if let Some(ms) = cli.timeout_ms {
        config.request_timeout_ms = ms;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("edi_dispatch=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli).await?;

    let session = Arc::new(InMemorySessionStore::from_token(cli.token.clone()));
    let console = Console::new(
        ReqwestHttpClient::new(),
        session,
        Arc::new(LogNavigator),
        config,
    );
    if !console.start() {
        bail!("No authenticated session");
    }

    let dispatcher = console.dispatcher();
    dispatcher.set_transaction_type(cli.transaction);
    if let Some(response) = cli.response
        && !dispatcher.set_response_type(response)
    {
        let legal: Vec<String> = cli
            .transaction
            .legal_response_types()
            .iter()
            .map(ToString::to_string)
            .collect();
        bail!(
            "{} is not a valid response type for {} (expected one of {})",
            response,
            cli.transaction,
            legal.join(", ")
        );
    }
    dispatcher.set_order_type(cli.order_type);
    dispatcher.set_format(cli.format);

    match &cli.file {
        Some(path) if !dispatcher.is_file_input_disabled() => {
            dispatcher.stage_file(StagedFile::from_path(path).await?)?;
        }
        Some(path) => {
            tracing::warn!(file = %path.display(), transaction = %cli.transaction, "Ignoring input file");
        }
        None => {}
    }

    let submission = dispatcher.submit()?;
    println!("Submitted {}", submission.correlation_id());

    let outcome = submission.outcome().await?;
    if let Some(notice) = outcome.error_notice() {
        console.teardown();
        bail!(notice.message);
    }
    if let RequestOutcome::Succeeded(request) = &outcome {
        for result in request.state.results.iter().filter(|r| !r.success) {
            eprintln!("{}: {}", result.filename, result.message);
        }
    }

    let output = console.output(DirectorySink::new(&cli.output));
    let count = output.download_all().await?;
    println!("Wrote {} artifact(s) to {}", count, cli.output.display());

    console.teardown();
    Ok(())
}
