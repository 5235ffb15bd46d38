//! kvstore command-line client
//!
//! Reads, writes, and watches keys on a kvstore server.

mod formatter;

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use clap::{Parser, Subcommand};
use formatter::{Formatter, OutputFormat};
use futures::{Stream, StreamExt};
use kvstore_client::{Client, ClientConfig};
use kvstore_proto::ChangeEvent;

/// kvstore command-line client
#[derive(Parser, Debug)]
#[command(name = "kvstore")]
#[command(version, about = "kvstore command-line client")]
pub struct Args {
    /// Server address (host:port)
    #[arg(
        short,
        long,
        env = "KVSTORE_SERVER",
        default_value = kvstore_client::config::DEFAULT_ADDRESS
    )]
    pub server: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 5)]
    pub timeout: u64,

    /// Output format
    #[arg(long, default_value = "text", value_enum)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read the value stored under a key
    Get {
        /// Key to read
        key: String,
    },
    /// Store a value under a key
    Set {
        /// Key to write
        key: String,
        /// Value to store
        value: String,
    },
    /// Stream changes to keys starting with a prefix
    Subscribe {
        /// Key prefix to watch
        prefix: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kvstore_cli=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::new(&args.server).with_timeout(Duration::from_secs(args.timeout));
    let formatter = formatter::create_formatter(args.format);

    let client = Client::connect(config)
        .await
        .map_err(|e| format!("failed to connect to server: {}", e))?;
    notice(&*formatter, &format!("Connected to server: {}", args.server));

    match args.command {
        Command::Get { key } => {
            let value = client
                .get(&key)
                .await
                .map_err(|e| format!("get failed: {}", e))?;
            println!("{}", formatter.format_get(&key, value.as_deref()));
        }
        Command::Set { key, value } => {
            let result = client
                .set(&key, &value)
                .await
                .map_err(|e| format!("set failed: {}", e))?;
            println!("{}", formatter.format_set(&key, &value, &result));
        }
        Command::Subscribe { prefix } => subscribe(&client, &prefix, &*formatter).await?,
    }

    client.close().await;
    Ok(())
}

/// Print events until the server closes the stream or ctrl+c is pressed.
async fn subscribe(
    client: &Client,
    prefix: &str,
    formatter: &dyn Formatter,
) -> Result<(), Box<dyn std::error::Error>> {
    let events = client
        .subscribe(prefix)
        .await
        .map_err(|e| format!("subscribe failed: {}", e))?;

    notice(formatter, &format!("Subscribed to pattern: {}", prefix));
    notice(formatter, "Listening for changes (Ctrl+C to exit)\n");

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    match watch(events.into_stream(), interrupt, formatter, &mut std::io::stdout()).await? {
        WatchEnd::Interrupted => tracing::debug!(prefix, "interrupted"),
        WatchEnd::Closed => notice(formatter, "Stream closed by server"),
    }
    Ok(())
}

/// Why [`watch`] returned.
#[derive(Debug, PartialEq, Eq)]
enum WatchEnd {
    Interrupted,
    Closed,
}

/// Write each event to `out` until the stream ends or `interrupt` resolves.
///
/// `interrupt` is polled across the whole loop, so a signal that lands
/// while an event is being printed is still seen.
async fn watch<S, W>(
    events: S,
    interrupt: impl Future<Output = ()>,
    formatter: &dyn Formatter,
    out: &mut W,
) -> Result<WatchEnd, Box<dyn std::error::Error>>
where
    S: Stream<Item = Result<ChangeEvent, kvstore_client::Error>>,
    W: Write,
{
    tokio::pin!(events);
    tokio::pin!(interrupt);

    loop {
        let next = tokio::select! {
            _ = &mut interrupt => return Ok(WatchEnd::Interrupted),
            next = events.next() => next,
        };

        match next {
            Some(Ok(event)) => writeln!(out, "{}", formatter.format_event(&event))?,
            Some(Err(e)) => return Err(format!("error receiving event: {}", e).into()),
            None => return Ok(WatchEnd::Closed),
        }
    }
}

fn notice(formatter: &dyn Formatter, message: &str) {
    if let Some(line) = formatter.format_notice(message) {
        println!("{}", line);
    }
}
