use std::cell::RefCell;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ws_wrapper::config::parse_error_fields;
use ws_wrapper::{
    ConfigError, EventHandler, Listener, LocalSetSpawner, Options, Reply, RequestError, WebSocketWrapper, WrapperError,
    WsSocket,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("could not connect to {0}")]
    ConnectFailed(String),
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error(transparent)]
    Wrapper(#[from] WrapperError),
    #[error("request failed: {0}")]
    Request(#[from] RequestError),
    #[error("websocket handshake failed: {0}")]
    Handshake(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "wsw", about = "Talk the ws-wrapper protocol over a WebSocket")]
struct Cli {
    #[arg(long, env = "WSW_URL", default_value = "ws://127.0.0.1:9000")]
    url: String,

    /// Request timeout in milliseconds; 0 waits indefinitely.
    #[arg(long, env = "WS_WRAPPER_REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    #[arg(long, env = "WS_WRAPPER_MAX_SEND_QUEUE", default_value_t = ws_wrapper::config::DEFAULT_MAX_SEND_QUEUE)]
    max_send_queue: usize,

    /// Error fields sent when rejecting: `message` or `all`.
    #[arg(long, env = "WS_WRAPPER_ERROR_FIELDS", default_value = "message")]
    error_fields: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one event and exit.
    Emit(SendArgs),
    /// Send one request and print the reply as JSON.
    Request(SendArgs),
    /// Accept connections and answer `echo` and `ping` requests.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    #[arg(long, short)]
    channel: Option<String>,

    event: String,

    /// Arguments, each parsed as JSON and sent as a plain string otherwise.
    args: Vec<String>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "WSW_BIND", default_value = "127.0.0.1:9000")]
    bind: SocketAddr,

    /// Extra channels answering `echo` and `ping` besides the default one.
    #[arg(long = "channel", short)]
    channels: Vec<String>,
}

fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let options = Options::default()
        .with_request_timeout(Duration::from_millis(cli.timeout_ms))
        .with_max_send_queue(cli.max_send_queue)
        .with_error_fields(parse_error_fields(Some(cli.error_fields.as_str()))?);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    LocalSet::new().block_on(&runtime, async move {
        match cli.command {
            Command::Emit(args) => run_emit(&cli.url, options, args).await,
            Command::Request(args) => run_request(&cli.url, options, args).await,
            Command::Serve(args) => run_serve(options, args).await,
        }
    })
}

// =============================================================================
// CLIENT
// =============================================================================

async fn run_emit(url: &str, options: Options, args: SendArgs) -> Result<(), CliError> {
    let wrapper = connect(url, options).await?;
    let channel = wrapper.of(args.channel.as_deref().unwrap_or_default());
    channel.emit(&args.event, parse_args(&args.args))?;
    close(&wrapper).await;
    eprintln!("emitted {}", args.event);
    Ok(())
}

async fn run_request(url: &str, options: Options, args: SendArgs) -> Result<(), CliError> {
    let wrapper = connect(url, options).await?;
    let channel = wrapper.of(args.channel.as_deref().unwrap_or_default());
    let outcome = channel.request(&args.event, parse_args(&args.args))?.await;
    close(&wrapper).await;
    print_json(&outcome?.unwrap_or(Value::Null))
}

/// Connect and wait for the open signal.
async fn connect(url: &str, options: Options) -> Result<WebSocketWrapper, CliError> {
    let wrapper = WebSocketWrapper::with_options(options);
    let (opened_tx, opened_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = oneshot::channel();
    wrapper.once("open", notify_once(opened_tx)).once("close", notify_once(closed_tx));
    wrapper.bind(WsSocket::connect(url));

    let opened = tokio::time::timeout(CONNECT_TIMEOUT, async {
        tokio::select! {
            _ = opened_rx => true,
            _ = closed_rx => false,
        }
    })
    .await
    .map_err(|_| CliError::ConnectTimeout(url.to_owned()))?;

    if !opened {
        return Err(CliError::ConnectFailed(url.to_owned()));
    }
    info!(%url, "wsw: connected");
    Ok(wrapper)
}

/// Start the close handshake and wait briefly for it to finish.
async fn close(wrapper: &WebSocketWrapper) {
    let (closed_tx, closed_rx) = oneshot::channel();
    wrapper.once("disconnect", notify_once(closed_tx));
    wrapper.disconnect(None);
    if tokio::time::timeout(CLOSE_TIMEOUT, closed_rx).await.is_err() {
        warn!("wsw: close handshake timed out");
    }
}

// =============================================================================
// SERVER
// =============================================================================

async fn run_serve(options: Options, args: ServeArgs) -> Result<(), CliError> {
    let listener = TcpListener::bind(args.bind).await?;
    info!(addr = %args.bind, channels = ?args.channels, "wsw: listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let channels = args.channels.clone();
        tokio::task::spawn_local(async move {
            if let Err(e) = serve_connection(stream, peer, options, &channels).await {
                warn!(%peer, error = %e, "wsw: connection failed");
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    options: Options,
    channels: &[String],
) -> Result<(), CliError> {
    let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| CliError::Handshake(Box::new(e)))?;
    let wrapper = WebSocketWrapper::with_options(options);
    wrapper.set_spawner(LocalSetSpawner);

    install_handlers(&*wrapper.default_channel());
    for name in channels {
        install_handlers(&*wrapper.of(name));
    }

    let (closed_tx, closed_rx) = oneshot::channel();
    wrapper.once("disconnect", notify_once(closed_tx));
    wrapper.bind(WsSocket::accept(ws));
    info!(%peer, "wsw: client connected");

    let _ = closed_rx.await;
    info!(%peer, "wsw: client disconnected");
    Ok(())
}

fn install_handlers(channel: &impl EventHandler) {
    channel
        .on("echo", Listener::new(|args| Ok(Reply::value(Value::Array(args.to_vec())))))
        .on("ping", Listener::new(|_| Ok(Reply::value("pong"))));
}

// =============================================================================
// HELPERS
// =============================================================================

/// Listener that forwards its arguments to `tx` the first time it runs.
fn notify_once(tx: oneshot::Sender<Vec<Value>>) -> Listener {
    let slot = RefCell::new(Some(tx));
    Listener::new(move |args| {
        if let Some(tx) = slot.borrow_mut().take() {
            let _ = tx.send(args.to_vec());
        }
        Ok(Reply::empty())
    })
}

fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter().map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone()))).collect()
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_as_json_with_string_fallback() {
        let raw = vec!["1".to_owned(), r#"{"a":true}"#.to_owned(), "hello".to_owned()];
        assert_eq!(parse_args(&raw), vec![serde_json::json!(1), serde_json::json!({"a": true}), Value::from("hello")]);
    }

    #[test]
    fn cli_parses_request_with_channel() {
        let cli = Cli::try_parse_from(["wsw", "request", "-c", "chat", "login", "\"alice\""]).unwrap();
        let Command::Request(args) = cli.command else {
            panic!("expected request");
        };
        assert_eq!(args.channel.as_deref(), Some("chat"));
        assert_eq!(args.event, "login");
        assert_eq!(parse_args(&args.args), vec![Value::from("alice")]);
    }
}
