mod output;

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use envelope_core::{Client, ClientConfig, RequestError, RequestOptions};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use crate::output::{Output, StderrNotifier};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.log_format) {
        eprintln!("warning: {err:#}");
    }

    match run(cli).await {
        Ok(output) => {
            if let Err(err) = output.write_to(&mut io::stdout().lock()) {
                eprintln!("error: failed to write output: {err}");
                process::exit(CliError::failure(err).exit_code());
            }
        }
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            process::exit(err.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<Output> {
    let config = cli
        .connection
        .apply(ClientConfig::from_env().map_err(|err| CliError::validation(err.to_string()))?)?;
    let client = Client::builder(config)
        .notifier(Arc::new(StderrNotifier))
        .build()
        .map_err(|err| CliError::failure(anyhow!("failed to build HTTP client: {err}")))?;

    let interrupt = tokio::spawn({
        let client = client.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling pending requests");
                client.cancel_all_pending();
            }
        }
    });

    let result = execute(&client, cli.command).await;
    interrupt.abort();
    client.flush_notices();
    result
}

#[derive(Parser)]
#[command(name = "envelope", about = "Call envelope-protocol HTTP APIs from the terminal")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[arg(long, global = true, env = "ENVELOPE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

/// Overrides applied on top of the environment configuration.
#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Retry budget for requests that get no response.
    #[arg(long, global = true)]
    retry: Option<u32>,
}

impl ConnectionArgs {
    fn apply(&self, mut config: ClientConfig) -> CliResult<ClientConfig> {
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(retry) = self.retry {
            config.retry_count = retry;
        }
        if config.base_url.trim().is_empty() {
            return Err(CliError::validation(
                "no base URL configured; pass --base-url or set ENVELOPE_API_BASE_URL",
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Command {
    Get(GetArgs),
    Post(BodyArgs),
    Put(BodyArgs),
    Delete(PathArgs),
    Download(DownloadArgs),
}

#[derive(Args)]
struct GetArgs {
    path: String,
    /// Query parameter as `key=value`; repeat a key to send a list.
    #[arg(long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,
}

#[derive(Args)]
struct BodyArgs {
    path: String,
    /// JSON request body.
    #[arg(long)]
    data: Option<String>,
}

#[derive(Args)]
struct PathArgs {
    path: String,
}

#[derive(Args)]
struct DownloadArgs {
    path: String,
    #[arg(long)]
    out: PathBuf,
}

async fn execute(client: &Client, command: Command) -> CliResult<Output> {
    // prevent_repeat registers each call, which is what lets ctrl-c cancel it.
    let options = RequestOptions::default().prevent_repeat();
    match command {
        Command::Get(args) => {
            let params = query_params(args.params);
            let value: Value = client.get(&args.path, params, options).await?;
            Ok(Output::Json(value))
        }
        Command::Post(args) => {
            let body = parse_body(args.data.as_deref())?;
            let value: Value = client.post(&args.path, body, options).await?;
            Ok(Output::Json(value))
        }
        Command::Put(args) => {
            let body = parse_body(args.data.as_deref())?;
            let value: Value = client.put(&args.path, body, options).await?;
            Ok(Output::Json(value))
        }
        Command::Delete(args) => {
            let value: Value = client.delete(&args.path, None, options).await?;
            Ok(Output::Json(value))
        }
        Command::Download(args) => {
            let bytes = client.download(&args.path, None, options).await?;
            std::fs::write(&args.out, &bytes)
                .with_context(|| format!("failed to write {}", args.out.display()))
                .map_err(CliError::failure)?;
            Ok(Output::Saved {
                path: args.out,
                bytes: bytes.len(),
            })
        }
    }
}

fn parse_key_value(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{input}'")),
    }
}

fn query_params(pairs: Vec<(String, String)>) -> Option<Value> {
    if pairs.is_empty() {
        return None;
    }
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Some(Value::Object(map))
}

fn parse_body(data: Option<&str>) -> CliResult<Option<Value>> {
    data.map(|raw| {
        serde_json::from_str(raw).map_err(|err| CliError::validation(format!("--data is not valid JSON: {err}")))
    })
    .transpose()
}

fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    }
    .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

#[derive(Debug)]
enum CliError {
    Validation(String),
    Failure(anyhow::Error),
    Cancelled(String),
}

type CliResult<T> = Result<T, CliError>;

impl CliError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
            Self::Cancelled(_) => 4,
        }
    }

    fn display_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::Cancelled(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl From<RequestError> for CliError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Cancelled { reason } => Self::Cancelled(reason),
            other => Self::failure(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn start_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(mock_server::run(listener));
        format!("http://{addr}")
    }

    fn client_for(base_url: &str) -> Client {
        Client::builder(ClientConfig::new(base_url)).build().unwrap()
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "envelope",
            "get",
            "/tasks",
            "--param",
            "page=2",
            "--base-url",
            "http://localhost:3000",
            "--retry",
            "0",
        ])
        .unwrap();
        assert_eq!(cli.connection.base_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(cli.connection.retry, Some(0));
        let Command::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.params, vec![("page".to_string(), "2".to_string())]);
    }

    #[test]
    fn download_requires_out() {
        assert!(Cli::try_parse_from(["envelope", "download", "/file"]).is_err());
    }

    #[test]
    fn key_value_parser_rejects_missing_separator() {
        assert_eq!(parse_key_value("a=b=c").unwrap(), ("a".to_string(), "b=c".to_string()));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn repeated_params_become_a_list() {
        let params = query_params(vec![
            ("tag".to_string(), "a".to_string()),
            ("tag".to_string(), "b".to_string()),
            ("tag".to_string(), "c".to_string()),
            ("page".to_string(), "1".to_string()),
        ]);
        assert_eq!(params, Some(json!({"tag": ["a", "b", "c"], "page": "1"})));
        assert_eq!(query_params(Vec::new()), None);
    }

    #[test]
    fn invalid_json_body_is_a_validation_error() {
        let err = parse_body(Some("{not json")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(parse_body(None).unwrap(), None);
    }

    #[test]
    fn overrides_win_over_environment_config() {
        let args = ConnectionArgs {
            base_url: Some("http://api.test".to_string()),
            timeout_ms: Some(250),
            retry: Some(5),
        };
        let config = args.apply(ClientConfig::new("http://from-env")).unwrap();
        assert_eq!(config.base_url, "http://api.test");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.retry_count, 5);
    }

    #[test]
    fn missing_base_url_is_a_validation_error() {
        let err = ConnectionArgs::default().apply(ClientConfig::default()).unwrap_err();
        assert!(matches!(err, CliError::Validation(_)));
    }

    #[test]
    fn request_errors_map_to_exit_codes() {
        let cancelled = CliError::from(RequestError::Cancelled {
            reason: "所有请求已取消".to_string(),
        });
        assert_eq!(cancelled.exit_code(), 4);
        assert_eq!(cancelled.display_message(), "所有请求已取消");

        let empty = CliError::from(RequestError::EmptyResponse { url: "/x".to_string() });
        assert_eq!(empty.exit_code(), 3);
    }

    #[tokio::test]
    async fn post_then_get_round_trips_through_server() {
        let base = start_server().await;
        let client = client_for(&base);

        let created = execute(
            &client,
            Command::Post(BodyArgs {
                path: "/tasks".to_string(),
                data: Some(r#"{"title":"from cli"}"#.to_string()),
            }),
        )
        .await
        .unwrap();
        let Output::Json(task) = created else {
            panic!("expected JSON output");
        };
        assert_eq!(task["title"], "from cli");

        let listed = execute(
            &client,
            Command::Get(GetArgs {
                path: "/tasks".to_string(),
                params: Vec::new(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(listed, Output::Json(json!([task])));
    }

    #[tokio::test]
    async fn business_failure_exits_with_failure_code() {
        let base = start_server().await;
        let client = client_for(&base);

        let err = execute(
            &client,
            Command::Get(GetArgs {
                path: "/business/10001".to_string(),
                params: Vec::new(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.display_message().contains("10001"));
    }

    #[tokio::test]
    async fn delete_of_unknown_task_is_http_failure() {
        let base = start_server().await;
        let client = client_for(&base);

        let err = execute(
            &client,
            Command::Delete(PathArgs {
                path: "/tasks/00000000-0000-0000-0000-000000000000".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.display_message().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn download_writes_file() {
        let base = start_server().await;
        let client = client_for(&base);
        let out = std::env::temp_dir().join(format!("envelope-cli-{}.bin", uuid::Uuid::new_v4()));

        let output = execute(
            &client,
            Command::Download(DownloadArgs {
                path: "/download".to_string(),
                out: out.clone(),
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            output,
            Output::Saved {
                path: out.clone(),
                bytes: mock_server::DOWNLOAD_BYTES.len(),
            }
        );
        assert_eq!(std::fs::read(&out).unwrap(), mock_server::DOWNLOAD_BYTES);
        std::fs::remove_file(out).unwrap();
    }
}
