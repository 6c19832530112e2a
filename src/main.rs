use bills_backend::bills::PROVIDER;
use bills_backend::config::{ConfigHandle, DEFAULT_CONFIG_PATH};
use bills_backend::ids::now_millis;
use bills_backend::service::App;
use bills_backend::{Error, Result};
use serde::Serialize;
use serde_json::json;
use std::env;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: bills <command>
  ingest <file>            ingest an invoice file
  list [limit] [cursor]    list runs, newest first
  show <run-id>            show one run
  audits <run-id>          show audit payloads for a run
  draft <run-id>           create a draft bill for a run
  status                   OAuth connection status
  auth-url                 print the consent URL
  connect <code>           exchange an authorization code
  disconnect               forget the stored token
  set-org <id>             set the accounting organization id";

#[tokio::main]
async fn main() {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(e) = run(&args).await {
        error!(error = %e, "Command failed");
        println!("{}", serde_json::to_string_pretty(&e.to_json()).unwrap_or_default());
        std::process::exit(if e.is_client_error() { 2 } else { 1 });
    }
}

async fn run(args: &[String]) -> Result<()> {
    let config_path = env::var("BILLS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = ConfigHandle::from_file(&config_path)?;
    let app = App::open(config).await?;
    info!(config = %config_path, "Backend ready");

    let arg = |i: usize| nth_arg(args, i);

    match arg(0)? {
        "ingest" => {
            let path = arg(1)?;
            let bytes = tokio::fs::read(path).await?;
            let file_name = Path::new(path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(path);
            let out = app.ingest(file_name, &bytes).await?;
            print_json(&json!({ "created": out.created, "duplicate": !out.created, "run": out.run }))
        }
        "list" => {
            let limit = args.get(1).map(|s| parse_num(s, "limit")).transpose()?;
            let cursor = args.get(2).map(|s| parse_num(s, "cursor")).transpose()?;
            print_json(&app.list_runs(limit.map(|l: i64| l.max(0) as usize), cursor)?)
        }
        "show" => print_json(&app.get_run(arg(1)?)?),
        "audits" => print_json(&app.audits(arg(1)?)?),
        "draft" => print_json(&app.create_draft_bill(arg(1)?).await?),
        "status" => print_json(&app.connection_status()?),
        "auth-url" => {
            let state = format!("bills-{}", now_millis());
            println!("{}", app.tokens().authorize_url(PROVIDER, &state)?);
            Ok(())
        }
        "connect" => {
            app.tokens().exchange_code(PROVIDER, arg(1)?).await?;
            print_json(&app.connection_status()?)
        }
        "disconnect" => print_json(&json!({ "removed": app.tokens().disconnect(PROVIDER)? })),
        "set-org" => {
            app.config().set_organization_id(arg(1)?)?;
            print_json(&json!({ "organizationId": arg(1)? }))
        }
        other => Err(Error::InvalidInput(format!("unknown command '{other}'\n{USAGE}"))),
    }
}

fn nth_arg(args: &[String], i: usize) -> Result<&str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidInput(USAGE.to_string()))
}

fn parse_num(s: &str, what: &str) -> Result<i64> {
    s.parse()
        .map_err(|_| Error::InvalidInput(format!("{what} must be a number, got '{s}'")))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
