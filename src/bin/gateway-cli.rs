use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the edge gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Manage routes
    Routes {
        #[command(subcommand)]
        command: RouteCommands,
    },
    /// Inspect or override circuit breakers
    Breakers {
        #[command(subcommand)]
        command: BreakerCommands,
    },
    /// Show rate-limit counters and totals
    RateLimits,
    /// List the instances of a service
    Instances { service: String },
}

#[derive(Subcommand)]
enum RouteCommands {
    /// List routes, optionally for one service
    List {
        #[arg(long)]
        service: Option<String>,
    },
    Get { id: String },
    /// Add a route from a JSON file
    Add { file: PathBuf },
    Remove { id: String },
    Enable { id: String },
    Disable { id: String },
    /// Dry-run validate a route from a JSON file
    Validate { file: PathBuf },
    /// Print the whole table as a document
    Export,
    /// Import a document from a JSON file
    Import {
        file: PathBuf,
        /// replace or merge
        #[arg(long, default_value = "replace")]
        mode: String,
    },
}

#[derive(Subcommand)]
enum BreakerCommands {
    List,
    Get { target: String },
    Reset { target: String },
    ForceOpen {
        target: String,
        #[arg(long)]
        reason: Option<String>,
    },
    ForceClose {
        target: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::RateLimits => client.get(format!("{}/admin/rate-limits", base)),
        Commands::Instances { service } => {
            client.get(format!("{}/admin/services/{}/instances", base, service))
        }
        Commands::Routes { command } => match command {
            RouteCommands::List { service } => {
                let request = client.get(format!("{}/admin/routes", base));
                match service {
                    Some(service) => request.query(&[("service", service)]),
                    None => request,
                }
            }
            RouteCommands::Get { id } => client.get(format!("{}/admin/routes/{}", base, id)),
            RouteCommands::Add { file } => client
                .post(format!("{}/admin/routes", base))
                .json(&read_json(&file)?),
            RouteCommands::Remove { id } => client.delete(format!("{}/admin/routes/{}", base, id)),
            RouteCommands::Enable { id } => client
                .post(format!("{}/admin/routes/{}/toggle", base, id))
                .json(&json!({ "active": true })),
            RouteCommands::Disable { id } => client
                .post(format!("{}/admin/routes/{}/toggle", base, id))
                .json(&json!({ "active": false })),
            RouteCommands::Validate { file } => client
                .post(format!("{}/admin/routes/validate", base))
                .json(&read_json(&file)?),
            RouteCommands::Export => client.get(format!("{}/admin/routes/export", base)),
            RouteCommands::Import { file, mode } => client
                .post(format!("{}/admin/routes/import", base))
                .query(&[("mode", mode)])
                .json(&read_json(&file)?),
        },
        Commands::Breakers { command } => match command {
            BreakerCommands::List => client.get(format!("{}/admin/circuit-breakers", base)),
            BreakerCommands::Get { target } => {
                client.get(format!("{}/admin/circuit-breakers/{}", base, target))
            }
            BreakerCommands::Reset { target } => {
                client.post(format!("{}/admin/circuit-breakers/{}/reset", base, target))
            }
            BreakerCommands::ForceOpen { target, reason } => client
                .post(format!("{}/admin/circuit-breakers/{}/force-open", base, target))
                .json(&json!({ "reason": reason })),
            BreakerCommands::ForceClose { target, reason } => client
                .post(format!("{}/admin/circuit-breakers/{}/force-close", base, target))
                .json(&json!({ "reason": reason })),
        },
    };

    print_response(request.send().await?).await
}

fn read_json(path: &PathBuf) -> Result<Value, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
