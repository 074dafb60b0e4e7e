use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "config-cli")]
#[command(about = "Inspect and change a running server's configuration", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:19122")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one value
    Get { category: String, key: String },
    /// Change one value
    Set {
        category: String,
        key: String,
        value: String,
        /// Send VALUE as a JSON literal (number, boolean) instead of a string
        #[arg(long)]
        json: bool,
    },
    /// List every field with its current value
    Dump,
    /// Check the server is up
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Get { category, key } => client.get(value_url(base, &category, &key)?).send().await?,
        Commands::Set {
            category,
            key,
            value,
            json,
        } => {
            let value = if json {
                serde_json::from_str::<Value>(&value)?
            } else {
                Value::String(value)
            };
            client
                .put(value_url(base, &category, &key)?)
                .json(&json!({ "value": value }))
                .send()
                .await?
        }
        Commands::Dump => client.get(format!("{base}/config")).send().await?,
        Commands::Health => client.get(format!("{base}/health")).send().await?,
    };

    print_response(res).await
}

fn value_url(base: &str, category: &str, key: &str) -> Result<reqwest::Url, Box<dyn std::error::Error>> {
    let mut url = reqwest::Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| format!("{base} cannot be a base URL"))?
        .pop_if_empty()
        .extend(["config", category, key]);
    Ok(url)
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }
    if !status.is_success() {
        eprintln!("Error: server returned {status}");
        std::process::exit(1);
    }
    Ok(())
}
