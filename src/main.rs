use wallet_insights::{BigQueryEngine, CostPolicy, InsightsError, WalletInsights, WalletQuery};

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "wallet-insights")]
#[command(about = "Cost-guarded blockchain wallet queries against BigQuery")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs)]
struct WalletArgs {
    /// Wallet address to query
    wallet: String,

    /// Number of days to look back (capped by MAX_DAYS_TO_LOOK_BACK)
    #[arg(short, long)]
    days: Option<i64>,

    /// Maximum number of rows to return (capped by MAX_TRANSACTION_LIMIT)
    #[arg(short, long)]
    limit: Option<i64>,
}

impl From<WalletArgs> for WalletQuery {
    fn from(args: WalletArgs) -> Self {
        WalletQuery {
            wallet_address: args.wallet,
            lookback_days: args.days,
            result_cap: args.limit,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Latest USDC transfers for an Ethereum wallet
    Usdc(WalletArgs),
    /// ETH transfers with gas costs
    Eth(WalletArgs),
    /// SOL token transfers for a Solana wallet
    Sol(WalletArgs),
    /// Top tokens by volume for an Ethereum wallet
    TopTokens(WalletArgs),
    /// First seen, transaction count and contract status of a wallet
    WalletInfo(WalletArgs),
    /// Run a read-only SQL query behind the cost guard
    Query {
        /// SQL text
        #[arg(long)]
        sql: String,

        /// Also write the rows as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Dry-run a query and report its projected scan size
    Estimate {
        /// SQL text
        #[arg(long)]
        sql: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let policy = CostPolicy::from_env()?;
    let engine = BigQueryEngine::from_env()?;
    info!(
        "Using project {} with a {} GB scan ceiling",
        engine.project_id(),
        policy.max_query_size_gb
    );
    let insights = WalletInsights::new(Arc::new(engine), policy);

    match run(&insights, args.command).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("{}", e);
            if let Some(hint) = e.remediation_hint() {
                eprintln!("\n{}", hint);
            }
            Err(e.into())
        }
    }
}

async fn run(insights: &WalletInsights, command: Commands) -> std::result::Result<(), InsightsError> {
    match command {
        Commands::Usdc(args) => print_json(&insights.usdc_transactions(&args.into()).await?),
        Commands::Eth(args) => print_json(&insights.eth_transfers(&args.into()).await?),
        Commands::Sol(args) => print_json(&insights.sol_transfers(&args.into()).await?),
        Commands::TopTokens(args) => print_json(&insights.top_tokens(&args.into()).await?),
        Commands::WalletInfo(args) => print_json(&insights.wallet_info(&args.into()).await?),
        Commands::Query { sql, output } => {
            let outcome = insights.run_query(&sql).await?;
            if let (Some(path), Some(rows)) = (output, outcome.clone().completed()) {
                std::fs::write(&path, serde_json::to_string_pretty(&rows)?)?;
                info!("Results saved to {}", path.display());
            }
            print_json(&outcome)
        }
        Commands::Estimate { sql } => print_json(&insights.estimate(&sql).await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> std::result::Result<(), InsightsError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
