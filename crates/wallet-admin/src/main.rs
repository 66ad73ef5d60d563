// wallet-admin - operator CLI for the wallet server

mod client;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use uuid::Uuid;

use client::AdminClient;

/// wallet-admin - Inspect and reconcile wallet top-ups
#[derive(Parser)]
#[command(name = "wallet-admin")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the wallet server
    #[arg(long, env = "WALLET_SERVER_URL", default_value = "http://localhost:3000")]
    server: String,

    /// Admin bearer token
    #[arg(long, env = "WALLET_ADMIN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Payment provider slug
    #[arg(long, default_value = "paypal")]
    provider: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List intents still awaiting a terminal outcome
    Pending {
        /// Only intents older than this many minutes
        #[arg(short, long, default_value_t = 10)]
        minutes: i64,

        /// Maximum number of intents
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Re-verify one order with the provider and credit it if paid
    Capture {
        /// Provider order id
        order_id: String,
    },
    /// Run a reconciliation sweep now
    Reconcile {
        #[arg(short, long, default_value_t = 10)]
        minutes: i64,

        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Credit back a fulfillment order
    Refund {
        /// Fulfillment order id
        order_id: String,

        #[arg(long)]
        user: Uuid,

        #[arg(long)]
        amount: String,

        #[arg(long)]
        currency: String,
    },
    /// Apply a signed balance correction
    Adjust {
        user_id: Uuid,

        /// Signed amount, e.g. "-2.50"
        #[arg(long, allow_hyphen_values = true)]
        amount: String,

        #[arg(long)]
        currency: String,

        #[arg(long)]
        reason: String,

        /// Idempotency key; re-running with the same key is a no-op
        #[arg(long)]
        key: String,
    },
    /// Compare a wallet balance against its ledger
    Consistency { user_id: Uuid },
    /// Show a wallet balance with recent entries
    Balance { user_id: Uuid },
}

fn main() {
    let cli = Cli::parse();
    let client = AdminClient::new(&cli.server, cli.token.clone());

    let result = match cli.command {
        Commands::Pending { minutes, limit } => handle_pending(&client, &cli.provider, minutes, limit),
        Commands::Capture { order_id } => handle_capture(&client, &cli.provider, &order_id),
        Commands::Reconcile { minutes, limit } => {
            handle_reconcile(&client, &cli.provider, minutes, limit)
        }
        Commands::Refund {
            order_id,
            user,
            amount,
            currency,
        } => handle_refund(&client, &order_id, user, &amount, &currency),
        Commands::Adjust {
            user_id,
            amount,
            currency,
            reason,
            key,
        } => handle_adjust(&client, user_id, &amount, &currency, &reason, &key),
        Commands::Consistency { user_id } => handle_consistency(&client, user_id),
        Commands::Balance { user_id } => handle_balance(&client, user_id),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Renders a JSON scalar without string quotes.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn colored_status(status: &str) -> String {
    match status {
        "COMPLETED" | "credited" => status.green().to_string(),
        "FAILED" | "EXPIRED" | "failed" | "expired" => status.red().to_string(),
        _ => status.yellow().to_string(),
    }
}

fn handle_pending(client: &AdminClient, provider: &str, minutes: i64, limit: i64) -> anyhow::Result<()> {
    let response = client.pending(provider, minutes, limit)?;
    let intents = response["intents"].as_array().cloned().unwrap_or_default();

    if intents.is_empty() {
        println!("No pending intents older than {} minutes.", minutes);
        return Ok(());
    }

    println!("{} pending intent(s):", intents.len());
    println!();
    for intent in &intents {
        println!(
            "  {}  {:>10} {}  {}  {} min  user {}",
            text(&intent["orderId"]).bold(),
            text(&intent["amount"]),
            text(&intent["currency"]),
            colored_status(&text(&intent["status"])),
            text(&intent["ageMinutes"]),
            text(&intent["userId"]),
        );
    }
    Ok(())
}

fn print_capture(result: &Value) {
    let intent = &result["intent"];
    let outcome = text(&result["outcome"]);
    let marker = if result["credited"] == Value::Bool(true) {
        "✓".green().bold()
    } else {
        "•".dimmed()
    };

    println!(
        "{} {} {}",
        marker,
        text(&intent["orderId"]).bold(),
        colored_status(&outcome)
    );
    println!("  Status:   {}", colored_status(&text(&intent["status"])));
    println!("  Amount:   {} {}", text(&intent["amount"]), text(&intent["currency"]));
    if let Some(capture_id) = intent["captureId"].as_str() {
        println!("  Capture:  {}", capture_id);
    }
    if result["alreadyDone"] == Value::Bool(true) {
        println!("  {}", "Already settled by an earlier trigger".dimmed());
    }
}

fn handle_capture(client: &AdminClient, provider: &str, order_id: &str) -> anyhow::Result<()> {
    let result = client.capture(provider, order_id)?;
    print_capture(&result);
    Ok(())
}

fn handle_reconcile(client: &AdminClient, provider: &str, minutes: i64, limit: i64) -> anyhow::Result<()> {
    let report = client.reconcile(provider, minutes, limit)?;
    let entries = report["results"].as_array().cloned().unwrap_or_default();

    let mut credited = 0;
    let mut failed = 0;
    for entry in &entries {
        let order_id = text(&entry["orderId"]);
        if let Some(error) = entry["error"].as_str() {
            failed += 1;
            println!("{} {}  {}", "✗".red().bold(), order_id, error.red());
            continue;
        }
        let result = &entry["result"];
        if result["credited"] == Value::Bool(true) {
            credited += 1;
        }
        println!(
            "  {}  {}",
            order_id,
            colored_status(&text(&result["outcome"]))
        );
    }

    println!();
    println!(
        "Scanned {}, credited {}, errors {}",
        entries.len(),
        credited.to_string().green(),
        if failed > 0 {
            failed.to_string().red()
        } else {
            failed.to_string().normal()
        }
    );
    Ok(())
}

fn print_ledger_outcome(outcome: &Value) {
    let tx = &outcome["transaction"];
    if outcome["created"] == Value::Bool(true) {
        println!("{} Entry recorded", "✓".green().bold());
    } else {
        println!("{} Entry already existed; nothing changed", "•".dimmed());
    }
    println!("  Key:      {}", text(&tx["idempotencyKey"]));
    println!("  Amount:   {} {}", text(&tx["amount"]), text(&tx["currency"]));
    if !outcome["balance"].is_null() {
        println!("  Balance:  {}", text(&outcome["balance"]));
    }
}

fn handle_refund(
    client: &AdminClient,
    order_id: &str,
    user: Uuid,
    amount: &str,
    currency: &str,
) -> anyhow::Result<()> {
    let outcome = client.refund(order_id, user, amount, currency)?;
    print_ledger_outcome(&outcome);
    Ok(())
}

fn handle_adjust(
    client: &AdminClient,
    user_id: Uuid,
    amount: &str,
    currency: &str,
    reason: &str,
    key: &str,
) -> anyhow::Result<()> {
    let outcome = client.adjust(user_id, amount, currency, reason, key)?;
    print_ledger_outcome(&outcome);
    Ok(())
}

fn handle_consistency(client: &AdminClient, user_id: Uuid) -> anyhow::Result<()> {
    let check = client.consistency(user_id)?;
    let balance = text(&check["balance"]);
    let ledger_sum = text(&check["ledgerSum"]);

    if check["consistent"] == Value::Bool(true) {
        println!("{} Wallet matches its ledger", "✓".green().bold());
    } else {
        println!("{} Wallet does not match its ledger", "✗".red().bold());
    }
    println!("  Balance:    {}", balance);
    println!("  Ledger sum: {}", ledger_sum);

    if check["consistent"] == Value::Bool(true) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Balance drift for user {}", user_id))
    }
}

fn handle_balance(client: &AdminClient, user_id: Uuid) -> anyhow::Result<()> {
    let wallet = client.balance(user_id)?;

    println!(
        "Balance: {} {}",
        text(&wallet["balance"]).bold(),
        text(&wallet["currency"])
    );

    let pending = wallet["pending"].as_array().cloned().unwrap_or_default();
    if !pending.is_empty() {
        println!();
        println!("Pending top-ups:");
        for intent in &pending {
            println!(
                "  {}  {} {}  {}",
                text(&intent["orderId"]),
                text(&intent["amount"]),
                text(&intent["currency"]),
                colored_status(&text(&intent["status"]))
            );
        }
    }

    let recent = wallet["recentTransactions"].as_array().cloned().unwrap_or_default();
    if !recent.is_empty() {
        println!();
        println!("Recent entries:");
        for tx in &recent {
            println!(
                "  {}  {:<10} {:>10}  {}",
                text(&tx["createdAt"]),
                text(&tx["type"]),
                text(&tx["amount"]),
                text(&tx["description"]).dimmed()
            );
        }
    }
    Ok(())
}
