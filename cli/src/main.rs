//! Pocketbook Rates CLI
//!
//! Operator tool for the exchange-rate cache: convert amounts, inspect the
//! cached snapshot, and check what the provider supports.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pocketbook_fx::{ErrorClass, FxError};
use serde_json::json;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod total;
mod wiring;

use total::{sum_converted, AmountArg};

/// Pocketbook exchange-rate CLI
#[derive(Parser, Debug)]
#[command(name = "fxrates")]
#[command(about = "Convert amounts using the cached exchange-rate snapshot")]
struct Args {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an amount between two currencies
    Convert {
        #[arg(allow_negative_numbers = true)]
        amount: f64,
        from: String,
        to: String,
    },
    /// Show the rate of one currency against the base
    Rate { code: String },
    /// List currencies in the cached snapshot
    Currencies,
    /// List currencies the provider supports (uncached)
    Symbols,
    /// Convert several amounts and round their sum once
    Total {
        /// Target currency
        to: String,
        /// Amounts as AMOUNT:CODE, e.g. 12.50:USD
        #[arg(required = true, allow_hyphen_values = true)]
        amounts: Vec<AmountArg>,
    },
    /// Show the state of the persisted snapshot without refreshing it
    Status,
}

fn init_logging(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
    );
    let fmt = if json_logs {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    tracing_subscriber::registry().with(filter).with(fmt).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.json_logs);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<FxError>() {
                Some(fx) => {
                    error!(code = fx.error_code(), class = ?fx.class(), error = %fx, "Command failed");
                    eprintln!("error [{}]: {}", fx.error_code(), fx);
                    match fx.class() {
                        ErrorClass::ClientInput => ExitCode::from(2),
                        ErrorClass::Upstream => ExitCode::from(3),
                        ErrorClass::Internal => ExitCode::from(4),
                    }
                }
                None => {
                    error!(error = %e, "Command failed");
                    eprintln!("error: {e:#}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let engine = wiring::build_engine().await?;

    match args.command {
        Command::Convert { amount, from, to } => {
            let converted = engine.convert(amount, &from, &to).await?;
            if args.json {
                println!("{}", json!({ "amount": amount, "from": from, "to": to, "result": converted }));
            } else {
                println!("{amount} {from} = {converted} {to}");
            }
        }
        Command::Rate { code } => {
            let rate = engine.get_rate(&code).await?;
            let base = &engine.config().base_currency;
            if args.json {
                println!("{}", json!({ "base": base, "code": code, "rate": rate }));
            } else {
                println!("1 {base} = {rate} {code}");
            }
        }
        Command::Currencies => {
            let codes = engine.list_currencies().await?;
            if args.json {
                println!("{}", json!(codes));
            } else {
                println!("{}", codes.join("\n"));
            }
        }
        Command::Symbols => {
            let codes: Vec<String> = engine.provider_currencies().await?.into_iter().collect();
            if args.json {
                println!("{}", json!(codes));
            } else {
                println!("{}", codes.join("\n"));
            }
        }
        Command::Total { to, amounts } => {
            let total = sum_converted(&engine, &amounts, &to).await?;
            let rounded = total.round()?;
            if args.json {
                println!(
                    "{}",
                    json!({ "currency": total.currency(), "items": total.len(), "raw": total.raw(), "total": rounded.to_string() })
                );
            } else {
                println!("{rounded} {} ({} items)", total.currency(), total.len());
            }
        }
        Command::Status => {
            let status = engine.snapshot_status().await?;
            if args.json {
                println!(
                    "{}",
                    json!({
                        "state": status.state,
                        "base_currency": status.base_currency,
                        "updated_at": status.updated_at,
                        "age_secs": status.age.map(|age| age.num_seconds()),
                        "currencies": status.currencies,
                        "ttl_secs": status.ttl.as_secs(),
                    })
                );
            } else {
                println!("state:      {}", status.state);
                if let (Some(base), Some(updated_at), Some(age)) =
                    (&status.base_currency, status.updated_at, status.age)
                {
                    println!("base:       {base}");
                    println!("updated_at: {updated_at}");
                    println!("age:        {}s (ttl {}s)", age.num_seconds(), status.ttl.as_secs());
                }
                println!("currencies: {}", status.currencies);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_convert_negative_amount() {
        let args = Args::try_parse_from(["fxrates", "convert", "-12.5", "USD", "EUR"]).unwrap();
        match args.command {
            Command::Convert { amount, from, to } => {
                assert_eq!(amount, -12.5);
                assert_eq!(from, "USD");
                assert_eq!(to, "EUR");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_total() {
        let args =
            Args::try_parse_from(["fxrates", "--json", "total", "GBP", "10:EUR", "-2.5:USD"]).unwrap();
        assert!(args.json);
        match args.command {
            Command::Total { to, amounts } => {
                assert_eq!(to, "GBP");
                assert_eq!(amounts.len(), 2);
                assert_eq!(amounts[1].amount, -2.5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_total_requires_amounts() {
        assert!(Args::try_parse_from(["fxrates", "total", "GBP"]).is_err());
    }
}
