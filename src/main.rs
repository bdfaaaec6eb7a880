use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use referral_ledger::{
    Address, Amount, LedgerConfig, LedgerResult, StateFile, TokenLedger,
};

#[derive(Parser)]
#[command(name = "referral-ledger", version, about = "Token ledger with referral fee splitting")]
struct Cli {
    /// Ledger state file.
    #[arg(long, global = true, default_value = "ledger.state.json")]
    state: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new state file from a TOML config.
    Init {
        #[arg(long)]
        config: PathBuf,
        /// Overwrite an existing state file.
        #[arg(long)]
        force: bool,
    },
    /// Print token metadata, rates and the state root.
    Info,
    Balance {
        #[arg(value_parser = parse_account)]
        account: Address,
    },
    Allowance {
        #[arg(value_parser = parse_account)]
        owner: Address,
        #[arg(value_parser = parse_account)]
        spender: Address,
    },
    Referrer {
        #[arg(value_parser = parse_account)]
        account: Address,
    },
    /// Show how a transfer would be split without applying it.
    Quote {
        #[arg(long, value_parser = parse_account)]
        from: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    Transfer {
        #[arg(long, value_parser = parse_account)]
        from: Address,
        #[arg(long, value_parser = parse_account)]
        to: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    Approve {
        #[arg(long, value_parser = parse_account)]
        owner: Address,
        #[arg(long, value_parser = parse_account)]
        spender: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    IncreaseAllowance {
        #[arg(long, value_parser = parse_account)]
        owner: Address,
        #[arg(long, value_parser = parse_account)]
        spender: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    DecreaseAllowance {
        #[arg(long, value_parser = parse_account)]
        owner: Address,
        #[arg(long, value_parser = parse_account)]
        spender: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    /// Spend an approved allowance.
    TransferFrom {
        #[arg(long, value_parser = parse_account)]
        spender: Address,
        #[arg(long, value_parser = parse_account)]
        owner: Address,
        #[arg(long, value_parser = parse_account)]
        to: Address,
        #[arg(long, value_parser = parse_amount)]
        amount: Amount,
    },
    SetReferral {
        #[arg(long, value_parser = parse_account)]
        account: Address,
        #[arg(long, value_parser = parse_account)]
        referrer: Address,
    },
    SetReferralRate {
        #[arg(long, value_parser = parse_account)]
        caller: Address,
        #[arg(long)]
        rate: u16,
    },
    SetBeneficiaryRate {
        #[arg(long, value_parser = parse_account)]
        caller: Address,
        #[arg(long)]
        rate: u16,
    },
    TransferOwnership {
        #[arg(long, value_parser = parse_account)]
        caller: Address,
        #[arg(long, value_parser = parse_account)]
        new_owner: Address,
    },
    /// Print recorded events as JSON lines.
    Events {
        /// Only the most recent N events.
        #[arg(long)]
        tail: Option<usize>,
    },
}

fn parse_account(raw: &str) -> Result<Address, String> {
    if raw.trim().is_empty() {
        return Err("account must not be empty".to_string());
    }
    Address::parse_or_label(raw).map_err(|e| format!("invalid account {raw:?}: {e}"))
}

fn parse_amount(raw: &str) -> Result<Amount, String> {
    let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
    cleaned
        .parse()
        .map_err(|e| format!("invalid amount {raw:?}: {e}"))
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the ledger, applies one operation, and saves only on success.
/// The state lock is held across the whole cycle.
fn mutate<T>(
    state: &StateFile,
    op: impl FnOnce(&mut TokenLedger) -> LedgerResult<T>,
) -> Result<T> {
    let _lock = state.lock()?;
    let mut ledger = load(state)?;
    let out = op(&mut ledger)?;
    state
        .save(&ledger)
        .with_context(|| format!("saving {}", state.path().display()))?;
    Ok(out)
}

fn load(state: &StateFile) -> Result<TokenLedger> {
    state
        .load()
        .with_context(|| format!("loading {}", state.path().display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let state = StateFile::new(&cli.state);

    match cli.command {
        Command::Init { config, force } => {
            let config = LedgerConfig::load(&config)?;
            let ledger = TokenLedger::new(&config)?;
            let _lock = state.lock()?;
            state.create(&ledger, force)?;
            println!(
                "initialised {} ({}) → {}",
                ledger.name(),
                ledger.symbol(),
                state.path().display()
            );
        }
        Command::Info => {
            let ledger = load(&state)?;
            let fees = ledger.fee_schedule();
            print_json(&json!({
                "name": ledger.name(),
                "symbol": ledger.symbol(),
                "decimals": ledger.decimals(),
                "total_supply": ledger.total_supply().to_string(),
                "owner": ledger.owner(),
                "referral_rate": fees.referral_rate(),
                "beneficiary_rate": fees.beneficiary_rate(),
                "holders": ledger.balances().holders(),
                "referrals": ledger.referrals().len(),
                "height": ledger.height(),
                "state_root": hex::encode(ledger.state_root()),
            }))?;
        }
        Command::Balance { account } => {
            println!("{}", load(&state)?.balance_of(&account));
        }
        Command::Allowance { owner, spender } => {
            println!("{}", load(&state)?.allowance_of(&owner, &spender));
        }
        Command::Referrer { account } => match load(&state)?.referrer_of(&account) {
            Some(referrer) => println!("{referrer}"),
            None => println!("none"),
        },
        Command::Quote { from, amount } => {
            print_json(&load(&state)?.quote_transfer(&from, amount))?;
        }
        Command::Transfer { from, to, amount } => {
            let receipt = mutate(&state, |ledger| ledger.transfer(from, to, amount))?;
            print_json(&receipt)?;
        }
        Command::Approve {
            owner,
            spender,
            amount,
        } => {
            mutate(&state, |ledger| ledger.approve(owner, spender, amount))?;
            println!("true");
        }
        Command::IncreaseAllowance {
            owner,
            spender,
            amount,
        } => {
            let updated = mutate(&state, |ledger| {
                ledger.increase_allowance(owner, spender, amount)
            })?;
            println!("{updated}");
        }
        Command::DecreaseAllowance {
            owner,
            spender,
            amount,
        } => {
            let updated = mutate(&state, |ledger| {
                ledger.decrease_allowance(owner, spender, amount)
            })?;
            println!("{updated}");
        }
        Command::TransferFrom {
            spender,
            owner,
            to,
            amount,
        } => {
            let receipt = mutate(&state, |ledger| {
                ledger.transfer_delegated(owner, spender, to, amount)
            })?;
            print_json(&receipt)?;
        }
        Command::SetReferral { account, referrer } => {
            mutate(&state, |ledger| ledger.set_referral(account, referrer))?;
            println!("true");
        }
        Command::SetReferralRate { caller, rate } => {
            mutate(&state, |ledger| ledger.set_referral_rate(caller, rate))?;
            println!("true");
        }
        Command::SetBeneficiaryRate { caller, rate } => {
            mutate(&state, |ledger| ledger.set_beneficiary_rate(caller, rate))?;
            println!("true");
        }
        Command::TransferOwnership { caller, new_owner } => {
            mutate(&state, |ledger| ledger.transfer_ownership(caller, new_owner))?;
            println!("true");
        }
        Command::Events { tail } => {
            let ledger = load(&state)?;
            let events = match tail {
                Some(n) => ledger.events().tail(n),
                None => ledger.events().as_slice(),
            };
            for event in events {
                println!("{}", serde_json::to_string(event)?);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_transfer_with_labels_and_separators() {
        let cli = Cli::try_parse_from([
            "referral-ledger",
            "--state",
            "s.json",
            "transfer",
            "--from",
            "alice",
            "--to",
            "0x00000000000000000000000000000000000000ff",
            "--amount",
            "1_000",
        ])
        .unwrap();
        match cli.command {
            Command::Transfer { from, to, amount } => {
                assert_eq!(from, Address::from_label("alice"));
                assert_eq!(to.as_bytes()[19], 0xff);
                assert_eq!(amount, 1_000);
            }
            _ => panic!("expected transfer"),
        }
    }

    #[test]
    fn rejects_truncated_hex_accounts() {
        let parsed = Cli::try_parse_from([
            "referral-ledger",
            "transfer",
            "--from",
            "alice",
            "--to",
            "0x00000000000000000000000000000000000000a",
            "--amount",
            "1",
        ]);
        assert!(parsed.is_err());
        assert!(parse_account("0x00000000000000000000000000000000000000a").is_err());
        assert_eq!(parse_account("alice"), Ok(Address::from_label("alice")));
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(Cli::try_parse_from([
            "referral-ledger",
            "approve",
            "--owner",
            "a",
            "--spender",
            "b",
            "--amount",
            "-5",
        ])
        .is_err());
    }
}
