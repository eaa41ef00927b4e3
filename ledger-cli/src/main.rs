//! Ledger CLI - operator console for the bank ledger

use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{account, doctor, loan, logs, money, status};
use ledger_core::{AccountId, Principal, TransactionId, UserId};

/// Ledger - accounts, transfers and loans from the terminal
#[derive(Parser)]
#[command(name = "ledger", version, about, long_about = None)]
struct Cli {
    /// Act as this user
    #[arg(long, global = true, env = "LEDGER_USER", conflicts_with = "operator")]
    user: Option<i64>,

    /// Act as a bank operator
    #[arg(long, global = true)]
    operator: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn principal(&self) -> Result<Principal> {
        match (self.operator, self.user) {
            (true, _) => Ok(Principal::Operator),
            (false, Some(id)) => Ok(Principal::User(UserId(id))),
            (false, None) => bail!("Specify --user <id> (or LEDGER_USER) or --operator"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Open accounts and inspect them
    Account {
        #[command(subcommand)]
        command: account::AccountCommands,
    },

    /// Deposit money into an account
    Deposit {
        /// Account to credit
        to: AccountId,
        amount: Decimal,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Withdraw money from an account
    Withdraw {
        /// Account to debit
        from: AccountId,
        amount: Decimal,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move money between two accounts
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Debit an account for a payment to the bank
    Pay {
        from: AccountId,
        amount: Decimal,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reverse a transfer, withdrawal or credit payment
    Reverse {
        /// Transaction to reverse
        id: TransactionId,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Issue, repay and inspect loans
    Loan {
        #[command(subcommand)]
        command: loan::LoanCommands,
    },

    /// Show ledger totals
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run ledger integrity checks
    Doctor {
        /// Show verbose output
        #[arg(long, short)]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the operation log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let principal = cli.principal();
    match cli.command {
        Commands::Account { command } => account::run(command, principal),
        Commands::Deposit {
            to,
            amount,
            description,
            json,
        } => money::deposit(&principal?, to, amount, &description, json),
        Commands::Withdraw {
            from,
            amount,
            description,
            json,
        } => money::withdraw(&principal?, from, amount, &description, json),
        Commands::Transfer {
            from,
            to,
            amount,
            description,
            json,
        } => money::transfer(&principal?, from, to, amount, &description, json),
        Commands::Pay {
            from,
            amount,
            description,
            json,
        } => money::pay(&principal?, from, amount, &description, json),
        Commands::Reverse {
            id,
            description,
            json,
        } => money::reverse(&principal?, id, &description, json),
        Commands::Loan { command } => loan::run(command, principal),
        Commands::Status { json } => status::run(json),
        Commands::Doctor { verbose, json } => doctor::run(verbose, json),
        Commands::Logs { command } => logs::run(command),
    }
}
