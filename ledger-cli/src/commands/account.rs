//! Account command - open accounts, show balances and history

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use serde_json::json;

use super::{get_context, report};
use crate::output;
use ledger_core::{AccountId, Principal, TransactionId, UserId};

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open an account (for yourself, or for --owner as operator)
    Create {
        #[arg(long)]
        owner: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show an account's balance
    Balance {
        account: AccountId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show an account's transactions, newest first
    History {
        account: AccountId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a single transaction
    ShowTx {
        id: TransactionId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: AccountCommands, principal: Result<Principal>) -> Result<()> {
    let ctx = get_context()?;

    match command {
        AccountCommands::Create { owner, json } => {
            let principal = principal?;
            let owner = match (owner, principal.user_id()) {
                (Some(owner), _) => UserId(owner),
                (None, Some(user)) => user,
                (None, None) => bail!("Operators must pass --owner <user id>"),
            };
            let result = ctx.ledger_service.create_account(&principal, owner);
            report("create_account", result, json, |account| {
                output::success(&format!(
                    "Opened account #{} for user {}",
                    account.id, account.owner
                ));
            })
        }
        AccountCommands::Balance { account, json } => {
            let result = ctx.ledger_service.get_account(account);
            if json {
                let result = result.map(|a| json!({ "account": a.id, "balance": a.balance }));
                return report("get_balance", result, true, |_| {});
            }
            report("get_balance", result, false, |a| {
                println!(
                    "Account #{} (user {}): {}",
                    a.id,
                    a.owner,
                    output::format_money(a.balance).bold()
                );
            })
        }
        AccountCommands::History { account, json } => {
            let result = ctx.transaction_log_service.get_history(account);
            report("get_history", result, json, |history| {
                if history.is_empty() {
                    println!("No transactions for account #{}.", account);
                } else {
                    println!("{}", output::transaction_table(history, Some(account)));
                }
            })
        }
        AccountCommands::ShowTx { id, json } => {
            let result = ctx.transaction_log_service.get_transaction(id);
            report("get_transaction", result, json, |tx| {
                println!("{}", output::transaction_table(std::slice::from_ref(tx), None));
            })
        }
    }
}
