//! Status command - show ledger totals

use anyhow::Result;
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};

use super::{get_context, get_logger, log_event};
use ledger_core::LogEvent;
use crate::output;

pub fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let status = ctx.status_service.get_status()?;
    log_event(&get_logger(), LogEvent::new("command_executed").with_operation("status"));

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Ledger Status".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.add_row(vec!["Accounts", &status.total_accounts.to_string()]);
    table.add_row(vec!["Transactions", &status.total_transactions.to_string()]);
    table.add_row(vec!["Reversals", &status.total_reversals.to_string()]);
    table.add_row(vec![
        "Loans (active)",
        &format!("{} ({})", status.total_loans, status.active_loans),
    ]);
    table.add_row(vec!["Money held", &output::format_money(status.total_balance)]);

    println!("{}", table);

    if !status.accounts.is_empty() {
        println!();
        let mut accounts = output::create_table();
        accounts.set_header(vec!["Account", "Owner", "Balance"]);
        for account in &status.accounts {
            accounts.add_row(vec![
                format!("#{}", account.id),
                account.owner.to_string(),
                output::format_money(account.balance),
            ]);
        }
        println!("{}", accounts);
    }

    Ok(())
}
