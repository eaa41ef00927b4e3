//! Output formatting utilities

use chrono::{DateTime, Utc};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use rust_decimal::Decimal;

use ledger_core::{AccountId, Loan, LoanState, Transaction};

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn format_money(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn endpoint(account: Option<AccountId>) -> String {
    account.map_or_else(|| "bank".to_string(), |id| format!("#{}", id))
}

/// Transactions as a table; amounts are signed from `perspective`'s side
pub fn transaction_table(transactions: &[Transaction], perspective: Option<AccountId>) -> Table {
    let mut table = create_table();
    table.set_header(vec!["ID", "Time", "Kind", "From", "To", "Amount", "Description"]);

    for tx in transactions {
        let outgoing = perspective.is_some() && tx.source == perspective;
        let amount = if outgoing {
            Cell::new(format!("-{}", format_money(tx.amount))).fg(Color::Red)
        } else if perspective.is_some() {
            Cell::new(format!("+{}", format_money(tx.amount))).fg(Color::Green)
        } else {
            Cell::new(format_money(tx.amount))
        };
        let kind = match tx.reversal_of {
            Some(original) => format!("{} of #{}", tx.kind, original),
            None => tx.kind.to_string(),
        };

        table.add_row(vec![
            Cell::new(tx.id),
            Cell::new(format_time(tx.timestamp)),
            Cell::new(kind),
            Cell::new(endpoint(tx.source)),
            Cell::new(endpoint(tx.destination)),
            amount,
            Cell::new(&tx.description),
        ]);
    }
    table
}

pub fn loan_table(loans: &[Loan]) -> Table {
    let mut table = create_table();
    table.set_header(vec!["ID", "Account", "Principal", "Rate", "Started", "Next due", "State"]);

    for loan in loans {
        let state = match loan.state {
            LoanState::Active => Cell::new("active").fg(Color::Yellow),
            LoanState::Repaid => Cell::new("repaid").fg(Color::Green),
        };
        table.add_row(vec![
            Cell::new(loan.id),
            Cell::new(format!("#{}", loan.account)),
            Cell::new(format_money(loan.principal)),
            Cell::new(format!("{:.2}%", loan.annual_rate)),
            Cell::new(format_time(loan.start_date)),
            Cell::new(loan.next_payment_due.map(format_time).unwrap_or_default()),
            state,
        ]);
    }
    table
}

/// One-line summary of a committed movement
pub fn describe_transaction(tx: &Transaction) -> String {
    format!(
        "{} #{}: {} from {} to {}",
        tx.kind,
        tx.id,
        format_money(tx.amount),
        endpoint(tx.source),
        endpoint(tx.destination)
    )
}
