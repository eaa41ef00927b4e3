//! Loan command - issue, repay and inspect loans

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use rust_decimal::Decimal;
use serde::Serialize;

use super::{get_context, report};
use crate::output;
use ledger_core::{AccountId, Loan, LoanId, LoanPayment, Principal, UserId};

#[derive(Subcommand)]
pub enum LoanCommands {
    /// Take a loan into one of your accounts at the current rate
    Take {
        account: AccountId,
        amount: Decimal,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pay off the whole outstanding debt
    Repay {
        loan: LoanId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a payment against the debt without moving money
    RepayPartial {
        loan: LoanId,
        amount: Decimal,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a loan regardless of its debt (operators only)
    MarkRepaid {
        loan: LoanId,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the outstanding debt
    Debt {
        loan: LoanId,
        /// RFC 3339 instant to compute the debt at (default: now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List a user's loans (defaults to the acting user)
    List {
        #[arg(long = "of")]
        of_user: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a loan with its payments
    Show {
        loan: LoanId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct LoanDetails {
    loan: Loan,
    payments: Vec<LoanPayment>,
    outstanding_debt: Decimal,
}

pub fn run(command: LoanCommands, principal: Result<Principal>) -> Result<()> {
    let ctx = get_context()?;
    let loans = &ctx.loan_service;

    match command {
        LoanCommands::Take {
            account,
            amount,
            json,
        } => {
            let result = loans.take_loan(&principal?, account, amount);
            report("take_loan", result, json, |loan| {
                output::success(&format!(
                    "Loan #{} issued: {} at {:.2}% into account #{}",
                    loan.id,
                    output::format_money(loan.principal),
                    loan.annual_rate,
                    loan.account
                ));
            })
        }
        LoanCommands::Repay { loan, json } => {
            let result = loans.repay_loan(&principal?, loan);
            report("repay_loan", result, json, |repayment| {
                if repayment.transaction.is_none() {
                    output::warning(&format!("Loan #{} had no debt left; nothing was paid", loan));
                } else {
                    output::success(&format!(
                        "Paid {} on loan #{}",
                        output::format_money(repayment.amount_paid),
                        loan
                    ));
                }
                println!("State: {}", repayment.loan.state.as_str());
            })
        }
        LoanCommands::RepayPartial { loan, amount, json } => {
            let result = loans.repay_partial(&principal?, loan, amount);
            report("repay_partial_loan", result, json, |payment| {
                output::success(&format!(
                    "Recorded payment #{} of {} on loan #{}",
                    payment.id,
                    output::format_money(payment.amount),
                    loan
                ));
            })
        }
        LoanCommands::MarkRepaid { loan, force, json } => {
            let principal = principal?;
            if !force && !json {
                let debt = loans.outstanding_debt(loan)?;
                if !Confirm::new()
                    .with_prompt(format!(
                        "Mark loan #{} as repaid with {} outstanding?",
                        loan,
                        output::format_money(debt)
                    ))
                    .default(false)
                    .interact()?
                {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            let result = loans.mark_as_repaid(&principal, loan);
            report("mark_loan_as_repaid", result, json, |loan| {
                output::success(&format!("Loan #{} marked as repaid", loan.id));
            })
        }
        LoanCommands::Debt { loan, as_of, json } => {
            let result = match as_of {
                Some(as_of) => loans.outstanding_debt_at(loan, as_of),
                None => loans.outstanding_debt(loan),
            };
            report("get_outstanding_debt", result, json, |debt| {
                println!("Outstanding debt on loan #{}: {}", loan, output::format_money(*debt).bold());
            })
        }
        LoanCommands::List { of_user, json } => {
            let user = match (of_user, principal.ok().and_then(|p| p.user_id())) {
                (Some(id), _) => UserId(id),
                (None, Some(user)) => user,
                (None, None) => bail!("Pass --of <user id> or act as a user"),
            };
            let result = loans.get_user_loans(user);
            report("get_user_loans", result, json, |list| {
                if list.is_empty() {
                    println!("No loans for user {}.", user);
                } else {
                    println!("{}", output::loan_table(list));
                }
            })
        }
        LoanCommands::Show { loan, json } => {
            let result = loans.get_loan(loan).and_then(|loan| {
                Ok(LoanDetails {
                    payments: loans.get_payments(loan.id)?,
                    outstanding_debt: loans.outstanding_debt(loan.id)?,
                    loan,
                })
            });
            report("get_loan", result, json, |details| {
                println!("{}", output::loan_table(std::slice::from_ref(&details.loan)));
                println!(
                    "Outstanding debt: {}",
                    output::format_money(details.outstanding_debt).bold()
                );
                if !details.payments.is_empty() {
                    let mut table = output::create_table();
                    table.set_header(vec!["Payment", "Paid at", "Amount"]);
                    for payment in &details.payments {
                        table.add_row(vec![
                            payment.id.to_string(),
                            output::format_time(payment.paid_at),
                            output::format_money(payment.amount),
                        ]);
                    }
                    println!("{}", table);
                }
            })
        }
    }
}
