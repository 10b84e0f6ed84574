#![forbid(unsafe_code)]
//! Walks a loan through issue, cross-node transfer and split on an in-memory network.

use clap::Parser;
use loanledger::config::{load_config, NodeConfig};
use loanledger::flows::{IssueLoanFlow, SplitLoanFlow, TransferLoanToAccountFlow};
use loanledger::identity::IdentityService;
use loanledger::messaging::InMemoryNetwork;
use loanledger::node::{init_logging, Node};
use loanledger::notary::InMemoryNotary;
use loanledger::state::StateAndRef;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config for the issuing node
    #[arg(long, default_value = "loanledger.toml")]
    config: PathBuf,
    /// Legal name of the receiving node
    #[arg(long, default_value = "Bank B")]
    counterparty: String,
    /// Value of the issued loan in USD
    #[arg(long, default_value_t = 1_000)]
    value: u64,
    /// Amount to split off after the transfer
    #[arg(long, default_value_t = 250)]
    split: u64,
    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn print_loans(title: &str, loans: &[StateAndRef]) {
    println!("{}", title);
    for loan in loans {
        if let Some(state) = loan.loan_book() {
            println!(
                "  {}  deal {}  ${}",
                loan.state_ref, state.deal_id, state.value_in_usd
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    let network = InMemoryNetwork::new();
    let identities = Arc::new(IdentityService::new());
    let notary = Arc::new(InMemoryNotary::new(config.notary.name.clone())?);
    let counterparty_config = NodeConfig::new(&cli.counterparty, &config.notary.name);

    let bank_a = Node::join(&network, identities.clone(), notary.clone(), config)?;
    let bank_b = Node::join(&network, identities, notary, counterparty_config)?;

    let alice = bank_a.create_account("alice")?;
    let bob = bank_b.create_account("bob")?;
    bank_b.accounts().share_account_info(&bob, bank_a.party()).await?;
    bank_a.accounts().request_interest(&bob, &alice).await?;

    let issued = bank_a
        .start_flow(IssueLoanFlow::new(cli.value, Some(alice.clone())))
        .await?;
    println!("Issued {} to {}@{}", issued.state_ref, alice.info.name, bank_a.party());

    let transferred = bank_a
        .start_flow(TransferLoanToAccountFlow {
            loan: issued,
            target: bob.clone(),
        })
        .await?;
    println!("Transferred to {}@{} as {}", bob.info.name, bank_b.party(), transferred.state_ref);

    let split = bank_b
        .start_flow(SplitLoanFlow::new(transferred, cli.split))
        .await?;
    print_loans(&format!("Split {} off:", cli.split), &split);

    print_loans(
        &format!("{} loans owned by {}:", bank_b.party(), bob.info.name),
        &bank_b.loans_for_account(bob.info.account_id)?,
    );
    print_loans(
        &format!("Loans visible to {}:", bank_a.party()),
        &bank_a.loans()?,
    );
    Ok(())
}
