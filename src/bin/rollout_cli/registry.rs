//! `registry` commands. All of them work offline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollout_registry::DeploymentRecord;
use rollout_types::abi::{checksum, parse_address};
use vault_rollout::RolloutConfig;

use super::output::print_json;

#[derive(Parser, Debug)]
pub struct RegistryCmd {
    #[command(subcommand)]
    command: RegistrySubcommand,
}

#[derive(Subcommand, Debug)]
enum RegistrySubcommand {
    /// Print the recorded address of a logical name
    Get {
        /// Logical name (e.g. `controller`)
        name: String,
    },
    /// Record an address, replacing any previous record
    Put {
        /// Logical name
        name: String,
        /// Address, hex
        address: String,
        /// Block the contract was deployed in
        #[arg(long)]
        block: Option<u64>,
    },
    /// List every record of the network/environment
    List,
    /// List account aliases (`account-<alias>` records)
    Accounts,
}

impl RegistryCmd {
    pub async fn execute(&self, config: &RolloutConfig, json_output: bool) -> Result<()> {
        let ctx = config.offline_context();
        match &self.command {
            RegistrySubcommand::Get { name } => {
                let record = ctx.registry.get(&ctx.target, name)?;
                if json_output {
                    print_json(&record)
                } else {
                    println!("{}", checksum(&record.address));
                    Ok(())
                }
            }
            RegistrySubcommand::Put {
                name,
                address,
                block,
            } => {
                let address = parse_address(address)
                    .with_context(|| format!("Invalid address for `{}`", name))?;
                let record = ctx.registry.put(&ctx.target, name, address, *block)?;
                if json_output {
                    print_json(&record)
                } else {
                    println!("Recorded {} = {} on {}", name, checksum(&address), ctx.target);
                    Ok(())
                }
            }
            RegistrySubcommand::List => {
                let records = ctx.registry.list(&ctx.target)?;
                if json_output {
                    return print_json(&records);
                }
                print_records(&records, &ctx.target.to_string());
                Ok(())
            }
            RegistrySubcommand::Accounts => {
                let accounts = ctx.registry.accounts(&ctx.target)?;
                if json_output {
                    return print_json(&accounts);
                }
                if accounts.is_empty() {
                    println!("No accounts recorded on {}", ctx.target);
                }
                for account in accounts {
                    println!("{}", account);
                }
                Ok(())
            }
        }
    }
}

fn print_records(records: &[DeploymentRecord], target: &str) {
    if records.is_empty() {
        println!("No deployments recorded on {}", target);
        return;
    }
    let width = records
        .iter()
        .map(|r| r.logical_name.len())
        .max()
        .unwrap_or_default();
    for record in records {
        let block = record
            .block_number
            .map(|b| format!("  (block {})", b))
            .unwrap_or_default();
        println!(
            "{:width$}  {}{}",
            record.logical_name,
            checksum(&record.address),
            block,
            width = width
        );
    }
}
