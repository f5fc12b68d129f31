//! Position maintenance commands
//!
//! spot-executor state show <venue> <symbol>
//! spot-executor state reset <venue> <symbol>
//! spot-executor state delete <venue> <symbol> [--yes]

use anyhow::Result;
use clap::Subcommand;

use crate::domain::{Position, Venue};
use crate::persistence::{encode_position, Stores};

#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Print the stored position document
    Show { venue: Venue, symbol: String },

    /// Replace the position with an empty one through the revision guard
    Reset { venue: Venue, symbol: String },

    /// Delete the position document (dry run unless --yes)
    Delete {
        venue: Venue,
        symbol: String,

        /// Actually delete
        #[arg(long)]
        yes: bool,
    },
}

impl StateCommands {
    pub async fn run(self, stores: &Stores) -> Result<()> {
        match self {
            Self::Show { venue, symbol } => show(stores, venue, &symbol.to_uppercase()).await,
            Self::Reset { venue, symbol } => reset(stores, venue, &symbol.to_uppercase()).await,
            Self::Delete { venue, symbol, yes } => {
                delete(stores, venue, &symbol.to_uppercase(), yes).await
            }
        }
    }
}

async fn show(stores: &Stores, venue: Venue, symbol: &str) -> Result<()> {
    let position = stores.positions.load(venue, symbol).await?;
    if position.revision == 0 {
        println!("{}: no stored document", position.doc_id());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&encode_position(&position)?)?);
    Ok(())
}

async fn reset(stores: &Stores, venue: Venue, symbol: &str) -> Result<()> {
    let current = stores.positions.load(venue, symbol).await?;
    let mut empty = Position::new(venue, symbol);
    empty.revision = current.revision;

    let saved = stores.positions.save(&empty).await?;
    println!(
        "{}: reset (revision {} -> {})",
        saved.doc_id(),
        current.revision,
        saved.revision
    );
    Ok(())
}

async fn delete(stores: &Stores, venue: Venue, symbol: &str, yes: bool) -> Result<()> {
    let current = stores.positions.load(venue, symbol).await?;
    if current.revision == 0 {
        println!("{}: nothing to delete", current.doc_id());
        return Ok(());
    }

    if !yes {
        println!(
            "{}: would delete revision {} (core qty {}, {} open cycles); re-run with --yes",
            current.doc_id(),
            current.revision,
            current.core.quantity,
            current.open_cycle_count()
        );
        return Ok(());
    }

    let existed = stores.positions.delete(venue, symbol).await?;
    println!("{}: deleted={}", current.doc_id(), existed);
    Ok(())
}
