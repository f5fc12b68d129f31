//! Idempotency record commands

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;

use crate::persistence::Stores;
use crate::strategy::IdempotencyManager;

#[derive(Subcommand, Debug)]
pub enum IdempotencyCommands {
    /// Print one record
    Show { key: String },

    /// Delete records past their expiry
    Purge,
}

impl IdempotencyCommands {
    pub async fn run(self, stores: &Stores, ttl_ms: i64) -> Result<()> {
        match self {
            Self::Show { key } => match stores.idempotency.get(&key).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("{}: not found", key),
            },
            Self::Purge => {
                let manager = IdempotencyManager::new(stores.idempotency.clone(), ttl_ms);
                let removed = manager
                    .cleanup_expired(Utc::now().timestamp_millis())
                    .await?;
                println!("purged {} expired idempotency records", removed);
            }
        }
        Ok(())
    }
}
