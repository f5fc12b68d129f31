//! Stored position document layout.
//!
//! Current documents carry a nested `core` leg and a `cycles` array. Older
//! single-leg documents kept the core fields flat at the top level; those are
//! upgraded on read and rewritten in the current shape on the next save.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::domain::{Leg, Position, Venue};
use crate::error::{ExecutorError, Result};

pub const SCHEMA_VERSION: i64 = 2;

/// Flat single-leg document
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyPosition {
    qty: Decimal,
    #[serde(rename = "costUSDT")]
    cost_usdt: Decimal,
    avg_price: Decimal,
    #[serde(rename = "feesUSDT")]
    fees_usdt: Decimal,
    dca_count: u32,
    last_dca_ms: i64,
    last_action_ms: i64,
    last_seen_price: Decimal,
    last_seen_price_ms: i64,
    paused_until_ms: i64,
    rev: i64,
}

impl LegacyPosition {
    fn upgrade(self, venue: Venue, symbol: &str) -> Position {
        let mut core = Leg {
            quantity: self.qty,
            cost_basis_quote: self.cost_usdt,
            avg_price: self.avg_price,
            cumulative_fees_quote: self.fees_usdt,
            dca_count: self.dca_count,
            last_dca_at_ms: self.last_dca_ms,
            ..Leg::default()
        };
        core.normalize();

        let mut position = Position::new(venue, symbol);
        position.core = core;
        position.last_action_at_ms = self.last_action_ms;
        position.last_seen_price = self.last_seen_price;
        position.last_seen_price_at_ms = self.last_seen_price_ms;
        position.paused_until_ms = self.paused_until_ms;
        position.revision = self.rev;
        position
    }
}

/// Serialize a position into its stored document.
pub fn encode_position(position: &Position) -> Result<Value> {
    let mut doc = serde_json::to_value(position)?;
    if let Value::Object(map) = &mut doc {
        map.insert("schemaVersion".to_string(), Value::from(SCHEMA_VERSION));
    }
    Ok(doc)
}

/// Decode a stored document for `(venue, symbol)`.
///
/// The document id is authoritative for venue and symbol. Documents with a
/// `core` object use the current decoder; anything else goes through the
/// legacy upgrade. A malformed current document is an error rather than a
/// silent reset.
pub fn decode_position(venue: Venue, symbol: &str, doc: Value) -> Result<Position> {
    let doc_id = crate::domain::doc_id_for(venue, symbol);
    let corrupt = |reason: String| ExecutorError::CorruptDocument {
        doc_id: doc_id.clone(),
        reason,
    };

    let Value::Object(mut map) = doc else {
        return Err(corrupt("document is not an object".to_string()));
    };

    if map.contains_key("core") {
        map.remove("env");
        map.remove("schemaVersion");
        map.insert("venue".to_string(), Value::from(venue.as_str()));
        map.insert("symbol".to_string(), Value::from(symbol));
        let mut position: Position =
            serde_json::from_value(Value::Object(map)).map_err(|e| corrupt(e.to_string()))?;
        position.core.normalize();
        for cycle in &mut position.cycles {
            cycle.leg.normalize();
        }
        return Ok(position);
    }

    let legacy: LegacyPosition =
        serde_json::from_value(Value::Object(map)).map_err(|e| corrupt(e.to_string()))?;
    let position = legacy.upgrade(venue, symbol);
    info!(doc_id = %doc_id, revision = position.revision, "upgraded legacy position document");
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Cycle, CycleStatus};
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_legacy_document_upgrades_into_core() {
        let doc = json!({
            "env": "testnet",
            "symbol": "BTCUSDT",
            "qty": 0.5,
            "costUSDT": 25000,
            "avgPrice": 50000,
            "feesUSDT": 25,
            "dcaCount": 2,
            "lastDcaMs": 1700000000000i64,
            "lastActionMs": 1700000001000i64,
            "rev": 7
        });
        let position = decode_position(Venue::Testnet, "BTCUSDT", doc).unwrap();
        assert_eq!(position.core.quantity, dec!(0.5));
        assert_eq!(position.core.cost_basis_quote, dec!(25000));
        assert_eq!(position.core.avg_price, dec!(50000));
        assert_eq!(position.core.cumulative_fees_quote, dec!(25));
        assert_eq!(position.core.dca_count, 2);
        assert!(position.cycles.is_empty());
        assert_eq!(position.last_action_at_ms, 1_700_000_001_000);
        assert_eq!(position.revision, 7);
    }

    #[test]
    fn test_current_document_round_trips() {
        let mut position = Position::new(Venue::Mainnet, "ETHUSDT");
        position.core.apply_buy(dec!(0.1), dec!(250), dec!(0.25));
        let mut cycle = Cycle::open("c_1_a1b2c3");
        cycle.leg.apply_buy(dec!(0.05), dec!(120), dec!(0.12));
        cycle.close_after_sell(dec!(0.13));
        position.cycles.push(cycle);
        position.revision = 3;

        let doc = encode_position(&position).unwrap();
        assert_eq!(doc["schemaVersion"], json!(SCHEMA_VERSION));
        assert_eq!(doc["cycles"][0]["status"], json!("CLOSED"));

        let decoded = decode_position(Venue::Mainnet, "ETHUSDT", doc).unwrap();
        assert_eq!(decoded, position);
        assert_eq!(decoded.cycles[0].status, CycleStatus::Closed);
    }

    #[test]
    fn test_node_era_nested_document_reads_with_aliases() {
        let doc = json!({
            "env": "testnet",
            "symbol": "SOLUSDT",
            "core": { "qty": 2, "costUSDT": 300, "avgPrice": 150, "feesUSDT": 0.3,
                      "armed": true, "peakPrice": 155, "floorPrice": 154.6,
                      "dcaCount": 0, "lastDcaMs": 0 },
            "cycles": [ { "id": "c_1_x", "status": "OPEN", "qty": 1, "costUSDT": 140,
                          "avgPrice": 140, "feesUSDT": 0.14 } ],
            "lastActionMs": 5,
            "lastSeenPrice": 151.2,
            "lastSeenPriceMs": 6,
            "pausedUntilMs": 0,
            "rev": 12
        });
        let position = decode_position(Venue::Testnet, "SOLUSDT", doc).unwrap();
        assert!(position.core.armed);
        assert_eq!(position.core.floor_price, dec!(154.6));
        assert_eq!(position.cycles[0].leg.cost_basis_quote, dec!(140));
        assert_eq!(position.last_seen_price, dec!(151.2));
        assert_eq!(position.revision, 12);
    }

    #[test]
    fn test_malformed_current_document_is_corrupt() {
        let doc = json!({ "core": "not-a-leg" });
        let err = decode_position(Venue::Testnet, "BTCUSDT", doc).unwrap_err();
        assert!(matches!(err, ExecutorError::CorruptDocument { .. }));

        let err = decode_position(Venue::Testnet, "BTCUSDT", json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), "corrupt_document");
    }
}
