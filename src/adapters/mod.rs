pub mod api_server;
pub mod binance_rest;
pub mod memory;
pub mod postgres;

pub use api_server::start_api_server;
pub use binance_rest::BinanceRestClient;
pub use memory::{MemoryIdempotencyStore, MemoryPositionStore};
pub use postgres::PostgresStore;
