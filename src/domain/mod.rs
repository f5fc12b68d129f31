pub mod idempotency;
pub mod ledger;
pub mod order;
pub mod request;

pub use idempotency::*;
pub use ledger::*;
pub use order::*;
pub use request::*;
