pub mod execute;
pub mod system;

pub use execute::execute;
pub use system::*;
