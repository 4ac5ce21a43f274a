pub mod config;
pub mod error;
pub mod foreign;
pub mod runtime;

pub use config::BridgeConfig;
pub use error::{BridgeError, ForeignError};
pub use runtime::bridge::Bridge;
pub use runtime::gil::{Gil, GilGuard};
