//! One-shot SNTP client.
//!
//! [`TimeQueryClient`] sends a single 48-byte request to a time server and
//! reports the reply's transmit timestamp as Unix seconds. There is no retry,
//! no fallback server and no delay compensation.

pub mod config;
pub mod errors;
pub mod ntp;

pub use config::{Config, ServerConfig};
pub use errors::QueryError;
pub use ntp::{NetError, NetworkInterface, SystemNetwork, TimeQueryClient};
