//! Wire-format codec: integers, framing, and the small set of messages
//! this crawler speaks.

pub mod codec;
pub mod constants;
pub mod message;

pub use constants::Network;
pub use message::{Header, WireError};
