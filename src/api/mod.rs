//! Kraken REST API: wire transport, request signing and response types.

mod kraken;
mod signer;
mod types;

pub use kraken::KrakenTransport;
pub use types::*;
