//! # ethmux Identifier Synchronization
//!
//! Different Ethereum clients mint different addresses, transaction hashes,
//! and filter ids for "the same" logical entity. This crate makes a
//! secondary backend behave, from the caller's point of view, as if it
//! shared the master backend's identifier namespace.
//!
//! - [`IdentifierMap`] holds the three per-client translation maps
//!   (address, transaction hash, filter id), learned purely by observing
//!   matching request/response pairs.
//! - [`SyncClient`] is a decorator over an HTTP client that rewrites
//!   outbound parameters into the secondary's namespace and learns new
//!   mappings from inbound results.
//! - [`RawSigner`] extends the decorator for backends with no local account
//!   management: `eth_sendTransaction` is signed offline with pre-funded
//!   keys and forwarded as `eth_sendRawTransaction`.

pub mod identifiers;
pub mod signing;
pub mod sync;

pub use identifiers::IdentifierMap;
pub use signing::{derive_address, parse_private_key, sign_legacy_transaction, LegacyTransaction};
pub use sync::{RawSigner, SyncClient};
