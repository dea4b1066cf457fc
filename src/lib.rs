//! Proxy wallet: forwards calls to third-party targets on behalf of
//! principals that hold no direct call capability.
//!
//! Per-principal allow-lists expire lazily, a blacklist vetoes everything,
//! and key operations wait for owner confirmation in a queue that clients
//! poll. See `DESIGN.md` for the module map.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod codec;
pub mod config;
pub mod logging;
pub mod registry;
pub mod target;
pub mod types;

pub mod wallet;

pub mod client;
