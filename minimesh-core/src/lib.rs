//! Minimesh Core
//!
//! This crate contains the protocol-agnostic core building blocks:
//! - Startup configuration (`config`)
//! - Length-prefixed framed sockets (`socket`)
//! - Client-side connection pool (`pool`)
//! - Bounded concurrent key/value mailbox (`mailbox`)
//! - Fixed-size worker thread pool (`workers`)
//! - Error types (`error`)

#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
pub mod config;
pub mod error;
pub mod mailbox;
pub mod pool;
pub mod socket;
pub mod workers;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{CoreError, Result};
    pub use crate::mailbox::{Mailbox, Slot};
    pub use crate::pool::ClientPool;
    pub use crate::socket::{FramedSocket, Listener};
    pub use crate::workers::WorkerPool;
}
