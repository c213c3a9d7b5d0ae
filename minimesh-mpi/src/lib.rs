//! Minimesh MPI layer
//!
//! The protocol engine and the minimal MPI-compatible collective layer built
//! on the `minimesh-core` transport kernel:
//! - Deduplicating message headers + per-process flow table (`header`)
//! - Wire message kinds (`wire`)
//! - Reliable/optimistic delivery engine (`messenger`)
//! - Fixed numeric element set + reduction ops (`element`)
//! - Communicators and collectives (`comm`)
//! - Process lifecycle (`mesh`)

#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]

pub mod comm;
pub mod element;
pub mod error;
pub mod header;
pub mod mesh;
pub mod messenger;
pub mod wire;

pub use comm::{Communicator, Status, UNDEFINED_COLOR};
pub use element::{Element, Op};
pub use error::{MpiError, Result};
pub use header::{Flows, Header};
pub use mesh::Mesh;
pub use messenger::Messenger;
pub use wire::MessageKind;
