//! # Minimesh
//!
//! Peer-to-peer socket messaging with a minimal MPI-style collective layer.
//!
//! ## Architecture
//!
//! Minimesh is structured as a small messaging kernel with clean layering:
//!
//! - **`minimesh-core`**: Framed sockets, connection pool, mailboxes, worker
//!   pools
//! - **`minimesh-mpi`**: Delivery protocol, communicators and collectives
//! - **`minimesh`**: Public API surface (this crate)
//!
//! Every process is a peer: there is no coordinator, no broker, and no
//! shared state. Rank assignment, message identity and delivery guarantees
//! are all derived locally from a shared address table and deterministic
//! call ordering.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use minimesh::{Config, Mesh, Op};
//!
//! fn main() -> minimesh::Result<()> {
//!     let addresses = vec![
//!         "10.0.0.1:7400".to_string(),
//!         "10.0.0.2:7400".to_string(),
//!     ];
//!     let mesh = Mesh::init(Config::new(addresses))?;
//!     let world = mesh.world();
//!
//!     let mut sums = [mesh.rank() as f64];
//!     world.allreduce(None, &mut sums, Op::Sum)?;
//!     println!("rank {} of {}: sum = {}", mesh.rank(), mesh.size(), sums[0]);
//!
//!     mesh.finalize()
//! }
//! ```
//!
//! ## Guarantees
//!
//! - **Exactly-once**: messages are identified by a deterministic header;
//!   redelivery is idempotent and duplicates are absorbed locally.
//! - **Deterministic reductions**: contributions fold in ascending rank
//!   order, so floating-point results are bitwise reproducible.
//! - **Bounded patience**: every blocking operation has a configured
//!   attempt budget and fails with a descriptive error instead of hanging.
//!
//! ## Safety
//!
//! The entire workspace is `#![deny(unsafe_code)]` outside of tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;

// Re-export core types
pub use bytes::Bytes;

pub use minimesh_core::config::Config;
pub use minimesh_core::error::CoreError;
pub use minimesh_mpi::{
    Communicator, Element, Mesh, MpiError, Op, Result, Status, UNDEFINED_COLOR,
};
