//! Process lifecycle
//!
//! `Mesh::init` turns a configured address table into a running member of
//! the world: rank assignment is bind-scan, the first address in the table
//! this process manages to bind is its world rank. No coordinator process
//! and no shared state are involved; every peer derives the same assignment
//! from the same table.

use std::sync::Arc;

use tracing::info;

use minimesh_core::config::Config;
use minimesh_core::socket::Listener;

use crate::comm::{Communicator, Fabric};
use crate::error::{MpiError, Result};
use crate::header::Flows;
use crate::messenger::Messenger;

/// A running world member: owns the engine and the world communicator.
///
/// Owning a `Mesh` is the initialization flag; dropping it (or calling
/// [`Mesh::finalize`]) shuts the engine down.
pub struct Mesh {
    config: Arc<Config>,
    world: Communicator,
    rank: usize,
}

impl Mesh {
    /// Join the world described by `config`.
    ///
    /// Scans the address table in order and binds the first free address;
    /// its index becomes this process's world rank. Peers that start later
    /// are tolerated: deliveries to them retry within the configured
    /// budgets.
    pub fn init(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let mut last_error = None;
        let mut bound = None;
        for (rank, address) in config.addresses.iter().enumerate() {
            match Listener::bind(address, &config) {
                Ok(listener) => {
                    bound = Some((rank, listener));
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let (rank, listener) = bound.ok_or(MpiError::NoBindableAddress { cause: last_error })?;
        info!(rank, address = %config.addresses[rank], "joined world");

        let messenger = Messenger::new(Arc::clone(&config), listener, rank);
        let fabric = Arc::new(Fabric {
            messenger,
            flows: Flows::new(),
        });
        let world = Communicator::world(fabric, rank, config.world_size());

        Ok(Self {
            config,
            world,
            rank,
        })
    }

    /// The world communicator spanning every configured process.
    #[must_use]
    pub fn world(&self) -> &Communicator {
        &self.world
    }

    /// This process's world rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of configured processes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.config.world_size()
    }

    /// A stable name for this process: its bound address.
    #[must_use]
    pub fn processor_name(&self) -> &str {
        &self.config.addresses[self.rank]
    }

    /// Leave the world: wait at a world barrier so no peer is abandoned
    /// mid-collective, then shut the engine down.
    pub fn finalize(self) -> Result<()> {
        self.world.barrier()?;
        info!(rank = self.rank, "left world");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::thread;

    fn table(n: usize) -> Vec<String> {
        let mut ports = Vec::new();
        while ports.len() < n {
            let port = portpicker::pick_unused_port().expect("no free port");
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        ports.iter().map(|p| format!("127.0.0.1:{p}")).collect()
    }

    #[test]
    fn single_process_world() {
        let mesh = Mesh::init(Config::new(table(1))).unwrap();
        assert_eq!(mesh.rank(), 0);
        assert_eq!(mesh.size(), 1);
        assert_eq!(mesh.world().rank(), 0);
        assert_eq!(mesh.world().size(), 1);
        assert!(mesh.processor_name().starts_with("127.0.0.1:"));
        mesh.world().barrier().unwrap();
        mesh.finalize().unwrap();
    }

    #[test]
    fn bind_scan_assigns_distinct_ranks() {
        let config = Config::new(table(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let config = config.clone();
                thread::spawn(move || Mesh::init(config).unwrap())
            })
            .collect();
        let meshes: Vec<Mesh> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let ranks: BTreeSet<usize> = meshes.iter().map(Mesh::rank).collect();
        assert_eq!(ranks, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn exhausted_table_is_an_error() {
        let addresses = table(1);
        let _first = Mesh::init(Config::new(addresses.clone())).unwrap();
        let err = Mesh::init(Config::new(addresses))
            .err()
            .expect("second bind must fail");
        assert!(matches!(
            err,
            MpiError::NoBindableAddress { cause: Some(_) }
        ));
    }
}
