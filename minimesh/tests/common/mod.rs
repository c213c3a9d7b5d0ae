//! Shared harness: every rank runs as a thread in this process, each owning
//! its own `Mesh` bound to a fresh loopback port.

// Each integration test binary compiles its own copy; not all of them use
// every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use minimesh::{Config, Mesh};

pub fn address_table(n: usize) -> Vec<String> {
    let mut ports = Vec::new();
    while ports.len() < n {
        let port = portpicker::pick_unused_port().expect("no free port");
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports.iter().map(|p| format!("127.0.0.1:{p}")).collect()
}

pub fn test_config(n: usize) -> Config {
    let mut config = Config::new(address_table(n));
    // Generous budgets: test binaries run many worlds in parallel, so a
    // slow round on a loaded machine must not fail the run.
    config.send_attempts = 100;
    config.send_delay = Duration::from_millis(20);
    config.receive_attempts = 100;
    config.receive_timeout = Duration::from_millis(200);
    config.receive_delay = Duration::from_millis(50);
    config.socket_timeout = Some(Duration::from_secs(5));
    config
}

/// Run one closure per rank, each on its own thread with its own `Mesh`.
/// Results come back in join order, not rank order; closures that care
/// should return the rank alongside their value.
pub fn run_world<R, F>(ranks: usize, f: F) -> Vec<R>
where
    R: Send + 'static,
    F: Fn(&Mesh) -> R + Send + Sync + 'static,
{
    minimesh::dev_tracing::init_tracing();
    let config = test_config(ranks);
    let f = Arc::new(f);
    let handles: Vec<_> = (0..ranks)
        .map(|_| {
            let config = config.clone();
            let f = Arc::clone(&f);
            thread::spawn(move || {
                let mesh = Mesh::init(config).expect("init failed");
                let result = f(&mesh);
                mesh.finalize().expect("finalize failed");
                result
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}
