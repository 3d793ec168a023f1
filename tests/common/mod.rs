#![allow(dead_code)]

use std::time::Duration;

use modvisor::{Config, Server};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn server(server_id: u32, server_type: &str) -> Server {
    init_tracing();
    Server::new(Config {
        server_id,
        server_type: server_type.to_string(),
        rpc_timeout: Duration::from_millis(500),
        drain_timeout: Duration::from_secs(2),
        ..Config::default()
    })
}

/// Polls `cond` until it holds or a generous deadline passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}
