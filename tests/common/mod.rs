//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use runtime_config::config::{ConfigService, HostFacts, StaticHost};
use runtime_config::http::AdminServer;
use runtime_config::lifecycle::Shutdown;
use runtime_config::settings::AdminSettings;
use tokio::net::TcpListener;

/// A service over the built-in schema and a host with the given facts.
pub fn service_with(facts: HostFacts) -> (Arc<ConfigService>, Arc<StaticHost>) {
    let host = Arc::new(StaticHost::new(facts));
    let service = Arc::new(ConfigService::with_builtin_schema(host.clone()).unwrap());
    (service, host)
}

#[allow(dead_code)]
pub fn service() -> (Arc<ConfigService>, Arc<StaticHost>) {
    service_with(HostFacts::default())
}

/// Serve `service` on an ephemeral port. The server stops when the
/// returned `Shutdown` is triggered.
#[allow(dead_code)]
pub async fn start_admin_server(service: Arc<ConfigService>) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let server = AdminServer::new(service, &AdminSettings::default());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    wait_for_listener(addr).await;
    (addr, shutdown)
}

async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("admin server at {addr} never came up");
}
