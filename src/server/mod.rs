use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::engine::Engine;

mod connection;
pub mod messages;

pub use connection::{encode_result, Connection, SERVER_VERSION};

/// Binds `addr` and serves PostgreSQL clients until the listener fails.
///
/// ## Protocol Subset
/// - SSL/GSS encryption requests are declined, clients retry in plaintext
/// - every user/database is accepted without a password
/// - simple `Query` messages only; `Terminate` closes the session
/// - SQL errors come back as `ErrorResponse` and the session stays open
///
/// ## Example
/// ```text
/// $ psql -h 127.0.0.1 -p 5432 -U anyone
/// anyone=> CREATE TABLE users (id TEXT PRIMARY KEY, name TEXT);
/// CREATE TABLE
/// anyone=> INSERT INTO users (id, name) VALUES ('u1', 'Alice');
/// INSERT 0 1
/// anyone=> SELECT * FROM users;
///  id | name
/// ----+-------
///  u1 | Alice
/// (1 row)
/// ```
pub async fn serve(engine: Arc<Engine>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    serve_listener(engine, listener).await
}

/// Accept loop over an already bound listener. Each client gets its own task.
pub async fn serve_listener(engine: Arc<Engine>, listener: TcpListener) -> Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true).ok();
        let engine = engine.clone();

        tokio::spawn(async move {
            info!(%peer, "client connected");
            match Connection::new(socket, engine, peer.to_string()).run().await {
                Ok(()) => info!(%peer, "client disconnected"),
                Err(e) => warn!(%peer, error = %e, "connection aborted"),
            }
        });
    }
}
