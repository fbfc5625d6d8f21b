//! TCP listener for framed and fallback connections.
//!
//! Accepts connections, runs one supervised session task per connection,
//! and drains them on shutdown.

use crate::config::Config;
use crate::registry::Registry;
use crate::session::{Session, SessionContext};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    context: Arc<SessionContext>,
    connection_limit: Arc<Semaphore>,
    shutdown_grace: Duration,
}

impl Server {
    /// Bind the listening socket. Must be called inside a tokio runtime.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = config
            .listen
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address for {}", config.listen),
                )
            })?;

        let listener = TcpListener::from_std(create_listener(addr, config.backlog)?)?;
        let registry = Registry::new();
        let context = Arc::new(SessionContext::new(config, Arc::clone(&registry)));

        Ok(Server {
            listener,
            registry,
            context,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            shutdown_grace: config.shutdown_grace,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get a reference to the registry for testing
    #[cfg(test)]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Accept connections until `shutdown` is cancelled, then drain sessions.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let Server {
            listener,
            registry,
            context,
            connection_limit,
            shutdown_grace,
        } = self;
        info!(address = %listener.local_addr()?, "Server listening");

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = sessions.join_next() => log_session_exit(joined),
                accepted = accept(&listener, &connection_limit) => match accepted {
                    Ok((stream, peer, permit)) => {
                        debug!(peer = %peer, "New connection");
                        let _ = stream.set_nodelay(true);

                        let session = Session::new(
                            registry.lease(),
                            peer,
                            Arc::clone(&context),
                            shutdown.child_token(),
                        );
                        sessions.spawn(async move {
                            session.run(stream).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        // Stop accepting before waiting on sessions.
        drop(listener);
        info!(sessions = sessions.len(), "Shutting down");

        // Session tokens are children of `shutdown`, so every session is
        // already unblocking.
        let drained = tokio::time::timeout(shutdown_grace, async {
            while let Some(joined) = sessions.join_next().await {
                log_session_exit(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                "Shutdown grace period expired, aborting sessions"
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        if !registry.is_empty() {
            warn!(clients = registry.len(), "Clients still registered after shutdown");
        }
        Ok(())
    }
}

/// Wait for a connection slot, then for a connection.
async fn accept(
    listener: &TcpListener,
    limit: &Arc<Semaphore>,
) -> io::Result<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
    let permit = Arc::clone(limit)
        .acquire_owned()
        .await
        .map_err(io::Error::other)?;
    let (stream, peer) = listener.accept().await?;
    Ok((stream, peer, permit))
}

fn log_session_exit(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Session panicked");
        }
    }
}

/// Create a listening socket with `SO_REUSEADDR`, so a restarted server can
/// rebind right away.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}
