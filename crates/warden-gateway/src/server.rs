use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use warden_wire::ErrorKind;

use crate::connection;
use crate::dispatcher::Dispatcher;

/// Idle time before the kernel starts probing a quiet front-end connection.
pub const KEEPALIVE: Duration = Duration::from_secs(60);

pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl Server {
    pub async fn bind(addr: impl ToSocketAddrs, dispatcher: Dispatcher) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, dispatcher))
    }

    pub fn from_listener(listener: TcpListener, dispatcher: Dispatcher) -> Self {
        Self { listener, dispatcher }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` completes, then close every open
    /// connection. Each connection runs on its own task, so one slow or
    /// broken front-end never stalls another.
    pub async fn run(self, shutdown: impl Future) {
        tokio::pin!(shutdown);
        let mut connections = JoinSet::new();

        if let Ok(addr) = self.listener.local_addr() {
            info!("accepting front-end connections on {}", addr);
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down, closing {} connections", connections.len());
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(handle(stream, addr, self.dispatcher.clone()));
                    }
                    Err(e) => error!("accept error: {}", e),
                },
                // Reap finished connection tasks.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        connections.shutdown().await;
    }
}

async fn handle(stream: TcpStream, addr: SocketAddr, dispatcher: Dispatcher) {
    info!("new connection from {}", addr);
    if let Err(e) = configure(&stream) {
        warn!("failed to set socket options for {}: {}", addr, e);
    }

    match connection::serve(stream, &dispatcher).await {
        Ok(served) => info!("{} disconnected after {} requests", addr, served),
        Err(e) => match e.kind() {
            ErrorKind::PeerClosed => debug!("{} went away: {}", addr, e),
            ErrorKind::Protocol => warn!("dropping {}: {}", addr, e),
            ErrorKind::Timeout | ErrorKind::Other => error!("connection {} failed: {}", addr, e),
        },
    }
}

fn configure(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true)?;
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE))?;
    Ok(())
}
