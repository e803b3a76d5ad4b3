use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use warden_types::Request;
use warden_wire::{Connection, TransportError};

use crate::dispatcher::Dispatcher;

/// Serve one front-end connection until it closes or fails.
///
/// Requests are handled strictly in arrival order and each gets exactly one
/// response before the next is read. A clean close returns the number of
/// requests served; anything else is returned for the caller to log. Either
/// way the connection is finished.
pub async fn serve<S>(stream: S, dispatcher: &Dispatcher) -> Result<u64, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream);
    let mut served = 0;

    loop {
        let req: Request = match conn.read_frame().await {
            Ok(req) => req,
            Err(TransportError::PeerClosed) => return Ok(served),
            Err(e) => return Err(e),
        };

        debug!(request_id = %req.id, "received {} request", req.kind);
        let res = dispatcher.dispatch(req).await;
        conn.write_frame(&res).await?;
        served += 1;
    }
}
