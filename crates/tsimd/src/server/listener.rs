//! Listening socket bootstrap.

use std::net::SocketAddr;

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};

use super::ServerError;

/// Creates a bound, listening, non-blocking TCP socket.
///
/// The address is reusable so a restarted daemon can rebind while old
/// connections sit in `TIME_WAIT`.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener, ServerError> {
    let setup = |stage: &'static str| {
        move |e: std::io::Error| ServerError::Bind {
            addr,
            stage,
            error: e.to_string(),
        }
    };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(setup("socket"))?;
    socket.set_reuse_address(true).map_err(setup("reuseaddr"))?;
    socket.bind(&addr.into()).map_err(setup("bind"))?;
    socket.listen(backlog).map_err(setup("listen"))?;
    socket.set_nonblocking(true).map_err(setup("nonblocking"))?;

    Ok(TcpListener::from_std(socket.into()))
}
