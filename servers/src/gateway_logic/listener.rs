use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};

const BACKLOG: i32 = 1024;

/// Binds the client-facing listener.
///
/// With `reuse_port` every worker process on the host binds the same port and the
/// kernel spreads incoming connections between them.
pub fn bind(addr: SocketAddr, reuse_port: bool) -> Result<StdTcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .context("Socket creation failed")?;
    socket.set_reuse_address(true).ok();

    if reuse_port {
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        {
            match socket.set_reuse_port(true) {
                Ok(()) => log::info!("SO_REUSEPORT enabled, sharing {} with other workers", addr),
                Err(e) => log::warn!("Failed to set SO_REUSEPORT: {}", e),
            }
        }
        #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
        {
            log::warn!("SO_REUSEPORT is not supported on this platform. Using SO_REUSEADDR only.");
        }
    }

    socket
        .bind(&addr.into())
        .with_context(|| format!("Bind failed on {}", addr))?;
    socket.listen(BACKLOG).context("Listen failed")?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .context("Failed to make the listener non-blocking")?;
    Ok(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_an_ephemeral_port() {
        let listener = bind("127.0.0.1:0".parse().unwrap(), false).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn two_workers_share_a_port_with_reuse_port() {
        let first = bind("127.0.0.1:0".parse().unwrap(), true).unwrap();
        let addr = first.local_addr().unwrap();
        let second = bind(addr, true).unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
    }
}
