//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Create the listening socket with a large kernel receive buffer.
/// Must be called from within a tokio runtime.
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let addr = config.listen_addr()?;
    let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", addr, e));

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;

    socket.set_reuse_address(true).map_err(bind_err)?;

    // Bursts of calls starting together can outrun a small default buffer
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_bytes) {
        tracing::warn!("Could not set receive buffer to {} bytes: {}", config.recv_buffer_bytes, e);
    }
    if let Ok(actual) = socket.recv_buffer_size() {
        tracing::debug!("Socket receive buffer: {} bytes", actual);
    }

    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;

    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let config = NetworkConfig {
            listen_address: "127.0.0.1".into(),
            udp_port: 0,
            ..Default::default()
        };
        let socket = create_socket(&config).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let config = NetworkConfig {
            listen_address: "nowhere".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_socket(&config),
            Err(NetworkError::InvalidAddress(_))
        ));
    }
}
