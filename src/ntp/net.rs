use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure reported by the network layer.
///
/// The code is handed to callers untouched, so a resolver failure stays
/// distinguishable from a dead link. Codes of zero or above would read as
/// success and are replaced by [`NetError::DEVICE_ERROR`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct NetError {
    code: i32,
    message: String,
}

impl NetError {
    /// No data arrived before the socket timeout expired
    pub const WOULD_BLOCK: i32 = -3001;
    pub const PARAMETER: i32 = -3003;
    pub const NO_CONNECTION: i32 = -3004;
    pub const NO_SOCKET: i32 = -3005;
    pub const NO_ADDRESS: i32 = -3006;
    pub const DNS_FAILURE: i32 = -3009;
    pub const DEVICE_ERROR: i32 = -3012;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: if code < 0 { code } else { Self::DEVICE_ERROR },
            message: message.into(),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::WOULD_BLOCK,
            io::ErrorKind::AddrNotAvailable => Self::NO_ADDRESS,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable => Self::NO_CONNECTION,
            io::ErrorKind::InvalidInput => Self::PARAMETER,
            _ => Self::DEVICE_ERROR,
        };
        Self::new(code, err.to_string())
    }
}

/// Name resolution and socket factory the client runs on
pub trait NetworkInterface: Send + Sync {
    /// Resolve a hostname or literal address
    fn resolve(&self, host: &str) -> Result<IpAddr, NetError>;

    /// Open a fresh UDP socket on this interface
    fn open_datagram_socket(&self) -> Result<Box<dyn DatagramSocket>, NetError>;
}

pub trait DatagramSocket: Send {
    /// Receive timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), NetError>;

    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<usize, NetError>;

    /// Wait for one datagram from any source
    fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), NetError>;
}

impl DatagramSocket for UdpSocket {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), NetError> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<usize, NetError> {
        Ok(UdpSocket::send_to(self, buf, addr)?)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), NetError> {
        Ok(UdpSocket::recv_from(self, buf)?)
    }
}

/// Host network stack, with sockets bound to one local address
#[derive(Debug, Clone)]
pub struct SystemNetwork {
    bind: IpAddr,
}

impl SystemNetwork {
    pub fn new(bind: IpAddr) -> Self {
        Self { bind }
    }

    pub fn bind_addr(&self) -> IpAddr {
        self.bind
    }
}

impl Default for SystemNetwork {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

impl NetworkInterface for SystemNetwork {
    fn resolve(&self, host: &str) -> Result<IpAddr, NetError> {
        let addrs: Vec<SocketAddr> = (host, 0)
            .to_socket_addrs()
            .map_err(|e| NetError::new(NetError::DNS_FAILURE, e.to_string()))?
            .collect();

        // The socket can only reach peers of its own family
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4() == self.bind.is_ipv4())
            .ok_or_else(|| {
                NetError::new(
                    NetError::DNS_FAILURE,
                    format!("no address of the bind family for {host}"),
                )
            })?;

        debug!(host = %host, addr = %addr.ip(), candidates = addrs.len(), "Resolved NTP server");
        Ok(addr.ip())
    }

    fn open_datagram_socket(&self) -> Result<Box<dyn DatagramSocket>, NetError> {
        let local = SocketAddr::new(self.bind, 0);
        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NetError::new(NetError::NO_SOCKET, e.to_string()))?;
        socket.bind(&local.into())?;

        let socket: UdpSocket = socket.into();
        Ok(Box::new(socket))
    }
}
