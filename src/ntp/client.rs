use super::net::NetworkInterface;
use super::packet;
use crate::config::ServerConfig;
use crate::errors::QueryError;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One-shot SNTP client.
///
/// Each query resolves the server, opens its own socket, sends one request
/// and waits for one reply. Nothing is retried and nothing is kept between
/// calls. Clones share the bound interface and server settings.
#[derive(Clone)]
pub struct TimeQueryClient {
    iface: Arc<RwLock<Option<Arc<dyn NetworkInterface>>>>,
    server: Arc<RwLock<ServerConfig>>,
}

impl TimeQueryClient {
    pub fn new(iface: Option<Arc<dyn NetworkInterface>>) -> Self {
        Self {
            iface: Arc::new(RwLock::new(iface)),
            server: Arc::new(RwLock::new(ServerConfig::default())),
        }
    }

    pub fn with_server(self, server: ServerConfig) -> Self {
        *self.server.write() = server;
        self
    }

    /// Point subsequent queries at another server
    pub fn configure(&self, address: impl Into<String>, port: u16) {
        *self.server.write() = ServerConfig {
            address: address.into(),
            port,
        };
    }

    pub fn server(&self) -> ServerConfig {
        self.server.read().clone()
    }

    /// Swap the network interface. Queries already running keep the old one.
    pub fn rebind(&self, iface: Option<Arc<dyn NetworkInterface>>) {
        *self.iface.write() = iface;
    }

    pub fn is_bound(&self) -> bool {
        self.iface.read().is_some()
    }

    /// Ask the server for the time, as Unix seconds taken from the transmit timestamp
    pub fn query(&self, timeout: Duration) -> Result<i64, QueryError> {
        // Snapshot so the locks are not held across I/O
        let iface = self.iface.read().clone().ok_or(QueryError::NoInterface)?;
        let server = self.server();

        let ip = iface.resolve(&server.address).map_err(|e| {
            warn!(server = %server.address, error = %e, "NTP server resolution failed");
            QueryError::Resolve(e)
        })?;
        let addr = SocketAddr::new(ip, server.port);

        let request = packet::request();

        let mut socket = iface.open_datagram_socket().map_err(QueryError::Transport)?;
        // Zero would disable the timeout on most stacks
        let timeout = timeout.max(Duration::from_millis(1));
        socket.set_timeout(timeout).map_err(QueryError::Transport)?;

        debug!(
            server = %server.address,
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Sending SNTP request"
        );

        socket.send_to(&request, addr).map_err(|e| {
            warn!(addr = %addr, error = %e, "SNTP request send failed");
            QueryError::Transport(e)
        })?;

        let mut reply = [0u8; packet::PACKET_LEN];
        let (received, source) = socket.recv_from(&mut reply).map_err(|e| {
            warn!(addr = %addr, error = %e, "SNTP reply not received");
            QueryError::Transport(e)
        })?;

        match packet::transmit_unix_secs(&reply, received) {
            Some(timestamp) => {
                debug!(source = %source, received, timestamp, "SNTP reply decoded");
                Ok(timestamp)
            }
            None => {
                warn!(source = %source, received, "SNTP reply too short");
                Err(QueryError::InsufficientData { received })
            }
        }
    }

    /// Status-code form of [`query`](Self::query): `(timestamp, 0)` on success,
    /// `(0, code)` otherwise.
    pub fn query_status(&self, timeout: Duration) -> (i64, i32) {
        match self.query(timeout) {
            Ok(timestamp) => (timestamp, 0),
            Err(e) => (0, e.code()),
        }
    }

    /// Run [`query`](Self::query) on the blocking pool
    pub async fn query_async(&self, timeout: Duration) -> Result<i64, QueryError> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.query(timeout))
            .await
            .map_err(|e| QueryError::Aborted(e.to_string()))?
    }
}

impl std::fmt::Debug for TimeQueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeQueryClient")
            .field("bound", &self.is_bound())
            .field("server", &*self.server.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_SERVER_ADDRESS, DEFAULT_SERVER_PORT};
    use crate::ntp::net::{DatagramSocket, NetError};
    use parking_lot::Mutex;
    use std::net::{IpAddr, Ipv4Addr};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Resolve(String),
        Open,
        SetTimeout(Duration),
        SendTo(SocketAddr, Vec<u8>),
        RecvFrom,
    }

    #[derive(Clone)]
    enum Reply {
        Data(Vec<u8>),
        Error(i32),
    }

    /// Scripted network that records every call
    struct MockNetwork {
        calls: Arc<Mutex<Vec<Call>>>,
        resolve_error: Option<i32>,
        send_error: Option<i32>,
        reply: Reply,
    }

    impl MockNetwork {
        fn replying(reply: Vec<u8>) -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                resolve_error: None,
                send_error: None,
                reply: Reply::Data(reply),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    struct MockSocket {
        calls: Arc<Mutex<Vec<Call>>>,
        send_error: Option<i32>,
        reply: Reply,
    }

    impl NetworkInterface for MockNetwork {
        fn resolve(&self, host: &str) -> Result<IpAddr, NetError> {
            self.calls.lock().push(Call::Resolve(host.to_string()));
            match self.resolve_error {
                Some(code) => Err(NetError::new(code, "lookup failed")),
                None => Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
            }
        }

        fn open_datagram_socket(&self) -> Result<Box<dyn DatagramSocket>, NetError> {
            self.calls.lock().push(Call::Open);
            Ok(Box::new(MockSocket {
                calls: self.calls.clone(),
                send_error: self.send_error,
                reply: self.reply.clone(),
            }))
        }
    }

    impl DatagramSocket for MockSocket {
        fn set_timeout(&mut self, timeout: Duration) -> Result<(), NetError> {
            self.calls.lock().push(Call::SetTimeout(timeout));
            Ok(())
        }

        fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<usize, NetError> {
            self.calls.lock().push(Call::SendTo(addr, buf.to_vec()));
            match self.send_error {
                Some(code) => Err(NetError::new(code, "send failed")),
                None => Ok(buf.len()),
            }
        }

        fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddr), NetError> {
            self.calls.lock().push(Call::RecvFrom);
            match &self.reply {
                Reply::Data(data) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok((n, "192.0.2.1:123".parse().unwrap()))
                }
                Reply::Error(code) => Err(NetError::new(*code, "receive failed")),
            }
        }
    }

    fn reply_of_len(len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 48];
        buf[0] = 0x1c;
        buf[40..44].copy_from_slice(&[0xE0, 0x3B, 0x3D, 0x80]);
        buf.truncate(len);
        buf
    }

    fn bound(net: &Arc<MockNetwork>) -> TimeQueryClient {
        TimeQueryClient::new(Some(net.clone() as Arc<dyn NetworkInterface>))
    }

    #[test]
    fn test_defaults() {
        let client = TimeQueryClient::new(None);
        let server = client.server();
        assert_eq!(server.address, DEFAULT_SERVER_ADDRESS);
        assert_eq!(server.port, DEFAULT_SERVER_PORT);
        assert!(!client.is_bound());
    }

    #[test]
    fn test_query_success() {
        let net = Arc::new(MockNetwork::replying(reply_of_len(48)));
        let client = bound(&net);

        assert_eq!(client.query(Duration::from_millis(1500)), Ok(1_552_989_952));

        let calls = net.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], Call::Resolve(DEFAULT_SERVER_ADDRESS.to_string()));
        assert_eq!(calls[1], Call::Open);
        assert_eq!(calls[2], Call::SetTimeout(Duration::from_millis(1500)));
        match &calls[3] {
            Call::SendTo(addr, bytes) => {
                assert_eq!(addr.port(), 123);
                assert_eq!(bytes.len(), 48);
                assert_eq!(bytes[0], 0x1b);
                assert!(bytes[1..].iter().all(|b| *b == 0));
            }
            other => panic!("expected send, got {:?}", other),
        }
        assert_eq!(calls[4], Call::RecvFrom);
    }

    #[test]
    fn test_no_interface() {
        let client = TimeQueryClient::new(None);
        assert_eq!(client.query(Duration::from_secs(1)), Err(QueryError::NoInterface));
        assert_eq!(client.query_status(Duration::from_secs(1)).1, -2);
    }

    #[test]
    fn test_resolve_error_passthrough() {
        let mut mock = MockNetwork::replying(reply_of_len(48));
        mock.resolve_error = Some(-3009);
        let net = Arc::new(mock);
        let client = bound(&net);

        let err = client.query(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, QueryError::Resolve(_)));
        assert_eq!(err.code(), -3009);
        // Nothing after the lookup
        assert_eq!(net.calls(), vec![Call::Resolve(DEFAULT_SERVER_ADDRESS.to_string())]);
    }

    #[test]
    fn test_zero_code_from_resolver_is_a_failure() {
        let mut mock = MockNetwork::replying(reply_of_len(48));
        mock.resolve_error = Some(0);
        let net = Arc::new(mock);

        let (_, code) = bound(&net).query_status(Duration::from_secs(1));
        assert_eq!(code, NetError::DEVICE_ERROR);
        assert!(code < 0);
    }

    #[test]
    fn test_reply_length_boundary() {
        let net = Arc::new(MockNetwork::replying(reply_of_len(41)));
        assert!(bound(&net).query(Duration::from_secs(1)).is_ok());

        let net = Arc::new(MockNetwork::replying(reply_of_len(40)));
        let err = bound(&net).query(Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, QueryError::InsufficientData { received: 40 });
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn test_receive_error_passthrough() {
        let mut mock = MockNetwork::replying(Vec::new());
        mock.reply = Reply::Error(NetError::WOULD_BLOCK);
        let net = Arc::new(mock);

        let (_, code) = bound(&net).query_status(Duration::from_millis(10));
        assert_eq!(code, NetError::WOULD_BLOCK);
    }

    #[test]
    fn test_send_error_propagated() {
        let mut mock = MockNetwork::replying(reply_of_len(48));
        mock.send_error = Some(NetError::NO_CONNECTION);
        let net = Arc::new(mock);

        let err = bound(&net).query(Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.code(), NetError::NO_CONNECTION);
        assert!(!net.calls().contains(&Call::RecvFrom));
    }

    #[test]
    fn test_configure_used_for_next_query() {
        let net = Arc::new(MockNetwork::replying(reply_of_len(48)));
        let client = bound(&net);
        client.configure("time.example.net", 1123);

        client.query(Duration::from_secs(1)).unwrap();

        let calls = net.calls();
        assert_eq!(calls[0], Call::Resolve("time.example.net".to_string()));
        assert!(calls.iter().any(|c| matches!(c, Call::SendTo(addr, _) if addr.port() == 1123)));
    }

    #[test]
    fn test_query_is_idempotent() {
        let net = Arc::new(MockNetwork::replying(reply_of_len(48)));
        let client = bound(&net);

        let first = client.query(Duration::from_secs(1)).unwrap();
        let second = client.query(Duration::from_secs(1)).unwrap();
        assert_eq!(first, second);
        // Fresh socket per query
        assert_eq!(net.calls().iter().filter(|c| **c == Call::Open).count(), 2);
    }

    #[test]
    fn test_rebind() {
        let client = TimeQueryClient::new(None);
        assert!(client.query(Duration::from_secs(1)).is_err());

        let net = Arc::new(MockNetwork::replying(reply_of_len(48)));
        client.rebind(Some(net.clone() as Arc<dyn NetworkInterface>));
        assert!(client.is_bound());
        assert_eq!(client.query_status(Duration::from_secs(1)), (1_552_989_952, 0));

        client.rebind(None);
        assert_eq!(client.query(Duration::from_secs(1)), Err(QueryError::NoInterface));
    }

    #[test]
    fn test_zero_timeout_raised() {
        let net = Arc::new(MockNetwork::replying(reply_of_len(48)));
        bound(&net).query(Duration::ZERO).unwrap();
        assert!(net.calls().contains(&Call::SetTimeout(Duration::from_millis(1))));
    }

    #[tokio::test]
    async fn test_query_async() {
        let net = Arc::new(MockNetwork::replying(reply_of_len(48)));
        let client = bound(&net);
        assert_eq!(client.query_async(Duration::from_secs(1)).await, Ok(1_552_989_952));
    }
}
