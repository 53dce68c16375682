//! Socket transport for the miner API.
//!
//! Each request opens a fresh TCP connection, writes one single-line JSON
//! command, reads until a NUL terminator or peer close, and decodes the reply.
//! No pooling, no retries: any network or decode failure is fatal to the
//! session.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::{Command, Response};

/// Send/receive timeout applied to every exchange.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// The one seam between the sweep engine and the network. The real
/// [`ApiClient`] implements it over TCP; tests implement it with scripted
/// replies.
pub trait MinerApi {
    /// Perform one command/reply exchange.
    fn send(&self, command: &Command) -> Result<Response>;
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Resolved network address of the miner API. Immutable once built.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: String,
    port: u16,
    addr: SocketAddr,
}

impl Endpoint {
    /// Resolve `host:port`, preferring the first IPv4 address.
    ///
    /// Failure to resolve to a usable address is fatal before any sweep
    /// begins.
    pub fn resolve(host: &str, port: u16) -> Result<Self> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::Resolution(format!("{host}:{port}")))?;

        let addr = addrs
            .into_iter()
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| Error::Resolution(format!("{host}:{port}")))?;

        Ok(Self {
            host: host.to_string(),
            port,
            addr,
        })
    }

    /// Hostname as given by the operator (used in artifact filenames).
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Blocking JSON-over-TCP client for the miner API.
pub struct ApiClient {
    endpoint: Endpoint,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: EXCHANGE_TIMEOUT,
        }
    }

    /// Override the per-exchange timeout. Tests use short values.
    pub fn with_timeout(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// One full exchange: connect, write the payload, read to the NUL
    /// terminator or peer close, return the raw response text.
    ///
    /// The stream is owned by this call and dropped on every exit path.
    fn exchange(&self, payload: &str) -> Result<String> {
        let mut stream = TcpStream::connect_timeout(&self.endpoint.addr, self.timeout)?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_read_timeout(Some(self.timeout))?;

        stream.write_all(payload.as_bytes())?;

        let mut raw: Vec<u8> = Vec::with_capacity(4096);
        let mut buf = [0u8; 8192];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if buf[..n].contains(&0) {
                break;
            }
        }

        // Strip the terminator before decoding.
        while raw.last() == Some(&0) {
            raw.pop();
        }

        String::from_utf8(raw).map_err(|e| Error::UnexpectedResponse(e.to_string()))
    }
}

impl MinerApi for ApiClient {
    fn send(&self, command: &Command) -> Result<Response> {
        let payload = command.to_json();
        debug!("-> {} {}", self.endpoint.addr, payload);

        let raw = self.exchange(&payload)?;
        trace!("<- {raw}");

        if raw.trim().is_empty() {
            return Err(Error::UnexpectedResponse("empty reply".into()));
        }
        Response::decode(command, &raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::thread;

    /// Serve exactly one connection on an ephemeral localhost port, capture
    /// the request bytes up to the first `}`, reply with `response`, then
    /// close. Returns the endpoint and a handle yielding the captured request.
    fn one_shot_server(response: &'static [u8]) -> (Endpoint, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            while stream.read(&mut byte).unwrap() == 1 {
                request.push(byte[0]);
                if byte[0] == b'}' {
                    break;
                }
            }
            stream.write_all(response).unwrap();
            String::from_utf8(request).unwrap()
        });

        (Endpoint::resolve("127.0.0.1", port).unwrap(), handle)
    }

    #[test]
    fn resolves_loopback() {
        let ep = Endpoint::resolve("127.0.0.1", 4028).unwrap();
        assert!(ep.addr().is_ipv4());
        assert_eq!(ep.port(), 4028);
        assert_eq!(ep.host(), "127.0.0.1");
    }

    #[test]
    fn exchange_reads_to_nul_terminator() {
        let (ep, server) =
            one_shot_server(b"{\"STATUS\":[{\"STATUS\":\"S\",\"Msg\":\"ok\"}],\"id\":1}\0");
        let client = ApiClient::with_timeout(ep, Duration::from_secs(2));

        let resp = client.send(&Command::Privileged).unwrap();
        assert_eq!(resp.first_status().unwrap().msg, "ok");

        let request = server.join().unwrap();
        assert_eq!(request, r#"{"command":"privileged"}"#);
    }

    #[test]
    fn exchange_reads_to_peer_close_without_nul() {
        let (ep, server) =
            one_shot_server(b"{\"STATUS\":[{\"STATUS\":\"S\",\"Description\":\"sgminer 4.1.0\"}],\"VERSION\":[{}],\"id\":1}");
        let client = ApiClient::with_timeout(ep, Duration::from_secs(2));

        let resp = client.send(&Command::Version).unwrap().into_version().unwrap();
        assert_eq!(resp.status[0].description, "sgminer 4.1.0");
        server.join().unwrap();
    }

    #[test]
    fn gpu_reply_is_normalized_before_decode() {
        let (ep, server) = one_shot_server(
            b"{\"STATUS\":[{\"STATUS\":\"S\"}],\"GPU\":[{\"GPU\":0,\"MHS 5s\":0.5}],\"id\":1}\0",
        );
        let client = ApiClient::with_timeout(ep, Duration::from_secs(2));

        let gpu = client.send(&Command::Gpu(0)).unwrap().into_gpu().unwrap();
        assert_eq!(gpu.gpu[0].mhs_xs, 0.5);

        let request = server.join().unwrap();
        assert_eq!(request, r#"{"command":"gpu","parameter":"0"}"#);
    }

    #[test]
    fn empty_reply_is_protocol_error() {
        let (ep, server) = one_shot_server(b"\0");
        let client = ApiClient::with_timeout(ep, Duration::from_secs(2));

        let err = client.send(&Command::Version).unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse(_)));
        server.join().unwrap();
    }

    #[test]
    fn connection_refused_is_protocol_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let ep = Endpoint::resolve("127.0.0.1", port).unwrap();
        let client = ApiClient::with_timeout(ep, Duration::from_millis(500));

        let err = client.send(&Command::Version).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
