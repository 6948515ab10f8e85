//! Active proxy protocol detection
//!
//! Every probe builds a raw handshake, sends it over a fresh TCP
//! connection and grades the reply. Connect, write and read each run
//! under their own timeout; network failures become `ProbeOutcome`
//! values instead of errors.

use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, instrument};

use crate::config::ProbeConfig;
use crate::models::{NetworkErrorKind, ProbeOutcome, ProxyType, ScanResult};

/// SOCKS5 greeting: version 5, one method offered, "no authentication"
pub const SOCKS5_GREETING: [u8; 3] = [0x05, 0x01, 0x00];

const SOCKS4_GRANTED: u8 = 0x5A;
const HTTP_RESPONSE_LIMIT: usize = 1024;

/// Detects SOCKS4, SOCKS5 and HTTP proxies on arbitrary ports
#[derive(Debug, Clone)]
pub struct ProtocolDetector {
    config: Arc<ProbeConfig>,
}

impl Default for ProtocolDetector {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

impl ProtocolDetector {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe for a SOCKS5 server
    pub async fn detect_socks5(&self, addr: SocketAddr) -> ProbeOutcome {
        let mut reply = [0u8; 2];
        let outcome = match self
            .exchange(addr, &SOCKS5_GREETING, &mut reply, |r| r.len() >= 2)
            .await
        {
            Ok(n) => classify_socks5(&reply[..n]),
            Err(kind) => ProbeOutcome::NetworkError(kind),
        };
        debug!("SOCKS5 probe of {}: {:?}", addr, outcome);
        outcome
    }

    /// Probe for a SOCKS4 server with a CONNECT to the configured destination
    ///
    /// A proxy that is SOCKS4 but cannot reach the destination still
    /// answers with `VN=0` and is reported at reduced confidence.
    pub async fn detect_socks4(&self, addr: SocketAddr) -> ProbeOutcome {
        let request = socks4_connect_request(self.config.socks4_destination);
        let mut reply = [0u8; 8];
        let outcome = match self.exchange(addr, &request, &mut reply, |r| r.len() >= 8).await {
            Ok(n) => classify_socks4(&reply[..n]),
            Err(kind) => ProbeOutcome::NetworkError(kind),
        };
        debug!("SOCKS4 probe of {}: {:?}", addr, outcome);
        outcome
    }

    /// Probe for an HTTP proxy with a CONNECT tunnel request
    pub async fn detect_http_proxy(&self, addr: SocketAddr) -> ProbeOutcome {
        let request =
            http_connect_request(&self.config.http_connect_host, self.config.http_connect_port);
        let mut reply = vec![0u8; HTTP_RESPONSE_LIMIT];
        let outcome = match self
            .exchange(addr, request.as_bytes(), &mut reply, |r| r.contains(&b'\n'))
            .await
        {
            Ok(n) => classify_http(&reply[..n]),
            Err(kind) => ProbeOutcome::NetworkError(kind),
        };
        debug!("HTTP probe of {}: {:?}", addr, outcome);
        outcome
    }

    /// Run all three probes concurrently and report the strongest match
    ///
    /// Only a failure to resolve the target sets `ScanResult::error`;
    /// refused, reset and timed-out connections are plain non-detections.
    #[instrument(skip(self), fields(target = %ip, port = port))]
    pub async fn detect_proxy(&self, ip: &str, port: u16) -> ScanResult {
        let start = Instant::now();

        let addr = match self.resolve(ip, port).await {
            Ok(addr) => addr,
            Err(e) => {
                debug!("Could not resolve {}: {}", ip, e);
                return ScanResult::failed(ip, port, start.elapsed(), e);
            }
        };

        let (socks5, socks4, http) = tokio::join!(
            self.detect_socks5(addr),
            self.detect_socks4(addr),
            self.detect_http_proxy(addr)
        );
        let elapsed = start.elapsed();

        let probes = [
            (ProxyType::Socks5, socks5),
            (ProxyType::Socks4, socks4),
            (ProxyType::Http, http),
        ];

        let mut result = match select_best(&probes) {
            Some((proxy_type, confidence)) => {
                info!(
                    "Found {} proxy at {} (confidence {:.2})",
                    proxy_type, addr, confidence
                );
                ScanResult::detected(ip, port, proxy_type, confidence, elapsed)
            }
            None => ScanResult::not_detected(ip, port, elapsed),
        };

        for (proxy_type, outcome) in &probes {
            result
                .metadata
                .insert(proxy_type.as_str().to_string(), outcome.label().to_string());
        }

        result
    }

    async fn resolve(&self, ip: &str, port: u16) -> Result<SocketAddr, String> {
        if let Ok(addr) = ip.trim().parse::<IpAddr>() {
            return Ok(SocketAddr::new(addr, port));
        }

        match timeout(self.config.timeout, lookup_host((ip.trim(), port))).await {
            Ok(Ok(mut addrs)) => addrs
                .next()
                .ok_or_else(|| format!("no addresses found for {}", ip)),
            Ok(Err(e)) => Err(format!("address resolution failed: {}", e)),
            Err(_) => Err("address resolution timed out".to_string()),
        }
    }

    /// Connect, send `request`, then read until `complete` says the reply
    /// is whole, the buffer is full, or the peer closes.
    ///
    /// A read timeout after some bytes arrived returns what was read.
    async fn exchange<F>(
        &self,
        addr: SocketAddr,
        request: &[u8],
        buf: &mut [u8],
        complete: F,
    ) -> Result<usize, NetworkErrorKind>
    where
        F: Fn(&[u8]) -> bool,
    {
        let probe_timeout = self.config.timeout;

        let mut stream = match timeout(probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(NetworkErrorKind::from_io(&e)),
            Err(_) => return Err(NetworkErrorKind::Timeout),
        };

        match timeout(probe_timeout, stream.write_all(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(NetworkErrorKind::from_io(&e)),
            Err(_) => return Err(NetworkErrorKind::Timeout),
        }

        let deadline = Instant::now() + probe_timeout;
        let mut filled = 0;
        while filled < buf.len() {
            match timeout_at(deadline, stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    filled += n;
                    if complete(&buf[..filled]) {
                        break;
                    }
                }
                Ok(Err(e)) if filled == 0 => return Err(NetworkErrorKind::from_io(&e)),
                Ok(Err(_)) => break,
                Err(_) if filled == 0 => return Err(NetworkErrorKind::Timeout),
                Err(_) => break,
            }
        }

        Ok(filled)
    }
}

/// Build the 9-byte SOCKS4 CONNECT request with an empty user id
pub fn socks4_connect_request(destination: SocketAddrV4) -> [u8; 9] {
    let port = destination.port().to_be_bytes();
    let ip = destination.ip().octets();
    [0x04, 0x01, port[0], port[1], ip[0], ip[1], ip[2], ip[3], 0x00]
}

/// Build the HTTP CONNECT probe request
pub fn http_connect_request(host: &str, port: u16) -> String {
    format!(
        "CONNECT {host}:{port} HTTP/1.1\r\n\
         Host: {host}:{port}\r\n\
         User-Agent: Mozilla/5.0\r\n\
         Proxy-Connection: Keep-Alive\r\n\
         \r\n"
    )
}

/// Grade a SOCKS5 method-selection reply
pub fn classify_socks5(reply: &[u8]) -> ProbeOutcome {
    match reply {
        [0x05, 0x00] => ProbeOutcome::Detected(1.0),
        [0x05, 0x02] => ProbeOutcome::Detected(0.9),
        [0x05, _] => ProbeOutcome::Detected(0.8),
        _ => ProbeOutcome::NotDetected,
    }
}

/// Grade a SOCKS4 reply; only `VN` and `CD` are inspected
pub fn classify_socks4(reply: &[u8]) -> ProbeOutcome {
    match reply {
        [0x00, SOCKS4_GRANTED, ..] => ProbeOutcome::Detected(1.0),
        [0x00, _, ..] => ProbeOutcome::Detected(0.7),
        _ => ProbeOutcome::NotDetected,
    }
}

/// Grade the status line of an HTTP CONNECT reply
pub fn classify_http(reply: &[u8]) -> ProbeOutcome {
    let text = String::from_utf8_lossy(reply);
    let Some(status_line) = text.lines().next() else {
        return ProbeOutcome::NotDetected;
    };

    let mut parts = status_line.split_whitespace();
    let is_http = parts.next().is_some_and(|v| v.starts_with("HTTP/"));
    let status = parts.next().and_then(|code| code.parse::<u16>().ok());

    match (is_http, status) {
        (true, Some(200)) => ProbeOutcome::Detected(1.0),
        (true, Some(407)) => ProbeOutcome::Detected(0.9),
        (true, Some(400..=599)) => ProbeOutcome::Detected(0.6),
        _ => ProbeOutcome::NotDetected,
    }
}

/// Pick the highest-confidence detection; earlier entries win ties
pub fn select_best(probes: &[(ProxyType, ProbeOutcome)]) -> Option<(ProxyType, f64)> {
    probes
        .iter()
        .filter(|(_, outcome)| outcome.is_detected())
        .fold(None, |best: Option<(ProxyType, f64)>, (proxy_type, outcome)| {
            let confidence = outcome.confidence();
            match best {
                Some((_, best_confidence)) if best_confidence >= confidence => best,
                _ => Some((*proxy_type, confidence)),
            }
        })
}
