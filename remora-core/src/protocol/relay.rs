//! NAT-traversal relay information.
//!
//! The session manager fetches this once at startup. Until it arrives,
//! channels only advertise their local candidates; afterwards a `stun`
//! candidate carrying the public address is advertised as well.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::RemotingError;

/// What the relay service told us about our public reachability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayInfo {
    /// Server-reflexive address of the local host, if known.
    pub public_address: Option<SocketAddr>,
}

#[async_trait]
pub trait RelayInfoProvider: Send + Sync {
    async fn fetch(&self) -> Result<RelayInfo, RemotingError>;
}

/// Provider for deployments without NAT traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRelay;

#[async_trait]
impl RelayInfoProvider for NoRelay {
    async fn fetch(&self) -> Result<RelayInfo, RemotingError> {
        Ok(RelayInfo::default())
    }
}

// ── STUN ─────────────────────────────────────────────────────────

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const MAGIC_COOKIE: u32 = 0x2112_A442;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const HEADER_LEN: usize = 20;

/// Learns the public address with one STUN binding request over UDP.
#[derive(Debug, Clone)]
pub struct StunRelayInfoProvider {
    server: String,
    timeout: Duration,
}

impl StunRelayInfoProvider {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn query(&self) -> Result<SocketAddr, RemotingError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.server.as_str()).await?;

        let transaction: [u8; 12] = rand::random();
        socket.send(&binding_request(&transaction)).await?;

        let mut buf = [0u8; 1024];
        let len = socket.recv(&mut buf).await?;
        parse_binding_response(&buf[..len], &transaction)
    }
}

#[async_trait]
impl RelayInfoProvider for StunRelayInfoProvider {
    async fn fetch(&self) -> Result<RelayInfo, RemotingError> {
        let address = tokio::time::timeout(self.timeout, self.query())
            .await
            .map_err(|_| RemotingError::Timeout(self.timeout))??;
        debug!(server = %self.server, %address, "stun binding succeeded");
        Ok(RelayInfo {
            public_address: Some(address),
        })
    }
}

fn binding_request(transaction: &[u8; 12]) -> Vec<u8> {
    let mut request = Vec::with_capacity(HEADER_LEN);
    request.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    request.extend_from_slice(&0u16.to_be_bytes());
    request.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    request.extend_from_slice(transaction);
    request
}

fn parse_binding_response(data: &[u8], transaction: &[u8; 12]) -> Result<SocketAddr, RemotingError> {
    let bad = |what: &str| RemotingError::Other(format!("stun: {what}"));
    if data.len() < HEADER_LEN {
        return Err(bad("response too short"));
    }
    if u16::from_be_bytes([data[0], data[1]]) != BINDING_RESPONSE {
        return Err(bad("not a binding response"));
    }
    if u32::from_be_bytes([data[4], data[5], data[6], data[7]]) != MAGIC_COOKIE {
        return Err(bad("bad magic cookie"));
    }
    if &data[8..HEADER_LEN] != transaction {
        return Err(bad("transaction id mismatch"));
    }
    let body_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let body = data
        .get(HEADER_LEN..HEADER_LEN + body_len)
        .ok_or_else(|| bad("response truncated"))?;

    let mut offset = 0;
    while offset + 4 <= body.len() {
        let kind = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let len = u16::from_be_bytes([body[offset + 2], body[offset + 3]]) as usize;
        offset += 4;
        let Some(value) = body.get(offset..offset + len) else {
            break;
        };
        match kind {
            ATTR_XOR_MAPPED_ADDRESS => return read_address(value, Some(transaction)).ok_or_else(|| bad("bad address")),
            ATTR_MAPPED_ADDRESS => return read_address(value, None).ok_or_else(|| bad("bad address")),
            _ => {}
        }
        offset += (len + 3) & !3;
    }
    Err(bad("no mapped address"))
}

/// Decode a (XOR-)MAPPED-ADDRESS value. `xor` carries the transaction id
/// for the XOR variant.
fn read_address(value: &[u8], xor: Option<&[u8; 12]>) -> Option<SocketAddr> {
    let family = *value.get(1)?;
    let mut port = u16::from_be_bytes([*value.get(2)?, *value.get(3)?]);
    let cookie = MAGIC_COOKIE.to_be_bytes();
    if xor.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }
    let ip = match family {
        0x01 => {
            let mut octets: [u8; 4] = value.get(4..8)?.try_into().ok()?;
            if xor.is_some() {
                for (o, c) in octets.iter_mut().zip(cookie) {
                    *o ^= c;
                }
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x02 => {
            let mut octets: [u8; 16] = value.get(4..20)?.try_into().ok()?;
            if let Some(transaction) = xor {
                let mask = cookie.iter().chain(transaction.iter());
                for (o, m) in octets.iter_mut().zip(mask) {
                    *o ^= m;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(transaction: &[u8; 12], attr: u16, value: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&BINDING_RESPONSE.to_be_bytes());
        data.extend_from_slice(&((value.len() + 4) as u16).to_be_bytes());
        data.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        data.extend_from_slice(transaction);
        data.extend_from_slice(&attr.to_be_bytes());
        data.extend_from_slice(&(value.len() as u16).to_be_bytes());
        data.extend_from_slice(value);
        data
    }

    #[test]
    fn request_header_layout() {
        let request = binding_request(&[9; 12]);
        assert_eq!(request.len(), HEADER_LEN);
        assert_eq!(&request[..2], &[0x00, 0x01]);
        assert_eq!(&request[4..8], &MAGIC_COOKIE.to_be_bytes());
    }

    #[test]
    fn xor_mapped_ipv4() {
        let transaction = [3; 12];
        let port = 40_000u16 ^ (MAGIC_COOKIE >> 16) as u16;
        let cookie = MAGIC_COOKIE.to_be_bytes();
        let ip: [u8; 4] = [203, 0, 113, 9];
        let mut value = vec![0, 0x01];
        value.extend_from_slice(&port.to_be_bytes());
        value.extend(ip.iter().zip(cookie).map(|(a, b)| a ^ b));

        let address = parse_binding_response(&response(&transaction, ATTR_XOR_MAPPED_ADDRESS, &value), &transaction).unwrap();
        assert_eq!(address, "203.0.113.9:40000".parse().unwrap());
    }

    #[test]
    fn plain_mapped_address() {
        let transaction = [1; 12];
        let value = [0, 0x01, 0x1f, 0x90, 10, 0, 0, 1];
        let address = parse_binding_response(&response(&transaction, ATTR_MAPPED_ADDRESS, &value), &transaction).unwrap();
        assert_eq!(address, "10.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn wrong_transaction_is_rejected() {
        let value = [0, 0x01, 0x1f, 0x90, 10, 0, 0, 1];
        let data = response(&[1; 12], ATTR_MAPPED_ADDRESS, &value);
        assert!(parse_binding_response(&data, &[2; 12]).is_err());
        assert!(parse_binding_response(&data[..10], &[1; 12]).is_err());
    }

    #[tokio::test]
    async fn no_relay_is_empty() {
        assert_eq!(NoRelay.fetch().await.unwrap(), RelayInfo::default());
    }
}
