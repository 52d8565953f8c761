//! Channel transport over TCP.
//!
//! The host listens, one socket per channel, and advertises candidates
//! through the session's `transport-info` batching. The client dials the
//! candidates it receives, best preference first. The dialer opens with a
//! preamble naming the candidate's username and password, then both ends
//! run the per-channel authenticator before the stream is handed out.
//!
//! ```text
//! [u8 len][username][u8 len][password]   dialer → listener
//! [32-byte tag]                          both ways
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::RemotingError;
use crate::protocol::auth::{ChannelAuthenticator, Role};
use crate::protocol::jingle::{CandidateProtocol, CandidateType, TransportCandidate};
use crate::protocol::relay::RelayInfo;

/// Time allowed for a dialer to send its preamble.
const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(2);

// ── TransportConfig ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address channel listeners bind to.
    pub bind_address: IpAddr,
    /// Address put into local candidates instead of the bound one.
    pub advertise_address: Option<IpAddr>,
    /// Budget for one channel to connect and authenticate.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            advertise_address: None,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

// ── ChannelStream ────────────────────────────────────────────────

/// An authenticated channel, ready for framing.
#[derive(Debug)]
pub struct ChannelStream {
    name: String,
    stream: TcpStream,
}

impl ChannelStream {
    pub(crate) fn new(name: impl Into<String>, stream: TcpStream) -> Self {
        Self {
            name: name.into(),
            stream,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

// ── Channel setup ────────────────────────────────────────────────

/// Everything one channel task needs; built by the session.
pub(crate) struct ChannelSetup {
    /// Owning session, tagged onto advertised candidates.
    pub sid: String,
    pub name: String,
    pub role: Role,
    pub config: TransportConfig,
    /// `None` until relay info was fetched (or the fetch failed).
    pub relay: watch::Receiver<Option<RelayInfo>>,
    /// Filled once the session authenticator accepts.
    pub auth: watch::Receiver<Option<ChannelAuthenticator>>,
    /// Remote candidates for this channel.
    pub remote: mpsc::UnboundedReceiver<TransportCandidate>,
    /// Local candidates to advertise, keyed by session id.
    pub local: mpsc::UnboundedSender<(String, TransportCandidate)>,
}

/// Connect and authenticate one channel within its timeout.
pub(crate) async fn establish(setup: ChannelSetup) -> Result<ChannelStream, RemotingError> {
    let timeout = setup.config.connect_timeout;
    tokio::time::timeout(timeout, establish_inner(setup))
        .await
        .map_err(|_| RemotingError::Timeout(timeout))?
}

async fn establish_inner(mut setup: ChannelSetup) -> Result<ChannelStream, RemotingError> {
    let mut stream = match setup.role {
        Role::Host => listen(&mut setup).await?,
        Role::Client => dial(&mut setup).await?,
    };

    let authenticator = setup
        .auth
        .wait_for(Option::is_some)
        .await
        .map_err(|_| RemotingError::ChannelCancelled(setup.name.clone()))?
        .clone()
        .ok_or_else(|| RemotingError::ChannelCancelled(setup.name.clone()))?;
    authenticator.authenticate(&mut stream, &setup.name).await?;
    stream.set_nodelay(true)?;

    debug!(channel = %setup.name, peer = ?stream.peer_addr().ok(), "channel connected");
    Ok(ChannelStream::new(setup.name, stream))
}

// ── Listening side ───────────────────────────────────────────────

async fn listen(setup: &mut ChannelSetup) -> Result<TcpStream, RemotingError> {
    let listener = TcpListener::bind(SocketAddr::new(setup.config.bind_address, 0)).await?;
    let port = listener.local_addr()?.port();
    let advertised = setup
        .config
        .advertise_address
        .unwrap_or(match setup.config.bind_address {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        });

    let username = random_token();
    let password = random_token();
    let candidate = |kind, address, preference| TransportCandidate {
        name: setup.name.clone(),
        address: SocketAddr::new(address, port),
        kind,
        protocol: CandidateProtocol::Tcp,
        username: username.clone(),
        password: password.clone(),
        preference,
        generation: 0,
    };
    setup
        .local
        .send((setup.sid.clone(), candidate(CandidateType::Local, advertised, 1.0)))
        .map_err(|_| RemotingError::ChannelCancelled(setup.name.clone()))?;

    let current = *setup.relay.borrow_and_update();
    let mut relay_pending = current.is_none();
    if let Some(public) = current.and_then(|info| info.public_address) {
        let _ = setup.local.send((setup.sid.clone(), candidate(CandidateType::Stun, public.ip(), 0.5)));
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = accepted?;
                match read_preamble(&mut stream).await {
                    Some((user, pass)) if user == username && pass == password => return Ok(stream),
                    _ => warn!(channel = %setup.name, %peer, "rejected channel connection with bad credentials"),
                }
            }
            changed = setup.relay.changed(), if relay_pending => {
                if changed.is_err() {
                    relay_pending = false;
                    continue;
                }
                let info = *setup.relay.borrow_and_update();
                if let Some(info) = info {
                    relay_pending = false;
                    if let Some(public) = info.public_address {
                        let _ = setup.local.send((setup.sid.clone(), candidate(CandidateType::Stun, public.ip(), 0.5)));
                    }
                }
            }
            // Remote candidates are meaningless to the listening side.
            Some(remote) = setup.remote.recv() => {
                debug!(channel = %setup.name, address = %remote.address, "ignoring remote candidate on listening side");
            }
        }
    }
}

async fn read_preamble(stream: &mut TcpStream) -> Option<(String, String)> {
    async fn field(stream: &mut TcpStream) -> Option<String> {
        let len = stream.read_u8().await.ok()?;
        let mut buf = vec![0u8; len as usize];
        stream.read_exact(&mut buf).await.ok()?;
        String::from_utf8(buf).ok()
    }
    tokio::time::timeout(PREAMBLE_TIMEOUT, async {
        let user = field(stream).await?;
        let pass = field(stream).await?;
        Some((user, pass))
    })
    .await
    .ok()
    .flatten()
}

// ── Dialing side ─────────────────────────────────────────────────

async fn dial(setup: &mut ChannelSetup) -> Result<TcpStream, RemotingError> {
    let mut known: Vec<TransportCandidate> = Vec::new();
    loop {
        if known.is_empty() {
            match setup.remote.recv().await {
                Some(candidate) => known.push(candidate),
                None => return Err(RemotingError::ChannelCancelled(setup.name.clone())),
            }
        }
        while let Ok(candidate) = setup.remote.try_recv() {
            known.push(candidate);
        }
        known.sort_by(|a, b| a.preference.total_cmp(&b.preference));
        let Some(candidate) = known.pop() else {
            continue;
        };

        match TcpStream::connect(candidate.address).await {
            Ok(mut stream) => {
                write_preamble(&mut stream, &candidate).await?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(channel = %setup.name, address = %candidate.address, error = %e, "candidate unreachable");
            }
        }
    }
}

async fn write_preamble(stream: &mut TcpStream, candidate: &TransportCandidate) -> Result<(), RemotingError> {
    let mut preamble = Vec::with_capacity(2 + candidate.username.len() + candidate.password.len());
    for field in [&candidate.username, &candidate.password] {
        let len = u8::try_from(field.len())
            .map_err(|_| RemotingError::Other("candidate credential too long".into()))?;
        preamble.push(len);
        preamble.extend_from_slice(field.as_bytes());
    }
    stream.write_all(&preamble).await?;
    Ok(())
}

/// Two ends of a localhost connection, without any handshake.
#[cfg(test)]
pub(crate) async fn connected_pair(name: &str) -> (ChannelStream, ChannelStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (dialed, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
    (
        ChannelStream::new(name, dialed.unwrap()),
        ChannelStream::new(name, accepted.unwrap().0),
    )
}

fn random_token() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ends {
        host: ChannelSetup,
        client: ChannelSetup,
        host_local: mpsc::UnboundedReceiver<(String, TransportCandidate)>,
        client_remote: mpsc::UnboundedSender<TransportCandidate>,
        auth_tx: watch::Sender<Option<ChannelAuthenticator>>,
        client_auth_tx: watch::Sender<Option<ChannelAuthenticator>>,
        _relay_tx: watch::Sender<Option<RelayInfo>>,
    }

    fn ends(name: &str) -> Ends {
        let (relay_tx, relay) = watch::channel(None);
        let (auth_tx, host_auth) = watch::channel(None);
        let (client_auth_tx, client_auth) = watch::channel(None);
        let (host_local_tx, host_local) = mpsc::unbounded_channel();
        let (_unused_tx, host_remote) = mpsc::unbounded_channel();
        let (client_remote, client_remote_rx) = mpsc::unbounded_channel();
        let (client_local_tx, _client_local) = mpsc::unbounded_channel();
        let config = TransportConfig {
            connect_timeout: Duration::from_secs(5),
            ..TransportConfig::default()
        };
        Ends {
            host: ChannelSetup {
                sid: "s1".into(),
                name: name.into(),
                role: Role::Host,
                config: config.clone(),
                relay: relay.clone(),
                auth: host_auth,
                remote: host_remote,
                local: host_local_tx,
            },
            client: ChannelSetup {
                sid: "s1".into(),
                name: name.into(),
                role: Role::Client,
                config,
                relay,
                auth: client_auth,
                remote: client_remote_rx,
                local: client_local_tx,
            },
            host_local,
            client_remote,
            auth_tx,
            client_auth_tx,
            _relay_tx: relay_tx,
        }
    }

    #[tokio::test]
    async fn channel_connects_and_authenticates() {
        let mut e = ends("video");
        let host = tokio::spawn(establish(e.host));
        let client = tokio::spawn(establish(e.client));

        let (sid, candidate) = e.host_local.recv().await.unwrap();
        assert_eq!(sid, "s1");
        assert_eq!(candidate.name, "video");
        assert_eq!(candidate.kind, CandidateType::Local);
        e.client_remote.send(candidate).unwrap();

        e.auth_tx.send_replace(Some(ChannelAuthenticator::new(Role::Host, [5; 32])));
        e.client_auth_tx
            .send_replace(Some(ChannelAuthenticator::new(Role::Client, [5; 32])));

        let host = host.await.unwrap().unwrap();
        let client = client.await.unwrap().unwrap();
        assert_eq!(host.name(), "video");
        assert_eq!(client.name(), "video");
    }

    #[tokio::test]
    async fn wrong_credentials_are_not_accepted() {
        let mut e = ends("control");
        let host = tokio::spawn(establish(e.host));
        let (_, mut candidate) = e.host_local.recv().await.unwrap();
        candidate.password = "nope".into();

        let mut intruder = TcpStream::connect(candidate.address).await.unwrap();
        write_preamble(&mut intruder, &candidate).await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(intruder.read(&mut buf).await.unwrap(), 0);
        host.abort();
    }

    #[tokio::test]
    async fn dialer_without_candidates_is_cancelled() {
        let e = ends("event");
        drop(e.client_remote);
        let result = establish(e.client).await;
        assert!(matches!(result, Err(RemotingError::ChannelCancelled(_))));
    }

    #[tokio::test]
    async fn mismatched_keys_fail_the_channel() {
        let mut e = ends("event");
        let host = tokio::spawn(establish(e.host));
        let client = tokio::spawn(establish(e.client));
        e.client_remote.send(e.host_local.recv().await.unwrap().1).unwrap();
        e.auth_tx.send_replace(Some(ChannelAuthenticator::new(Role::Host, [1; 32])));
        e.client_auth_tx
            .send_replace(Some(ChannelAuthenticator::new(Role::Client, [2; 32])));
        assert!(client.await.unwrap().is_err());
        assert!(host.await.unwrap().is_err());
    }
}
