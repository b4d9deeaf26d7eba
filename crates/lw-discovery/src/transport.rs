//! Beacon emitter and listener tasks.
//!
//! The emitter seals one beacon per tick and sends it to the multicast
//! group; a bad seal or send aborts only that tick. The listener joins the
//! group with a 1 MiB receive buffer and a rolling 5-second read deadline
//! so cancellation stays responsive, silently dropping anything that fails
//! the magic or AEAD checks.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lw_core::types::{Beacon, PeerRecord};
use lw_core::{EventBus, NodeEvent};
use lw_crypto::KEY_SIZE;
use lw_peers::PeerDirectory;

use crate::beacon::{open_beacon, seal_beacon};

const READ_DEADLINE: Duration = Duration::from_secs(5);
const RECV_BUFFER: usize = 1 << 20;
const MAX_DATAGRAM: usize = 65535;

/// Everything the emitter puts into each beacon.
#[derive(Debug, Clone)]
pub struct BeaconSource {
    pub node_id: String,
    pub hostname: String,
    pub api_port: u16,
    pub pubkey_b64: String,
}

/// Long-lived task: emit one sealed beacon per interval until cancelled.
pub async fn run_emitter(
    source: BeaconSource,
    local_ip: Ipv4Addr,
    group: Ipv4Addr,
    port: u16,
    interval: Duration,
    beacon_key: [u8; KEY_SIZE],
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let socket = emit_socket(local_ip)?;
    let target = SocketAddr::from((group, port));
    info!(%target, ip = %local_ip, "beacon emitter started");

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                let beacon = Beacon {
                    kind: "beacon".into(),
                    node_id: source.node_id.clone(),
                    api_port: source.api_port,
                    hostname: source.hostname.clone(),
                    ts: lw_core::unix_now(),
                    pubkey: source.pubkey_b64.clone(),
                };
                let pkt = match seal_beacon(&beacon, &beacon_key) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("beacon seal failed, skipping tick: {e}");
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&pkt, target).await {
                    warn!("beacon send failed: {e}");
                    continue;
                }
                debug!(node = %&source.node_id[..8], "beacon sent");
            }
        }
    }
}

/// Long-lived task: receive beacons and upsert the peer directory until
/// cancelled. The advertised api-port combined with the observed source IP
/// forms the peer address.
pub async fn run_listener(
    dir: Arc<PeerDirectory>,
    events: EventBus,
    local_ip: Ipv4Addr,
    group: Ipv4Addr,
    port: u16,
    beacon_key: [u8; KEY_SIZE],
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let socket = join_multicast(local_ip, group, port)?;
    info!(%group, port, ip = %local_ip, "beacon listener joined group");

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let recv = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            r = tokio::time::timeout(READ_DEADLINE, socket.recv_from(&mut buf)) => r,
        };
        let (len, src) = match recv {
            Err(_) => continue, // deadline: loop to re-check cancellation
            Ok(Err(e)) => {
                warn!("beacon recv error: {e}");
                continue;
            }
            Ok(Ok(pair)) => pair,
        };

        // foreign traffic on the group is the common case; stay quiet
        let beacon = match open_beacon(&buf[..len], &beacon_key) {
            Ok(b) => b,
            Err(_) => continue,
        };

        let addr = format!("{}:{}", src.ip(), beacon.api_port);
        let record = PeerRecord {
            node_id: beacon.node_id.clone(),
            addr: addr.clone(),
            api_port: beacon.api_port,
            hostname: beacon.hostname,
            last_seen: lw_core::unix_now(),
            pubkey_b64: valid_pubkey(beacon.pubkey),
        };
        dir.upsert(record);
        events.publish(NodeEvent::PeerSeen {
            node_id: beacon.node_id.clone(),
            addr: addr.clone(),
        });
        debug!(node = %&beacon.node_id[..8.min(beacon.node_id.len())], %addr, "peer seen");
    }
}

/// Keep an advertised pubkey only when it decodes to exactly 32 bytes.
fn valid_pubkey(b64_str: String) -> String {
    use base64::Engine as _;
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(&b64_str) {
        Ok(raw) if raw.len() == 32 => b64_str,
        _ => String::new(),
    }
}

/// Build the emitting socket bound to the picked interface, with outgoing
/// multicast pinned to it.
fn emit_socket(local_ip: Ipv4Addr) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&SocketAddrV4::new(local_ip, 0).into())?;
    socket.set_multicast_if_v4(&local_ip)?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Build the multicast receive socket: reuse-addr, 1 MiB buffer, group
/// membership on the picked interface, nonblocking for tokio.
fn join_multicast(local_ip: Ipv4Addr, group: Ipv4Addr, port: u16) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_recv_buffer_size(RECV_BUFFER)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.join_multicast_v4(&group, &local_ip)?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}
