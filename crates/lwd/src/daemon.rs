//! Daemon lifecycle: vault, identity, interface, engines, servers.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lw_chain::ChainLog;
use lw_core::{EventBus, NodeConfig, StoragePaths};
use lw_crypto::{MixKeypair, NodeIdentity, SealedVault};
use lw_discovery::BeaconSource;
use lw_peers::PeerDirectory;
use lw_replicate::{BlobCache, CommandCenter, EscrowClient, ReplicationEngine};

use crate::dht::ProviderTable;
use crate::state::{AppState, SharedState};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(5);
const PEER_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run(cfg: NodeConfig, passphrase: SecretString, new_net: bool) -> Result<()> {
    let base = cfg
        .daemon
        .base_dir
        .clone()
        .unwrap_or_else(StoragePaths::default_base);
    let paths = StoragePaths::init(&base)?;
    info!(base = %base.display(), "storage initialized");

    // vault: open the existing one, or provision on explicit request
    let vault = SealedVault::at(&paths.env_enc);
    let secrets = if vault.exists() {
        if new_net {
            info!("provisioning fresh vault (previous file backed up)");
            vault.provision(&passphrase, true)?
        } else {
            vault.open(&passphrase)?
        }
    } else if new_net {
        let s = vault.provision(&passphrase, false)?;
        info!(path = %paths.env_enc.display(), "vault created");
        s
    } else {
        anyhow::bail!(
            "environment not set: run with --new-net to create {}",
            paths.env_enc.display()
        );
    };

    let identity = NodeIdentity::derive();
    let mix_keys = MixKeypair::generate();
    info!(node = %identity.short_id(), host = %identity.hostname, "node identity");
    info!(pubkey = %mix_keys.public_b64(), "mix keypair ready");

    let pick = lw_discovery::pick_interface(
        cfg.discovery.mc_iface.as_deref(),
        cfg.discovery.mc_subnet.as_deref(),
    )?;
    info!(iface = %pick.name, ip = %pick.ip, rule = ?pick.by, "interface selected");

    let events = EventBus::new();
    let peers = Arc::new(PeerDirectory::new());
    let chain = Arc::new(ChainLog::open(&paths.chain_log())?);
    let cache = Arc::new(BlobCache::new());
    info!(tip = %chain.tip(), blocks = chain.len(), "chain log opened");

    // restore and auto-persist peers under the vault File Key
    let restored = lw_peers::load_snapshot(&peers, &paths.peers_enc, &secrets.file_key);
    if restored > 0 {
        info!(count = restored, "peers restored from snapshot");
    }

    let escrow = match &cfg.escrow.url {
        Some(url) if !url.is_empty() => {
            info!(%url, "escrow client configured");
            Some(EscrowClient::new(url, cfg.escrow.token.as_deref())?)
        }
        _ => None,
    };

    let engine = ReplicationEngine::new(
        identity.node_id.clone(),
        paths.clone(),
        Arc::clone(&chain),
        Arc::clone(&peers),
        Arc::clone(&cache),
        escrow,
        events.clone(),
    )?;
    let commands = Arc::new(CommandCenter::new(
        identity.node_id.clone(),
        Arc::clone(&peers),
        events.clone(),
    )?);

    let state: SharedState = Arc::new(AppState {
        identity: identity.clone(),
        mix_keys,
        peers: Arc::clone(&peers),
        chain,
        cache,
        engine,
        commands,
        dht: ProviderTable::new(),
        events: events.clone(),
        paths: paths.clone(),
        file_key: secrets.file_key,
        http: reqwest::Client::builder().timeout(PEER_HTTP_TIMEOUT).build()?,
        cfg: cfg.clone(),
    });

    let cancel = CancellationToken::new();

    // long-lived tasks: beacon emitter + listener, snapshot autosave
    let source = BeaconSource {
        node_id: identity.node_id.clone(),
        hostname: identity.hostname.clone(),
        api_port: cfg.net.api_port,
        pubkey_b64: state.mix_keys.public_b64(),
    };
    let group: Ipv4Addr = cfg
        .discovery
        .mc_group
        .parse()
        .with_context(|| format!("invalid multicast group {}", cfg.discovery.mc_group))?;
    let interval = Duration::from_secs(cfg.discovery.beacon_interval_secs.max(1));

    tokio::spawn({
        let cancel = cancel.clone();
        let beacon_key = secrets.beacon_key;
        let (group, port) = (group, cfg.discovery.mc_port);
        let local_ip = pick.ip;
        async move {
            if let Err(e) =
                lw_discovery::run_emitter(source, local_ip, group, port, interval, beacon_key, cancel)
                    .await
            {
                error!("beacon emitter failed: {e}");
            }
        }
    });
    tokio::spawn({
        let cancel = cancel.clone();
        let beacon_key = secrets.beacon_key;
        let peers = Arc::clone(&peers);
        let events = events.clone();
        let (group, port) = (group, cfg.discovery.mc_port);
        let local_ip = pick.ip;
        async move {
            if let Err(e) =
                lw_discovery::run_listener(peers, events, local_ip, group, port, beacon_key, cancel)
                    .await
            {
                error!("beacon listener failed: {e}");
            }
        }
    });
    tokio::spawn(lw_peers::autosave_loop(
        Arc::clone(&peers),
        paths.peers_enc.clone(),
        secrets.file_key,
        cancel.clone(),
    ));

    // HTTP surfaces: peer-facing on the NIC IP, control on loopback
    let bind_ip: IpAddr = match &cfg.net.bind_ip {
        Some(ip) => ip
            .parse()
            .with_context(|| format!("invalid bind IP {ip}"))?,
        None => IpAddr::V4(pick.ip),
    };
    let public_addr = SocketAddr::new(bind_ip, cfg.net.api_port);
    let control_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), cfg.net.control_port);

    let public = serve(
        public_addr,
        crate::public::router(Arc::clone(&state)),
        cancel.clone(),
        "public",
    );
    let control = serve(
        control_addr,
        crate::control::router(Arc::clone(&state)),
        cancel.clone(),
        "control",
    );

    // mirror events into the log until shutdown
    tokio::spawn(log_events(events.subscribe(), cancel.clone()));

    let public_handle = tokio::spawn(public);
    let control_handle = tokio::spawn(control);

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    cancel.cancel();

    public_handle.await??;
    control_handle.await??;
    info!("daemon stopped");
    Ok(())
}

/// Serve until cancelled, then drain in-flight connections for at most
/// five seconds.
///
/// Connections are served through hyper's http1 builder directly (instead
/// of `axum::serve`) so the 5-second header-read timeout applies to every
/// accepted socket.
async fn serve(
    addr: SocketAddr,
    app: axum::Router,
    cancel: CancellationToken,
    name: &'static str,
) -> Result<()> {
    use tower::{Service, ServiceExt};

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("{name} bind {addr}"))?;
    info!(%addr, "{name} http listening");

    let mut make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let connections = tokio_util::task::TaskTracker::new();

    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("{name} accept failed: {e}");
                    continue;
                }
            },
        };

        let tower_service = unwrap_infallible(make_service.call(remote_addr).await);
        let cancel = cancel.clone();
        connections.spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let hyper_service =
                hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                    tower_service.clone().oneshot(request.map(axum::body::Body::new))
                });

            let conn = hyper::server::conn::http1::Builder::new()
                .timer(hyper_util::rt::TokioTimer::new())
                .header_read_timeout(READ_HEADER_TIMEOUT)
                .serve_connection(io, hyper_service);
            tokio::pin!(conn);

            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        debug!(%remote_addr, "connection error: {e}");
                    }
                }
                _ = cancel.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.as_mut().await;
                }
            }
        });
    }

    connections.close();
    if tokio::time::timeout(DRAIN_TIMEOUT, connections.wait())
        .await
        .is_err()
    {
        warn!("{name} http drain deadline reached");
    }
    info!("{name} http stopped");
    Ok(())
}

fn unwrap_infallible<T>(result: std::result::Result<T, std::convert::Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => match err {},
    }
}

async fn log_events(
    mut rx: tokio::sync::broadcast::Receiver<lw_core::NodeEvent>,
    cancel: CancellationToken,
) {
    use lw_core::NodeEvent;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => match event {
                Ok(NodeEvent::PeerSeen { node_id, addr }) => {
                    info!(node = %&node_id[..8.min(node_id.len())], %addr, "peer seen");
                }
                Ok(NodeEvent::BlobAccepted { hash_hex, name, origin_id }) => {
                    info!(hash = %hash_hex, %name, origin = %&origin_id[..8.min(origin_id.len())], "blob accepted");
                }
                Ok(NodeEvent::BlobOriginated { hash_hex, name, fanout }) => {
                    info!(hash = %hash_hex, %name, fanout, "blob originated");
                }
                Ok(NodeEvent::CommandReceived(cmd)) => {
                    info!(kind = %cmd.kind, folder = %cmd.folder_path, "command received");
                }
                Ok(NodeEvent::MixDelivered { msgid, kind }) => {
                    info!(%msgid, %kind, "mix envelope delivered");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
