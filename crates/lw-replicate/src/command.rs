//! Command broadcast over the replication fabric.
//!
//! Encrypt/decrypt commands ride the same peer HTTP surface with the same
//! loop-suppression discipline as blobs. Receipt publishes an event on the
//! bus and parks the command for `/command/pending` polling; execution is
//! the shell's business, never the core's.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use lw_core::types::{PeerRecord, SyncCommand};
use lw_core::{EventBus, LwError, LwResult, NodeEvent};
use lw_peers::PeerDirectory;

use crate::seen::SeenSet;

const BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of receiving a peer command.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandReceipt {
    Received,
    Seen,
}

pub struct CommandCenter {
    self_id: String,
    peers: Arc<PeerDirectory>,
    seen: SeenSet,
    pending: Mutex<Option<SyncCommand>>,
    events: EventBus,
    client: reqwest::Client,
}

impl CommandCenter {
    pub fn new(self_id: String, peers: Arc<PeerDirectory>, events: EventBus) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(BROADCAST_TIMEOUT)
            .build()?;
        Ok(Self {
            self_id,
            peers,
            seen: SeenSet::new(),
            pending: Mutex::new(None),
            events,
            client,
        })
    }

    /// Stamp and broadcast a locally initiated command. Returns the stamped
    /// command and how many peers acknowledged the dispatch.
    pub async fn broadcast(&self, mut cmd: SyncCommand) -> LwResult<(SyncCommand, usize)> {
        if cmd.kind != "encrypt" && cmd.kind != "decrypt" {
            return Err(LwError::Protocol(format!("unknown command type: {}", cmd.kind)));
        }
        cmd.origin_node = self.self_id.clone();
        cmd.timestamp = lw_core::unix_now();
        if cmd.msgid.is_empty() {
            cmd.msgid = crate::new_msgid();
        }
        self.seen.insert(&cmd.msgid);

        let sent = self.send_to_peers(&cmd).await;
        info!(kind = %cmd.kind, sent, "command broadcast");
        Ok((cmd, sent))
    }

    /// Handle a command arriving from a peer: suppress duplicates, publish,
    /// park for polling, and forward to further peers in the background.
    pub fn receive(self: &Arc<Self>, cmd: SyncCommand) -> CommandReceipt {
        if !self.seen.insert(&cmd.msgid) {
            return CommandReceipt::Seen;
        }
        debug!(kind = %cmd.kind, origin = %cmd.origin_node, folder = %cmd.folder_path, "command received");

        self.events.publish(NodeEvent::CommandReceived(cmd.clone()));
        *self.pending.lock().expect("pending poisoned") = Some(cmd.clone());

        let center = Arc::clone(self);
        tokio::spawn(async move {
            let sent = center.send_to_peers(&cmd).await;
            debug!(msgid = %cmd.msgid, sent, "command forwarded");
        });
        CommandReceipt::Received
    }

    /// Take the parked command, if any (subprocess-polling mode).
    pub fn take_pending(&self) -> Option<SyncCommand> {
        self.pending.lock().expect("pending poisoned").take()
    }

    async fn send_to_peers(&self, cmd: &SyncCommand) -> usize {
        let targets: Vec<PeerRecord> = self
            .peers
            .list()
            .into_iter()
            .filter(|p| p.node_id != self.self_id && !p.addr.is_empty())
            .collect();

        let body = match serde_json::to_vec(cmd) {
            Ok(b) => b,
            Err(e) => {
                warn!("command serialize failed: {e}");
                return 0;
            }
        };

        let mut handles = Vec::with_capacity(targets.len());
        for peer in targets {
            let client = self.client.clone();
            let body = body.clone();
            handles.push(tokio::spawn(async move {
                let url = format!("http://{}/p2p/command", peer.addr);
                match client
                    .post(&url)
                    .header("content-type", "application/json")
                    .body(body)
                    .send()
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(addr = %peer.addr, "command dispatch failed: {e}");
                        false
                    }
                }
            }));
        }

        let mut sent = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                sent += 1;
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center() -> Arc<CommandCenter> {
        Arc::new(
            CommandCenter::new("self-node".into(), Arc::new(PeerDirectory::new()), EventBus::new())
                .unwrap(),
        )
    }

    fn cmd(kind: &str, msgid: &str) -> SyncCommand {
        SyncCommand {
            kind: kind.into(),
            folder_path: "/data/docs".into(),
            recursive: true,
            origin_node: String::new(),
            msgid: msgid.into(),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn broadcast_stamps_origin_and_msgid() {
        let center = center();
        let (stamped, sent) = center.broadcast(cmd("encrypt", "")).await.unwrap();
        assert_eq!(stamped.origin_node, "self-node");
        assert!(!stamped.msgid.is_empty());
        assert!(stamped.timestamp > 0);
        assert_eq!(sent, 0);
        // broadcast marks its own msgid seen: a reflected copy is suppressed
        assert_eq!(center.receive(stamped), CommandReceipt::Seen);
    }

    #[tokio::test]
    async fn broadcast_rejects_unknown_type() {
        let center = center();
        assert!(matches!(
            center.broadcast(cmd("format-disk", "")).await,
            Err(LwError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn receive_suppresses_duplicates_and_parks_pending() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let center = Arc::new(
            CommandCenter::new("self-node".into(), Arc::new(PeerDirectory::new()), events).unwrap(),
        );

        assert_eq!(center.receive(cmd("decrypt", "m-1")), CommandReceipt::Received);
        assert_eq!(center.receive(cmd("decrypt", "m-1")), CommandReceipt::Seen);

        let pending = center.take_pending().unwrap();
        assert_eq!(pending.msgid, "m-1");
        assert!(center.take_pending().is_none());

        match rx.recv().await.unwrap() {
            NodeEvent::CommandReceived(c) => assert_eq!(c.msgid, "m-1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
