use anyhow::Result;
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};

use crate::config::Config;
use crate::logutil::escape_log;
use crate::mesh::nodes::NodeDirectory;
use crate::mesh::{Destination, InboundEvent, NodeEvent, Outbox, TextEvent};
use crate::storage::{Store, StoreBuilder};
use crate::sync::Replicator;

use super::commands::CommandRouter;
use super::session::SessionStore;

// Security / audit logging macro (target = "security")
macro_rules! sec_log {
    ($($arg:tt)*) => { log::warn!(target: "security", $($arg)*); };
}
#[allow(unused_imports)]
pub(crate) use sec_log;

/// Seconds between housekeeping passes.
const HOUSEKEEPING_SECS: u64 = 60;

/// Nodes unheard for this long are dropped from the directory.
const NODE_MAX_AGE_DAYS: u32 = 30;

/// Deleted unique ids are remembered this long; replays older than this may resurrect.
const TOMBSTONE_MAX_AGE_DAYS: i64 = 30;

/// # BBS Server
///
/// Wires the pieces together: inbound events from the transport go through
/// the [`CommandRouter`], replies and broadcasts leave through the [`Outbox`],
/// and a periodic tick expires idle sessions and persists the node directory.
///
/// ```text
///  InboundEvent::Text ──▶ CommandRouter ──▶ reply ──▶ Outbox
///  InboundEvent::Node ──▶ NodeDirectory
///  tick               ──▶ SessionStore::prune_expired, Store::prune_tombstones,
///                         NodeDirectory::save
/// ```
///
/// The server owns no transport; feed it events with [`BbsServer::run`] or
/// [`BbsServer::handle_event`] and drain the outbox receiver elsewhere.
pub struct BbsServer {
    config: Arc<Config>,
    store: Store,
    router: CommandRouter,
    sessions: Arc<SessionStore>,
    nodes: Arc<NodeDirectory>,
    outbox: Outbox,
    nodes_dirty: AtomicBool,
}

impl BbsServer {
    /// Open the store under `config.storage.data_dir` and load the node cache.
    pub fn new(config: Config, outbox: Outbox) -> Result<Self> {
        let nodes = NodeDirectory::open(config.node_cache_path())?;
        let data_dir = std::path::Path::new(&config.storage.data_dir).join("bbs.sled");
        let store = StoreBuilder::new(data_dir)
            .replicator(Replicator::new(config.sync.peers.clone(), outbox.clone()))
            .urgent_broadcast(&config.bbs.urgent_board, outbox.clone())
            .open()?;
        Ok(Self::with_parts(config, store, nodes, outbox))
    }

    /// Assemble a server from an already opened store and directory.
    pub fn with_parts(config: Config, store: Store, nodes: NodeDirectory, outbox: Outbox) -> Self {
        let config = Arc::new(config);
        let sessions = Arc::new(SessionStore::new(config.bbs.session_timeout));
        let nodes = Arc::new(nodes);
        let router = CommandRouter::new(
            config.clone(),
            store.clone(),
            sessions.clone(),
            nodes.clone(),
            outbox.clone(),
        );
        info!(
            "{} ready: {} board(s), {} peer(s), {} known node(s)",
            config.bbs.name,
            config.bbs.boards.len(),
            config.sync.peers.len(),
            nodes.len()
        );
        Self {
            config,
            store,
            router,
            sessions,
            nodes,
            outbox,
            nodes_dirty: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn nodes(&self) -> &NodeDirectory {
        &self.nodes
    }

    pub fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::Text(text) => self.handle_text(&text),
            InboundEvent::Node(node) => self.handle_node(&node),
        }
    }

    fn handle_node(&self, node: &NodeEvent) {
        trace!("nodeinfo {} {}", node.node_id, escape_log(&node.short_name));
        self.nodes
            .update(&node.node_id, &node.short_name, &node.long_name);
        self.nodes_dirty.store(true, Ordering::Relaxed);
    }

    pub fn handle_text(&self, event: &TextEvent) {
        if !event.is_direct() {
            debug!(
                "ignoring broadcast from {} on ch {}: {}",
                event.source,
                event.channel,
                escape_log(&event.content)
            );
            return;
        }
        debug!("DM from {}: {}", event.source, escape_log(&event.content));
        let Some(reply) = self.router.handle(&event.source, &event.content) else {
            return;
        };
        if let Err(e) = self.outbox.send(&reply, &Destination::node(&event.source)) {
            warn!("reply to {} dropped: {}", event.source, e);
        }
    }

    fn housekeeping(&self) {
        let expired = self.sessions.prune_expired();
        if expired > 0 {
            debug!("expired {} idle session(s)", expired);
        }
        match self
            .store
            .prune_tombstones(chrono::Duration::days(TOMBSTONE_MAX_AGE_DAYS))
        {
            Ok(0) => {}
            Ok(n) => debug!("pruned {} tombstone(s)", n),
            Err(e) => warn!("tombstone prune failed: {}", e),
        }
        let stale = self.nodes.remove_stale(NODE_MAX_AGE_DAYS);
        if stale > 0 || self.nodes_dirty.swap(false, Ordering::Relaxed) {
            if let Err(e) = self.nodes.save() {
                warn!("node cache save failed: {}", e);
            }
        }
    }

    /// Process events until the stream ends or ctrl-c.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<InboundEvent>) -> Result<()> {
        info!("{} listening", self.config.bbs.name);
        let mut periodic = tokio::time::interval(Duration::from_secs(HOUSEKEEPING_SECS));
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Event stream closed");
                        break;
                    }
                },
                _ = periodic.tick() => self.housekeeping(),
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }
        self.shutdown()
    }

    pub fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.nodes.save() {
            warn!("node cache save failed: {}", e);
        }
        self.store.flush()?;
        info!("{} stopped", self.config.bbs.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> (BbsServer, mpsc::UnboundedReceiver<crate::mesh::OutgoingMessage>) {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_string_lossy().into_owned();
        let (outbox, rx) = Outbox::new(0, 200);
        (BbsServer::new(config, outbox).unwrap(), rx)
    }

    #[test]
    fn direct_message_gets_reply_broadcast_does_not() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = server(&dir);
        let mut bcast = TextEvent::direct("!a1", "m");
        bcast.dest = Destination::Broadcast;
        server.handle_text(&bcast);
        assert!(rx.try_recv().is_err());

        server.handle_text(&TextEvent::direct("!a1", "hello"));
        let reply = rx.try_recv().unwrap();
        assert_eq!(reply.to, Destination::node("!a1"));
        assert!(reply.text().contains("[M]ail"));
    }

    #[test]
    fn node_events_fill_directory_and_persist() {
        let dir = TempDir::new().unwrap();
        let (server, _rx) = server(&dir);
        server.handle_event(InboundEvent::Node(NodeEvent {
            node_id: "!a1".into(),
            short_name: "AL".into(),
            long_name: "Alice".into(),
        }));
        assert_eq!(server.nodes().short_name("!a1"), "AL");
        server.housekeeping();
        let reloaded = NodeDirectory::open(dir.path().join("node_cache.json")).unwrap();
        assert_eq!(reloaded.short_name("!a1"), "AL");
    }

    #[tokio::test]
    async fn run_stops_when_events_close() {
        let dir = TempDir::new().unwrap();
        let (server, mut rx) = server(&dir);
        let (tx, events) = mpsc::unbounded_channel();
        tx.send(InboundEvent::Text(TextEvent::direct("!a1", "q"))).unwrap();
        drop(tx);
        server.run(events).await.unwrap();
        assert!(rx.try_recv().unwrap().text().contains("Quick Commands"));
    }
}
