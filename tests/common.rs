//! Test utilities & fixtures.
//! Spins up a complete BBS node on a throwaway data directory and captures
//! everything it would have sent over the radio.
#![allow(dead_code)]

use meshsync_bbs::bbs::BbsServer;
use meshsync_bbs::config::Config;
use meshsync_bbs::mesh::{Destination, InboundEvent, NodeEvent, OutgoingMessage, Outbox, TextEvent};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

pub struct TestNode {
    pub id: String,
    pub server: BbsServer,
    pub outgoing: UnboundedReceiver<OutgoingMessage>,
    held: Vec<OutgoingMessage>,
    _dir: TempDir,
}

impl TestNode {
    /// A BBS reachable as `id`, replicating to `peers`.
    pub fn new(id: &str, peers: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_string_lossy().into_owned();
        config.sync.peers = peers.iter().map(|p| p.to_string()).collect();
        let (outbox, outgoing) = Outbox::new(0, 200);
        let server = BbsServer::new(config, outbox).expect("server");
        Self {
            id: id.to_string(),
            server,
            outgoing,
            held: Vec::new(),
            _dir: dir,
        }
    }

    /// Announce a user so short-name lookups resolve.
    pub fn learn(&self, node_id: &str, short_name: &str) {
        self.server.handle_event(InboundEvent::Node(NodeEvent {
            node_id: node_id.to_string(),
            short_name: short_name.to_string(),
            long_name: String::new(),
        }));
    }

    /// Deliver a direct message from `from`.
    pub fn dm(&self, from: &str, text: &str) {
        self.server.handle_text(&TextEvent::direct(from, text));
    }

    /// Deliver a DM and return the reply addressed back to the sender, if any.
    /// Other traffic stays queued for later `drain`/`sync_to` calls.
    pub fn ask(&mut self, from: &str, text: &str) -> Option<String> {
        self.dm(from, text);
        self.take_for(from).into_iter().last()
    }

    /// Everything queued since the last drain.
    pub fn drain(&mut self) -> Vec<OutgoingMessage> {
        let mut out = std::mem::take(&mut self.held);
        while let Ok(msg) = self.outgoing.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Texts queued for `dest`; everything else stays queued.
    pub fn take_for(&mut self, dest: &str) -> Vec<String> {
        let wanted = Destination::node(dest);
        let mut taken = Vec::new();
        for msg in self.drain() {
            if msg.to == wanted {
                taken.push(msg.text());
            } else {
                self.held.push(msg);
            }
        }
        taken
    }

    /// Sync records queued for `peer`.
    pub fn sync_to(&mut self, peer: &str) -> Vec<String> {
        self.take_for(peer)
    }

    /// Broadcast texts queued so far.
    pub fn broadcasts(&mut self) -> Vec<String> {
        let mut taken = Vec::new();
        for msg in self.drain() {
            if msg.to == Destination::Broadcast {
                taken.push(msg.text());
            } else {
                self.held.push(msg);
            }
        }
        taken
    }
}
