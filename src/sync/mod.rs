//! # Peer Replication
//!
//! Every locally originated mutation is encoded as a [`SyncEvent`] and sent as
//! an ordinary direct text message to each configured peer BBS node. Inbound
//! sync text is decoded here and applied to the [`Store`] with
//! [`Origin::Replicated`], which the store never fans out again.
//!
//! Sends to peers are independent: a closed queue for one peer is logged and the
//! loop moves on to the next. Records that do not fit one packet are not sent
//! and count as dropped.

pub mod codec;

use log::{debug, info, warn};

use crate::bbs::server::sec_log;
use crate::config::SyncConfig;
use crate::errors::{BbsError, BbsResult};
use crate::logutil::escape_log;
use crate::mesh::{Destination, Outbox};
use crate::metrics;
use crate::storage::{Created, NewBulletin, NewMail, Origin, Store};

pub use codec::{is_sync_text, SyncDecodeError, SyncEvent};

/// Outbound side of replication.
#[derive(Debug, Clone)]
pub struct Replicator {
    peers: Vec<String>,
    outbox: Outbox,
}

impl Replicator {
    pub fn new(peers: Vec<String>, outbox: Outbox) -> Self {
        Self { peers, outbox }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn is_enabled(&self) -> bool {
        !self.peers.is_empty()
    }

    /// Queue `event` for every peer. Returns how many peers it was queued for.
    pub fn fan_out(&self, event: &SyncEvent) -> usize {
        if self.peers.is_empty() {
            return 0;
        }
        let wire = event.encode();
        if wire.len() > self.outbox.max_payload() {
            // peers only decode single-packet records
            for _ in &self.peers {
                metrics::inc_sync_dropped();
            }
            warn!(
                "sync {} is {} bytes (> {}); not sent to {} peer(s)",
                event.tag(),
                wire.len(),
                self.outbox.max_payload(),
                self.peers.len()
            );
            return 0;
        }
        let mut queued = 0;
        for peer in &self.peers {
            match self.outbox.send(&wire, &Destination::node(peer)) {
                Ok(_) => {
                    metrics::inc_sync_sent();
                    queued += 1;
                    debug!("sync {} queued for {}", event.tag(), peer);
                }
                Err(e) => warn!("sync {} to {} failed: {}", event.tag(), peer, e),
            }
        }
        queued
    }
}

/// What applying one inbound event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Duplicate,
    Deleted,
    AlreadyAbsent,
}

/// A create for an id tombstoned here reports as already absent.
fn applied_create<T>(created: &Created<T>) -> Applied {
    match created {
        Created::New(_) => Applied::Created,
        Created::Existing(_) => Applied::Duplicate,
        Created::Deleted => Applied::AlreadyAbsent,
    }
}

/// Apply a decoded event to the store as a replicated mutation.
pub fn apply(store: &Store, event: SyncEvent) -> BbsResult<Applied> {
    let applied = match event {
        SyncEvent::Bulletin(b) => {
            let created = store.create_bulletin(
                NewBulletin {
                    board: b.board,
                    sender_id: None,
                    sender_short_name: b.sender_short_name,
                    subject: b.subject,
                    content: b.content,
                    unique_id: Some(b.unique_id),
                },
                Origin::Replicated,
            )?;
            applied_create(&created)
        }
        SyncEvent::Mail(m) => {
            let created = store.create_mail(
                NewMail {
                    sender_id: m.sender_id,
                    sender_short_name: m.sender_short_name,
                    recipient_id: m.recipient_id,
                    subject: m.subject,
                    content: m.content,
                    unique_id: Some(m.unique_id),
                },
                Origin::Replicated,
            )?;
            applied_create(&created)
        }
        SyncEvent::DeleteBulletin { unique_id } => {
            if store.delete_bulletin_by_uid(&unique_id, Origin::Replicated)? {
                Applied::Deleted
            } else {
                Applied::AlreadyAbsent
            }
        }
        SyncEvent::DeleteMail { unique_id } => {
            if store.delete_mail_replicated(&unique_id)? {
                Applied::Deleted
            } else {
                Applied::AlreadyAbsent
            }
        }
        SyncEvent::Channel(c) => {
            applied_create(&store.create_channel(&c.name, &c.url, Origin::Replicated)?)
        }
    };
    Ok(applied)
}

/// Decode and apply sync text from `sender`. Never replies and never fails the
/// caller; rejected or malformed records are logged and counted as dropped.
pub fn handle_inbound(store: &Store, cfg: &SyncConfig, sender: &str, text: &str) -> Option<Applied> {
    if !cfg.accept_from_non_peers && !cfg.is_peer(sender) {
        metrics::inc_sync_dropped();
        sec_log!(
            "sync text from non-peer {} dropped: {}",
            sender,
            escape_log(text)
        );
        return None;
    }
    let event = match SyncEvent::decode(text) {
        Ok(ev) => ev,
        Err(e) => {
            metrics::inc_sync_dropped();
            warn!("sync from {}: {} ({})", sender, BbsError::from(e), escape_log(text));
            return None;
        }
    };
    let tag = event.tag();
    match apply(store, event) {
        Ok(applied) => {
            match applied {
                Applied::Duplicate | Applied::AlreadyAbsent => metrics::inc_sync_duplicate(),
                Applied::Created | Applied::Deleted => metrics::inc_sync_applied(),
            }
            info!("sync {} from {}: {:?}", tag, sender, applied);
            Some(applied)
        }
        Err(e) => {
            metrics::inc_sync_dropped();
            warn!("sync {} from {} not applied: {}", tag, sender, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn peers_cfg(peers: &[&str]) -> SyncConfig {
        SyncConfig {
            peers: peers.iter().map(|p| p.to_string()).collect(),
            accept_from_non_peers: false,
        }
    }

    #[test]
    fn fan_out_queues_one_message_per_peer() {
        let (outbox, mut rx) = Outbox::new(0, 200);
        let rep = Replicator::new(vec!["!p1".into(), "!p2".into()], outbox);
        let n = rep.fan_out(&SyncEvent::DeleteMail {
            unique_id: "u1".into(),
        });
        assert_eq!(n, 2);
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.to, Destination::node("!p1"));
        assert_eq!(second.to, Destination::node("!p2"));
        assert_eq!(first.text(), "DELETE_MAIL|u1");
    }

    #[test]
    fn oversized_record_is_counted_as_dropped() {
        let (outbox, mut rx) = Outbox::new(0, 60);
        let rep = Replicator::new(vec!["!p1".into(), "!p2".into()], outbox);
        let before = metrics::snapshot();
        let n = rep.fan_out(&SyncEvent::Mail(codec::MailRecord {
            sender_id: "!a1".into(),
            sender_short_name: "AL".into(),
            recipient_id: "!b2".into(),
            subject: "Hello".into(),
            content: "x".repeat(120),
            unique_id: "m-big".into(),
        }));
        let after = metrics::snapshot();
        assert_eq!(n, 0);
        assert!(rx.try_recv().is_err());
        assert!(after.sync_dropped >= before.sync_dropped + 2);
    }

    #[test]
    fn replayed_create_after_delete_is_already_absent() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let cfg = peers_cfg(&["!p1"]);
        let create = "BULLETIN|General|AL|Hi|Body|u-88";
        assert_eq!(handle_inbound(&store, &cfg, "!p1", create), Some(Applied::Created));
        assert_eq!(
            handle_inbound(&store, &cfg, "!p1", "DELETE_BULLETIN|u-88"),
            Some(Applied::Deleted)
        );
        assert_eq!(handle_inbound(&store, &cfg, "!p1", create), Some(Applied::AlreadyAbsent));
        assert!(store.list_bulletins("General").unwrap().is_empty());
    }

    #[test]
    fn empty_peer_list_sends_nothing() {
        let (outbox, mut rx) = Outbox::new(0, 200);
        let rep = Replicator::new(Vec::new(), outbox);
        assert!(!rep.is_enabled());
        assert_eq!(
            rep.fan_out(&SyncEvent::DeleteBulletin {
                unique_id: "u".into()
            }),
            0
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn non_peer_sync_is_dropped() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let cfg = peers_cfg(&["!p1"]);
        let applied = handle_inbound(&store, &cfg, "!stranger", "CHANNEL|Evil|https://x");
        assert_eq!(applied, None);
        assert!(store.list_channels().unwrap().is_empty());
    }

    #[test]
    fn malformed_sync_is_dropped_without_partial_apply() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let cfg = peers_cfg(&["!p1"]);
        assert_eq!(handle_inbound(&store, &cfg, "!p1", "MAIL|!a|AL|!b|Hi"), None);
        assert!(store.list_mail("!b").unwrap().is_empty());
    }

    #[test]
    fn peer_sync_applies_once() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let cfg = peers_cfg(&["!p1"]);
        let wire = "BULLETIN|General|AL|Hi|Body|u-77";
        assert_eq!(handle_inbound(&store, &cfg, "!p1", wire), Some(Applied::Created));
        assert_eq!(handle_inbound(&store, &cfg, "!p1", wire), Some(Applied::Duplicate));
        assert_eq!(store.list_bulletins("General").unwrap().len(), 1);
    }
}
