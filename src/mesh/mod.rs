//! # Mesh Transport Boundary
//!
//! The radio itself (serial/TCP/BLE Meshtastic link, packet decoding) lives
//! outside this crate. This module defines what crosses the boundary:
//!
//! - [`TextEvent`] / [`NodeEvent`] - already-decoded inbound traffic
//! - [`Outbox`] - where the BBS drops replies, broadcasts and sync records
//! - [`MeshWriter`] - drains the outbox into a [`TextLink`] with pacing
//!
//! ```text
//!  gateway ──InboundEvent──▶ BbsServer ──Outbox──▶ MeshWriter ──TextLink──▶ gateway
//! ```
//!
//! ## Chunking
//!
//! Meshtastic text payloads are small. [`Outbox::send`] splits text into
//! UTF-8-safe chunks of at most `max_payload` bytes, preferring newline
//! boundaries, and queues them as one [`OutgoingMessage`] so the chunks of a
//! single reply are never interleaved with another reply's chunks.
//!
//! ## Pacing
//!
//! [`MeshWriter`] sleeps `pacing` after every chunk it hands to the link. This
//! is the only intentional wait on the send path and it is local to the writer
//! task.

pub mod bridge;
pub mod nodes;

use std::fmt;

use log::{debug, trace, warn};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::errors::{BbsError, BbsResult};
use crate::logutil::escape_log;
use crate::metrics;

/// Meshtastic's broadcast address as it appears in text-level APIs.
pub const BROADCAST_ADDR: &str = "^all";

/// Largest payload handed to the link in one send.
pub const MAX_PAYLOAD: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Broadcast,
    Node(String),
}

impl Destination {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s == BROADCAST_ADDR || s.eq_ignore_ascii_case("broadcast") {
            Destination::Broadcast
        } else {
            Destination::Node(s.to_string())
        }
    }

    pub fn node(id: &str) -> Self {
        Destination::Node(id.to_string())
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Destination::Broadcast => BROADCAST_ADDR,
            Destination::Node(id) => id,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Decoded text packet from the mesh.
#[derive(Debug, Clone)]
pub struct TextEvent {
    pub source: String,
    pub dest: Destination,
    pub channel: u32,
    pub content: String,
}

impl TextEvent {
    pub fn direct(source: &str, content: &str) -> Self {
        Self {
            source: source.to_string(),
            dest: Destination::Node("bbs".into()),
            channel: 0,
            content: content.to_string(),
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.dest, Destination::Node(_))
    }
}

/// Node identity announcement (NODEINFO) used to fill the directory.
#[derive(Debug, Clone)]
pub struct NodeEvent {
    pub node_id: String,
    pub short_name: String,
    pub long_name: String,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Text(TextEvent),
    Node(NodeEvent),
}

/// One logical outbound message, already split into link-sized chunks.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: Destination,
    pub channel: u32,
    pub chunks: Vec<String>,
}

impl OutgoingMessage {
    /// Chunks re-joined; handy for assertions on replies.
    pub fn text(&self) -> String {
        self.chunks.concat()
    }
}

/// Sends a single chunk over the radio link.
pub trait TextLink: Send {
    fn send_text(&mut self, to: &Destination, channel: u32, text: &str) -> BbsResult<()>;
}

/// Split `text` into pieces of at most `max_bytes` bytes without cutting a
/// code point, preferring to break just after a newline.
pub fn chunk_utf8(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(4);
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= max_bytes {
            chunks.push(remaining.to_string());
            break;
        }
        let mut end = max_bytes;
        while end > 0 && !remaining.is_char_boundary(end) {
            end -= 1;
        }
        let slice = &remaining[..end];
        // only honour a newline break if it keeps the chunk at least half full
        let cut = match slice.rfind('\n') {
            Some(pos) if pos + 1 >= end / 2 => pos + 1,
            _ => end,
        };
        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }
    chunks
}

/// Cloneable handle for queueing outbound text.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
    channel: u32,
    max_payload: usize,
}

impl Outbox {
    pub fn new(channel: u32, max_payload: usize) -> (Self, mpsc::UnboundedReceiver<OutgoingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Self {
            tx,
            channel,
            max_payload: max_payload.clamp(1, MAX_PAYLOAD),
        };
        (outbox, rx)
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Queue `text` for `to`. Returns the number of chunks queued.
    pub fn send(&self, text: &str, to: &Destination) -> BbsResult<usize> {
        if text.is_empty() {
            return Ok(0);
        }
        let chunks = chunk_utf8(text, self.max_payload);
        let count = chunks.len();
        trace!("queue {} chunk(s) to {}: {}", count, to, escape_log(text));
        self.tx
            .send(OutgoingMessage {
                to: to.clone(),
                channel: self.channel,
                chunks,
            })
            .map_err(|_| {
                metrics::inc_send_failed();
                BbsError::Transport(format!("outbox closed, dropped message to {}", to))
            })?;
        Ok(count)
    }

    pub fn broadcast(&self, text: &str) -> BbsResult<usize> {
        self.send(text, &Destination::Broadcast)
    }
}

/// Drains the outbox into a [`TextLink`].
pub struct MeshWriter<L: TextLink> {
    rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    link: L,
    pacing: Duration,
}

impl<L: TextLink> MeshWriter<L> {
    pub fn new(rx: mpsc::UnboundedReceiver<OutgoingMessage>, link: L, pacing: Duration) -> Self {
        Self { rx, link, pacing }
    }

    /// Runs until every [`Outbox`] clone is dropped.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            let parts = msg.chunks.len();
            for (i, chunk) in msg.chunks.iter().enumerate() {
                match self.link.send_text(&msg.to, msg.channel, chunk) {
                    Ok(()) => {
                        metrics::inc_chunks_sent();
                        debug!("sent {}/{} to {}: {}", i + 1, parts, msg.to, escape_log(chunk));
                    }
                    Err(e) => {
                        metrics::inc_send_failed();
                        warn!("send {}/{} to {} failed: {}", i + 1, parts, msg.to, e);
                    }
                }
                if !self.pacing.is_zero() {
                    sleep(self.pacing).await;
                }
            }
        }
        debug!("mesh writer stopped: outbox closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_utf8("hello", 200), vec!["hello".to_string()]);
    }

    #[test]
    fn long_text_respects_payload_limit() {
        let text = "a".repeat(450);
        let chunks = chunk_utf8(&text, 200);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 200));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn multibyte_boundary_is_never_split() {
        let text = "é".repeat(150); // 300 bytes
        let chunks = chunk_utf8(&text, 199);
        assert!(chunks.iter().all(|c| c.len() <= 199));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn newline_boundary_preferred() {
        let first = "x".repeat(150);
        let text = format!("{}\n{}", first, "y".repeat(100));
        let chunks = chunk_utf8(&text, 200);
        assert_eq!(chunks[0], format!("{}\n", first));
        assert_eq!(chunks[1], "y".repeat(100));
    }

    #[test]
    fn destination_parsing() {
        assert_eq!(Destination::parse("^all"), Destination::Broadcast);
        assert_eq!(Destination::parse("!a1b2c3d4"), Destination::node("!a1b2c3d4"));
    }

    #[test]
    fn outbox_queues_whole_message() {
        let (outbox, mut rx) = Outbox::new(0, 200);
        let n = outbox.send(&"z".repeat(401), &Destination::node("!a")).unwrap();
        assert_eq!(n, 3);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.chunks.len(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_outbox_reports_transport_error() {
        let (outbox, rx) = Outbox::new(0, 200);
        drop(rx);
        assert!(matches!(
            outbox.send("hi", &Destination::Broadcast),
            Err(BbsError::Transport(_))
        ));
    }

    struct FlakyLink {
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl TextLink for FlakyLink {
        fn send_text(&mut self, to: &Destination, _channel: u32, text: &str) -> BbsResult<()> {
            if to.as_wire() == "!down" {
                return Err(BbsError::Transport("no route".into()));
            }
            self.sent.lock().unwrap().push(format!("{}:{}", to, text));
            Ok(())
        }
    }

    #[tokio::test]
    async fn writer_survives_link_failure() {
        let (outbox, rx) = Outbox::new(0, 200);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let writer = MeshWriter::new(rx, FlakyLink { sent: sent.clone() }, Duration::ZERO);
        outbox.send("one", &Destination::node("!down")).unwrap();
        outbox.send("two", &Destination::node("!up")).unwrap();
        drop(outbox);
        writer.run().await;
        assert_eq!(*sent.lock().unwrap(), vec!["!up:two".to_string()]);
    }
}
