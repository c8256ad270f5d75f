//! JSON-lines bridge to an external radio gateway.
//!
//! The gateway owns the Meshtastic link and exchanges one JSON object per line
//! with this process over stdin/stdout:
//!
//! ```text
//! in:  {"type":"text","from":"!a1b2c3d4","to":"!bbs00001","channel":0,"text":"m"}
//! in:  {"type":"node","id":"!a1b2c3d4","short_name":"AL","long_name":"Alice"}
//! out: {"type":"text","to":"!a1b2c3d4","channel":0,"text":"[M]ail ..."}
//! ```
//!
//! Broadcasts use `"to":"^all"`.

use std::io::Write;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use super::{Destination, InboundEvent, NodeEvent, TextEvent, TextLink};
use crate::errors::{BbsError, BbsResult};
use crate::logutil::escape_log;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    Text {
        from: String,
        #[serde(default)]
        to: String,
        #[serde(default)]
        channel: u32,
        text: String,
    },
    Node {
        id: String,
        #[serde(default)]
        short_name: String,
        #[serde(default)]
        long_name: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Text {
        to: &'a str,
        channel: u32,
        text: &'a str,
    },
}

/// Parse one gateway line into an [`InboundEvent`].
pub fn parse_line(line: &str) -> BbsResult<InboundEvent> {
    let frame: InboundFrame = serde_json::from_str(line)?;
    Ok(match frame {
        InboundFrame::Text {
            from,
            to,
            channel,
            text,
        } => InboundEvent::Text(TextEvent {
            source: from,
            dest: Destination::parse(&to),
            channel,
            content: text,
        }),
        InboundFrame::Node {
            id,
            short_name,
            long_name,
        } => InboundEvent::Node(NodeEvent {
            node_id: id,
            short_name,
            long_name,
        }),
    })
}

/// Read gateway lines until EOF, forwarding parsed events. Bad lines are logged and skipped.
pub async fn read_events<R>(reader: R, tx: mpsc::UnboundedSender<InboundEvent>) -> BbsResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(ev) => {
                if tx.send(ev).is_err() {
                    debug!("bridge: event receiver gone, stopping reader");
                    break;
                }
            }
            Err(e) => warn!("bridge: skipping bad frame ({}): {}", e, escape_log(line)),
        }
    }
    info!("bridge: input closed");
    Ok(())
}

/// [`TextLink`] that writes outbound frames as JSON lines.
pub struct JsonLinesLink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesLink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> TextLink for JsonLinesLink<W> {
    fn send_text(&mut self, to: &Destination, channel: u32, text: &str) -> BbsResult<()> {
        let frame = OutboundFrame::Text {
            to: to.as_wire(),
            channel,
            text,
        };
        let line = serde_json::to_string(&frame)?;
        writeln!(self.out, "{}", line)
            .and_then(|_| self.out.flush())
            .map_err(|e| BbsError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_node_frames() {
        let ev = parse_line(r#"{"type":"text","from":"!a1","to":"!bbs","channel":2,"text":"cm"}"#)
            .unwrap();
        match ev {
            InboundEvent::Text(t) => {
                assert_eq!(t.source, "!a1");
                assert!(t.is_direct());
                assert_eq!(t.channel, 2);
                assert_eq!(t.content, "cm");
            }
            other => panic!("unexpected {other:?}"),
        }
        let ev = parse_line(r#"{"type":"node","id":"!a1","short_name":"AL"}"#).unwrap();
        assert!(matches!(ev, InboundEvent::Node(n) if n.short_name == "AL" && n.long_name.is_empty()));
    }

    #[test]
    fn broadcast_frame_is_not_direct() {
        let ev = parse_line(r#"{"type":"text","from":"!a1","to":"^all","text":"hi"}"#).unwrap();
        assert!(matches!(ev, InboundEvent::Text(t) if !t.is_direct()));
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"type":"position"}"#).is_err());
    }

    #[test]
    fn link_writes_one_json_line_per_chunk() {
        let mut link = JsonLinesLink::new(Vec::new());
        link.send_text(&Destination::Broadcast, 0, "hello").unwrap();
        link.send_text(&Destination::node("!a1"), 1, "x").unwrap();
        let out = String::from_utf8(link.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"text","to":"^all","channel":0,"text":"hello"}"#);
        assert!(lines[1].contains(r#""to":"!a1""#));
    }

    #[tokio::test]
    async fn reader_skips_bad_lines() {
        let input = "garbage\n{\"type\":\"text\",\"from\":\"!a1\",\"to\":\"!b\",\"text\":\"m\"}\n\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_events(tokio::io::BufReader::new(input.as_bytes()), tx)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(InboundEvent::Text(_))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        let gateway = tokio_test::io::Builder::new()
            .read(br#"{"type":"node","id":"!a1","#)
            .read(b"\"short_name\":\"AL\"}\n")
            .build();
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_events(tokio::io::BufReader::new(gateway), tx).await.unwrap();
        assert!(matches!(rx.recv().await, Some(InboundEvent::Node(n)) if n.node_id == "!a1"));
    }
}
