//! # Meshsync BBS - Store-and-Forward BBS for Meshtastic Networks
//!
//! A bulletin board system reached by direct messages over a Meshtastic mesh.
//! Several instances can run on different nodes and keep each other in sync
//! by exchanging compact pipe-delimited records as ordinary text messages.
//!
//! ## Features
//!
//! - **Compact Menu UI**: single-letter navigation plus `,,`-separated shortcuts such as `SM,,bob,,Hi,,See you at 6`.
//! - **Mail**: private messages with recipient-only reading and deletion, and a new-mail notice to the recipient.
//! - **Bulletins**: configurable boards; posts to the urgent board are announced on the broadcast channel.
//! - **Channel Directory**: shared list of channel names and URLs.
//! - **Peer Replication**: creates and deletes are fanned out to peer BBS nodes and applied idempotently by unique id.
//! - **Async Design**: Tokio event loop with a paced outbound writer.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshsync_bbs::bbs::BbsServer;
//! use meshsync_bbs::config::Config;
//! use meshsync_bbs::mesh::Outbox;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (outbox, _outgoing) = Outbox::new(config.mesh.channel, config.mesh.max_payload);
//!     let (_events_tx, events) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let server = BbsServer::new(config, outbox)?;
//!     server.run(events).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bbs`] - server loop, sessions, command router, menus
//! - [`mesh`] - transport boundary, chunking, pacing, node directory, JSON-lines bridge
//! - [`storage`] - sled-backed bulletins, mail and channels
//! - [`sync`] - replication wire codec and peer fan-out
//! - [`config`] - configuration loading
//! - [`validation`] - field validation for user input and replicated records
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   BBS Server    │ ← router, sessions
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Storage       │ ──▶ Replicator ──▶ peers
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Mesh Outbox   │ ← chunking + pacing
//! └─────────────────┘
//! ```

pub mod bbs;
pub mod config;
pub mod errors;
pub mod logutil;
pub mod mesh;
pub mod metrics;
pub mod storage;
pub mod sync;
pub mod validation;
