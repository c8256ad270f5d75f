//! # BBS Core Module
//!
//! Interactive side of the system: per-sender sessions, the command router
//! and the server loop that connects them to the mesh transport.
//!
//! ## Components
//!
//! - [`server`] - `BbsServer`, event loop and housekeeping
//! - [`commands`] - `CommandRouter`, the per-message dispatch order
//! - [`session`] - session states and the expiring `SessionStore`
//! - [`flow`] - step tables for send mail, post bulletin and post channel
//! - [`menus`] - compact menu and listing text
//! - [`fortune`] - fortune cookies for the main menu
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  BbsServer      │ ← transport events in, replies out
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  CommandRouter  │ ← sync bypass, shortcuts, menus, flows
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  SessionStore   │ ← one state per sender, idle expiry
//! │  Store          │ ← bulletins, mail, channels (+ replication)
//! └─────────────────┘
//! ```

pub mod commands;
pub mod flow;
pub mod fortune;
pub mod menus;
pub mod server;
pub mod session;

pub use commands::CommandRouter;
pub use server::BbsServer;
pub use session::{Session, SessionState, SessionStore};
