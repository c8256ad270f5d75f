//! Command routing for direct messages.
//!
//! [`CommandRouter::handle`] takes one inbound line and decides, in order:
//!
//! 1. Sync record (`BULLETIN|`, `MAIL|`, ...): applied through [`crate::sync`], no reply.
//! 2. Compound shortcut (`sm,,`, `cm`, `pb,,`, `cb,,`, `chp,,`, `chl`, `q`):
//!    runs regardless of the current state.
//! 3. No session, or `x`: back to the main menu.
//! 4. Single-character pick from the current state's table.
//! 5. Answer for the current multi-step flow.
//! 6. Anything else: the current menu again.
//!
//! Matching is case-insensitive on a lowercased copy of the line; the raw
//! text is what gets stored. A two-character line ending in `x` (`mx`, `xx`)
//! counts as its first character.

use std::sync::Arc;

use log::{error, info, warn};

use super::flow::{Advance, Flow, FlowKind};
use super::fortune::Fortunes;
use super::menus;
use super::server::sec_log;
use super::session::{SessionState, SessionStore};
use crate::config::Config;
use crate::errors::BbsError;
use crate::logutil::escape_log;
use crate::mesh::nodes::NodeDirectory;
use crate::mesh::{Destination, Outbox};
use crate::metrics;
use crate::storage::{Created, NewBulletin, NewMail, Origin, Store};
use crate::sync::{self, is_sync_text};
use crate::validation::{validate_body, validate_subject};

/// Universal "back to main menu" token.
pub const EXIT_TOKEN: &str = "x";

const SHORTCUT_SEP: &str = ",,";

/// Lowercase for matching; `?x` collapses to `?`.
pub fn normalize(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    let mut chars = lowered.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(first), Some('x'), None) => first.to_string(),
        _ => lowered,
    }
}

fn pick_number(cmd: &str, len: usize) -> Option<usize> {
    match cmd.parse::<usize>() {
        Ok(n) if n >= 1 && n <= len => Some(n - 1),
        _ => None,
    }
}

/// Routes direct messages for every sender through their session.
pub struct CommandRouter {
    config: Arc<Config>,
    store: Store,
    sessions: Arc<SessionStore>,
    nodes: Arc<NodeDirectory>,
    outbox: Outbox,
    fortunes: Fortunes,
}

impl CommandRouter {
    pub fn new(
        config: Arc<Config>,
        store: Store,
        sessions: Arc<SessionStore>,
        nodes: Arc<NodeDirectory>,
        outbox: Outbox,
    ) -> Self {
        let fortunes = Fortunes::from_config(&config.bbs);
        Self {
            config,
            store,
            sessions,
            nodes,
            outbox,
            fortunes,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one line from `sender`. Returns the reply, or `None` when nothing
    /// should be sent back (sync records).
    pub fn handle(&self, sender: &str, text: &str) -> Option<String> {
        let raw = text.trim();
        if is_sync_text(raw) {
            sync::handle_inbound(&self.store, &self.config.sync, sender, raw);
            return None;
        }

        let cmd = normalize(raw);
        if let Some(reply) = self.shortcut(sender, raw, &cmd) {
            return Some(reply);
        }

        let state = match self.sessions.get(sender) {
            Some(state) if cmd != EXIT_TOKEN => state,
            _ => return Some(self.to_main_menu(sender)),
        };
        Some(self.dispatch(sender, state, raw, &cmd))
    }

    fn to_main_menu(&self, sender: &str) -> String {
        self.sessions.set(sender, SessionState::Menu);
        menus::main_menu(&self.config.bbs.name)
    }

    fn short_name(&self, node_id: &str) -> String {
        self.nodes.short_name(node_id)
    }

    fn failure(&self, action: &str, err: BbsError) -> String {
        match err {
            BbsError::Validation(msg) => msg,
            BbsError::NotFound(_) => "Not found.".to_string(),
            BbsError::Unauthorized(_) => "Not allowed.".to_string(),
            other => {
                error!("{} failed: {}", action, other);
                format!("Could not {} right now, try again.", action)
            }
        }
    }

    // ---------------------------------------------------------------- shortcuts

    fn shortcut(&self, sender: &str, raw: &str, cmd: &str) -> Option<String> {
        let parts: Vec<&str> = raw.splitn(4, SHORTCUT_SEP).collect();
        let head = parts[0].trim().to_lowercase();
        let has_args = parts.len() > 1;
        let reply = match (head.as_str(), has_args) {
            ("sm", true) => self.shortcut_send_mail(sender, &parts),
            ("sm", false) if cmd == "sm" => {
                let flow = Flow::new(FlowKind::SendMail);
                let prompt = flow.prompt();
                self.sessions.set(sender, SessionState::Compose(flow));
                prompt
            }
            ("pb", true) => self.shortcut_post_bulletin(sender, &parts),
            ("pb", false) if cmd == "pb" => "Usage: PB,,board,,subject,,message".to_string(),
            ("cb", true) => {
                let board_parts: Vec<&str> = raw.splitn(2, SHORTCUT_SEP).collect();
                match self.config.find_board(board_parts.get(1).copied().unwrap_or("")) {
                    Some(board) => self.list_board(sender, board),
                    None => self.unknown_board(),
                }
            }
            ("cb", false) if cmd == "cb" => {
                self.sessions.set(sender, SessionState::BulletinMenu);
                menus::bulletin_menu(&self.config.bbs.boards)
            }
            ("chp", true) => {
                let chan: Vec<&str> = raw.splitn(3, SHORTCUT_SEP).collect();
                if chan.len() != 3 {
                    "Usage: CHP,,name,,url".to_string()
                } else {
                    self.post_channel(chan[1], chan[2])
                }
            }
            ("chp", false) if cmd == "chp" => {
                let flow = Flow::new(FlowKind::PostChannel);
                let prompt = flow.prompt();
                self.sessions.set(sender, SessionState::Compose(flow));
                prompt
            }
            ("cm", false) if cmd == "cm" => self.list_mail(sender),
            ("chl", false) if cmd == "chl" => self.list_channels(sender),
            ("q", false) if cmd == "q" => menus::quick_help().to_string(),
            _ => return None,
        };
        Some(reply)
    }

    fn shortcut_send_mail(&self, sender: &str, parts: &[&str]) -> String {
        if parts.len() != 4 {
            return "Usage: SM,,recipient,,subject,,message".to_string();
        }
        let matches = self.nodes.resolve(parts[1]);
        let recipient = match matches.len() {
            0 => return format!("No node found matching '{}'.", parts[1].trim()),
            1 => &matches[0],
            _ => {
                let ids: Vec<String> = matches
                    .iter()
                    .map(|n| format!("{} ({})", n.short_name, n.node_id))
                    .collect();
                return format!(
                    "Several nodes match '{}': {}. Use the node id.",
                    parts[1].trim(),
                    ids.join(", ")
                );
            }
        };
        let subject = match validate_subject(parts[2]) {
            Ok(s) => s,
            Err(e) => return e.to_string(),
        };
        let body = match validate_body(parts[3]) {
            Ok(b) => b,
            Err(e) => return e.to_string(),
        };
        self.send_mail(sender, &recipient.node_id, &recipient.short_name, subject, body)
    }

    fn shortcut_post_bulletin(&self, sender: &str, parts: &[&str]) -> String {
        if parts.len() != 4 {
            return "Usage: PB,,board,,subject,,message".to_string();
        }
        let Some(board) = self.config.find_board(parts[1]) else {
            return self.unknown_board();
        };
        let board = board.to_string();
        self.post_bulletin(sender, &board, parts[2], parts[3])
    }

    fn unknown_board(&self) -> String {
        format!("Unknown board. Boards: {}", self.config.bbs.boards.join(", "))
    }

    // ------------------------------------------------------------------ actions

    fn send_mail(&self, sender: &str, recipient_id: &str, recipient_short: &str, subject: String, body: String) -> String {
        let sender_short = self.short_name(sender);
        let created = self.store.create_mail(
            NewMail {
                sender_id: sender.to_string(),
                sender_short_name: sender_short.clone(),
                recipient_id: recipient_id.to_string(),
                subject,
                content: body,
                unique_id: None,
            },
            Origin::Local,
        );
        match created {
            Ok(created) => {
                let notice = menus::new_mail_notice(&sender_short);
                if let Err(e) = self.outbox.send(&notice, &Destination::node(recipient_id)) {
                    warn!("mail notice to {} not queued: {}", recipient_id, e);
                }
                if let Some(mail) = created.record() {
                    info!("{} sent mail #{} to {}", sender, mail.local_id, recipient_id);
                }
                format!("Mail sent to {}.", recipient_short)
            }
            Err(e) => self.failure("send mail", e),
        }
    }

    fn post_bulletin(&self, sender: &str, board: &str, subject: &str, body: &str) -> String {
        let created = self.store.create_bulletin(
            NewBulletin {
                board: board.to_string(),
                sender_id: Some(sender.to_string()),
                sender_short_name: self.short_name(sender),
                subject: subject.to_string(),
                content: body.to_string(),
                unique_id: None,
            },
            Origin::Local,
        );
        match created {
            Ok(_) => format!("Posted to {}.", board),
            Err(e) => self.failure("post", e),
        }
    }

    fn post_channel(&self, name: &str, url: &str) -> String {
        match self.store.create_channel(name, url, Origin::Local) {
            Ok(Created::Existing(c)) => format!("{} is already listed.", c.name),
            Ok(Created::New(c)) => format!("Channel {} added.", c.name),
            Ok(Created::Deleted) => format!("Channel {} was not added.", name),
            Err(e) => self.failure("add channel", e),
        }
    }

    fn list_mail(&self, sender: &str) -> String {
        match self.store.list_mail(sender) {
            Ok(mail) => {
                if mail.is_empty() {
                    self.sessions.set(sender, SessionState::Mail);
                    return format!("{}\n{}", menus::mail_list(&mail), menus::mail_menu());
                }
                let ids = mail.iter().map(|m| m.local_id).collect();
                self.sessions.set(sender, SessionState::CheckMail { ids });
                menus::mail_list(&mail)
            }
            Err(e) => self.failure("read mail", e),
        }
    }

    fn show_mail(&self, sender: &str, local_id: u64) -> String {
        match self.store.get_mail(local_id, sender) {
            Ok(mail) => {
                self.sessions.set(sender, SessionState::MailAction { local_id });
                menus::mail_detail(&mail)
            }
            Err(e) => self.failure("read mail", e),
        }
    }

    fn delete_mail(&self, sender: &str, local_id: u64) -> String {
        self.sessions.set(sender, SessionState::Mail);
        let mail = match self.store.get_mail(local_id, sender) {
            Ok(m) => m,
            Err(e) => return self.failure("delete mail", e),
        };
        match self.store.delete_mail(&mail.unique_id, sender) {
            Ok(()) => format!("Mail deleted.\n{}", menus::mail_menu()),
            Err(BbsError::Unauthorized(msg)) => {
                sec_log!("mail delete refused: {}", msg);
                "Not allowed.".to_string()
            }
            Err(e) => self.failure("delete mail", e),
        }
    }

    fn list_board(&self, sender: &str, board: &str) -> String {
        match self.store.list_bulletins(board) {
            Ok(list) if list.is_empty() => {
                self.sessions.set(sender, SessionState::BulletinAction { board: board.to_string() });
                format!("{}\n{}", menus::bulletin_list(board, &list), menus::bulletin_action_menu(board))
            }
            Ok(list) => {
                let ids = list.iter().map(|b| b.local_id).collect();
                self.sessions.set(
                    sender,
                    SessionState::CheckBulletin {
                        board: board.to_string(),
                        ids,
                    },
                );
                menus::bulletin_list(board, &list)
            }
            Err(e) => self.failure("read bulletins", e),
        }
    }

    fn show_bulletin(&self, sender: &str, board: &str, local_id: u64) -> String {
        match self.store.get_bulletin(local_id) {
            Ok(b) => {
                self.sessions.set(
                    sender,
                    SessionState::BulletinRead {
                        board: board.to_string(),
                        local_id,
                    },
                );
                menus::bulletin_detail(&b)
            }
            Err(e) => self.failure("read bulletin", e),
        }
    }

    /// Ownership is settled here; the store only deletes.
    fn may_delete_bulletin(&self, sender: &str, local_id: u64) -> Result<(), String> {
        let bulletin = self
            .store
            .get_bulletin(local_id)
            .map_err(|e| self.failure("delete bulletin", e))?;
        if bulletin.is_owned_by(sender, &self.short_name(sender)) {
            Ok(())
        } else {
            sec_log!(
                "bulletin delete refused: {} is not the poster of #{} ({})",
                sender,
                local_id,
                bulletin.unique_id
            );
            Err("You can only delete your own bulletins.".to_string())
        }
    }

    fn list_channels(&self, sender: &str) -> String {
        match self.store.list_channels() {
            Ok(list) => {
                self.sessions.set(sender, SessionState::CheckChannel);
                menus::channel_list(&list)
            }
            Err(e) => self.failure("list channels", e),
        }
    }

    fn stats_totals(&self, sender: &str) -> String {
        let counts = self.store.counts(&self.config.bbs.boards);
        let own = self.store.list_mail(sender).map(|m| m.len());
        match (counts, own) {
            (Ok(counts), Ok(own)) => format!("{}\n{}", menus::totals(&counts, own), menus::stats_menu()),
            (Err(e), _) | (_, Err(e)) => self.failure("read stats", e),
        }
    }

    fn stats_sync(&self) -> String {
        format!(
            "{}\n{}",
            menus::sync_stats(&metrics::snapshot(), self.config.sync.peers.len(), self.sessions.len()),
            menus::stats_menu()
        )
    }

    // ----------------------------------------------------------------- dispatch

    fn dispatch(&self, sender: &str, state: SessionState, raw: &str, cmd: &str) -> String {
        match state {
            SessionState::Menu => match cmd {
                "m" => {
                    self.sessions.set(sender, SessionState::Mail);
                    menus::mail_menu().to_string()
                }
                "b" => {
                    self.sessions.set(sender, SessionState::BulletinMenu);
                    menus::bulletin_menu(&self.config.bbs.boards)
                }
                "c" => {
                    self.sessions.set(sender, SessionState::ChannelDirectory);
                    menus::channel_menu().to_string()
                }
                "s" => {
                    self.sessions.set(sender, SessionState::Stats);
                    menus::stats_menu().to_string()
                }
                "f" => self.fortunes.pick().to_string(),
                _ => self.to_main_menu(sender),
            },
            SessionState::Mail => match cmd {
                "r" => self.list_mail(sender),
                "s" => {
                    let flow = Flow::new(FlowKind::SendMail);
                    let prompt = flow.prompt();
                    self.sessions.set(sender, SessionState::Compose(flow));
                    prompt
                }
                _ => {
                    self.sessions.set(sender, SessionState::Mail);
                    menus::mail_menu().to_string()
                }
            },
            SessionState::CheckMail { ids } => match pick_number(cmd, ids.len()) {
                Some(i) => self.show_mail(sender, ids[i]),
                None => self.list_mail(sender),
            },
            SessionState::MailAction { local_id } => match cmd {
                "k" => {
                    self.sessions.set(sender, SessionState::Mail);
                    format!("Kept.\n{}", menus::mail_menu())
                }
                "d" => {
                    self.sessions.set(sender, SessionState::MailDeleteConfirm { local_id });
                    "Delete this mail? [Y]es [N]o".to_string()
                }
                "r" => match self.store.get_mail(local_id, sender) {
                    Ok(mail) => {
                        let flow = Flow::reply_to(&mail.sender_id, &mail.sender_short_name);
                        let prompt = flow.prompt();
                        self.sessions.set(sender, SessionState::Compose(flow));
                        prompt
                    }
                    Err(e) => self.failure("reply", e),
                },
                _ => {
                    self.sessions.set(sender, SessionState::MailAction { local_id });
                    menus::mail_action_menu().to_string()
                }
            },
            SessionState::MailDeleteConfirm { local_id } => match cmd {
                "y" | "yes" => self.delete_mail(sender, local_id),
                "n" | "no" => {
                    self.sessions.set(sender, SessionState::Mail);
                    format!("Kept.\n{}", menus::mail_menu())
                }
                _ => {
                    self.sessions.set(sender, SessionState::MailDeleteConfirm { local_id });
                    "Delete this mail? [Y]es [N]o".to_string()
                }
            },
            SessionState::BulletinMenu => {
                let keys = menus::board_keys(&self.config.bbs.boards);
                let chosen = cmd
                    .chars()
                    .next()
                    .filter(|_| cmd.chars().count() == 1)
                    .and_then(|c| keys.iter().find(|(k, _)| *k == c));
                match chosen {
                    Some((_, board)) => {
                        self.sessions.set(sender, SessionState::BulletinAction { board: board.clone() });
                        menus::bulletin_action_menu(board)
                    }
                    None => {
                        self.sessions.set(sender, SessionState::BulletinMenu);
                        menus::bulletin_menu(&self.config.bbs.boards)
                    }
                }
            }
            SessionState::BulletinAction { board } => match cmd {
                "r" => self.list_board(sender, &board),
                "p" => {
                    let flow = Flow::post_bulletin(&board);
                    let prompt = flow.prompt();
                    self.sessions.set(sender, SessionState::Compose(flow));
                    prompt
                }
                _ => {
                    let menu = menus::bulletin_action_menu(&board);
                    self.sessions.set(sender, SessionState::BulletinAction { board });
                    menu
                }
            },
            SessionState::CheckBulletin { board, ids } => match pick_number(cmd, ids.len()) {
                Some(i) => self.show_bulletin(sender, &board, ids[i]),
                None => self.list_board(sender, &board),
            },
            SessionState::BulletinRead { board, local_id } => match cmd {
                "d" => match self.may_delete_bulletin(sender, local_id) {
                    Ok(()) => {
                        self.sessions
                            .set(sender, SessionState::BulletinDeleteConfirm { board, local_id });
                        "Delete this bulletin? [Y]es [N]o".to_string()
                    }
                    Err(msg) => {
                        self.sessions.set(sender, SessionState::BulletinRead { board, local_id });
                        msg
                    }
                },
                "r" => self.list_board(sender, &board),
                _ => {
                    self.sessions.set(sender, SessionState::BulletinRead { board, local_id });
                    menus::bulletin_read_menu().to_string()
                }
            },
            SessionState::BulletinDeleteConfirm { board, local_id } => match cmd {
                "y" | "yes" => {
                    let reply = match self.may_delete_bulletin(sender, local_id) {
                        Ok(()) => match self.store.delete_bulletin(local_id, Origin::Local) {
                            Ok(_) => "Bulletin deleted.".to_string(),
                            Err(e) => self.failure("delete bulletin", e),
                        },
                        Err(msg) => msg,
                    };
                    let menu = menus::bulletin_action_menu(&board);
                    self.sessions.set(sender, SessionState::BulletinAction { board });
                    format!("{}\n{}", reply, menu)
                }
                "n" | "no" => {
                    let menu = menus::bulletin_action_menu(&board);
                    self.sessions.set(sender, SessionState::BulletinAction { board });
                    format!("Kept.\n{}", menu)
                }
                _ => {
                    self.sessions
                        .set(sender, SessionState::BulletinDeleteConfirm { board, local_id });
                    "Delete this bulletin? [Y]es [N]o".to_string()
                }
            },
            SessionState::Compose(flow) => self.continue_flow(sender, flow, raw),
            SessionState::ChannelDirectory | SessionState::CheckChannel => match cmd {
                "v" => self.list_channels(sender),
                "p" => {
                    let flow = Flow::new(FlowKind::PostChannel);
                    let prompt = flow.prompt();
                    self.sessions.set(sender, SessionState::Compose(flow));
                    prompt
                }
                _ => {
                    self.sessions.set(sender, SessionState::ChannelDirectory);
                    menus::channel_menu().to_string()
                }
            },
            SessionState::Stats => {
                self.sessions.set(sender, SessionState::Stats);
                match cmd {
                    "t" => self.stats_totals(sender),
                    "s" => self.stats_sync(),
                    _ => menus::stats_menu().to_string(),
                }
            }
        }
    }

    fn continue_flow(&self, sender: &str, mut flow: Flow, raw: &str) -> String {
        match flow.answer(raw, &self.nodes) {
            Advance::Next(prompt) | Advance::Reprompt(prompt) => {
                self.sessions.set(sender, SessionState::Compose(flow));
                prompt
            }
            Advance::Cancelled => {
                self.sessions.clear(sender);
                "Cancelled. Send anything for the menu.".to_string()
            }
            Advance::Complete => {
                self.sessions.clear(sender);
                self.complete_flow(sender, flow)
            }
        }
    }

    fn complete_flow(&self, sender: &str, flow: Flow) -> String {
        let a = flow.answers;
        match flow.kind {
            FlowKind::SendMail => match (a.recipient_id, a.recipient_short, a.subject, a.body) {
                (Some(id), Some(short), Some(subject), Some(body)) => {
                    self.send_mail(sender, &id, &short, subject, body)
                }
                _ => {
                    warn!("send mail flow for {} completed without all answers", sender);
                    "Mail not sent.".to_string()
                }
            },
            FlowKind::PostBulletin => match (a.board, a.subject, a.body) {
                (Some(board), Some(subject), Some(body)) => {
                    self.post_bulletin(sender, &board, &subject, &body)
                }
                _ => {
                    warn!("bulletin flow for {} completed without all answers", sender);
                    "Bulletin not posted.".to_string()
                }
            },
            FlowKind::PostChannel => match (a.channel_name, a.channel_url) {
                (Some(name), Some(url)) => self.post_channel(&name, &url),
                _ => {
                    warn!("channel flow for {} completed without all answers", sender);
                    "Channel not added.".to_string()
                }
            },
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("bbs", &escape_log(&self.config.bbs.name))
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
