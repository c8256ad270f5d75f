//! Menu and help text. Kept short: every line costs airtime.

use chrono::{DateTime, Utc};

use crate::metrics::Snapshot;
use crate::storage::{Bulletin, Channel, Mail, StoreCounts};

pub fn main_menu(bbs_name: &str) -> String {
    format!(
        "{}\n[M]ail\n[B]ulletins\n[C]hannel Dir\n[S]tats\n[F]ortune\n[Q]uick Commands\nE[X]IT",
        bbs_name
    )
}

pub fn mail_menu() -> &'static str {
    "Mail\n[R]ead [S]end E[X]IT"
}

pub fn channel_menu() -> &'static str {
    "Channel Dir\n[V]iew [P]ost E[X]IT"
}

pub fn stats_menu() -> &'static str {
    "Stats\n[T]otals [S]ync E[X]IT"
}

pub fn bulletin_action_menu(board: &str) -> String {
    format!("{}\n[R]ead [P]ost E[X]IT", board)
}

pub fn mail_action_menu() -> &'static str {
    "[K]eep [D]elete [R]eply"
}

pub fn bulletin_read_menu() -> &'static str {
    "[D]elete [R]eturn to list E[X]IT"
}

pub fn quick_help() -> &'static str {
    "Quick Commands\n\
     SM,,recipient,,subject,,message\n\
     CM - check mail\n\
     PB,,board,,subject,,message\n\
     CB,,board - check board\n\
     CHP,,name,,url\n\
     CHL - list channels\n\
     X - main menu"
}

/// Menu key per board: its first letter, or its position when the letter is taken.
pub fn board_keys(boards: &[String]) -> Vec<(char, String)> {
    let mut keys: Vec<(char, String)> = Vec::with_capacity(boards.len());
    for (i, board) in boards.iter().enumerate() {
        let letter = board
            .chars()
            .find(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase());
        let key = match letter {
            Some(c) if c != 'x' && !keys.iter().any(|(k, _)| *k == c) => c,
            _ => char::from_digit(((i + 1) % 10) as u32, 10).unwrap_or('0'),
        };
        keys.push((key, board.clone()));
    }
    keys
}

pub fn bulletin_menu(boards: &[String]) -> String {
    let mut text = String::from("Bulletin Boards");
    for (key, board) in board_keys(boards) {
        let label = match board.chars().next() {
            Some(first) if first.to_ascii_lowercase() == key => {
                format!("[{}]{}", first.to_ascii_uppercase(), &board[first.len_utf8()..])
            }
            _ => format!("[{}] {}", key, board),
        };
        text.push('\n');
        text.push_str(&label);
    }
    text.push_str("\nE[X]IT");
    text
}

fn short_date(date: &DateTime<Utc>) -> String {
    date.format("%m-%d %H:%M").to_string()
}

pub fn mail_list(mail: &[Mail]) -> String {
    if mail.is_empty() {
        return "You have no mail.".to_string();
    }
    let mut text = format!("You have {} mail:", mail.len());
    for (i, m) in mail.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. {} - {} ({})",
            i + 1,
            m.sender_short_name,
            m.subject,
            short_date(&m.date)
        ));
    }
    text.push_str("\nReply with a number or X");
    text
}

pub fn mail_detail(mail: &Mail) -> String {
    format!(
        "Date: {}\nFrom: {}\nSubj: {}\n\n{}\n\n{}",
        mail.date.format("%Y-%m-%d %H:%M"),
        mail.sender_short_name,
        mail.subject,
        mail.content,
        mail_action_menu()
    )
}

pub fn bulletin_list(board: &str, bulletins: &[Bulletin]) -> String {
    if bulletins.is_empty() {
        return format!("No bulletins on {}.", board);
    }
    let mut text = format!("{} ({}):", board, bulletins.len());
    for (i, b) in bulletins.iter().enumerate() {
        text.push_str(&format!(
            "\n{}. {} - {} ({})",
            i + 1,
            b.subject,
            b.sender_short_name,
            short_date(&b.date)
        ));
    }
    text.push_str("\nReply with a number or X");
    text
}

pub fn bulletin_detail(bulletin: &Bulletin) -> String {
    format!(
        "Date: {}\nFrom: {}\nSubj: {}\n\n{}\n\n{}",
        bulletin.date.format("%Y-%m-%d %H:%M"),
        bulletin.sender_short_name,
        bulletin.subject,
        bulletin.content,
        bulletin_read_menu()
    )
}

pub fn channel_list(channels: &[Channel]) -> String {
    if channels.is_empty() {
        return format!("No channels listed yet.\n{}", channel_menu());
    }
    let mut text = String::from("Channels:");
    for (i, c) in channels.iter().enumerate() {
        text.push_str(&format!("\n{}. {}\n{}", i + 1, c.name, c.url));
    }
    text.push('\n');
    text.push_str(channel_menu());
    text
}

pub fn totals(counts: &StoreCounts, own_mail: usize) -> String {
    let boards: Vec<String> = counts
        .bulletins_by_board
        .iter()
        .map(|(board, n)| format!("{} {}", board, n))
        .collect();
    format!(
        "Bulletins: {}\n{}\nMail waiting for you: {}\nMail stored: {}\nChannels: {}",
        counts.bulletins(),
        boards.join(", "),
        own_mail,
        counts.mail,
        counts.channels
    )
}

pub fn sync_stats(snapshot: &Snapshot, peers: usize, sessions: usize) -> String {
    format!(
        "Peers: {}\nSync sent {} applied {} dup {} dropped {}\nChunks sent {} failed {}\nActive sessions: {}",
        peers,
        snapshot.sync_sent,
        snapshot.sync_applied,
        snapshot.sync_duplicate,
        snapshot.sync_dropped,
        snapshot.chunks_sent,
        snapshot.send_failed,
        sessions
    )
}

pub fn new_mail_notice(sender_short: &str) -> String {
    format!(
        "You have a new mail message from {}. Check your mailbox by responding to this message with CM.",
        sender_short
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boards(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn board_keys_use_first_letter() {
        let keys = board_keys(&boards(&["General", "Info", "News", "Urgent"]));
        let letters: Vec<char> = keys.iter().map(|(k, _)| *k).collect();
        assert_eq!(letters, vec!['g', 'i', 'n', 'u']);
    }

    #[test]
    fn clashing_board_letters_fall_back_to_position() {
        let keys = board_keys(&boards(&["News", "Nature", "Xchange"]));
        assert_eq!(keys[0].0, 'n');
        assert_eq!(keys[1].0, '2');
        assert_eq!(keys[2].0, '3');
        let menu = bulletin_menu(&boards(&["News", "Nature"]));
        assert!(menu.contains("[N]ews"));
        assert!(menu.contains("[2] Nature"));
    }

    #[test]
    fn main_menu_lists_every_section() {
        let menu = main_menu("Test BBS");
        for item in ["[M]ail", "[B]ulletins", "[C]hannel Dir", "[S]tats", "[F]ortune", "E[X]IT"] {
            assert!(menu.contains(item), "missing {item}");
        }
    }

    #[test]
    fn empty_mail_list() {
        assert_eq!(mail_list(&[]), "You have no mail.");
    }
}
