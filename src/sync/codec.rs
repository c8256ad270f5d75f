//! Positional, pipe-delimited sync records exchanged between peer BBS nodes.
//!
//! ```text
//! BULLETIN|<board>|<sender_short>|<subject>|<content>|<unique_id>
//! MAIL|<sender_id>|<sender_short>|<recipient_id>|<subject>|<content>|<unique_id>
//! DELETE_BULLETIN|<unique_id>
//! DELETE_MAIL|<unique_id>
//! CHANNEL|<name>|<url>
//! ```
//!
//! Text is parsed into [`SyncEvent`] at the boundary; nothing past this module
//! looks at raw field positions.

use thiserror::Error;

pub const DELIMITER: char = '|';

pub const TAG_BULLETIN: &str = "BULLETIN";
pub const TAG_MAIL: &str = "MAIL";
pub const TAG_DELETE_BULLETIN: &str = "DELETE_BULLETIN";
pub const TAG_DELETE_MAIL: &str = "DELETE_MAIL";
pub const TAG_CHANNEL: &str = "CHANNEL";

const TAGS: [&str; 5] = [
    TAG_BULLETIN,
    TAG_MAIL,
    TAG_DELETE_BULLETIN,
    TAG_DELETE_MAIL,
    TAG_CHANNEL,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncDecodeError {
    #[error("empty sync payload")]
    Empty,
    #[error("unknown sync tag '{0}'")]
    UnknownTag(String),
    #[error("{tag} expects {expected} fields, found {found}")]
    FieldCount {
        tag: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{tag} field {index} is empty")]
    EmptyField { tag: &'static str, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletinRecord {
    pub board: String,
    pub sender_short_name: String,
    pub subject: String,
    pub content: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRecord {
    pub sender_id: String,
    pub sender_short_name: String,
    pub recipient_id: String,
    pub subject: String,
    pub content: String,
    pub unique_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub name: String,
    pub url: String,
}

/// One replicated mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Bulletin(BulletinRecord),
    Mail(MailRecord),
    DeleteBulletin { unique_id: String },
    DeleteMail { unique_id: String },
    Channel(ChannelRecord),
}

/// True when `text` carries one of the reserved `TAG|` prefixes.
pub fn is_sync_text(text: &str) -> bool {
    TAGS.iter().any(|tag| {
        text.strip_prefix(tag)
            .map(|rest| rest.starts_with(DELIMITER))
            .unwrap_or(false)
    })
}

impl SyncEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            SyncEvent::Bulletin(_) => TAG_BULLETIN,
            SyncEvent::Mail(_) => TAG_MAIL,
            SyncEvent::DeleteBulletin { .. } => TAG_DELETE_BULLETIN,
            SyncEvent::DeleteMail { .. } => TAG_DELETE_MAIL,
            SyncEvent::Channel(_) => TAG_CHANNEL,
        }
    }

    /// Unique id carried on the wire, if the record type has one.
    pub fn unique_id(&self) -> Option<&str> {
        match self {
            SyncEvent::Bulletin(b) => Some(&b.unique_id),
            SyncEvent::Mail(m) => Some(&m.unique_id),
            SyncEvent::DeleteBulletin { unique_id } | SyncEvent::DeleteMail { unique_id } => {
                Some(unique_id)
            }
            SyncEvent::Channel(_) => None,
        }
    }

    pub fn encode(&self) -> String {
        let fields: Vec<&str> = match self {
            SyncEvent::Bulletin(b) => vec![
                TAG_BULLETIN,
                b.board.as_str(),
                b.sender_short_name.as_str(),
                b.subject.as_str(),
                b.content.as_str(),
                b.unique_id.as_str(),
            ],
            SyncEvent::Mail(m) => vec![
                TAG_MAIL,
                m.sender_id.as_str(),
                m.sender_short_name.as_str(),
                m.recipient_id.as_str(),
                m.subject.as_str(),
                m.content.as_str(),
                m.unique_id.as_str(),
            ],
            SyncEvent::DeleteBulletin { unique_id } => vec![TAG_DELETE_BULLETIN, unique_id.as_str()],
            SyncEvent::DeleteMail { unique_id } => vec![TAG_DELETE_MAIL, unique_id.as_str()],
            SyncEvent::Channel(c) => vec![TAG_CHANNEL, c.name.as_str(), c.url.as_str()],
        };
        fields.join("|")
    }

    pub fn decode(text: &str) -> Result<SyncEvent, SyncDecodeError> {
        let text = text.trim_end_matches(|c| c == '\r' || c == '\n');
        if text.is_empty() {
            return Err(SyncDecodeError::Empty);
        }
        let parts: Vec<&str> = text.split(DELIMITER).collect();
        let tag = match TAGS.iter().find(|t| **t == parts[0]) {
            Some(t) => *t,
            None => return Err(SyncDecodeError::UnknownTag(parts[0].to_string())),
        };
        let expected = match tag {
            TAG_BULLETIN => 6,
            TAG_MAIL => 7,
            TAG_DELETE_BULLETIN | TAG_DELETE_MAIL => 2,
            _ => 3,
        };
        if parts.len() != expected {
            return Err(SyncDecodeError::FieldCount {
                tag,
                expected,
                found: parts.len(),
            });
        }
        if let Some(index) = parts.iter().skip(1).position(|p| p.trim().is_empty()) {
            return Err(SyncDecodeError::EmptyField {
                tag,
                index: index + 1,
            });
        }
        let f = |i: usize| parts[i].to_string();
        let event = match tag {
            TAG_BULLETIN => SyncEvent::Bulletin(BulletinRecord {
                board: f(1),
                sender_short_name: f(2),
                subject: f(3),
                content: f(4),
                unique_id: f(5),
            }),
            TAG_MAIL => SyncEvent::Mail(MailRecord {
                sender_id: f(1),
                sender_short_name: f(2),
                recipient_id: f(3),
                subject: f(4),
                content: f(5),
                unique_id: f(6),
            }),
            TAG_DELETE_BULLETIN => SyncEvent::DeleteBulletin { unique_id: f(1) },
            TAG_DELETE_MAIL => SyncEvent::DeleteMail { unique_id: f(1) },
            _ => SyncEvent::Channel(ChannelRecord {
                name: f(1),
                url: f(2),
            }),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bulletin() {
        let ev = SyncEvent::decode("BULLETIN|General|AL|Hi|Body text|uid-1").unwrap();
        assert_eq!(
            ev,
            SyncEvent::Bulletin(BulletinRecord {
                board: "General".into(),
                sender_short_name: "AL".into(),
                subject: "Hi".into(),
                content: "Body text".into(),
                unique_id: "uid-1".into(),
            })
        );
    }

    #[test]
    fn decodes_mail_and_keeps_unique_id_on_reencode() {
        let wire = "MAIL|!a1|AL|!b2|Hello|Test body|7f0c";
        let ev = SyncEvent::decode(wire).unwrap();
        assert_eq!(ev.unique_id(), Some("7f0c"));
        assert_eq!(ev.encode(), wire);
    }

    #[test]
    fn decodes_deletes_and_channel() {
        assert_eq!(
            SyncEvent::decode("DELETE_MAIL|u1").unwrap(),
            SyncEvent::DeleteMail {
                unique_id: "u1".into()
            }
        );
        assert_eq!(
            SyncEvent::decode("DELETE_BULLETIN|u2\r\n").unwrap(),
            SyncEvent::DeleteBulletin {
                unique_id: "u2".into()
            }
        );
        assert_eq!(
            SyncEvent::decode("CHANNEL|Hikers|https://meshtastic.org/e/#abc").unwrap(),
            SyncEvent::Channel(ChannelRecord {
                name: "Hikers".into(),
                url: "https://meshtastic.org/e/#abc".into(),
            })
        );
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert_eq!(
            SyncEvent::decode("MAIL|a|b|c"),
            Err(SyncDecodeError::FieldCount {
                tag: TAG_MAIL,
                expected: 7,
                found: 4
            })
        );
        assert!(SyncEvent::decode("DELETE_MAIL|u1|extra").is_err());
    }

    #[test]
    fn unknown_tag_and_empty_fields_are_rejected() {
        assert_eq!(
            SyncEvent::decode("POSITION|1|2"),
            Err(SyncDecodeError::UnknownTag("POSITION".into()))
        );
        assert_eq!(
            SyncEvent::decode("DELETE_BULLETIN| "),
            Err(SyncDecodeError::EmptyField {
                tag: TAG_DELETE_BULLETIN,
                index: 1
            })
        );
        assert_eq!(SyncEvent::decode(""), Err(SyncDecodeError::Empty));
    }

    #[test]
    fn sync_prefix_detection() {
        assert!(is_sync_text("BULLETIN|x"));
        assert!(is_sync_text("DELETE_MAIL|x"));
        assert!(!is_sync_text("bulletin|x"));
        assert!(!is_sync_text("MAILBOX"));
        assert!(!is_sync_text("m"));
    }
}
