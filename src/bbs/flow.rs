//! Multi-step conversations (send mail, post bulletin, post channel).
//!
//! Each [`FlowKind`] has a fixed step table. [`Flow::answer`] validates the
//! input for the current step; an invalid answer leaves the flow where it is
//! and returns a re-prompt, a valid one stores the answer and moves to the
//! next step. The caller performs the store mutation once the flow reports
//! [`Advance::Complete`].

use crate::mesh::nodes::{NodeDirectory, NodeInfo};
use crate::validation::{validate_body, validate_channel_name, validate_channel_url, validate_subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    SendMail,
    PostBulletin,
    PostChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Recipient,
    Subject,
    Body,
    Confirm,
    ChannelName,
    ChannelUrl,
}

impl FlowKind {
    pub fn steps(self) -> &'static [Step] {
        match self {
            FlowKind::SendMail => &[Step::Recipient, Step::Subject, Step::Body, Step::Confirm],
            FlowKind::PostBulletin => &[Step::Subject, Step::Body],
            FlowKind::PostChannel => &[Step::ChannelName, Step::ChannelUrl],
        }
    }
}

/// Answers collected so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    pub board: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_short: Option<String>,
    /// Pending short-name matches when a recipient was ambiguous, as (node id, short name).
    pub candidates: Vec<(String, String)>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub channel_name: Option<String>,
    pub channel_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub kind: FlowKind,
    pub step: usize,
    pub answers: Answers,
}

/// Outcome of feeding one answer to a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Moved on; send this prompt.
    Next(String),
    /// Same step again; the message explains why.
    Reprompt(String),
    /// Every step answered.
    Complete,
    /// The user declined at the confirmation step.
    Cancelled,
}

impl Flow {
    pub fn new(kind: FlowKind) -> Self {
        Self {
            kind,
            step: 0,
            answers: Answers::default(),
        }
    }

    pub fn post_bulletin(board: &str) -> Self {
        let mut flow = Self::new(FlowKind::PostBulletin);
        flow.answers.board = Some(board.to_string());
        flow
    }

    /// Reply to a mail: recipient already known, start at the subject.
    pub fn reply_to(recipient_id: &str, recipient_short: &str) -> Self {
        let mut flow = Self::new(FlowKind::SendMail);
        flow.answers.recipient_id = Some(recipient_id.to_string());
        flow.answers.recipient_short = Some(recipient_short.to_string());
        flow.step = 1;
        flow
    }

    pub fn current(&self) -> Step {
        let steps = self.kind.steps();
        steps[self.step.min(steps.len() - 1)]
    }

    pub fn prompt(&self) -> String {
        match self.current() {
            Step::Recipient => "Who is it for? Enter a short name or node id:".to_string(),
            Step::Subject => match (&self.kind, &self.answers.board, &self.answers.recipient_short) {
                (FlowKind::PostBulletin, Some(board), _) => {
                    format!("Posting to {}. What is the subject?", board)
                }
                (_, _, Some(to)) => format!("Mail to {}. What is the subject?", to),
                _ => "What is the subject?".to_string(),
            },
            Step::Body => "Enter your message:".to_string(),
            Step::Confirm => format!(
                "Send to {}?\nSubj: {}\n[Y]es [N]o",
                self.answers.recipient_short.as_deref().unwrap_or("?"),
                self.answers.subject.as_deref().unwrap_or("")
            ),
            Step::ChannelName => "Name of the channel:".to_string(),
            Step::ChannelUrl => "Channel URL:".to_string(),
        }
    }

    fn advance(&mut self) -> Advance {
        self.step += 1;
        if self.step >= self.kind.steps().len() {
            Advance::Complete
        } else {
            Advance::Next(self.prompt())
        }
    }

    fn retry(&self, reason: impl std::fmt::Display) -> Advance {
        Advance::Reprompt(format!("{}\n{}", reason, self.prompt()))
    }

    /// Feed `input` (raw, untrimmed text) to the current step.
    pub fn answer(&mut self, input: &str, nodes: &NodeDirectory) -> Advance {
        match self.current() {
            Step::Recipient => self.answer_recipient(input.trim(), nodes),
            Step::Subject => match validate_subject(input) {
                Ok(v) => {
                    self.answers.subject = Some(v);
                    self.advance()
                }
                Err(e) => self.retry(e),
            },
            Step::Body => match validate_body(input) {
                Ok(v) => {
                    self.answers.body = Some(v);
                    self.advance()
                }
                Err(e) => self.retry(e),
            },
            Step::Confirm => match input.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => self.advance(),
                "n" | "no" => Advance::Cancelled,
                _ => self.retry("Please answer Y or N."),
            },
            Step::ChannelName => match validate_channel_name(input) {
                Ok(v) => {
                    self.answers.channel_name = Some(v);
                    self.advance()
                }
                Err(e) => self.retry(e),
            },
            Step::ChannelUrl => match validate_channel_url(input) {
                Ok(v) => {
                    self.answers.channel_url = Some(v);
                    self.advance()
                }
                Err(e) => self.retry(e),
            },
        }
    }

    fn choose_recipient(&mut self, node_id: String, short: String) -> Advance {
        self.answers.candidates.clear();
        self.answers.recipient_id = Some(node_id);
        self.answers.recipient_short = Some(short);
        self.advance()
    }

    fn answer_recipient(&mut self, input: &str, nodes: &NodeDirectory) -> Advance {
        if !self.answers.candidates.is_empty() {
            if let Ok(n) = input.parse::<usize>() {
                if n >= 1 && n <= self.answers.candidates.len() {
                    let (id, short) = self.answers.candidates[n - 1].clone();
                    return self.choose_recipient(id, short);
                }
                return self.retry(format!("Pick 1-{}.", self.answers.candidates.len()));
            }
        }
        if input.is_empty() {
            return self.retry("Recipient cannot be empty.");
        }
        let mut found: Vec<NodeInfo> = nodes.resolve(input);
        match found.len() {
            0 => self.retry(format!("No node found matching '{}'.", input)),
            1 => {
                let node = found.remove(0);
                self.choose_recipient(node.node_id, node.short_name)
            }
            _ => {
                self.answers.candidates = found
                    .into_iter()
                    .map(|n| (n.node_id, n.short_name))
                    .collect();
                let mut text = format!("Several nodes match '{}':", input);
                for (i, (id, short)) in self.answers.candidates.iter().enumerate() {
                    text.push_str(&format!("\n{}. {} ({})", i + 1, short, id));
                }
                text.push_str("\nReply with a number.");
                Advance::Reprompt(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes() -> NodeDirectory {
        let dir = NodeDirectory::new();
        dir.update("!00000b0b", "BOB", "Bob");
        dir.update("!00000a11", "AL", "Alice");
        dir.update("!00000a12", "al", "Alan");
        dir
    }

    #[test]
    fn mail_flow_walks_every_step() {
        let dir = nodes();
        let mut flow = Flow::new(FlowKind::SendMail);
        assert!(matches!(flow.answer("bob", &dir), Advance::Next(_)));
        assert_eq!(flow.answers.recipient_id.as_deref(), Some("!00000b0b"));
        assert!(matches!(flow.answer("Hello", &dir), Advance::Next(_)));
        assert!(matches!(flow.answer("Test body", &dir), Advance::Next(_)));
        assert_eq!(flow.current(), Step::Confirm);
        assert_eq!(flow.answer("y", &dir), Advance::Complete);
    }

    #[test]
    fn invalid_answer_stays_on_step() {
        let dir = nodes();
        let mut flow = Flow::new(FlowKind::SendMail);
        flow.answer("bob", &dir);
        assert_eq!(flow.step, 1);
        assert!(matches!(flow.answer("   ", &dir), Advance::Reprompt(_)));
        assert_eq!(flow.step, 1);
        assert_eq!(flow.answers.subject, None);
    }

    #[test]
    fn unknown_recipient_reprompts() {
        let dir = nodes();
        let mut flow = Flow::new(FlowKind::SendMail);
        match flow.answer("nobody", &dir) {
            Advance::Reprompt(text) => assert!(text.contains("No node found")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(flow.step, 0);
    }

    #[test]
    fn ambiguous_recipient_offers_numbered_choice() {
        let dir = nodes();
        let mut flow = Flow::new(FlowKind::SendMail);
        match flow.answer("AL", &dir) {
            Advance::Reprompt(text) => assert!(text.contains("1. AL (!00000a11)")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(flow.answer("5", &dir), Advance::Reprompt(_)));
        assert!(matches!(flow.answer("2", &dir), Advance::Next(_)));
        assert_eq!(flow.answers.recipient_id.as_deref(), Some("!00000a12"));
    }

    #[test]
    fn declining_confirmation_cancels() {
        let dir = nodes();
        let mut flow = Flow::reply_to("!00000b0b", "BOB");
        assert_eq!(flow.current(), Step::Subject);
        flow.answer("Re: hi", &dir);
        flow.answer("thanks", &dir);
        assert!(matches!(flow.answer("maybe", &dir), Advance::Reprompt(_)));
        assert_eq!(flow.answer("N", &dir), Advance::Cancelled);
    }

    #[test]
    fn bulletin_flow_completes_after_body() {
        let dir = NodeDirectory::new();
        let mut flow = Flow::post_bulletin("General");
        assert!(flow.prompt().contains("General"));
        assert!(matches!(flow.answer("Swap meet", &dir), Advance::Next(_)));
        assert_eq!(flow.answer("Saturday 9am", &dir), Advance::Complete);
        assert_eq!(flow.answers.body.as_deref(), Some("Saturday 9am"));
    }

    #[test]
    fn channel_flow_rejects_bad_url() {
        let dir = NodeDirectory::new();
        let mut flow = Flow::new(FlowKind::PostChannel);
        flow.answer("Hikers", &dir);
        assert!(matches!(flow.answer("not a url", &dir), Advance::Reprompt(_)));
        assert_eq!(flow.answer("https://meshtastic.org/e/#x", &dir), Advance::Complete);
    }
}
