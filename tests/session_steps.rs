//! Multi-step commands: a bad answer keeps the step, a good one advances,
//! and the last step performs the action and ends the session.

mod common;

use common::TestNode;
use meshsync_bbs::bbs::SessionState;

const ALICE: &str = "!0000a11c";
const BOB: &str = "!00000b0b";

fn node() -> TestNode {
    let n = TestNode::new("!bbs0000a", &[]);
    n.learn(ALICE, "AL");
    n.learn(BOB, "BOB");
    n
}

fn step_of(n: &TestNode, who: &str) -> Option<usize> {
    match n.server.sessions().get(who) {
        Some(SessionState::Compose(flow)) => Some(flow.step),
        _ => None,
    }
}

#[test]
fn bulletin_post_flow() {
    let mut n = node();
    n.dm(ALICE, "b");
    n.dm(ALICE, "b");
    n.dm(ALICE, "g");
    let prompt = n.ask(ALICE, "p").unwrap();
    assert!(prompt.contains("Posting to General"));
    assert_eq!(step_of(&n, ALICE), Some(0));

    let retry = n.ask(ALICE, "   ").unwrap();
    assert!(retry.starts_with("Subject cannot be empty"));
    assert_eq!(step_of(&n, ALICE), Some(0));

    let retry = n.ask(ALICE, "a|b").unwrap();
    assert!(retry.contains("cannot contain '|'"));
    assert_eq!(step_of(&n, ALICE), Some(0));

    assert_eq!(n.ask(ALICE, "Lost dog").unwrap(), "Enter your message:");
    assert_eq!(step_of(&n, ALICE), Some(1));

    let long = "w".repeat(1001);
    assert!(n.ask(ALICE, &long).unwrap().contains("too long"));
    assert_eq!(step_of(&n, ALICE), Some(1));

    assert_eq!(n.ask(ALICE, "Brown, answers to Rex").unwrap(), "Posted to General.");
    assert_eq!(n.server.sessions().get(ALICE), None);
    let posted = n.server.store().list_bulletins("General").unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].subject, "Lost dog");
    assert_eq!(posted[0].sender_short_name, "AL");
}

#[test]
fn send_mail_flow_rejects_unknown_recipient() {
    let mut n = node();
    n.dm(ALICE, "m");
    n.dm(ALICE, "m");
    assert!(n.ask(ALICE, "s").unwrap().starts_with("Who is it for?"));
    let retry = n.ask(ALICE, "NOBODY").unwrap();
    assert!(retry.starts_with("No node found matching 'NOBODY'"));
    assert_eq!(step_of(&n, ALICE), Some(0));

    assert!(n.ask(ALICE, "bob").unwrap().contains("Mail to BOB"));
    n.dm(ALICE, "Coffee?");
    let confirm = n.ask(ALICE, "Tomorrow at 10").unwrap();
    assert!(confirm.contains("Send to BOB?"));
    assert_eq!(step_of(&n, ALICE), Some(3));

    assert!(n.ask(ALICE, "maybe").unwrap().starts_with("Please answer Y or N."));
    assert_eq!(step_of(&n, ALICE), Some(3));
    assert!(n.server.store().list_mail(BOB).unwrap().is_empty());

    assert_eq!(n.ask(ALICE, "Y").unwrap(), "Mail sent to BOB.");
    assert_eq!(n.server.sessions().get(ALICE), None);
    assert_eq!(n.server.store().list_mail(BOB).unwrap().len(), 1);
}

#[test]
fn declining_mail_confirmation_stores_nothing() {
    let mut n = node();
    n.dm(ALICE, "sm");
    n.dm(ALICE, "BOB");
    n.dm(ALICE, "Subject");
    n.dm(ALICE, "Body");
    assert!(n.ask(ALICE, "n").unwrap().starts_with("Cancelled."));
    assert_eq!(n.server.sessions().get(ALICE), None);
    assert!(n.server.store().list_mail(BOB).unwrap().is_empty());
}

#[test]
fn channel_post_flow() {
    let mut n = node();
    n.dm(ALICE, "hi");
    n.dm(ALICE, "c");
    assert_eq!(n.ask(ALICE, "p").unwrap(), "Name of the channel:");
    assert_eq!(n.ask(ALICE, "Hikers").unwrap(), "Channel URL:");
    let retry = n.ask(ALICE, "not a url").unwrap();
    assert!(retry.starts_with("URL cannot contain spaces"));
    assert_eq!(step_of(&n, ALICE), Some(1));
    assert_eq!(n.ask(ALICE, "https://meshtastic.org/e/#hike").unwrap(), "Channel Hikers added.");
    assert_eq!(n.server.sessions().get(ALICE), None);
    assert_eq!(n.server.store().list_channels().unwrap().len(), 1);
}

#[test]
fn shortcut_interrupts_flow() {
    let mut n = node();
    n.dm(ALICE, "sm");
    assert!(n.ask(ALICE, "q").unwrap().starts_with("Quick Commands"));
    assert_eq!(step_of(&n, ALICE), Some(0), "help leaves the flow where it was");
    assert!(n.ask(ALICE, "bob").unwrap().contains("Mail to BOB"));
}
