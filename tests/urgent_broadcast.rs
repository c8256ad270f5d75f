//! Posting to the urgent board alerts the whole mesh once; replicated
//! urgent bulletins stay quiet.

mod common;

use common::TestNode;

const ALICE: &str = "!0000a11c";

fn node(peers: &[&str]) -> TestNode {
    let n = TestNode::new("!bbs0000a", peers);
    n.learn(ALICE, "AL");
    n
}

#[test]
fn local_urgent_post_broadcasts_once() {
    let mut n = node(&[]);
    let reply = n.ask(ALICE, "pb,,Urgent,,Road closed,,Bridge out on Route 9").unwrap();
    assert_eq!(reply, "Posted to Urgent.");

    let alerts = n.broadcasts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("NEW URGENT BULLETIN"));
    assert!(alerts[0].contains("From: AL"));
    assert!(alerts[0].contains("Title: Road closed"));
    assert!(n.drain().is_empty());
}

#[test]
fn urgent_board_match_ignores_case() {
    let mut n = node(&[]);
    n.dm(ALICE, "pb,,urgent,,Flooding,,Low roads");
    assert_eq!(n.broadcasts().len(), 1);
}

#[test]
fn other_boards_do_not_broadcast() {
    let mut n = node(&[]);
    n.dm(ALICE, "pb,,General,,Swap meet,,Saturday");
    n.dm(ALICE, "pb,,News,,Net tonight,,8pm");
    assert!(n.broadcasts().is_empty());
}

#[test]
fn urgent_post_through_menu_broadcasts() {
    let mut n = node(&[]);
    n.dm(ALICE, "hi");
    n.dm(ALICE, "b");
    n.dm(ALICE, "u");
    n.dm(ALICE, "p");
    n.dm(ALICE, "Storm");
    assert_eq!(n.ask(ALICE, "Shelter at the school").unwrap(), "Posted to Urgent.");
    let alerts = n.broadcasts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("Title: Storm"));
}

#[test]
fn replicated_urgent_bulletin_is_silent() {
    let mut n = node(&["!bbs0000b"]);
    n.dm(
        "!bbs0000b",
        "BULLETIN|Urgent|BO|Road closed|Bridge out|9d3c1a2e-1111-4000-8000-000000000002",
    );
    assert_eq!(n.server.store().list_bulletins("Urgent").unwrap().len(), 1);
    assert!(n.broadcasts().is_empty());
    assert!(n.drain().is_empty());
}

#[test]
fn urgent_post_still_replicates() {
    let mut n = node(&["!bbs0000b"]);
    n.dm(ALICE, "pb,,Urgent,,Road closed,,Bridge out");
    assert_eq!(n.broadcasts().len(), 1);
    let wire = n.sync_to("!bbs0000b");
    assert_eq!(wire.len(), 1);
    assert!(wire[0].starts_with("BULLETIN|Urgent|AL|Road closed|Bridge out|"));
}
