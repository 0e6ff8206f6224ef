// In-process mailbox backend: the same contract the System V backend honours.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chatterbox::Transport::{
    KindFilter, LocalMailboxes, MailboxBackend, MailboxName, Message, MessageKind, RecvMode, SendMode,
};
use chatterbox::RelayError;

fn name(owner: u32) -> MailboxName {
    MailboxName::new("test.local", owner)
}

#[test]
fn test_create_is_idempotent_and_lookup_finds_it() {
    let mailboxes = LocalMailboxes::new();
    let first = mailboxes.create(&name(1)).unwrap();
    let again = mailboxes.create(&name(1)).unwrap();
    let other = mailboxes.create(&name(2)).unwrap();

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(mailboxes.lookup(&name(1)).unwrap(), first);
    assert_eq!(mailboxes.mailbox_count(), 2);
    assert!(matches!(mailboxes.lookup(&name(3)), Err(RelayError::PeerGone)));
}

#[test]
fn test_fifo_delivery() {
    let mailboxes = LocalMailboxes::new();
    let id = mailboxes.create(&name(1)).unwrap();

    for i in 0..5 {
        mailboxes
            .send(id, &Message::chat("alice", &format!("msg {i}")), SendMode::NonBlocking)
            .unwrap();
    }
    assert_eq!(mailboxes.queued(id), Some(5));

    for i in 0..5 {
        let message = mailboxes.receive(id, KindFilter::Any, RecvMode::NonBlocking).unwrap();
        assert_eq!(message.body, format!("msg {i}"));
    }
    assert!(matches!(
        mailboxes.receive(id, KindFilter::Any, RecvMode::NonBlocking),
        Err(RelayError::NoMessage)
    ));
}

#[test]
fn test_filtered_receive_leaves_other_kinds_queued() {
    let mailboxes = LocalMailboxes::new();
    let id = mailboxes.create(&name(1)).unwrap();

    mailboxes.send(id, &Message::chat("a", "chat"), SendMode::NonBlocking).unwrap();
    mailboxes.send(id, &Message::welcome("a"), SendMode::NonBlocking).unwrap();

    let ack = mailboxes
        .receive(id, KindFilter::Only(MessageKind::Ack), RecvMode::NonBlocking)
        .unwrap();
    assert_eq!(ack.kind, MessageKind::Ack);
    assert!(matches!(
        mailboxes.receive(id, KindFilter::Only(MessageKind::Ack), RecvMode::NonBlocking),
        Err(RelayError::NoMessage)
    ));

    let chat = mailboxes.receive(id, KindFilter::Any, RecvMode::NonBlocking).unwrap();
    assert_eq!(chat.body, "chat");
}

#[test]
fn test_full_mailbox_would_block() {
    let mailboxes = LocalMailboxes::with_limits(2, 16);
    let id = mailboxes.create(&name(1)).unwrap();

    mailboxes.send(id, &Message::chat("a", "1"), SendMode::NonBlocking).unwrap();
    mailboxes.send(id, &Message::chat("a", "2"), SendMode::NonBlocking).unwrap();
    assert!(matches!(
        mailboxes.send(id, &Message::chat("a", "3"), SendMode::NonBlocking),
        Err(RelayError::WouldBlock)
    ));
}

#[test]
fn test_blocking_send_waits_for_room() {
    let mailboxes = LocalMailboxes::with_limits(1, 16);
    let id = mailboxes.create(&name(1)).unwrap();
    mailboxes.send(id, &Message::chat("a", "first"), SendMode::NonBlocking).unwrap();

    let sender = {
        let mailboxes = mailboxes.clone();
        thread::spawn(move || mailboxes.send(id, &Message::chat("a", "second"), SendMode::Blocking))
    };

    thread::sleep(Duration::from_millis(50));
    let first = mailboxes.receive(id, KindFilter::Any, RecvMode::Blocking).unwrap();
    assert_eq!(first.body, "first");

    sender.join().unwrap().unwrap();
    let second = mailboxes.receive(id, KindFilter::Any, RecvMode::Blocking).unwrap();
    assert_eq!(second.body, "second");
}

#[test]
fn test_destroyed_mailbox() {
    let mailboxes = LocalMailboxes::new();
    let id = mailboxes.create(&name(1)).unwrap();
    mailboxes.send(id, &Message::chat("a", "lost"), SendMode::NonBlocking).unwrap();

    mailboxes.destroy(id).unwrap();
    // destroying twice is fine
    mailboxes.destroy(id).unwrap();

    assert!(!mailboxes.exists(id));
    assert!(matches!(
        mailboxes.send(id, &Message::chat("a", "x"), SendMode::NonBlocking),
        Err(RelayError::PeerGone)
    ));
    assert!(matches!(
        mailboxes.receive(id, KindFilter::Any, RecvMode::NonBlocking),
        Err(RelayError::MailboxRemoved)
    ));
    assert!(matches!(mailboxes.lookup(&name(1)), Err(RelayError::PeerGone)));
}

#[test]
fn test_destroy_wakes_blocked_receiver() {
    let mailboxes = Arc::new(LocalMailboxes::new());
    let id = mailboxes.create(&name(1)).unwrap();

    let receiver = {
        let mailboxes = Arc::clone(&mailboxes);
        thread::spawn(move || mailboxes.receive(id, KindFilter::Any, RecvMode::Blocking))
    };

    thread::sleep(Duration::from_millis(50));
    mailboxes.destroy(id).unwrap();
    assert!(matches!(receiver.join().unwrap(), Err(RelayError::MailboxRemoved)));
}

#[test]
fn test_receive_timeout() {
    let mailboxes = LocalMailboxes::new();
    let id = mailboxes.create(&name(1)).unwrap();

    let start = Instant::now();
    let result = mailboxes.receive(id, KindFilter::Any, RecvMode::Timeout(Duration::from_millis(100)));
    assert!(matches!(result, Err(RelayError::NoMessage)));
    assert!(start.elapsed() >= Duration::from_millis(100));

    // a message arriving during the wait is picked up
    let late = {
        let mailboxes = mailboxes.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            mailboxes.send(id, &Message::welcome("a"), SendMode::NonBlocking)
        })
    };
    let ack = mailboxes
        .receive(id, KindFilter::Only(MessageKind::Ack), RecvMode::Timeout(Duration::from_secs(2)))
        .unwrap();
    assert_eq!(ack.kind, MessageKind::Ack);
    late.join().unwrap().unwrap();
}

#[test]
fn test_purge_discards_everything() {
    let mailboxes = LocalMailboxes::new();
    let id = mailboxes.create(&name(1)).unwrap();
    for _ in 0..3 {
        mailboxes.send(id, &Message::chat("a", "stale"), SendMode::NonBlocking).unwrap();
    }
    assert_eq!(mailboxes.purge(id).unwrap(), 3);
    assert_eq!(mailboxes.queued(id), Some(0));
    assert_eq!(mailboxes.purge(id).unwrap(), 0);
}

#[test]
fn test_mailbox_limit() {
    let mailboxes = LocalMailboxes::with_limits(4, 2);
    mailboxes.create(&name(1)).unwrap();
    mailboxes.create(&name(2)).unwrap();
    assert!(matches!(
        mailboxes.create(&name(3)),
        Err(RelayError::TransportUnavailable(_))
    ));
    // existing names still resolve
    mailboxes.create(&name(1)).unwrap();
}

#[test]
fn test_kind_zero_is_refused() {
    let mailboxes = LocalMailboxes::new();
    let id = mailboxes.create(&name(1)).unwrap();
    let bogus = Message::new(MessageKind::Other(0), "a", "b");
    assert!(matches!(
        mailboxes.send(id, &bogus, SendMode::NonBlocking),
        Err(RelayError::MalformedRequest(_))
    ));
}
