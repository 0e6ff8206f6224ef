use std::collections::HashSet;

use chatterbox::Relay::ClientRegistry;
use chatterbox::Transport::MailboxId;
use chatterbox::RelayError;

fn mailbox(n: i32) -> MailboxId {
    MailboxId::from_raw(n)
}

#[test]
fn test_connect_fills_lowest_free_slot() {
    let mut registry = ClientRegistry::new(3);
    assert_eq!(registry.connect("alice", mailbox(10), 100, 1).unwrap(), 0);
    assert_eq!(registry.connect("bob", mailbox(11), 101, 2).unwrap(), 1);
    assert_eq!(registry.active_count(), 2);

    let record = registry.get(1).unwrap();
    assert_eq!(record.username, "bob");
    assert_eq!(record.mailbox, mailbox(11));
    assert_eq!(record.pid, 101);
    assert_eq!(record.connected_at, 2);
    assert!(record.active);

    // freed slots are reused lowest-first
    registry.disconnect("alice").unwrap();
    assert!(registry.get(0).is_none());
    assert_eq!(registry.connect("carol", mailbox(12), 102, 3).unwrap(), 0);
    assert_eq!(registry.usernames(), vec!["carol", "bob"]);
}

#[test]
fn test_duplicate_username_rejected() {
    let mut registry = ClientRegistry::new(3);
    registry.connect("alice", mailbox(10), 100, 0).unwrap();
    let err = registry.connect("alice", mailbox(11), 101, 0).unwrap_err();
    assert!(matches!(err, RelayError::DuplicateUsername(name) if name == "alice"));
    assert_eq!(registry.active_count(), 1);
}

#[test]
fn test_registry_full() {
    let mut registry = ClientRegistry::new(2);
    registry.connect("a", mailbox(1), 1, 0).unwrap();
    registry.connect("b", mailbox(2), 2, 0).unwrap();

    let err = registry.connect("c", mailbox(3), 3, 0).unwrap_err();
    assert!(matches!(err, RelayError::RegistryFull { capacity: 2 }));

    // a duplicate is reported as such even when there is no room
    let err = registry.connect("a", mailbox(4), 4, 0).unwrap_err();
    assert!(matches!(err, RelayError::DuplicateUsername(_)));
}

#[test]
fn test_empty_username_is_malformed() {
    let mut registry = ClientRegistry::new(2);
    assert!(matches!(
        registry.connect("", mailbox(1), 1, 0),
        Err(RelayError::MalformedRequest(_))
    ));
    assert!(registry.is_empty());
}

#[test]
fn test_disconnect_unknown_is_noop() {
    let mut registry = ClientRegistry::new(2);
    registry.connect("a", mailbox(1), 1, 0).unwrap();
    assert!(registry.disconnect("nobody").is_none());
    assert_eq!(registry.active_count(), 1);

    let gone = registry.disconnect("a").unwrap();
    assert_eq!(gone.username, "a");
    assert!(!gone.active);
    assert!(registry.disconnect("a").is_none());
}

#[test]
fn test_evict_and_clear() {
    let mut registry = ClientRegistry::new(4);
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        registry.connect(name, mailbox(i as i32), 1, 0).unwrap();
    }

    let evicted = registry.evict(1).unwrap();
    assert_eq!(evicted.username, "b");
    assert!(registry.evict(1).is_none());
    assert!(registry.evict(99).is_none());
    assert_eq!(registry.find_active("b"), None);
    assert_eq!(registry.find_active("c"), Some(2));

    let cleared: Vec<String> = registry.clear().into_iter().map(|r| r.username).collect();
    assert_eq!(cleared, vec!["a", "c"]);
    assert!(registry.is_empty());
    assert_eq!(registry.active().count(), 0);
}

#[test]
fn test_random_operations_keep_names_unique() {
    let capacity = 8;
    let mut registry = ClientRegistry::new(capacity);
    let mut model: HashSet<String> = HashSet::new();
    let mut rng = fastrand::Rng::with_seed(42);

    for step in 0..5_000 {
        let name = format!("user{}", rng.usize(0..16));
        if rng.bool() {
            let result = registry.connect(&name, mailbox(step), 1, 0);
            match result {
                Ok(slot) => {
                    assert!(model.insert(name.clone()), "step {step}: {name} connected twice");
                    assert_eq!(registry.find_active(&name), Some(slot));
                }
                Err(RelayError::DuplicateUsername(_)) => assert!(model.contains(&name)),
                Err(RelayError::RegistryFull { .. }) => assert_eq!(model.len(), capacity),
                Err(e) => panic!("step {step}: unexpected {e:?}"),
            }
        } else {
            assert_eq!(registry.disconnect(&name).is_some(), model.remove(&name));
        }

        assert_eq!(registry.active_count(), model.len());
        let names: HashSet<String> = registry.usernames().into_iter().collect();
        assert_eq!(names, model, "step {step}");
    }
}

#[test]
fn test_debug_lists_active_slots() {
    let mut registry = ClientRegistry::new(3);
    registry.connect("alice", mailbox(7), 1, 0).unwrap();
    let rendered = format!("{registry:?}");
    assert!(rendered.contains("ClientRegistry"));
    assert!(rendered.contains("alice"));
    assert!(rendered.contains("empty: 2"));
}
