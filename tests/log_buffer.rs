// Shared activity log: eviction policy, snapshots, cross-mapping visibility.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chatterbox::Transport::Message;
use chatterbox::{LogBuffer, RelayError};

const MIB: usize = 1024 * 1024;

#[test]
fn test_append_and_snapshot() {
    let log = LogBuffer::anonymous(1024).unwrap();
    assert_eq!(log.capacity(), 1024);
    assert_eq!(log.used(), 0);

    assert_eq!(log.append(b"first\n").unwrap(), 0);
    assert_eq!(log.append(b"second\n").unwrap(), 0);

    assert_eq!(log.read_snapshot(), b"first\nsecond\n");
    assert_eq!(log.used(), 13);
    assert_eq!(log.write_cursor(), 13);
}

#[test]
fn test_half_eviction_when_full() {
    let log = LogBuffer::anonymous(MIB).unwrap();
    let a = vec![b'a'; 600_000];
    let b = vec![b'b'; 600_000];

    assert_eq!(log.append(&a).unwrap(), 0);
    let evicted = log.append(&b).unwrap();

    // oldest half of 600 000 bytes dropped, the rest shifted to the front
    assert_eq!(evicted, 300_000);
    let snapshot = log.read_snapshot();
    assert_eq!(snapshot.len(), 900_000);
    assert!(snapshot[..300_000].iter().all(|&c| c == b'a'));
    assert!(snapshot[300_000..].iter().all(|&c| c == b'b'));
}

#[test]
fn test_eviction_beyond_half_for_large_entries() {
    let log = LogBuffer::anonymous(100).unwrap();
    let old: Vec<u8> = (0..80u8).collect();
    log.append(&old).unwrap();

    let new = vec![0xEE; 70];
    let evicted = log.append(&new).unwrap();

    // half (40) is not enough for 70 more bytes; 10 further bytes go
    assert_eq!(evicted, 50);
    let snapshot = log.read_snapshot();
    assert_eq!(snapshot.len(), 100);
    assert_eq!(&snapshot[..30], &old[50..]);
    assert_eq!(&snapshot[30..], &new[..]);
}

#[test]
fn test_exact_fit_does_not_evict() {
    let log = LogBuffer::anonymous(10).unwrap();
    assert_eq!(log.append(b"0123456789").unwrap(), 0);
    assert_eq!(log.used(), 10);
}

#[test]
fn test_entry_larger_than_capacity_is_rejected() {
    let log = LogBuffer::anonymous(64).unwrap();
    log.append(b"kept").unwrap();

    let err = log.append(&[b'x'; 65]).unwrap_err();
    assert!(matches!(err, RelayError::EntryTooLarge { len: 65, capacity: 64 }));
    assert_eq!(log.read_snapshot(), b"kept");
}

#[test]
fn test_drain_resets_buffer() {
    let log = LogBuffer::anonymous(256).unwrap();
    log.append(b"one\n").unwrap();
    log.append(b"two\n").unwrap();

    assert_eq!(log.drain(), b"one\ntwo\n");
    assert_eq!(log.used(), 0);
    assert!(log.drain().is_empty());

    log.append(b"three\n").unwrap();
    assert_eq!(log.read_snapshot(), b"three\n");
}

#[test]
fn test_rendered_message_format() {
    let log = LogBuffer::anonymous(1024).unwrap();
    log.append_message(&Message::chat("alice", "hi all")).unwrap();

    let text = String::from_utf8(log.read_snapshot()).unwrap();
    // [HH:MM:SS] <alice>: hi all
    assert!(text.starts_with('['), "{text:?}");
    assert_eq!(&text[9..], "] <alice>: hi all\n");
    let clock: Vec<&str> = text[1..9].split(':').collect();
    assert_eq!(clock.len(), 3);
    assert!(clock.iter().all(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_digit())));
}

#[test]
fn test_snapshot_timeout_while_locked() {
    let log = LogBuffer::anonymous(128).unwrap();
    log.append(b"x").unwrap();

    let mutex = log.mutex();
    let guard = mutex.lock();
    assert!(mutex.is_locked());
    assert!(log.read_snapshot_timeout(Duration::from_millis(50)).is_none());
    drop(guard);

    assert_eq!(log.read_snapshot_timeout(Duration::from_millis(50)).unwrap(), b"x");
}

#[test]
fn test_concurrent_writers_never_interleave() {
    let log = Arc::new(LogBuffer::anonymous(MIB).unwrap());
    let writers = 4;
    let per_writer = 200;

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..per_writer {
                    let line = format!("writer-{w}-entry-{i:04}\n");
                    log.append(line.as_bytes()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let text = String::from_utf8(log.read_snapshot()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), writers * per_writer);
    for line in &lines {
        assert!(line.starts_with("writer-") && line.len() == "writer-0-entry-0000".len(), "{line:?}");
    }
    for w in 0..writers {
        // each writer's entries appear in its own order
        let own: Vec<&&str> = lines.iter().filter(|l| l.starts_with(&format!("writer-{w}-"))).collect();
        let mut sorted = own.clone();
        sorted.sort();
        assert_eq!(own, sorted);
    }
}

#[test]
fn test_concurrent_writers_survive_eviction() {
    let capacity = 4096;
    let log = Arc::new(LogBuffer::anonymous(capacity).unwrap());
    let writers = 4;
    let per_writer = 2_000;
    let entry_len = "writer-0-entry-0000\n".len();

    fn check(text: &str, entry_len: usize) {
        // the first line may be the tail of an entry cut by the half shift
        for line in text.split_inclusive('\n').skip(1) {
            assert_eq!(line.len(), entry_len, "{line:?}");
            assert!(line.starts_with("writer-") && line.ends_with('\n'), "{line:?}");
            assert_eq!(&line[8..14], "-entry", "{line:?}");
        }
    }

    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..per_writer {
                    let line = format!("writer-{w}-entry-{i:04}\n");
                    log.append(line.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    // snapshots taken mid-eviction must be just as clean
    for _ in 0..200 {
        let snapshot = log.read_snapshot();
        assert!(snapshot.len() <= capacity);
        check(&String::from_utf8(snapshot).unwrap(), entry_len);
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let used = log.used();
    assert!(used <= capacity);
    assert_eq!(log.write_cursor(), used);
    let text = String::from_utf8(log.read_snapshot()).unwrap();
    assert_eq!(text.len(), used);
    assert!(text.ends_with('\n'));
    check(&text, entry_len);
}

#[test]
fn test_drain_with_keeps_contents_on_error() {
    let log = LogBuffer::anonymous(256).unwrap();
    log.append(b"pending\n").unwrap();

    let failed: Result<(), &str> = log.drain_with(|contents| {
        assert_eq!(contents, b"pending\n");
        Err("disk full")
    });
    assert_eq!(failed, Err("disk full"));
    assert_eq!(log.used(), 8);

    let taken: Result<Vec<u8>, ()> = log.drain_with(|contents| Ok(contents.to_vec()));
    assert_eq!(taken.unwrap(), b"pending\n");
    assert_eq!(log.used(), 0);
}

#[test]
fn test_random_appends_stay_within_capacity() {
    let capacity = 4096;
    let log = LogBuffer::anonymous(capacity).unwrap();
    let mut rng = fastrand::Rng::with_seed(0x5eed);

    for round in 0..2_000 {
        let len = rng.usize(1..=600);
        let entry: Vec<u8> = (0..len).map(|_| rng.alphanumeric() as u8).collect();
        log.append(&entry).unwrap();

        let snapshot = log.read_snapshot();
        assert!(snapshot.len() <= capacity, "round {round}");
        assert!(snapshot.ends_with(&entry), "round {round}: newest entry must be intact");
    }
}

#[cfg(target_os = "linux")]
mod named {
    use super::*;
    use chatterbox::Core::{create_shared_memory, unlink_shared_memory};
    use serial_test::serial;

    fn unique(name: &str) -> String {
        format!("chatterbox_test_log_{}_{}", name, std::process::id())
    }

    #[test]
    #[serial]
    fn test_attach_shares_contents() {
        let name = unique("attach");
        let server = LogBuffer::create(&name, 4096).unwrap();
        let client = LogBuffer::attach(&name).unwrap();

        assert_eq!(client.capacity(), 4096);
        assert_eq!(client.name(), Some(name.as_str()));

        server.append(b"from server\n").unwrap();
        client.append(b"from client\n").unwrap();

        assert_eq!(server.read_snapshot(), b"from server\nfrom client\n");
        assert_eq!(client.drain(), b"from server\nfrom client\n");
        assert_eq!(server.used(), 0);

        server.unlink().unwrap();
        assert!(LogBuffer::attach(&name).is_err());
    }

    #[test]
    #[serial]
    fn test_attach_rejects_foreign_region() {
        let name = unique("foreign");
        let _region = create_shared_memory(4096, Some(&name)).unwrap();

        let err = LogBuffer::attach(&name).unwrap_err();
        match err {
            RelayError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::InvalidData),
            other => panic!("unexpected error {other:?}"),
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_attach_missing_region() {
        assert!(LogBuffer::attach(&unique("missing")).is_err());
    }
}
