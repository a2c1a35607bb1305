//! Snapshot persistence: save/load round trips, log replay verification,
//! and corruption detection

use std::io::{Read, Write};
use uuid::Uuid;
use weft_core::crypto::SealKey;
use weft_core::state::{decode_state, encode_state};
use weft_core::{ChannelId, Engine, Error, PeerId, Receipt};

fn channel() -> ChannelId {
    ChannelId(Uuid::from_bytes([3; 16]))
}

fn peer(n: u8) -> PeerId {
    PeerId([n; 32])
}

/// Three peers with a few exchanged edits; returns them fully synced.
fn synced_trio() -> (Engine, Engine, Engine) {
    let mut a = Engine::new_peer(peer(1), channel());
    let mut b = Engine::new_peer(peer(2), channel());
    let mut c = Engine::new_peer(peer(3), channel());

    a.insert_char(0, 'o').unwrap();
    a.insert_char(1, 'k').unwrap();
    let m0 = a.encode_message().unwrap().unwrap();
    b.receive_message(peer(1), 1, 0, &m0).unwrap();
    c.receive_message(peer(1), 1, 0, &m0).unwrap();

    b.insert_char(2, '!').unwrap();
    b.set_cursor(3).unwrap();
    let m1 = b.encode_message().unwrap().unwrap();
    a.receive_message(peer(2), 1, 1, &m1).unwrap();
    c.receive_message(peer(2), 1, 1, &m1).unwrap();

    c.delete_char(0).unwrap();
    let m2 = c.encode_message().unwrap().unwrap();
    a.receive_message(peer(3), 1, 2, &m2).unwrap();
    b.receive_message(peer(3), 1, 2, &m2).unwrap();

    assert_eq!(a.document(), "k!");
    assert_eq!(b.document(), "k!");
    assert_eq!(c.document(), "k!");
    (a, b, c)
}

#[test]
fn load_restores_identical_observable_state() {
    let (mut a, _, _) = synced_trio();

    let bytes = a.save().unwrap();
    let restored = Engine::load(&bytes).unwrap();

    assert_eq!(restored.document(), a.document());
    assert_eq!(restored.peer_id(), a.peer_id());
    assert_eq!(restored.peer_entries(), a.peer_entries());
    assert_eq!(restored.cursor_of(&peer(2)), a.cursor_of(&peer(2)));
    assert_eq!(restored.last_sent_seq(), a.last_sent_seq());
    assert_eq!(restored.channel_offset(), a.channel_offset());
    assert_eq!(restored.log_len(), a.log_len());
    assert_eq!(restored.default_schema(), a.default_schema());
}

#[test]
fn restored_engine_keeps_editing_and_syncing() {
    let (mut a, mut b, _) = synced_trio();

    let bytes = a.save().unwrap();
    let mut restored = Engine::load(&bytes).unwrap();

    restored.insert_char(2, '?').unwrap();
    let m = restored.encode_message().unwrap().unwrap();
    assert_eq!(restored.last_sent_seq(), 2);

    b.receive_message(peer(1), 2, 3, &m).unwrap();
    assert_eq!(b.document(), restored.document());
}

#[test]
fn snapshot_survives_a_disk_round_trip() {
    let (mut a, _, _) = synced_trio();
    let bytes = a.save().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("peer.state");
    std::fs::File::create(&path).unwrap().write_all(&bytes).unwrap();

    let mut read_back = Vec::new();
    std::fs::File::open(&path).unwrap().read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, bytes);

    let restored = Engine::load(&read_back).unwrap();
    assert_eq!(restored.document(), "k!");
}

#[test]
fn save_frames_unsent_edits_for_retransmission() {
    let key = SealKey::random();
    let mut writer = Engine::new_peer(peer(1), channel());
    writer.set_secret_key(key);
    writer.insert_char(0, 'q').unwrap();

    // Never encoded before saving; the snapshot frames it itself.
    let bytes = writer.save().unwrap();
    let restored = Engine::load(&bytes).unwrap();
    assert_eq!(restored.document(), "q");

    let unacked = restored.unacknowledged().unwrap();
    assert_eq!(unacked.len(), 1);
    let (seq, sealed) = &unacked[0];
    assert_eq!(*seq, 1);

    // The retransmitted payload is a normal sealed message.
    let mut reader = Engine::new_peer(peer(2), channel());
    reader.set_secret_key(key);
    assert_eq!(reader.receive_message(peer(1), *seq, 0, sealed).unwrap(), Receipt::Applied);
    assert_eq!(reader.document(), "q");
}

#[test]
fn phantom_peer_row_refuses_to_load() {
    let (mut a, _, _) = synced_trio();
    let bytes = a.save().unwrap();

    let mut snapshot = decode_state(&bytes).unwrap();
    let mut extra = snapshot.peers[1].clone();
    extra.peer = peer(9);
    snapshot.peers.push(extra);
    let tampered = encode_state(&snapshot).unwrap();

    // Replay never encounters the phantom peer, so the orders disagree.
    assert!(matches!(Engine::load(&tampered), Err(Error::IndexMismatch)));
}

#[test]
fn out_of_range_sender_index_refuses_to_load() {
    let (mut a, _, _) = synced_trio();
    let bytes = a.save().unwrap();

    let mut snapshot = decode_state(&bytes).unwrap();
    snapshot.log[0].sender_index = 42;
    let tampered = encode_state(&snapshot).unwrap();

    assert!(matches!(Engine::load(&tampered), Err(Error::IndexMismatch)));
}

#[test]
fn reordered_peer_rows_refuse_to_load() {
    let (mut a, _, _) = synced_trio();
    let bytes = a.save().unwrap();

    let mut snapshot = decode_state(&bytes).unwrap();
    assert!(snapshot.peers.len() >= 3);
    snapshot.peers.swap(1, 2);
    let tampered = encode_state(&snapshot).unwrap();

    // Swapping rows reattributes every wire index in the log, so the
    // replayed document no longer matches the persisted one.
    assert!(Engine::load(&tampered).is_err());
}

#[test]
fn tampered_document_refuses_to_load() {
    let (mut a, _, _) = synced_trio();
    let bytes = a.save().unwrap();

    let mut snapshot = decode_state(&bytes).unwrap();
    let dropped = snapshot.data.items.pop().unwrap();
    assert!(dropped.value.is_some());
    let tampered = encode_state(&snapshot).unwrap();

    assert!(matches!(Engine::load(&tampered), Err(Error::SnapshotMismatch)));
}

#[test]
fn truncated_snapshot_is_a_serialization_error() {
    let (mut a, _, _) = synced_trio();
    let bytes = a.save().unwrap();
    assert!(matches!(
        Engine::load(&bytes[..bytes.len() / 2]),
        Err(Error::Serialization(_))
    ));
}
