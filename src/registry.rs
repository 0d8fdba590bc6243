//! Global client and room tables.
//!
//! The registry owns every lifecycle transition: admission, identification,
//! join/part, kick targeting and disconnect. The server wraps it in a
//! single mutex held only for table edits and replay composition, which is
//! what makes the join replay atomic with respect to concurrent
//! broadcasts: a joiner's bootstrap frames are queued before any later
//! frame from an existing peer can be.
//!
//! Outbound delivery is a `send` on each recipient's unbounded frame
//! channel, so fan-out never blocks on a slow peer.

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use crate::constants::{LOBBY, MAX_CLIENTS};
use crate::hooks::RelayHooks;
use crate::protocol::frames;
use crate::protocol::opcode::op;
use crate::room::Room;

/// Per-client state mirrored from relayed traffic, replayed to joiners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    /// Brush shape as steps from the initial shape (0..=3).
    pub brush: u8,
    /// Brush size, 2 bytes.
    pub brush_size: [u8; 2],
    /// Brush selections, 2 bytes each.
    pub selections: [[u8; 2]; 4],
    /// Replace mode byte.
    pub replace_mode: u8,
    /// Decoration color, RGBA.
    pub deco: [u8; 4],
}

impl Default for Mirror {
    fn default() -> Self {
        Self {
            brush: 0,
            brush_size: [4, 4],
            selections: [[0, 1], [64, 0], [128, 0], [192, 0]],
            replace_mode: b'0',
            deco: [0; 4],
        }
    }
}

/// Registry entry for one connected client.
pub(crate) struct ClientEntry {
    /// Admission epoch, unique per connection. Ids are reused after
    /// disconnect; the epoch lets a session's final teardown distinguish
    /// its own incarnation from a successor holding the same id.
    pub epoch: u64,
    /// Nickname; empty until the handshake completes.
    pub nick: String,
    /// Sender feeding the connection's write task.
    pub tx: UnboundedSender<Vec<u8>>,
    /// Current room, if any.
    pub room: Option<String>,
    /// Mirrored brush state.
    pub mirror: Mirror,
    /// Set when the client selected the chat pseudo-element; such clients
    /// are skipped as sync sources.
    pub is_chat: bool,
}

/// Outcome of locating a kick target.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum KickDecision {
    /// Kicking is forbidden in the lobby.
    InLobby,
    /// The requester does not hold operator authority.
    NotOperator,
    /// No member carries that nickname; the request is ignored.
    NoMatch,
    /// First member matching the nickname.
    Target(u8),
}

/// Client and room tables. All methods run under the server's mutex.
#[derive(Default)]
pub(crate) struct Registry {
    clients: HashMap<u8, ClientEntry>,
    rooms: HashMap<String, Room>,
    admissions: u64,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("clients", &self.clients.len())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

impl Registry {
    /// Admit a connection: allocate the lowest free id.
    ///
    /// Returns `(id, epoch)` on success, or the current client count if
    /// the server is full.
    pub fn admit(
        &mut self,
        tx: UnboundedSender<Vec<u8>>,
        hooks: &dyn RelayHooks,
    ) -> Result<(u8, u64), usize> {
        let Some(id) = (0..MAX_CLIENTS as u8).find(|i| !self.clients.contains_key(i)) else {
            return Err(self.clients.len());
        };
        self.admissions += 1;
        let epoch = self.admissions;
        self.clients.insert(
            id,
            ClientEntry {
                epoch,
                nick: String::new(),
                tx,
                room: None,
                mirror: Mirror::default(),
                is_chat: false,
            },
        );
        hooks.new_client(id);
        Ok((id, epoch))
    }

    /// Claim a nickname for `id`.
    ///
    /// Fails if any other connected client already holds it.
    pub fn set_nick(&mut self, id: u8, nick: &str) -> bool {
        if self
            .clients
            .iter()
            .any(|(&other, e)| other != id && e.nick == nick)
        {
            return false;
        }
        match self.clients.get_mut(&id) {
            Some(entry) => {
                entry.nick = nick.to_string();
                true
            }
            None => false,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn has_client(&self, id: u8) -> bool {
        self.clients.contains_key(&id)
    }

    /// Mutate the mirrored brush state of a client.
    pub fn update_mirror(&mut self, id: u8, f: impl FnOnce(&mut Mirror)) {
        if let Some(entry) = self.clients.get_mut(&id) {
            f(&mut entry.mirror);
        }
    }

    /// Flag a client as sitting in the chat window.
    pub fn set_chat(&mut self, id: u8) {
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.is_chat = true;
        }
    }

    /// Queue a frame for one client. Returns `false` if the client is gone.
    pub fn send_to(&self, id: u8, frame: Vec<u8>) -> bool {
        match self.clients.get(&id) {
            Some(entry) => entry.tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Fan a frame out to every member of `from`'s room except `from`.
    pub fn broadcast(&self, from: u8, frame: &[u8]) {
        let Some(name) = self.clients.get(&from).and_then(|e| e.room.as_deref()) else {
            return;
        };
        let Some(room) = self.rooms.get(name) else {
            return;
        };
        for &member in room.members() {
            if member == from {
                continue;
            }
            if let Some(entry) = self.clients.get(&member) {
                let _ = entry.tx.send(frame.to_vec());
            }
        }
    }

    /// Join `id` to the room `name`, creating it if absent.
    ///
    /// Streams the bootstrap replay to the joiner, notifies existing
    /// members, issues the sync request, then adds the joiner to the
    /// member set — in that order, so the joiner never sees itself in the
    /// roster and existing members are notified exactly once.
    pub fn join_room(&mut self, id: u8, name: &str, hooks: &dyn RelayHooks) {
        let Self { clients, rooms, .. } = self;
        let Some(joiner) = clients.get(&id) else {
            return;
        };
        let joiner_tx = joiner.tx.clone();
        let joiner_nick = joiner.nick.clone();

        if !rooms.contains_key(name) {
            rooms.insert(name.to_string(), Room::new(name));
            log::info!("[Room] Created {name}");
            hooks.room_created(name);
        }
        let Some(room) = rooms.get_mut(name) else {
            return;
        };
        if room.is_member(id) {
            return;
        }

        hooks.joined(id, name);

        // Bootstrap replay: roster, then each member's mirrored state.
        let members: Vec<u8> = room.members().to_vec();
        let _ = joiner_tx.send(vec![op::JOIN, members.len() as u8]);
        for &m in &members {
            let Some(entry) = clients.get(&m) else { continue };
            let mut f = Vec::with_capacity(entry.nick.len() + 2);
            f.push(m);
            f.extend_from_slice(entry.nick.as_bytes());
            f.push(0);
            let _ = joiner_tx.send(f);
        }
        for &m in &members {
            let Some(entry) = clients.get(&m) else { continue };
            let mirror = &entry.mirror;
            // The joiner's shape counter starts at zero; one shape-change
            // frame per accumulated step drives it to the member's value.
            for _ in 0..mirror.brush {
                let _ = joiner_tx.send(frames::relayed(op::BRUSH_SHAPE, m, &[]));
            }
            let _ = joiner_tx.send(frames::relayed(op::BRUSH_SIZE, m, &mirror.brush_size));
            for sel in &mirror.selections {
                let _ = joiner_tx.send(frames::relayed(op::SELECT_ELEMENT, m, sel));
            }
            let _ = joiner_tx.send(frames::relayed(op::REPLACE_MODE, m, &[mirror.replace_mode]));
            let _ = joiner_tx.send(frames::relayed(op::DECO_COLOR, m, &mirror.deco));
        }

        // Announce the joiner to everyone already present.
        let notice = frames::relayed_text(op::MEMBER_JOINED, id, joiner_nick.as_bytes());
        for &m in &members {
            if let Some(entry) = clients.get(&m) {
                let _ = entry.tx.send(notice.clone());
            }
        }

        // Ask one non-chat member to send the joiner a world snapshot.
        let sync_source = members
            .iter()
            .copied()
            .find(|m| clients.get(m).is_some_and(|e| !e.is_chat));
        if let Some(source) = sync_source {
            if let Some(entry) = clients.get(&source) {
                let _ = entry.tx.send(vec![op::SYNC_REPLY, id]);
            }
        }

        room.add(id);
        if let Some(entry) = clients.get_mut(&id) {
            entry.room = Some(name.to_string());
        }
        log::info!("[Room] {joiner_nick} (id {id}) joined {name}");
    }

    /// Remove `id` from its current room, if any.
    pub fn part_room(&mut self, id: u8, hooks: &dyn RelayHooks) {
        let Some(entry) = self.clients.get_mut(&id) else {
            return;
        };
        let Some(name) = entry.room.take() else {
            return;
        };
        self.part_from(id, &name, hooks);
    }

    /// Part logic shared by explicit parts and disconnect teardown.
    fn part_from(&mut self, id: u8, name: &str, hooks: &dyn RelayHooks) {
        hooks.parted(id, name);
        let Self { clients, rooms, .. } = self;
        let Some(room) = rooms.get_mut(name) else {
            return;
        };
        if !room.remove(id) {
            return;
        }
        let notice = frames::relayed(op::MEMBER_PARTED, id, &[]);
        for &member in room.members() {
            if let Some(entry) = clients.get(&member) {
                let _ = entry.tx.send(notice.clone());
            }
        }
        if room.is_empty() {
            rooms.remove(name);
            log::info!("[Room] Deleted {name}");
            hooks.room_deleted(name);
        }
    }

    /// Remove a client only if it is still the incarnation admitted under
    /// `epoch`.
    ///
    /// Used by a session's own teardown: by the time a kicked session
    /// observes its socket closing, the id may already belong to a new
    /// connection, which must not be torn down in its place.
    pub fn disconnect_epoch(
        &mut self,
        id: u8,
        epoch: u64,
        reason: &str,
        hooks: &dyn RelayHooks,
    ) -> bool {
        if self.clients.get(&id).is_none_or(|e| e.epoch != epoch) {
            return false;
        }
        self.disconnect(id, reason, hooks)
    }

    /// Remove a client from the server.
    ///
    /// Idempotent: returns `false` (emitting nothing) if the client is
    /// already gone. Releases the id and nickname, then parts the room.
    pub fn disconnect(&mut self, id: u8, reason: &str, hooks: &dyn RelayHooks) -> bool {
        let Some(entry) = self.clients.remove(&id) else {
            return false;
        };
        if entry.nick.is_empty() {
            log::info!("[Registry] Client {id} disconnected: {reason}");
        } else {
            log::info!(
                "[Registry] Client {id} ({}) disconnected: {reason}",
                entry.nick
            );
        }
        hooks.disconnected(id, reason);
        if let Some(name) = entry.room {
            self.part_from(id, &name, hooks);
        }
        true
    }

    /// Locate the target of a kick request from `source`.
    pub fn kick_decision(&self, source: u8, nick: &[u8]) -> KickDecision {
        let Some(name) = self.clients.get(&source).and_then(|e| e.room.as_deref()) else {
            return KickDecision::NoMatch;
        };
        if name == LOBBY {
            return KickDecision::InLobby;
        }
        let Some(room) = self.rooms.get(name) else {
            return KickDecision::NoMatch;
        };
        if !room.is_op(source) {
            return KickDecision::NotOperator;
        }
        // First match wins; at most one kick per request.
        room.members()
            .iter()
            .copied()
            .find(|m| {
                self.clients
                    .get(m)
                    .is_some_and(|e| e.nick.as_bytes() == nick)
            })
            .map_or(KickDecision::NoMatch, KickDecision::Target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use std::sync::Mutex;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    /// Hooks impl recording every emission for assertion.
    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<String>>,
    }

    impl RecordingHooks {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl RelayHooks for RecordingHooks {
        fn new_client(&self, id: u8) {
            self.push(format!("new:{id}"));
        }
        fn joined(&self, id: u8, room: &str) {
            self.push(format!("join:{id}:{room}"));
        }
        fn parted(&self, id: u8, room: &str) {
            self.push(format!("part:{id}:{room}"));
        }
        fn disconnected(&self, id: u8, reason: &str) {
            self.push(format!("disconnect:{id}:{reason}"));
        }
        fn room_created(&self, name: &str) {
            self.push(format!("room+:{name}"));
        }
        fn room_deleted(&self, name: &str) {
            self.push(format!("room-:{name}"));
        }
    }

    fn admit(reg: &mut Registry, nick: &str) -> (u8, UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (id, _epoch) = reg.admit(tx, &NoopHooks).unwrap();
        assert!(reg.set_nick(id, nick));
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Ok(f) = rx.try_recv() {
            frames.push(f);
        }
        frames
    }

    #[test]
    fn test_lowest_free_id_allocation_and_reuse() {
        let mut reg = Registry::default();
        let (id0, _rx0) = admit(&mut reg, "a");
        let (id1, _rx1) = admit(&mut reg, "b");
        let (id2, _rx2) = admit(&mut reg, "c");
        assert_eq!((id0, id1, id2), (0, 1, 2));

        assert!(reg.disconnect(1, "bye", &NoopHooks));
        let (reused, _rx) = admit(&mut reg, "d");
        assert_eq!(reused, 1);
    }

    #[test]
    fn test_admission_cap() {
        let mut reg = Registry::default();
        let mut receivers = Vec::new();
        for i in 0..MAX_CLIENTS {
            let (id, rx) = admit(&mut reg, &format!("n{i}"));
            assert_eq!(id as usize, i);
            receivers.push(rx);
        }
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(reg.admit(tx, &NoopHooks), Err(MAX_CLIENTS));
    }

    #[test]
    fn test_nick_uniqueness() {
        let mut reg = Registry::default();
        let (_id0, _rx0) = admit(&mut reg, "alice");
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id1, _epoch) = reg.admit(tx, &NoopHooks).unwrap();
        assert!(!reg.set_nick(id1, "alice"));
        // Released on disconnect
        assert!(reg.disconnect(0, "bye", &NoopHooks));
        assert!(reg.set_nick(id1, "alice"));
    }

    #[test]
    fn test_join_replay_sequence() {
        let mut reg = Registry::default();
        let (id0, mut rx0) = admit(&mut reg, "alice");
        reg.join_room(id0, "r1", &NoopHooks);
        reg.update_mirror(id0, |m| {
            m.brush = 2;
            m.brush_size = [5, 5];
            m.deco = [10, 20, 30, 40];
        });
        drain(&mut rx0);

        let (id1, mut rx1) = admit(&mut reg, "bob");
        reg.join_room(id1, "r1", &NoopHooks);

        let frames = drain(&mut rx1);
        let expected: Vec<Vec<u8>> = vec![
            vec![16, 1],
            b"\x00alice\x00".to_vec(),
            vec![35, 0],
            vec![35, 0],
            vec![34, 0, 5, 5],
            vec![37, 0, 0, 1],
            vec![37, 0, 64, 0],
            vec![37, 0, 128, 0],
            vec![37, 0, 192, 0],
            vec![38, 0, b'0'],
            vec![65, 0, 10, 20, 30, 40],
        ];
        assert_eq!(frames, expected);

        // Existing member sees the join notice and the sync request.
        let frames = drain(&mut rx0);
        assert_eq!(frames, vec![b"\x11\x01bob\x00".to_vec(), vec![128, 1]]);
    }

    #[test]
    fn test_sync_request_skips_chat_members() {
        let mut reg = Registry::default();
        let (id0, mut rx0) = admit(&mut reg, "a");
        reg.join_room(id0, "r1", &NoopHooks);
        reg.set_chat(id0);
        drain(&mut rx0);

        let (id1, _rx1) = admit(&mut reg, "b");
        reg.join_room(id1, "r1", &NoopHooks);

        let frames = drain(&mut rx0);
        assert!(
            !frames.contains(&vec![128, id1]),
            "chat member must not be asked to sync: {frames:?}"
        );
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let mut reg = Registry::default();
        let (id0, mut rx0) = admit(&mut reg, "a");
        let (id1, mut rx1) = admit(&mut reg, "b");
        reg.join_room(id0, "r1", &NoopHooks);
        reg.join_room(id1, "r1", &NoopHooks);
        drain(&mut rx0);
        drain(&mut rx1);

        reg.broadcast(id0, &[19, 0, b'h', b'i', 0]);
        assert!(drain(&mut rx0).is_empty());
        assert_eq!(drain(&mut rx1), vec![vec![19, 0, b'h', b'i', 0]]);
    }

    #[test]
    fn test_part_broadcasts_and_reelects() {
        let mut reg = Registry::default();
        let (id0, mut rx0) = admit(&mut reg, "a");
        let (id1, mut rx1) = admit(&mut reg, "b");
        reg.join_room(id0, "r1", &NoopHooks);
        reg.join_room(id1, "r1", &NoopHooks);
        drain(&mut rx0);
        drain(&mut rx1);

        reg.part_room(id0, &NoopHooks);
        assert_eq!(drain(&mut rx1), vec![vec![18, id0]]);
        assert_eq!(
            reg.kick_decision(id1, b"nobody"),
            KickDecision::NoMatch,
            "survivor must have been promoted to operator"
        );
    }

    #[test]
    fn test_join_then_part_deletes_room() {
        let hooks = RecordingHooks::default();
        let mut reg = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _epoch) = reg.admit(tx, &hooks).unwrap();
        assert!(reg.set_nick(id, "solo"));

        reg.join_room(id, "r1", &hooks);
        reg.part_room(id, &hooks);

        assert_eq!(reg.room_count(), 0);
        assert_eq!(
            hooks.take(),
            vec!["new:0", "room+:r1", "join:0:r1", "part:0:r1", "room-:r1"]
        );
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let hooks = RecordingHooks::default();
        let mut reg = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, _epoch) = reg.admit(tx, &hooks).unwrap();
        reg.join_room(id, "r1", &hooks);
        hooks.take();

        assert!(reg.disconnect(id, "bye", &hooks));
        assert_eq!(
            hooks.take(),
            vec!["disconnect:0:bye", "part:0:r1", "room-:r1"]
        );

        assert!(!reg.disconnect(id, "bye", &hooks));
        assert!(hooks.take().is_empty(), "no duplicate events");
    }

    #[test]
    fn test_kick_decisions() {
        let mut reg = Registry::default();
        let (id0, _rx0) = admit(&mut reg, "alice");
        let (id1, _rx1) = admit(&mut reg, "bob");
        reg.join_room(id0, LOBBY, &NoopHooks);
        reg.join_room(id1, LOBBY, &NoopHooks);

        assert_eq!(reg.kick_decision(id0, b"bob"), KickDecision::InLobby);

        reg.part_room(id0, &NoopHooks);
        reg.part_room(id1, &NoopHooks);
        reg.join_room(id0, "r1", &NoopHooks);
        reg.join_room(id1, "r1", &NoopHooks);

        assert_eq!(reg.kick_decision(id1, b"alice"), KickDecision::NotOperator);
        assert_eq!(reg.kick_decision(id0, b"ghost"), KickDecision::NoMatch);
        assert_eq!(reg.kick_decision(id0, b"bob"), KickDecision::Target(id1));
    }

    #[test]
    fn test_disconnect_epoch_ignores_reused_id() {
        let mut reg = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, old_epoch) = reg.admit(tx, &NoopHooks).unwrap();
        assert!(reg.disconnect(id, "Kicked", &NoopHooks));

        // Same id, new connection
        let (tx, _rx) = mpsc::unbounded_channel();
        let (reused, new_epoch) = reg.admit(tx, &NoopHooks).unwrap();
        assert_eq!(reused, id);
        assert_ne!(old_epoch, new_epoch);

        // The dead session's teardown must not touch the newcomer
        assert!(!reg.disconnect_epoch(id, old_epoch, "Disconnected", &NoopHooks));
        assert!(reg.has_client(id));
        assert!(reg.disconnect_epoch(id, new_epoch, "Disconnected", &NoopHooks));
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut reg = Registry::default();
        let (id0, mut rx0) = admit(&mut reg, "a");
        reg.join_room(id0, "r1", &NoopHooks);
        drain(&mut rx0);

        reg.join_room(id0, "r1", &NoopHooks);
        assert!(drain(&mut rx0).is_empty(), "no second replay");
    }
}
