//! Embedding interface: lifecycle observers and veto hooks.
//!
//! A host process embeds the relay by handing the server a `RelayHooks`
//! trait object. The observer methods are notifications only; the registry
//! remains authoritative for all state. The three `*_allowed` predicates
//! can veto the associated action by returning `false`.
//!
//! All methods have default implementations, so an embedder only overrides
//! what it cares about.

/// Lifecycle observers and veto predicates for an embedding host.
///
/// Observer methods are called from the session and registry while the
/// relevant transition happens; implementations should return quickly.
pub trait RelayHooks: Send + Sync {
    /// A connection was admitted and assigned an id (pre-handshake).
    fn new_client(&self, _id: u8) {}

    /// A client completed the handshake under `nick`.
    fn identified(&self, _id: u8, _nick: &str) {}

    /// A client joined a room.
    fn joined(&self, _id: u8, _room: &str) {}

    /// A client left a room.
    fn parted(&self, _id: u8, _room: &str) {}

    /// A client was removed from the server. Fires exactly once per client.
    fn disconnected(&self, _id: u8, _reason: &str) {}

    /// A client is being kicked by `source`.
    fn kicked(&self, _id: u8, _source: u8, _reason: &str) {}

    /// A chat or emote message passed validation and the message veto.
    fn chat(&self, _id: u8, _text: &str) {}

    /// A room was created (first join).
    fn room_created(&self, _name: &str) {}

    /// A room was deleted (last part).
    fn room_deleted(&self, _name: &str) {}

    /// Veto hook: may `id` stay connected after identifying?
    ///
    /// Returning `false` terminates the connection silently, before the
    /// lobby join.
    fn connect_allowed(&self, _id: u8, _nick: &str) -> bool {
        true
    }

    /// Veto hook: may `id` join `room`? Runs before the part/join pair.
    fn join_allowed(&self, _id: u8, _room: &str) -> bool {
        true
    }

    /// Veto hook: may this chat/emote text be relayed?
    fn message_allowed(&self, _id: u8, _text: &str) -> bool {
        true
    }
}

/// Hooks implementation that observes nothing and allows everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl RelayHooks for NoopHooks {}
