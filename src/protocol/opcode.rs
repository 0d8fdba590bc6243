//! Opcode constants and the fixed relay-length table.

/// Opcodes exchanged with clients.
///
/// Client-originated opcodes are rewritten as `[op, origin id, payload]`
/// before fan-out; a few (16-21, 128, 130) are commands the server acts on
/// instead of relaying verbatim.
pub mod op {
    /// Keepalive; resets the idle timer by virtue of being read.
    pub const PING: u8 = 2;
    /// Join a named room (client→server); roster header (server→client).
    pub const JOIN: u8 = 16;
    /// A member joined the room (server→client).
    pub const MEMBER_JOINED: u8 = 17;
    /// A member left the room (server→client).
    pub const MEMBER_PARTED: u8 = 18;
    /// Chat message.
    pub const CHAT: u8 = 19;
    /// Emote message (rendered as `* text` by clients).
    pub const EMOTE: u8 = 20;
    /// Kick a member by nickname (room operator only).
    pub const KICK: u8 = 21;
    /// Server notice with an RGB color (server→client).
    pub const SERVER_MESSAGE: u8 = 22;

    /// Brush size, 2 bytes; mirrored for replay.
    pub const BRUSH_SIZE: u8 = 34;
    /// Brush shape step; mirrored as a counter for replay.
    pub const BRUSH_SHAPE: u8 = 35;
    /// Selected element, 2 bytes; mirrored for replay. `(194, 195)` is the
    /// chat-window sentinel.
    pub const SELECT_ELEMENT: u8 = 37;
    /// Replace mode, 1 byte; mirrored for replay.
    pub const REPLACE_MODE: u8 = 38;
    /// Decoration color RGBA, 4 bytes; mirrored for replay.
    pub const DECO_COLOR: u8 = 65;
    /// Stamp: 3-byte location, 3-byte big-endian length, payload.
    pub const STAMP: u8 = 66;

    /// Stamp reply to a sync request: `[target, len(3)]` then payload.
    pub const SYNC_REPLY: u8 = 128;
    /// Forwarded sync stamp (server→client).
    pub const SYNC_STAMP: u8 = 129;
    /// Property reply to a sync request: `[target, command, value]`.
    pub const SYNC_PROPS: u8 = 130;
}

/// Opcodes legal inside a sync-properties reply (op 130).
///
/// The whitelist is exactly the mirrored-state opcodes: anything else a
/// peer claims to forward is dropped.
pub const SYNC_PROP_OPS: [u8; 5] = [
    op::BRUSH_SIZE,
    op::BRUSH_SHAPE,
    op::SELECT_ELEMENT,
    op::REPLACE_MODE,
    op::DECO_COLOR,
];

/// Payload length for opcodes the server relays without inspecting.
///
/// Returns `None` for opcodes that carry state, take variable payloads or
/// are commands; those are dispatched individually.
pub fn relay_len(opcode: u8) -> Option<usize> {
    match opcode {
        // mouse position / manual graphics / load save id
        32 | 64 | 69 => Some(3),
        // clear area
        67 => Some(6),
        // mouse click, modifier, cmode default, pause, deco mode, HUD mode,
        // ambient heat, newtonian gravity, debug, legacy heat, water eq,
        // gravity mode, air mode, edge mode
        33 | 36 | 48 | 49 | 51 | 52 | 53 | 54 | 55 | 56 | 57 | 58 | 59 | 68 => Some(1),
        // step frame, clear sparks/pressure, invert pressure, clear sim,
        // reload save
        50 | 60 | 61 | 62 | 63 | 70 => Some(0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_table_excludes_commands_and_mirrored_state() {
        for opcode in [
            op::PING,
            op::JOIN,
            op::CHAT,
            op::EMOTE,
            op::KICK,
            op::BRUSH_SIZE,
            op::BRUSH_SHAPE,
            op::SELECT_ELEMENT,
            op::REPLACE_MODE,
            op::DECO_COLOR,
            op::STAMP,
            op::SYNC_REPLY,
            op::SYNC_PROPS,
        ] {
            assert_eq!(relay_len(opcode), None, "opcode {opcode}");
        }
    }

    #[test]
    fn test_relay_table_lengths() {
        assert_eq!(relay_len(32), Some(3));
        assert_eq!(relay_len(33), Some(1));
        assert_eq!(relay_len(50), Some(0));
        assert_eq!(relay_len(67), Some(6));
        assert_eq!(relay_len(70), Some(0));
        assert_eq!(relay_len(200), None);
    }

    #[test]
    fn test_sync_prop_whitelist_is_mirrored_state() {
        assert!(SYNC_PROP_OPS.contains(&op::BRUSH_SIZE));
        assert!(SYNC_PROP_OPS.contains(&op::BRUSH_SHAPE));
        assert!(SYNC_PROP_OPS.contains(&op::SELECT_ELEMENT));
        assert!(SYNC_PROP_OPS.contains(&op::REPLACE_MODE));
        assert!(SYNC_PROP_OPS.contains(&op::DECO_COLOR));
        assert!(!SYNC_PROP_OPS.contains(&op::CHAT));
    }
}
