//! Binary wire protocol shared between server and clients.
//!
//! # Framing
//!
//! The stream uses two primitives: exact-length fields and NUL-terminated
//! fields. Every client message starts with a one-byte opcode; the payload
//! length is a function of the opcode. Two opcodes (stamp and sync reply)
//! carry a 3-byte big-endian length prefix followed by that many payload
//! bytes.
//!
//! ```text
//! client → server:  [op] [payload...]
//! server → client:  [op] [origin id] [payload...]   (relayed traffic)
//!                   [22] [text] [0] [r] [g] [b]     (server message)
//!                   [0]  [reason] [0]               (error, then close)
//! ```
//!
//! Text fields are 7-bit printable ASCII (`0x20..=0x7E`), NUL-terminated.
//! Multi-byte integers are big-endian and occur only in the 3-byte length
//! prefixes.
//!
//! See [`opcode`] for the dispatch table, [`frames`] for outbound frame
//! builders and [`reader`] for the buffered inbound reader.

pub mod frames;
pub mod opcode;
pub mod reader;

/// Check a nickname or room name: `^[A-Za-z0-9_-]+$`.
///
/// Length limits are enforced separately by the caller.
pub fn is_valid_name(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Check that text is 7-bit printable ASCII (`0x20..=0x7E`), possibly empty.
pub fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| (0x20..=0x7E).contains(&b))
}
