//! Builders for server-originated frames.
//!
//! Every builder returns a complete encoded frame ready to hand to a
//! connection's write task.

use super::opcode::op;

/// Default server-message color (pale cyan).
pub const MESSAGE_COLOR: (u8, u8, u8) = (127, 255, 255);

/// Color used for kick notices.
pub const KICK_COLOR: (u8, u8, u8) = (255, 50, 50);

/// The single acknowledgement byte sent after a successful handshake.
pub const HANDSHAKE_OK: [u8; 1] = [1];

/// Error frame sent before closing a connection: `[0, reason, 0]`.
pub fn error(reason: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(reason.len() + 2);
    buf.push(0);
    buf.extend_from_slice(reason.as_bytes());
    buf.push(0);
    buf
}

/// Server message in the default color.
pub fn server_message(text: &str) -> Vec<u8> {
    let (r, g, b) = MESSAGE_COLOR;
    server_message_rgb(text, r, g, b)
}

/// Server message frame: `[22, text, 0, r, g, b]`.
pub fn server_message_rgb(text: &str, r: u8, g: u8, b: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 5);
    buf.push(op::SERVER_MESSAGE);
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
    buf.push(r);
    buf.push(g);
    buf.push(b);
    buf
}

/// Relayed frame: `[op, origin id, payload]`.
pub fn relayed(opcode: u8, from: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 2);
    buf.push(opcode);
    buf.push(from);
    buf.extend_from_slice(payload);
    buf
}

/// Relayed text frame with trailing NUL: `[op, origin id, text, 0]`.
pub fn relayed_text(opcode: u8, from: u8, text: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 3);
    buf.push(opcode);
    buf.push(from);
    buf.extend_from_slice(text);
    buf.push(0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frame() {
        assert_eq!(error("nope"), b"\x00nope\x00");
    }

    #[test]
    fn test_server_message_layout() {
        let frame = server_message_rgb("hi", 1, 2, 3);
        assert_eq!(frame, [22, b'h', b'i', 0, 1, 2, 3]);
    }

    #[test]
    fn test_server_message_default_color() {
        let frame = server_message("x");
        assert_eq!(&frame[frame.len() - 3..], &[127u8, 255, 255][..]);
    }

    #[test]
    fn test_relayed_rewrites_origin() {
        assert_eq!(relayed(32, 7, &[1, 2, 3]), [32, 7, 1, 2, 3]);
        assert_eq!(relayed(35, 0, &[]), [35, 0]);
    }

    #[test]
    fn test_relayed_text_is_nul_terminated() {
        assert_eq!(relayed_text(19, 0, b"hi"), [19, 0, b'h', b'i', 0]);
    }
}
