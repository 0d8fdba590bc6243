//! Application-wide constants for powder-relay.
//!
//! Centralizes protocol limits and defaults so they are discoverable in
//! one place. Constants are grouped by domain.

use std::time::Duration;

// ============================================================================
// Capacity
// ============================================================================

/// Hard cap on concurrent clients.
///
/// Client ids are single bytes on the wire, so the id space is `[0, 255)`.
pub const MAX_CLIENTS: usize = 255;

/// Maximum nickname (and room name) length in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Maximum chat / emote / kick-reason length in bytes.
pub const MAX_MESSAGE_LEN: usize = 200;

/// Absolute cap on a stamp payload.
///
/// The wire format already bounds stamps to 16 MiB - 1 via the 3-byte
/// length prefix; this tighter cap bounds per-connection memory.
pub const MAX_STAMP_BYTES: usize = 4 * 1024 * 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// Default idle read timeout.
///
/// A connection that produces no bytes for this long is closed with
/// reason "Ping timeout". Clients send a ping opcode periodically to
/// stay under it.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

// ============================================================================
// Protocol defaults
// ============================================================================

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 34403;

/// Default bind host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default minimum accepted client version (major, minor).
pub const DEFAULT_VERSION_MIN: (u8, u8) = (1, 0);

/// Default maximum accepted client version (major, minor).
pub const DEFAULT_VERSION_MAX: (u8, u8) = (1, 9);

/// Default required script version (exact match).
pub const DEFAULT_SCRIPT_VERSION: u8 = 0;

/// Name of the implicit lobby room every client joins after identifying.
pub const LOBBY: &str = "null";
