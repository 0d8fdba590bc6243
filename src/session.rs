//! Per-connection protocol engine.
//!
//! One session per accepted connection: handshake (version window, script
//! match, nickname claim), then the opcode dispatch loop. Every way a
//! session can end — EOF, socket error, idle timeout, protocol desync,
//! being kicked — funnels into the registry's idempotent disconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::constants::{LOBBY, MAX_MESSAGE_LEN, MAX_NAME_LEN, MAX_STAMP_BYTES};
use crate::protocol::opcode::{self, op, SYNC_PROP_OPS};
use crate::protocol::reader::{FrameReader, ReadError};
use crate::protocol::{frames, is_printable, is_valid_name};
use crate::registry::KickDecision;
use crate::server::RelayServer;

/// Chat-window focus sentinel carried in a selected-element frame.
const CHAT_SENTINEL: (u8, u8) = (194, 195);

/// Why the dispatch loop stopped.
enum End {
    /// Transport-level failure or idle timeout.
    Read(ReadError),
    /// Opcode outside the dispatch table; the stream is unrecoverable.
    Desync(u8),
    /// Declared stamp length beyond the absolute cap.
    Oversize,
}

impl From<ReadError> for End {
    fn from(e: ReadError) -> Self {
        End::Read(e)
    }
}

/// Disconnect reason for a failed read.
fn read_end_reason(err: &ReadError) -> &'static str {
    match err {
        ReadError::TimedOut => "Ping timeout",
        ReadError::Disconnected | ReadError::Io(_) => "Disconnected",
    }
}

/// Decode a 3-byte big-endian length.
fn be24(bytes: &[u8]) -> usize {
    (usize::from(bytes[0]) << 16) | (usize::from(bytes[1]) << 8) | usize::from(bytes[2])
}

/// State for one client connection.
pub(crate) struct Session<R> {
    server: Arc<RelayServer>,
    id: u8,
    epoch: u64,
    peer: SocketAddr,
    reader: FrameReader<R>,
    nick: String,
}

impl<R: AsyncRead + Unpin> Session<R> {
    pub fn new(
        server: Arc<RelayServer>,
        id: u8,
        epoch: u64,
        peer: SocketAddr,
        reader: FrameReader<R>,
    ) -> Self {
        Self {
            server,
            id,
            epoch,
            peer,
            reader,
            nick: String::new(),
        }
    }

    /// Drive the session to completion, then disconnect.
    pub async fn run(mut self) {
        let reason = self.drive().await;
        self.server.disconnect_session(self.id, self.epoch, &reason);
    }

    async fn drive(&mut self) -> String {
        match self.handshake().await {
            Ok(true) => {}
            Ok(false) => return "Connection rejected".to_string(),
            Err(reason) => return reason,
        }
        loop {
            let opcode_byte = match self.reader.read_u8().await {
                Ok(b) => b,
                Err(e) => return read_end_reason(&e).to_string(),
            };
            match self.dispatch(opcode_byte).await {
                Ok(()) => {}
                Err(End::Read(e)) => return read_end_reason(&e).to_string(),
                Err(End::Desync(opc)) => {
                    log::warn!(
                        "[Session] Client {} ({}) sent unknown opcode {opc}",
                        self.id,
                        self.nick
                    );
                    return "Protocol desync".to_string();
                }
                Err(End::Oversize) => return "Stamp too large".to_string(),
            }
        }
    }

    /// Queue a frame on this session's own connection.
    fn send_self(&self, frame: Vec<u8>) {
        self.server.send_to(self.id, frame);
    }

    /// Send an error frame and hand back the reason for the disconnect.
    fn refuse(&self, reason: String) -> String {
        self.send_self(frames::error(&reason));
        reason
    }

    /// Handshake: 3 version bytes, then a NUL-terminated nickname.
    ///
    /// Returns `Ok(false)` if the connect hook vetoed the client (silent
    /// termination) and `Err(reason)` after a refusal frame was sent.
    async fn handshake(&mut self) -> Result<bool, String> {
        let header = match self.reader.read_exact(3).await {
            Ok(h) => h,
            Err(e) => return Err(read_end_reason(&e).to_string()),
        };
        let (major, minor, script) = (header[0], header[1], header[2]);
        let nick_bytes = match self.reader.read_until_nul().await {
            Ok(b) => b,
            Err(e) => return Err(read_end_reason(&e).to_string()),
        };

        let cfg = self.server.config();
        let min = (cfg.min_major, cfg.min_minor);
        let max = (cfg.max_major, cfg.max_minor);
        if (major, minor) < min {
            return Err(self.refuse(format!(
                "Client out of date (expected at least {}.{})",
                min.0, min.1
            )));
        }
        if (major, minor) > max {
            return Err(self.refuse(format!(
                "Client too new (expected at most {}.{})",
                max.0, max.1
            )));
        }
        if script != cfg.script_version {
            return Err(self.refuse(format!(
                "Script version mismatch (expected {})",
                cfg.script_version
            )));
        }
        if !is_valid_name(&nick_bytes) {
            return Err(self.refuse("Bad nickname".to_string()));
        }
        if nick_bytes.len() > MAX_NAME_LEN {
            return Err(self.refuse("Nick too long".to_string()));
        }
        let nick = String::from_utf8_lossy(&nick_bytes).into_owned();
        if !self.server.claim_nick(self.id, &nick) {
            return Err(self.refuse("This nick is already on the server".to_string()));
        }
        self.nick = nick;

        self.send_self(frames::HANDSHAKE_OK.to_vec());
        log::info!(
            "[Session] Client {} identified as {} ({})",
            self.id,
            self.nick,
            self.peer
        );
        self.server.hooks().identified(self.id, &self.nick);
        if !self.server.hooks().connect_allowed(self.id, &self.nick) {
            return Ok(false);
        }
        self.server.move_to(self.id, LOBBY);
        Ok(true)
    }

    /// Handle one opcode read from the stream.
    async fn dispatch(&mut self, opcode_byte: u8) -> Result<(), End> {
        match opcode_byte {
            op::PING => {}
            op::JOIN => self.handle_join().await?,
            op::CHAT | op::EMOTE => self.handle_chat(opcode_byte).await?,
            op::KICK => self.handle_kick().await?,
            op::BRUSH_SIZE => {
                let p = self.reader.read_exact(2).await?;
                let frame = frames::relayed(op::BRUSH_SIZE, self.id, &p);
                self.server
                    .update_and_relay(self.id, &frame, |m| m.brush_size = [p[0], p[1]]);
            }
            op::BRUSH_SHAPE => {
                let frame = frames::relayed(op::BRUSH_SHAPE, self.id, &[]);
                self.server
                    .update_and_relay(self.id, &frame, |m| m.brush = (m.brush % 3) + 1);
            }
            op::SELECT_ELEMENT => {
                let p = self.reader.read_exact(2).await?;
                let (a, b) = (p[0], p[1]);
                if (a, b) == CHAT_SENTINEL {
                    self.server.set_chat(self.id);
                } else {
                    let slot = usize::from(a / 64 + 1);
                    let frame = frames::relayed(op::SELECT_ELEMENT, self.id, &p);
                    self.server.update_and_relay(self.id, &frame, |m| {
                        if let Some(sel) = m.selections.get_mut(slot) {
                            *sel = [a, b];
                        }
                    });
                }
            }
            op::REPLACE_MODE => {
                let p = self.reader.read_exact(1).await?;
                let frame = frames::relayed(op::REPLACE_MODE, self.id, &p);
                self.server
                    .update_and_relay(self.id, &frame, |m| m.replace_mode = p[0]);
            }
            op::DECO_COLOR => {
                let p = self.reader.read_exact(4).await?;
                let frame = frames::relayed(op::DECO_COLOR, self.id, &p);
                self.server
                    .update_and_relay(self.id, &frame, |m| m.deco = [p[0], p[1], p[2], p[3]]);
            }
            op::STAMP => self.handle_stamp().await?,
            op::SYNC_REPLY => self.handle_sync_reply().await?,
            op::SYNC_PROPS => {
                let p = self.reader.read_exact(3).await?;
                let (target, command, value) = (p[0], p[1], p[2]);
                if SYNC_PROP_OPS.contains(&command) {
                    self.server.send_to(target, vec![command, self.id, value]);
                }
            }
            other => match opcode::relay_len(other) {
                Some(n) => {
                    let p = self.reader.read_exact(n).await?;
                    self.server
                        .broadcast(self.id, &frames::relayed(other, self.id, &p));
                }
                None => return Err(End::Desync(other)),
            },
        }
        Ok(())
    }

    /// Op 16: move to another room.
    async fn handle_join(&mut self) -> Result<(), End> {
        let name_bytes = self.reader.read_until_nul().await?;
        if !is_valid_name(&name_bytes) || name_bytes.len() > MAX_NAME_LEN {
            self.send_self(frames::server_message("Invalid room name"));
            return Ok(());
        }
        let name = String::from_utf8_lossy(&name_bytes).into_owned();
        if !self.server.hooks().join_allowed(self.id, &name) {
            return Ok(());
        }
        self.server.move_to(self.id, &name);
        Ok(())
    }

    /// Ops 19/20: chat and emote.
    async fn handle_chat(&mut self, opcode_byte: u8) -> Result<(), End> {
        let msg = self.reader.read_until_nul().await?;
        if !is_printable(&msg) || msg.len() > MAX_MESSAGE_LEN {
            self.send_self(frames::server_message("Invalid message"));
            return Ok(());
        }
        let text = String::from_utf8_lossy(&msg).into_owned();
        if !self.server.hooks().message_allowed(self.id, &text) {
            return Ok(());
        }
        self.server.hooks().chat(self.id, &text);
        self.server
            .broadcast(self.id, &frames::relayed_text(opcode_byte, self.id, &msg));
        Ok(())
    }

    /// Op 21: kick a room member by nickname.
    async fn handle_kick(&mut self) -> Result<(), End> {
        let target_nick = self.reader.read_until_nul().await?;
        let reason_bytes = self.reader.read_until_nul().await?;
        if !is_printable(&reason_bytes) || reason_bytes.len() > MAX_MESSAGE_LEN {
            self.send_self(frames::server_message("Invalid kick reason"));
            return Ok(());
        }
        match self.server.kick_decision(self.id, &target_nick) {
            KickDecision::InLobby => {
                self.send_self(frames::server_message(
                    "You are not the operator of this room",
                ));
            }
            KickDecision::NotOperator => {
                self.send_self(frames::server_message("You can't kick people from here"));
            }
            // The request named nobody present; nothing to do.
            KickDecision::NoMatch => {}
            KickDecision::Target(target) => {
                let reason = if reason_bytes.is_empty() {
                    "No reason given".to_string()
                } else {
                    String::from_utf8_lossy(&reason_bytes).into_owned()
                };
                self.server.kick(target, self.id, &self.nick, &reason);
            }
        }
        Ok(())
    }

    /// Op 66: stamp — 3-byte location, 3-byte big-endian length, payload.
    async fn handle_stamp(&mut self) -> Result<(), End> {
        let header = self.reader.read_exact(6).await?;
        let len = be24(&header[3..6]);
        if len > MAX_STAMP_BYTES {
            return Err(End::Oversize);
        }
        let payload = self.reader.read_exact(len).await?;
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.push(op::STAMP);
        frame.push(self.id);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&payload);
        self.server.broadcast(self.id, &frame);
        Ok(())
    }

    /// Op 128: stamp reply to a sync request, forwarded to the requester.
    async fn handle_sync_reply(&mut self) -> Result<(), End> {
        let header = self.reader.read_exact(4).await?;
        let len = be24(&header[1..4]);
        if len > MAX_STAMP_BYTES {
            return Err(End::Oversize);
        }
        let payload = self.reader.read_exact(len).await?;
        let mut frame = Vec::with_capacity(payload.len() + 4);
        frame.push(op::SYNC_STAMP);
        frame.extend_from_slice(&header[1..4]);
        frame.extend_from_slice(&payload);
        // The requester may have raced away; the frame is dropped then.
        self.server.send_to(header[0], frame);
        Ok(())
    }
}
