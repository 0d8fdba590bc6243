//! TCP accept loop and shared server state.
//!
//! `RelayServer` owns the configuration, the embedding hooks and the
//! registry mutex. Each accepted connection gets two tasks: a write task
//! draining an unbounded frame channel (the single-writer discipline that
//! keeps concurrent broadcasts from interleaving bytes on one socket) and
//! a session task running the protocol loop.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::config::Config;
use crate::constants::MAX_CLIENTS;
use crate::hooks::RelayHooks;
use crate::protocol::frames;
use crate::protocol::reader::FrameReader;
use crate::registry::{KickDecision, Mirror, Registry};
use crate::session::Session;

/// The relay server: configuration, hooks and the client/room registry.
///
/// Wrap in an [`Arc`] and call [`RelayServer::listen`] (or bind a listener
/// yourself and call [`RelayServer::serve`]).
pub struct RelayServer {
    config: Config,
    hooks: Arc<dyn RelayHooks>,
    state: Mutex<Registry>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("clients", &self.state.lock().unwrap().client_count())
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Create a server with the given configuration and embedding hooks.
    pub fn new(config: Config, hooks: Arc<dyn RelayHooks>) -> Self {
        Self {
            config,
            hooks,
            state: Mutex::new(Registry::default()),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Embedding hooks.
    pub fn hooks(&self) -> &dyn RelayHooks {
        &*self.hooks
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().unwrap().client_count()
    }

    /// Number of rooms currently alive.
    pub fn room_count(&self) -> usize {
        self.state.lock().unwrap().room_count()
    }

    /// Whether a client id is currently connected.
    pub fn has_client(&self, id: u8) -> bool {
        self.state.lock().unwrap().has_client(id)
    }

    /// Bind the configured address and run the accept loop.
    pub async fn listen(self: &Arc<Self>) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        log::info!("[Relay] Listening on {addr}");
        self.serve(listener).await
    }

    /// Run the accept loop on a pre-bound listener.
    ///
    /// Transient accept errors are logged and retried after a short sleep.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(self);
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    log::error!("[Relay] Accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Admit one accepted connection and drive its session to completion.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Relay] set_nodelay failed for {peer}: {e}");
        }
        let (read_half, mut write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let admitted = self.state.lock().unwrap().admit(tx, &*self.hooks);
        match admitted {
            Err(count) => {
                log::info!("[Relay] Rejecting {peer}: server full ({count}/{MAX_CLIENTS})");
                let frame = frames::error(&format!("Server is full ({count}/{MAX_CLIENTS})"));
                let _ = write_half.write_all(&frame).await;
            }
            Ok((id, epoch)) => {
                log::info!("[Relay] Accepted {peer} as client {id}");
                tokio::spawn(Self::write_loop(id, write_half, rx));
                let reader = FrameReader::new(read_half, self.config.idle_timeout());
                Session::new(Arc::clone(&self), id, epoch, peer, reader)
                    .run()
                    .await;
            }
        }
    }

    /// Write task: drains queued frames onto the socket.
    ///
    /// Exits when every sender is gone (the registry entry was removed)
    /// and the queue is drained; dropping the write half then closes the
    /// connection.
    async fn write_loop(id: u8, mut writer: OwnedWriteHalf, mut rx: UnboundedReceiver<Vec<u8>>) {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                log::debug!("[Relay] Write error for client {id}: {e}");
                break;
            }
        }
    }

    // ------------------------------------------------------------------
    // Locked registry transitions, used by sessions.
    // ------------------------------------------------------------------

    /// Claim a nickname; fails if another connected client holds it.
    pub(crate) fn claim_nick(&self, id: u8, nick: &str) -> bool {
        self.state.lock().unwrap().set_nick(id, nick)
    }

    /// Move a client to `room`: part the current room, join the new one.
    ///
    /// Both halves run under one lock acquisition, so no other transition
    /// can observe the client roomless.
    pub(crate) fn move_to(&self, id: u8, room: &str) {
        let mut state = self.state.lock().unwrap();
        state.part_room(id, &*self.hooks);
        state.join_room(id, room, &*self.hooks);
    }

    /// Remove a client from the server. Idempotent.
    pub(crate) fn disconnect(&self, id: u8, reason: &str) {
        self.state.lock().unwrap().disconnect(id, reason, &*self.hooks);
    }

    /// Session teardown: disconnect only this incarnation of `id`.
    pub(crate) fn disconnect_session(&self, id: u8, epoch: u64, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .disconnect_epoch(id, epoch, reason, &*self.hooks);
    }

    /// Queue a frame for one client. Returns `false` if the client is gone.
    pub(crate) fn send_to(&self, id: u8, frame: Vec<u8>) -> bool {
        self.state.lock().unwrap().send_to(id, frame)
    }

    /// Fan a frame out to the sender's room, excluding the sender.
    pub(crate) fn broadcast(&self, from: u8, frame: &[u8]) {
        self.state.lock().unwrap().broadcast(from, frame);
    }

    /// Update the sender's mirror and relay the frame in one atomic step,
    /// so a concurrent join replay observes either both or neither.
    pub(crate) fn update_and_relay(&self, from: u8, frame: &[u8], f: impl FnOnce(&mut Mirror)) {
        let mut state = self.state.lock().unwrap();
        state.update_mirror(from, f);
        state.broadcast(from, frame);
    }

    /// Flag a client as sitting in the chat window.
    pub(crate) fn set_chat(&self, id: u8) {
        self.state.lock().unwrap().set_chat(id);
    }

    /// Locate the target of a kick request.
    pub(crate) fn kick_decision(&self, source: u8, nick: &[u8]) -> KickDecision {
        self.state.lock().unwrap().kick_decision(source, nick)
    }

    /// Kick `target`: red notice, then disconnect.
    pub(crate) fn kick(&self, target: u8, source: u8, source_nick: &str, reason: &str) {
        self.hooks.kicked(target, source, reason);
        let (r, g, b) = frames::KICK_COLOR;
        let notice = format!("You were kicked by {source_nick} ({reason})");
        self.send_to(target, frames::server_message_rgb(&notice, r, g, b));
        self.disconnect(target, &format!("Kicked by {source_nick} ({reason})"));
    }
}
