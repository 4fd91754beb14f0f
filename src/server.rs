//! The sync server: a single-threaded, readiness-multiplexed loop that
//! owns the client table, drives the engine once per iteration, and keeps
//! every connected viewer's picture of kite state consistent.
//!
//! Each socket is registered for read interest or write interest, never
//! both; per-client buffers absorb partial reads and writes so no socket
//! operation can stall the loop. All shared state lives in the `Server`
//! context object and is only touched from this one thread.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};

use crate::engine::Engine;
use crate::kite::{Kite, KiteId};
use crate::protocol::{self, KiteState, Message};

const LISTENER: Token = Token(0);

/// Sail colors handed out to clients in connection order.
const PALETTE: [u32; 8] = [
    0xff_e6_39_46, // red
    0xff_45_7b_9d, // steel blue
    0xff_f4_a2_61, // orange
    0xff_2a_9d_8f, // teal
    0xff_e9_c4_6a, // yellow
    0xff_9b_5d_e5, // violet
    0xff_80_ed_99, // green
    0xff_f1_fa_ee, // white
];

/// Server tuning knobs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Concurrent-connection cap. Over-cap connections are dropped at
    /// accept time.
    pub max_clients: usize,

    /// Greeting text sent to every new client.
    pub greeting: String,

    /// Poll timeout while a script is running; the engine ticks at most
    /// this often on an otherwise idle link.
    pub frame_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7465,
            max_clients: 32,
            greeting: "skydance".to_string(),
            frame_interval: Duration::from_millis(16),
        }
    }
}

/// Per-client connection state: buffered partial I/O plus the kite this
/// client owns.
struct ClientConn {
    stream: TcpStream,
    token: Token,
    kite_id: KiteId,
    client_index: u32,
    recv: Vec<u8>,
    send: Vec<u8>,
    sent: usize,
    writing: bool,
}

/// The connection multiplexer. Owns the listener, the client table, and
/// the engine; no state lives outside this struct.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    clients: HashMap<Token, ClientConn>,
    engine: Engine,
    config: ServerConfig,
    next_token: usize,
    next_client_index: u32,
    next_kite_id: u32,
    last_tick: Instant,
}

impl Server {
    /// Bind the listening socket and register it with the poll.
    pub fn bind(config: ServerConfig, engine: Engine) -> io::Result<Server> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut listener = TcpListener::bind(addr)?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        log::info!("listening on {}", listener.local_addr()?);
        // Client kites get ids above any script-owned kites already in
        // the engine.
        let next_kite_id = engine
            .known_kites()
            .iter()
            .next_back()
            .map(|k| k.0 + 1)
            .unwrap_or(0);
        Ok(Server {
            poll,
            listener,
            clients: HashMap::new(),
            engine,
            config,
            next_token: 1,
            next_client_index: 0,
            next_kite_id,
            last_tick: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Service the loop forever.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            // Playback needs periodic ticks; an idle server sleeps until
            // a socket wakes it.
            let timeout = if self.engine.script_active() {
                Some(self.config.frame_interval)
            } else {
                None
            };
            self.step(timeout)?;
        }
    }

    /// One loop iteration: wait for readiness, service every ready
    /// socket, then tick the engine exactly once.
    pub fn step(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let mut events = Events::with_capacity(128);
        if let Err(e) = self.poll.poll(&mut events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(e);
        }

        let ready: Vec<(Token, bool, bool)> = events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            if token == LISTENER {
                self.accept_clients();
            } else {
                if readable {
                    self.handle_readable(token);
                }
                if writable {
                    self.handle_writable(token);
                }
            }
        }

        self.tick_engine();
        Ok(())
    }

    /// Accept every pending connection, enforcing the concurrent cap.
    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.clients.len() >= self.config.max_clients {
                        log::warn!("refusing {}: {} clients connected", addr, self.clients.len());
                        drop(stream);
                        continue;
                    }
                    self.admit(stream, addr);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        let token = Token(self.next_token);
        self.next_token += 1;
        let client_index = self.next_client_index;
        self.next_client_index += 1;

        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)
        {
            log::warn!("failed to register {}: {}", addr, e);
            return;
        }

        let kite_id = KiteId(self.next_kite_id);
        self.next_kite_id += 1;
        let color = PALETTE[client_index as usize % PALETTE.len()];
        let mut kite = Kite::new(kite_id);
        kite.color = color;
        self.engine.add_kite(kite);

        let mut conn = ClientConn {
            stream,
            token,
            kite_id,
            client_index,
            recv: Vec::new(),
            send: Vec::new(),
            sent: 0,
            writing: false,
        };
        log::info!("client {} connected from {} as kite {}", client_index, addr, kite_id);

        // Hello + full snapshot for the newcomer, the new kite for
        // everyone else.
        let registry = self.poll.registry();
        queue(
            registry,
            &mut conn,
            &protocol::encode(&Message::Hello {
                greeting: self.config.greeting.clone(),
            }),
        );
        let snapshot: Vec<KiteState> = self.engine.kites().map(KiteState::from).collect();
        queue(
            registry,
            &mut conn,
            &protocol::encode(&Message::ClientKites { kites: snapshot }),
        );
        if self.engine.script().is_some() {
            queue(
                registry,
                &mut conn,
                &protocol::encode(&Message::ScriptAmount { count: 1 }),
            );
            if let Some(progress) = self.engine.progress() {
                queue(
                    registry,
                    &mut conn,
                    &protocol::encode(&Message::BlockFrameValue {
                        script_id: progress.script_id,
                        block_count: progress.block_count,
                        block_index: progress.block_index,
                    }),
                );
            }
        }
        self.clients.insert(token, conn);

        let announce = protocol::encode(&Message::KiteAdd {
            client_index,
            color,
        });
        self.broadcast(&announce, Some(token));
    }

    /// Drain a readable socket, rebroadcast complete messages, steer the
    /// engine on script-control messages.
    fn handle_readable(&mut self, token: Token) {
        let mut closed = false;
        let messages = {
            let Some(conn) = self.clients.get_mut(&token) else {
                return;
            };
            let mut chunk = [0u8; 4096];
            loop {
                match conn.stream.read(&mut chunk) {
                    // Zero-byte read: orderly remote close.
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => conn.recv.extend_from_slice(&chunk[..n]),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // Transport error: implicit disconnect.
                        log::warn!("read error on kite {}: {}", conn.kite_id, e);
                        closed = true;
                        break;
                    }
                }
            }
            protocol::drain(&mut conn.recv)
        };

        for (message, raw) in messages {
            self.broadcast(&raw, Some(token));
            self.apply_message(token, message);
        }

        if closed {
            self.remove_client(token);
        }
    }

    /// React to a decoded client message.
    fn apply_message(&mut self, token: Token, message: Message) {
        match message {
            Message::KiteUpdate(state) => {
                if let Some(kite) = self.engine.kite_mut(KiteId(state.kite_id)) {
                    kite.center.x = state.x;
                    kite.center.y = state.y;
                    kite.angle = state.angle;
                    kite.color = state.color;
                    kite.texture_id = state.texture_id;
                    kite.is_reversed = state.is_reversed;
                    kite.is_active = state.is_active;
                } else {
                    log::warn!("update for unknown kite {}", state.kite_id);
                }
            }
            Message::ScriptToggle { .. } => {
                self.engine.toggle();
            }
            Message::ScriptNext { .. } => {
                let tick = self.engine.skip_block();
                self.report_progress(tick.progress, tick.script_finished);
            }
            Message::ScriptScrub { block_index, .. } => {
                let tick = self.engine.scrub(block_index);
                self.report_progress(tick.progress, tick.script_finished);
            }
            Message::ClientDisconnect { kite_id } => {
                // A client announcing its own departure.
                let Some(conn) = self.clients.get(&token) else {
                    return;
                };
                if conn.kite_id.0 == kite_id {
                    self.remove_client(token);
                }
            }
            // Everything else is peer-to-peer chatter, already relayed.
            _ => {}
        }
    }

    /// Flush a writable socket from its cursor; flip back to read
    /// interest once empty.
    fn handle_writable(&mut self, token: Token) {
        let registry = self.poll.registry();
        let mut failed = false;
        {
            let Some(conn) = self.clients.get_mut(&token) else {
                return;
            };
            loop {
                if conn.sent >= conn.send.len() {
                    conn.send.clear();
                    conn.sent = 0;
                    conn.writing = false;
                    if let Err(e) =
                        registry.reregister(&mut conn.stream, conn.token, Interest::READABLE)
                    {
                        log::warn!("failed to rearm read interest for kite {}: {}", conn.kite_id, e);
                    }
                    break;
                }
                match conn.stream.write(&conn.send[conn.sent..]) {
                    Ok(0) => {
                        failed = true;
                        break;
                    }
                    // Partial writes advance the cursor and resume on the
                    // next writable event.
                    Ok(n) => conn.sent += n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("write error on kite {}: {}", conn.kite_id, e);
                        failed = true;
                        break;
                    }
                }
            }
        }
        if failed {
            self.remove_client(token);
        }
    }

    /// Remove a client: deregister its kite, then its socket. Idempotent;
    /// either step failing is logged and the other proceeds.
    fn remove_client(&mut self, token: Token) {
        let Some(mut conn) = self.clients.remove(&token) else {
            return;
        };
        if self.engine.remove_kite(conn.kite_id).is_none() {
            log::warn!("kite {} was already deregistered", conn.kite_id);
        }
        if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
            log::warn!("failed to deregister socket for kite {}: {}", conn.kite_id, e);
        }
        log::info!("client {} (kite {}) removed", conn.client_index, conn.kite_id);

        let notice = protocol::encode(&Message::ClientDisconnect {
            kite_id: conn.kite_id.0,
        });
        self.broadcast(&notice, None);
    }

    /// Queue bytes to every client except `except`.
    fn broadcast(&mut self, bytes: &[u8], except: Option<Token>) {
        let registry = self.poll.registry();
        for (&token, conn) in self.clients.iter_mut() {
            if Some(token) == except {
                continue;
            }
            queue(registry, conn, bytes);
        }
    }

    /// Advance the engine once per iteration and broadcast the results.
    fn tick_engine(&mut self) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;

        if !self.engine.script_active() {
            return;
        }

        let tick = self.engine.advance(dt);
        if tick.block_changed {
            self.report_progress(tick.progress, tick.script_finished);
        } else if tick.script_finished {
            self.report_progress(None, true);
        }

        // Every client observes the post-tick state, in tick order.
        let snapshot: Vec<KiteState> = self.engine.kites().map(KiteState::from).collect();
        let bytes = protocol::encode(&Message::Kites { kites: snapshot });
        self.broadcast(&bytes, None);
    }

    fn report_progress(
        &mut self,
        progress: Option<crate::engine::BlockProgress>,
        finished: bool,
    ) {
        if let Some(p) = progress {
            let bytes = protocol::encode(&Message::BlockFrameValue {
                script_id: p.script_id,
                block_count: p.block_count,
                block_index: p.block_index,
            });
            self.broadcast(&bytes, None);
        }
        if finished {
            let script_id = self.engine.script().map(|s| s.id).unwrap_or(0);
            let bytes = protocol::encode(&Message::ScriptFinished { script_id });
            self.broadcast(&bytes, None);
        }
    }
}

/// Append bytes to a client's send buffer, arming write interest if the
/// socket was read-registered.
fn queue(registry: &Registry, conn: &mut ClientConn, bytes: &[u8]) {
    conn.send.extend_from_slice(bytes);
    if !conn.writing {
        conn.writing = true;
        if let Err(e) = registry.reregister(&mut conn.stream, conn.token, Interest::WRITABLE) {
            log::warn!("failed to arm write interest for kite {}: {}", conn.kite_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 7465);
        assert!(config.max_clients > 0);
    }

    #[test]
    fn test_bind_ephemeral_port() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::bind(config, Engine::new()).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn test_palette_nonempty_and_distinct() {
        assert!(!PALETTE.is_empty());
        for (i, a) in PALETTE.iter().enumerate() {
            for b in PALETTE.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
