//! The connection pipeline (`spec.md` §4.5): greeting, auth, ready, inbound
//! demux, outbound dispatch, and teardown.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use iproto_auth::select_authenticator;
use iproto_dsn::Config;
use iproto_errors::{
    AuthFailure, ConnectFailure, ConnectionClosed, Error, NotConnected, ProtocolError, ServerError,
};
use iproto_protocol::keys::{body as body_keys, RequestType};
use iproto_protocol::{greeting::GREETING_LEN, parse_greeting, try_decode_frame, Body};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;

use crate::metadata_cache::MetadataCache;
use crate::registry::{RequestRegistry, ShutdownReason};

/// `spec.md` §3: "Connection state".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Greeted = 2,
    Authenticating = 3,
    Ready = 4,
    Closing = 5,
    Closed = 6,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Greeted,
            3 => ConnectionState::Authenticating,
            4 => ConnectionState::Ready,
            5 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

struct Shared {
    write_half: AsyncMutex<OwnedWriteHalf>,
    registry: RequestRegistry,
    state: AtomicU8,
    request_timeout: Duration,
    pub(crate) metadata: MetadataCache,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Writes `frame` under the write mutex, registering the pending
    /// completion before releasing it so the wire order of `sync`s matches
    /// registration order (`spec.md` §4.5: "Dispatch ordering").
    async fn dispatch_raw(&self, request_type: RequestType, body: Body) -> Result<rmpv::Value, Error> {
        let deadline = Instant::now() + self.request_timeout;
        let mut write_half = self.write_half.lock().await;
        let (sync, receiver) = self.registry.register(deadline)?;
        let frame = iproto_protocol::frame::encode_request(sync, request_type, &body);
        if let Err(source) = write_half.write_all(&frame).await {
            drop(write_half);
            log::error!("write failed, tearing down connection: {source}");
            self.set_state(ConnectionState::Closed);
            self.registry.shutdown(ShutdownReason::ConnectionClosed);
            return ConnectFailure { source }.fail();
        }
        drop(write_half);

        match receiver.await {
            Ok(result) => result,
            Err(_) => ConnectionClosed.fail(),
        }
    }

    async fn dispatch(&self, request_type: RequestType, body: Body) -> Result<rmpv::Value, Error> {
        if self.state() != ConnectionState::Ready {
            return NotConnected.fail();
        }
        self.dispatch_raw(request_type, body).await
    }

    fn route_frame(&self, header: iproto_protocol::FrameHeader, body_bytes: bytes::Bytes) {
        let mut cursor = io::Cursor::new(&body_bytes[..]);
        let value = match rmpv::decode::read_value(&mut cursor) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("malformed response body for sync {}: {e}", header.sync);
                self.registry.fail(
                    header.sync,
                    ProtocolError {
                        message: format!("malformed response body: {e}"),
                    }
                    .build(),
                );
                return;
            }
        };

        let map = match value.as_map() {
            Some(m) => m,
            None => {
                self.registry.fail(
                    header.sync,
                    ProtocolError {
                        message: "response body is not a map".to_string(),
                    }
                    .build(),
                );
                return;
            }
        };

        if header.is_error() {
            let message = map
                .iter()
                .find(|(k, _)| k.as_u64() == Some(body_keys::ERROR as u64))
                .and_then(|(_, v)| v.as_str())
                .unwrap_or("server error")
                .to_string();
            log::warn!("server error {} on sync {}: {message}", header.error_code(), header.sync);
            self.registry.fail(
                header.sync,
                ServerError {
                    code: header.error_code(),
                    message,
                }
                .build(),
            );
        } else {
            let data = map
                .iter()
                .find(|(k, _)| k.as_u64() == Some(body_keys::DATA as u64))
                .map(|(_, v)| v.clone())
                .unwrap_or(rmpv::Value::Nil);
            log::trace!("completed sync {} schema_id {}", header.sync, header.schema_id);
            self.registry.complete(header.sync, data);
        }
    }

    fn shutdown(&self, reason: ShutdownReason) {
        self.set_state(ConnectionState::Closed);
        self.registry.shutdown(reason);
    }
}

/// A handle to a connected session. Cloning shares the same underlying
/// socket, registry, and metadata cache.
#[derive(Clone)]
pub struct Connection(Arc<Shared>);

impl Connection {
    pub async fn connect(config: &Config) -> Result<Connection, Error> {
        let address = format!("{}:{}", config.host(), config.port());
        log::debug!("connecting to {address}");

        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&address))
            .await
            .map_err(|_| {
                ConnectFailure {
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                }
                .build()
            })?
            .map_err(|source| ConnectFailure { source }.build())?;
        stream.set_nodelay(true).ok();

        let (mut read_half, write_half) = stream.into_split();

        let mut greeting_buf = [0u8; GREETING_LEN];
        tokio::time::timeout(config.read_timeout(), read_half.read_exact(&mut greeting_buf))
            .await
            .map_err(|_| {
                ConnectFailure {
                    source: io::Error::new(io::ErrorKind::TimedOut, "greeting read timed out"),
                }
                .build()
            })?
            .map_err(|source| ConnectFailure { source }.build())?;

        let greeting = parse_greeting(&greeting_buf)?;
        log::debug!("received greeting: {}", greeting.version);

        let shared = Arc::new(Shared {
            write_half: AsyncMutex::new(write_half),
            registry: RequestRegistry::new(),
            state: AtomicU8::new(ConnectionState::Greeted as u8),
            request_timeout: config.request_timeout(),
            metadata: MetadataCache::new(),
        });

        tokio::spawn(run_io_worker(shared.clone(), read_half));

        shared.set_state(ConnectionState::Authenticating);
        let body = auth_body(config, &greeting.salt);
        match shared.dispatch_raw(RequestType::Auth, body).await {
            Ok(_) => {
                shared.set_state(ConnectionState::Ready);
                log::debug!("authenticated as {}", config.credentials().username());
                Ok(Connection(shared))
            }
            Err(Error::ServerError { code, message }) => {
                shared.set_state(ConnectionState::Closed);
                AuthFailure {
                    message: format!("server rejected credentials ({code}): {message}"),
                }
                .fail()
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.0.state() == ConnectionState::Ready
    }

    pub(crate) fn metadata(&self) -> &MetadataCache {
        &self.0.metadata
    }

    pub(crate) async fn dispatch(&self, request_type: RequestType, body: Body) -> Result<rmpv::Value, Error> {
        self.0.dispatch(request_type, body).await
    }

    /// `spec.md` §5: "Close discipline". Transitions to Closing, fails every
    /// pending completion with `ConnectionClosed`, then releases the socket.
    pub async fn close(&self) {
        self.0.set_state(ConnectionState::Closing);
        self.0.registry.shutdown(ShutdownReason::ConnectionClosed);
        let mut write_half = self.0.write_half.lock().await;
        let _ = write_half.shutdown().await;
        drop(write_half);
        self.0.set_state(ConnectionState::Closed);
    }
}

fn auth_body(config: &Config, salt: &[u8; 20]) -> Body {
    let authenticator = select_authenticator("chap-sha1", config.credentials())
        .expect("chap-sha1 always accepts username/password credentials");
    let scramble = authenticator.compute_scramble(salt, config.credentials());
    vec![
        (body_keys::USER_NAME, rmpv::Value::from(config.credentials().username())),
        (
            body_keys::TUPLE,
            rmpv::Value::Array(vec![
                rmpv::Value::from(authenticator.mechanism()),
                // the scramble is 20 raw bytes carried as a msgpack str, not
                // bin, matching the server's own encoder.
                rmpv::Value::String(rmpv::Utf8String::from(scramble.to_vec())),
            ]),
        ),
    ]
}

/// Owns the read half of the socket. Demultiplexes inbound frames to the
/// registry (`spec.md` §4.5: "inbound demux") and drives request timeouts
/// via a periodic tick, since nothing else polls the registry on this
/// connection's behalf (`spec.md` §4.4: `tick(now)`).
async fn run_io_worker(shared: Arc<Shared>, mut read_half: OwnedReadHalf) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut ticker = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.registry.tick(Instant::now());
            }
            read_result = read_half.read_buf(&mut buf) => {
                match read_result {
                    Ok(0) => {
                        log::debug!("peer closed the connection");
                        shared.shutdown(ShutdownReason::ConnectionClosed);
                        return;
                    }
                    Ok(_) => loop {
                        match try_decode_frame(&mut buf) {
                            Ok(Some((header, body))) => shared.route_frame(header, body),
                            Ok(None) => break,
                            Err(e) => {
                                log::error!("protocol error, closing connection: {e}");
                                shared.shutdown(ShutdownReason::Protocol(e.to_string()));
                                return;
                            }
                        }
                    },
                    Err(e) => {
                        log::error!("socket read failed, closing connection: {e}");
                        shared.shutdown(ShutdownReason::ConnectionClosed);
                        return;
                    }
                }
            }
        }

        if shared.state() == ConnectionState::Closed {
            return;
        }
    }
}
