//! A scripted in-process server standing in for a live server in tests
//! (`spec.md` §6, local-listener test tooling).
//!
//! Speaks just enough of the wire protocol to greet, accept chap-sha1 auth
//! unconditionally, and answer `select` against three canned spaces: the
//! `_vspace`/`_vindex` system tables (one row each, describing a space
//! `"test"` with a primary index) and the space itself (always returns
//! `[[1, "hello"]]`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use iproto_protocol::keys::{body as body_keys, header as header_keys, RequestType, VINDEX_ID, VSPACE_ID};
use iproto_protocol::try_decode_frame;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct StubServer {
    port: u16,
}

impl StubServer {
    /// Greets, authenticates, and answers every request.
    pub async fn start() -> Self {
        Self::spawn(true).await
    }

    /// Greets and authenticates, then accepts bytes without ever
    /// responding, to exercise request timeouts (Scenario S4).
    pub async fn start_silent() -> Self {
        Self::spawn(false).await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn spawn(respond: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub listener");
        let port = listener.local_addr().expect("local_addr").port();
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                handle_connection(stream, respond).await;
            }
        });
        StubServer { port }
    }
}

async fn handle_connection(mut stream: TcpStream, respond: bool) {
    if stream.write_all(&build_greeting()).await.is_err() {
        return;
    }

    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        if !respond {
            buf.clear();
            continue;
        }

        loop {
            match try_decode_frame(&mut buf) {
                Ok(Some((header, body))) => {
                    let mut cursor = std::io::Cursor::new(&body[..]);
                    let value = rmpv::decode::read_value(&mut cursor).unwrap_or(rmpv::Value::Map(vec![]));
                    let response = build_response(header.sync, header.code, &value);
                    if stream.write_all(&response).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
}

fn build_greeting() -> [u8; 128] {
    let mut buf = [0x20u8; 128];
    let version = b"Tarantool 2.10.0 (Binary)";
    buf[..version.len()].copy_from_slice(version);
    let encoded = STANDARD.encode([0u8; 32]);
    buf[64..64 + encoded.len()].copy_from_slice(encoded.as_bytes());
    buf
}

fn build_response(sync: u64, request_code: u32, body: &rmpv::Value) -> Bytes {
    let data = if request_code == RequestType::Select as u32 {
        select_response(body)
    } else {
        rmpv::Value::Nil
    };
    encode_ok(sync, data)
}

fn select_response(body: &rmpv::Value) -> rmpv::Value {
    let space_id = body
        .as_map()
        .and_then(|entries| {
            entries
                .iter()
                .find(|(k, _)| k.as_u64() == Some(body_keys::SPACE_ID as u64))
        })
        .and_then(|(_, v)| v.as_u64())
        .unwrap_or(0) as u32;

    match space_id {
        VSPACE_ID => rmpv::Value::Array(vec![vspace_row()]),
        VINDEX_ID => rmpv::Value::Array(vec![vindex_row()]),
        _ => rmpv::Value::Array(vec![rmpv::Value::Array(vec![
            rmpv::Value::from(1i64),
            rmpv::Value::from("hello"),
        ])]),
    }
}

fn field_format(name: &str, field_type: &str) -> rmpv::Value {
    rmpv::Value::Map(vec![
        (rmpv::Value::from("name"), rmpv::Value::from(name)),
        (rmpv::Value::from("type"), rmpv::Value::from(field_type)),
        (rmpv::Value::from("is_nullable"), rmpv::Value::from(false)),
    ])
}

fn vspace_row() -> rmpv::Value {
    rmpv::Value::Array(vec![
        rmpv::Value::from(512u32),
        rmpv::Value::from(1u32),
        rmpv::Value::from("test"),
        rmpv::Value::from("memtx"),
        rmpv::Value::from(2u32),
        rmpv::Value::Map(vec![]),
        rmpv::Value::Array(vec![field_format("id", "unsigned"), field_format("name", "string")]),
    ])
}

fn vindex_row() -> rmpv::Value {
    rmpv::Value::Array(vec![
        rmpv::Value::from(512u32),
        rmpv::Value::from(0u32),
        rmpv::Value::from("primary"),
        rmpv::Value::from("tree"),
        rmpv::Value::Map(vec![(rmpv::Value::from("unique"), rmpv::Value::from(true))]),
        rmpv::Value::Array(vec![rmpv::Value::Array(vec![
            rmpv::Value::from(0u32),
            rmpv::Value::from("unsigned"),
        ])]),
    ])
}

fn encode_ok(sync: u64, data: rmpv::Value) -> Bytes {
    let mut scratch = Vec::new();
    rmp::encode::write_map_len(&mut scratch, 2).expect("write to Vec cannot fail");
    rmp::encode::write_pfix(&mut scratch, header_keys::CODE).expect("write to Vec cannot fail");
    rmp::encode::write_uint(&mut scratch, 0).expect("write to Vec cannot fail");
    rmp::encode::write_pfix(&mut scratch, header_keys::SYNC).expect("write to Vec cannot fail");
    rmp::encode::write_uint(&mut scratch, sync).expect("write to Vec cannot fail");

    rmp::encode::write_map_len(&mut scratch, 1).expect("write to Vec cannot fail");
    rmp::encode::write_pfix(&mut scratch, body_keys::DATA).expect("write to Vec cannot fail");
    rmpv::encode::write_value(&mut scratch, &data).expect("write to Vec cannot fail");

    let mut framed = Vec::with_capacity(scratch.len() + 9);
    rmp::encode::write_uint(&mut framed, scratch.len() as u64).expect("write to Vec cannot fail");
    framed.extend_from_slice(&scratch);
    Bytes::from(framed)
}
