//! Length-prefixed frame decode/encode (`spec.md` §4.3, Property P4).
//!
//! A frame on the wire is `size (msgpack uint) ++ header (msgpack map) ++
//! body (msgpack map)`, where `size` counts only the header+body bytes.
//! Decoding is resumable: a frame that hasn't fully arrived yet is reported
//! as `Ok(None)` without consuming anything from `buf`, so the caller can
//! feed it more bytes from the socket and retry.

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};
use iproto_errors::{Error, ProtocolError};

use crate::keys::{body as body_keys, header as header_keys};

/// A frame's header, decoded from its MessagePack map (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub code: u32,
    pub sync: u64,
    pub schema_id: u32,
}

impl FrameHeader {
    /// `code < 0x8000` is success; `code >= 0x8000` is error, with the
    /// server error code in the low bits (`spec.md` §6).
    pub fn is_error(&self) -> bool {
        self.code & crate::keys::ERROR_FLAG != 0
    }

    pub fn error_code(&self) -> u32 {
        self.code & !crate::keys::ERROR_FLAG
    }
}

/// Maximum width (in bytes) of a MessagePack-encoded `u64`: a 1-byte marker
/// plus up to 8 payload bytes. Used to tell "not enough bytes yet" apart
/// from "this isn't a valid uint" while decoding the size prefix.
const MAX_UINT_PREFIX_LEN: usize = 9;

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` doesn't yet contain a complete frame (`buf`
/// is left untouched). Returns `Ok(Some((header, body)))` and removes the
/// consumed bytes from `buf` on success. A structurally invalid size prefix
/// or header is a fatal `ProtocolError`.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<(FrameHeader, Bytes)>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }

    let size = {
        let mut cursor = Cursor::new(&buf[..]);
        match rmp::decode::read_int::<u64, _>(&mut cursor) {
            Ok(size) => (size, cursor.position() as usize),
            Err(_) => {
                if buf.len() < MAX_UINT_PREFIX_LEN {
                    return Ok(None);
                }
                return ProtocolError {
                    message: "invalid frame size prefix".to_string(),
                }
                .fail();
            }
        }
    };
    let (size, prefix_len) = size;

    let total = prefix_len + size as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let mut framed = buf.split_to(total);
    framed.advance(prefix_len);
    let frame_bytes = framed.freeze();

    let mut cursor = Cursor::new(&frame_bytes[..]);
    let header = decode_header(&mut cursor)?;
    let body_offset = cursor.position() as usize;
    let body = frame_bytes.slice(body_offset..);

    Ok(Some((header, body)))
}

fn decode_header(cursor: &mut Cursor<&[u8]>) -> Result<FrameHeader, Error> {
    let map_len = rmp::decode::read_map_len(cursor).map_err(|e| {
        ProtocolError {
            message: format!("invalid frame header: {e}"),
        }
        .build()
    })?;

    let mut code = None;
    let mut sync = None;
    let mut schema_id = 0u32;

    for _ in 0..map_len {
        let key = read_key(cursor)?;
        match key {
            k if k == header_keys::CODE => {
                code = Some(read_u32(cursor)?);
            }
            k if k == header_keys::SYNC => {
                sync = Some(read_u64(cursor)?);
            }
            k if k == header_keys::SCHEMA_ID => {
                schema_id = read_u32(cursor)?;
            }
            _ => {
                rmpv::decode::read_value(cursor).map_err(|e| {
                    ProtocolError {
                        message: format!("invalid header value: {e}"),
                    }
                    .build()
                })?;
            }
        }
    }

    let code = code.ok_or_else(|| {
        ProtocolError {
            message: "frame header missing code".to_string(),
        }
        .build()
    })?;
    let sync = sync.ok_or_else(|| {
        ProtocolError {
            message: "frame header missing sync".to_string(),
        }
        .build()
    })?;

    Ok(FrameHeader {
        code,
        sync,
        schema_id,
    })
}

fn read_key(cursor: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    rmp::decode::read_int::<u8, _>(cursor).map_err(|e| {
        ProtocolError {
            message: format!("invalid frame header key: {e}"),
        }
        .build()
    })
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, Error> {
    rmp::decode::read_int::<u32, _>(cursor).map_err(|e| {
        ProtocolError {
            message: format!("invalid frame header value: {e}"),
        }
        .build()
    })
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64, Error> {
    rmp::decode::read_int::<u64, _>(cursor).map_err(|e| {
        ProtocolError {
            message: format!("invalid frame header value: {e}"),
        }
        .build()
    })
}

/// An ordered list of (key, value) pairs making up a request/response body
/// map. Order is preserved on the wire because some servers are sensitive
/// to it for diagnostics, even though MessagePack maps are unordered by
/// spec.
pub type Body = Vec<(u8, rmpv::Value)>;

/// Encodes a full request frame: size prefix, header (code + sync), body.
pub fn encode_request(sync: u64, request_type: crate::keys::RequestType, body: &Body) -> Bytes {
    let mut scratch = Vec::new();

    rmp::encode::write_map_len(&mut scratch, 2).expect("write to Vec cannot fail");
    rmp::encode::write_pfix(&mut scratch, header_keys::CODE).expect("write to Vec cannot fail");
    rmp::encode::write_uint(&mut scratch, request_type as u64).expect("write to Vec cannot fail");
    rmp::encode::write_pfix(&mut scratch, header_keys::SYNC).expect("write to Vec cannot fail");
    rmp::encode::write_uint(&mut scratch, sync).expect("write to Vec cannot fail");

    encode_body(&mut scratch, body);

    let mut framed = Vec::with_capacity(scratch.len() + MAX_UINT_PREFIX_LEN);
    rmp::encode::write_uint(&mut framed, scratch.len() as u64).expect("write to Vec cannot fail");
    framed.extend_from_slice(&scratch);
    Bytes::from(framed)
}

fn encode_body(out: &mut Vec<u8>, body: &Body) {
    rmp::encode::write_map_len(out, body.len() as u32).expect("write to Vec cannot fail");
    for (key, value) in body {
        rmp::encode::write_pfix(out, *key).expect("write to Vec cannot fail");
        rmpv::encode::write_value(out, value).expect("write to Vec cannot fail");
    }
}
