//! The 128-byte server greeting (`spec.md` §3, §4.5): a version banner
//! followed by a Base64-encoded challenge salt, produced once per
//! connection immediately after TCP connect.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use iproto_errors::{Error, ProtocolError};

pub const GREETING_LEN: usize = 128;
const VERSION_LEN: usize = 64;
const SALT_FIELD_LEN: usize = 44;
/// Per Design Note (`spec.md` §9): never assume the salt field decodes to
/// exactly 32 bytes; only the first 20 are meaningful to `chap-sha1`.
pub const SALT_LEN: usize = 20;

#[derive(Debug, Clone)]
pub struct Greeting {
    pub version: String,
    pub salt: [u8; SALT_LEN],
}

pub fn parse_greeting(buf: &[u8; GREETING_LEN]) -> Result<Greeting, Error> {
    let version = String::from_utf8(buf[0..VERSION_LEN].to_vec())
        .map_err(|e| {
            ProtocolError {
                message: format!("invalid greeting version banner: {e}"),
            }
            .build()
        })?
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string();

    let salt_field_start = VERSION_LEN;
    let salt_field_end = salt_field_start + SALT_FIELD_LEN;
    let salt_field = std::str::from_utf8(&buf[salt_field_start..salt_field_end])
        .map_err(|e| {
            ProtocolError {
                message: format!("invalid greeting salt field: {e}"),
            }
            .build()
        })?
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace());

    let decoded = STANDARD.decode(salt_field).map_err(|e| {
        ProtocolError {
            message: format!("invalid greeting salt base64: {e}"),
        }
        .build()
    })?;

    if decoded.len() < SALT_LEN {
        return ProtocolError {
            message: format!(
                "greeting salt decodes to {} bytes, need at least {SALT_LEN}",
                decoded.len()
            ),
        }
        .fail();
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&decoded[0..SALT_LEN]);
    Ok(Greeting { version, salt })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_greeting(version: &str, salt32: &[u8; 32]) -> [u8; GREETING_LEN] {
        let mut buf = [0x20u8; GREETING_LEN]; // space-padded, like the real server
        buf[..version.len()].copy_from_slice(version.as_bytes());
        let encoded = STANDARD.encode(salt32);
        let encoded = encoded.as_bytes();
        buf[VERSION_LEN..VERSION_LEN + encoded.len()].copy_from_slice(encoded);
        buf
    }

    #[test]
    fn parses_version_and_salt() {
        let salt32 = [0u8; 32];
        let buf = build_greeting("Tarantool 2.10.0 (Binary)", &salt32);
        let greeting = parse_greeting(&buf).unwrap();
        assert_eq!(greeting.version, "Tarantool 2.10.0 (Binary)");
        assert_eq!(greeting.salt, [0u8; 20]);
    }

    #[test]
    fn slices_first_20_bytes_even_when_decoded_is_longer() {
        let mut salt32 = [0u8; 32];
        salt32[20] = 0xff; // beyond byte 20, must not affect the result
        let buf = build_greeting("v", &salt32);
        let greeting = parse_greeting(&buf).unwrap();
        assert_eq!(greeting.salt, [0u8; 20]);
    }

    #[test]
    fn rejects_invalid_base64() {
        let mut buf = [0x20u8; GREETING_LEN];
        buf[VERSION_LEN..VERSION_LEN + 4].copy_from_slice(b"!!!!");
        let err = parse_greeting(&buf).unwrap_err();
        assert_eq!(err.kind(), "protocol_error");
    }
}
