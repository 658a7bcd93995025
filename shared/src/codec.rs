//! MQTT 3.1.1 control frames for the modem data path
//!
//! The cellular link carries raw TCP through the modem, so control packets
//! are assembled by hand and written after the modem's data-entry prompt:
//! ```text
//! [ 1 byte: type/flags ][ 1-4 bytes: remaining length ][ variable header ][ payload ]
//! ```
//!
//! Remaining length uses the variable-length encoding: 7 bits per byte,
//! least significant group first, high bit set while more bytes follow.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;

/// Protocol name carried in every CONNECT
pub const PROTOCOL_NAME: &[u8] = b"MQTT";

/// Protocol level for MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 0x04;

/// Largest value the 4-byte remaining length field can hold
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Largest length-prefixed string field
pub const MAX_FIELD_LENGTH: usize = u16::MAX as usize;

/// Fixed header byte for CONNECT
pub const CONNECT: u8 = 0x10;
/// Fixed header byte for CONNACK
pub const CONNACK: u8 = 0x20;
/// Fixed header byte for PUBLISH at QoS 0, no DUP, no RETAIN
pub const PUBLISH: u8 = 0x30;
/// Fixed header byte for PINGREQ
pub const PINGREQ: u8 = 0xC0;

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// Errors that can occur while building or parsing frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Field too long: {0} bytes (max: {MAX_FIELD_LENGTH})")]
    FieldTooLong(usize),

    #[error("Remaining length too large: {0} bytes (max: {MAX_REMAINING_LENGTH})")]
    RemainingLengthTooLarge(usize),

    #[error("Malformed remaining length encoding")]
    MalformedRemainingLength,

    #[error("Not enough data: need {needed} bytes, have {available}")]
    NotEnoughData { needed: usize, available: usize },

    #[error("Unexpected packet type: {0:#04x}")]
    UnexpectedPacketType(u8),

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,
}

/// How the CONNECT flags byte reflects credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingMode {
    /// Username/password flag bits follow the fields actually present
    #[default]
    Strict,
    /// Flags fixed at clean-session only; all three fields always appended
    Legacy,
}

/// Parameters for a CONNECT frame
#[derive(Debug, Clone)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub keep_alive_secs: u16,
    pub mode: FramingMode,
}

impl ConnectOptions<'_> {
    /// The connect-flags byte this frame will carry
    pub fn flags(&self) -> u8 {
        match self.mode {
            FramingMode::Legacy => FLAG_CLEAN_SESSION,
            FramingMode::Strict => {
                let mut flags = FLAG_CLEAN_SESSION;
                // A password without a username is a protocol violation
                if !self.username.is_empty() {
                    flags |= FLAG_USERNAME;
                    if !self.password.is_empty() {
                        flags |= FLAG_PASSWORD;
                    }
                }
                flags
            }
        }
    }
}

/// Build a CONNECT frame
pub fn connect_frame(opts: &ConnectOptions<'_>) -> Result<Bytes, FrameError> {
    let flags = opts.flags();
    let legacy = opts.mode == FramingMode::Legacy;

    let mut body = BytesMut::with_capacity(
        10 + 6 + opts.client_id.len() + opts.username.len() + opts.password.len(),
    );
    put_field(&mut body, PROTOCOL_NAME)?;
    body.put_u8(PROTOCOL_LEVEL);
    body.put_u8(flags);
    body.put_u16(opts.keep_alive_secs);

    put_field(&mut body, opts.client_id.as_bytes())?;
    if legacy || flags & FLAG_USERNAME != 0 {
        put_field(&mut body, opts.username.as_bytes())?;
    }
    if legacy || flags & FLAG_PASSWORD != 0 {
        put_field(&mut body, opts.password.as_bytes())?;
    }

    finish(CONNECT, &body)
}

/// Build a QoS 0 PUBLISH frame
///
/// The payload is appended raw; its length is implied by the remaining
/// length minus the topic field.
pub fn publish_frame(topic: &str, payload: &[u8]) -> Result<Bytes, FrameError> {
    let mut body = BytesMut::with_capacity(2 + topic.len() + payload.len());
    put_field(&mut body, topic.as_bytes())?;
    body.extend_from_slice(payload);
    finish(PUBLISH, &body)
}

/// Build a PINGREQ frame
pub fn pingreq_frame() -> Bytes {
    Bytes::from_static(&[PINGREQ, 0x00])
}

/// Append the variable-length encoding of `len`, returning the bytes written
pub fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) -> Result<usize, FrameError> {
    if len > MAX_REMAINING_LENGTH {
        return Err(FrameError::RemainingLengthTooLarge(len));
    }

    let mut written = 0;
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        written += 1;
        if len == 0 {
            return Ok(written);
        }
    }
}

/// Decode a remaining length field from the start of `buf`
///
/// Returns:
/// - `Ok(Some((value, consumed)))` when the field is complete
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the field runs past four bytes
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, FrameError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(FrameError::MalformedRemainingLength);
        }
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }

    if buf.len() >= 4 {
        Err(FrameError::MalformedRemainingLength)
    } else {
        Ok(None)
    }
}

/// A decoded PUBLISH frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
}

/// Decode a complete PUBLISH frame
pub fn decode_publish(frame: &[u8]) -> Result<Publish, FrameError> {
    let (header, mut body) = split_frame(frame)?;
    if header & 0xF0 != PUBLISH {
        return Err(FrameError::UnexpectedPacketType(header));
    }

    let topic = read_string(&mut body)?;
    // QoS 1 and 2 carry a packet identifier after the topic
    if (header >> 1) & 0x03 != 0 {
        ensure(&body, 2)?;
        body.advance(2);
    }

    Ok(Publish {
        topic,
        payload: Bytes::copy_from_slice(body),
    })
}

/// A decoded CONNECT frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub flags: u8,
    pub keep_alive_secs: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Decode a complete CONNECT frame
///
/// Credential fields are read when flagged or when bytes remain, so frames
/// built in either [`FramingMode`] decode.
pub fn decode_connect(frame: &[u8]) -> Result<Connect, FrameError> {
    let (header, mut body) = split_frame(frame)?;
    if header != CONNECT {
        return Err(FrameError::UnexpectedPacketType(header));
    }

    let name = read_field(&mut body)?;
    if name != PROTOCOL_NAME {
        return Err(FrameError::UnexpectedPacketType(header));
    }
    ensure(&body, 4)?;
    let _level = body.get_u8();
    let flags = body.get_u8();
    let keep_alive_secs = body.get_u16();
    let client_id = read_string(&mut body)?;

    let username = if flags & FLAG_USERNAME != 0 || body.has_remaining() {
        Some(read_string(&mut body)?)
    } else {
        None
    };
    let password = if flags & FLAG_PASSWORD != 0 || body.has_remaining() {
        Some(read_string(&mut body)?)
    } else {
        None
    };

    Ok(Connect {
        flags,
        keep_alive_secs,
        client_id,
        username,
        password,
    })
}

/// Acknowledgment returned by the broker for a CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl ConnAck {
    /// Whether the broker accepted the connection
    pub fn accepted(&self) -> bool {
        self.return_code == 0
    }
}

/// Scan arbitrary modem output for a CONNACK frame
///
/// The modem interleaves its own status text with socket data, so the
/// frame can start anywhere in `buf`.
pub fn find_connack(buf: &[u8]) -> Option<ConnAck> {
    buf.windows(4)
        .find(|w| w[0] == CONNACK && w[1] == 0x02 && w[2] & 0xFE == 0 && w[3] <= 0x05)
        .map(|w| ConnAck {
            session_present: w[2] & 0x01 != 0,
            return_code: w[3],
        })
}

fn finish(header: u8, body: &[u8]) -> Result<Bytes, FrameError> {
    let mut frame = BytesMut::with_capacity(body.len() + 5);
    frame.put_u8(header);
    encode_remaining_length(body.len(), &mut frame)?;
    frame.extend_from_slice(body);
    Ok(frame.freeze())
}

fn put_field(buf: &mut BytesMut, field: &[u8]) -> Result<(), FrameError> {
    if field.len() > MAX_FIELD_LENGTH {
        return Err(FrameError::FieldTooLong(field.len()));
    }
    buf.put_u16(field.len() as u16);
    buf.extend_from_slice(field);
    Ok(())
}

fn split_frame(frame: &[u8]) -> Result<(u8, &[u8]), FrameError> {
    ensure(frame, 2)?;
    let header = frame[0];
    let (len, consumed) = decode_remaining_length(&frame[1..])?.ok_or(
        FrameError::NotEnoughData {
            needed: frame.len() + 1,
            available: frame.len(),
        },
    )?;
    let start = 1 + consumed;
    ensure(frame, start + len)?;
    Ok((header, &frame[start..start + len]))
}

fn read_field<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], FrameError> {
    ensure(buf, 2)?;
    let len = buf.get_u16() as usize;
    ensure(buf, len)?;
    let (field, rest) = buf.split_at(len);
    *buf = rest;
    Ok(field)
}

fn read_string(buf: &mut &[u8]) -> Result<String, FrameError> {
    let field = read_field(buf)?;
    String::from_utf8(field.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

fn ensure(buf: &[u8], needed: usize) -> Result<(), FrameError> {
    if buf.len() < needed {
        return Err(FrameError::NotEnoughData {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(mode: FramingMode) -> ConnectOptions<'static> {
        ConnectOptions {
            client_id: "ESP",
            username: "u",
            password: "p",
            keep_alive_secs: 60,
            mode,
        }
    }

    #[test]
    fn test_connect_frame_strict_bytes() {
        let frame = connect_frame(&options(FramingMode::Strict)).expect("encode failed");
        let expected: &[u8] = &[
            0x10, 0x15, // fixed header, remaining length 21
            0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0xC2, 0x00, 0x3C, // variable header
            0x00, 0x03, b'E', b'S', b'P', // client id
            0x00, 0x01, b'u', // username
            0x00, 0x01, b'p', // password
        ];
        assert_eq!(&frame[..], expected);
    }

    #[test]
    fn test_connect_frame_legacy_keeps_fields_without_flags() {
        let frame = connect_frame(&options(FramingMode::Legacy)).expect("encode failed");
        assert_eq!(frame[0], CONNECT);
        assert_eq!(frame[1], 0x15);
        assert_eq!(frame[9], 0x02, "legacy flags byte is clean-session only");

        let decoded = decode_connect(&frame).expect("decode failed");
        assert_eq!(decoded.client_id, "ESP");
        assert_eq!(decoded.username.as_deref(), Some("u"));
        assert_eq!(decoded.password.as_deref(), Some("p"));
    }

    #[test]
    fn test_connect_frame_strict_without_credentials() {
        let opts = ConnectOptions {
            client_id: "dev",
            username: "",
            password: "",
            keep_alive_secs: 60,
            mode: FramingMode::Strict,
        };
        let frame = connect_frame(&opts).expect("encode failed");
        assert_eq!(frame[1] as usize, 10 + 2 + 3);
        assert_eq!(frame[9], 0x02);

        let decoded = decode_connect(&frame).expect("decode failed");
        assert_eq!(decoded.username, None);
        assert_eq!(decoded.password, None);
        assert_eq!(decoded.keep_alive_secs, 60);
    }

    #[test]
    fn test_strict_password_needs_username() {
        let opts = ConnectOptions {
            client_id: "dev",
            username: "",
            password: "secret",
            keep_alive_secs: 60,
            mode: FramingMode::Strict,
        };
        assert_eq!(opts.flags(), 0x02);
    }

    #[test]
    fn test_publish_frame_bytes() {
        let frame = publish_frame("a/b", b"hi").expect("encode failed");
        assert_eq!(&frame[..], &[0x30, 0x07, 0x00, 0x03, b'a', b'/', b'b', b'h', b'i']);
    }

    #[test]
    fn test_pingreq_frame() {
        assert_eq!(&pingreq_frame()[..], &[0xC0, 0x00]);
    }

    #[test]
    fn test_publish_remaining_length_127_fits_one_byte() {
        // 2 (topic length prefix) + 1 (topic) + 124 (payload) = 127
        let payload = vec![b'x'; 124];
        let frame = publish_frame("t", &payload).expect("encode failed");
        assert_eq!(frame[1], 0x7F);
        assert_eq!(frame.len(), 1 + 1 + 127);

        let decoded = decode_publish(&frame).expect("decode failed");
        assert_eq!(decoded.topic, "t");
        assert_eq!(&decoded.payload[..], &payload[..]);
    }

    #[test]
    fn test_publish_remaining_length_128_uses_continuation_byte() {
        // One byte past the single-byte limit
        let payload = vec![b'y'; 125];
        let frame = publish_frame("t", &payload).expect("encode failed");
        assert_eq!(&frame[1..3], &[0x80, 0x01]);
        assert_eq!(frame.len(), 1 + 2 + 128);

        let decoded = decode_publish(&frame).expect("decode failed");
        assert_eq!(decoded.topic, "t");
        assert_eq!(&decoded.payload[..], &payload[..]);
    }

    #[test]
    fn test_publish_roundtrip_json_payload() {
        let topic = "wattscope/sensor/solar";
        let payload = br#"{"voltage":12.41,"ampere":1.2,"power":14.89,"active_conn":"CELLULAR","timestamp":42}"#;
        let frame = publish_frame(topic, payload).expect("encode failed");
        let decoded = decode_publish(&frame).expect("decode failed");
        assert_eq!(decoded.topic, topic);
        assert_eq!(&decoded.payload[..], &payload[..]);
    }

    #[test]
    fn test_remaining_length_boundaries() {
        let cases: &[(usize, &[u8])] = &[
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
            (MAX_REMAINING_LENGTH, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];

        for &(len, encoded) in cases {
            let mut buf = BytesMut::new();
            let written = encode_remaining_length(len, &mut buf).expect("encode failed");
            assert_eq!(&buf[..], encoded, "encoding of {}", len);
            assert_eq!(written, encoded.len());
            assert_eq!(
                decode_remaining_length(encoded).expect("decode failed"),
                Some((len, encoded.len()))
            );
        }
    }

    #[test]
    fn test_remaining_length_too_large() {
        let mut buf = BytesMut::new();
        let result = encode_remaining_length(MAX_REMAINING_LENGTH + 1, &mut buf);
        assert!(matches!(result, Err(FrameError::RemainingLengthTooLarge(_))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_remaining_length_partial_and_malformed() {
        assert_eq!(decode_remaining_length(&[0x80]).expect("decode failed"), None);
        assert_eq!(
            decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF]),
            Err(FrameError::MalformedRemainingLength)
        );
    }

    #[test]
    fn test_topic_too_long() {
        let topic = "t".repeat(MAX_FIELD_LENGTH + 1);
        assert!(matches!(
            publish_frame(&topic, b""),
            Err(FrameError::FieldTooLong(_))
        ));
    }

    #[test]
    fn test_decode_publish_truncated() {
        let frame = publish_frame("a/b", b"hello").expect("encode failed");
        let result = decode_publish(&frame[..frame.len() - 1]);
        assert!(matches!(result, Err(FrameError::NotEnoughData { .. })));
    }

    #[test]
    fn test_decode_publish_rejects_other_packets() {
        let result = decode_publish(&pingreq_frame());
        assert_eq!(result, Err(FrameError::UnexpectedPacketType(PINGREQ)));
    }

    #[test]
    fn test_find_connack_in_modem_output() {
        let mut output = b"\r\nSEND OK\r\n".to_vec();
        output.extend_from_slice(&[0x20, 0x02, 0x00, 0x00]);

        let ack = find_connack(&output).expect("no connack");
        assert!(ack.accepted());
        assert!(!ack.session_present);
    }

    #[test]
    fn test_find_connack_refused_and_absent() {
        let ack = find_connack(&[0x20, 0x02, 0x00, 0x05]).expect("no connack");
        assert!(!ack.accepted());

        // A bare space (0x20) in modem text is not an acknowledgment
        assert_eq!(find_connack(b"SEND OK CLOSED"), None);
    }
}
