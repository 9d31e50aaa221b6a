// ============================================
// File: crates/peerlink-core/src/protocol/codec.rs
// ============================================
//! # Handshake Codec
//!
//! ## Creation Reason
//! Provides binary serialization for handshake messages and the
//! length-prefixed framing used on the raw stream.
//!
//! ## Main Functionality
//! - `Codec` trait: Generic encode/decode interface
//! - `ProtobufCodec`: Protobuf-compatible encoding for all handshake messages
//! - `read_frame` / `write_frame`: 4-byte big-endian length prefix
//!
//! ## Wire Format
//! ```text
//! Frame:  ┌──────────────┬─────────────────────┐
//!         │ len (u32 BE) │ payload (len bytes) │
//!         └──────────────┴─────────────────────┘
//! Field:  varint((number << 3) | wire_type) ‖ value
//! ```
//! Only wire types 0 (varint) and 2 (length-delimited) are produced.
//! Unknown fields of any standard wire type are skipped on decode; a known
//! field number carrying the wrong wire type is rejected.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always validate lengths before slicing
//! - Frame size is checked before the payload is allocated
//!
//! ## Last Modified
//! v0.1.0 - Initial codec implementation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CoreError, Result};
use crate::protocol::messages::{Exchange, KeyType, Propose, PublicKeyMessage};

// ============================================
// Constants
// ============================================

/// Largest frame accepted or produced (8 MiB).
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

// ============================================
// Codec Trait
// ============================================

/// Trait for encoding and decoding protocol messages.
///
/// # Type Parameters
/// * `T` - The message type to encode/decode
pub trait Codec<T> {
    /// Encodes a message into a byte buffer.
    fn encode(&self, msg: &T, buf: &mut BytesMut);

    /// Decodes a message from bytes.
    ///
    /// # Errors
    /// Returns `MalformedMessage` on truncated or invalid input.
    fn decode(&self, buf: &mut Bytes) -> Result<T>;
}

// ============================================
// ProtobufCodec
// ============================================

/// Codec implementation for all handshake messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtobufCodec;

impl ProtobufCodec {
    /// Creates a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

// ============================================
// PublicKeyMessage Codec
// ============================================

impl Codec<PublicKeyMessage> for ProtobufCodec {
    fn encode(&self, msg: &PublicKeyMessage, buf: &mut BytesMut) {
        buf.reserve(msg.data.len() + 8);
        put_varint_field(buf, 1, msg.key_type.as_wire());
        put_bytes_field(buf, 2, &msg.data);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<PublicKeyMessage> {
        let mut key_type = None;
        let mut data = None;

        while let Some((number, value)) = next_field(buf)? {
            match (number, value) {
                (1, FieldValue::Varint(v)) => {
                    key_type = Some(KeyType::from_wire(v).ok_or(CoreError::UnsupportedKeyType(v))?);
                }
                (2, FieldValue::Bytes(b)) => data = Some(b.to_vec()),
                (1 | 2, _) => return Err(wrong_wire_type("public key", number)),
                _ => {}
            }
        }

        Ok(PublicKeyMessage {
            key_type: key_type.ok_or_else(|| CoreError::malformed("public key: missing type"))?,
            data: data.ok_or_else(|| CoreError::malformed("public key: missing data"))?,
        })
    }
}

// ============================================
// Propose Codec
// ============================================

impl Codec<Propose> for ProtobufCodec {
    fn encode(&self, msg: &Propose, buf: &mut BytesMut) {
        buf.reserve(
            msg.rand.len()
                + msg.pubkey.len()
                + msg.exchanges.len()
                + msg.ciphers.len()
                + msg.hashes.len()
                + 20,
        );
        put_bytes_field(buf, 1, &msg.rand);
        put_bytes_field(buf, 2, &msg.pubkey);
        put_bytes_field(buf, 3, msg.exchanges.as_bytes());
        put_bytes_field(buf, 4, msg.ciphers.as_bytes());
        put_bytes_field(buf, 5, msg.hashes.as_bytes());
    }

    fn decode(&self, buf: &mut Bytes) -> Result<Propose> {
        let mut msg = Propose::default();

        while let Some((number, value)) = next_field(buf)? {
            match (number, value) {
                (1, FieldValue::Bytes(b)) => msg.rand = b.to_vec(),
                (2, FieldValue::Bytes(b)) => msg.pubkey = b.to_vec(),
                (3, FieldValue::Bytes(b)) => msg.exchanges = utf8(b, "exchanges")?,
                (4, FieldValue::Bytes(b)) => msg.ciphers = utf8(b, "ciphers")?,
                (5, FieldValue::Bytes(b)) => msg.hashes = utf8(b, "hashes")?,
                (1..=5, _) => return Err(wrong_wire_type("propose", number)),
                _ => {}
            }
        }

        Ok(msg)
    }
}

// ============================================
// Exchange Codec
// ============================================

impl Codec<Exchange> for ProtobufCodec {
    fn encode(&self, msg: &Exchange, buf: &mut BytesMut) {
        buf.reserve(msg.epubkey.len() + msg.signature.len() + 8);
        put_bytes_field(buf, 1, &msg.epubkey);
        put_bytes_field(buf, 2, &msg.signature);
    }

    fn decode(&self, buf: &mut Bytes) -> Result<Exchange> {
        let mut msg = Exchange::default();

        while let Some((number, value)) = next_field(buf)? {
            match (number, value) {
                (1, FieldValue::Bytes(b)) => msg.epubkey = b.to_vec(),
                (2, FieldValue::Bytes(b)) => msg.signature = b.to_vec(),
                (1 | 2, _) => return Err(wrong_wire_type("exchange", number)),
                _ => {}
            }
        }

        Ok(msg)
    }
}

// ============================================
// Convenience Functions
// ============================================

/// Encodes any handshake message into a fresh buffer.
pub fn encode_message<T>(msg: &T) -> Bytes
where
    ProtobufCodec: Codec<T>,
{
    let mut buf = BytesMut::new();
    ProtobufCodec.encode(msg, &mut buf);
    buf.freeze()
}

/// Decodes a handshake message from a byte slice.
///
/// # Errors
/// Returns `MalformedMessage` on invalid input.
pub fn decode_message<T>(data: &[u8]) -> Result<T>
where
    ProtobufCodec: Codec<T>,
{
    let mut buf = Bytes::copy_from_slice(data);
    ProtobufCodec.decode(&mut buf)
}

// ============================================
// Framing
// ============================================

/// Writes one length-prefixed frame and flushes.
///
/// # Errors
/// `MessageTooLarge` if `data` exceeds [`MAX_FRAME_SIZE`], or the I/O error.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(CoreError::MessageTooLarge {
            max: MAX_FRAME_SIZE,
            actual: data.len(),
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u32(data.len() as u32).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
///
/// # Errors
/// `MessageTooLarge` if the announced length exceeds `max`, or the I/O
/// error (including an end of stream in the middle of a frame).
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    let n = reader.read(&mut len_buf).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[n..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max {
        return Err(CoreError::MessageTooLarge { max, actual: len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

// ============================================
// Field Encoding Helpers
// ============================================

enum FieldValue {
    Varint(u64),
    Bytes(Bytes),
    Skipped,
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u8(value as u8);
}

fn put_varint_field(buf: &mut BytesMut, number: u64, value: u64) {
    put_varint(buf, (number << 3) | WIRE_VARINT);
    put_varint(buf, value);
}

fn put_bytes_field(buf: &mut BytesMut, number: u64, data: &[u8]) {
    put_varint(buf, (number << 3) | WIRE_LEN);
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

fn get_varint(buf: &mut Bytes) -> Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(CoreError::malformed("truncated varint"));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CoreError::malformed("varint overflow"))
}

fn next_field(buf: &mut Bytes) -> Result<Option<(u64, FieldValue)>> {
    if !buf.has_remaining() {
        return Ok(None);
    }

    let key = get_varint(buf)?;
    let number = key >> 3;
    if number == 0 {
        return Err(CoreError::malformed("field number zero"));
    }

    let value = match key & 0x7 {
        WIRE_VARINT => FieldValue::Varint(get_varint(buf)?),
        WIRE_LEN => {
            let len = usize::try_from(get_varint(buf)?)
                .map_err(|_| CoreError::malformed("field length overflow"))?;
            if buf.remaining() < len {
                return Err(CoreError::malformed("truncated field"));
            }
            FieldValue::Bytes(buf.split_to(len))
        }
        WIRE_FIXED64 => skip(buf, 8)?,
        WIRE_FIXED32 => skip(buf, 4)?,
        other => return Err(CoreError::malformed(format!("unsupported wire type {other}"))),
    };

    Ok(Some((number, value)))
}

fn skip(buf: &mut Bytes, len: usize) -> Result<FieldValue> {
    if buf.remaining() < len {
        return Err(CoreError::malformed("truncated field"));
    }
    buf.advance(len);
    Ok(FieldValue::Skipped)
}

fn wrong_wire_type(message: &str, number: u64) -> CoreError {
    CoreError::malformed(format!("{message}: field {number} has the wrong wire type"))
}

fn utf8(bytes: Bytes, field: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CoreError::malformed(format!("{field}: not utf-8")))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_propose() -> Propose {
        Propose {
            rand: vec![7u8; 16],
            pubkey: vec![1, 2, 3],
            exchanges: "P-256,P-384".into(),
            ciphers: "AES-256,AES-128".into(),
            hashes: "SHA256,SHA512".into(),
        }
    }

    #[test]
    fn test_propose_roundtrip() {
        let msg = sample_propose();
        let encoded = encode_message(&msg);
        let decoded: Propose = decode_message(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_known_encoding() {
        let msg = Exchange {
            epubkey: vec![0xaa],
            signature: vec![0xbb, 0xcc],
        };
        let encoded = encode_message(&msg);
        assert_eq!(&encoded[..], &[0x0a, 0x01, 0xaa, 0x12, 0x02, 0xbb, 0xcc]);

        let key = PublicKeyMessage {
            key_type: KeyType::Ed25519,
            data: vec![0x01],
        };
        assert_eq!(&encode_message(&key)[..], &[0x08, 0x01, 0x12, 0x01, 0x01]);
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let mut buf = BytesMut::new();
        put_varint_field(&mut buf, 9, 300);
        buf.put_slice(&encode_message(&Exchange {
            epubkey: vec![1, 2],
            signature: vec![3],
        }));
        // fixed32 field 10
        put_varint(&mut buf, (10 << 3) | WIRE_FIXED32);
        buf.put_u32(0xdead_beef);

        let decoded: Exchange = decode_message(&buf).unwrap();
        assert_eq!(decoded.epubkey, vec![1, 2]);
        assert_eq!(decoded.signature, vec![3]);
    }

    #[test]
    fn test_known_field_with_wrong_wire_type_rejected() {
        // Propose.rand sent as a varint.
        let mut buf = BytesMut::new();
        put_varint_field(&mut buf, 1, 16);
        let result: Result<Propose> = decode_message(&buf);
        assert!(matches!(result, Err(CoreError::MalformedMessage { .. })));

        // Propose.hashes sent as a fixed32.
        let mut buf = BytesMut::from(&encode_message(&sample_propose())[..]);
        put_varint(&mut buf, (5 << 3) | WIRE_FIXED32);
        buf.put_u32(1);
        let result: Result<Propose> = decode_message(&buf);
        assert!(matches!(result, Err(CoreError::MalformedMessage { .. })));

        // Exchange.signature sent as a varint.
        let mut buf = BytesMut::new();
        put_bytes_field(&mut buf, 1, &[1, 2]);
        put_varint_field(&mut buf, 2, 7);
        let result: Result<Exchange> = decode_message(&buf);
        assert!(matches!(result, Err(CoreError::MalformedMessage { .. })));

        // PublicKey.type sent length-delimited.
        let mut buf = BytesMut::new();
        put_bytes_field(&mut buf, 1, &[1]);
        put_bytes_field(&mut buf, 2, &[1]);
        let result: Result<PublicKeyMessage> = decode_message(&buf);
        assert!(matches!(result, Err(CoreError::MalformedMessage { .. })));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let encoded = encode_message(&sample_propose());
        let result: Result<Propose> = decode_message(&encoded[..encoded.len() - 3]);
        assert!(matches!(result, Err(CoreError::MalformedMessage { .. })));

        let result: Result<Propose> = decode_message(&[0x0a, 0xff]);
        assert!(result.is_err());
    }

    #[test]
    fn test_public_key_requires_fields() {
        let result: Result<PublicKeyMessage> = decode_message(&[0x12, 0x00]);
        assert!(result.is_err());

        let result: Result<PublicKeyMessage> = decode_message(&[0x08, 0x09, 0x12, 0x00]);
        assert!(matches!(result, Err(CoreError::UnsupportedKeyType(9))));
    }

    #[test]
    fn test_varint_multibyte() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 300);
        assert_eq!(&buf[..], &[0xac, 0x02]);
        let mut bytes = buf.freeze();
        assert_eq!(get_varint(&mut bytes).unwrap(), 300);
    }

    #[tokio::test]
    async fn test_frame_roundtrip_and_eof() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, b"hello").await.unwrap();
        write_frame(&mut a, b"").await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().unwrap(), &b"hello"[..]);
        assert_eq!(read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().unwrap().len(), 0);
        assert!(read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(1024).await.unwrap();

        let err = read_frame(&mut b, 512).await.unwrap_err();
        assert!(matches!(err, CoreError::MessageTooLarge { max: 512, actual: 1024 }));
    }
}
