//! Encoded payload framing
//!
//! `[magic byte 0x00][4-byte big-endian schema id][Avro datum]`

use crate::error::{Result, SchemaError};
use crate::schema::SchemaId;

/// Framing byte that opens every payload
pub const MAGIC_BYTE: u8 = 0x00;

/// Length of the framing byte plus the schema identifier
pub const HEADER_LEN: usize = 5;

/// Prefix a serialized datum with the framing byte and schema identifier
pub fn frame(id: SchemaId, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(HEADER_LEN + body.len());
    payload.push(MAGIC_BYTE);
    payload.extend_from_slice(&id.0.to_be_bytes());
    payload.extend_from_slice(body);
    payload
}

/// Split a payload into its schema identifier and datum bytes
pub fn unframe(payload: &[u8]) -> Result<(SchemaId, &[u8])> {
    if payload.len() < HEADER_LEN {
        return Err(SchemaError::MalformedPayload(format!(
            "payload is {} bytes, shorter than the {}-byte header",
            payload.len(),
            HEADER_LEN
        )));
    }
    if payload[0] != MAGIC_BYTE {
        return Err(SchemaError::MalformedPayload(format!(
            "unexpected framing byte {:#04x}",
            payload[0]
        )));
    }
    let mut id = [0u8; 4];
    id.copy_from_slice(&payload[1..HEADER_LEN]);
    Ok((SchemaId(u32::from_be_bytes(id)), &payload[HEADER_LEN..]))
}

/// Schema identifier of a payload, if its header parses
pub fn peek_schema_id(payload: &[u8]) -> Option<SchemaId> {
    unframe(payload).ok().map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let payload = frame(SchemaId(0x0102_0304), &[0xAA, 0xBB]);
        assert_eq!(payload, vec![0x00, 0x01, 0x02, 0x03, 0x04, 0xAA, 0xBB]);

        let (id, body) = unframe(&payload).unwrap();
        assert_eq!(id, SchemaId(0x0102_0304));
        assert_eq!(body, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_short_payload_is_malformed() {
        for len in 0..HEADER_LEN {
            let payload = vec![0u8; len];
            assert!(matches!(unframe(&payload), Err(SchemaError::MalformedPayload(_))));
        }
        // Header only, empty datum
        assert!(unframe(&[0, 0, 0, 0, 1]).is_ok());
    }

    #[test]
    fn test_wrong_magic_byte() {
        let err = unframe(&[0x01, 0, 0, 0, 1, 2]).unwrap_err();
        assert!(err.to_string().contains("0x01"));
        assert_eq!(peek_schema_id(&[0x01, 0, 0, 0, 1]), None);
        assert_eq!(peek_schema_id(&[0x00, 0, 0, 0, 9]), Some(SchemaId(9)));
    }
}
