use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use vocord_foundation::TransportError;

/// Encode mono i16 samples as base64 little-endian PCM16 for
/// `input_audio_buffer.append`.
pub fn encode_frame(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a base64 PCM16 payload from `response.audio.delta`.
pub fn decode_frame(payload: &str) -> Result<Vec<i16>, TransportError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| TransportError::WebSocket(format!("invalid base64 audio: {}", e)))?;
    if bytes.len() % 2 != 0 {
        return Err(TransportError::WebSocket(format!(
            "odd PCM16 payload length: {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian() {
        // 0x0201 and -2 in LE bytes, then base64
        let encoded = encode_frame(&[0x0201, -2]);
        let decoded = STANDARD.decode(&encoded).unwrap();
        assert_eq!(decoded, vec![0x01, 0x02, 0xfe, 0xff]);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 4634];
        assert_eq!(decode_frame(&encode_frame(&samples)).unwrap(), samples);
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_frame("not base64!!!").is_err());
    }

    #[test]
    fn rejects_odd_byte_count() {
        let payload = STANDARD.encode([0u8, 1, 2]);
        assert!(decode_frame(&payload).is_err());
    }
}
