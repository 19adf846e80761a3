//! Length-prefixed frame codec for the client socket.

use crate::ProtoError;

/// Maximum accepted frame body (message type byte + payload).
///
/// A peer declaring more than this is treated as a protocol violation and
/// its connection is dropped; the cap bounds the memory an adversarial
/// client can force the agent to buffer.
pub const MAX_FRAME_BODY: usize = 256 * 1024;

/// Try to decode exactly one frame from the front of `buf`.
///
/// Returns `Ok(Some((message_type, payload)))` and drains the consumed bytes
/// if a complete frame is present, `Ok(None)` without consuming anything if
/// more bytes are needed, and an error for structurally invalid frames
/// (oversized length, zero-length body).
pub fn decode_frame(buf: &mut Vec<u8>) -> Result<Option<(u8, Vec<u8>)>, ProtoError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len == 0 {
        // A frame must at least carry the message type byte.
        return Err(ProtoError::Malformed("empty frame"));
    }
    if len > MAX_FRAME_BODY {
        return Err(ProtoError::Oversize {
            len,
            max: MAX_FRAME_BODY,
        });
    }
    if buf.len() < 4 + len {
        return Ok(None);
    }
    let body: Vec<u8> = buf.drain(..4 + len).skip(4).collect();
    let msg_type = body[0];
    let payload = body[1..].to_vec();
    Ok(Some((msg_type, payload)))
}

/// Encode one frame.  Fails only if the payload would exceed the frame cap.
pub fn encode_frame(msg_type: u8, payload: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let body_len = payload.len() + 1;
    if body_len > MAX_FRAME_BODY {
        return Err(ProtoError::Oversize {
            len: body_len,
            max: MAX_FRAME_BODY,
        });
    }
    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    out.push(msg_type);
    out.extend_from_slice(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let frame = encode_frame(13, b"payload").unwrap();
        let mut buf = frame;
        let (t, p) = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(t, 13);
        assert_eq!(p, b"payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn byte_by_byte_never_yields_early() {
        let frame = encode_frame(11, &[1, 2, 3, 4]).unwrap();
        let mut buf = Vec::new();
        for (i, b) in frame.iter().enumerate() {
            buf.push(*b);
            let got = decode_frame(&mut buf).unwrap();
            if i + 1 < frame.len() {
                assert!(got.is_none(), "spurious frame after {} bytes", i + 1);
            } else {
                let (t, p) = got.unwrap();
                assert_eq!(t, 11);
                assert_eq!(p, [1, 2, 3, 4]);
            }
        }
    }

    #[test]
    fn incomplete_frame_consumes_nothing() {
        let frame = encode_frame(11, &[9; 32]).unwrap();
        let mut buf = frame[..10].to_vec();
        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn two_frames_decode_in_order() {
        let mut buf = encode_frame(1, b"a").unwrap();
        buf.extend(encode_frame(2, b"b").unwrap());
        let (t1, p1) = decode_frame(&mut buf).unwrap().unwrap();
        let (t2, p2) = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!((t1, p1.as_slice()), (1, b"a".as_slice()));
        assert_eq!((t2, p2.as_slice()), (2, b"b".as_slice()));
        assert!(decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_a_violation() {
        let mut buf = ((MAX_FRAME_BODY + 1) as u32).to_be_bytes().to_vec();
        buf.push(11);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(ProtoError::Oversize { .. })
        ));
    }

    #[test]
    fn zero_length_body_is_a_violation() {
        let mut buf = 0u32.to_be_bytes().to_vec();
        assert!(matches!(
            decode_frame(&mut buf),
            Err(ProtoError::Malformed(_))
        ));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_BODY];
        assert!(matches!(
            encode_frame(1, &payload),
            Err(ProtoError::Oversize { .. })
        ));
    }
}
