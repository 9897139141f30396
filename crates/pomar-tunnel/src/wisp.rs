//! Wisp frame codec.
//!
//! Every frame is little-endian with no alignment or padding:
//!
//! ```text
//! type: u8 | streamId: u32 | payload: bytes
//! ```
//!
//! A minimum valid frame is five bytes; CONTINUE and CLOSE carry a further
//! four or one payload byte respectively.

/// CONNECT frame type.
pub const FRAME_CONNECT: u8 = 0x01;
/// DATA frame type.
pub const FRAME_DATA: u8 = 0x02;
/// CONTINUE frame type.
pub const FRAME_CONTINUE: u8 = 0x03;
/// CLOSE frame type.
pub const FRAME_CLOSE: u8 = 0x04;

/// CONNECT stream type for TCP; the only one the tunnel admits.
pub const STREAM_TYPE_TCP: u8 = 0x01;

/// CLOSE reason: voluntary close (clean EOF).
pub const CLOSE_VOLUNTARY: u8 = 0x01;
/// CLOSE reason: network error on the relayed socket.
pub const CLOSE_NETWORK_ERROR: u8 = 0x02;
/// CLOSE reason: CONNECT carried invalid or disallowed information.
pub const CLOSE_INVALID: u8 = 0x41;

/// A parsed frame borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Frame type byte.
    pub frame_type: u8,
    /// Stream identifier.
    pub stream_id: u32,
    /// Raw payload bytes following the header.
    pub payload: &'a [u8],
}

/// Parsed CONNECT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPayload {
    /// Requested stream type.
    pub stream_type: u8,
    /// Destination port.
    pub port: u16,
    /// Destination hostname, UTF-8.
    pub hostname: String,
}

/// Parse a frame header. Returns `None` for frames shorter than the fixed
/// five-byte header; unknown frame types are left to the caller.
#[must_use]
pub fn parse_frame(data: &[u8]) -> Option<Frame<'_>> {
    if data.len() < 5 {
        return None;
    }
    Some(Frame {
        frame_type: data[0],
        stream_id: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
        payload: &data[5..],
    })
}

/// Parse a CONNECT payload: `streamType: u8 | port: u16 | hostname: utf8`.
#[must_use]
pub fn parse_connect(payload: &[u8]) -> Option<ConnectPayload> {
    if payload.len() < 3 {
        return None;
    }
    let hostname = std::str::from_utf8(&payload[3..]).ok()?;
    Some(ConnectPayload {
        stream_type: payload[0],
        port: u16::from_le_bytes([payload[1], payload[2]]),
        hostname: hostname.to_string(),
    })
}

/// Serialize a DATA frame.
#[must_use]
pub fn make_data(stream_id: u32, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + data.len());
    frame.push(FRAME_DATA);
    frame.extend_from_slice(&stream_id.to_le_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Serialize a CONTINUE frame carrying a flow-control credit.
#[must_use]
pub fn make_continue(stream_id: u32, buffer_remaining: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(9);
    frame.push(FRAME_CONTINUE);
    frame.extend_from_slice(&stream_id.to_le_bytes());
    frame.extend_from_slice(&buffer_remaining.to_le_bytes());
    frame
}

/// Serialize a CLOSE frame with a reason byte.
#[must_use]
pub fn make_close(stream_id: u32, reason: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6);
    frame.push(FRAME_CLOSE);
    frame.extend_from_slice(&stream_id.to_le_bytes());
    frame.push(reason);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_is_five_bytes_little_endian() {
        let mut data = vec![FRAME_CONNECT];
        data.extend_from_slice(&7u32.to_le_bytes());
        data.extend_from_slice(b"payload");

        let frame = parse_frame(&data).unwrap();
        assert_eq!(frame.frame_type, FRAME_CONNECT);
        assert_eq!(frame.stream_id, 7);
        assert_eq!(frame.payload, b"payload");
    }

    #[test]
    fn short_frames_are_rejected() {
        assert!(parse_frame(&[]).is_none());
        assert!(parse_frame(&[FRAME_DATA, 0, 0, 0]).is_none());
        // Exactly five bytes is a valid empty-payload frame.
        assert!(parse_frame(&[FRAME_DATA, 0, 0, 0, 0]).is_some());
    }

    #[test]
    fn connect_payload_round_trips() {
        let mut payload = vec![STREAM_TYPE_TCP];
        payload.extend_from_slice(&443u16.to_le_bytes());
        payload.extend_from_slice(b"buy.itunes.apple.com");

        let connect = parse_connect(&payload).unwrap();
        assert_eq!(connect.stream_type, STREAM_TYPE_TCP);
        assert_eq!(connect.port, 443);
        assert_eq!(connect.hostname, "buy.itunes.apple.com");
    }

    #[test]
    fn connect_payload_requires_header() {
        assert!(parse_connect(&[0x01, 0xbb]).is_none());
        // Empty hostname parses; admission rejects it later.
        assert!(parse_connect(&[0x01, 0xbb, 0x01]).is_some());
    }

    #[test]
    fn data_frame_preserves_bytes() {
        let frame = make_data(42, b"hello");
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.frame_type, FRAME_DATA);
        assert_eq!(parsed.stream_id, 42);
        assert_eq!(parsed.payload, b"hello");
    }

    #[test]
    fn continue_frame_carries_credit() {
        let frame = make_continue(1, 131_072);
        assert_eq!(frame.len(), 9);
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.frame_type, FRAME_CONTINUE);
        assert_eq!(
            u32::from_le_bytes(parsed.payload.try_into().unwrap()),
            131_072
        );
    }

    #[test]
    fn close_frame_carries_reason() {
        let frame = make_close(9, CLOSE_INVALID);
        assert_eq!(frame.len(), 6);
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.frame_type, FRAME_CLOSE);
        assert_eq!(parsed.stream_id, 9);
        assert_eq!(parsed.payload, &[CLOSE_INVALID]);
    }
}
