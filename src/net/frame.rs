use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

pub const TAG_AUTHENTICATE: u8 = 1;
pub const TAG_EXPERIENCE_DELTA: u8 = 2;
pub const TAG_CHARACTER_STATE_DELTA: u8 = 3;
pub const TAG_WORLD_STATE_REPORT: u8 = 4;

pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// One wire frame: `u32_be length | u8 tag | payload[length-1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub enum ReadFrameOutcome {
    Frame(Frame),
    /// The read timed out before any header byte arrived; the connection
    /// loop uses the gap for push work.
    Timeout,
    /// The peer closed the connection cleanly between frames.
    Closed,
}

/// Byte-stream abstraction the delta server runs on. Production uses
/// `TcpFrameTransport`; tests use an in-memory implementation.
pub trait FrameTransport {
    fn peer_addr(&self) -> Option<SocketAddr>;
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), String>;
    fn read_frame(&mut self, max_len: usize) -> Result<ReadFrameOutcome, String>;
    fn write_frame(&mut self, tag: u8, payload: &[u8]) -> Result<(), String>;
}

pub struct TcpFrameTransport {
    stream: TcpStream,
}

impl TcpFrameTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl FrameTransport for TcpFrameTransport {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), String> {
        self.stream
            .set_read_timeout(timeout)
            .map_err(|err| format!("read timeout set failed: {err}"))
    }

    fn read_frame(&mut self, max_len: usize) -> Result<ReadFrameOutcome, String> {
        read_frame(&mut self.stream, max_len)
    }

    fn write_frame(&mut self, tag: u8, payload: &[u8]) -> Result<(), String> {
        write_frame(&mut self.stream, tag, payload)
            .map_err(|err| format!("write frame failed: {err}"))
    }
}

pub fn read_frame(stream: &mut impl Read, max_len: usize) -> Result<ReadFrameOutcome, String> {
    let mut header = [0u8; 4];
    match read_full(stream, &mut header) {
        ReadFull::Done => {}
        ReadFull::Eof { consumed: 0 } => return Ok(ReadFrameOutcome::Closed),
        ReadFull::Eof { consumed } => {
            return Err(format!("connection closed inside frame header ({consumed}/4 bytes)"));
        }
        ReadFull::Timeout { consumed: 0 } => return Ok(ReadFrameOutcome::Timeout),
        ReadFull::Timeout { .. } => {
            return Err("read timed out inside frame header".to_string());
        }
        ReadFull::Err(err) => return Err(format!("header read failed: {err}")),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err("frame length is zero".to_string());
    }
    if len > max_len {
        return Err(format!("frame length {len} exceeds max {max_len}"));
    }

    let mut body = vec![0u8; len];
    match read_full(stream, &mut body) {
        ReadFull::Done => {}
        ReadFull::Eof { consumed } => {
            return Err(format!("connection closed inside frame body ({consumed}/{len} bytes)"));
        }
        ReadFull::Timeout { .. } => return Err("read timed out inside frame body".to_string()),
        ReadFull::Err(err) => return Err(format!("body read failed: {err}")),
    }

    let tag = body[0];
    let payload = body.split_off(1);
    Ok(ReadFrameOutcome::Frame(Frame { tag, payload }))
}

pub fn write_frame(stream: &mut impl Write, tag: u8, payload: &[u8]) -> std::io::Result<()> {
    let len = payload.len() + 1;
    let len_u32 = u32::try_from(len)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame too large"))?;
    stream.write_all(&len_u32.to_be_bytes())?;
    stream.write_all(&[tag])?;
    stream.write_all(payload)?;
    stream.flush()
}

enum ReadFull {
    Done,
    Eof { consumed: usize },
    Timeout { consumed: usize },
    Err(std::io::Error),
}

/// Loops on short reads until the buffer is full, the peer closes, or
/// the socket read timeout fires.
fn read_full(stream: &mut impl Read, buffer: &mut [u8]) -> ReadFull {
    let mut consumed = 0;
    while consumed < buffer.len() {
        match stream.read(&mut buffer[consumed..]) {
            Ok(0) => return ReadFull::Eof { consumed },
            Ok(read) => consumed += read,
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                return ReadFull::Timeout { consumed };
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return ReadFull::Err(err),
        }
    }
    ReadFull::Done
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(tag: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_frame(&mut bytes, tag, payload).expect("write frame");
        bytes
    }

    #[test]
    fn frame_roundtrip() {
        let bytes = framed(TAG_EXPERIENCE_DELTA, b"hello");
        assert_eq!(&bytes[..4], &[0, 0, 0, 6]);
        assert_eq!(bytes[4], TAG_EXPERIENCE_DELTA);
        let mut cursor = Cursor::new(bytes);
        match read_frame(&mut cursor, MAX_FRAME_LEN).expect("read") {
            ReadFrameOutcome::Frame(frame) => {
                assert_eq!(frame.tag, TAG_EXPERIENCE_DELTA);
                assert_eq!(frame.payload, b"hello");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn tag_only_frame_has_empty_payload() {
        let bytes = framed(TAG_WORLD_STATE_REPORT, &[]);
        let mut cursor = Cursor::new(bytes);
        match read_frame(&mut cursor, MAX_FRAME_LEN).expect("read") {
            ReadFrameOutcome::Frame(frame) => {
                assert_eq!(frame.tag, TAG_WORLD_STATE_REPORT);
                assert!(frame.payload.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn clean_eof_between_frames_is_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(matches!(
            read_frame(&mut cursor, MAX_FRAME_LEN).expect("read"),
            ReadFrameOutcome::Closed
        ));
    }

    #[test]
    fn eof_inside_header_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8, 0]);
        assert!(read_frame(&mut cursor, MAX_FRAME_LEN).is_err());
    }

    #[test]
    fn eof_inside_body_is_an_error() {
        let mut bytes = framed(TAG_AUTHENTICATE, b"token");
        bytes.truncate(bytes.len() - 2);
        let mut cursor = Cursor::new(bytes);
        assert!(read_frame(&mut cursor, MAX_FRAME_LEN).is_err());
    }

    #[test]
    fn zero_length_frame_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 0]);
        assert!(read_frame(&mut cursor, MAX_FRAME_LEN).is_err());
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        bytes.push(TAG_AUTHENTICATE);
        let mut cursor = Cursor::new(bytes);
        assert!(read_frame(&mut cursor, MAX_FRAME_LEN).is_err());
    }

    #[test]
    fn short_reads_are_reassembled() {
        struct OneByteReader {
            bytes: Vec<u8>,
            pos: usize,
        }
        impl std::io::Read for OneByteReader {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.pos >= self.bytes.len() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.bytes[self.pos];
                self.pos += 1;
                Ok(1)
            }
        }
        let mut reader = OneByteReader {
            bytes: framed(TAG_CHARACTER_STATE_DELTA, b"abc"),
            pos: 0,
        };
        match read_frame(&mut reader, MAX_FRAME_LEN).expect("read") {
            ReadFrameOutcome::Frame(frame) => assert_eq!(frame.payload, b"abc"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
