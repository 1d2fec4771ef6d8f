//! Wire protocol for the primordial channel
//!
//! Wire format:
//! ```text
//! Frame:
//!   [4 bytes: body length (u32 BE)]
//!   [body bytes (MessagePack-encoded `Frame`)]
//! ```
//!
//! The first frame a child sends is always `Hello`. Everything that rides on
//! top of the channel travels either as a control frame (`BindReceiver`,
//! `RunService`, `Shutdown`) or as an opaque [`Message`].

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{HostError, Result};

/// Default upper bound for a single frame body (16 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

static NEXT_ENDPOINT: AtomicU64 = AtomicU64::new(1);

/// Opaque handle naming one endpoint of the RPC layer above the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointHandle(u64);

impl EndpointHandle {
    /// Allocate a handle that is unique within this process
    pub fn new() -> Self {
        Self(NEXT_ENDPOINT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl Default for EndpointHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Request to bind a named interface to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverBindingRequest {
    interface: String,
    endpoint: EndpointHandle,
}

impl ReceiverBindingRequest {
    pub fn new(interface: impl Into<String>, endpoint: EndpointHandle) -> Self {
        Self {
            interface: interface.into(),
            endpoint,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn endpoint(&self) -> EndpointHandle {
        self.endpoint
    }
}

/// A raw message carried over the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    name: String,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Build a message whose payload is `value` encoded as MessagePack
    pub fn encode<T: Serialize>(name: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(name, rmp_serde::to_vec(value)?))
    }

    /// Deserialize the payload into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        rmp_serde::from_slice(&self.payload).map_err(HostError::from)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Unit of transfer on the primordial channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Child-to-parent handshake
    Hello { pid: u32, token: String },
    /// Bind an interface on the receiving side
    BindReceiver(ReceiverBindingRequest),
    /// Ask the child to run a named top-level service
    RunService {
        service: String,
        receiver: EndpointHandle,
    },
    Message(Message),
    /// Orderly teardown notice
    Shutdown,
}

impl Frame {
    /// Serialize to wire format, including the length prefix
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = rmp_serde::to_vec(self)?;
        let len = u32::try_from(body.len()).map_err(|_| HostError::FrameTooLarge {
            len: body.len(),
            max: u32::MAX as usize,
        })?;

        let mut buf = Vec::with_capacity(4 + body.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Size of the encoded body, excluding the length prefix
    pub fn body_len(&self) -> Result<usize> {
        let mut counter = ByteCounter(0);
        rmp_serde::encode::write(&mut counter, self)?;
        Ok(counter.0)
    }

    /// Parse a frame body (after the length prefix)
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(HostError::InvalidFrame("empty frame".to_string()));
        }
        rmp_serde::from_slice(body).map_err(HostError::from)
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::BindReceiver(_) => "bind_receiver",
            Frame::RunService { .. } => "run_service",
            Frame::Message(_) => "message",
            Frame::Shutdown => "shutdown",
        }
    }
}

/// Sink that only counts what is written to it
struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Validate a length prefix against the frame limit
pub(crate) fn check_len(len_buf: [u8; 4], max: usize) -> Result<usize> {
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(HostError::InvalidFrame("zero-length frame".to_string()));
    }
    if len > max {
        return Err(HostError::FrameTooLarge { len, max });
    }
    Ok(len)
}

/// Read one frame from a blocking reader
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
pub fn read_frame<R: Read>(reader: &mut R, max: usize) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut len_buf) {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e.into());
    }

    let len = check_len(len_buf, max)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Frame::from_body(&body).map(Some)
}

/// Write one frame to a blocking writer
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.to_bytes()?)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::io::Cursor;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn test_frame_stream() {
        let frames = [
            Frame::Hello {
                pid: 42,
                token: "abc".to_string(),
            },
            Frame::RunService {
                service: "echo".to_string(),
                receiver: EndpointHandle::from_raw(7),
            },
            Frame::Shutdown,
        ];

        let mut wire = Vec::new();
        for frame in &frames {
            write_frame(&mut wire, frame).unwrap();
        }

        let mut cursor = Cursor::new(wire);
        for expected in &frames {
            let frame = read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).unwrap();
            assert_eq!(frame.as_ref(), Some(expected));
        }
        assert!(read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).unwrap().is_none());
    }

    #[test]
    fn test_body_len_matches_encoding() {
        let frame = Frame::RunService {
            service: "echo".to_string(),
            receiver: EndpointHandle::from_raw(5),
        };
        assert_eq!(frame.body_len().unwrap() + 4, frame.to_bytes().unwrap().len());
    }

    #[test]
    fn test_message_payload_decode() {
        let message = Message::encode("ping", &Ping { seq: 3 }).unwrap();
        assert_eq!(message.name(), "ping");
        assert_eq!(message.decode::<Ping>().unwrap(), Ping { seq: 3 });
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0, 0]);
        let result = read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN);
        assert!(matches!(result, Err(HostError::InvalidFrame(_))));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let bytes = Frame::Message(Message::new("big", vec![0; 64]))
            .to_bytes()
            .unwrap();
        let mut cursor = Cursor::new(bytes);
        let result = read_frame(&mut cursor, 16);
        assert!(matches!(result, Err(HostError::FrameTooLarge { max: 16, .. })));
    }

    #[test]
    fn test_truncated_body_is_error() {
        let mut bytes = Frame::Shutdown.to_bytes().unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 9, 1]);
        let mut cursor = Cursor::new(bytes);
        assert!(read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN).unwrap().is_some());
        assert!(matches!(
            read_frame(&mut cursor, DEFAULT_MAX_FRAME_LEN),
            Err(HostError::Io(_))
        ));
    }

    #[test]
    fn test_endpoint_handles_are_fresh() {
        assert_ne!(EndpointHandle::new(), EndpointHandle::new());
    }
}
