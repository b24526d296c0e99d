//! Wire framing for the TCP bus
//!
//! Each frame is one JSON header line followed by `len` raw payload bytes:
//!
//! ```text
//! {"op":"pub","subject":"node.1.step.start","reply_to":"_INBOX.c.9","len":5}\n
//! hello
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::messaging::errors::{MessagingError, MessagingResult};

/// Largest payload accepted on the wire
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Header line of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FrameHeader {
    /// Client registers a subscription
    Sub { sid: u64, pattern: String },
    /// Client drops a subscription
    Unsub { sid: u64 },
    /// Client publishes
    Pub {
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        len: usize,
    },
    /// Broker delivers to a subscription
    Msg {
        sid: u64,
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        len: usize,
    },
    /// Broker reports that a request reached nobody
    NoResponders { subject: String, reply_to: String },
}

impl FrameHeader {
    fn payload_len(&self) -> usize {
        match self {
            Self::Pub { len, .. } | Self::Msg { len, .. } => *len,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn control(header: FrameHeader) -> Self {
        Self {
            header,
            payload: Vec::new(),
        }
    }

    pub fn publish(subject: impl Into<String>, reply_to: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader::Pub {
                subject: subject.into(),
                reply_to,
                len: payload.len(),
            },
            payload,
        }
    }

    pub fn deliver(sid: u64, subject: impl Into<String>, reply_to: Option<String>, payload: Vec<u8>) -> Self {
        Self {
            header: FrameHeader::Msg {
                sid,
                subject: subject.into(),
                reply_to,
                len: payload.len(),
            },
            payload,
        }
    }
}

/// Read one frame; `None` on clean end of stream
pub async fn read_frame<R>(reader: &mut R) -> MessagingResult<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }

    let header: FrameHeader = serde_json::from_str(line.trim_end())
        .map_err(|e| MessagingError::protocol(format!("invalid frame header: {e}")))?;

    let len = header.payload_len();
    if len > MAX_PAYLOAD_BYTES {
        return Err(MessagingError::MessageTooLarge {
            size_bytes: len,
            limit_bytes: MAX_PAYLOAD_BYTES,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Frame { header, payload }))
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> MessagingResult<()>
where
    W: AsyncWrite + Unpin,
{
    if frame.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(MessagingError::MessageTooLarge {
            size_bytes: frame.payload.len(),
            limit_bytes: MAX_PAYLOAD_BYTES,
        });
    }
    let mut header = serde_json::to_vec(&frame.header)
        .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
    header.push(b'\n');
    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}
