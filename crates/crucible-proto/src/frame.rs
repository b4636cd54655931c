//! Length-prefixed frame codec for the supervisor/worker byte stream.
//!
//! Each frame is laid out as:
//! ```text
//! +-----+----------------+---------------+
//! | tag | length (u32 BE)| payload bytes |
//! +-----+----------------+---------------+
//! ```
//!
//! The tag table is fixed (see [`FrameTag`]); the protocol is not versioned
//! beyond it. A clean end-of-stream at a frame boundary is reported as
//! `Ok(None)` so callers can tell an orderly close from a truncated frame,
//! which is always a [`ProtocolError`].

use std::io::{self, Read, Write};

use thiserror::Error;

/// Upper bound on a single frame payload.
///
/// The length field comes from the peer and is not trusted beyond this
/// ceiling, which keeps a corrupted or hostile child from forcing an
/// arbitrarily large allocation.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Message tags exchanged on the wire.
///
/// `REQUEST` travels supervisor-to-worker; the rest travel worker-to-
/// supervisor. Connection loss has no tag: it is inferred from stream
/// closure before `ALL_COMPLETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    /// Serialized target list plus options, supervisor to worker.
    Request = 1,
    /// Validation of one target has begun.
    Started = 2,
    /// A log line produced while validating the current target.
    Log = 3,
    /// One target finished, with its failure count.
    ItemComplete = 4,
    /// Every target in the request has been processed.
    AllComplete = 5,
}

impl FrameTag {
    /// Maps a raw tag byte back to a [`FrameTag`].
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Request),
            2 => Some(Self::Started),
            3 => Some(Self::Log),
            4 => Some(Self::ItemComplete),
            5 => Some(Self::AllComplete),
            _ => None,
        }
    }
}

/// Errors raised while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The stream ended or a read failed partway through a frame.
    #[error("truncated frame: {context}")]
    Truncated {
        /// Which part of the frame was cut short.
        context: &'static str,
        /// Underlying I/O error, if the failure was not a bare EOF.
        #[source]
        source: Option<io::Error>,
    },

    /// The tag byte does not appear in the tag table.
    #[error("unknown frame tag {tag:#04x}")]
    UnknownTag {
        /// Raw tag byte read from the stream.
        tag: u8,
    },

    /// The declared payload length exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload length {length} exceeds limit of {limit} bytes")]
    OversizedPayload {
        /// Length declared in the frame header.
        length: u32,
        /// Maximum accepted length.
        limit: u32,
    },

    /// A payload did not decode as the message its tag promised.
    #[error("malformed {what} payload: {source}")]
    MalformedPayload {
        /// Message kind that failed to decode.
        what: &'static str,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A frame arrived whose tag is not valid in the current direction.
    #[error("unexpected {tag:?} frame")]
    UnexpectedFrame {
        /// Tag of the offending frame.
        tag: FrameTag,
    },

    /// Attempted to encode a message that has no wire representation.
    #[error("message has no wire representation")]
    NotEncodable,

    /// Writing a frame to the stream failed.
    #[error("failed to write frame: {source}")]
    Write {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Writes one frame and flushes the stream.
///
/// Flushing after every frame is deliberate: workers must never sit on
/// buffered progress events, and back-pressure from a slow reader is
/// expected to block the writer rather than drop data.
///
/// # Errors
///
/// Returns [`ProtocolError::OversizedPayload`] if the payload exceeds
/// [`MAX_PAYLOAD_LEN`], or [`ProtocolError::Write`] on I/O failure.
pub fn write_frame(
    writer: &mut impl Write,
    tag: FrameTag,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let length = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or(ProtocolError::OversizedPayload {
            length: u32::try_from(payload.len()).unwrap_or(u32::MAX),
            limit: MAX_PAYLOAD_LEN,
        })?;

    let mut header = [0u8; 5];
    header[0] = tag as u8;
    header[1..5].copy_from_slice(&length.to_be_bytes());

    writer
        .write_all(&header)
        .and_then(|()| writer.write_all(payload))
        .and_then(|()| writer.flush())
        .map_err(|source| ProtocolError::Write { source })
}

/// Reads one frame, blocking until it is complete.
///
/// Returns `Ok(None)` when the stream is cleanly closed at a frame
/// boundary. EOF anywhere else is a truncated frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Truncated`] when the stream ends mid-frame,
/// [`ProtocolError::UnknownTag`] for a tag outside the table, and
/// [`ProtocolError::OversizedPayload`] when the declared length exceeds
/// the limit.
pub fn read_frame(reader: &mut impl Read) -> Result<Option<(FrameTag, Vec<u8>)>, ProtocolError> {
    let raw_tag = match read_tag_byte(reader) {
        Ok(Some(byte)) => byte,
        Ok(None) => return Ok(None),
        Err(source) => {
            return Err(ProtocolError::Truncated {
                context: "tag byte",
                source: Some(source),
            });
        }
    };

    let tag = FrameTag::from_u8(raw_tag).ok_or(ProtocolError::UnknownTag { tag: raw_tag })?;

    let mut length_bytes = [0u8; 4];
    read_exact_or_truncated(reader, &mut length_bytes, "length header")?;
    let length = u32::from_be_bytes(length_bytes);

    if length > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::OversizedPayload {
            length,
            limit: MAX_PAYLOAD_LEN,
        });
    }

    let mut payload = vec![0u8; length as usize];
    read_exact_or_truncated(reader, &mut payload, "payload")?;

    Ok(Some((tag, payload)))
}

/// Reads the leading tag byte, distinguishing clean EOF from data.
fn read_tag_byte(reader: &mut impl Read) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

fn read_exact_or_truncated(
    reader: &mut impl Read,
    buffer: &mut [u8],
    context: &'static str,
) -> Result<(), ProtocolError> {
    reader.read_exact(buffer).map_err(|source| {
        let source = if source.kind() == io::ErrorKind::UnexpectedEof {
            None
        } else {
            Some(source)
        };
        ProtocolError::Truncated { context, source }
    })
}
