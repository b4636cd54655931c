//! Typed messages carried inside protocol frames.
//!
//! A run is one [`ValidationRequest`] frame from the supervisor followed
//! by a stream of [`ValidationEvent`] frames from the worker. Each event
//! variant maps to exactly one [`FrameTag`]; [`ValidationEvent::ConnectionLost`]
//! is the exception — it is synthesized by the supervisor side when the
//! stream dies and never appears on the wire.

use serde::{Deserialize, Serialize};

use crate::frame::{FrameTag, ProtocolError};
use crate::options::ValidationOptions;
use crate::target::ValidationTarget;

/// The single request message a worker receives per run.
///
/// Carries a non-empty ordered target list and one options value applied
/// uniformly to every target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    targets: Vec<ValidationTarget>,
    options: ValidationOptions,
}

impl ValidationRequest {
    /// Creates a request. Emptiness of `targets` is the supervisor's
    /// precondition to enforce; the type itself does not reject it.
    #[must_use]
    pub const fn new(targets: Vec<ValidationTarget>, options: ValidationOptions) -> Self {
        Self { targets, options }
    }

    /// Returns the ordered targets of the run.
    #[must_use]
    pub fn targets(&self) -> &[ValidationTarget] {
        &self.targets
    }

    /// Returns the options applied to every target.
    #[must_use]
    pub const fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Encodes the request into a `REQUEST` frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if serialisation fails.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|source| ProtocolError::MalformedPayload {
            what: "request",
            source,
        })
    }

    /// Decodes a `REQUEST` frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] if the payload is not a
    /// valid request document.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(payload).map_err(|source| ProtocolError::MalformedPayload {
            what: "request",
            source,
        })
    }
}

/// Progress notifications describing a validation run.
///
/// Other than [`ValidationEvent::ConnectionLost`], events originate in
/// the worker and arrive in the order the worker emitted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationEvent {
    /// Validation of one target has begun.
    Started {
        /// Identifier of the target now being validated.
        target_id: String,
    },
    /// A log line from the test suite.
    Log {
        /// The log text, exactly as the suite produced it.
        text: String,
    },
    /// One target finished.
    ItemComplete {
        /// Identifier of the finished target.
        target_id: String,
        /// Number of failed checks; zero means the target passed.
        failure_count: u32,
    },
    /// The whole request has been processed; always the final event of a
    /// successful run.
    AllComplete,
    /// The worker vanished before signalling completion. Synthesized
    /// locally; never encoded.
    ConnectionLost,
}

#[derive(Serialize, Deserialize)]
struct StartedPayload {
    target_id: String,
}

#[derive(Serialize, Deserialize)]
struct LogPayload {
    text: String,
}

#[derive(Serialize, Deserialize)]
struct ItemCompletePayload {
    target_id: String,
    failure_count: u32,
}

impl ValidationEvent {
    /// Returns the frame tag this event travels under, or `None` for the
    /// synthesized [`ValidationEvent::ConnectionLost`].
    #[must_use]
    pub const fn tag(&self) -> Option<FrameTag> {
        match self {
            Self::Started { .. } => Some(FrameTag::Started),
            Self::Log { .. } => Some(FrameTag::Log),
            Self::ItemComplete { .. } => Some(FrameTag::ItemComplete),
            Self::AllComplete => Some(FrameTag::AllComplete),
            Self::ConnectionLost => None,
        }
    }

    /// Encodes the event into a `(tag, payload)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] on serialisation
    /// failure, or [`ProtocolError::NotEncodable`] for
    /// [`ValidationEvent::ConnectionLost`], which only exists locally.
    pub fn encode(&self) -> Result<(FrameTag, Vec<u8>), ProtocolError> {
        let malformed = |source| ProtocolError::MalformedPayload {
            what: "event",
            source,
        };
        match self {
            Self::Started { target_id } => Ok((
                FrameTag::Started,
                serde_json::to_vec(&StartedPayload {
                    target_id: target_id.clone(),
                })
                .map_err(malformed)?,
            )),
            Self::Log { text } => Ok((
                FrameTag::Log,
                serde_json::to_vec(&LogPayload { text: text.clone() }).map_err(malformed)?,
            )),
            Self::ItemComplete {
                target_id,
                failure_count,
            } => Ok((
                FrameTag::ItemComplete,
                serde_json::to_vec(&ItemCompletePayload {
                    target_id: target_id.clone(),
                    failure_count: *failure_count,
                })
                .map_err(malformed)?,
            )),
            Self::AllComplete => Ok((FrameTag::AllComplete, Vec::new())),
            Self::ConnectionLost => Err(ProtocolError::NotEncodable),
        }
    }

    /// Decodes an event from a frame received on the supervisor side.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedFrame`] for a `REQUEST` tag
    /// (requests only travel the other way) and
    /// [`ProtocolError::MalformedPayload`] when the payload does not match
    /// the tag.
    pub fn decode(tag: FrameTag, payload: &[u8]) -> Result<Self, ProtocolError> {
        let malformed = |source| ProtocolError::MalformedPayload {
            what: "event",
            source,
        };
        match tag {
            FrameTag::Request => Err(ProtocolError::UnexpectedFrame { tag }),
            FrameTag::Started => {
                let StartedPayload { target_id } =
                    serde_json::from_slice(payload).map_err(malformed)?;
                Ok(Self::Started { target_id })
            }
            FrameTag::Log => {
                let LogPayload { text } = serde_json::from_slice(payload).map_err(malformed)?;
                Ok(Self::Log { text })
            }
            FrameTag::ItemComplete => {
                let ItemCompletePayload {
                    target_id,
                    failure_count,
                } = serde_json::from_slice(payload).map_err(malformed)?;
                Ok(Self::ItemComplete {
                    target_id,
                    failure_count,
                })
            }
            FrameTag::AllComplete => Ok(Self::AllComplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::started(ValidationEvent::Started { target_id: "pluginA".into() }, FrameTag::Started)]
    #[case::log(ValidationEvent::Log { text: "checking bus layout".into() }, FrameTag::Log)]
    #[case::item_complete(
        ValidationEvent::ItemComplete { target_id: "pluginA".into(), failure_count: 2 },
        FrameTag::ItemComplete
    )]
    #[case::all_complete(ValidationEvent::AllComplete, FrameTag::AllComplete)]
    fn event_round_trip(#[case] event: ValidationEvent, #[case] expected_tag: FrameTag) {
        let (tag, payload) = event.encode().expect("encode");
        assert_eq!(tag, expected_tag);
        assert_eq!(event.tag(), Some(expected_tag));
        let back = ValidationEvent::decode(tag, &payload).expect("decode");
        assert_eq!(back, event);
    }

    #[test]
    fn connection_lost_has_no_wire_form() {
        assert_eq!(ValidationEvent::ConnectionLost.tag(), None);
        assert!(ValidationEvent::ConnectionLost.encode().is_err());
    }

    #[test]
    fn request_tag_is_rejected_on_the_event_path() {
        let err = ValidationEvent::decode(FrameTag::Request, b"{}").expect_err("should fail");
        assert!(matches!(
            err,
            ProtocolError::UnexpectedFrame {
                tag: FrameTag::Request
            }
        ));
    }

    #[test]
    fn mismatched_payload_is_malformed() {
        let err =
            ValidationEvent::decode(FrameTag::Started, b"not json").expect_err("should fail");
        assert!(matches!(err, ProtocolError::MalformedPayload { .. }));
    }

    #[test]
    fn request_round_trip() {
        let request = ValidationRequest::new(
            vec![
                crate::ValidationTarget::path("pluginA"),
                crate::ValidationTarget::path("pluginB"),
            ],
            crate::ValidationOptions::default().with_strictness(7),
        );
        let payload = request.encode().expect("encode");
        let back = ValidationRequest::decode(&payload).expect("decode");
        assert_eq!(back, request);
        assert_eq!(back.targets().len(), 2);
    }

    #[test]
    fn truncated_request_payload_is_malformed() {
        let payload = ValidationRequest::new(
            vec![crate::ValidationTarget::path("pluginA")],
            crate::ValidationOptions::default(),
        )
        .encode()
        .expect("encode");
        let err =
            ValidationRequest::decode(&payload[..payload.len() / 2]).expect_err("should fail");
        assert!(matches!(err, ProtocolError::MalformedPayload { .. }));
    }
}
