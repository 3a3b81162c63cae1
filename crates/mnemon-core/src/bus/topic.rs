//! The closed topic enumeration and the wire envelope.

use crate::error::BusError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every topic the fabric carries. The wire literal is the variant name as
/// written here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// A new prompt entering the pipeline.
    SubmitPrompt,
    /// Retrieval finished for a prompt.
    RetrieveComplete,
    /// The main response is ready.
    MainPromptComplete,
    /// Codify produced an observation.
    ObservationComplete,
    /// The observation meta gained its summary embedding.
    MetaComplete,
    /// Engrams were registered for consolidation.
    EngramCreated,
    /// Index records were created for an engram.
    IndexCreated,
    /// An engram's full index set is attached.
    IndexComplete,
    /// Fully enriched engrams are ready for storage.
    EngramComplete,
    /// Solicits a `Status` reply from every service.
    Acknowledge,
    /// A service's metrics snapshot.
    Status,
    /// Toggles training mode across services.
    SetTrainingMode,
    /// Requests host shutdown.
    Shutdown,
}

impl Topic {
    /// All topics, used by the broker to mirror the whole fabric.
    pub const ALL: [Topic; 13] = [
        Topic::SubmitPrompt,
        Topic::RetrieveComplete,
        Topic::MainPromptComplete,
        Topic::ObservationComplete,
        Topic::MetaComplete,
        Topic::EngramCreated,
        Topic::IndexCreated,
        Topic::IndexComplete,
        Topic::EngramComplete,
        Topic::Acknowledge,
        Topic::Status,
        Topic::SetTrainingMode,
        Topic::Shutdown,
    ];

    /// The literal wire string for this topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SubmitPrompt => "SUBMIT_PROMPT",
            Topic::RetrieveComplete => "RETRIEVE_COMPLETE",
            Topic::MainPromptComplete => "MAIN_PROMPT_COMPLETE",
            Topic::ObservationComplete => "OBSERVATION_COMPLETE",
            Topic::MetaComplete => "META_COMPLETE",
            Topic::EngramCreated => "ENGRAM_CREATED",
            Topic::IndexCreated => "INDEX_CREATED",
            Topic::IndexComplete => "INDEX_COMPLETE",
            Topic::EngramComplete => "ENGRAM_COMPLETE",
            Topic::Acknowledge => "ACKNOWLEDGE",
            Topic::Status => "STATUS",
            Topic::SetTrainingMode => "SET_TRAINING_MODE",
            Topic::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .iter()
            .copied()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| BusError::UnknownTopic {
                topic: s.to_string(),
            })
    }
}

/// A topic plus its JSON payload: the unit the fabric moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The topic this message was published on.
    pub topic: Topic,
    /// The serialized record for the topic.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(topic: Topic, payload: serde_json::Value) -> Self {
        Self { topic, payload }
    }

    /// Encode into the broker's two wire frames: topic bytes, payload JSON.
    pub fn to_frames(&self) -> (Vec<u8>, Vec<u8>) {
        (
            self.topic.as_str().as_bytes().to_vec(),
            self.payload.to_string().into_bytes(),
        )
    }

    /// Decode from the broker's two wire frames.
    pub fn from_frames(topic: &[u8], payload: &[u8]) -> Result<Self, BusError> {
        let topic_str = std::str::from_utf8(topic).map_err(|e| BusError::MalformedFrame {
            message: format!("topic frame is not UTF-8: {e}"),
        })?;
        let topic = Topic::from_str(topic_str)?;
        let payload =
            serde_json::from_slice(payload).map_err(|e| BusError::MalformedFrame {
                message: format!("payload frame is not JSON: {e}"),
            })?;
        Ok(Self { topic, payload })
    }
}
