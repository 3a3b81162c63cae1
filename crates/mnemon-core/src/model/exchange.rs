//! Records flowing through one user exchange: prompt, analysis, retrieval
//! result, and the model's response.

use serde::{Deserialize, Serialize};

/// A user query submitted to the pipeline. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Opaque prompt id.
    pub id: String,
    /// The user's query text.
    pub prompt_str: String,
    /// Routes the resulting exchange through codification for later playback.
    #[serde(default)]
    pub training_mode: bool,
    /// Repositories the user has scoped the query to, if any.
    #[serde(default)]
    pub selected_repo_ids: Option<Vec<String>>,
    /// Arbitrary inputs consumed by the template renderer.
    #[serde(default)]
    pub input_data: serde_json::Map<String, serde_json::Value>,
}

impl Prompt {
    /// Create a prompt with a fresh id.
    pub fn new(prompt_str: impl Into<String>) -> Self {
        Self {
            id: super::fresh_id(),
            prompt_str: prompt_str.into(),
            training_mode: false,
            selected_repo_ids: None,
            input_data: serde_json::Map::new(),
        }
    }

    /// Mark the prompt for training-mode processing.
    pub fn with_training_mode(mut self, training_mode: bool) -> Self {
        self.training_mode = training_mode;
        self
    }

    /// Scope the prompt to a set of repositories.
    pub fn with_selected_repos(mut self, repo_ids: Vec<String>) -> Self {
        self.selected_repo_ids = Some(repo_ids);
        self
    }
}

/// Keyword-form user intent plus a working-memory map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationDirection {
    /// Dense keyword statement of what the user is really asking for.
    pub current_user_intent: String,
    /// Register of conversation-state variables.
    #[serde(default)]
    pub working_memory: serde_json::Map<String, serde_json::Value>,
}

/// Derived facts produced by the retrieve stage. Bound 1:1 to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptAnalysis {
    /// The prompt this analysis was derived from.
    pub prompt_id: String,
    /// Conversation direction extracted by the analysis model.
    pub conversation_direction: ConversationDirection,
    /// Lookup strings used to search the vector store.
    pub indices: Vec<String>,
}

/// The output of the retrieve stage: analysis plus the ordered candidate
/// engram ids selected by vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveResult {
    /// The prompt this result answers.
    pub prompt_id: String,
    /// Candidate engram ids, ordered by vector distance.
    pub engram_ids: Vec<String>,
}

/// The model's answer with references back to everything that produced it.
/// Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Opaque response id; becomes the `source_id` of the memory round.
    pub id: String,
    /// The model's answer text.
    pub response: String,
    /// The originating prompt.
    pub prompt: Prompt,
    /// The analysis of that prompt.
    pub analysis: PromptAnalysis,
    /// The retrieval result the answer drew on.
    pub retrieve_result: RetrieveResult,
}

impl Response {
    /// Create a response with a fresh id.
    pub fn new(
        response: impl Into<String>,
        prompt: Prompt,
        analysis: PromptAnalysis,
        retrieve_result: RetrieveResult,
    ) -> Self {
        Self {
            id: super::fresh_id(),
            response: response.into(),
            prompt,
            analysis,
            retrieve_result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_defaults() {
        let prompt = Prompt::new("hello");
        assert!(!prompt.training_mode);
        assert!(prompt.selected_repo_ids.is_none());
        assert!(uuid::Uuid::parse_str(&prompt.id).is_ok());
    }

    #[test]
    fn prompt_builder_flags() {
        let prompt = Prompt::new("hello")
            .with_training_mode(true)
            .with_selected_repos(vec!["repo-1".to_string()]);
        assert!(prompt.training_mode);
        assert_eq!(prompt.selected_repo_ids.as_deref(), Some(&["repo-1".to_string()][..]));
    }

    #[test]
    fn prompt_deserializes_without_optional_fields() {
        let prompt: Prompt =
            serde_json::from_str(r#"{"id": "p1", "prompt_str": "hi"}"#).expect("deserialize");
        assert!(!prompt.training_mode);
        assert!(prompt.input_data.is_empty());
    }

    #[test]
    fn response_roundtrip() {
        let prompt = Prompt::new("question");
        let analysis = PromptAnalysis {
            prompt_id: prompt.id.clone(),
            conversation_direction: ConversationDirection::default(),
            indices: vec!["lookup".to_string()],
        };
        let retrieve = RetrieveResult {
            prompt_id: prompt.id.clone(),
            engram_ids: vec!["e1".to_string()],
        };
        let response = Response::new("answer", prompt, analysis, retrieve);

        let json = serde_json::to_string(&response).expect("serialize");
        let back: Response = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, response);
    }
}
