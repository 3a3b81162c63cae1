//! Default values for configuration fields.

pub(super) fn pull_endpoint() -> String {
    "tcp://*:5556".to_string()
}

pub(super) fn pub_endpoint() -> String {
    "tcp://127.0.0.1:5557".to_string()
}

pub(super) fn broker_enabled() -> bool {
    true
}

pub(super) fn n_results() -> usize {
    2
}

pub(super) fn threshold() -> f32 {
    0.5
}

pub(super) fn llm_provider() -> String {
    "gemini".to_string()
}

pub(super) fn llm_model() -> String {
    "gemini-2.0-flash".to_string()
}

pub(super) fn api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

pub(super) fn embedding_model() -> String {
    "text-embedding-004".to_string()
}

pub(super) fn embedding_dimensions() -> usize {
    768
}

pub(super) fn root_path() -> String {
    "local_storage".to_string()
}

pub(super) fn database_file() -> String {
    "documents.db".to_string()
}

pub(super) fn accuracy_floor() -> i64 {
    1
}

pub(super) fn relevancy_floor() -> i64 {
    1
}

pub(super) fn join_grace_ms() -> u64 {
    1_000
}
