//! Prompt construction for each pipeline stage.
//!
//! Pure string transformations: every function takes the records a stage
//! holds and returns the text submitted to the language model, plus the
//! structured schema the model must answer with where one applies.

use crate::model::{Engram, Prompt, Response};

/// Prompt for conversation-direction analysis: user intent plus working
/// memory.
pub fn render_conversation(prompt: &Prompt) -> String {
    let mut out = String::from(
        "<instructions>\n\
         You are in a conversation with the user. Review the current user \
         input and provide the current user intent and a description of your \
         working memory.\n\
         \n\
         user_intent: write in dense keywords what the current user input is \
         really intending, which may not be explicitly stated. Omit filler \
         words while capturing important details.\n\
         \n\
         working_memory: a register of variables tracking all elements of \
         the conversation. Keyword phrases, integers, floats, or arrays; \
         never sentences or long strings over 10 words.\n\
         </instructions>\n",
    );

    if let Some(repo_ids) = &prompt.selected_repo_ids {
        out.push_str("<selected_repos>\n");
        for repo_id in repo_ids {
            out.push_str(repo_id);
            out.push('\n');
        }
        out.push_str("</selected_repos>\n");
    }

    out.push_str("<current_user_input>\n");
    out.push_str(&prompt.prompt_str);
    out.push_str("\n</current_user_input>\n");
    out
}

/// Schema for the conversation-direction analysis reply.
pub fn conversation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "current_user_intent": {"type": "string"},
            "working_memory": {"type": "object"}
        },
        "required": ["current_user_intent"]
    })
}

/// Prompt asking for lookup strings that would retrieve helpful memory for
/// answering the user.
pub fn render_lookup_indices(prompt: &Prompt) -> String {
    format!(
        "Based on the user prompt, generate lookup strings that will define \
         additional data that would help you generate a response to the user \
         prompt.\n\
         <user_prompt>\n{}\n</user_prompt>\n",
        prompt.prompt_str
    )
}

/// Prompt asking for lookup strings describing one engram.
pub fn render_gen_indices(engram: &Engram) -> String {
    format!(
        "Generate lookup strings that a future query would use to find the \
         memory below. Each string should be short, information dense, and \
         capture one fact or association from the memory.\n\
         {}",
        engram.render()
    )
}

/// Schema shared by both index-generation prompts.
pub fn index_array_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "index_text_array": {
                "type": "array",
                "items": {"type": "string"}
            }
        },
        "required": ["index_text_array"]
    })
}

/// The main response prompt: the user's question grounded in retrieved
/// memory.
pub fn render_main(prompt: &Prompt, intent: &str, engrams: &[Engram]) -> String {
    let mut out = String::new();
    if !engrams.is_empty() {
        out.push_str("<domain_knowledge>\n");
        for engram in engrams {
            out.push_str(&engram.render());
        }
        out.push_str("</domain_knowledge>\n");
    }
    if !intent.is_empty() {
        out.push_str("<user_intent>\n");
        out.push_str(intent);
        out.push_str("\n</user_intent>\n");
    }
    out.push_str("<user_prompt>\n");
    out.push_str(&prompt.prompt_str);
    out.push_str("\n</user_prompt>\n");
    out
}

/// Prompt asking the model to codify a completed exchange into engrams and
/// summary metadata.
pub fn render_codify(response: &Response) -> String {
    format!(
        "Convert the exchange below into durable memory. Extract each \
         distinct piece of knowledge as an engram with its grounding context \
         (such as a topic or section title), whether the text is verbatim \
         from the response, and integer accuracy and relevancy scores from 1 \
         to 5. Also provide a one-line initial summary, a full summary, and \
         keywords for the whole exchange.\n\
         <user_prompt>\n{}\n</user_prompt>\n\
         <response>\n{}\n</response>\n",
        response.prompt.prompt_str, response.response
    )
}

/// Schema for the codify reply.
pub fn codify_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "summary_initial": {"type": "string"},
            "summary_full": {"type": "string"},
            "keywords": {"type": "array", "items": {"type": "string"}},
            "engrams": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": {"type": "string"},
                        "context": {"type": "object"},
                        "is_native_source": {"type": "boolean"},
                        "accuracy": {"type": "integer"},
                        "relevancy": {"type": "integer"}
                    },
                    "required": ["content"]
                }
            }
        },
        "required": ["summary_full", "engrams"]
    })
}
