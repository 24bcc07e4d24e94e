//! Rendering retrieved memories into the prompt.

use memoria_types::llm::{Message, MessageRole};
use memoria_types::memory::RetrievalResult;

const CONTEXT_HEADER: &str = "## Relevant Context from Memory";
const CONTEXT_INTRO: &str = "The following information was retrieved from the user's memory:";
const CONTEXT_FOOTER: &str =
    "Use this context to provide a more personalized and informed response.";

/// Context block for a retrieval result, or `None` when nothing was found.
pub fn format_memory_context(result: &RetrievalResult) -> Option<String> {
    if result.is_empty() {
        return None;
    }

    let mut block = format!("{CONTEXT_HEADER}\n\n{CONTEXT_INTRO}\n\n");
    for (i, memory) in result.memories.iter().enumerate() {
        block.push_str(&format!(
            "{}. [{}] {}\n",
            i + 1,
            memory.record.memory_type,
            memory.record.text
        ));
    }
    block.push('\n');
    block.push_str(CONTEXT_FOOTER);
    Some(block)
}

/// Insert `block` as a system message right after the leading system
/// prompt, or first when there is none.
pub fn inject_memory_context(messages: &mut Vec<Message>, block: String) {
    let position = match messages.first() {
        Some(first) if first.role == MessageRole::System => 1,
        _ => 0,
    };
    messages.insert(
        position,
        Message {
            role: MessageRole::System,
            content: block,
        },
    );
}
