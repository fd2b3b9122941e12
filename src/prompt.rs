use crate::conversation::Message;

/// Assemble the messages submitted for one turn.
///
/// The system prompt always comes first, followed by the most recent
/// `max_messages` entries of `conversation`, oldest first.
pub fn build(conversation: &[Message], system_prompt: &str, max_messages: usize) -> Vec<Message> {
    let start = conversation.len().saturating_sub(max_messages);
    let window = &conversation[start..];

    let mut messages = Vec::with_capacity(window.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend_from_slice(window);
    messages
}
