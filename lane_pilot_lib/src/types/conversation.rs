use serde::{Deserialize, Serialize};

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Reference to an image, either a public URL or a `data:` URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One piece of a turn. Serializes to the chat-completions content part shape:
/// `{"type": "text", "text": ..}` or `{"type": "image_url", "image_url": {"url": ..}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<Segment>,
}

impl Turn {
    pub fn new(role: Role, content: Vec<Segment>) -> Self {
        Self { role, content }
    }
}

/// Ordered, role-tagged turns sent to the vision-language model.
///
/// Built fresh for every frame and never modified after it is handed to the
/// model client.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of image segments across all turns
    pub fn image_count(&self) -> usize {
        self.turns
            .iter()
            .flat_map(|t| t.content.iter())
            .filter(|s| matches!(s, Segment::ImageUrl { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_segments_use_chat_wire_shape() {
        let turn = Turn::new(
            Role::User,
            vec![Segment::text("Input:"), Segment::image("data:image/png;base64,AAAA")],
        );

        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "Input:"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]
            })
        );
    }

    #[test]
    fn test_conversation_serializes_as_message_list() {
        let conversation = Conversation::new(vec![
            Turn::new(Role::User, vec![Segment::text("hi")]),
            Turn::new(Role::Assistant, vec![Segment::text("hello")]),
        ]);

        let value = serde_json::to_value(&conversation).unwrap();
        assert!(value.is_array());
        assert_eq!(value[1]["role"], "assistant");
        assert_eq!(conversation.image_count(), 0);
    }
}
