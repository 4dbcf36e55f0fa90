//! Conversation and chat-completion wire types.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// Role of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

/// A single turn in a conversation.
///
/// Unknown fields sent by the editor (ids, timestamps, rendered html) are
/// ignored on the way in and never forwarded upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ceiling on the estimated token cost of the turns sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenBudget(pub usize);

impl TokenBudget {
    pub const DEFAULT: TokenBudget = TokenBudget(4000);

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Named upstream model choice trading cost against quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Best,
}

impl ModelTier {
    pub const ALL: [ModelTier; 2] = [ModelTier::Fast, ModelTier::Best];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Best => "best",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(ModelTier::Fast),
            "best" => Ok(ModelTier::Best),
            other => Err(ConfigError::InvalidValue {
                key: "tier".into(),
                message: format!("unknown model tier '{other}' (expected 'fast' or 'best')"),
            }),
        }
    }
}

/// A logical request to the completion service.
///
/// The tier is resolved to a concrete deployment by the provider on every
/// call, so one provider can serve requests for different tiers at once.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub tier: ModelTier,
    pub messages: Vec<ConversationTurn>,
    pub stream: bool,
}

impl ChatRequest {
    /// A non-streaming request (classification, elaboration).
    pub fn single(tier: ModelTier, messages: Vec<ConversationTurn>) -> Self {
        Self {
            tier,
            messages,
            stream: false,
        }
    }

    /// A streaming request (the dispatched completion).
    pub fn streaming(tier: ModelTier, messages: Vec<ConversationTurn>) -> Self {
        Self {
            tier,
            messages,
            stream: true,
        }
    }
}

/// A non-streaming chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub message: Option<ChoiceMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletion {
    /// Text of the first choice, if any.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

/// One `data:` payload of a streaming chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Concatenated content delta of all choices in this chunk.
    pub fn content(&self) -> Option<String> {
        let mut text = String::new();
        for choice in &self.choices {
            if let Some(c) = &choice.delta.content {
                text.push_str(c);
            }
        }
        if text.is_empty() { None } else { Some(text) }
    }

    /// First non-null finish reason in this chunk.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .iter()
            .find_map(|c| c.finish_reason.as_deref())
    }
}

/// The single value carried by the side channel once the primary stream ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalMarker {
    /// The upstream reported why generation stopped.
    FinishReason(String),
    /// The upstream stream ended without a finish reason.
    Done,
    /// The upstream stream failed after the response had started.
    Failed(String),
}

impl Serialize for TerminalMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(untagged)]
        enum Wire<'a> {
            Finish {
                finish_reason: &'a str,
            },
            Done {
                done: bool,
                #[serde(skip_serializing_if = "Option::is_none")]
                error: Option<&'a str>,
            },
        }

        let wire = match self {
            TerminalMarker::FinishReason(reason) => Wire::Finish {
                finish_reason: reason,
            },
            TerminalMarker::Done => Wire::Done {
                done: true,
                error: None,
            },
            TerminalMarker::Failed(message) => Wire::Done {
                done: true,
                error: Some(message),
            },
        };
        wire.serialize(serializer)
    }
}
