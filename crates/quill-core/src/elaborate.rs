//! Prompt elaboration for structure requests.

use std::sync::Arc;

use quill_types::util::preview;
use quill_types::{ApiError, ChatRequest, CompletionProvider, ConversationTurn, ModelTier};

const ELABORATOR_INSTRUCTIONS: &str = "\
You are an editor preparing requests for a manuscript-writing model.

Rewrite the writer's request below so it asks for the same thing in more \
detail and with more precision. Do not reinterpret it, change its topic or \
drop any requirement the writer gave.

A good request names the purpose of the document and its audience, the \
sections it needs and what each section should cover, and the expected tone \
and level of formality, as a careful academic or professional editor would.

Reply with the rewritten request only, without any preamble.";

/// Output-format instruction appended to every elaborated prompt.
pub const HTML_SUFFIX: &str = "\n\n\
Format the answer as a valid HTML body fragment. \
Do not include <html>, <head>, <script> or <style> elements. \
Wrap the whole answer in a single <quill-response> element.";

/// Append the HTML output instruction to an elaborated prompt.
pub fn with_html_suffix(prompt: &str) -> String {
    format!("{}{HTML_SUFFIX}", prompt.trim_end())
}

/// Rewrites a structure request into a fuller prompt with one model call.
pub struct Elaborator {
    provider: Arc<dyn CompletionProvider>,
    tier: ModelTier,
}

impl Elaborator {
    pub fn new(provider: Arc<dyn CompletionProvider>, tier: ModelTier) -> Self {
        Self { provider, tier }
    }

    /// Ask the model for an elaborated prompt. Blank replies are
    /// [`ApiError::EmptyResponse`].
    pub async fn elaborate(&self, content: &str) -> Result<String, ApiError> {
        let request = ChatRequest::single(
            self.tier,
            vec![
                ConversationTurn::system(ELABORATOR_INSTRUCTIONS),
                ConversationTurn::user(content),
            ],
        );
        let completion = self.provider.complete(&request).await?;
        match completion.text().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(ApiError::EmptyResponse),
        }
    }

    /// Replace the turn's content with the elaborated prompt plus
    /// [`HTML_SUFFIX`]. Returns the turn unchanged when elaboration fails.
    pub async fn rewrite(&self, turn: ConversationTurn) -> (ConversationTurn, bool) {
        match self.elaborate(&turn.content).await {
            Ok(prompt) => {
                tracing::debug!(prompt = %preview(&prompt, 120), "Elaborated structure request");
                let content = with_html_suffix(&prompt);
                (ConversationTurn { content, ..turn }, true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Elaboration failed; keeping original prompt");
                (turn, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, completion};
    use quill_types::Role;

    #[tokio::test]
    async fn elaborated_prompt_gets_suffix() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion("  Write an outline with five sections.\n")));
        let elaborator = Elaborator::new(provider.clone(), ModelTier::Best);

        let (turn, rewritten) = elaborator
            .rewrite(ConversationTurn::user("outline my essay"))
            .await;
        assert!(rewritten);
        assert_eq!(turn.role, Role::User);
        assert!(turn.content.starts_with("Write an outline with five sections."));
        assert!(turn.content.ends_with(HTML_SUFFIX));

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tier, ModelTier::Best);
        assert!(!requests[0].stream);
        assert_eq!(requests[0].messages[1].content, "outline my essay");
    }

    #[tokio::test]
    async fn failure_keeps_original() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Err(ApiError::Server {
            status: 503,
            message: "busy".into(),
        }));
        let elaborator = Elaborator::new(provider, ModelTier::Fast);

        let original = ConversationTurn::user("outline my essay");
        let (turn, rewritten) = elaborator.rewrite(original.clone()).await;
        assert!(!rewritten);
        assert_eq!(turn, original);
    }

    #[tokio::test]
    async fn blank_reply_is_empty_response() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion("\n  \n")));
        let elaborator = Elaborator::new(provider, ModelTier::Fast);
        assert!(matches!(
            elaborator.elaborate("plan a thesis").await,
            Err(ApiError::EmptyResponse)
        ));
    }

    #[test]
    fn suffix_mentions_wrapper_element() {
        let prompt = with_html_suffix("Do the thing.  ");
        assert!(prompt.starts_with("Do the thing.\n\n"));
        assert!(prompt.contains("<quill-response>"));
        assert!(prompt.contains("<head>"));
    }
}
