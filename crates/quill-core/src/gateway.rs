//! The per-request pipeline: trim, classify, elaborate, dispatch, re-emit.

use std::sync::Arc;

use quill_context::{TokenEstimator, trim_with_report};
use quill_types::{CompletionProvider, ConversationTurn, GatewayError, ModelTier, TokenBudget};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::classify::{Classification, Classifier};
use crate::dispatch::{Dispatcher, TierPolicy};
use crate::elaborate::Elaborator;
use crate::reemit::Reemitter;

/// Everything decided about a request before it is dispatched.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// The window that will be sent, oldest first.
    pub turns: Vec<ConversationTurn>,
    pub classification: Classification,
    /// Whether the last turn was replaced by an elaborated prompt.
    pub elaborated: bool,
    pub tier: ModelTier,
}

/// Shared, read-only request handler.
pub struct Gateway {
    provider: Arc<dyn CompletionProvider>,
    estimator: Arc<dyn TokenEstimator>,
    budget: TokenBudget,
    tiers: TierPolicy,
}

impl Gateway {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        estimator: Arc<dyn TokenEstimator>,
        budget: TokenBudget,
        tiers: TierPolicy,
    ) -> Self {
        Self {
            provider,
            estimator,
            budget,
            tiers,
        }
    }

    /// Run the full pipeline and return the client stream.
    ///
    /// Errors are only returned before any output exists. Once a
    /// [`Reemitter`] is handed back, failures surface as its marker.
    pub async fn handle(
        &self,
        turns: Vec<ConversationTurn>,
        cancel: &CancellationToken,
    ) -> Result<Reemitter, GatewayError> {
        let span = tracing::info_span!("chat", request_id = %Uuid::new_v4());
        async move {
            let prepared = self.prepare(turns).await?;
            let upstream = Dispatcher::new(Arc::clone(&self.provider))
                .dispatch(prepared.turns, prepared.tier)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, tier = %prepared.tier, "Dispatch failed");
                    GatewayError::Dispatch(e)
                })?;
            Ok(Reemitter::new(upstream, cancel))
        }
        .instrument(span)
        .await
    }

    /// Trim, classify and elaborate without dispatching.
    pub async fn prepare(
        &self,
        turns: Vec<ConversationTurn>,
    ) -> Result<PreparedRequest, GatewayError> {
        if turns.is_empty() {
            return Err(GatewayError::EmptyConversation);
        }

        let (mut window, report) = trim_with_report(&turns, self.budget, self.estimator.as_ref());
        tracing::debug!(
            kept = report.kept,
            dropped = report.dropped,
            tokens = report.estimated_tokens,
            budget = self.budget.get(),
            "Trimmed conversation"
        );
        let Some(last) = window.pop() else {
            return Err(GatewayError::TruncationDegenerate {
                budget: self.budget.get(),
                last_turn_tokens: report.last_turn_tokens,
            });
        };

        let classification = Classifier::new(Arc::clone(&self.provider), self.tiers.classify)
            .classify(&last)
            .await;

        let mut elaborated = false;
        if classification.structure {
            let (rewritten, ok) = Elaborator::new(Arc::clone(&self.provider), self.tiers.elaborate)
                .rewrite(last.clone())
                .await;
            if ok {
                let mut candidate = window.clone();
                candidate.push(rewritten);
                let refit = self.refit(candidate);
                if refit.is_empty() {
                    tracing::warn!("Elaborated prompt exceeds the token budget; sending original");
                } else {
                    window = refit;
                    elaborated = true;
                }
            }
        }
        if !elaborated {
            window.push(last);
        }

        let tier = self.tiers.dispatch_tier(classification.structure);
        tracing::info!(
            turns = window.len(),
            structure = classification.structure,
            source = ?classification.source,
            elaborated,
            %tier,
            "Prepared request"
        );

        Ok(PreparedRequest {
            turns: window,
            classification,
            elaborated,
            tier,
        })
    }

    /// Trim again after the last turn grew.
    fn refit(&self, turns: Vec<ConversationTurn>) -> Vec<ConversationTurn> {
        let (window, report) = trim_with_report(&turns, self.budget, self.estimator.as_ref());
        if report.dropped > 0 && !window.is_empty() {
            tracing::debug!(dropped = report.dropped, "Dropped older turns to fit elaborated prompt");
        }
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassificationSource, STRUCTURE_MARKER};
    use crate::elaborate::HTML_SUFFIX;
    use crate::reemit::Frame;
    use crate::test_support::{
        ScriptedProvider, completion, delta_event, error_event, finish_event, role_event,
    };
    use futures_util::StreamExt;
    use quill_context::HeuristicEstimator;
    use quill_types::{ApiError, Role, TerminalMarker};

    fn gateway(provider: &Arc<ScriptedProvider>, budget: usize, tiers: TierPolicy) -> Gateway {
        Gateway::new(
            provider.clone(),
            Arc::new(HeuristicEstimator),
            TokenBudget(budget),
            tiers,
        )
    }

    /// Content costing exactly `tokens` under the heuristic estimator.
    fn sized(tokens: usize, fill: char) -> String {
        std::iter::repeat_n(fill, tokens * 4).collect()
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let provider = Arc::new(ScriptedProvider::default());
        let result = gateway(&provider, 100, TierPolicy::default())
            .handle(Vec::new(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GatewayError::EmptyConversation)));
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn oversized_last_turn_is_degenerate() {
        let provider = Arc::new(ScriptedProvider::default());
        let result = gateway(&provider, 10, TierPolicy::default())
            .prepare(vec![ConversationTurn::user(sized(11, 'a'))])
            .await;
        match result {
            Err(GatewayError::TruncationDegenerate {
                budget,
                last_turn_tokens,
            }) => {
                assert_eq!(budget, 10);
                assert_eq!(last_turn_tokens, 11);
            }
            other => panic!("Expected TruncationDegenerate, got {other:?}"),
        }
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn ordinary_request_makes_one_classify_and_one_dispatch() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion("false, a plain question")));
        provider.push_stream(Ok(vec![Ok(delta_event("Paris")), Ok(finish_event("stop"))]));

        let turns = vec![
            ConversationTurn::user(sized(50, 'a')),
            ConversationTurn::assistant(sized(30, 'b')),
            ConversationTurn::user("What is the capital of France?"),
        ];
        let reemitter = gateway(&provider, 60, TierPolicy::default())
            .handle(turns, &CancellationToken::new())
            .await
            .unwrap();
        let frames: Vec<Frame> = reemitter.collect().await;
        assert_eq!(
            frames,
            vec![
                Frame::Text("Paris".into()),
                Frame::Marker(TerminalMarker::FinishReason("stop".into())),
            ]
        );

        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].stream);
        let dispatched = &requests[1];
        assert!(dispatched.stream);
        // The oldest turn no longer fits the budget.
        assert_eq!(dispatched.messages.len(), 2);
        assert_eq!(dispatched.messages[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn structure_marker_elaborates_and_uses_structure_tier() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion("Write a five-part outline on tides.")));
        provider.push_stream(Ok(vec![Ok(delta_event("<quill-response>"))]));

        let tiers = TierPolicy {
            structure_dispatch: ModelTier::Best,
            elaborate: ModelTier::Best,
            ..TierPolicy::default()
        };
        let prepared = gateway(&provider, 4000, tiers)
            .prepare(vec![ConversationTurn::user(format!(
                "{STRUCTURE_MARKER}: tides notes"
            ))])
            .await
            .unwrap();

        assert!(prepared.classification.structure);
        assert_eq!(
            prepared.classification.source,
            ClassificationSource::StructureMarker
        );
        assert!(prepared.elaborated);
        assert_eq!(prepared.tier, ModelTier::Best);
        let last = prepared.turns.last().unwrap();
        assert!(last.content.starts_with("Write a five-part outline on tides."));
        assert!(last.content.ends_with(HTML_SUFFIX));

        // Only the elaboration call; the marker skipped the classifier.
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tier, ModelTier::Best);
    }

    #[tokio::test]
    async fn elaboration_failure_sends_original() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Err(ApiError::Timeout));

        let original = ConversationTurn::user(format!("{STRUCTURE_MARKER}: notes"));
        let prepared = gateway(&provider, 4000, TierPolicy::default())
            .prepare(vec![original.clone()])
            .await
            .unwrap();
        assert!(prepared.classification.structure);
        assert!(!prepared.elaborated);
        assert_eq!(prepared.turns, vec![original]);
    }

    #[tokio::test]
    async fn elaborated_prompt_over_budget_falls_back() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion(&sized(200, 'e'))));

        let original = ConversationTurn::user(format!("{STRUCTURE_MARKER}: notes"));
        let prepared = gateway(&provider, 50, TierPolicy::default())
            .prepare(vec![original.clone()])
            .await
            .unwrap();
        assert!(!prepared.elaborated);
        assert_eq!(prepared.turns, vec![original]);
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported_before_streaming() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion("false")));
        provider.push_stream(Err(ApiError::Server {
            status: 500,
            message: "boom".into(),
        }));

        let result = gateway(&provider, 4000, TierPolicy::default())
            .handle(
                vec![ConversationTurn::user("hello")],
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(GatewayError::Dispatch(ApiError::Server { status: 500, .. }))
        ));
    }

    async fn dispatch_error(provider: &Arc<ScriptedProvider>) -> GatewayError {
        let result = gateway(provider, 4000, TierPolicy::default())
            .handle(
                vec![ConversationTurn::user("hello")],
                &CancellationToken::new(),
            )
            .await;
        match result {
            Err(e) => e,
            Ok(_) => panic!("expected the request to fail before streaming"),
        }
    }

    #[tokio::test]
    async fn error_after_role_preamble_fails_the_request() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion("false")));
        provider.push_stream(Ok(vec![
            Ok(role_event()),
            Err(ApiError::Network("reset".into())),
        ]));
        assert!(matches!(
            dispatch_error(&provider).await,
            GatewayError::Dispatch(ApiError::Network(_))
        ));
    }

    #[tokio::test]
    async fn error_event_first_fails_the_request() {
        let provider = Arc::new(ScriptedProvider::default());
        provider.push_completion(Ok(completion("false")));
        provider.push_stream(Ok(vec![Ok(error_event("content filtered"))]));
        assert!(matches!(
            dispatch_error(&provider).await,
            GatewayError::Dispatch(ApiError::StreamError { .. })
        ));
    }

    #[tokio::test]
    async fn modification_request_skips_model_calls() {
        let provider = Arc::new(ScriptedProvider::default());
        let prepared = gateway(&provider, 4000, TierPolicy::default())
            .prepare(vec![ConversationTurn::user(
                "[MODIFICATION_REQUEST]: Spell check the following content [USER_INPUT] Teh cat",
            )])
            .await
            .unwrap();
        assert!(!prepared.classification.structure);
        assert!(!prepared.elaborated);
        assert_eq!(provider.request_count(), 0);
    }
}
