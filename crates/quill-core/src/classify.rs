//! Structure-request classification of the latest user turn.
//!
//! Literal markers are checked first. Only when neither marker matches is the
//! model asked, and any failure there counts as "not a structure request".

use std::sync::Arc;

use quill_types::util::preview;
use quill_types::{ChatRequest, CompletionProvider, ConversationTurn, ModelTier, Role};

use crate::sections::SectionTag;

/// Phrase the editor's "add structure" action puts in front of selected text.
pub const STRUCTURE_MARKER: &str = "Add structure to the following content";

const CLASSIFIER_INSTRUCTIONS: &str = "\
You decide whether a writer is asking for help with the STRUCTURE of a document.

Structure requests ask for any of: structure, template, outline, draft, thesis, \
framework, layout, skeleton, format, organize, plan, sections, headings, table of contents.
Requests to fix, shorten, translate, explain or continue existing text are NOT structure requests.

Answer with a single word, true or false, followed by one sentence of justification.

Examples:
Input: Can you give me an outline for an essay about renewable energy?
Output: true, the user asks for an outline.
Input: Draft a thesis statement and the main sections for my report on urban housing.
Output: true, the user asks for a thesis and sections.
Input: What is the capital of Australia?
Output: false, this is a factual question.
Input: Fix the grammar in this paragraph.
Output: false, this is an edit of existing text.";

/// Why a turn was or was not classified as a structure request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSource {
    StructureMarker,
    ModificationMarker,
    /// The last turn was not written by the user.
    NotUser,
    Model,
    /// The model call failed or returned nothing usable.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub structure: bool,
    pub source: ClassificationSource,
}

impl Classification {
    fn new(structure: bool, source: ClassificationSource) -> Self {
        Self { structure, source }
    }
}

/// Decide from literal markers alone, without any network call.
pub fn classify_by_marker(content: &str) -> Option<Classification> {
    if content.contains(STRUCTURE_MARKER) {
        return Some(Classification::new(true, ClassificationSource::StructureMarker));
    }
    let modification_marker = format!("{}:", SectionTag::ModificationRequest);
    if content.contains(&modification_marker) {
        return Some(Classification::new(
            false,
            ClassificationSource::ModificationMarker,
        ));
    }
    None
}

/// Whether a model verdict reads as positive.
pub fn interpret_verdict(answer: &str) -> bool {
    answer.to_lowercase().contains("true")
}

/// Classifies the latest turn, falling back to one model call.
pub struct Classifier {
    provider: Arc<dyn CompletionProvider>,
    tier: ModelTier,
}

impl Classifier {
    pub fn new(provider: Arc<dyn CompletionProvider>, tier: ModelTier) -> Self {
        Self { provider, tier }
    }

    pub async fn classify(&self, last: &ConversationTurn) -> Classification {
        if last.role != Role::User {
            return Classification::new(false, ClassificationSource::NotUser);
        }
        if let Some(decided) = classify_by_marker(&last.content) {
            tracing::debug!(source = ?decided.source, "Classified by marker");
            return decided;
        }

        let request = ChatRequest::single(
            self.tier,
            vec![
                ConversationTurn::system(CLASSIFIER_INSTRUCTIONS),
                ConversationTurn::user(last.content.clone()),
            ],
        );

        match self.provider.complete(&request).await {
            Ok(completion) => match completion.text().map(str::trim) {
                Some(answer) if !answer.is_empty() => {
                    let structure = interpret_verdict(answer);
                    tracing::debug!(
                        structure,
                        verdict = %preview(answer, 80),
                        "Classified by model"
                    );
                    Classification::new(structure, ClassificationSource::Model)
                }
                _ => {
                    tracing::warn!("Classifier returned an empty verdict; treating as negative");
                    Classification::new(false, ClassificationSource::Fallback)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Classifier call failed; treating as negative");
                Classification::new(false, ClassificationSource::Fallback)
            }
        }
    }
}
