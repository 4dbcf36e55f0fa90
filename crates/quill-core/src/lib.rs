//! Request pipeline for Quill: classify, elaborate, dispatch and re-emit.

pub mod classify;
pub mod dispatch;
pub mod elaborate;
mod gateway;
pub mod reemit;
pub mod sections;

#[cfg(test)]
mod test_support;

pub use classify::{Classification, ClassificationSource, Classifier};
pub use dispatch::{Dispatcher, TierPolicy};
pub use elaborate::Elaborator;
pub use gateway::{Gateway, PreparedRequest};
pub use reemit::{EmitState, Frame, Reemitter};
pub use sections::{ModificationReply, SectionTag, TaggedSections};
