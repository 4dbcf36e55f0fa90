//! Tagged-section micro-format carried inside prompt and response text.
//!
//! Version 1 grammar:
//!
//! ```text
//! document := preamble section*
//! section  := "[" TAG "]" [":"] body
//! ```
//!
//! Any string parses. Text before the first known tag is the preamble;
//! bracketed words that are not known tags stay part of the surrounding
//! body. Lookups are by tag, so section order does not matter.

use std::fmt;

/// Known section tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionTag {
    /// A context-menu action on selected text (spell check, summarize, ...).
    ModificationRequest,
    /// The user's original text the request applies to.
    UserInput,
    /// The model's rewritten version of the user's text.
    ModifiedUserInput,
    /// The model's explanation of what it changed.
    Modifications,
}

impl SectionTag {
    pub const ALL: [SectionTag; 4] = [
        SectionTag::ModificationRequest,
        SectionTag::UserInput,
        SectionTag::ModifiedUserInput,
        SectionTag::Modifications,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SectionTag::ModificationRequest => "MODIFICATION_REQUEST",
            SectionTag::UserInput => "USER_INPUT",
            SectionTag::ModifiedUserInput => "MODIFIED_USER_INPUT",
            SectionTag::Modifications => "MODIFICATIONS",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.name())
    }
}

/// One parsed section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub tag: SectionTag,
    pub body: String,
}

/// A parsed document: preamble plus sections in the order they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedSections {
    pub preamble: String,
    pub sections: Vec<Section>,
}

impl TaggedSections {
    /// Parse `text`. Never fails.
    pub fn parse(text: &str) -> Self {
        let mut doc = TaggedSections::default();
        let mut current: Option<SectionTag> = None;
        let mut body_start = 0usize;
        let mut cursor = 0usize;

        while let Some(rel) = text[cursor..].find('[') {
            let open = cursor + rel;
            let Some(close_rel) = text[open..].find(']') else {
                break;
            };
            let close = open + close_rel;
            let Some(tag) = SectionTag::from_name(&text[open + 1..close]) else {
                cursor = open + 1;
                continue;
            };

            doc.push(current, &text[body_start..open]);
            current = Some(tag);
            let mut after = close + 1;
            if text[after..].starts_with(':') {
                after += 1;
            }
            body_start = after;
            cursor = after;
        }
        doc.push(current, &text[body_start..]);
        doc
    }

    fn push(&mut self, tag: Option<SectionTag>, raw: &str) {
        match tag {
            None => self.preamble = raw.trim().to_string(),
            Some(tag) => self.sections.push(Section {
                tag,
                body: raw.trim().to_string(),
            }),
        }
    }

    /// Whether a section with this tag is present.
    pub fn contains(&self, tag: SectionTag) -> bool {
        self.sections.iter().any(|s| s.tag == tag)
    }

    /// Body of the first section with this tag.
    pub fn get(&self, tag: SectionTag) -> Option<&str> {
        self.sections
            .iter()
            .find(|s| s.tag == tag)
            .map(|s| s.body.as_str())
    }

    /// Append a section.
    pub fn with(mut self, tag: SectionTag, body: impl Into<String>) -> Self {
        self.sections.push(Section {
            tag,
            body: body.into(),
        });
        self
    }

    /// Render back to text, one `[TAG]: body` line per section.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.preamble.is_empty() {
            out.push_str(&self.preamble);
            out.push('\n');
        }
        for section in &self.sections {
            out.push_str(&format!("{}: {}\n", section.tag, section.body));
        }
        out
    }
}

/// Typed view of a model reply to a modification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationReply {
    /// Rewritten user text, if the model returned one.
    pub modified_input: Option<String>,
    /// Explanation of the changes, if any.
    pub modifications: Option<String>,
    /// Anything the model wrote outside the known sections.
    pub commentary: String,
}

impl ModificationReply {
    pub fn parse(reply: &str) -> Self {
        let doc = TaggedSections::parse(reply);
        let non_empty = |tag| {
            doc.get(tag)
                .filter(|body| !body.is_empty())
                .map(str::to_string)
        };
        Self {
            modified_input: non_empty(SectionTag::ModifiedUserInput),
            modifications: non_empty(SectionTag::Modifications),
            commentary: doc.preamble.clone(),
        }
    }
}
