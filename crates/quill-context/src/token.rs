//! Token estimation against a fixed model vocabulary.

use quill_types::ConfigError;
use tiktoken_rs::CoreBPE;

/// The encoding used when none is configured.
pub const DEFAULT_ENCODING: &str = "cl100k_base";

/// Default over-estimation margin, in percent.
pub const DEFAULT_MARGIN_PERCENT: u32 = 5;

/// Estimates the token cost of a piece of text.
///
/// Implementations must be pure and deterministic: the same input always
/// yields the same count.
pub trait TokenEstimator: Send + Sync {
    /// Estimated number of tokens in `text`.
    fn estimate(&self, text: &str) -> usize;

    /// Name of the encoding this estimator counts against.
    fn encoding(&self) -> &str;
}

/// BPE estimator backed by a tiktoken vocabulary, padded by a safety margin.
pub struct BpeEstimator {
    bpe: CoreBPE,
    encoding: &'static str,
    margin_percent: u32,
}

impl BpeEstimator {
    /// Build an estimator for a named encoding.
    pub fn new(encoding: &str, margin_percent: u32) -> Result<Self, ConfigError> {
        let (encoding, loaded) = match encoding {
            "cl100k_base" => ("cl100k_base", tiktoken_rs::cl100k_base()),
            "o200k_base" => ("o200k_base", tiktoken_rs::o200k_base()),
            "p50k_base" => ("p50k_base", tiktoken_rs::p50k_base()),
            "r50k_base" => ("r50k_base", tiktoken_rs::r50k_base()),
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "window.encoding".into(),
                    message: format!("unsupported tokenizer encoding '{other}'"),
                });
            }
        };
        let bpe = loaded.map_err(|e| ConfigError::InvalidValue {
            key: "window.encoding".into(),
            message: format!("failed to load {encoding}: {e}"),
        })?;
        tracing::debug!(encoding, margin_percent, "Loaded tokenizer");
        Ok(Self {
            bpe,
            encoding,
            margin_percent,
        })
    }

    /// The default `cl100k_base` estimator with the default margin.
    pub fn cl100k() -> Result<Self, ConfigError> {
        Self::new(DEFAULT_ENCODING, DEFAULT_MARGIN_PERCENT)
    }
}

impl TokenEstimator for BpeEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let raw = self.bpe.encode_with_special_tokens(text).len();
        with_margin(raw, self.margin_percent)
    }

    fn encoding(&self) -> &str {
        self.encoding
    }
}

/// Byte-length heuristic (bytes / 4, rounded up). No vocabulary required.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }

    fn encoding(&self) -> &str {
        "bytes/4"
    }
}

fn with_margin(raw: usize, margin_percent: u32) -> usize {
    raw + (raw * margin_percent as usize).div_ceil(100)
}

/// The encoding a model family actually tokenizes with, if known.
///
/// Used at startup to flag a configured estimator that does not match the
/// models being dispatched to.
pub fn encoding_for_model(model: &str) -> Option<&'static str> {
    let model = model.to_lowercase();
    const O200K: &[&str] = &["gpt-4o", "gpt-4.1", "gpt-4.5", "gpt-5", "o1", "o3", "o4"];
    const CL100K: &[&str] = &[
        "gpt-4",
        "gpt-35",
        "gpt-3.5",
        "gpt35",
        "text-embedding-3",
        "text-embedding-ada-002",
    ];
    if O200K.iter().any(|p| model.starts_with(p)) {
        Some("o200k_base")
    } else if CL100K.iter().any(|p| model.starts_with(p)) {
        Some("cl100k_base")
    } else if model.starts_with("text-davinci") {
        Some("p50k_base")
    } else {
        None
    }
}
