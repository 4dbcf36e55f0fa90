//! Model tier to deployment routing.

use quill_types::ModelTier;
use serde::{Deserialize, Serialize};

/// One upstream deployment: the URL path segment and the model it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment: String,
    pub model: String,
}

impl Deployment {
    pub fn new(deployment: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            deployment: deployment.into(),
            model: model.into(),
        }
    }
}

/// Read-only table mapping every [`ModelTier`] to a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployments {
    fast: Deployment,
    best: Deployment,
}

impl Deployments {
    pub fn new(fast: Deployment, best: Deployment) -> Self {
        Self { fast, best }
    }

    pub fn get(&self, tier: ModelTier) -> &Deployment {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Best => &self.best,
        }
    }

    /// All `(tier, deployment)` pairs, fastest first.
    pub fn iter(&self) -> impl Iterator<Item = (ModelTier, &Deployment)> {
        ModelTier::ALL.into_iter().map(move |tier| (tier, self.get(tier)))
    }
}
