//! In-process interpreter over an immutable dataset snapshot

use crate::analysis::{self, AnalysisOptions, AnalysisOutput};
use crate::models::Dataset;
use crate::validation::ValidatedInvocation;
use crate::Result;
use std::sync::Arc;
use tracing::debug;

pub struct EmbeddedInterpreter {
    fingerprint: String,
    snapshot: Arc<Dataset>,
}

impl EmbeddedInterpreter {
    pub fn new(fingerprint: &str, snapshot: Arc<Dataset>) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            snapshot,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn execute(
        &self,
        invocation: &ValidatedInvocation,
        options: &AnalysisOptions,
    ) -> Result<AnalysisOutput> {
        debug!(tool = %invocation.tool(), fingerprint = %self.fingerprint, "Embedded execution");
        analysis::run(invocation, &self.snapshot, options)
    }
}
