//! Hand-off interface to the analysis/persistence collaborator.
//!
//! When a session reaches `Ending`, the finished transcript and the scenario
//! context are submitted here exactly once. The collaborator scores the
//! conversation and persists it; the returned evaluation is opaque to this
//! core and is not modeled.

use async_trait::async_trait;

use crate::scenario::ScenarioContext;
use crate::voice::error::VoiceResult;
use crate::voice::session::SessionStats;
use crate::voice::transcript::TranscriptItem;

/// Receives the finished transcript when a session ends.
#[async_trait]
pub trait EvaluationSink: Send + Sync {
    /// Submit the completed conversation for scoring. The transcript is
    /// handed over unmodified, in chronological order.
    async fn submit(
        &self,
        scenario: &ScenarioContext,
        transcript: &[TranscriptItem],
        stats: &SessionStats,
    ) -> VoiceResult<()>;
}

/// Sink that discards the hand-off. Useful for connectivity diagnostics
/// where no evaluation is wanted.
#[derive(Debug, Default)]
pub struct NullEvaluationSink;

#[async_trait]
impl EvaluationSink for NullEvaluationSink {
    async fn submit(
        &self,
        scenario: &ScenarioContext,
        transcript: &[TranscriptItem],
        _stats: &SessionStats,
    ) -> VoiceResult<()> {
        tracing::debug!(
            scenario_id = %scenario.id,
            items = transcript.len(),
            "Discarding transcript hand-off (null sink)"
        );
        Ok(())
    }
}
