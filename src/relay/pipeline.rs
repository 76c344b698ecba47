//! Pipeline orchestrator: one inbound message in, one terminal outcome out.
//!
//! Every run ends in exactly one of [`JobOutcome::Done`],
//! [`JobOutcome::Ignored`] or [`JobOutcome::Failed`]. Errors never escape
//! [`RelayPipeline::handle`]; they are logged and reported in the outcome.
//! Both staging paths of a run are released on every exit path.

use crate::config::RoutingPolicy;
use crate::error::RelayError;
use crate::media::fetch::check_size;
use crate::media::{
    classify, ConversionPlan, Decision, InboundAttachment, Ineligible, MediaSource, StagedPath,
    StillConverter,
};
use crate::relay::caption::compose_caption;
use crate::relay::dispatch::RelaySink;
use crate::relay::message::InboundMessage;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Why a message was skipped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No resolvable source chat.
    NoChat,
    /// Message came from the destination chat itself.
    LoopBack,
    /// Source chat is not on the allowlist.
    NotAllowed,
    /// Message carries no sticker, animation or document.
    NoAttachment,
    /// Attachment is not convertible.
    Ineligible(Ineligible),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChat => f.write_str("no chat"),
            Self::LoopBack => f.write_str("destination chat"),
            Self::NotAllowed => f.write_str("chat not allowed"),
            Self::NoAttachment => f.write_str("no attachment"),
            Self::Ineligible(reason) => write!(f, "{reason}"),
        }
    }
}

/// Terminal state of one relay job.
#[derive(Debug)]
pub enum JobOutcome {
    /// Still relayed to the destination.
    Done,
    /// Message skipped silently.
    Ignored(IgnoreReason),
    /// Job failed; the error has been logged.
    Failed(RelayError),
}

impl JobOutcome {
    /// Short label used in log fields.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Ignored(_) => "ignored",
            Self::Failed(_) => "failed",
        }
    }
}

/// Classify-fetch-convert-dispatch orchestrator.
pub struct RelayPipeline<S, C, D> {
    source: S,
    converter: C,
    sink: D,
    policy: Arc<RoutingPolicy>,
    staging_dir: Option<PathBuf>,
}

impl<S, C, D> RelayPipeline<S, C, D>
where
    S: MediaSource,
    C: StillConverter,
    D: RelaySink,
{
    /// Pipeline over the given collaborators and routing policy.
    pub fn new(source: S, converter: C, sink: D, policy: Arc<RoutingPolicy>) -> Self {
        Self {
            source,
            converter,
            sink,
            policy,
            staging_dir: None,
        }
    }

    /// Stage files in `dir` instead of the system temp directory.
    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Routing and classification checks, with no side effects.
    ///
    /// # Errors
    ///
    /// Returns the [`IgnoreReason`] when the message must be skipped.
    pub fn screen<'m>(
        &self,
        message: &'m InboundMessage,
    ) -> Result<(&'m InboundAttachment, ConversionPlan), IgnoreReason> {
        let chat_id = message.chat_id().ok_or(IgnoreReason::NoChat)?;
        if chat_id == self.policy.destination {
            return Err(IgnoreReason::LoopBack);
        }
        if !self.policy.allows(chat_id) {
            return Err(IgnoreReason::NotAllowed);
        }
        let attachment = message
            .attachment
            .as_ref()
            .ok_or(IgnoreReason::NoAttachment)?;
        match classify(attachment) {
            Decision::Convert(plan) => Ok((attachment, plan)),
            Decision::Ineligible(reason) => Err(IgnoreReason::Ineligible(reason)),
        }
    }

    /// Run one message to completion and log its outcome.
    pub async fn handle(&self, message: &InboundMessage) -> JobOutcome {
        let chat_id = message.chat_id().unwrap_or_default();
        let message_id = message.message_id;

        let (attachment, plan) = match self.screen(message) {
            Ok(accepted) => accepted,
            Err(reason) => {
                debug!(chat_id, message_id, reason = %reason, outcome = "ignored", "Message ignored");
                return JobOutcome::Ignored(reason);
            }
        };

        let outcome = match self.relay(message, attachment, &plan).await {
            Ok(()) => JobOutcome::Done,
            Err(e) => JobOutcome::Failed(e),
        };

        match &outcome {
            JobOutcome::Failed(e) => error!(
                chat_id,
                message_id,
                kind = plan.kind,
                strategy = %plan.strategy,
                stage = e.stage(),
                outcome = outcome.label(),
                error = %e,
                "Relay job failed"
            ),
            _ => info!(
                chat_id,
                message_id,
                kind = plan.kind,
                strategy = %plan.strategy,
                outcome = outcome.label(),
                "Still relayed"
            ),
        }
        outcome
    }

    async fn relay(
        &self,
        message: &InboundMessage,
        attachment: &InboundAttachment,
        plan: &ConversionPlan,
    ) -> Result<(), RelayError> {
        let file = attachment.file();
        if let (Some(limit), Some(size)) = (self.policy.max_input_bytes, file.size) {
            check_size(size, limit)?;
        }

        let input = self.allocate(&plan.input_ext)?;
        let output = self.allocate(".png")?;

        let result = async {
            self.step("fetch", self.source.fetch(file, input.path()))
                .await?;
            self.step(
                "convert",
                self.converter
                    .convert(plan.strategy, input.path(), output.path()),
            )
            .await?;
            let caption = compose_caption(plan.kind, message);
            self.step(
                "dispatch",
                self.sink
                    .send_still(self.policy.destination, output.path(), &caption),
            )
            .await
        }
        .await;

        for staged in [input, output] {
            let path = staged.path().to_path_buf();
            if let Err(e) = staged.release() {
                warn!(path = %path.display(), error = %e, "Failed to release staged file");
            }
        }
        result
    }

    fn allocate(&self, extension: &str) -> Result<StagedPath, RelayError> {
        match &self.staging_dir {
            Some(dir) => StagedPath::allocate_in(dir, extension),
            None => StagedPath::allocate(extension),
        }
        .map_err(RelayError::Staging)
    }

    async fn step<T, E>(
        &self,
        stage: &'static str,
        fut: impl Future<Output = Result<T, E>> + Send,
    ) -> Result<T, RelayError>
    where
        RelayError: From<E>,
    {
        match self.policy.step_timeout {
            Some(after) => tokio::time::timeout(after, fut)
                .await
                .map_err(|_| RelayError::Timeout { stage, after })?
                .map_err(RelayError::from),
            None => fut.await.map_err(RelayError::from),
        }
    }
}
