//! Pluggable per-frame processing strategies.
//!
//! A [`Processor`] turns a decoded image into an annotated one. Which strategy
//! runs is chosen by [`ProcessorConfig`](crate::config::ProcessorConfig) when
//! the server is built, and the constructed processor is handed to every
//! session explicitly; there is no process-wide instance.
//!
//! | Kind          | Implementation                 |
//! |---------------|--------------------------------|
//! | `passthrough` | [`Passthrough`]                |
//! | `features`    | [`FeatureOverlay`]             |
//! | `pose`        | [`PoseOverlay`] (host-supplied estimator) |

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{ProcessorConfig, ProcessorKind};
use crate::types::Image;
use crate::{RelayError, Result};

pub mod draw;
pub mod features;
pub mod passthrough;
pub mod pose;

pub use features::{FeatureDetector, FeatureOverlay, LuminanceDetector};
pub use passthrough::Passthrough;
pub use pose::{BodyPart, Keypoint, PoseEstimator, PoseOverlay};

/// Failure reported by a processor for one frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProcessError(String);

impl ProcessError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Image-to-image transform applied to every rendered frame.
///
/// Called synchronously from a session's pipeline task, so implementations
/// should stay within a few tens of milliseconds. They take the image by
/// reference: when they fail, the caller renders the original instead.
pub trait Processor: Send + Sync + 'static {
    /// Short name used in logs and errors
    fn name(&self) -> &'static str;

    /// Produce the annotated image
    fn process(&self, image: &Image) -> Result<Image, ProcessError>;
}

/// Run `processor`, converting both returned errors and panics into
/// [`RelayError::Process`].
pub fn run_guarded(processor: &dyn Processor, image: &Image) -> Result<Image> {
    match catch_unwind(AssertUnwindSafe(|| processor.process(image))) {
        Ok(Ok(annotated)) => Ok(annotated),
        Ok(Err(e)) => Err(RelayError::process_fault(processor.name(), e.to_string())),
        Err(_) => Err(RelayError::process_fault(processor.name(), "processor panicked")),
    }
}

/// Build the processor selected by `config`.
///
/// `pose` must be supplied when the configuration selects
/// [`ProcessorKind::Pose`]; pose models are provided by the host.
pub fn build(
    config: &ProcessorConfig,
    pose: Option<Arc<dyn PoseEstimator>>,
) -> Result<Arc<dyn Processor>> {
    let processor: Arc<dyn Processor> = match config.kind {
        ProcessorKind::Passthrough => Arc::new(Passthrough),
        ProcessorKind::Features => Arc::new(FeatureOverlay::new(Box::new(LuminanceDetector::new(
            config.feature_threshold,
            config.feature_min_area,
        )))),
        ProcessorKind::Pose => {
            let estimator = pose.ok_or_else(|| {
                RelayError::invalid_config("processor kind 'pose' requires a pose estimator")
            })?;
            Arc::new(PoseOverlay::new(estimator, config.pose_confidence))
        }
    };
    Ok(processor)
}
