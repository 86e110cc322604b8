//! Messages exchanged with the model actor.

use crossbeam_channel::Sender;
use opencv::core::Mat;

use crate::error::Result;
use crate::geometry::Contour;
use crate::recognition::ImageObject;
use crate::tracking::{StabilizationParams, TrackingParams};

/// Requests handled by the model actor, each with its own reply channel.
pub enum ModelCommand {
    SetTarget {
        target: ImageObject,
        reply: Sender<Result<()>>,
    },
    Track {
        /// Owned copy of the caller's frame.
        frame: Mat,
        params: TrackingParams,
        reply: Sender<Result<Option<Contour>>>,
    },
    SetStabilization {
        params: StabilizationParams,
        reply: Sender<Result<()>>,
    },
    Refresh {
        reply: Sender<Result<()>>,
    },
    Reinforce {
        location: Contour,
        reply: Sender<Result<()>>,
    },
    Serialize {
        reply: Sender<Result<String>>,
    },
    Restore {
        text: String,
        reply: Sender<Result<()>>,
    },
    /// Answered once no background recognition is in flight.
    WaitIdle {
        reply: Sender<()>,
    },
    Shutdown,
}

/// Sent by the recognition worker when it finishes.
pub struct RecognitionOutcome {
    /// Target generation the worker searched for.
    pub generation: u64,
    pub result: Result<Option<Contour>>,
}
