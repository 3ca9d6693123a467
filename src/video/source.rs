use std::future::Future;

use crate::{
    error::Result,
    video::{Frame, VideoMetadata},
};

/// A seekable video that can hand out its current frame.
///
/// `seek` resolves once the frame at the requested time is ready to be
/// captured; `capture` then returns that frame at the source's native size.
pub trait VideoSource: Send {
    fn metadata(&self) -> &VideoMetadata;

    /// Position the source at `time` seconds
    fn seek(&mut self, time: f64) -> impl Future<Output = Result<()>> + Send;

    /// Grab the frame at the current position
    fn capture(&mut self) -> Result<Frame>;
}
