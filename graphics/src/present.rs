//! Presentation collaborator.
//!
//! The windowing layer owns the actual swap chain. The device only needs to
//! acquire an image before the frame's work starts writing it and to hand it
//! back once the frame's final submission has completed.

use crate::backend::SemaphoreHandle;
use crate::error::GraphicsError;
use crate::types::Extent2d;

/// Health of the swap target reported by acquire and present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapStatus {
    /// Matches the window; nothing to do.
    #[default]
    Optimal,
    /// Still usable but no longer matches the window exactly.
    Suboptimal,
    /// Unusable until recreated.
    OutOfDate,
}

impl SwapStatus {
    /// Whether the swap target should be recreated.
    pub fn needs_recreation(self) -> bool {
        !matches!(self, SwapStatus::Optimal)
    }
}

/// A presentable image chain supplied by the windowing layer.
pub trait SwapTarget: Send {
    /// Current image size.
    fn extent(&self) -> Extent2d;

    /// Acquire the next image.
    ///
    /// `signal` must be signaled once the image may be written. Returns the
    /// image index, or `None` together with [`SwapStatus::OutOfDate`] when
    /// no image can be acquired. Reporting [`GraphicsError::SurfaceOutdated`]
    /// is treated the same as `OutOfDate`.
    fn acquire(
        &mut self,
        signal: SemaphoreHandle,
    ) -> Result<(Option<u32>, SwapStatus), GraphicsError>;

    /// Present an acquired image after `wait` is signaled.
    ///
    /// [`GraphicsError::SurfaceOutdated`] is treated as [`SwapStatus::OutOfDate`].
    fn present(&mut self, image_index: u32, wait: SemaphoreHandle)
    -> Result<SwapStatus, GraphicsError>;
}
