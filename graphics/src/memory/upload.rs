//! Staging uploads into device-local memory.
//!
//! Host data for device-local buffers and images is copied into a freshly
//! created host-visible staging buffer, and a copy from it is recorded into
//! one pending upload command list. The device submits that list ahead of
//! everything else in the next frame (or flushes it synchronously before a
//! readback), then lets go of the staging buffers, which are destroyed
//! through the regular deferred deletion path.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::command::CommandList;
use crate::error::GraphicsError;
use crate::resources::Buffer;

/// Upload commands recorded since the last submission.
pub(crate) struct PendingUploads {
    pub(crate) command_list: CommandList,
    /// Staging buffers read by the recorded copies.
    pub(crate) staging: Vec<Arc<Buffer>>,
    pub(crate) bytes: u64,
}

/// Collects staging uploads into a single command list.
pub(crate) struct UploadManager {
    pending: Mutex<Option<PendingUploads>>,
}

impl UploadManager {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Record an upload into the pending list, opening one with `open` if
    /// there is none yet.
    ///
    /// `record` receives the recording list; the staging buffer it returns
    /// is kept alive until the list has been submitted.
    pub(crate) fn record(
        &self,
        open: impl FnOnce() -> Result<CommandList, GraphicsError>,
        record: impl FnOnce(&mut CommandList) -> Result<Arc<Buffer>, GraphicsError>,
    ) -> Result<(), GraphicsError> {
        let mut pending = self.pending.lock();
        if pending.is_none() {
            let mut command_list = open()?;
            command_list.begin_commands()?;
            log::trace!("UploadManager: opened upload list {:?}", command_list.id());
            *pending = Some(PendingUploads {
                command_list,
                staging: Vec::new(),
                bytes: 0,
            });
        }
        let Some(uploads) = pending.as_mut() else {
            return Err(GraphicsError::Internal(
                "upload list vanished while locked".to_string(),
            ));
        };
        let staging = record(&mut uploads.command_list)?;
        uploads.bytes += staging.size();
        uploads.staging.push(staging);
        Ok(())
    }

    /// Take the pending uploads with their list ended, ready for submission.
    pub(crate) fn take(&self) -> Result<Option<PendingUploads>, GraphicsError> {
        let Some(mut uploads) = self.pending.lock().take() else {
            return Ok(None);
        };
        uploads.command_list.end_commands()?;
        log::debug!(
            "UploadManager: submitting {} staged uploads ({} bytes)",
            uploads.staging.len(),
            uploads.bytes
        );
        Ok(Some(uploads))
    }

    /// Whether uploads are waiting for submission.
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Drop pending uploads without submitting them.
    pub(crate) fn discard(&self) -> Option<PendingUploads> {
        self.pending.lock().take()
    }
}

impl std::fmt::Debug for UploadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadManager")
            .field("pending", &self.has_pending())
            .finish()
    }
}
