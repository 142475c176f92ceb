use shared::protocol::{Frame, FrameEnvelope, ImageFrame, PointCloudData, PointCloudFrame};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::CoreError;

const CHANNEL_CAPACITY: usize = 256;

/// Turns raw frame-socket messages into typed frames and fans them out on one
/// broadcast channel per frame type, plus a raw channel that sees every frame
/// before its typed delivery.
pub struct FrameDispatcher {
    raw: broadcast::Sender<FrameEnvelope>,
    images: broadcast::Sender<ImageFrame>,
    point_clouds: broadcast::Sender<PointCloudFrame>,
}

impl Default for FrameDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDispatcher {
    pub fn new() -> Self {
        let (raw, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (images, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (point_clouds, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            raw,
            images,
            point_clouds,
        }
    }

    pub fn subscribe_raw(&self) -> broadcast::Receiver<FrameEnvelope> {
        self.raw.subscribe()
    }

    pub fn subscribe_images(&self) -> broadcast::Receiver<ImageFrame> {
        self.images.subscribe()
    }

    pub fn subscribe_point_clouds(&self) -> broadcast::Receiver<PointCloudFrame> {
        self.point_clouds.subscribe()
    }

    /// Parses and publishes one message. Returns the dispatched frame, or the
    /// reason it was dropped; either way nothing propagates past the caller's
    /// log line.
    pub fn on_message(&self, raw: &str) -> Result<Frame, CoreError> {
        let envelope = FrameEnvelope::parse(raw).inspect_err(|err| {
            warn!(%err, "dropping unparseable frame message");
        })?;
        let frame = envelope.clone().into_frame().inspect_err(|err| {
            warn!(%err, file_type = ?envelope.file_type, "dropping incomplete frame message");
        })?;

        match &frame {
            Frame::Image(image) => {
                let _ = self.raw.send(envelope);
                let _ = self.images.send(image.clone());
            }
            Frame::PointCloud(cloud) => {
                if let PointCloudData::Ply(_) = cloud.data {
                    warn!(
                        filename = %cloud.filename,
                        "received PLY point cloud; forwarding undecoded payload"
                    );
                }
                let _ = self.raw.send(envelope);
                let _ = self.point_clouds.send(cloud.clone());
            }
            Frame::Unknown { file_type, .. } => {
                info!(%file_type, "unhandled frame file type; dropping");
            }
        }
        Ok(frame)
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
