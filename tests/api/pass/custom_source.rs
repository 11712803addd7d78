use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;

use framerelay::processors::{Keypoint, PoseEstimator, PoseOverlay, ProcessError};
use framerelay::source::FrameSource;
use framerelay::{FrameRelay, Image, RelayConfig, Result};

struct Replay {
    frames: Vec<Bytes>,
    peer: SocketAddr,
}

#[async_trait::async_trait]
impl FrameSource for Replay {
    async fn next_message(&mut self) -> Result<Option<Bytes>> {
        Ok(self.frames.pop())
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }
}

struct StandingStill;

impl PoseEstimator for StandingStill {
    fn estimate(&self, _image: &Image) -> std::result::Result<Vec<Keypoint>, ProcessError> {
        Ok(vec![Keypoint::new(0.5, 0.5, 0.9); 17])
    }
}

fn main() {
    let _source = Replay { frames: Vec::new(), peer: SocketAddr::from(([127, 0, 0, 1], 1)) };
    let estimator: Arc<dyn PoseEstimator> = Arc::new(StandingStill);
    let _overlay = PoseOverlay::new(Arc::clone(&estimator), 0.3);
    let _server = FrameRelay::builder(RelayConfig::default()).with_pose_estimator(estimator);
}
