//! Pose overlay: single-person keypoints and skeleton.
//!
//! The estimator is a host-supplied model (MoveNet or similar) producing the
//! 17 COCO keypoints in image coordinates. This module only decides what to
//! draw: keypoints above the confidence threshold as green dots, and the limb
//! segments between confident keypoints coloured by body region.

use image::Rgb;
use std::sync::Arc;

use super::draw;
use super::{ProcessError, Processor};
use crate::types::Image;

/// The 17 COCO body keypoints, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyPart {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

impl BodyPart {
    pub const COUNT: usize = 17;

    pub const ALL: [BodyPart; Self::COUNT] = [
        BodyPart::Nose,
        BodyPart::LeftEye,
        BodyPart::RightEye,
        BodyPart::LeftEar,
        BodyPart::RightEar,
        BodyPart::LeftShoulder,
        BodyPart::RightShoulder,
        BodyPart::LeftElbow,
        BodyPart::RightElbow,
        BodyPart::LeftWrist,
        BodyPart::RightWrist,
        BodyPart::LeftHip,
        BodyPart::RightHip,
        BodyPart::LeftKnee,
        BodyPart::RightKnee,
        BodyPart::LeftAnkle,
        BodyPart::RightAnkle,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn is_shoulder(self) -> bool {
        matches!(self, BodyPart::LeftShoulder | BodyPart::RightShoulder)
    }

    fn is_hip(self) -> bool {
        matches!(self, BodyPart::LeftHip | BodyPart::RightHip)
    }

    fn is_leg(self) -> bool {
        matches!(
            self,
            BodyPart::LeftKnee | BodyPart::RightKnee | BodyPart::LeftAnkle | BodyPart::RightAnkle
        )
    }
}

/// Limb segments drawn between keypoints.
pub const SKELETON: [(BodyPart, BodyPart); 16] = [
    (BodyPart::Nose, BodyPart::LeftEye),
    (BodyPart::Nose, BodyPart::RightEye),
    (BodyPart::LeftEye, BodyPart::LeftEar),
    (BodyPart::RightEye, BodyPart::RightEar),
    (BodyPart::LeftShoulder, BodyPart::RightShoulder),
    (BodyPart::LeftShoulder, BodyPart::LeftElbow),
    (BodyPart::RightShoulder, BodyPart::RightElbow),
    (BodyPart::LeftElbow, BodyPart::LeftWrist),
    (BodyPart::RightElbow, BodyPart::RightWrist),
    (BodyPart::LeftShoulder, BodyPart::LeftHip),
    (BodyPart::RightShoulder, BodyPart::RightHip),
    (BodyPart::LeftHip, BodyPart::RightHip),
    (BodyPart::LeftHip, BodyPart::LeftKnee),
    (BodyPart::RightHip, BodyPart::RightKnee),
    (BodyPart::LeftKnee, BodyPart::LeftAnkle),
    (BodyPart::RightKnee, BodyPart::RightAnkle),
];

const KEYPOINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const KEYPOINT_RADIUS: u32 = 6;
const LIMB_THICKNESS: u32 = 2;

/// One estimated keypoint in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }

    fn pixel(&self, image: &Image) -> (i64, i64) {
        let max_x = image.width().saturating_sub(1) as f32;
        let max_y = image.height().saturating_sub(1) as f32;
        (self.x.clamp(0.0, max_x) as i64, self.y.clamp(0.0, max_y) as i64)
    }
}

/// Estimates the pose of the most prominent person in an image.
pub trait PoseEstimator: Send + Sync + 'static {
    /// Exactly [`BodyPart::COUNT`] keypoints in [`BodyPart::ALL`] order.
    fn estimate(&self, image: &Image) -> Result<Vec<Keypoint>, ProcessError>;
}

/// Colour of the segment between `a` and `b`.
pub fn limb_color(a: BodyPart, b: BodyPart) -> Rgb<u8> {
    if a.is_shoulder() || b.is_shoulder() {
        Rgb([0, 255, 0])
    } else if a.is_hip() || b.is_hip() {
        Rgb([0, 0, 255])
    } else if a.is_leg() {
        Rgb([255, 0, 0])
    } else {
        Rgb([0, 255, 255])
    }
}

/// Draws keypoints and skeleton produced by a [`PoseEstimator`].
pub struct PoseOverlay {
    estimator: Arc<dyn PoseEstimator>,
    min_confidence: f32,
}

impl PoseOverlay {
    pub fn new(estimator: Arc<dyn PoseEstimator>, min_confidence: f32) -> Self {
        Self { estimator, min_confidence }
    }
}

impl Processor for PoseOverlay {
    fn name(&self) -> &'static str {
        "pose"
    }

    fn process(&self, image: &Image) -> Result<Image, ProcessError> {
        let keypoints = self.estimator.estimate(image)?;
        if keypoints.len() != BodyPart::COUNT {
            return Err(ProcessError::new(format!(
                "pose estimator returned {} keypoints, expected {}",
                keypoints.len(),
                BodyPart::COUNT
            )));
        }

        let confident: Vec<Option<(i64, i64)>> = keypoints
            .iter()
            .map(|k| (k.confidence > self.min_confidence).then(|| k.pixel(image)))
            .collect();

        let mut annotated = image.clone();

        for (a, b) in SKELETON {
            if let (Some(from), Some(to)) = (confident[a.index()], confident[b.index()]) {
                draw::draw_line(&mut annotated, from, to, limb_color(a, b), LIMB_THICKNESS);
            }
        }

        // Dots go on top of the limbs.
        for point in confident.iter().flatten() {
            draw::fill_circle(&mut annotated, point.0, point.1, KEYPOINT_RADIUS, KEYPOINT_COLOR);
        }

        Ok(annotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Keypoint>);

    impl PoseEstimator for Fixed {
        fn estimate(&self, _image: &Image) -> Result<Vec<Keypoint>, ProcessError> {
            Ok(self.0.clone())
        }
    }

    fn absent() -> Vec<Keypoint> {
        vec![Keypoint::new(0.0, 0.0, 0.0); BodyPart::COUNT]
    }

    #[test]
    fn body_part_order_matches_index() {
        for (i, part) in BodyPart::ALL.iter().enumerate() {
            assert_eq!(part.index(), i);
        }
    }

    #[test]
    fn limb_colors_follow_body_region() {
        assert_eq!(limb_color(BodyPart::LeftShoulder, BodyPart::LeftHip), Rgb([0, 255, 0]));
        assert_eq!(limb_color(BodyPart::LeftHip, BodyPart::LeftKnee), Rgb([0, 0, 255]));
        assert_eq!(limb_color(BodyPart::LeftKnee, BodyPart::LeftAnkle), Rgb([255, 0, 0]));
        assert_eq!(limb_color(BodyPart::Nose, BodyPart::LeftEye), Rgb([0, 255, 255]));
    }

    #[test]
    fn draws_only_confident_limbs() {
        let mut points = absent();
        points[BodyPart::LeftKnee.index()] = Keypoint::new(20.0, 20.0, 0.9);
        points[BodyPart::LeftAnkle.index()] = Keypoint::new(20.0, 60.0, 0.9);
        points[BodyPart::Nose.index()] = Keypoint::new(70.0, 10.0, 0.2);

        let overlay = PoseOverlay::new(Arc::new(Fixed(points)), 0.3);
        let out = overlay.process(&Image::new(100, 100)).unwrap();

        // Keypoint dots are green, the shin between them red.
        assert_eq!(out.get_pixel(20, 20), &KEYPOINT_COLOR);
        assert_eq!(out.get_pixel(20, 40), &Rgb([255, 0, 0]));
        // Low-confidence nose is skipped.
        assert_eq!(out.get_pixel(70, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn out_of_frame_keypoints_are_clamped() {
        let mut points = absent();
        points[BodyPart::Nose.index()] = Keypoint::new(-50.0, 500.0, 1.0);

        let overlay = PoseOverlay::new(Arc::new(Fixed(points)), 0.3);
        let out = overlay.process(&Image::new(32, 32)).unwrap();
        assert_eq!(out.get_pixel(0, 31), &KEYPOINT_COLOR);
    }

    #[test]
    fn wrong_keypoint_count_is_a_fault() {
        let overlay = PoseOverlay::new(Arc::new(Fixed(vec![])), 0.3);
        assert!(overlay.process(&Image::new(8, 8)).is_err());
    }
}
