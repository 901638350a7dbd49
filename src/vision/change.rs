use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use tracing::trace;

/// Notices when the screen has actually moved between recognition
/// frames.
///
/// Perceptual-hash distance between consecutive frames; below the
/// threshold the screen is considered static and the previous tick's
/// probe verdict still stands. Animation shimmer and compression noise
/// land under the threshold, real scene changes jump well over it.
pub struct ScreenChangeDetector {
    hasher: Hasher,
    threshold: u32,
    last: Option<ImageHash>,
}

impl ScreenChangeDetector {
    pub fn new(threshold: u32) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(8, 8)
            .to_hasher();
        Self {
            hasher,
            threshold,
            last: None,
        }
    }

    /// Record one frame and report whether it differs from the frame
    /// before it. The first frame always counts as changed.
    pub fn observe(&mut self, image: &DynamicImage) -> bool {
        let hash = self.hasher.hash_image(image);
        let changed = match &self.last {
            Some(previous) => {
                let distance = hash.dist(previous);
                trace!("Screen hash distance {}", distance);
                distance > self.threshold
            }
            None => true,
        };
        self.last = Some(hash);
        changed
    }

    /// Forget the previous frame; the next observation counts as
    /// changed again.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl std::fmt::Debug for ScreenChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreenChangeDetector")
            .field("threshold", &self.threshold)
            .field("primed", &self.last.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn gradient_frame(offset: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, y| {
            Luma([((x * 2 + y * 2) as u8).wrapping_add(offset)])
        }))
    }

    fn blocky_frame() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, y| {
            if (x / 16 + y / 16) % 2 == 0 {
                Luma([250])
            } else {
                Luma([5])
            }
        }))
    }

    #[test]
    fn first_frame_counts_as_changed() {
        let mut detector = ScreenChangeDetector::new(4);
        assert!(detector.observe(&gradient_frame(0)));
    }

    #[test]
    fn identical_frames_are_static() {
        let mut detector = ScreenChangeDetector::new(4);
        detector.observe(&gradient_frame(0));
        assert!(!detector.observe(&gradient_frame(0)));
        assert!(!detector.observe(&gradient_frame(0)));
    }

    #[test]
    fn different_scene_is_a_change() {
        let mut detector = ScreenChangeDetector::new(4);
        detector.observe(&gradient_frame(0));
        assert!(detector.observe(&blocky_frame()));
    }

    #[test]
    fn reset_forgets_history() {
        let mut detector = ScreenChangeDetector::new(4);
        detector.observe(&gradient_frame(0));
        detector.reset();
        assert!(detector.observe(&gradient_frame(0)));
    }
}
