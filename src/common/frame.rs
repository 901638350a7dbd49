use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use image::DynamicImage;
use indexmap::IndexMap;
use std::sync::Arc;

/// Target dimensions of a pre-scaled frame variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One captured screen image, tagged with a monotonic sequence number.
///
/// Cloning shares the pixel buffer; published frames are never mutated.
#[derive(Debug, Clone)]
pub struct Frame {
    seq: u64,
    captured_at: DateTime<Utc>,
    image: Arc<DynamicImage>,
}

impl Frame {
    pub fn new(seq: u64, captured_at: DateTime<Utc>, image: DynamicImage) -> Self {
        Self {
            seq,
            captured_at,
            image: Arc::new(image),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &Arc<DynamicImage> {
        &self.image
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }
}

/// A captured frame together with its pre-scaled variants.
///
/// Every variant derives from the same source image and shares its
/// sequence number, so consumers on different channels can correlate
/// what they saw.
#[derive(Debug, Clone)]
pub struct ScaledFrameSet {
    frame: Frame,
    variants: IndexMap<FrameSize, Arc<DynamicImage>>,
    display: Option<FrameSize>,
    recognition: Option<FrameSize>,
}

impl ScaledFrameSet {
    /// A set with no pre-scaled variants; every accessor falls back to
    /// the native image.
    pub fn native(frame: Frame) -> Self {
        Self {
            frame,
            variants: IndexMap::new(),
            display: None,
            recognition: None,
        }
    }

    pub fn seq(&self) -> u64 {
        self.frame.seq()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.frame.captured_at()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// The variant sized for UI preview, or the native image when no
    /// display variant was produced.
    pub fn display(&self) -> &Arc<DynamicImage> {
        self.display
            .and_then(|size| self.variants.get(&size))
            .unwrap_or_else(|| self.frame.image())
    }

    /// The variant recognition runs against. Defaults to the native
    /// image; probe regions and template assets are expressed in this
    /// variant's coordinate space.
    pub fn recognition(&self) -> &Arc<DynamicImage> {
        self.recognition
            .and_then(|size| self.variants.get(&size))
            .unwrap_or_else(|| self.frame.image())
    }

    pub fn variant(&self, size: FrameSize) -> Option<&Arc<DynamicImage>> {
        self.variants.get(&size)
    }

    pub fn variant_sizes(&self) -> impl Iterator<Item = FrameSize> + '_ {
        self.variants.keys().copied()
    }
}

/// Produces the fixed variant set for each captured frame.
///
/// The display variant is fitted inside the configured bounds keeping
/// aspect ratio. The recognition variant is an optional exact-width
/// downscale; when unset, recognition consumes the native image.
#[derive(Debug, Clone)]
pub struct FrameScaler {
    display: FrameSize,
    recognition_width: Option<u32>,
    filter: FilterType,
}

impl FrameScaler {
    pub fn new(display: FrameSize, recognition_width: Option<u32>, fast: bool) -> Self {
        let filter = if fast {
            FilterType::Nearest
        } else {
            FilterType::Triangle
        };
        Self {
            display,
            recognition_width,
            filter,
        }
    }

    pub fn scale(&self, frame: Frame) -> ScaledFrameSet {
        let mut variants = IndexMap::new();

        let display_image =
            frame
                .image()
                .resize(self.display.width, self.display.height, self.filter);
        let display_size = FrameSize::new(display_image.width(), display_image.height());
        variants.insert(display_size, Arc::new(display_image));

        let recognition = match self.recognition_width {
            Some(width) if width > 0 && width < frame.image().width() => {
                let source_w = frame.image().width();
                let source_h = frame.image().height();
                let height = ((source_h as u64 * width as u64) / source_w as u64).max(1) as u32;
                let size = FrameSize::new(width, height);
                let scaled = frame.image().resize_exact(width, height, self.filter);
                variants.insert(size, Arc::new(scaled));
                Some(size)
            }
            _ => None,
        };

        ScaledFrameSet {
            frame,
            variants,
            display: Some(display_size),
            recognition,
        }
    }
}
