use image::GrayImage;

use crate::common::geometry::Region;
use crate::vision::template::match_template;

/// Columns of background this wide split the strip into segments.
/// Narrower gaps are treated as intra-glyph spacing.
const SEGMENT_GAP: u32 = 2;

/// Minimum luma spread before a region is considered to hold text at
/// all.
const MIN_CONTRAST: u8 = 24;

/// One reference image for a single rendered glyph.
#[derive(Debug, Clone)]
pub struct Glyph {
    pub label: String,
    pub image: GrayImage,
}

/// The glyph templates for one game font.
#[derive(Debug, Clone, Default)]
pub struct GlyphSet {
    glyphs: Vec<Glyph>,
}

impl GlyphSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, image: GrayImage) {
        self.glyphs.push(Glyph {
            label: label.into(),
            image,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Glyph> {
        self.glyphs.iter()
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

/// Text recovered from a frame region.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRead {
    pub text: String,
    /// Mean per-glyph correlation, `0.0` when nothing was read.
    pub confidence: f32,
}

impl TextRead {
    fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }
}

/// Read the text inside `region` by segmenting it into glyph-sized
/// strips and correlating each strip against the glyph set.
///
/// Segments whose best glyph scores below `threshold` are dropped
/// rather than guessed, so the result only ever contains glyphs the
/// matcher was confident about. A blank or washed-out region reads as
/// the empty string with zero confidence. Deterministic for identical
/// inputs.
pub fn recognize_text(
    image: &GrayImage,
    region: Region,
    glyphs: &GlyphSet,
    threshold: f32,
) -> TextRead {
    let Some(area) = region.clamp_to(image.width(), image.height()) else {
        return TextRead::empty();
    };
    let crop = image::imageops::crop_imm(image, area.x, area.y, area.width, area.height).to_image();
    let Some(mask) = ink_mask(&crop) else {
        return TextRead::empty();
    };

    let mut text = String::new();
    let mut scores: Vec<f32> = Vec::new();
    for segment in split_columns(&mask) {
        let Some((top, bottom)) = row_bounds(&mask, segment.first, segment.last) else {
            continue;
        };
        let strip = image::imageops::crop_imm(
            &crop,
            segment.first,
            top,
            segment.last - segment.first + 1,
            bottom - top + 1,
        )
        .to_image();
        let Some((label, score)) = best_glyph(&strip, glyphs) else {
            continue;
        };
        if score < threshold {
            continue;
        }
        text.push_str(&label);
        scores.push(score);
    }

    if scores.is_empty() {
        return TextRead::empty();
    }
    let confidence = scores.iter().sum::<f32>() / scores.len() as f32;
    TextRead { text, confidence }
}

/// Correlate one segment strip against every glyph that fits inside it.
fn best_glyph(strip: &GrayImage, glyphs: &GlyphSet) -> Option<(String, f32)> {
    let mut best: Option<(String, f32)> = None;
    for glyph in glyphs.iter() {
        if glyph.image.width() > strip.width() || glyph.image.height() > strip.height() {
            continue;
        }
        if let Some(found) = match_template(strip, &glyph.image, 0.0, None) {
            if best.as_ref().map_or(true, |(_, b)| found.score > *b) {
                best = Some((glyph.label.clone(), found.score));
            }
        }
    }
    best
}

/// Foreground mask of the cropped region, `None` when the region has
/// too little contrast to hold text. Ink is whichever side of the
/// luma midpoint covers less area; game text is thin strokes on a
/// comparatively flat field.
fn ink_mask(crop: &GrayImage) -> Option<Vec<Vec<bool>>> {
    let (width, height) = crop.dimensions();
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for pixel in crop.pixels() {
        let value = pixel.0[0];
        min = min.min(value);
        max = max.max(value);
    }
    if max - min < MIN_CONTRAST {
        return None;
    }
    let midpoint = min as u16 + (max as u16 - min as u16) / 2;

    let dark_count = crop
        .pixels()
        .filter(|pixel| (pixel.0[0] as u16) < midpoint)
        .count();
    let dark_is_ink = dark_count * 2 <= (width as usize * height as usize);

    let mut mask = vec![vec![false; width as usize]; height as usize];
    for y in 0..height {
        for x in 0..width {
            let dark = (crop.get_pixel(x, y).0[0] as u16) < midpoint;
            mask[y as usize][x as usize] = dark == dark_is_ink;
        }
    }
    Some(mask)
}

#[derive(Debug, Clone, Copy)]
struct ColumnSegment {
    /// First and last inked column, inclusive.
    first: u32,
    last: u32,
}

fn split_columns(mask: &[Vec<bool>]) -> Vec<ColumnSegment> {
    let width = mask.first().map_or(0, |row| row.len()) as u32;
    let column_inked =
        |x: u32| -> bool { mask.iter().any(|row| row[x as usize]) };

    let mut segments = Vec::new();
    let mut current: Option<ColumnSegment> = None;
    let mut gap = 0u32;
    for x in 0..width {
        if column_inked(x) {
            match current.as_mut() {
                Some(segment) => segment.last = x,
                None => current = Some(ColumnSegment { first: x, last: x }),
            }
            gap = 0;
        } else if let Some(segment) = current {
            gap += 1;
            if gap >= SEGMENT_GAP {
                segments.push(segment);
                current = None;
                gap = 0;
            }
        }
    }
    if let Some(segment) = current {
        segments.push(segment);
    }
    segments
}

fn row_bounds(mask: &[Vec<bool>], first: u32, last: u32) -> Option<(u32, u32)> {
    let mut top = None;
    let mut bottom = None;
    for (y, row) in mask.iter().enumerate() {
        let inked = (first..=last).any(|x| row[x as usize]);
        if inked {
            if top.is_none() {
                top = Some(y as u32);
            }
            bottom = Some(y as u32);
        }
    }
    Some((top?, bottom?))
}
