use image::GrayImage;

use crate::common::geometry::Region;

/// Best-scoring location of a template inside a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// Bounding box of the match, at the template's size.
    pub region: Region,
    /// Normalized correlation score in `0.0..=1.0`.
    pub score: f32,
}

/// Locate `template` inside `image`, restricted to `search` when given.
///
/// Zero-mean normalized cross-correlation over grayscale pixels. The
/// whole candidate grid is scanned and the best score wins, ties going
/// to the first candidate in row-major order, so identical inputs
/// always produce the identical result. Returns `None` when the best
/// score falls below `threshold`, when the template does not fit the
/// search area, or when the template is flat and carries no signal.
///
/// Cost is proportional to search area times template area; probes
/// aimed at a known screen region should carry a `search` rectangle.
pub fn match_template(
    image: &GrayImage,
    template: &GrayImage,
    threshold: f32,
    search: Option<Region>,
) -> Option<TemplateMatch> {
    let (image_w, image_h) = image.dimensions();
    let (template_w, template_h) = template.dimensions();
    if template_w == 0 || template_h == 0 {
        return None;
    }
    let area = match search {
        Some(region) => region.clamp_to(image_w, image_h)?,
        None => Region::full(image_w, image_h),
    };
    if template_w > area.width || template_h > area.height {
        return None;
    }

    // Template statistics are shared by every candidate window.
    let pixel_count = (template_w * template_h) as f64;
    let mut sum = 0.0f64;
    for pixel in template.pixels() {
        sum += pixel.0[0] as f64;
    }
    let mean = sum / pixel_count;
    let mut deviations = Vec::with_capacity(pixel_count as usize);
    let mut norm_sq = 0.0f64;
    for pixel in template.pixels() {
        let dev = pixel.0[0] as f64 - mean;
        norm_sq += dev * dev;
        deviations.push(dev);
    }
    if norm_sq == 0.0 {
        return None;
    }
    let template_norm = norm_sq.sqrt();

    let x_last = area.x + area.width - template_w;
    let y_last = area.y + area.height - template_h;
    let mut best: Option<(u32, u32, f64)> = None;
    for y in area.y..=y_last {
        for x in area.x..=x_last {
            let score = window_score(image, &deviations, template_norm, x, y, template_w, template_h);
            if best.map_or(true, |(_, _, b)| score > b) {
                best = Some((x, y, score));
            }
        }
    }

    let (x, y, score) = best?;
    let score = score as f32;
    if score < threshold {
        return None;
    }
    Some(TemplateMatch {
        region: Region::new(x, y, template_w, template_h),
        score,
    })
}

fn window_score(
    image: &GrayImage,
    template_dev: &[f64],
    template_norm: f64,
    offset_x: u32,
    offset_y: u32,
    template_w: u32,
    template_h: u32,
) -> f64 {
    let pixel_count = (template_w * template_h) as f64;
    let mut sum = 0.0f64;
    for dy in 0..template_h {
        for dx in 0..template_w {
            sum += image.get_pixel(offset_x + dx, offset_y + dy).0[0] as f64;
        }
    }
    let mean = sum / pixel_count;

    let mut cross = 0.0f64;
    let mut window_norm_sq = 0.0f64;
    let mut index = 0usize;
    for dy in 0..template_h {
        for dx in 0..template_w {
            let dev = image.get_pixel(offset_x + dx, offset_y + dy).0[0] as f64 - mean;
            cross += dev * template_dev[index];
            window_norm_sq += dev * dev;
            index += 1;
        }
    }
    if window_norm_sq == 0.0 {
        return 0.0;
    }
    // Anti-correlated windows are as much of a miss as uncorrelated
    // ones, so negative correlation clamps to zero.
    (cross / (window_norm_sq.sqrt() * template_norm)).max(0.0)
}
