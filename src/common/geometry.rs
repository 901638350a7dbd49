use serde::{Deserialize, Serialize};

/// A pixel coordinate on the device screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A rectangular area of a frame, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The region covering an entire image of the given dimensions.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x < self.x + self.width
            && point.y < self.y + self.height
    }

    /// Intersect with an image of the given dimensions. Returns `None`
    /// when nothing of the region lies inside the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<Region> {
        if self.x >= image_width || self.y >= image_height {
            return None;
        }
        let width = self.width.min(image_width - self.x);
        let height = self.height.min(image_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Region::new(self.x, self.y, width, height))
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_of_region() {
        let region = Region::new(10, 20, 100, 50);
        assert_eq!(region.center(), Point::new(60, 45));
    }

    #[test]
    fn contains_is_exclusive_on_far_edges() {
        let region = Region::new(0, 0, 10, 10);
        assert!(region.contains(Point::new(0, 0)));
        assert!(region.contains(Point::new(9, 9)));
        assert!(!region.contains(Point::new(10, 9)));
        assert!(!region.contains(Point::new(9, 10)));
    }

    #[test]
    fn clamp_trims_overhang() {
        let region = Region::new(50, 50, 100, 100);
        let clamped = region.clamp_to(80, 120).unwrap();
        assert_eq!(clamped, Region::new(50, 50, 30, 70));
    }

    #[test]
    fn clamp_rejects_region_outside_image() {
        let region = Region::new(200, 10, 5, 5);
        assert!(region.clamp_to(100, 100).is_none());
    }
}
