use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Left-top-width-height region of interest in integer pixels.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Roi {
    #[inline]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    #[inline(always)]
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    #[inline(always)]
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    #[inline]
    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Half-open containment test: `[x, x + width) x [y, y + height)`.
    #[inline]
    pub fn contains(&self, p: &na::Point2<f64>) -> bool {
        p.x >= self.x as f64
            && p.y >= self.y as f64
            && p.x < self.right() as f64
            && p.y < self.bottom() as f64
    }

    /// Shift the region by `(dx, dy)`, e.g. to account for an image border.
    #[inline]
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Clip to an image of `cols x rows`. With `even`, odd widths and heights
    /// are first reduced by one pixel. The result never has negative size.
    pub fn clip_to(&self, cols: u32, rows: u32, even: bool) -> Self {
        let (cols, rows) = (cols as i32, rows as i32);
        let mut r = *self;

        if even {
            r.width -= r.width % 2;
            r.height -= r.height % 2;
        }

        if r.x < 0 {
            r.width += r.x;
            r.x = 0;
        } else if r.x > cols {
            r.width = 0;
            r.x = cols;
        }
        if r.right() > cols {
            r.width -= r.right() - cols;
        }

        if r.y < 0 {
            r.height += r.y;
            r.y = 0;
        } else if r.y > rows {
            r.height = 0;
            r.y = rows;
        }
        if r.bottom() > rows {
            r.height -= r.bottom() - rows;
        }

        r.width = r.width.max(0);
        r.height = r.height.max(0);
        r
    }

    /// Square window of half-size `half` around `center`.
    pub fn around(center: &na::Point2<f64>, half: i32) -> Self {
        Self::new(
            center.x.round() as i32 - half,
            center.y.round() as i32 - half,
            2 * half + 1,
            2 * half + 1,
        )
    }
}
