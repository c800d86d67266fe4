//! North-up raster extents and the fixed global grid.

use geo::{AffineTransform, Coord};

/// A north-up pixel grid in geographic degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterExtent {
    /// West edge.
    pub x_min: f64,
    /// North edge.
    pub y_max: f64,
    /// Pixel width in degrees.
    pub x_res: f64,
    /// Pixel height in degrees (positive).
    pub y_res: f64,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
}

impl RasterExtent {
    /// The global equirectangular grid at `seconds` arc-seconds per pixel:
    /// origin (−180, 90), `180·3600/s` rows by `360·3600/s` columns.
    pub fn global(seconds: u32) -> Self {
        let seconds = seconds.max(1);
        let res = seconds as f64 / 3600.0;
        Self {
            x_min: -180.0,
            y_max: 90.0,
            x_res: res,
            y_res: res,
            width: (360 * 3600 / seconds) as usize,
            height: (180 * 3600 / seconds) as usize,
        }
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// East edge.
    pub fn x_max(&self) -> f64 {
        self.x_min + self.width as f64 * self.x_res
    }

    /// South edge.
    pub fn y_min(&self) -> f64 {
        self.y_max - self.height as f64 * self.y_res
    }

    /// Pixel-to-world transform `(x_res, 0, x_min, 0, -y_res, y_max)`.
    pub fn affine(&self) -> AffineTransform<f64> {
        AffineTransform::new(self.x_res, 0.0, self.x_min, 0.0, -self.y_res, self.y_max)
    }

    /// World coordinates of the centre of `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> Coord<f64> {
        self.affine().apply(Coord {
            x: col as f64 + 0.5,
            y: row as f64 + 0.5,
        })
    }

    /// Cell containing `(lon, lat)`, `None` outside the extent.
    ///
    /// Points on the east or south edge belong to no cell.
    pub fn cell_of(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let col = ((lon - self.x_min) / self.x_res).floor();
        let row = ((self.y_max - lat) / self.y_res).floor();
        if !(col >= 0.0 && row >= 0.0) {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < self.height && col < self.width).then_some((row, col))
    }

    /// Same pixel size as `other`, within a relative tolerance.
    pub fn same_resolution(&self, other: &RasterExtent) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-9 * a.abs().max(b.abs());
        close(self.x_res, other.x_res) && close(self.y_res, other.y_res)
    }

    /// Smallest extent on the same pixel grid covering both.
    pub fn union(&self, other: &RasterExtent) -> RasterExtent {
        let x_min = self.x_min.min(other.x_min);
        let y_max = self.y_max.max(other.y_max);
        let x_max = self.x_max().max(other.x_max());
        let y_min = self.y_min().min(other.y_min());
        RasterExtent {
            x_min,
            y_max,
            x_res: self.x_res,
            y_res: self.y_res,
            width: ((x_max - x_min) / self.x_res).round() as usize,
            height: ((y_max - y_min) / self.y_res).round() as usize,
        }
    }

    /// `(row, col)` of this extent's top-left pixel inside `outer`.
    pub fn offset_in(&self, outer: &RasterExtent) -> (usize, usize) {
        let row = ((outer.y_max - self.y_max) / outer.y_res).round().max(0.0) as usize;
        let col = ((self.x_min - outer.x_min) / outer.x_res).round().max(0.0) as usize;
        (row, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_global_grid() {
        let g = RasterExtent::global(30);
        assert_eq!(g.shape(), (21600, 43200));
        assert_relative_eq!(g.x_res, 30.0 / 3600.0);
        let g = RasterExtent::global(36000);
        assert_eq!(g.shape(), (18, 36));
        assert_relative_eq!(g.y_min(), -90.0);
        assert_relative_eq!(g.x_max(), 180.0);
    }

    #[test]
    fn test_cell_of() {
        let g = RasterExtent::global(36000);
        assert_eq!(g.cell_of(-180.0, 90.0), Some((0, 0)));
        assert_eq!(g.cell_of(5.0, 5.0), Some((8, 18)));
        assert_eq!(g.cell_of(179.9, -89.9), Some((17, 35)));
        assert_eq!(g.cell_of(180.0, 0.0), None);
        assert_eq!(g.cell_of(0.0, 95.0), None);
        assert_eq!(g.cell_of(f64::NAN, 0.0), None);

        let c = g.pixel_center(8, 18);
        assert_relative_eq!(c.x, 5.0);
        assert_relative_eq!(c.y, 5.0);
    }

    #[test]
    fn test_union_and_offset() {
        let a = RasterExtent {
            x_min: 0.0,
            y_max: 10.0,
            x_res: 1.0,
            y_res: 1.0,
            width: 4,
            height: 4,
        };
        let b = RasterExtent {
            x_min: 2.0,
            y_max: 8.0,
            ..a
        };
        let u = a.union(&b);
        assert_eq!((u.x_min, u.y_max, u.width, u.height), (0.0, 10.0, 6, 6));
        assert_eq!(b.offset_in(&u), (2, 2));
        assert_eq!(a.offset_in(&u), (0, 0));
        assert!(a.same_resolution(&b));
    }
}
