//! Burning per-point values into a grid.

use crate::extent::RasterExtent;
use crate::pixel::Pixel;
use crate::Result;
use ndarray::Array2;
use sdmaps_indices::Grid;
use tracing::debug;

/// Rasterize the derived `column` of `grid` onto `extent`.
///
/// Cells start at `fill`. Each row is burned into the cell containing its
/// point; later rows overwrite earlier ones and points outside the extent are
/// skipped. Rows flagged empty are burned with `empty_value`, or `fill` when
/// none is given, so they stay distinguishable from predicted absence.
pub fn rasterize<T: Pixel>(
    grid: &Grid,
    column: &str,
    extent: &RasterExtent,
    fill: T,
    empty_value: Option<T>,
) -> Result<Array2<T>> {
    let values = grid.column(column)?;
    let mut out = Array2::from_elem(extent.shape(), fill);
    let empty = empty_value.unwrap_or(fill);

    let mut burned = 0usize;
    for (row, value) in grid.rows().iter().zip(values) {
        let Some(cell) = extent.cell_of(row.lon, row.lat) else {
            continue;
        };
        out[cell] = if row.empty { empty } else { T::from_f64(*value) };
        burned += 1;
    }
    debug!("Rasterized {} ({}): {} of {} points", column, T::NAME, burned, grid.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdmaps_indices::GridRow;

    fn row(lon: f64, lat: f64, empty: bool) -> GridRow {
        GridRow {
            id: 0,
            lon,
            lat,
            region_raw: None,
            region: None,
            classes: Vec::new(),
            probas: Vec::new(),
            empty,
        }
    }

    #[test]
    fn test_burn_and_overwrite() {
        let mut grid = Grid::new(vec![
            row(5.0, 5.0, false),
            row(6.0, 6.0, false),
            row(-175.0, -85.0, true),
            row(500.0, 0.0, false),
        ]);
        grid.set_column("v", vec![0.5, 0.75, 0.1, 1.0]).unwrap();

        let extent = RasterExtent::global(36000);
        let arr = rasterize::<f32>(&grid, "v", &extent, 10.0, Some(255.0)).unwrap();
        assert_eq!(arr.dim(), (18, 36));
        assert_eq!(arr[[8, 18]], 0.75);
        assert_eq!(arr[[17, 0]], 255.0);
        assert_eq!(arr.iter().filter(|v| **v == 10.0).count(), 18 * 36 - 2);
    }

    #[test]
    fn test_all_empty_is_uniform_fill() {
        let mut grid = Grid::new((0..20).map(|i| row(i as f64 * 9.0 - 90.0, i as f64 * 4.0 - 40.0, true)).collect());
        grid.set_column("v", vec![0.3; 20]).unwrap();
        let arr = rasterize::<u8>(&grid, "v", &RasterExtent::global(36000), 10, None).unwrap();
        assert!(arr.iter().all(|v| *v == 10));
    }

    #[test]
    fn test_missing_column() {
        let grid = Grid::new(vec![row(0.0, 0.0, false)]);
        assert!(rasterize::<f32>(&grid, "nope", &RasterExtent::global(36000), 0.0, None).is_err());
    }
}
