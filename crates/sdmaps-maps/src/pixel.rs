//! Pixel types a map band can hold.

use tiff::encoder::colortype::{self, ColorType};

/// Sample type of a raster band.
pub trait Pixel: Copy + PartialEq + Default + Send + Sync + std::fmt::Debug + 'static {
    /// TIFF colour type of a single-sample band of this type.
    type Color: ColorType<Inner = Self>;

    /// Short type name, for logs.
    const NAME: &'static str;

    /// Convert a derived value; out-of-range values saturate.
    fn from_f64(v: f64) -> Self;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;
}

impl Pixel for f32 {
    type Color = colortype::Gray32Float;
    const NAME: &'static str = "float32";

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Pixel for u8 {
    type Color = colortype::Gray8;
    const NAME: &'static str = "uint8";

    fn from_f64(v: f64) -> Self {
        v.round() as u8
    }

    fn to_f64(self) -> f64 {
        self as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_saturates() {
        assert_eq!(u8::from_f64(4.0), 4);
        assert_eq!(u8::from_f64(254.6), 255);
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(u8::from_f64(-3.0), 0);
        assert_eq!(f32::from_f64(0.25), 0.25);
    }
}
