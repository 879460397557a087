//! Contains the PlaneMapper struct, which describes a relationship
//! between a rectangle of screen pixels with its origin at the top
//! left, and a rectangle on the complex plane with an arbitrary pair
//! of corners defining its leftlower and rightupper corners.
//!
//! Screen rows grow downward; imaginary parts grow upward.  Row zero
//! is therefore the top edge of the complex rectangle.
use num::Complex;

use crate::error::RenderError;

/// Describes the width and height of an integral plane that is assumed to start at
/// 0,0 and all values are assumed to be non-negative integers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntegralPlane(pub usize, pub usize);

/// Describes the lower-left corner and upper-right corner of the
/// Complex plane, treating the real part of each value as the
/// x-component and the imaginary part of each value as the
/// y-component.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ComplexPlane(pub Complex<f64>, pub Complex<f64>);

/// The column and row of a pixel on the screen.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pixel(pub usize, pub usize);

/// Contains the definitions of two planes: an integral screen plane,
/// and a complex, real cartesian plane.  Maps points from one to the
/// other.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneMapper {
    /// Width and height of the screen, in pixels.
    pub integral_plane: IntegralPlane,
    /// The two coordinates defining the complex cartesian plane,
    /// left-lower and right-upper
    pub complex_plane: ComplexPlane,
    // Pixels per unit of the complex plane, horizontally and vertically.
    grid_factors: (f64, f64),
}

impl PlaneMapper {
    /// Constructor.  Takes the size of the screen, and two points
    /// describing the complex plane.
    pub fn new(
        width: usize,
        height: usize,
        leftlower: Complex<f64>,
        rightupper: Complex<f64>,
    ) -> Result<PlaneMapper, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::BadPlane(format!(
                "The screen must have a size, got {}x{}.",
                width, height
            )));
        }

        if rightupper.re <= leftlower.re {
            return Err(RenderError::BadPlane(
                "The left lower corner is not to the left of the right upper corner.".to_string(),
            ));
        }

        if rightupper.im <= leftlower.im {
            return Err(RenderError::BadPlane(
                "The left lower corner is not lower than the right upper corner.".to_string(),
            ));
        }

        let grid_factors = (
            (width as f64) / (rightupper.re - leftlower.re),
            (height as f64) / (rightupper.im - leftlower.im),
        );

        Ok(PlaneMapper {
            integral_plane: IntegralPlane(width, height),
            complex_plane: ComplexPlane(leftlower, rightupper),
            grid_factors,
        })
    }

    /// Builds a plane from a centre point and the real width of the
    /// view.  Pixels are square, so the imaginary height follows from
    /// the aspect ratio of the screen.
    pub fn from_center(
        width: usize,
        height: usize,
        center: Complex<f64>,
        real_width: f64,
    ) -> Result<PlaneMapper, RenderError> {
        if !(real_width > 0.0) || width == 0 {
            return Err(RenderError::BadPlane(format!(
                "The view must have a positive width, got {}.",
                real_width
            )));
        }
        let half = Complex::new(
            real_width / 2.0,
            real_width * (height as f64) / (width as f64) / 2.0,
        );
        PlaneMapper::new(width, height, center - half, center + half)
    }

    /// The total number of points in the integral grid.  Used to
    /// calculate memory needs.
    pub fn len(&self) -> usize {
        self.integral_plane.0 * self.integral_plane.1
    }

    /// Describes that the integral plane is of a size.
    pub fn is_empty(&self) -> bool {
        self.integral_plane.0 == 0 || self.integral_plane.1 == 0
    }

    /// The width of one pixel, measured on the real axis.
    pub fn pixel_width(&self) -> f64 {
        1.0 / self.grid_factors.0
    }

    /// The width of the whole view, measured on the real axis.
    pub fn real_width(&self) -> f64 {
        self.complex_plane.1.re - self.complex_plane.0.re
    }

    /// The point at the middle of the view.
    pub fn center(&self) -> Complex<f64> {
        (self.complex_plane.0 + self.complex_plane.1) / 2.0
    }

    /// Maps a (possibly fractional) screen coordinate to the complex
    /// plane.
    pub fn screen_to_point(&self, x: f64, y: f64) -> Complex<f64> {
        Complex::new(
            self.complex_plane.0.re + x / self.grid_factors.0,
            self.complex_plane.1.im - y / self.grid_factors.1,
        )
    }

    /// The complex number at the top-left corner of a pixel.
    pub fn pixel_to_point(&self, pixel: &Pixel) -> Complex<f64> {
        self.screen_to_point(pixel.0 as f64, pixel.1 as f64)
    }

    /// The pixel a complex number falls in, if it is on the screen at all.
    pub fn point_to_pixel(&self, point: &Complex<f64>) -> Option<Pixel> {
        let left = (point.re - self.complex_plane.0.re) * self.grid_factors.0;
        let top = (self.complex_plane.1.im - point.im) * self.grid_factors.1;
        if left < 0.0
            || left >= (self.integral_plane.0 as f64)
            || top < 0.0
            || top >= (self.integral_plane.1 as f64)
        {
            return None;
        }
        Some(Pixel(left as usize, top as usize))
    }
}
