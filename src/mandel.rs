// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Escape-time iteration of the Mandelbrot set, one step at a time.
//!
//! Unlike the classic loop, which runs a point to completion, a
//! `ComplexIterate` remembers where it is, so a renderer can advance
//! every pixel a little, show the result, and come back for more.
//! Points that escape get a smoothed (fractional) iteration count;
//! points caught in a cycle are detected by running a second copy of
//! the orbit at half speed and noticing when the two meet.

use num::{clamp, Complex};

// |z|^2 beyond which a point has escaped.  Large, so that the smoothed
// count is accurate.
const ESCAPE_VALUE: f64 = 10e100;

// Distance at which the fast and slow orbits are taken to have met.
const EPSILON: f64 = 0.000_000_000_000_01;

/// A single point of the complex plane, partway through iteration.
#[derive(Copy, Clone, Debug)]
pub struct ComplexIterate {
    start: Complex<f64>,
    value: Complex<f64>,
    slow_value: Complex<f64>,
    escaped: bool,
    bounded: bool,
    count: u64,
    adjusted_count: f64,
}

impl ComplexIterate {
    /// Start iterating `c`.
    pub fn new(c: Complex<f64>) -> Self {
        ComplexIterate {
            start: c,
            value: c,
            slow_value: c,
            escaped: false,
            bounded: false,
            count: 0,
            adjusted_count: 0.0,
        }
    }

    /// Advance one step, unless the point has already been decided.
    pub fn iterate(&mut self) {
        if self.escaped || self.bounded {
            return;
        }

        self.value = self.value * self.value + self.start;
        let abs_sqr = self.value.norm_sqr();

        if abs_sqr > ESCAPE_VALUE {
            self.escaped = true;
            self.adjusted_count = self.count as f64
                - (abs_sqr.ln() / ESCAPE_VALUE.ln()).ln() / 2.0_f64.ln();
        } else {
            let diff = self.value - self.slow_value;
            if diff.re.abs() < EPSILON && diff.im.abs() < EPSILON {
                self.bounded = true;
            }
        }

        if self.count > 0 && self.count % 2 == 0 {
            self.slow_value = self.slow_value * self.slow_value + self.start;
        }
        self.count += 1;
    }

    /// The current value of z.
    pub fn value(&self) -> Complex<f64> {
        self.value
    }

    /// The smoothed count if the point escaped, else the raw step count.
    pub fn count(&self) -> f64 {
        if self.escaped {
            self.adjusted_count
        } else {
            self.count as f64
        }
    }

    /// True once the point is known to leave the set.
    pub fn escaped(&self) -> bool {
        self.escaped
    }

    /// True once the point is known to be trapped in a cycle.
    pub fn bounded(&self) -> bool {
        self.bounded
    }

    /// True while the point is still undecided.
    pub fn is_live(&self) -> bool {
        !self.escaped && !self.bounded
    }
}

const SUBSAMPLE_WIDTH: usize = 2;
const SUBSAMPLES: usize = 2 * SUBSAMPLE_WIDTH * SUBSAMPLE_WIDTH;

/// Maps an iteration result to a colour, each channel in 0.0..=1.0.
/// Escaped points cycle between orange and blue with a period of 100
/// iterations; points in the set are a dark teal.
pub fn color_map(escaped: bool, count: f64) -> [f32; 3] {
    if !escaped {
        return [0.0, 0.271, 0.361];
    }

    const START: [f32; 3] = [1.0, 0.4, 0.2];
    const END: [f32; 3] = [0.0, 0.541, 0.722];
    const RANGE: f64 = 100.0;

    let phase = if (count / RANGE) % 2.0 < 1.0 {
        count % RANGE
    } else {
        RANGE - count % RANGE
    };
    let alpha = (phase / RANGE) as f32;

    let mut rgb = [0.0; 3];
    for (channel, value) in rgb.iter_mut().enumerate() {
        *value = (1.0 - alpha) * START[channel] + alpha * END[channel];
    }
    rgb
}

/// One screen pixel, antialiased with eight sub-samples laid out as
/// two interleaved 2x2 grids.
#[derive(Clone, Debug)]
pub struct Pixel {
    samples: [ComplexIterate; SUBSAMPLES],
    rgb: [u8; 3],
    is_final: bool,
}

impl Pixel {
    /// A pixel whose top-left corner is `corner` and whose side is
    /// `width`, measured on the real axis.
    pub fn new(corner: Complex<f64>, width: f64) -> Self {
        let sub_width = width / SUBSAMPLE_WIDTH as f64;
        let quarter = sub_width / 4.0;
        let three_quarters = sub_width / 2.0 + quarter;

        let mut samples = [ComplexIterate::new(corner); SUBSAMPLES];
        let offsets = [quarter, three_quarters];
        let mut slot = 0;
        for offset in offsets.iter() {
            for i in 0..SUBSAMPLE_WIDTH {
                for k in 0..SUBSAMPLE_WIDTH {
                    samples[slot] = ComplexIterate::new(Complex::new(
                        corner.re + offset + sub_width * i as f64,
                        corner.im - offset - sub_width * k as f64,
                    ));
                    slot += 1;
                }
            }
        }

        let mut pixel = Pixel {
            samples,
            rgb: [0; 3],
            is_final: false,
        };
        pixel.rgb = pixel.compute_color();
        pixel
    }

    /// Advance every sub-sample one step and recolour.  Does nothing
    /// once the pixel is final.
    pub fn iterate(&mut self) {
        if self.is_final {
            return;
        }
        for sample in self.samples.iter_mut() {
            sample.iterate();
        }
        self.rgb = self.compute_color();
        self.is_final = self.samples.iter().all(|s| !s.is_live());
    }

    /// Advance up to `steps` times, stopping early once final.
    pub fn iterate_n(&mut self, steps: usize) {
        for _ in 0..steps {
            if self.is_final {
                break;
            }
            self.iterate();
        }
    }

    /// True once every sub-sample has escaped or been trapped.
    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// The current colour of the pixel.
    pub fn rgb(&self) -> [u8; 3] {
        self.rgb
    }

    fn compute_color(&self) -> [u8; 3] {
        let mut sum = [0.0_f32; 3];
        for sample in self.samples.iter() {
            let rgb = color_map(sample.escaped(), sample.count());
            for channel in 0..3 {
                sum[channel] += rgb[channel];
            }
        }
        let scale = 255.0 / SUBSAMPLES as f32;
        let mut out = [0u8; 3];
        for channel in 0..3 {
            out[channel] = clamp(sum[channel] * scale, 0.0, 255.0) as u8;
        }
        out
    }
}

/// The orbit of a single point, with the box it stays inside.
#[derive(Clone, Debug)]
pub struct Orbit {
    /// Every value of z visited, starting with the point itself.
    pub points: Vec<Complex<f64>>,
    /// Lower-left corner of the bounding box, clamped to -2-2i.
    pub min: Complex<f64>,
    /// Upper-right corner of the bounding box, clamped to 2+2i.
    pub max: Complex<f64>,
    /// True if the orbit escaped before the limit.
    pub escaped: bool,
}

impl Orbit {
    /// Iterate `point` up to `limit` times, recording every step.
    pub fn trace(point: Complex<f64>, limit: usize) -> Orbit {
        let mut iterate = ComplexIterate::new(point);
        let mut orbit = Orbit {
            points: Vec::with_capacity(limit.min(4096)),
            min: point,
            max: point,
            escaped: false,
        };
        orbit.points.push(point);

        for _ in 1..limit {
            if !iterate.is_live() {
                break;
            }
            iterate.iterate();
            let z = iterate.value();
            orbit.min.re = orbit.min.re.min(z.re).max(-2.0);
            orbit.min.im = orbit.min.im.min(z.im).max(-2.0);
            orbit.max.re = orbit.max.re.max(z.re).min(2.0);
            orbit.max.im = orbit.max.im.max(z.im).min(2.0);
            orbit.points.push(z);
        }
        orbit.escaped = iterate.escaped();
        orbit
    }
}
