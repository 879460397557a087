// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Settings for a render, with the defaults the renderer was tuned
//! for: an 800x800 window on the whole set, split into 4x4 bins.

use num::Complex;
use std::time::Duration;

use crate::broadcast::OverrunPolicy;
use crate::error::RenderError;
use crate::pool::WorkerPool;

/// Everything a [`Renderer`](crate::render::Renderer) needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Point of the complex plane at the middle of the image.
    pub center: Complex<f64>,
    /// Width of the image measured on the real axis.
    pub real_width: f64,
    /// Side of the square bins the image is split into.  Must divide
    /// both the width and the height.
    pub bin_width: usize,
    /// How many steps each pixel advances per pass.
    pub iterations_per_pass: usize,
    /// Upper bound on the number of passes a render makes.
    pub max_passes: usize,
    /// Worker threads per pass.
    pub threads: usize,
    /// Capacity of the bin queue; zero for unbounded.
    pub work_capacity: usize,
    /// Slots in the frame broadcast ring.
    pub frame_capacity: usize,
    /// What the frame ring does when a subscriber falls behind.
    pub overrun: OverrunPolicy,
    /// How long closing the frame ring may wait for subscribers.
    pub close_timeout: Duration,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            width: 800,
            height: 800,
            center: Complex::new(-0.85, 0.0),
            real_width: 2.8,
            bin_width: 4,
            iterations_per_pass: 64,
            max_passes: 100,
            threads: WorkerPool::default().threads(),
            work_capacity: 256,
            frame_capacity: 16,
            overrun: OverrunPolicy::Fail,
            close_timeout: Duration::from_millis(1000),
        }
    }
}

impl RenderConfig {
    /// Number of bins across and down.
    pub fn bins(&self) -> (usize, usize) {
        (self.width / self.bin_width, self.height / self.bin_width)
    }

    /// Reject settings the renderer cannot work with.
    pub fn validate(&self) -> Result<(), RenderError> {
        let bad = |msg: String| Err(RenderError::BadConfig(msg));

        if self.width == 0 || self.height == 0 {
            return bad(format!("image size {}x{} is empty", self.width, self.height));
        }
        if self.bin_width == 0
            || self.width % self.bin_width != 0
            || self.height % self.bin_width != 0
        {
            return bad(format!(
                "bin width {} does not divide {}x{}",
                self.bin_width, self.width, self.height
            ));
        }
        if self.iterations_per_pass == 0 || self.max_passes == 0 {
            return bad("a render needs at least one pass of one iteration".to_string());
        }
        if self.threads == 0 {
            return bad("a render needs at least one thread".to_string());
        }
        if self.frame_capacity < 2 {
            return bad(format!(
                "frame ring needs at least 2 slots, got {}",
                self.frame_capacity
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bins(), (200, 200));
        assert!(config.threads >= 1);
    }

    #[test]
    fn bin_width_must_divide_the_image() {
        let config = RenderConfig {
            width: 30,
            height: 32,
            bin_width: 4,
            ..RenderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tiny_frame_ring_is_refused() {
        let config = RenderConfig {
            frame_capacity: 1,
            ..RenderConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad configuration: frame ring needs at least 2 slots, got 1"
        );
    }
}
