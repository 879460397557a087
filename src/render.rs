// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Progressive, multi-threaded Mandelbrot renderer
//!
//! The image is cut into small square bins.  Each pass sends every
//! bin that still has undecided pixels through a bounded work queue
//! to a pool of workers; each worker advances its bin's pixels a fixed
//! number of steps and hands the bin back through a results queue.
//! Bins travel by value, so no two threads ever touch the same pixel.
//!
//! After every pass the renderer can publish a snapshot of the image
//! to a broadcast channel, where any number of named stages (a file
//! writer, a progress reporter) pick it up independently.

use itertools::iproduct;
use std::collections::HashSet;
use std::sync::Arc;

use crate::channel::BroadcastChannel;
use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::mandel::{Orbit, Pixel};
use crate::planes::{self, PlaneMapper};
use crate::pool::WorkerPool;
use crate::work_queue::BoundedBlockingQueue;

/// A square block of pixels, the unit of work handed to a worker.
#[derive(Clone, Debug)]
pub struct Bin {
    column: usize,
    row: usize,
    pixels: Vec<Pixel>,
    finished: bool,
}

impl Bin {
    fn new(plane: &PlaneMapper, column: usize, row: usize, bin_width: usize) -> Self {
        let width = plane.pixel_width();
        let pixels = iproduct!(0..bin_width, 0..bin_width)
            .map(|(dy, dx)| {
                let screen = planes::Pixel(column * bin_width + dx, row * bin_width + dy);
                Pixel::new(plane.pixel_to_point(&screen), width)
            })
            .collect();
        Bin {
            column,
            row,
            pixels,
            finished: false,
        }
    }

    /// Advance every pixel up to `steps` times.
    pub fn iterate(&mut self, steps: usize) {
        for pixel in self.pixels.iter_mut() {
            pixel.iterate_n(steps);
        }
        self.finished = self.pixels.iter().all(Pixel::is_final);
    }

    /// True once every pixel in the bin is final.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Column and row of the bin, counted in bins.
    pub fn position(&self) -> (usize, usize) {
        (self.column, self.row)
    }
}

/// A snapshot of the image, cheap to clone and share.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Passes completed when the snapshot was taken.
    pub pass: usize,
    /// Bins whose every pixel is final.
    pub finished_bins: usize,
    /// Bins in the image.
    pub total_bins: usize,
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
    /// Packed RGB, three bytes per pixel, row by row from the top.
    pub rgb: Arc<Vec<u8>>,
}

impl Frame {
    /// True if nothing is left to compute.
    pub fn is_complete(&self) -> bool {
        self.finished_bins == self.total_bins
    }
}

/// What one pass accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Passes completed so far.
    pub pass: usize,
    /// Bins the workers processed during this pass.
    pub bins_processed: usize,
    /// Bins whose every pixel is final.
    pub finished_bins: usize,
    /// Bins in the image.
    pub total_bins: usize,
}

/// Owns the pixel grid and drives passes over it.
pub struct Renderer {
    config: RenderConfig,
    plane: PlaneMapper,
    pool: WorkerPool,
    bins: Vec<Bin>,
    texture: Vec<u8>,
    passes: usize,
}

impl Renderer {
    /// Validate `config` and lay out the grid.
    pub fn new(config: RenderConfig) -> Result<Self, RenderError> {
        config.validate()?;
        let plane = PlaneMapper::from_center(
            config.width,
            config.height,
            config.center,
            config.real_width,
        )?;
        let pool = WorkerPool::new(config.threads)?;
        let mut renderer = Renderer {
            texture: vec![0; config.width * config.height * 3],
            config,
            plane,
            pool,
            bins: vec![],
            passes: 0,
        };
        renderer.reset();
        Ok(renderer)
    }

    // Rebuild every bin from the current plane and repaint.
    fn reset(&mut self) {
        let (columns, rows) = self.config.bins();
        let plane = &self.plane;
        let bin_width = self.config.bin_width;
        self.bins = iproduct!(0..rows, 0..columns)
            .map(|(row, column)| Bin::new(plane, column, row, bin_width))
            .collect();
        self.passes = 0;
        for bin in &self.bins {
            paint(&mut self.texture, bin, self.config.width, bin_width);
        }
        tracing::debug!(
            bins = self.bins.len(),
            center = %self.plane.center(),
            width = self.plane.real_width(),
            "grid laid out"
        );
    }

    /// The plane currently being rendered.
    pub fn plane(&self) -> &PlaneMapper {
        &self.plane
    }

    /// The settings this renderer was built with.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Packed RGB of the current image.
    pub fn texture(&self) -> &[u8] {
        &self.texture
    }

    /// True once every bin is final.
    pub fn is_finished(&self) -> bool {
        self.bins.iter().all(Bin::is_finished)
    }

    fn stats(&self, bins_processed: usize) -> PassStats {
        PassStats {
            pass: self.passes,
            bins_processed,
            finished_bins: self.bins.iter().filter(|b| b.is_finished()).count(),
            total_bins: self.bins.len(),
        }
    }

    /// Snapshot the image for publication.
    pub fn frame(&self) -> Frame {
        let stats = self.stats(0);
        Frame {
            pass: stats.pass,
            finished_bins: stats.finished_bins,
            total_bins: stats.total_bins,
            width: self.config.width,
            height: self.config.height,
            rgb: Arc::new(self.texture.clone()),
        }
    }

    /// Run one pass over every unfinished bin.
    pub fn pass(&mut self) -> Result<PassStats, RenderError> {
        let steps = self.config.iterations_per_pass;
        self.pass_with(|bin| bin.iterate(steps))
    }

    // Bins held by a worker that panicked, or never handed out after
    // the queue shut down, are missing from `bins`.  They start over.
    fn lost_bins(&self, bins: &[Bin]) -> Vec<Bin> {
        let (columns, rows) = self.config.bins();
        let present: HashSet<(usize, usize)> = bins.iter().map(Bin::position).collect();
        iproduct!(0..rows, 0..columns)
            .filter(|&(row, column)| !present.contains(&(column, row)))
            .map(|(row, column)| Bin::new(&self.plane, column, row, self.config.bin_width))
            .collect()
    }

    fn pass_with<S>(&mut self, step: S) -> Result<PassStats, RenderError>
    where
        S: Fn(&mut Bin) + Sync,
    {
        let (mut done, pending): (Vec<Bin>, Vec<Bin>) =
            self.bins.drain(..).partition(Bin::is_finished);
        let expected = pending.len();

        let work: BoundedBlockingQueue<Bin> = BoundedBlockingQueue::new(self.config.work_capacity);
        let results: BoundedBlockingQueue<Bin> = BoundedBlockingQueue::unbounded();

        let outcome = self.pool.run(
            &work,
            |queue| {
                for bin in pending {
                    if queue.push(bin).is_err() {
                        tracing::warn!("work queue shut down early, abandoning pass");
                        break;
                    }
                }
            },
            |mut bin: Bin| {
                step(&mut bin);
                if results.push(bin).is_err() {
                    tracing::error!("results queue refused a bin");
                }
            },
        );
        results.shutdown();

        while let Ok(bin) = results.try_pop() {
            paint(&mut self.texture, &bin, self.config.width, self.config.bin_width);
            done.push(bin);
        }
        // Bins stranded in the work queue by a failed run.
        while let Ok(bin) = work.try_pop() {
            done.push(bin);
        }
        if outcome.is_err() {
            let lost = self.lost_bins(&done);
            if !lost.is_empty() {
                tracing::warn!(lost = lost.len(), "restarting bins lost in a failed pass");
            }
            for bin in lost {
                paint(&mut self.texture, &bin, self.config.width, self.config.bin_width);
                done.push(bin);
            }
        }
        done.sort_by_key(|bin| (bin.row, bin.column));
        self.bins = done;
        let processed = outcome?;
        self.passes += 1;

        if processed != expected {
            tracing::warn!(processed, expected, "pass did not process every bin");
        }
        let stats = self.stats(processed);
        tracing::debug!(
            pass = stats.pass,
            processed,
            finished = stats.finished_bins,
            total = stats.total_bins,
            "pass complete"
        );
        Ok(stats)
    }

    /// Run passes until the image is final or the pass limit is
    /// reached, publishing a frame after each pass if `frames` is
    /// given.  A frame that cannot be published ends the render.
    pub fn render(
        &mut self,
        frames: Option<&dyn BroadcastChannel<Frame>>,
    ) -> Result<PassStats, RenderError> {
        let mut stats = self.stats(0);
        while !self.is_finished() && self.passes < self.config.max_passes {
            stats = self.pass()?;
            if let Some(frames) = frames {
                frames.push(self.frame())?;
            }
        }
        tracing::info!(
            passes = stats.pass,
            finished = stats.finished_bins,
            total = stats.total_bins,
            "render complete"
        );
        Ok(stats)
    }

    /// Recentre on the screen point `(x, y)` and scale the view width
    /// by `factor`; less than one zooms in.  Starts the image over.
    pub fn zoom(&mut self, x: f64, y: f64, factor: f64) -> Result<(), RenderError> {
        let center = self.plane.screen_to_point(x, y);
        let real_width = self.plane.real_width() * factor;
        self.plane =
            PlaneMapper::from_center(self.config.width, self.config.height, center, real_width)?;
        self.config.center = center;
        self.config.real_width = real_width;
        self.reset();
        Ok(())
    }

    /// The orbit of the point under the screen coordinate `(x, y)`.
    pub fn orbit_at(&self, x: f64, y: f64, limit: usize) -> Orbit {
        Orbit::trace(self.plane.screen_to_point(x, y), limit)
    }
}

fn paint(texture: &mut [u8], bin: &Bin, width: usize, bin_width: usize) {
    let (left, top) = (bin.column * bin_width, bin.row * bin_width);
    for (i, pixel) in bin.pixels.iter().enumerate() {
        let (dy, dx) = (i / bin_width, i % bin_width);
        let offset = ((top + dy) * width + left + dx) * 3;
        texture[offset..offset + 3].copy_from_slice(&pixel.rgb());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastRingQueue;
    use crate::error::PoolError;
    use num::Complex;

    fn small() -> RenderConfig {
        RenderConfig {
            width: 16,
            height: 8,
            bin_width: 4,
            threads: 3,
            work_capacity: 2,
            iterations_per_pass: 16,
            max_passes: 4,
            ..RenderConfig::default()
        }
    }

    #[test]
    fn grid_covers_the_image() {
        let r = Renderer::new(small()).unwrap();
        assert_eq!(r.bins.len(), 8);
        assert_eq!(r.texture().len(), 16 * 8 * 3);
        assert_eq!(r.bins[5].position(), (1, 1));
        assert!(!r.is_finished());
    }

    #[test]
    fn bad_config_is_refused() {
        let config = RenderConfig {
            bin_width: 3,
            ..small()
        };
        assert!(Renderer::new(config).is_err());
    }

    #[test]
    fn a_pass_returns_every_bin() {
        let mut r = Renderer::new(small()).unwrap();
        let stats = r.pass().unwrap();
        assert_eq!(stats.pass, 1);
        assert_eq!(stats.total_bins, 8);
        assert_eq!(stats.bins_processed, 8);
        assert_eq!(r.bins.len(), 8);
        let positions: Vec<(usize, usize)> = r.bins.iter().map(Bin::position).collect();
        let mut sorted = positions.clone();
        sorted.sort_by_key(|&(column, row)| (row, column));
        assert_eq!(positions, sorted);
    }

    #[test]
    fn view_outside_the_set_finishes() {
        let config = RenderConfig {
            center: Complex::new(10.0, 10.0),
            real_width: 1.0,
            ..small()
        };
        let mut r = Renderer::new(config).unwrap();
        let stats = r.render(None).unwrap();
        assert!(r.is_finished());
        assert_eq!(stats.finished_bins, stats.total_bins);
        assert_eq!(stats.pass, 1);

        // Nothing left to do: a second pass touches no bins.
        assert_eq!(r.pass().unwrap().bins_processed, 0);
    }

    #[test]
    fn frames_are_published_each_pass() {
        let frames = BroadcastRingQueue::new(8, vec!["test"]).unwrap();
        let mut r = Renderer::new(small()).unwrap();
        let stats = r.render(Some(&frames)).unwrap();
        assert!(stats.pass >= 1 && stats.pass <= 4);
        for pass in 1..=stats.pass {
            let frame = frames.pop(0).unwrap().unwrap();
            assert_eq!(frame.pass, pass);
            assert_eq!(frame.rgb.len(), 16 * 8 * 3);
        }
    }

    #[test]
    fn overrun_stops_the_render() {
        let frames = BroadcastRingQueue::new(2, vec!["stalled"]).unwrap();
        let config = RenderConfig {
            iterations_per_pass: 1,
            ..small()
        };
        let mut r = Renderer::new(config).unwrap();
        match r.render(Some(&frames)) {
            Err(RenderError::Broadcast(err)) => {
                assert_eq!(err.blocking_tasks(), &["stalled".to_string()])
            }
            other => panic!("expected an overrun, got {:?}", other.map(|s| s.pass)),
        }
    }

    #[test]
    fn zoom_recentres() {
        let mut r = Renderer::new(small()).unwrap();
        let target = r.plane().screen_to_point(4.0, 2.0);
        r.zoom(4.0, 2.0, 0.5).unwrap();
        assert!((r.plane().center() - target).norm() < 1e-12);
        assert!((r.config().real_width - 1.4).abs() < 1e-12);
        assert_eq!(r.bins.len(), 8);
    }

    #[test]
    fn orbit_under_the_cursor() {
        let r = Renderer::new(small()).unwrap();
        let orbit = r.orbit_at(8.0, 4.0, 10);
        assert!((orbit.points[0] - r.plane().center()).norm() < 1e-12);
    }

    #[test]
    fn failed_pass_keeps_every_bin() {
        let mut r = Renderer::new(small()).unwrap();
        let outcome = r.pass_with(|bin| {
            if bin.position() == (1, 1) {
                panic!("bin (1, 1) is cursed");
            }
            bin.iterate(16);
        });
        match outcome {
            Err(RenderError::Pool(PoolError::WorkerPanicked)) => {}
            other => panic!("expected a worker panic, got {:?}", other.map(|s| s.pass)),
        }

        assert_eq!(r.bins.len(), 8);
        let positions: Vec<(usize, usize)> = r.bins.iter().map(Bin::position).collect();
        let expected: Vec<(usize, usize)> = iproduct!(0..2, 0..4)
            .map(|(row, column)| (column, row))
            .collect();
        assert_eq!(positions, expected);
        assert!(!r.is_finished());

        let stats = r.pass().unwrap();
        assert_eq!(stats.pass, 1);
        assert_eq!(stats.total_bins, 8);
    }
}
