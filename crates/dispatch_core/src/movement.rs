//! Movement simulator: moves a unit along a route one frame at a time.
//!
//! Each segment between two consecutive waypoints is cut into a fixed number
//! of frames and positions are interpolated linearly in coordinate space.
//! The first frame sits on the route's first waypoint, every segment's last
//! frame on its end waypoint, and no waypoint is emitted twice. Routes with
//! fewer than two waypoints produce no frames.

use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::config::DispatchConfig;
use crate::geo::Coordinate;
use crate::routing::Route;

/// Untimed frame sequence for a route.
#[derive(Debug, Clone)]
pub struct Frames {
    waypoints: Vec<Coordinate>,
    frames_per_segment: usize,
    segment: usize,
    frame: usize,
}

impl Frames {
    pub fn new(route: Route, frames_per_segment: usize) -> Self {
        Self {
            waypoints: route.into_waypoints(),
            frames_per_segment: frames_per_segment.max(1),
            segment: 0,
            frame: 0,
        }
    }

    fn segments(&self) -> usize {
        self.waypoints.len().saturating_sub(1)
    }

    pub fn remaining(&self) -> usize {
        let segments_left = self.segments().saturating_sub(self.segment);
        (segments_left * self.frames_per_segment).saturating_sub(self.frame)
    }
}

impl Iterator for Frames {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        if self.segment >= self.segments() {
            return None;
        }
        let start = self.waypoints[self.segment];
        let end = self.waypoints[self.segment + 1];
        let n = self.frames_per_segment;

        // The first segment starts on its start waypoint; later ones start
        // one step past it, since the previous segment already ended there.
        let position = if self.frame + 1 == n {
            end
        } else if self.segment == 0 {
            start.lerp(&end, self.frame as f64 / (n - 1) as f64)
        } else {
            start.lerp(&end, (self.frame + 1) as f64 / n as f64)
        };

        self.frame += 1;
        if self.frame == self.frames_per_segment {
            self.frame = 0;
            self.segment += 1;
        }
        Some(position)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames {}

/// Time-paced frame sequence. Consumes its route; once exhausted it stays
/// exhausted. Dropping it releases the timer.
#[derive(Debug)]
pub struct Drive {
    frames: Frames,
    ticker: Interval,
}

impl Drive {
    /// Must be called from within a tokio runtime.
    pub fn new(route: Route, frame_interval: Duration, frames_per_segment: usize) -> Self {
        let mut ticker = interval(frame_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            frames: Frames::new(route, frames_per_segment),
            ticker,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.remaining()
    }

    /// Wait for the next frame tick and return the position for it; `None`
    /// once the route is finished. The first frame is immediate.
    ///
    /// Cancel safe: dropping the future before it resolves loses no frame.
    pub async fn next_frame(&mut self) -> Option<Coordinate> {
        if self.frames.remaining() == 0 {
            return None;
        }
        self.ticker.tick().await;
        self.frames.next()
    }
}

/// Frame pacing settings shared by every leg.
#[derive(Debug, Clone, Copy)]
pub struct MovementSimulator {
    frame_interval: Duration,
    frames_per_segment: usize,
}

impl MovementSimulator {
    pub fn new(frame_interval: Duration, frames_per_segment: usize) -> Self {
        Self {
            frame_interval,
            frames_per_segment: frames_per_segment.max(1),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.frame_interval(), config.frames_per_segment())
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn frames_per_segment(&self) -> usize {
        self.frames_per_segment
    }

    pub fn frames(&self, route: Route) -> Frames {
        Frames::new(route, self.frames_per_segment)
    }

    pub fn drive(&self, route: Route) -> Drive {
        Drive::new(route, self.frame_interval, self.frames_per_segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn route(points: &[(f64, f64)]) -> Route {
        Route::new(points.iter().map(|&(lat, lng)| Coordinate::new(lat, lng)).collect())
            .expect("non-empty route")
    }

    #[test]
    fn two_waypoints_yield_n_frames_from_start_to_end() {
        let frames: Vec<Coordinate> = Frames::new(route(&[(0.0, 0.0), (1.0, 2.0)]), 5).collect();
        assert_eq!(frames.len(), 5);
        assert!(frames[0].approx_eq(&Coordinate::new(0.0, 0.0), EPS));
        assert!(frames[2].approx_eq(&Coordinate::new(0.5, 1.0), EPS));
        assert!(frames[4].approx_eq(&Coordinate::new(1.0, 2.0), EPS));
        for pair in frames.windows(2) {
            assert!(pair[1].lat >= pair[0].lat && pair[1].lng >= pair[0].lng);
        }
    }

    #[test]
    fn single_waypoint_is_a_no_op() {
        let mut frames = Frames::new(route(&[(3.0, 3.0)]), 18);
        assert_eq!(frames.remaining(), 0);
        assert_eq!(frames.next(), None);
    }

    #[test]
    fn frames_cover_every_segment() {
        let frames = Frames::new(route(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]), 4);
        assert_eq!(frames.len(), 8);
        let frames: Vec<Coordinate> = frames.collect();
        assert!(frames[0].approx_eq(&Coordinate::new(0.0, 0.0), EPS));
        assert!(frames[3].approx_eq(&Coordinate::new(1.0, 0.0), EPS));
        assert!(frames[4].approx_eq(&Coordinate::new(1.0, 0.25), EPS));
        assert!(frames[7].approx_eq(&Coordinate::new(1.0, 1.0), EPS));
    }

    #[test]
    fn inner_waypoints_are_not_repeated() {
        let points = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (2.0, 1.0)];
        let frames: Vec<Coordinate> = Frames::new(route(&points), 3).collect();
        assert_eq!(frames.len(), 9);
        for pair in frames.windows(2) {
            assert!(!pair[0].approx_eq(&pair[1], EPS), "repeated frame {:?}", pair[0]);
        }
        for (index, (lat, lng)) in [(2, points[1]), (5, points[2]), (8, points[3])] {
            assert!(frames[index].approx_eq(&Coordinate::new(lat, lng), EPS));
        }
    }

    #[test]
    fn one_frame_per_segment_jumps_to_segment_end() {
        let frames: Vec<Coordinate> =
            Frames::new(route(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]), 1).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].approx_eq(&Coordinate::new(1.0, 1.0), EPS));
        assert!(frames[1].approx_eq(&Coordinate::new(2.0, 2.0), EPS));
    }

    #[tokio::test(start_paused = true)]
    async fn drive_paces_frames_on_the_interval() {
        let simulator = MovementSimulator::new(Duration::from_millis(16), 3);
        let mut drive = simulator.drive(route(&[(0.0, 0.0), (0.0, 1.0)]));
        let started = tokio::time::Instant::now();

        let mut positions = Vec::new();
        while let Some(position) = drive.next_frame().await {
            positions.push(position);
        }

        assert_eq!(positions.len(), 3);
        assert!(positions[2].approx_eq(&Coordinate::new(0.0, 1.0), EPS));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(32) && elapsed < Duration::from_millis(48));
        assert_eq!(drive.next_frame().await, None);
    }
}
