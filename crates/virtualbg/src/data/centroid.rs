//! Person centroid tracking: three horizontal band centroids plus one
//! vertical centroid, with EMA-smoothed velocities.

/// EMA smoothing factor applied to raw per-frame velocity.
const VELOCITY_EMA_ALPHA: f32 = 0.8;

/// Three horizontal centroids (top/mid/bottom thirds of the person bbox)
/// and one vertical centroid, each normalized to `[0,1]`.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Centroid {
    pub cx: [f32; 3],
    pub cy: f32,
}

/// EMA-smoothed motion vector: one horizontal velocity per band, one
/// vertical velocity, persisted across frames.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct MotionVector {
    pub vx: [f32; 3],
    pub vy: f32,
}

/// Tracker owning the centroid history and EMA velocity state. Mirrors
/// the adapter's internal bookkeeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct CentroidTracker {
    last: Option<Centroid>,
    velocity: MotionVector,
}

impl CentroidTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new centroid observation. The first observation after
    /// construction or `reset()` seeds history without computing a
    /// velocity (invariant 7: no spike on first detection).
    pub fn observe(&mut self, centroid: Centroid) {
        if let Some(prev) = self.last {
            for i in 0..3 {
                let raw = centroid.cx[i] - prev.cx[i];
                self.velocity.vx[i] =
                    VELOCITY_EMA_ALPHA * raw + (1.0 - VELOCITY_EMA_ALPHA) * self.velocity.vx[i];
            }
            let raw_y = centroid.cy - prev.cy;
            self.velocity.vy =
                VELOCITY_EMA_ALPHA * raw_y + (1.0 - VELOCITY_EMA_ALPHA) * self.velocity.vy;
        }
        self.last = Some(centroid);
    }

    pub fn velocity(&self) -> MotionVector {
        self.velocity
    }

    pub fn last_centroid(&self) -> Option<Centroid> {
        self.last
    }

    /// Clear history and zero velocities; the next `observe` is treated
    /// as a first detection again.
    pub fn reset(&mut self) {
        self.last = None;
        self.velocity = MotionVector::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_seeds_without_velocity_spike() {
        let mut tracker = CentroidTracker::new();
        tracker.observe(Centroid {
            cx: [0.5, 0.5, 0.5],
            cy: 0.5,
        });
        assert_eq!(tracker.velocity(), MotionVector::default());
    }

    #[test]
    fn reset_clears_velocity_and_history() {
        let mut tracker = CentroidTracker::new();
        tracker.observe(Centroid {
            cx: [0.2, 0.2, 0.2],
            cy: 0.2,
        });
        tracker.observe(Centroid {
            cx: [0.4, 0.4, 0.4],
            cy: 0.4,
        });
        assert_ne!(tracker.velocity(), MotionVector::default());

        tracker.reset();
        assert_eq!(tracker.velocity(), MotionVector::default());
        assert!(tracker.last_centroid().is_none());

        tracker.observe(Centroid {
            cx: [0.9, 0.9, 0.9],
            cy: 0.9,
        });
        assert_eq!(tracker.velocity(), MotionVector::default());
    }

    #[test]
    fn velocity_ema_matches_formula() {
        let mut tracker = CentroidTracker::new();
        tracker.observe(Centroid {
            cx: [0.0, 0.0, 0.0],
            cy: 0.0,
        });
        tracker.observe(Centroid {
            cx: [0.1, 0.1, 0.1],
            cy: 0.1,
        });
        let v = tracker.velocity();
        assert!((v.vx[0] - 0.08).abs() < 1e-6);
        assert!((v.vy - 0.08).abs() < 1e-6);
    }
}
