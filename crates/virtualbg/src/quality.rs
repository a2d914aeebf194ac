//! Adaptive Quality Controller: windowed frame-time monitoring with
//! hysteresis, driving tier transitions in the fixed `TIER_TABLE`.

use crate::config::AdaptiveConfig;
use crate::data::tier::{QualityTier, TIER_COUNT, TIER_TABLE};

/// Callback invoked once per tier change, after the index has already
/// moved — a single owner-configured callback is enough here since
/// nothing in this crate needs multiple simultaneous listeners.
pub type TierApplier = Box<dyn FnMut(usize, &QualityTier) + Send>;

pub struct QualityController {
    config: AdaptiveConfig,
    tier_index: usize,
    ring: Vec<f32>,
    ring_cursor: usize,
    ring_len: usize,
    frames_since_window: usize,
    good_windows: u32,
    bad_windows: u32,
    critical_in_a_row: u32,
    last_adjustment_ms: Option<i64>,
    locked: bool,
    applier: Option<TierApplier>,
}

impl QualityController {
    pub fn new(config: AdaptiveConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            config,
            tier_index: 0,
            ring: vec![0.0; window_size],
            ring_cursor: 0,
            ring_len: 0,
            frames_since_window: 0,
            good_windows: 0,
            bad_windows: 0,
            critical_in_a_row: 0,
            last_adjustment_ms: None,
            locked: false,
            applier: None,
        }
    }

    pub fn set_applier(&mut self, applier: TierApplier) {
        self.applier = Some(applier);
    }

    pub fn current_tier_index(&self) -> usize {
        self.tier_index
    }

    pub fn current_tier(&self) -> &'static QualityTier {
        &TIER_TABLE[self.tier_index]
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn reset(&mut self) {
        self.ring.iter_mut().for_each(|v| *v = 0.0);
        self.ring_cursor = 0;
        self.ring_len = 0;
        self.frames_since_window = 0;
        self.good_windows = 0;
        self.bad_windows = 0;
        self.critical_in_a_row = 0;
        self.last_adjustment_ms = None;
    }

    pub fn set_tier(&mut self, index: usize) {
        let index = index.min(TIER_COUNT - 1);
        if index == self.tier_index {
            return;
        }
        self.tier_index = index;
        self.notify_applier();
    }

    /// Seed the starting tier from a one-off benchmark sample, per
    /// thresholds `target * {0.5, 0.8, 1.0, 1.5}` mapping to tiers 0..4.
    pub fn calibrate_from_benchmark(&mut self, sample_ms: f32) {
        let target = self.config.target_ms;
        let index = if sample_ms <= target * 0.5 {
            0
        } else if sample_ms <= target * 0.8 {
            1
        } else if sample_ms <= target * 1.0 {
            2
        } else if sample_ms <= target * 1.5 {
            3
        } else {
            4
        };
        self.set_tier(index);
    }

    /// Record one frame's total time and, every `window_size` frames (or
    /// immediately on a critical-frame streak), re-evaluate the tier.
    /// `now_ms` is the caller's monotonic clock reading, used only for
    /// cooldown bookkeeping.
    pub fn report_frame(&mut self, frame_time_ms: f32, now_ms: i64) {
        self.push_ring(frame_time_ms);

        if frame_time_ms > self.config.critical_ms {
            self.critical_in_a_row += 1;
            if self.critical_in_a_row >= self.config.critical_in_a_row_limit {
                self.downgrade(now_ms, true);
                self.critical_in_a_row = 0;
            }
        } else {
            self.critical_in_a_row = 0;
        }

        self.frames_since_window += 1;
        if self.frames_since_window < self.config.window_size.max(1) {
            return;
        }
        self.frames_since_window = 0;

        let mean = self.ring_mean();
        let p95 = self.ring_p95();

        if mean > self.config.target_ms || p95 > self.config.critical_ms {
            self.bad_windows += 1;
            self.good_windows = 0;
            if self.bad_windows >= self.config.downgrade_threshold && self.cooldown_elapsed(now_ms) {
                self.downgrade(now_ms, false);
                self.bad_windows = 0;
            }
        } else if mean < 0.6 * self.config.target_ms {
            self.good_windows += 1;
            if self.good_windows >= self.config.upgrade_threshold && self.cooldown_elapsed(now_ms) {
                self.upgrade(now_ms);
                self.good_windows = 0;
            }
        } else {
            self.good_windows = 0;
            self.bad_windows = 0;
        }
    }

    fn cooldown_elapsed(&self, now_ms: i64) -> bool {
        match self.last_adjustment_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.config.cooldown_ms,
        }
    }

    fn downgrade(&mut self, now_ms: i64, ignore_cooldown: bool) {
        if self.locked {
            return;
        }
        if !ignore_cooldown && !self.cooldown_elapsed(now_ms) {
            return;
        }
        if self.tier_index + 1 < TIER_COUNT {
            self.tier_index += 1;
            self.last_adjustment_ms = Some(now_ms);
            self.notify_applier();
        }
    }

    fn upgrade(&mut self, now_ms: i64) {
        if self.locked {
            return;
        }
        if let Some(next) = self.tier_index.checked_sub(1) {
            self.tier_index = next;
            self.last_adjustment_ms = Some(now_ms);
            self.notify_applier();
        }
    }

    fn notify_applier(&mut self) {
        if let Some(applier) = self.applier.as_mut() {
            applier(self.tier_index, &TIER_TABLE[self.tier_index]);
        }
    }

    fn push_ring(&mut self, value: f32) {
        let len = self.ring.len();
        self.ring[self.ring_cursor % len] = value;
        self.ring_cursor += 1;
        self.ring_len = self.ring_len.saturating_add(1).min(len);
    }

    fn active_samples(&self) -> &[f32] {
        &self.ring[..self.ring_len]
    }

    fn ring_mean(&self) -> f32 {
        let samples = self.active_samples();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<f32>() / samples.len() as f32
    }

    fn ring_p95(&self) -> f32 {
        let mut samples: Vec<f32> = self.active_samples().to_vec();
        if samples.is_empty() {
            return 0.0;
        }
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((samples.len() as f32 - 1.0) * 0.95).round() as usize;
        samples[idx.min(samples.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> AdaptiveConfig {
        AdaptiveConfig {
            target_ms: 28.0,
            critical_ms: 40.0,
            window_size: 30,
            downgrade_threshold: 2,
            upgrade_threshold: 5,
            cooldown_ms: 1000,
            critical_in_a_row_limit: 3,
        }
    }

    #[test]
    fn sustained_slow_frames_downgrade_after_two_bad_windows() {
        // 35ms is above target (28ms) but below the critical threshold
        // (40ms), isolating the windowed hysteresis path from the
        // immediate 3-in-a-row critical-frame downgrade.
        let mut ctrl = QualityController::new(fast_config());
        let mut now = 0i64;
        for _ in 0..30 {
            ctrl.report_frame(20.0, now);
            now += 20;
        }
        assert_eq!(ctrl.current_tier_index(), 0, "window below target should stay stable");
        for _ in 0..30 {
            ctrl.report_frame(35.0, now);
            now += 35;
        }
        assert_eq!(ctrl.current_tier_index(), 0, "first bad window alone should not downgrade");
        for _ in 0..30 {
            ctrl.report_frame(35.0, now);
            now += 35;
        }
        assert_eq!(ctrl.current_tier_index(), 1, "second consecutive bad window should downgrade once");
    }

    #[test]
    fn three_critical_frames_downgrade_immediately_ignoring_cooldown() {
        let mut ctrl = QualityController::new(fast_config());
        ctrl.report_frame(50.0, 0);
        ctrl.report_frame(50.0, 10);
        assert_eq!(ctrl.current_tier_index(), 0);
        ctrl.report_frame(50.0, 20);
        assert_eq!(ctrl.current_tier_index(), 1);
    }

    #[test]
    fn upgrade_requires_five_good_windows() {
        let mut ctrl = QualityController::new(fast_config());
        ctrl.set_tier(4);
        let mut now = 0i64;
        for window in 0..5 {
            for _ in 0..30 {
                ctrl.report_frame(5.0, now);
                now += 5;
            }
            if window < 4 {
                assert_eq!(ctrl.current_tier_index(), 4, "should not upgrade before 5 windows");
            }
        }
        assert_eq!(ctrl.current_tier_index(), 3);
    }

    #[test]
    fn locked_controller_never_changes_tier() {
        let mut ctrl = QualityController::new(fast_config());
        ctrl.lock();
        let mut now = 0i64;
        for _ in 0..3 {
            ctrl.report_frame(100.0, now);
            now += 100;
        }
        assert_eq!(ctrl.current_tier_index(), 0);
    }

    #[test]
    fn calibrate_picks_expected_tier() {
        let mut ctrl = QualityController::new(fast_config());
        ctrl.calibrate_from_benchmark(10.0);
        assert_eq!(ctrl.current_tier_index(), 0);
        let mut ctrl2 = QualityController::new(fast_config());
        ctrl2.calibrate_from_benchmark(100.0);
        assert_eq!(ctrl2.current_tier_index(), 4);
    }
}
