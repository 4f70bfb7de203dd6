//! Leader/follower basis and lead-lag strength.

use crate::features::ofi::RollingStats;

/// Tracks `leader_mid - follower_mid` with a rolling z-score, plus a
/// lead-lag ratio from consecutive returns. Without a real follower mid
/// wired in, both outputs are 0 so the basis event cannot fire.
#[derive(Clone, Debug)]
pub struct BasisTracker {
    stats: RollingStats,
    last_leader: Option<f64>,
    last_follower: Option<f64>,
}

impl BasisTracker {
    pub fn new(window: usize) -> Self {
        Self {
            stats: RollingStats::new(window),
            last_leader: None,
            last_follower: None,
        }
    }

    /// Returns `(basis, basis_z, lead_lag)`.
    pub fn update(&mut self, leader_mid: f64, follower_mid: Option<f64>) -> (f64, f64, f64) {
        let Some(follower_mid) = follower_mid else {
            return (0.0, 0.0, 0.0);
        };

        let basis = leader_mid - follower_mid;
        self.stats.update(basis);
        let basis_z = self.stats.zscore(basis);

        let mut lead_lag = 0.0;
        if let (Some(prev_leader), Some(prev_follower)) = (self.last_leader, self.last_follower) {
            let leader_ret = leader_mid - prev_leader;
            let follower_ret = follower_mid - prev_follower;
            if follower_ret == 0.0 {
                lead_lag = if leader_ret != 0.0 { 1.0 } else { 0.0 };
            } else {
                lead_lag = (leader_ret / follower_ret).abs().min(3.0) / 3.0;
            }
        }

        self.last_leader = Some(leader_mid);
        self.last_follower = Some(follower_mid);
        (basis, basis_z, lead_lag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario: no follower mid is wired in.
    /// Expected: basis, basis_z and lead_lag are all 0 — the basis event
    /// contributes no signal.
    #[test]
    fn test_no_follower_yields_zeros() {
        let mut tracker = BasisTracker::new(8);
        assert_eq!(tracker.update(100.0, None), (0.0, 0.0, 0.0));
        assert_eq!(tracker.update(105.0, None), (0.0, 0.0, 0.0));
    }

    /// Scenario: leader moves while the follower is flat.
    /// Expected: lead_lag saturates at 1 (leader moved, follower did not).
    #[test]
    fn test_leader_moves_follower_flat() {
        let mut tracker = BasisTracker::new(8);
        tracker.update(100.0, Some(100.0));
        let (basis, _, lead_lag) = tracker.update(101.0, Some(100.0));
        assert!((basis - 1.0).abs() < 1e-12);
        assert_eq!(lead_lag, 1.0);
    }

    /// Scenario: leader moves 3x the follower's move.
    /// Expected: the ratio caps at 3 and normalises to 1.0; a 1:1 move
    /// normalises to 1/3.
    #[test]
    fn test_lead_lag_ratio_normalisation() {
        let mut tracker = BasisTracker::new(8);
        tracker.update(100.0, Some(100.0));
        let (_, _, lag) = tracker.update(103.0, Some(101.0));
        assert!((lag - 1.0).abs() < 1e-12);

        let mut tracker = BasisTracker::new(8);
        tracker.update(100.0, Some(100.0));
        let (_, _, lag) = tracker.update(101.0, Some(101.0));
        assert!((lag - 1.0 / 3.0).abs() < 1e-12);
    }

    /// Scenario: constant basis across updates.
    /// Expected: basis_z stays 0 (zero variance window).
    #[test]
    fn test_constant_basis_zero_z() {
        let mut tracker = BasisTracker::new(8);
        for i in 0..5 {
            let leader = 100.0 + i as f64;
            let (_, z, _) = tracker.update(leader, Some(leader - 0.5));
            assert_eq!(z, 0.0);
        }
    }
}
