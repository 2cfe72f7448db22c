//! The pacemaker: view progression and timeout scheduling.

use crate::BftConfig;
use cascade_types::View;
use std::time::Duration;
use tracing::debug;

/// Drives the local view forward on certificates and timeouts.
///
/// The view advances to `cert.view + 1` whenever a QC or TC at or above the
/// current view is observed. Consecutive timed-out views grow the timeout
/// exponentially (up to the configured cap); a formed QC resets the
/// backoff.
#[derive(Debug)]
pub struct Pacemaker {
    config: BftConfig,
    current_view: View,
    consecutive_timeouts: u32,
}

impl Pacemaker {
    pub fn new(config: BftConfig) -> Self {
        Pacemaker {
            config,
            // View 0 is the epoch genesis; the first proposed view is 1.
            current_view: View(1),
            consecutive_timeouts: 0,
        }
    }

    pub fn current_view(&self) -> View {
        self.current_view
    }

    /// The timeout to arm for the current view.
    pub fn timeout(&self) -> Duration {
        self.config.timeout_for(self.consecutive_timeouts)
    }

    /// A QC at `view` was observed. Returns the new view when it advances.
    pub fn process_qc(&mut self, view: View) -> Option<View> {
        if view < self.current_view {
            return None;
        }
        self.current_view = view.next();
        self.consecutive_timeouts = 0;
        debug!(view = self.current_view.0, "pacemaker advanced on QC");
        Some(self.current_view)
    }

    /// A TC at `view` was observed. Advances without resetting backoff:
    /// only real progress (a QC) calms the timeouts down.
    pub fn process_tc(&mut self, view: View) -> Option<View> {
        if view < self.current_view {
            return None;
        }
        self.current_view = view.next();
        debug!(view = self.current_view.0, "pacemaker advanced on TC");
        Some(self.current_view)
    }

    /// The local timeout for `view` fired. Returns false for stale timers.
    pub fn on_view_timeout(&mut self, view: View) -> bool {
        if view != self.current_view {
            return false;
        }
        self.consecutive_timeouts += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qc_advances_and_resets_backoff() {
        let config = BftConfig {
            timeout_ms: 1_000,
            rate: 2.0,
            max_exp: 4,
            ..Default::default()
        };
        let mut pacemaker = Pacemaker::new(config);
        assert_eq!(pacemaker.current_view(), View(1));

        assert!(pacemaker.on_view_timeout(View(1)));
        assert_eq!(pacemaker.timeout(), Duration::from_millis(2_000));

        assert_eq!(pacemaker.process_qc(View(1)), Some(View(2)));
        assert_eq!(pacemaker.timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn stale_certificates_do_not_regress() {
        let mut pacemaker = Pacemaker::new(BftConfig::default());
        pacemaker.process_qc(View(5));
        assert_eq!(pacemaker.current_view(), View(6));
        assert_eq!(pacemaker.process_qc(View(3)), None);
        assert_eq!(pacemaker.current_view(), View(6));
    }

    #[test]
    fn tc_advances_without_resetting_backoff() {
        let config = BftConfig {
            timeout_ms: 1_000,
            rate: 2.0,
            max_exp: 4,
            ..Default::default()
        };
        let mut pacemaker = Pacemaker::new(config);
        assert!(pacemaker.on_view_timeout(View(1)));
        pacemaker.process_tc(View(1));
        assert_eq!(pacemaker.current_view(), View(2));
        // Backoff still applies until a QC forms.
        assert_eq!(pacemaker.timeout(), Duration::from_millis(2_000));
    }

    #[test]
    fn stale_timeouts_are_ignored() {
        let mut pacemaker = Pacemaker::new(BftConfig::default());
        pacemaker.process_qc(View(1));
        assert!(!pacemaker.on_view_timeout(View(1)));
        assert!(pacemaker.on_view_timeout(View(2)));
    }
}
