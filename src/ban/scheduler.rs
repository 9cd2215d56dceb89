//! Ban Scheduler
//!
//! Pure policy: decides whether a host's failures in this scan warrant a ban
//! and how long it lasts. Nothing here touches state.

use crate::config::OptionsConfig;

/// Beyond this many bans the exponent is not evaluated at all
const SAFETY_CUTOFF: u64 = 100;

/// Outcome of evaluating one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    Ban {
        /// Length in days
        days: u64,
        /// The host's ban count once this ban is recorded
        ban_number: u64,
    },
}

/// Threshold and exponential backoff policy
#[derive(Debug, Clone)]
pub struct BanScheduler {
    interval: u64,
    interval_count: u64,
    max_ban: u64,
}

impl BanScheduler {
    pub fn new(interval: u64, interval_count: u64, max_ban: u64) -> Self {
        Self {
            interval,
            interval_count,
            max_ban,
        }
    }

    pub fn from_config(options: &OptionsConfig) -> Self {
        Self::new(options.interval, options.interval_count, options.max_ban)
    }

    /// Threshold applies to failures inside the current scan window only
    pub fn should_ban(&self, run_failures: u64) -> bool {
        run_failures > self.interval_count
    }

    /// Length of the `ban_number`-th ban: `interval^ban_number` days, capped
    /// at `max_ban`. The first ban is therefore `interval^1`.
    pub fn ban_duration(&self, ban_number: u64) -> u64 {
        if ban_number > SAFETY_CUTOFF {
            return self.max_ban;
        }

        let exponent = ban_number.max(1) as u32;
        self.interval
            .checked_pow(exponent)
            .unwrap_or(self.max_ban)
            .min(self.max_ban)
    }

    /// Decide for one host given its failures this run and its prior bans
    pub fn evaluate(&self, run_failures: u64, prior_bans: u64) -> Decision {
        if !self.should_ban(run_failures) {
            return Decision::NoAction;
        }

        let ban_number = prior_bans.saturating_add(1);
        Decision::Ban {
            days: self.ban_duration(ban_number),
            ban_number,
        }
    }
}
