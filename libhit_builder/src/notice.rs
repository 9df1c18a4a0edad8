use spdlog::Level;

use super::constants::DEFAULT_NOTICE_LIMIT;

/// What the caller should do with the occurrence it just recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Within the limit, tell the user about this one
    Show,
    /// First occurrence past the limit. Say so once, loudly.
    LimitReached,
    /// Past the limit, only count it
    Suppressed,
}

impl Notice {
    /// Level to log this occurrence at, None if it should not be logged
    pub fn level(&self) -> Option<Level> {
        match self {
            Self::Show => Some(Level::Info),
            Self::LimitReached => Some(Level::Warn),
            Self::Suppressed => None,
        }
    }
}

/// Counts a recurring condition and decides how many times it is worth telling someone about.
///
/// A handful of unknown channels is normal (unused slots, test pulsers). Thousands mean the
/// channel map does not match the electronics, and printing each one just buries that fact.
#[derive(Debug, Clone)]
pub struct NoticeLimiter {
    limit: u64,
    count: u64,
}

impl Default for NoticeLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_LIMIT)
    }
}

impl NoticeLimiter {
    /// Show the first `limit` occurrences and warn on the one after. A limit of 0 warns on the first.
    pub fn new(limit: u64) -> Self {
        Self { limit, count: 0 }
    }

    pub fn record(&mut self) -> Notice {
        self.count += 1;
        if self.count <= self.limit {
            Notice::Show
        } else if self.count == self.limit + 1 {
            Notice::LimitReached
        } else {
            Notice::Suppressed
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_reached_once() {
        let mut limiter = NoticeLimiter::new(3);
        let notices: Vec<Notice> = (0..5).map(|_| limiter.record()).collect();
        assert_eq!(
            notices,
            vec![
                Notice::Show,
                Notice::Show,
                Notice::Show,
                Notice::LimitReached,
                Notice::Suppressed
            ]
        );
        assert_eq!(limiter.count(), 5);
    }

    #[test]
    fn test_zero_limit_warns_first() {
        let mut limiter = NoticeLimiter::new(0);
        let notices: Vec<Notice> = (0..3).map(|_| limiter.record()).collect();
        assert_eq!(
            notices,
            vec![Notice::LimitReached, Notice::Suppressed, Notice::Suppressed]
        );
    }

    #[test]
    fn test_notice_levels() {
        // Shown notices must clear the default info filter of the log file
        assert_eq!(Notice::Show.level(), Some(Level::Info));
        assert_eq!(Notice::LimitReached.level(), Some(Level::Warn));
        assert_eq!(Notice::Suppressed.level(), None);
        let default_logger = spdlog::Logger::builder().build().unwrap();
        assert!(default_logger.should_log(Notice::Show.level().unwrap()));
    }
}
