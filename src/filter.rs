//! Search options shared by regex and semantic search
//!
//! Role and age filtering, result limits and context window sizes.

use crate::transcript::Role;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Result limit used by semantic search when none is given
pub const DEFAULT_SEMANTIC_LIMIT: usize = 10;

/// Format of stored message timestamps
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Which side of the conversation to search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleFilter {
    #[default]
    Both,
    User,
    Assistant,
}

impl RoleFilter {
    /// Check if messages with `role` pass this filter
    pub fn allows(&self, role: Role) -> bool {
        match self {
            Self::Both => true,
            Self::User => role == Role::User,
            Self::Assistant => role == Role::Assistant,
        }
    }
}

/// Search option set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Role filter
    pub role: RoleFilter,
    /// Maximum results to return (0 means no limit for regex search,
    /// the default limit for semantic search)
    pub max_results: usize,
    /// Maximum age in days; 0 keeps only today
    pub max_days: u32,
    /// Context messages before each match
    pub before: usize,
    /// Context messages after each match
    pub after: usize,
    /// Only list matching sessions when rendering
    pub list_only: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            role: RoleFilter::Both,
            max_results: 20,
            max_days: 7,
            before: 0,
            after: 0,
            list_only: false,
        }
    }
}

impl SearchOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set role filter
    pub fn with_role(mut self, role: RoleFilter) -> Self {
        self.role = role;
        self
    }

    /// Set maximum results
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Set maximum age in days
    pub fn with_max_days(mut self, days: u32) -> Self {
        self.max_days = days;
        self
    }

    /// Set context window sizes
    pub fn with_context(mut self, before: usize, after: usize) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    /// Set list-only rendering
    pub fn with_list_only(mut self, list_only: bool) -> Self {
        self.list_only = list_only;
        self
    }

    /// Oldest moment still inside the age window
    pub fn cutoff(&self) -> DateTime<Utc> {
        age_cutoff(self.max_days, Local::now())
    }

    /// Oldest file modification time still inside the age window
    ///
    /// `None` when the window reaches back before the Unix epoch, which
    /// no file can predate.
    pub fn modified_since(&self) -> Option<SystemTime> {
        let cutoff = self.cutoff();
        if cutoff < DateTime::<Utc>::UNIX_EPOCH {
            None
        } else {
            Some(SystemTime::from(cutoff))
        }
    }

    /// Result limit for semantic search
    pub fn semantic_limit(&self) -> usize {
        if self.max_results == 0 {
            DEFAULT_SEMANTIC_LIMIT
        } else {
            self.max_results
        }
    }
}

/// `max_days` before `now`; zero days means the start of today
///
/// A window reaching past the earliest representable date has no cutoff.
pub fn age_cutoff(max_days: u32, now: DateTime<Local>) -> DateTime<Utc> {
    if max_days == 0 {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
            .unwrap_or(now);
        return midnight.with_timezone(&Utc);
    }

    Duration::try_days(i64::from(max_days))
        .and_then(|window| now.checked_sub_signed(window))
        .map(|cutoff| cutoff.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Check a stored timestamp against the cutoff
///
/// Empty or unparseable timestamps always pass.
pub fn is_within_cutoff(timestamp: &str, cutoff: DateTime<Utc>) -> bool {
    match NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) {
        Ok(naive) => Utc.from_utc_datetime(&naive) >= cutoff,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_filter() {
        assert!(RoleFilter::Both.allows(Role::User));
        assert!(RoleFilter::Both.allows(Role::Assistant));
        assert!(RoleFilter::User.allows(Role::User));
        assert!(!RoleFilter::User.allows(Role::Assistant));
        assert!(RoleFilter::Assistant.allows(Role::Assistant));
        assert!(!RoleFilter::Assistant.allows(Role::User));
    }

    #[test]
    fn test_builder() {
        let options = SearchOptions::new()
            .with_role(RoleFilter::User)
            .with_max_results(5)
            .with_max_days(30)
            .with_context(2, 1)
            .with_list_only(true);

        assert_eq!(options.role, RoleFilter::User);
        assert_eq!(options.max_results, 5);
        assert_eq!(options.max_days, 30);
        assert_eq!((options.before, options.after), (2, 1));
        assert!(options.list_only);
    }

    #[test]
    fn test_semantic_limit_default() {
        assert_eq!(SearchOptions::new().with_max_results(0).semantic_limit(), 10);
        assert_eq!(SearchOptions::new().with_max_results(3).semantic_limit(), 3);
    }

    #[test]
    fn test_age_cutoff_days() {
        let now = Local::now();
        let cutoff = age_cutoff(7, now);
        let expected = (now - Duration::days(7)).with_timezone(&Utc);
        assert_eq!(cutoff, expected);
    }

    #[test]
    fn test_age_cutoff_zero_is_start_of_today() {
        let now = Local::now();
        let cutoff = age_cutoff(0, now).with_timezone(&Local);
        assert!(cutoff <= now);
        assert_eq!(cutoff.date_naive(), now.date_naive());
        assert!(now - cutoff < Duration::days(1));
    }

    #[test]
    fn test_huge_age_window_has_no_cutoff() {
        let cutoff = age_cutoff(u32::MAX, Local::now());
        assert_eq!(cutoff, DateTime::<Utc>::MIN_UTC);
        assert!(is_within_cutoff("0001-01-01T00:00:00", cutoff));

        let options = SearchOptions::new().with_max_days(u32::MAX);
        assert_eq!(options.modified_since(), None);
        assert!(SearchOptions::new().with_max_days(7).modified_since().is_some());
    }

    #[test]
    fn test_is_within_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert!(is_within_cutoff("2025-06-02T10:00:00", cutoff));
        assert!(is_within_cutoff("2025-06-01T00:00:00", cutoff));
        assert!(!is_within_cutoff("2025-05-31T23:59:59", cutoff));
        assert!(is_within_cutoff("", cutoff));
        assert!(is_within_cutoff("yesterday-ish", cutoff));
    }
}
