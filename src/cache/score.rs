use chrono::{DateTime, Utc};

/// Weight of one recorded access.
pub const FREQUENCY_WEIGHT: f64 = 10.0;

/// Hours over which one tenth of the recency bonus decays.
pub const RECENCY_DECAY_HOURS: f64 = 24.0;

/// Eviction score: lower scores are evicted first.
///
/// `10·hits` plus a recency bonus that starts at 100 and loses ten points
/// per day, hitting zero after ten days. A fresh single-hit entry scores
/// about 110; once recency has fully decayed only frequency counts, so a
/// file watched three times last week outlives one watched once long ago.
pub fn compute_score(hits: i64, last_access: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let hours_since_access = (now - last_access).num_seconds().max(0) as f64 / 3600.0;
    let recency_bonus = (100.0 - hours_since_access / RECENCY_DECAY_HOURS * 10.0).max(0.0);
    hits as f64 * FREQUENCY_WEIGHT + recency_bonus
}
