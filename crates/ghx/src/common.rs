// ai
//! 📦 Common data structures: the building blocks of ghx.
//!
//! 🎬 COLD OPEN: INT. GH ARCHIVE: THE TOP OF EVERY HOUR
//!
//! Somewhere a cron job gzips sixty minutes of humanity pushing code, opening
//! issues, and starring repos they will never look at again. One file per hour.
//! Forever. This module names those hours (`Bucket`), walks them in order
//! (`BucketRange`), and gives each decoded event a shape (`EventRecord`) small
//! enough to fling across a channel a few hundred thousand times a minute.
//!
//! 🦆 The duck is timezone-naive. The buckets are not. They are UTC. Always.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde_json::value::RawValue;

/// 🎯 One decoded event: the two numbers the store needs plus the untouched payload.
///
/// `payload` is the JSON line as it arrived, kept as a `RawValue` so it is validated once
/// at decode time and written out again without a parse/serialize round trip.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// 🔑 Globally unique. The store's primary key and the partitioning key.
    pub event_id: u64,
    /// 📚 The owning repository.
    pub repo_id: u64,
    /// 🦆 The whole event, uninterpreted.
    pub payload: Box<RawValue>,
}

/// 🚦 What travels through the bounded queue.
///
/// A worker that pulls a `Sentinel` goes home. The orchestrator sends exactly one per
/// worker, so every worker goes home exactly once.
#[derive(Debug)]
pub enum QueueItem {
    Record(EventRecord),
    Sentinel,
}

/// ⏰ One hour of archive: `(year, month, day, hour)`, UTC, ordered chronologically.
///
/// Only valid calendar dates can be built, so February 30th never gets a bucket
/// and never gets a 404 for its trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bucket {
    date: NaiveDate,
    hour: u32,
}

impl Bucket {
    /// 🏗️ `None` for impossible dates or hours past 23.
    pub fn new(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        if hour > 23 {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        Some(Self { date, hour })
    }

    /// 🏷️ `2019-06-01-3`: zero-padded month and day, bare hour. GH Archive's naming, not ours.
    pub fn key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string() + &format!("-{}", self.hour)
    }

    /// 🗜️ The archive object name for this hour.
    pub fn file_name(&self) -> String {
        format!("{}.json.gz", self.key())
    }

    /// ⏱️ The first instant of this hour, UTC.
    pub fn start_time(&self) -> DateTime<Utc> {
        (self.date.and_time(NaiveTime::MIN) + TimeDelta::hours(i64::from(self.hour))).and_utc()
    }

    /// 🔮 An hour that has not started yet has nothing to download.
    pub fn is_in_future(&self, now: DateTime<Utc>) -> bool {
        self.start_time() > now
    }

    /// 🕛 All 24 hours of a day, in order.
    pub fn hours_of(date: NaiveDate) -> impl Iterator<Item = Bucket> {
        (0..24).map(move |hour| Bucket { date, hour })
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// 📅 An inclusive range of days to ingest, walked strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl BucketRange {
    /// 🏗️ `start > end` yields an empty range, not an error. Validation lives in config.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// 🗓️ Every day from start to end, inclusive.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        let mut next = Some(self.start);
        std::iter::from_fn(move || {
            let today = next.filter(|d| *d <= end)?;
            next = today.checked_add_days(Days::new(1));
            Some(today)
        })
    }

    /// ⏰ Every bucket of the range, chronologically.
    #[cfg(test)]
    fn buckets(&self) -> impl Iterator<Item = Bucket> + use<> {
        self.days().flat_map(Bucket::hours_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("💀 test date should exist")
    }

    #[test]
    fn the_one_where_bucket_keys_match_the_archive_naming() {
        let bucket = Bucket::new(2019, 6, 1, 3).expect("💀 valid bucket");
        assert_eq!(bucket.key(), "2019-06-01-3");
        assert_eq!(bucket.file_name(), "2019-06-01-3.json.gz");

        let late = Bucket::new(2019, 12, 31, 23).expect("💀 valid bucket");
        assert_eq!(late.key(), "2019-12-31-23");
    }

    #[test]
    fn the_one_where_february_thirtieth_is_not_a_bucket() {
        assert!(Bucket::new(2019, 2, 30, 0).is_none());
        assert!(Bucket::new(2019, 6, 1, 24).is_none());
        assert!(Bucket::new(2020, 2, 29, 0).is_some(), "leap years are real");
    }

    #[test]
    fn the_one_where_buckets_sort_chronologically() {
        let a = Bucket::new(2019, 6, 1, 23).expect("💀");
        let b = Bucket::new(2019, 6, 2, 0).expect("💀");
        let c = Bucket::new(2019, 6, 2, 10).expect("💀");
        assert!(a < b && b < c);
    }

    #[test]
    fn the_one_where_the_future_is_detected() {
        let bucket = Bucket::new(2019, 6, 1, 3).expect("💀");
        let just_before = bucket.start_time() - TimeDelta::seconds(1);
        let just_after = bucket.start_time() + TimeDelta::seconds(1);
        assert!(bucket.is_in_future(just_before));
        assert!(!bucket.is_in_future(just_after));
        assert!(!bucket.is_in_future(bucket.start_time()));
    }

    #[test]
    fn the_one_where_a_range_walks_every_hour_strictly_forward() {
        let range = BucketRange::new(ymd(2019, 2, 27), ymd(2019, 3, 1));
        let buckets: Vec<Bucket> = range.buckets().collect();
        assert_eq!(buckets.len(), 3 * 24);
        assert!(buckets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(buckets[0].key(), "2019-02-27-0");
        assert_eq!(buckets[24 * 2].key(), "2019-03-01-0");
    }

    #[test]
    fn the_one_where_a_backwards_range_is_just_empty() {
        let range = BucketRange::new(ymd(2019, 3, 2), ymd(2019, 3, 1));
        assert_eq!(range.days().count(), 0);
    }
}
