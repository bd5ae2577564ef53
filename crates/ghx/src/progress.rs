// AI
//! 📊 progress.rs: "Are we there yet?" Every bucket, every hour, forever.
//!
//! 🚀 One `ProgressMetrics` per bucket. It counts decompressed bytes through the decoder
//! and records onto the queue, and paints a comfy-table under an indicatif bar. When the
//! bucket is done, [`gb_per_minute`] boils the whole thing down to the one number the log
//! line cares about.
//!
//! ⚠️  Watching this progress bar will not make it go faster. Science says no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

// 🐢 redrawing a table per record would cost more than inserting the record
const RENDER_EVERY: Duration = Duration::from_millis(250);
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Bytes in a unit that suits the bucket: a 600 MiB hour reads in MiB, a test blob in bytes.
fn format_bytes(bytes: u64, total_size: u64) -> String {
    let bytes_f = bytes as f64;
    match total_size as f64 {
        t if t >= 512.0 * MIB => format!("{:.2} MiB", bytes_f / MIB),
        t if t >= MIB => format!("{:.2} KiB", bytes_f / KIB),
        _ => format!("{bytes} bytes"),
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let head = digits.len() % 3;
    let mut groups: Vec<&str> = Vec::new();
    if head > 0 {
        groups.push(&digits[..head]);
    }
    groups.extend(
        digits.as_bytes()[head..]
            .chunks(3)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok()),
    );
    groups.join(",")
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h == 0 {
        format!("{m:02}:{s:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    }
}

/// 🏎️ Uncompressed GiB per minute. Zero elapsed time reports zero, not infinity.
pub(crate) fn gb_per_minute(bytes: u64, elapsed: Duration) -> f64 {
    let minutes = elapsed.as_secs_f64() / 60.0;
    if minutes <= 0.0 {
        return 0.0;
    }
    (bytes as f64 / GIB) / minutes
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    bytes: u64,
    docs: u64,
}

/// 🪟 Recent samples, oldest first. Rates are "newest minus oldest, over the time between".
#[derive(Debug)]
struct RateWindow {
    samples: VecDeque<Sample>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Rates {
    docs_per_sec: f64,
    bytes_per_sec: f64,
}

impl RateWindow {
    fn starting_at(at: Instant) -> Self {
        Self {
            samples: VecDeque::from([Sample { at, bytes: 0, docs: 0 }]),
        }
    }

    fn record(&mut self, sample: Sample) -> Rates {
        while self
            .samples
            .front()
            .is_some_and(|old| sample.at.duration_since(old.at) > RATE_WINDOW)
        {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        let Some(oldest) = self.samples.front() else {
            return Rates::default();
        };
        let span = sample.at.duration_since(oldest.at).as_secs_f64();
        if span <= 0.0 {
            return Rates::default();
        }
        Rates {
            docs_per_sec: sample.docs.saturating_sub(oldest.docs) as f64 / span,
            bytes_per_sec: sample.bytes.saturating_sub(oldest.bytes) as f64 / span,
        }
    }
}

/// 📊 Bytes and records through one bucket.
pub(crate) struct ProgressMetrics {
    bucket_key: String,
    total_size: u64,
    total_bytes: u64,
    total_docs: u64,
    bar: ProgressBar,
    window: RateWindow,
    started: Instant,
    last_render: Option<Instant>,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("bucket_key", &self.bucket_key)
            .field("total_size", &self.total_size)
            .field("total_bytes", &self.total_bytes)
            .field("total_docs", &self.total_docs)
            .finish_non_exhaustive()
    }
}

impl ProgressMetrics {
    /// 🚀 `total_size` is the decompressed size of the bucket. `visible = false` keeps the
    /// numbers but never touches the terminal.
    pub(crate) fn new(bucket_key: String, total_size: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(total_size)
        } else {
            ProgressBar::hidden()
        };
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.green/white}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style.progress_chars("#>."));

        let started = Instant::now();
        Self {
            bucket_key,
            total_size,
            total_bytes: 0,
            total_docs: 0,
            bar,
            window: RateWindow::starting_at(started),
            started,
            last_render: None,
        }
    }

    /// 🔄 Record that `bytes` more input were consumed and `docs` more records enqueued.
    pub(crate) fn update(&mut self, bytes: u64, docs: u64) {
        self.total_bytes += bytes;
        self.total_docs += docs;
        if self.bar.is_hidden() {
            return;
        }

        let now = Instant::now();
        if self.last_render.is_some_and(|at| now.duration_since(at) < RENDER_EVERY) {
            return;
        }
        let rates = self.window.record(Sample {
            at: now,
            bytes: self.total_bytes,
            docs: self.total_docs,
        });
        self.bar.set_message(self.render(rates));
        self.bar.set_position(self.total_bytes);
        self.last_render = Some(now);
    }

    pub(crate) fn total_docs(&self) -> u64 {
        self.total_docs
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// ✅ Clear the bar. The log line takes it from here.
    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn fraction_done(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        self.total_bytes as f64 / self.total_size as f64
    }

    /// ⏳ Straight-line estimate from the fraction done so far.
    fn eta(&self) -> Option<Duration> {
        let done = self.fraction_done();
        if done <= 0.0 {
            return None;
        }
        let spent = self.elapsed().as_secs_f64();
        let left = spent / done - spent;
        (left > 0.0).then(|| Duration::from_secs_f64(left))
    }

    /// 🎨 Bucket name on top, then two right-aligned columns, no borders:
    /// ```text
    /// bucket: 2019-06-01-3
    ///   <docs/s>     <total docs>
    ///   <MiB/s>      <bytes done / bytes total>
    ///   <elapsed>    <eta>
    /// | [#####>..........]
    /// ```
    fn render(&self, rates: Rates) -> String {
        let cells = |left: String, right: String| {
            [left, right].map(|text| Cell::new(text).set_alignment(CellAlignment::Right))
        };
        let eta = self
            .eta()
            .map_or_else(|| "--:--".to_string(), format_duration);

        let mut table = Table::new();
        table
            .load_preset(NOTHING)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .add_row(cells(
                format!("{} docs/s", format_number(rates.docs_per_sec as u64)),
                format!("{} docs", format_number(self.total_docs)),
            ))
            .add_row(cells(
                format!("{:.2} MiB/s", rates.bytes_per_sec / MIB),
                format!(
                    "{} / {} ({:.1}%)",
                    format_bytes(self.total_bytes, self.total_size),
                    format_bytes(self.total_size, self.total_size),
                    self.fraction_done() * 100.0
                ),
            ))
            .add_row(cells(
                format!("{} elapsed", format_duration(self.elapsed())),
                format!("{eta} left"),
            ));
        format!("bucket: {}\n{table}", self.bucket_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_numbers_get_their_commas() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(12_345), "12,345");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn the_one_where_durations_grow_an_hour_column_only_when_needed() {
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
    }

    #[test]
    fn the_one_where_bytes_scale_with_the_total() {
        let mib = 1024 * 1024;
        assert_eq!(format_bytes(512, 1_000), "512 bytes");
        assert_eq!(format_bytes(2_048, 2 * mib), "2.00 KiB");
        assert_eq!(format_bytes(mib, 600 * mib), "1.00 MiB");
    }

    #[test]
    fn the_one_where_a_gib_in_a_minute_is_one() {
        let one_gib = 1024 * 1024 * 1024;
        assert!((gb_per_minute(one_gib, Duration::from_secs(60)) - 1.0).abs() < 1e-9);
        assert!((gb_per_minute(one_gib, Duration::from_secs(30)) - 2.0).abs() < 1e-9);
        assert_eq!(gb_per_minute(one_gib, Duration::ZERO), 0.0);
    }

    #[test]
    fn the_one_where_the_rate_window_forgets_old_samples() {
        let t0 = Instant::now();
        let mut window = RateWindow::starting_at(t0);
        let rates = window.record(Sample {
            at: t0 + Duration::from_secs(2),
            bytes: 2_000,
            docs: 20,
        });
        assert!((rates.docs_per_sec - 10.0).abs() < 1e-9);
        assert!((rates.bytes_per_sec - 1_000.0).abs() < 1e-9);

        let rates = window.record(Sample {
            at: t0 + Duration::from_secs(8),
            bytes: 8_000,
            docs: 80,
        });
        assert_eq!(window.samples.len(), 1, "both older samples fell out of the 5s window");
        assert_eq!(rates.docs_per_sec, 0.0);
    }

    #[test]
    fn the_one_where_a_hidden_bar_still_counts() {
        let mut metrics = ProgressMetrics::new("2019-06-01-3".into(), 100, false);
        metrics.update(40, 2);
        metrics.update(60, 3);
        assert_eq!(metrics.total_bytes(), 100);
        assert_eq!(metrics.total_docs(), 5);
        assert!((metrics.fraction_done() - 1.0).abs() < 1e-9);
        metrics.finish();
    }
}
