use chrono::{FixedOffset, NaiveDate, Offset, Timelike, Utc};
use std::time::Instant;
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Format a large integer with thousands separators.
pub fn fmt_number(n: i64) -> String {
    let s = n.abs().to_string();
    let mut result = String::new();
    for (i, ch) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(ch);
    }
    if n < 0 {
        result.push('-');
    }
    result.chars().rev().collect()
}

// ── Region-local time ─────────────────────────────────────────────────────────

fn region_offset(offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| Utc.fix())
}

/// Civil date in the source region's time zone.
pub fn region_today(offset_minutes: i32) -> NaiveDate {
    Utc::now().with_timezone(&region_offset(offset_minutes)).date_naive()
}

/// Hour of day (0-23) in the source region's time zone.
pub fn region_hour(offset_minutes: i32) -> u32 {
    Utc::now().with_timezone(&region_offset(offset_minutes)).hour()
}

/// Round-robin batch of region codes for this hour.
///
/// `codes` are split into consecutive shards of `shard_size` (clamped to
/// 1..=10); the shard at `hour % shard_count` is returned.
pub fn select_shard(codes: &[String], shard_size: usize, hour: u32) -> Vec<String> {
    if codes.is_empty() {
        return Vec::new();
    }
    let size = shard_size.clamp(1, 10);
    let shard_count = codes.len().div_ceil(size);
    let start = (hour as usize % shard_count) * size;
    codes.iter().skip(start).take(size).cloned().collect()
}
