//! Aggregate CPU counter reading and utilization sampling
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::constants::{SAMPLE_INTERVAL, STAT_COLUMNS, STAT_LINE_LIMIT};
use crate::error::{HostInfoError, Result};

/// Cumulative ticks since boot from the aggregate "cpu" line of /proc/stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

impl CounterSnapshot {
    /// Build a snapshot from a raw /proc/stat line, skipping the "cpu" label.
    pub fn from_line(line: &str) -> Result<Self> {
        let fields = parse_fields(line, STAT_COLUMNS);
        match fields[..] {
            [user, nice, system, idle, iowait, irq, softirq, steal, guest, guest_nice] => Ok(Self {
                user,
                nice,
                system,
                idle,
                iowait,
                irq,
                softirq,
                steal,
                guest,
                guest_nice,
            }),
            _ => Err(HostInfoError::MalformedCounters {
                expected: STAT_COLUMNS,
                found: fields.len(),
            }),
        }
    }

    /// Ticks spent doing nothing, waiting on I/O included. `None` on overflow.
    #[inline]
    pub fn idle_ticks(&self) -> Option<u64> {
        self.idle.checked_add(self.iowait)
    }

    #[inline]
    pub fn busy_ticks(&self) -> Option<u64> {
        [self.nice, self.system, self.irq, self.softirq, self.steal]
            .into_iter()
            .try_fold(self.user, u64::checked_add)
    }

    /// Guest time is already folded into user/nice by the kernel and is not added again.
    #[inline]
    pub fn total_ticks(&self) -> Option<u64> {
        self.idle_ticks()?.checked_add(self.busy_ticks()?)
    }
}

/// Extract up to `count` unsigned integers from a space separated line.
///
/// A token whose leading digits convert to zero only counts when it starts
/// with the digit '0', so a label such as "cpu" is skipped rather than read
/// as a zero column. Scanning stops once `count` values are collected.
pub fn parse_fields(line: &str, count: usize) -> Vec<u64> {
    line.split(' ').filter_map(parse_token).take(count).collect()
}

/// Value of the token's leading ASCII digits (none means 0), then the zero rule.
///
/// Leading whitespace or a sign is not a digit, so such tokens read as 0 and are skipped.
fn parse_token(token: &str) -> Option<u64> {
    let digits = token
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(token.len());

    let value = if digits == 0 {
        0
    } else {
        token[..digits].parse::<u64>().ok()?
    };

    if value != 0 || token.starts_with('0') {
        Some(value)
    } else {
        None
    }
}

/// Read the first line of the counter source, at most `STAT_LINE_LIMIT` bytes.
pub fn read_first_line(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|source| HostInfoError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mut line = String::new();
    BufReader::new(file.take(STAT_LINE_LIMIT))
        .read_line(&mut line)
        .map_err(|source| HostInfoError::FileClose {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(line)
}

/// Read and parse one snapshot from the counter source.
pub fn read_snapshot(path: &Path) -> Result<CounterSnapshot> {
    CounterSnapshot::from_line(&read_first_line(path)?)
}

/// Percentage of non-idle time between two snapshots.
///
/// Fails with `DivisionUndefined` when the total did not advance and with
/// `CounterOverflow` when a snapshot's columns do not sum within `u64`.
pub fn utilization(before: &CounterSnapshot, after: &CounterSnapshot) -> Result<f64> {
    let ticks = |value: Option<u64>| value.ok_or(HostInfoError::CounterOverflow);

    let total_delta = ticks(after.total_ticks())?
        .checked_sub(ticks(before.total_ticks())?)
        .filter(|&delta| delta > 0)
        .ok_or(HostInfoError::DivisionUndefined)?;

    let idle_delta = ticks(after.idle_ticks())?
        .saturating_sub(ticks(before.idle_ticks())?)
        .min(total_delta);

    Ok((total_delta - idle_delta) as f64 / total_delta as f64 * 100.0)
}

/// Sample CPU utilization over the fixed one second window.
pub fn sample_utilization(stat_path: &Path) -> Result<f64> {
    sample_over(stat_path, SAMPLE_INTERVAL)
}

fn sample_over(stat_path: &Path, interval: Duration) -> Result<f64> {
    let before = read_snapshot(stat_path)?;
    thread::sleep(interval);
    let after = read_snapshot(stat_path)?;

    let usage = utilization(&before, &after)?;
    debug!(usage, "sampled cpu utilization");
    Ok(usage)
}
