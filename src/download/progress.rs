// SeriesRelay - catalog mirroring and scheduled republishing
// Copyright (C) 2025 SeriesRelay contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Transfer progress and store write throttling
//!
//! Observers see every chunk; the store only sees a write when the
//! throttle interval has elapsed since the previous write.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Byte counters of a single transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub downloaded_bytes: u64,
    /// 0 when the source did not announce a length
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn new(downloaded_bytes: u64, total_bytes: u64) -> Self {
        Self {
            downloaded_bytes,
            total_bytes,
        }
    }

    /// Account for a written chunk
    pub fn advance(&mut self, chunk_len: usize) {
        self.downloaded_bytes += chunk_len as u64;
        if self.total_bytes > 0 && self.downloaded_bytes > self.total_bytes {
            self.total_bytes = self.downloaded_bytes;
        }
    }

    /// Percentage rounded to two decimals, 0 when the total is unknown
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let raw = (self.downloaded_bytes as f64 / self.total_bytes as f64) * 100.0;
        (raw.min(100.0) * 100.0).round() / 100.0
    }
}

/// Rate limiter for progress writes to the store
#[derive(Debug)]
pub struct WriteThrottle {
    interval: Duration,
    last_write: Option<Instant>,
}

impl WriteThrottle {
    /// Throttle whose first write is allowed immediately
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
        }
    }

    /// Throttle that counts a write as having just happened
    pub fn starting_now(interval: Duration) -> Self {
        Self {
            interval,
            last_write: Some(Instant::now()),
        }
    }

    /// True when a write is due; records the write
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last_write {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_write = Some(now);
                true
            }
        }
    }
}

/// Format bytes as a human-readable string
pub fn bytes_string(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        let mut progress = TransferProgress::new(0, 3);
        progress.advance(1);
        assert_eq!(progress.percentage(), 33.33);
        progress.advance(2);
        assert_eq!(progress.percentage(), 100.0);

        assert_eq!(TransferProgress::new(10, 0).percentage(), 0.0);
    }

    #[test]
    fn test_bytes_string() {
        assert_eq!(bytes_string(512), "512 B");
        assert_eq!(bytes_string(1536), "1.50 KB");
        assert_eq!(bytes_string(5 * 1024 * 1024), "5.00 MB");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_interval() {
        let mut throttle = WriteThrottle::starting_now(Duration::from_secs(2));
        assert!(!throttle.ready());

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(!throttle.ready());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_first_write_immediate() {
        let mut throttle = WriteThrottle::new(Duration::from_secs(5));
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }
}
