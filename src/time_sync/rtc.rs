use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::time::Instant;

/// Wall clock of the device. Written by the time client, read by everyone
/// who needs a timestamp.
pub trait DeviceClock: Send + Sync {
    fn set_utc(&self, now: DateTime<Utc>);
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Software real-time clock.
///
/// Keeps the last synchronised time together with the monotonic instant it
/// was taken at and extrapolates from there. Until the first sync the host
/// clock is reported.
#[derive(Debug, Default)]
pub struct SoftRtc {
    anchor: Mutex<Option<(DateTime<Utc>, Instant)>>,
}

impl SoftRtc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synchronized(&self) -> bool {
        self.anchor.lock().map(|a| a.is_some()).unwrap_or(false)
    }
}

impl DeviceClock for SoftRtc {
    fn set_utc(&self, now: DateTime<Utc>) {
        if let Ok(mut anchor) = self.anchor.lock() {
            *anchor = Some((now, Instant::now()));
        }
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let anchor = self.anchor.lock().ok().and_then(|a| *a);
        match anchor {
            Some((base, taken_at)) => {
                let elapsed = chrono::Duration::from_std(taken_at.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                base + elapsed
            }
            None => Utc::now(),
        }
    }
}

/// `2024-03-02T14:05:09+00:00`
pub fn format_iso8601(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn iso8601_has_fixed_utc_offset() {
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 14, 5, 9).unwrap();
        assert_eq!(format_iso8601(at), "2024-03-02T14:05:09+00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn soft_rtc_extrapolates_from_last_sync() {
        let rtc = SoftRtc::new();
        assert!(!rtc.is_synchronized());

        let synced = Utc.with_ymd_and_hms(2024, 3, 2, 14, 5, 0).unwrap();
        rtc.set_utc(synced);
        tokio::time::sleep(Duration::from_secs(9)).await;

        assert!(rtc.is_synchronized());
        assert_eq!(format_iso8601(rtc.now_utc()), "2024-03-02T14:05:09+00:00");
    }
}
