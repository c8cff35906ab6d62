//! Daily publishing schedule.
//!
//! The publishing window is split into `posts_per_day` equal sub-intervals
//! and one run time is drawn uniformly inside each of them. The slots are
//! drawn once at startup and reused every day.
//!
//! # Example
//!
//! With 3 posts between 09:00 and 21:00 the window has 720 minutes, so each
//! sub-interval is 240 minutes long:
//!
//! ```text
//! 09:00 ──── 13:00 ──── 17:00 ──── 21:00
//!    ^ 10:17     ^ 14:52    ^ 17:03
//! ```
//!
//! Runs execute inline in the loop of [`run_forever`], so a run that is still
//! delivering delays the next slot instead of overlapping with it.

use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use rand::Rng;
use std::future::Future;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::pipeline::RunOutcome;

/// Draw one run time per sub-interval of the window `[start_hour, end_hour)`.
///
/// # Arguments
///
/// * `posts_per_day` - Number of sub-intervals; `0` schedules nothing
/// * `start_hour` - First hour of the window
/// * `end_hour` - End of the window (exclusive, at most 24)
/// * `rng` - Source of the jitter
///
/// # Returns
///
/// The run times in ascending order, all within the window.
pub fn schedule_runs<R: Rng + ?Sized>(
    posts_per_day: u32,
    start_hour: u32,
    end_hour: u32,
    rng: &mut R,
) -> Vec<NaiveTime> {
    if posts_per_day == 0 || end_hour <= start_hour {
        return Vec::new();
    }
    let window = (end_hour.min(24) - start_hour) * 60;
    let interval = window / posts_per_day;
    if interval == 0 {
        return Vec::new();
    }

    (0..posts_per_day)
        .filter_map(|i| {
            let offset = rng.random_range(0..interval);
            let minute = start_hour * 60 + i * interval + offset;
            NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
        })
        .collect()
}

/// The first slot strictly after `now`, today or on a following day.
///
/// A slot that does not exist on a given day (skipped by a DST transition)
/// is ignored for that day. An ambiguous slot fires at its earlier instant.
pub fn next_fire(now: DateTime<Tz>, slots: &[NaiveTime]) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let today = now.date_naive();

    (0..=2)
        .filter_map(|d| today.checked_add_days(Days::new(d)))
        .flat_map(|date| {
            slots
                .iter()
                .filter_map(move |t| tz.from_local_datetime(&date.and_time(*t)).earliest())
        })
        .filter(|fire| *fire > now)
        .min()
}

/// Sleep until each slot and perform a run, forever.
///
/// Returns only when there are no slots at all.
pub async fn run_forever<F, Fut>(tz: Tz, slots: &[NaiveTime], mut run: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RunOutcome>,
{
    loop {
        let now = Utc::now().with_timezone(&tz);
        let Some(next) = next_fire(now, slots) else {
            warn!("No run slots scheduled; scheduler stopping");
            return;
        };

        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next, wait_secs = wait.as_secs(), "Waiting for next run slot");
        sleep(wait).await;

        let outcome = run().await;
        info!(?outcome, slot = %next.time(), "Scheduled run finished");
    }
}
