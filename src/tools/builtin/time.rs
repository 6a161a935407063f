//! Wall-clock tool.

use crate::error::ToolError;
use crate::tools::{ParamMap, Tool, ToolContext, ToolDescriptor};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the host's current UTC time. Needs no permissions.
pub struct TimeTool {
    descriptor: ToolDescriptor,
}

impl TimeTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "time",
                "Return the current wall-clock time of the host as Unix epoch values and UTC text.",
            ),
        }
    }
}

impl Default for TimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TimeTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _params: &ParamMap, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ToolError::ExecutionFailed(format!("clock before Unix epoch: {e}")))?;
        Ok(snapshot(now))
    }
}

fn snapshot(since_epoch: Duration) -> Value {
    let secs = since_epoch.as_secs();
    let days = (secs / 86_400) as i64;
    let seconds_of_day = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    let (hour, minute, second) = (
        seconds_of_day / 3600,
        (seconds_of_day % 3600) / 60,
        seconds_of_day % 60,
    );
    // 1970-01-01 was a Thursday.
    const WEEKDAYS: [&str; 7] = [
        "Thursday", "Friday", "Saturday", "Sunday", "Monday", "Tuesday", "Wednesday",
    ];
    json!({
        "unix_seconds": secs,
        "unix_millis": since_epoch.as_millis() as u64,
        "iso_8601_utc": format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{:03}Z",
            since_epoch.subsec_millis()
        ),
        "date_utc": format!("{year:04}-{month:02}-{day:02}"),
        "time_utc": format!("{hour:02}:{minute:02}:{second:02}"),
        "weekday": WEEKDAYS[days.rem_euclid(7) as usize],
    })
}

/// Proleptic Gregorian date for a day count relative to 1970-01-01
/// (Hinnant's days-to-civil).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_start() {
        let value = snapshot(Duration::from_secs(0));
        assert_eq!(value["iso_8601_utc"], "1970-01-01T00:00:00.000Z");
        assert_eq!(value["weekday"], "Thursday");
    }

    #[test]
    fn known_timestamp() {
        let value = snapshot(Duration::from_millis(1_709_130_123_250));
        assert_eq!(value["date_utc"], "2024-02-28");
        assert_eq!(value["time_utc"], "14:22:03");
        assert_eq!(value["iso_8601_utc"], "2024-02-28T14:22:03.250Z");
        assert_eq!(value["weekday"], "Wednesday");
        assert_eq!(value["unix_seconds"], 1_709_130_123u64);
    }

    #[test]
    fn leap_day() {
        assert_eq!(civil_from_days(19_782), (2024, 2, 29));
    }
}
