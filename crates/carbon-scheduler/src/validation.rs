//! Input limits shared by every use case.

use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};
use crate::time_axis::FillMode;

pub const MAX_DURATION_SECS: u64 = 24 * 60 * 60;
pub const MAX_LOOKAHEAD_HOURS: u32 = 7 * 24;
pub const MAX_ZONES: usize = 64;
pub const MAX_WAIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn input(msg: impl Into<String>) -> SchedulerError {
    SchedulerError::Input(msg.into())
}

pub fn validate_duration(duration_secs: u64) -> SchedulerResult<()> {
    if duration_secs == 0 {
        return Err(input("duration must be > 0"));
    }
    if duration_secs > MAX_DURATION_SECS {
        return Err(input(format!("duration must be <= {MAX_DURATION_SECS} seconds")));
    }
    Ok(())
}

pub fn validate_lookahead(lookahead_hours: u32) -> SchedulerResult<()> {
    if lookahead_hours == 0 {
        return Err(input("lookahead must be > 0"));
    }
    if lookahead_hours > MAX_LOOKAHEAD_HOURS {
        return Err(input(format!("lookahead must be <= {MAX_LOOKAHEAD_HOURS} hours")));
    }
    Ok(())
}

pub fn validate_duration_within_lookahead(duration_secs: u64, lookahead_hours: u32) -> SchedulerResult<()> {
    let window = u64::from(lookahead_hours) * 3600;
    if duration_secs > window {
        return Err(input(format!(
            "duration {duration_secs}s exceeds lookahead window {window}s"
        )));
    }
    Ok(())
}

/// Duration, lookahead and their combination.
pub fn validate_window(duration_secs: u64, lookahead_hours: u32) -> SchedulerResult<()> {
    validate_duration(duration_secs)?;
    validate_lookahead(lookahead_hours)?;
    validate_duration_within_lookahead(duration_secs, lookahead_hours)
}

pub fn validate_zone(zone: &str) -> SchedulerResult<()> {
    if zone.trim().is_empty() {
        return Err(input("zone must not be empty"));
    }
    Ok(())
}

pub fn validate_zones(zones: &[String]) -> SchedulerResult<()> {
    if zones.is_empty() {
        return Err(input("zones is required"));
    }
    if zones.len() > MAX_ZONES {
        return Err(input(format!("zones count must be <= {MAX_ZONES}")));
    }
    zones.iter().try_for_each(|z| validate_zone(z))
}

pub fn validate_max_wait(max_wait: Duration) -> SchedulerResult<()> {
    if max_wait.is_zero() {
        return Err(input("max-wait must be > 0"));
    }
    if max_wait > MAX_WAIT {
        return Err(input("max-wait must be <= 168h"));
    }
    Ok(())
}

pub fn validate_wait_cost(wait_cost: f64) -> SchedulerResult<()> {
    if wait_cost.is_nan() || wait_cost < 0.0 {
        return Err(input("wait-cost must be >= 0"));
    }
    Ok(())
}

pub fn validate_no_regret(min_reduction_pct: f64) -> SchedulerResult<()> {
    if min_reduction_pct.is_nan() || min_reduction_pct < 0.0 {
        return Err(input("min-reduction-for-wait must be >= 0"));
    }
    Ok(())
}

/// Parse a resample fill mode; blank means forward.
pub fn parse_fill_mode(raw: &str) -> SchedulerResult<FillMode> {
    raw.parse()
        .map_err(|_| input("resample-fill must be one of forward|strict"))
}

pub fn validate_threshold(name: &str, value: f64) -> SchedulerResult<()> {
    if value.is_nan() || value <= 0.0 {
        return Err(input(format!("{name} must be > 0")));
    }
    Ok(())
}
