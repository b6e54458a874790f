//! Energy and emission model.
//!
//! `power = idle + (peak - idle) * load`, IT energy in kWh from the
//! duration, total energy scaled by PUE, emission = energy * CI. Every
//! estimation path in the workspace goes through [`estimate_energy`] so
//! the single-zone and joint optimizers agree bit for bit.

use crate::types::{ModelContext, Segment};

/// Idle and peak power draw of a runner class, in watts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerProfile {
    pub idle_watts: f64,
    pub peak_watts: f64,
}

impl PowerProfile {
    pub fn power_watts(&self, load: f64) -> f64 {
        self.idle_watts + (self.peak_watts - self.idle_watts) * load
    }
}

const UBUNTU: PowerProfile = PowerProfile {
    idle_watts: 110.0,
    peak_watts: 220.0,
};
const WINDOWS: PowerProfile = PowerProfile {
    idle_watts: 150.0,
    peak_watts: 300.0,
};
const MACOS: PowerProfile = PowerProfile {
    idle_watts: 100.0,
    peak_watts: 200.0,
};

/// Look up a runner profile; unknown keys use the ubuntu profile.
pub fn runner_profile(runner: &str) -> PowerProfile {
    match runner.trim().to_ascii_lowercase().as_str() {
        "windows" => WINDOWS,
        "macos" => MACOS,
        _ => UBUNTU,
    }
}

/// Static carbon intensity per coarse region, kgCO2/kWh. Unknown → global.
pub fn region_ci(region: &str) -> f64 {
    match region.trim().to_ascii_lowercase().as_str() {
        "china" => 0.58,
        "us" => 0.38,
        "eu" => 0.28,
        _ => 0.4,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyEstimate {
    pub it_kwh: f64,
    pub total_kwh: f64,
}

impl EnergyEstimate {
    pub fn emission_kg(&self, ci: f64) -> f64 {
        self.total_kwh * ci
    }
}

pub fn estimate_energy(duration_secs: u64, model: &ModelContext) -> EnergyEstimate {
    let power = runner_profile(&model.runner).power_watts(model.load);
    let it_kwh = duration_secs as f64 * power / 1000.0 / 3600.0;
    EnergyEstimate {
        it_kwh,
        total_kwh: it_kwh * model.pue,
    }
}

/// Sum of per-segment emissions in kg.
pub fn estimate_emissions_with_segments(segments: &[Segment], model: &ModelContext) -> f64 {
    segments
        .iter()
        .map(|seg| estimate_energy(seg.duration_secs, model).emission_kg(seg.ci))
        .sum()
}

pub fn estimate_emissions_for_region(
    duration_secs: u64,
    region: &str,
    model: &ModelContext,
) -> f64 {
    estimate_energy(duration_secs, model).emission_kg(region_ci(region))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(load: f64, pue: f64) -> ModelContext {
        ModelContext::new("ubuntu", load, pue)
    }

    #[test]
    fn power_interpolates_between_idle_and_peak() {
        assert_eq!(UBUNTU.power_watts(0.0), 110.0);
        assert_eq!(UBUNTU.power_watts(1.0), 220.0);
        assert!((UBUNTU.power_watts(0.5) - 165.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_runner_uses_ubuntu() {
        assert_eq!(runner_profile("solaris"), UBUNTU);
        assert_eq!(runner_profile("Windows"), WINDOWS);
        assert_eq!(runner_profile("macos"), MACOS);
    }

    #[test]
    fn one_hour_energy() {
        // 176 W for one hour = 0.176 kWh IT, 0.2112 kWh with PUE 1.2.
        let energy = estimate_energy(3600, &model(0.6, 1.2));
        assert!((energy.it_kwh - 0.176).abs() < 1e-12);
        assert!((energy.total_kwh - 0.2112).abs() < 1e-12);
        assert!((energy.emission_kg(0.5) - 0.1056).abs() < 1e-12);
    }

    #[test]
    fn segments_sum_their_emissions() {
        let m = model(0.5, 1.2);
        let segments = [
            Segment { duration_secs: 3600, ci: 0.4 },
            Segment { duration_secs: 1800, ci: 0.8 },
        ];
        // 165 W: 0.165 kWh * 1.2 * 0.4 + 0.0825 kWh * 1.2 * 0.8
        let expected = 0.165 * 1.2 * 0.4 + 0.0825 * 1.2 * 0.8;
        assert!((estimate_emissions_with_segments(&segments, &m) - expected).abs() < 1e-12);
    }

    #[test]
    fn region_table() {
        assert_eq!(region_ci("EU"), 0.28);
        assert_eq!(region_ci("atlantis"), 0.4);
        let m = model(0.6, 1.2);
        assert!((estimate_emissions_for_region(3600, "china", &m) - 0.2112 * 0.58).abs() < 1e-12);
    }
}
