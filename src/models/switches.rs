//! Partition of [τ_ini, τ_end] into intervals of constant regime
//!
//! For one (mode, k) every flag is evaluated at both ends of the integration
//! range. The difference of the two states is the number of transitions of
//! that flag; each transition is then located by bisection. Because the flags
//! are monotone in τ, a single bisection per transition is enough.

use log::trace;

use crate::error::{PerturbError, PerturbResult};
use super::approximations::{Approximation, RegimeFlags};

/// Sub-interval of the integration range with a fixed regime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeInterval {
    pub tau_start: f64,
    pub tau_end: f64,
    pub flags: RegimeFlags,
}

/// Number of transitions of every flag between two regimes
///
/// Fails when a flag is lower at the end than at the start.
pub fn count_transitions(
    start: &RegimeFlags,
    end: &RegimeFlags,
) -> PerturbResult<[usize; Approximation::COUNT]> {
    let mut counts = [0usize; Approximation::COUNT];
    for approximation in Approximation::ALL {
        let (from, to) = (start.get(approximation), end.get(approximation));
        if to < from {
            return Err(PerturbError::Approximation(format!(
                "approximation flags declared out of chronological order: {} goes from {} to {}",
                approximation.name(),
                from,
                to
            )));
        }
        counts[approximation.index()] = (to - from) as usize;
    }
    Ok(counts)
}

/// Ordered regime intervals covering `[tau_ini, tau_end]`
///
/// `classify` returns the flags at a given τ. The returned intervals are
/// contiguous, strictly increasing, and there are `1 + Σ transitions` of them.
pub fn find_regime_intervals<F>(
    tau_ini: f64,
    tau_end: f64,
    tolerance: f64,
    mut classify: F,
) -> PerturbResult<Vec<RegimeInterval>>
where
    F: FnMut(f64) -> PerturbResult<RegimeFlags>,
{
    if !(tau_end > tau_ini) {
        return Err(PerturbError::Numerical(format!(
            "empty integration range [{:e}, {:e}]",
            tau_ini, tau_end
        )));
    }

    let flags_ini = classify(tau_ini)?;
    let flags_end = classify(tau_end)?;
    let counts = count_transitions(&flags_ini, &flags_end)?;

    let mut switches: Vec<(f64, Approximation)> = Vec::new();

    for approximation in Approximation::ALL {
        let initial_state = flags_ini.get(approximation);
        for transition in 1..=counts[approximation.index()] {
            let target = initial_state + transition as u8;
            let mut lower = tau_ini;
            let mut upper = tau_end;

            while (upper - lower) / lower > tolerance {
                let mid = 0.5 * (lower + upper);
                // adjacent floats: the tolerance is below f64 resolution
                if mid <= lower || mid >= upper {
                    break;
                }
                if classify(mid)?.get(approximation) >= target {
                    upper = mid;
                } else {
                    lower = mid;
                }
            }

            let tau_switch = 0.5 * (lower + upper);
            trace!(
                "{} switch to state {} at tau = {:.6e}",
                approximation.name(),
                target,
                tau_switch
            );
            switches.push((tau_switch, approximation));
        }
    }

    switches.sort_by(|a, b| a.0.total_cmp(&b.0));

    for pair in switches.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(PerturbError::Approximation(format!(
                "cannot handle simultaneous switches of {} and {} at tau = {:e}",
                pair[0].1.name(),
                pair[1].1.name(),
                pair[0].0
            )));
        }
    }

    let mut intervals = Vec::with_capacity(switches.len() + 1);
    let mut flags = flags_ini;
    let mut start = tau_ini;
    for (tau_switch, approximation) in switches {
        intervals.push(RegimeInterval {
            tau_start: start,
            tau_end: tau_switch,
            flags,
        });
        flags.advance(approximation);
        start = tau_switch;
    }
    intervals.push(RegimeInterval {
        tau_start: start,
        tau_end,
        flags,
    });

    Ok(intervals)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flags switching on at fixed thresholds
    fn threshold_classifier(thresholds: Vec<(Approximation, f64)>) -> impl FnMut(f64) -> PerturbResult<RegimeFlags> {
        move |tau| {
            let mut flags = RegimeFlags::early();
            for (approximation, threshold) in &thresholds {
                if tau > *threshold {
                    flags.set(*approximation, 1);
                }
            }
            Ok(flags)
        }
    }

    #[test]
    fn test_intervals_follow_switches() {
        let classify = threshold_classifier(vec![
            (Approximation::UrFluid, 300.0),
            (Approximation::TightCoupling, 100.0),
        ]);
        let intervals = find_regime_intervals(1.0, 1000.0, 1e-10, classify).unwrap();

        assert_eq!(intervals.len(), 3);
        assert!((intervals[0].tau_end - 100.0).abs() < 1e-6);
        assert!((intervals[1].tau_end - 300.0).abs() < 1e-6);
        assert!(intervals[0].flags.tca_on());
        assert!(!intervals[1].flags.tca_on());
        assert!(!intervals[1].flags.ufa_on());
        assert!(intervals[2].flags.ufa_on());
        assert_eq!(intervals[2].tau_end, 1000.0);
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].tau_end, pair[1].tau_start);
            assert!(pair[1].tau_start > pair[0].tau_start);
        }
    }

    #[test]
    fn test_no_switch_gives_single_interval() {
        let intervals = find_regime_intervals(1.0, 10.0, 1e-10, threshold_classifier(vec![])).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].flags, RegimeFlags::early());
    }

    #[test]
    fn test_reverting_flag_is_rejected() {
        let classify = |tau: f64| -> PerturbResult<RegimeFlags> {
            let mut flags = RegimeFlags::early();
            if tau < 5.0 {
                flags.set(Approximation::RadiationStreaming, 1);
            }
            Ok(flags)
        };
        let error = find_regime_intervals(1.0, 10.0, 1e-10, classify).unwrap_err();
        assert!(error.to_string().contains("out of chronological order"));
    }

    #[test]
    fn test_simultaneous_switches_are_rejected() {
        let classify = threshold_classifier(vec![
            (Approximation::RadiationStreaming, 50.0),
            (Approximation::UrFluid, 50.0),
        ]);
        let error = find_regime_intervals(1.0, 100.0, 1e-10, classify).unwrap_err();
        assert!(matches!(error, PerturbError::Approximation(_)));
        assert!(error.to_string().contains("simultaneous"));
    }

    #[test]
    fn test_count_transitions() {
        let start = RegimeFlags::early();
        let mut end = start;
        end.set(Approximation::NcdmFluid, 1);
        end.set(Approximation::TightCoupling, 1);

        let counts = count_transitions(&start, &end).unwrap();
        assert_eq!(counts.iter().sum::<usize>(), 2);
        assert_eq!(counts[Approximation::NcdmFluid.index()], 1);
        assert!(count_transitions(&end, &start).is_err());
    }

    #[test]
    fn test_tolerance_below_float_resolution_terminates() {
        let classify = threshold_classifier(vec![(Approximation::TightCoupling, 100.0)]);
        let intervals = find_regime_intervals(1.0, 1000.0, 1e-20, classify).unwrap();

        assert_eq!(intervals.len(), 2);
        assert!((intervals[0].tau_end - 100.0).abs() <= 1e-12);
    }
}
