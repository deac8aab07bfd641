//! Regime flags and the classifier that sets them
//!
//! Every flag is an ordinal state: 0 is the early-time state, 1 the late-time
//! state. For fixed k each flag can only grow with τ, which is what lets the
//! switch finder locate transitions by bisection.
//!
//! | Flag | 0 | 1 |
//! |---|---|---|
//! | tight coupling | on | off |
//! | radiation streaming | off | on |
//! | ur fluid | off | on |
//! | ncdm fluid | off | on |
//! | idm–dr tight coupling | on | off |
//! | idr streaming | off | on |

use std::fmt;

use crate::config::{NcdmFluidMethod, Precision, RsaMethod, TcaMethod, UfaMethod};
use crate::physics::{BackgroundRecord, RecombinationSummary, SpeciesContent, ThermoRecord};
use super::indices::Mode;

/// Approximation schemes that can change the state layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Approximation {
    TightCoupling,
    RadiationStreaming,
    UrFluid,
    NcdmFluid,
    IdmDrTightCoupling,
    IdrStreaming,
}

impl Approximation {
    pub const COUNT: usize = 6;

    pub const ALL: [Approximation; Approximation::COUNT] = [
        Approximation::TightCoupling,
        Approximation::RadiationStreaming,
        Approximation::UrFluid,
        Approximation::NcdmFluid,
        Approximation::IdmDrTightCoupling,
        Approximation::IdrStreaming,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Approximation::TightCoupling => "tight coupling",
            Approximation::RadiationStreaming => "radiation streaming",
            Approximation::UrFluid => "ur fluid",
            Approximation::NcdmFluid => "ncdm fluid",
            Approximation::IdmDrTightCoupling => "idm-dr tight coupling",
            Approximation::IdrStreaming => "idr streaming",
        }
    }
}

/// Ordinal state of every approximation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegimeFlags([u8; Approximation::COUNT]);

impl RegimeFlags {
    /// All flags in their early-time state
    pub fn early() -> Self {
        Self([0; Approximation::COUNT])
    }

    #[inline]
    pub fn get(&self, approximation: Approximation) -> u8 {
        self.0[approximation.index()]
    }

    #[inline]
    pub fn set(&mut self, approximation: Approximation, state: u8) {
        self.0[approximation.index()] = state;
    }

    /// Advance one flag to its next state
    pub fn advance(&mut self, approximation: Approximation) {
        self.0[approximation.index()] += 1;
    }

    #[inline]
    pub fn tca_on(&self) -> bool {
        self.get(Approximation::TightCoupling) == 0
    }

    #[inline]
    pub fn rsa_on(&self) -> bool {
        self.get(Approximation::RadiationStreaming) == 1
    }

    #[inline]
    pub fn ufa_on(&self) -> bool {
        self.get(Approximation::UrFluid) == 1
    }

    #[inline]
    pub fn ncdmfa_on(&self) -> bool {
        self.get(Approximation::NcdmFluid) == 1
    }

    #[inline]
    pub fn idm_dr_tca_on(&self) -> bool {
        self.get(Approximation::IdmDrTightCoupling) == 0
    }

    #[inline]
    pub fn idr_rsa_on(&self) -> bool {
        self.get(Approximation::IdrStreaming) == 1
    }

    /// Approximations whose state differs between `self` and `other`
    pub fn changed(&self, other: &RegimeFlags) -> Vec<Approximation> {
        Approximation::ALL
            .into_iter()
            .filter(|a| self.get(*a) != other.get(*a))
            .collect()
    }
}

impl fmt::Display for RegimeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tca={} rsa={} ufa={} ncdmfa={} idm_tca={} idr_rsa={}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Evaluates the regime flags of one mode from background/thermodynamics ratios
#[derive(Debug, Clone)]
pub struct RegimeClassifier<'a> {
    mode: Mode,
    precision: &'a Precision,
    content: &'a SpeciesContent,
    summary: RecombinationSummary,
}

impl<'a> RegimeClassifier<'a> {
    pub fn new(
        mode: Mode,
        precision: &'a Precision,
        content: &'a SpeciesContent,
        summary: RecombinationSummary,
    ) -> Self {
        Self {
            mode,
            precision,
            content,
            summary,
        }
    }

    /// Regime at (k, τ) given the background and thermodynamics there
    pub fn classify(&self, k: f64, tau: f64, background: &BackgroundRecord, thermo: &ThermoRecord) -> RegimeFlags {
        let precision = self.precision;
        let mut flags = RegimeFlags::early();

        let tau_h = 1.0 / background.a_prime_over_a();
        let tau_k = 1.0 / k;

        // tight coupling
        let tca_allowed = precision.tight_coupling_approximation != TcaMethod::None
            && thermo.dkappa > 0.0
            && tau <= self.summary.tau_rec;
        let tca_on = tca_allowed && {
            let tau_c = 1.0 / thermo.dkappa;
            tau_c / tau_h < precision.tight_coupling_trigger_tau_c_over_tau_h
                && tau_c / tau_k < precision.tight_coupling_trigger_tau_c_over_tau_k
        };
        flags.set(Approximation::TightCoupling, if tca_on { 0 } else { 1 });

        // radiation streaming
        let rsa_on = precision.radiation_streaming_approximation != RsaMethod::None
            && tau / tau_k > precision.radiation_streaming_trigger_tau_over_tau_k
            && tau > self.summary.tau_free_streaming;
        flags.set(Approximation::RadiationStreaming, rsa_on as u8);

        if self.mode != Mode::Scalar {
            // vector and tensor hierarchies only carry the photon switches
            flags.set(Approximation::IdmDrTightCoupling, 1);
            return flags;
        }

        let ufa_on = self.content.has_ur
            && precision.ur_fluid_approximation != UfaMethod::None
            && tau / tau_k > precision.ur_fluid_trigger_tau_over_tau_k;
        flags.set(Approximation::UrFluid, ufa_on as u8);

        let ncdmfa_on = self.content.n_ncdm > 0
            && precision.ncdm_fluid_approximation != NcdmFluidMethod::None
            && tau / tau_k > precision.ncdm_fluid_trigger_tau_over_tau_k;
        flags.set(Approximation::NcdmFluid, ncdmfa_on as u8);

        let idm_tca_on = self.content.has_idm_dr
            && precision.idr_approximations
            && thermo.dmu_idm_dr > 0.0
            && {
                let tau_c = 1.0 / thermo.dmu_idm_dr;
                tau_c / tau_h < precision.idm_dr_tight_coupling_trigger_tau_c_over_tau_h
                    && tau_c / tau_k < precision.idm_dr_tight_coupling_trigger_tau_c_over_tau_k
            };
        flags.set(Approximation::IdmDrTightCoupling, if idm_tca_on { 0 } else { 1 });

        let idr_rsa_on = self.content.has_idr
            && precision.idr_approximations
            && tau / tau_k > precision.idr_streaming_trigger_tau_over_tau_k
            && tau > self.summary.tau_idr_free_streaming;
        flags.set(Approximation::IdrStreaming, idr_rsa_on as u8);

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{Background, InterpolationCursor, Thermodynamics, ToyCosmology};

    fn classify_at(cosmology: &ToyCosmology, precision: &Precision, k: f64, tau: f64) -> RegimeFlags {
        let mut record = BackgroundRecord::default();
        let mut thermo = ThermoRecord::default();
        let mut cursor = InterpolationCursor::new();
        cosmology.background_at(tau, &mut cursor, &mut record).unwrap();
        let mut th_cursor = InterpolationCursor::new();
        cosmology
            .thermodynamics_at(record.z().max(0.0), &mut th_cursor, &mut thermo)
            .unwrap();
        RegimeClassifier::new(Mode::Scalar, precision, cosmology.content(), *cosmology.summary())
            .classify(k, tau, &record, &thermo)
    }

    #[test]
    fn test_early_and_late_regimes() {
        let cosmology = ToyCosmology::new().unwrap();
        let precision = Precision::default();
        let k = 0.1;

        let early = classify_at(&cosmology, &precision, k, 1.0);
        assert!(early.tca_on());
        assert!(!early.rsa_on());
        assert!(!early.ufa_on());

        let late = classify_at(&cosmology, &precision, k, cosmology.content().conformal_age);
        assert!(!late.tca_on());
        assert!(late.rsa_on());
        assert!(late.ufa_on());
    }

    #[test]
    fn test_flags_never_revert() {
        let cosmology = ToyCosmology::new().unwrap();
        let precision = Precision::default();
        let tau0 = cosmology.content().conformal_age;

        for &k in &[1e-4, 1e-2, 0.3] {
            let mut previous = RegimeFlags::early();
            for i in 0..400 {
                let tau = 0.5 * (tau0 / 0.5).powf(i as f64 / 399.0);
                let flags = classify_at(&cosmology, &precision, k, tau.min(tau0));
                for approximation in Approximation::ALL {
                    assert!(
                        flags.get(approximation) >= previous.get(approximation),
                        "{} reverted at k = {}, tau = {}",
                        approximation.name(),
                        k,
                        tau
                    );
                }
                previous = flags;
            }
        }
    }

    #[test]
    fn test_disabled_schemes_stay_constant() {
        let cosmology = ToyCosmology::new().unwrap();
        let precision = Precision::default()
            .with_tca(TcaMethod::None)
            .with_rsa(RsaMethod::None)
            .with_ufa(UfaMethod::None);

        let late = classify_at(&cosmology, &precision, 0.2, cosmology.content().conformal_age);
        let early = classify_at(&cosmology, &precision, 0.2, 1.0);
        assert_eq!(early, late);
        assert!(!early.tca_on());
    }

    #[test]
    fn test_changed_lists_differences() {
        let mut a = RegimeFlags::early();
        let b = a;
        a.advance(Approximation::UrFluid);
        assert_eq!(a.changed(&b), vec![Approximation::UrFluid]);
        assert_eq!(a.to_string(), "tca=0 rsa=0 ufa=1 ncdmfa=0 idm_tca=0 idr_rsa=0");
    }
}
