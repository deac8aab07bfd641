//! Momentum quadrature of non-cold species
//!
//! Each species is sampled on a set of comoving momenta `q` (in units of its
//! present temperature) with weights that already contain the background
//! distribution f₀(q). Background integrals then read
//!
//! ```text
//! ρ  = factor / a⁴ · Σ q² ε w
//! p  = factor / (3a⁴) · Σ q⁴ / ε w
//! p* = factor / (3a⁴) · Σ q⁶ / ε³ w        (pseudo-pressure)
//! ```
//!
//! with ε = sqrt(q² + a²M²). A rescaling hook lets decaying species change
//! their overall normalization with time.

use crate::error::{PerturbError, PerturbResult};

/// Momentum grid of one species
#[derive(Debug, Clone)]
pub struct QuadratureSpecies {
    pub label: String,
    /// Mass in units of the species temperature today
    pub mass: f64,
    pub q: Vec<f64>,
    pub w: Vec<f64>,
    /// d ln f₀ / d ln q at each node
    pub dlnf0_dlnq: Vec<f64>,
    /// Normalization turning the sums into densities (Mpc^-2)
    pub factor: f64,
}

impl QuadratureSpecies {
    /// Fermi-Dirac species sampled with the midpoint rule on `[0, q_max]`
    pub fn fermi_dirac(label: &str, mass: f64, size: usize, q_max: f64) -> PerturbResult<Self> {
        if size == 0 || !(q_max > 0.0) {
            return Err(PerturbError::Configuration(format!(
                "momentum grid of '{}' needs at least one node and q_max > 0",
                label
            )));
        }

        let dq = q_max / size as f64;
        let mut q = Vec::with_capacity(size);
        let mut w = Vec::with_capacity(size);
        let mut dlnf0 = Vec::with_capacity(size);

        for i in 0..size {
            let qi = (i as f64 + 0.5) * dq;
            q.push(qi);
            w.push(dq / (qi.exp() + 1.0));
            dlnf0.push(-qi / (1.0 + (-qi).exp()));
        }

        Ok(Self {
            label: label.to_string(),
            mass,
            q,
            w,
            dlnf0_dlnq: dlnf0,
            factor: 1.0,
        })
    }

    /// Choose `factor` so that ρ(a = 1) equals `rho_today`
    pub fn normalized_to(mut self, rho_today: f64) -> Self {
        let raw: f64 = (0..self.size())
            .map(|i| self.q[i] * self.q[i] * self.epsilon(i, 1.0) * self.w[i])
            .sum();
        if raw > 0.0 {
            self.factor = rho_today / raw;
        }
        self
    }

    /// Number of momentum nodes
    pub fn size(&self) -> usize {
        self.q.len()
    }

    /// ε = sqrt(q² + a²M²) at node `i`
    #[inline]
    pub fn epsilon(&self, i: usize, a: f64) -> f64 {
        let am = a * self.mass;
        (self.q[i] * self.q[i] + am * am).sqrt()
    }

    /// (ρ, p, pseudo-pressure) at scale factor `a`
    pub fn integrals(&self, a: f64) -> (f64, f64, f64) {
        let mut rho = 0.0;
        let mut p = 0.0;
        let mut pseudo_p = 0.0;

        for i in 0..self.size() {
            let q2 = self.q[i] * self.q[i];
            let eps = self.epsilon(i, a);
            rho += q2 * eps * self.w[i];
            p += q2 * q2 / eps * self.w[i];
            pseudo_p += q2 * q2 * q2 / (eps * eps * eps) * self.w[i];
        }

        let scale = self.factor / a.powi(4);
        (rho * scale, p * scale / 3.0, pseudo_p * scale / 3.0)
    }

    /// Fluid moments of a perturbed distribution
    ///
    /// `psi` holds `l_count` multipoles per momentum node, node-major. Only
    /// ψ₀, ψ₁ and ψ₂ enter the moments.
    pub fn perturbed_moments(&self, a: f64, k: f64, psi: &[f64], l_count: usize, rescale: f64) -> PerturbedMoments {
        let mut moments = PerturbedMoments::default();

        for i in 0..self.size() {
            let q = self.q[i];
            let q2 = q * q;
            let eps = self.epsilon(i, a);
            let w = self.w[i];
            let block = &psi[i * l_count..(i + 1) * l_count];

            moments.rho_delta += q2 * eps * w * block[0];
            moments.rho_plus_p_theta += q2 * q * w * block[1];
            moments.rho_plus_p_shear += q2 * q2 / eps * w * block[2];
            moments.delta_p += q2 * q2 / eps * w * block[0];
        }

        let scale = rescale * self.factor / a.powi(4);
        moments.rho_delta *= scale;
        moments.rho_plus_p_theta *= k * scale;
        moments.rho_plus_p_shear *= 2.0 / 3.0 * scale;
        moments.delta_p *= scale / 3.0;
        moments
    }
}

/// Density, momentum and stress carried by a perturbed species
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PerturbedMoments {
    /// ρ δ
    pub rho_delta: f64,
    /// (ρ + p) θ
    pub rho_plus_p_theta: f64,
    /// (ρ + p) σ
    pub rho_plus_p_shear: f64,
    /// δp
    pub delta_p: f64,
}

/// Quadrature provider for every momentum-resolved species of a cosmology
pub trait MomentumQuadrature: Send + Sync {
    /// Species in the order used by the background's ncdm vectors
    fn species(&self) -> &[QuadratureSpecies];

    /// Time-dependent rescaling of species `n` (decaying species)
    fn rescaling(&self, _n: usize, _a: f64) -> f64 {
        1.0
    }

    /// d ln(rescaling) / d ln a of species `n`
    fn rescaling_log_slope(&self, _n: usize, _a: f64) -> f64 {
        0.0
    }
}

/// Non-cold species, each optionally decaying into invisible radiation
///
/// A decaying species loses comoving number as exp(−Γt). With t ∝ a² in the
/// radiation era this is exp(−(a/a_d)²), where `a_d` is the scale factor of
/// the first e-fold.
#[derive(Debug, Clone, Default)]
pub struct NcdmSpecies {
    species: Vec<QuadratureSpecies>,
    a_decay: Vec<Option<f64>>,
}

impl NcdmSpecies {
    pub fn push(&mut self, species: QuadratureSpecies) {
        self.species.push(species);
        self.a_decay.push(None);
    }

    pub fn push_decaying(&mut self, species: QuadratureSpecies, a_decay: f64) -> PerturbResult<()> {
        if !(a_decay > 0.0) {
            return Err(PerturbError::Configuration(format!(
                "{}: decay scale factor must be positive (got {})",
                species.label, a_decay
            )));
        }
        self.species.push(species);
        self.a_decay.push(Some(a_decay));
        Ok(())
    }
}

impl MomentumQuadrature for NcdmSpecies {
    fn species(&self) -> &[QuadratureSpecies] {
        &self.species
    }

    fn rescaling(&self, n: usize, a: f64) -> f64 {
        match self.a_decay.get(n).copied().flatten() {
            Some(a_d) => (-(a / a_d).powi(2)).exp(),
            None => 1.0,
        }
    }

    fn rescaling_log_slope(&self, n: usize, a: f64) -> f64 {
        match self.a_decay.get(n).copied().flatten() {
            Some(a_d) => -2.0 * (a / a_d).powi(2),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fermi_dirac_massless_equation_of_state() {
        let species = QuadratureSpecies::fermi_dirac("nu", 0.0, 200, 30.0)
            .unwrap()
            .normalized_to(2.0);

        let (rho, p, pseudo_p) = species.integrals(1.0);
        assert_relative_eq!(rho, 2.0, max_relative = 1e-12);
        assert_relative_eq!(p, rho / 3.0, max_relative = 1e-12);
        assert_relative_eq!(pseudo_p, p, max_relative = 1e-12);

        let (rho_half, _, _) = species.integrals(0.5);
        assert_relative_eq!(rho_half, 2.0 * 16.0, max_relative = 1e-12);
    }

    #[test]
    fn test_heavy_species_becomes_pressureless() {
        let species = QuadratureSpecies::fermi_dirac("heavy", 1.0e4, 50, 20.0).unwrap();
        let (rho, p, _) = species.integrals(1.0);
        assert!(p / rho < 1e-6);
    }

    #[test]
    fn test_log_derivative_of_fermi_dirac() {
        let species = QuadratureSpecies::fermi_dirac("nu", 0.0, 10, 10.0).unwrap();
        for (q, d) in species.q.iter().zip(species.dlnf0_dlnq.iter()) {
            let expected = -q * q.exp() / (q.exp() + 1.0);
            assert_relative_eq!(*d, expected, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_moments_of_massless_adiabatic_distribution() {
        // ψ₀ = -δ/4 · dlnf₀/dlnq reproduces a radiation density contrast δ
        let species = QuadratureSpecies::fermi_dirac("nu", 0.0, 400, 40.0)
            .unwrap()
            .normalized_to(1.0);
        let delta = 0.3;
        let l_count = 4;
        let mut psi = vec![0.0; species.size() * l_count];
        for i in 0..species.size() {
            psi[i * l_count] = -0.25 * delta * species.dlnf0_dlnq[i];
        }

        let moments = species.perturbed_moments(1.0, 0.1, &psi, l_count, 1.0);
        assert_relative_eq!(moments.rho_delta, delta, max_relative = 1e-3);
        assert_relative_eq!(moments.delta_p, delta / 3.0, max_relative = 1e-3);
        assert_eq!(moments.rho_plus_p_theta, 0.0);
    }

    #[test]
    fn test_decaying_species_rescaling() {
        let species = QuadratureSpecies::fermi_dirac("dncdm", 100.0, 8, 15.0).unwrap();
        let mut list = NcdmSpecies::default();
        list.push(species.clone());
        list.push_decaying(species.clone(), 1e-3).unwrap();
        assert!(list.push_decaying(species, 0.0).is_err());

        assert_eq!(list.rescaling(0, 1e-3), 1.0);
        assert_eq!(list.rescaling_log_slope(0, 1e-3), 0.0);
        assert_relative_eq!(list.rescaling(1, 1e-3), (-1.0f64).exp(), max_relative = 1e-14);
        assert_relative_eq!(list.rescaling(1, 2e-4), (-0.04f64).exp(), max_relative = 1e-14);
        assert_relative_eq!(list.rescaling_log_slope(1, 2e-3), -8.0, max_relative = 1e-14);

        // logarithmic slope against a centered difference
        let (a, h) = (5e-4, 1e-6);
        let numeric = (list.rescaling(1, a * (1.0 + h)).ln() - list.rescaling(1, a * (1.0 - h)).ln())
            / ((1.0 + h).ln() - (1.0 - h).ln());
        assert_relative_eq!(list.rescaling_log_slope(1, a), numeric, max_relative = 1e-6);
    }

    #[test]
    fn test_rescaling_scales_every_moment() {
        let species = QuadratureSpecies::fermi_dirac("dncdm", 5.0, 20, 15.0)
            .unwrap()
            .normalized_to(1.0);
        let l_count = 4;
        let psi: Vec<f64> = (0..species.size() * l_count).map(|i| 1e-3 * (i % l_count + 1) as f64).collect();

        let full = species.perturbed_moments(0.1, 0.05, &psi, l_count, 1.0);
        let scaled = species.perturbed_moments(0.1, 0.05, &psi, l_count, 0.25);
        assert_relative_eq!(scaled.rho_delta, 0.25 * full.rho_delta, max_relative = 1e-14);
        assert_relative_eq!(scaled.rho_plus_p_theta, 0.25 * full.rho_plus_p_theta, max_relative = 1e-14);
        assert_relative_eq!(scaled.rho_plus_p_shear, 0.25 * full.rho_plus_p_shear, max_relative = 1e-14);
        assert_relative_eq!(scaled.delta_p, 0.25 * full.delta_p, max_relative = 1e-14);
    }

    #[test]
    fn test_rejects_empty_grid() {
        assert!(QuadratureSpecies::fermi_dirac("nu", 0.0, 0, 10.0).is_err());
    }
}
