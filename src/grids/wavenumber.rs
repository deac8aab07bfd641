//! Wavenumber sampling per mode
//!
//! Three zones, each continuing from the last value of the previous one:
//!
//! 1. up to `k_max_cmb`: linear steps whose size switches smoothly from
//!    `k_step_super · k_rec` to `k_step_sub · k_rec` around the sound-horizon
//!    scale k_rec = 2π/r_s, further reduced below the Hubble/curvature scale
//! 2. up to `k_max_cl`, set by `l_lss_max` when the lensing potential is
//!    requested: logarithmic steps whose density blends from
//!    `k_per_decade_for_pk` to `k_per_decade_for_bao` around the BAO scale
//! 3. up to `k_max`: same logarithmic scheme
//!
//! Output wavenumbers requested by the user are merged in afterwards.

use log::debug;

use crate::config::{Precision, Settings};
use crate::error::{PerturbError, PerturbResult};
use crate::models::Mode;
use crate::physics::{Background, BackgroundRecord, InterpolationCursor, Thermodynamics};

/// Relative distance under which an output k is considered already present
const K_MERGE_TOLERANCE: f64 = 1e-12;

/// Wavenumbers of one mode with their zone boundaries
#[derive(Debug, Clone)]
pub struct WavenumberGrid {
    pub mode: Mode,
    /// Strictly increasing wavenumbers (Mpc^-1)
    pub k: Vec<f64>,
    /// Number of wavenumbers needed for CMB sources
    pub k_size_cmb: usize,
    /// Number of wavenumbers needed for all angular spectra
    pub k_size_cl: usize,
}

impl WavenumberGrid {
    pub fn build(
        mode: Mode,
        background: &dyn Background,
        thermodynamics: &dyn Thermodynamics,
        settings: &Settings,
        precision: &Precision,
    ) -> PerturbResult<Self> {
        let content = background.content();
        let tau0 = content.conformal_age;
        let curvature = content.curvature;
        let rs_rec = thermodynamics.summary().rs_rec;

        if !(rs_rec > 0.0) {
            return Err(PerturbError::Collaborator(format!(
                "sound horizon at recombination must be positive (got {})",
                rs_rec
            )));
        }
        let k_rec = 2.0 * std::f64::consts::PI / rs_rec;

        let k_min = if curvature > 0.0 {
            let lowest_nu2 = match mode {
                Mode::Scalar => 8.0,
                Mode::Vector => 7.0,
                Mode::Tensor => 6.0,
            };
            ((lowest_nu2 - 1e-4) * curvature).sqrt()
        } else {
            precision.k_min_tau0 / tau0
        };

        let l_max = match mode {
            Mode::Scalar => settings.l_scalar_max,
            Mode::Vector => settings.l_vector_max,
            Mode::Tensor => settings.l_tensor_max,
        } as f64;

        let has_cmb = match mode {
            Mode::Scalar => settings.has_cmb(),
            _ => true,
        };
        let k_max_cmb = if has_cmb {
            (precision.k_max_tau0_over_l_max * l_max / tau0).max(k_min)
        } else {
            k_min
        };
        let k_max_cl = if mode == Mode::Scalar && settings.has_cl_lensing_potential {
            k_max_cmb.max(precision.k_max_tau0_over_l_max * settings.l_lss_max as f64 / tau0)
        } else {
            k_max_cmb
        };
        let k_max = if mode == Mode::Scalar && settings.has_lss() {
            k_max_cl.max(settings.k_max_for_pk)
        } else {
            k_max_cl
        };

        let h0 = background_h0(background)?;
        let scale2 = h0 * h0 + curvature.abs();

        let mut k_list = vec![k_min];
        let mut k = k_min;

        while k < k_max_cmb {
            let mut step = (precision.k_step_super
                + 0.5
                    * (((k - k_rec) / k_rec / precision.k_step_transition).tanh() + 1.0)
                    * (precision.k_step_sub - precision.k_step_super))
                * k_rec;
            step *= (k * k / scale2 + 1.0) / (k * k / scale2 + 1.0 / precision.k_step_super_reduction);

            if !(step / k >= precision.smallest_allowed_variation) {
                return Err(PerturbError::Precision(format!(
                    "k step {:e} underflows at k = {:e}",
                    step, k
                )));
            }
            k += step;
            k_list.push(k);
        }
        let k_size_cmb = k_list.len();

        let log_step = |k: f64| -> f64 {
            let x = ((k.ln() - (precision.k_bao_center * k_rec).ln()) / precision.k_bao_width.ln()).powi(4);
            let per_decade = precision.k_per_decade_for_pk
                + (precision.k_per_decade_for_bao - precision.k_per_decade_for_pk) * (1.0 - x.tanh());
            10f64.powf(1.0 / per_decade)
        };

        while k < k_max_cl {
            k *= log_step(k);
            k_list.push(k);
        }
        let k_size_cl = k_list.len();

        while k < k_max {
            k *= log_step(k);
            k_list.push(k);
        }

        let mut grid = Self {
            mode,
            k: k_list,
            k_size_cmb,
            k_size_cl,
        };
        if mode == Mode::Scalar {
            grid.merge_output_values(&settings.k_output_values);
        }

        debug!(
            "{} k grid: {} values in [{:.3e}, {:.3e}] Mpc^-1 (cmb {}, cl {}), k_rec = {:.4e}",
            mode,
            grid.k.len(),
            grid.k_min(),
            grid.k_max(),
            grid.k_size_cmb,
            grid.k_size_cl,
            k_rec
        );

        Ok(grid)
    }

    /// Insert `values` in sorted order, skipping those already present
    pub fn merge_output_values(&mut self, values: &[f64]) {
        let mut sorted: Vec<f64> = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted.dedup_by(|a, b| (*a - *b).abs() <= K_MERGE_TOLERANCE * b.abs());

        for value in sorted {
            let position = self.k.partition_point(|k| *k < value);
            let present = [position.checked_sub(1), Some(position)]
                .into_iter()
                .flatten()
                .filter(|i| *i < self.k.len())
                .any(|i| (self.k[i] - value).abs() <= K_MERGE_TOLERANCE * value);
            if present {
                continue;
            }

            self.k.insert(position, value);
            if position < self.k_size_cmb {
                self.k_size_cmb += 1;
            }
            if position < self.k_size_cl {
                self.k_size_cl += 1;
            }
        }
    }

    /// Index of the grid value equal to `value`
    pub fn index_of(&self, value: f64) -> Option<usize> {
        let position = self.k.partition_point(|k| *k < value * (1.0 - K_MERGE_TOLERANCE));
        (position < self.k.len() && (self.k[position] - value).abs() <= K_MERGE_TOLERANCE * value)
            .then_some(position)
    }

    pub fn len(&self) -> usize {
        self.k.len()
    }

    pub fn is_empty(&self) -> bool {
        self.k.is_empty()
    }

    pub fn k_min(&self) -> f64 {
        self.k[0]
    }

    pub fn k_max(&self) -> f64 {
        self.k[self.k.len() - 1]
    }
}

/// H₀ read from the background today
fn background_h0(background: &dyn Background) -> PerturbResult<f64> {
    let mut cursor = InterpolationCursor::new();
    let mut record = BackgroundRecord::with_ncdm(background.content().n_ncdm);
    background.background_at(background.content().conformal_age, &mut cursor, &mut record)?;
    Ok(record.hubble)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::ToyCosmology;

    #[test]
    fn test_scalar_grid_zones() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings {
            has_pk_matter: true,
            k_max_for_pk: 2.0,
            ..Settings::cmb()
        };
        let grid =
            WavenumberGrid::build(Mode::Scalar, &cosmology, &cosmology, &settings, &Precision::default()).unwrap();

        assert!(grid.k.windows(2).all(|w| w[1] > w[0]));
        assert!(grid.k_size_cmb <= grid.k_size_cl && grid.k_size_cl <= grid.len());
        assert!(grid.k_max() >= 2.0);
        assert!(grid.k[grid.k_size_cmb - 1] >= 1.8 * 2500.0 / cosmology.content().conformal_age);
        assert!((grid.k_min() - 0.1 / cosmology.content().conformal_age).abs() < 1e-15);
    }

    #[test]
    fn test_lensing_multipoles_extend_cl_zone() {
        let cosmology = ToyCosmology::new().unwrap();
        let tau0 = cosmology.content().conformal_age;
        let settings = Settings {
            has_cl_lensing_potential: true,
            has_pk_matter: true,
            k_max_for_pk: 5.0,
            l_scalar_max: 200,
            l_lss_max: 1000,
            ..Settings::cmb()
        };
        let precision = Precision::fast();
        let grid = WavenumberGrid::build(Mode::Scalar, &cosmology, &cosmology, &settings, &precision).unwrap();

        assert!(grid.k_size_cmb < grid.k_size_cl && grid.k_size_cl < grid.len());
        assert!(grid.k[grid.k_size_cl - 1] >= precision.k_max_tau0_over_l_max * 1000.0 / tau0);
        assert!(grid.k[grid.k_size_cmb - 1] < precision.k_max_tau0_over_l_max * 1000.0 / tau0);

        // below the CMB multipoles the lensing request adds nothing
        let settings = Settings { l_lss_max: 100, ..settings };
        let grid = WavenumberGrid::build(Mode::Scalar, &cosmology, &cosmology, &settings, &precision).unwrap();
        assert_eq!(grid.k_size_cmb, grid.k_size_cl);
        assert!(grid.k_size_cl < grid.len());
    }

    #[test]
    fn test_output_values_merged_once() {
        let cosmology = ToyCosmology::new().unwrap();
        let settings = Settings::cmb().with_output_k(vec![0.05, 0.001, 0.05]);
        let grid =
            WavenumberGrid::build(Mode::Scalar, &cosmology, &cosmology, &settings, &Precision::fast()).unwrap();

        assert_eq!(grid.k.iter().filter(|k| **k == 0.05).count(), 1);
        assert_eq!(grid.k.iter().filter(|k| **k == 0.001).count(), 1);
        assert!(grid.index_of(0.05).is_some());
        assert!(grid.k.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_merge_shifts_boundaries() {
        let mut grid = WavenumberGrid {
            mode: Mode::Scalar,
            k: vec![1.0, 2.0, 3.0, 4.0],
            k_size_cmb: 2,
            k_size_cl: 3,
        };
        grid.merge_output_values(&[1.5, 3.5, 5.0, 2.0]);

        assert_eq!(grid.k, vec![1.0, 1.5, 2.0, 3.0, 3.5, 4.0, 5.0]);
        assert_eq!(grid.k_size_cmb, 3);
        assert_eq!(grid.k_size_cl, 4);
    }

    #[test]
    fn test_closed_universe_lowest_mode() {
        let cosmology = ToyCosmology::builder().omega_k(-0.01).build().unwrap();
        let curvature = cosmology.content().curvature;
        assert!(curvature > 0.0);

        let settings = Settings::cmb().with_modes(true, false, true);
        let scalar =
            WavenumberGrid::build(Mode::Scalar, &cosmology, &cosmology, &settings, &Precision::fast()).unwrap();
        let tensor =
            WavenumberGrid::build(Mode::Tensor, &cosmology, &cosmology, &settings, &Precision::fast()).unwrap();

        assert!((scalar.k_min() - ((8.0 - 1e-4) * curvature).sqrt()).abs() < 1e-15);
        assert!(tensor.k_min() < scalar.k_min());
        assert_eq!(tensor.k_size_cl, tensor.len());
    }
}
