// Energy -> water linear attenuation coefficient, and HU -> transmitted
// fraction. Water density is fixed at 1.0 g/cm^3, so the tabulated mass
// attenuation coefficients (cm^2/g) coincide numerically with linear
// attenuation coefficients (cm^-1).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// NIST XCOM photon energies for water, MeV. 36 entries, 0.001 to 20.0.
const ENERGIES_MEV: [f64; 36] = [
    0.001, 0.0015, 0.002, 0.003, 0.004, 0.005, 0.006, 0.008, 0.01, 0.015, 0.02, 0.03, 0.04, 0.05,
    0.06, 0.08, 0.1, 0.15, 0.2, 0.3, 0.4, 0.5, 0.6, 0.8, 1.0, 1.25, 1.5, 2.0, 3.0, 4.0, 5.0, 6.0,
    8.0, 10.0, 15.0, 20.0,
];

/// Mass attenuation coefficients for liquid water, cm^2/g, parallel to
/// `ENERGIES_MEV`.
const AC_WATER_TABLE: [f64; 36] = [
    4078.0, 1376.0, 617.0, 192.9, 82.78, 42.58, 24.64, 10.37, 5.329, 1.673, 0.8096, 0.3756,
    0.2683, 0.2269, 0.2059, 0.1837, 0.1707, 0.1505, 0.1370, 0.1186, 0.1061, 0.09687, 0.08956,
    0.07865, 0.07072, 0.06323, 0.05754, 0.04942, 0.03969, 0.03403, 0.03031, 0.02770, 0.02429,
    0.02219, 0.01941, 0.01813,
];

/// Water density, g/cm^3, fixed by construction.
pub const WATER_DENSITY: f64 = 1.0;

/// Default photon energy, 50 keV — a plain constant rather than a
/// process-wide mutable default, so it participates in `Default` like any
/// other value.
pub const DEFAULT_ENERGY_MEV: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attenuation {
    pub energy: f64,
    pub ac_water: f64,
    pub density: f64,
}

impl Attenuation {
    pub fn new(energy_mev: f64) -> Result<Self> {
        if energy_mev <= 0.0 {
            return Err(Error::InvalidArgument(
                "photon energy must be strictly positive".to_string(),
            ));
        }
        Ok(Attenuation {
            energy: energy_mev,
            ac_water: determine_coefficient(energy_mev),
            density: WATER_DENSITY,
        })
    }

    /// `hu * ac_water / 1000 + ac_water`.
    pub fn attenuation_coefficient(&self, hu: f64) -> f64 {
        hu * self.ac_water / 1000.0 + self.ac_water
    }

    /// `1 - exp(-sum(attenuation_coefficient(hu[i]) * 0.1 * lengths_mm[i]))`.
    /// The `0.1` factor converts the mm path lengths to cm.
    pub fn vector_attenuation(&self, hu: &[f64], lengths_mm: &[f64]) -> Result<f64> {
        if hu.len() != lengths_mm.len() {
            return Err(Error::InvalidArgument(format!(
                "hu vector (len {}) and lengths vector (len {}) must match",
                hu.len(),
                lengths_mm.len()
            )));
        }
        let sum: f64 = hu
            .iter()
            .zip(lengths_mm.iter())
            .map(|(&h, &len_mm)| self.attenuation_coefficient(h) * 0.1 * len_mm)
            .sum();
        Ok(1.0 - (-sum).exp())
    }
}

impl Default for Attenuation {
    fn default() -> Self {
        Attenuation::new(DEFAULT_ENERGY_MEV).expect("default energy is always valid")
    }
}

/// Table lookup plus linear interpolation for the water attenuation
/// coefficient at `energy` MeV.
///
/// The interpolation branch deliberately omits the `+ ac_low` term: it
/// returns only `slope * (energy - e_low)`, not the textbook lerp
/// `ac_low + slope * (energy - e_low)`. Callers round-tripping against the
/// reference tool this crate tracks depend on that exact (if surprising)
/// numeric output, so this is a documented deviation rather than a bug to
/// silently patch.
pub fn determine_coefficient(energy: f64) -> f64 {
    if energy >= 20.0 {
        return AC_WATER_TABLE[AC_WATER_TABLE.len() - 1];
    }
    if let Some(exact) = ENERGIES_MEV
        .iter()
        .position(|&e| (e - energy).abs() == 0.0)
    {
        return AC_WATER_TABLE[exact];
    }
    let i = ENERGIES_MEV
        .iter()
        .position(|&e| e > energy)
        .unwrap_or(ENERGIES_MEV.len() - 1);
    let (e_low, e_high) = (ENERGIES_MEV[i - 1], ENERGIES_MEV[i]);
    let (ac_low, ac_high) = (AC_WATER_TABLE[i - 1], AC_WATER_TABLE[i]);
    (ac_high - ac_low) / (e_high - e_low) * (energy - e_low)
}
