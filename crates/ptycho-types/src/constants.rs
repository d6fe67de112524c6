// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Electron rest mass (kg)
pub const M_ELECTRON: f64 = 9.109383e-31;

/// Elementary charge (C)
pub const Q_ELECTRON: f64 = 1.602177e-19;

/// Speed of light (m/s)
pub const C_LIGHT: f64 = 299_792_458.0;

/// Planck constant (J s)
pub const H_PLANCK: f64 = 6.62607e-34;

/// Regulariser added under every normalisation square root.
pub const NORMALIZATION_EPS: f64 = 1e-16;

/// Relativistic electron wavelength in Å for an accelerating energy in eV.
pub fn electron_wavelength_angstrom(energy_ev: f64) -> f64 {
    let momentum = (2.0 * M_ELECTRON * Q_ELECTRON * energy_ev).sqrt();
    let relativistic =
        (1.0 + Q_ELECTRON * energy_ev / 2.0 / M_ELECTRON / (C_LIGHT * C_LIGHT)).sqrt();
    H_PLANCK / momentum / relativistic * 1e10
}
