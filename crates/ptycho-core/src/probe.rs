// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Probe Synthesis
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Default initial probe from an aperture and aberration coefficients.
//!
//! In Fourier space, with scattering angle `α = λ|k|` and azimuth `φ`:
//!
//! ```text
//! χ(α, φ) = 2π/λ · ( ½ α² (C10 + C12 cos 2(φ − φ12))
//!                  + ⅓ α³ (C21 cos(φ − φ21) + C23 cos 3(φ − φ23))
//!                  + ¼ α⁴ C30 )
//! ψ(k)    = A(α) · exp(−i χ)
//! ```
//!
//! The real-space probe is `fftshift(ifft2(ψ))`, normalized to unit power.

use std::f64::consts::PI;

use ndarray::Array2;
use num_complex::Complex64;
use ptycho_math::backend::ArrayBackend;
use ptycho_math::fft::{fftshift_2d, ifftshift_2d};
use ptycho_math::shift::{bilinear_shift, center_of_mass};
use ptycho_types::config::PolarParameters;
use ptycho_types::constants::electron_wavelength_angstrom;
use ptycho_types::error::{PtychoError, PtychoResult};

use crate::propagator::spatial_frequencies;

#[derive(Debug, Clone)]
pub struct ComplexProbe {
    gpts: [usize; 2],
    sampling: [f64; 2],
    wavelength: f64,
    /// mrad
    semiangle_cutoff: Option<f64>,
    /// mrad
    rolloff: f64,
    parameters: PolarParameters,
    vacuum_probe: Option<Array2<f64>>,
}

impl ComplexProbe {
    pub fn new(gpts: [usize; 2], sampling: [f64; 2], energy: f64) -> Self {
        ComplexProbe {
            gpts,
            sampling,
            wavelength: electron_wavelength_angstrom(energy),
            semiangle_cutoff: None,
            rolloff: 2.0,
            parameters: PolarParameters::default(),
            vacuum_probe: None,
        }
    }

    pub fn with_aperture(mut self, semiangle_cutoff: Option<f64>, rolloff: f64) -> Self {
        self.semiangle_cutoff = semiangle_cutoff;
        self.rolloff = rolloff;
        self
    }

    pub fn with_aberrations(mut self, parameters: PolarParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Use `sqrt(intensity)` of a measured vacuum probe as the aperture.
    pub fn with_vacuum_probe(mut self, intensity: Array2<f64>) -> PtychoResult<Self> {
        if intensity.dim() != (self.gpts[0], self.gpts[1]) {
            return Err(PtychoError::shape_mismatch(
                "vacuum_probe_intensity",
                &self.gpts,
                intensity.shape(),
            ));
        }
        self.vacuum_probe = Some(intensity);
        Ok(self)
    }

    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    /// Scattering angle (rad) and azimuth on the FFT grid.
    pub fn polar_coordinates(&self) -> (Array2<f64>, Array2<f64>) {
        let (kx, ky) = spatial_frequencies(self.gpts, self.sampling);
        let shape = (self.gpts[0], self.gpts[1]);
        let alpha = Array2::from_shape_fn(shape, |(i, j)| {
            (kx[i] * kx[i] + ky[j] * ky[j]).sqrt() * self.wavelength
        });
        let phi = Array2::from_shape_fn(shape, |(i, j)| ky[j].atan2(kx[i]));
        (alpha, phi)
    }

    /// Aperture amplitude on the FFT grid.
    pub fn aperture(&self, alpha: &Array2<f64>) -> Array2<f64> {
        if let Some(vacuum) = &self.vacuum_probe {
            let centred = match center_of_mass(&vacuum.view(), None) {
                Some(com) => {
                    let target = [(self.gpts[0] / 2) as f64, (self.gpts[1] / 2) as f64];
                    bilinear_shift(vacuum, [target[0] - com[0], target[1] - com[1]])
                }
                None => vacuum.clone(),
            };
            return ifftshift_2d(&centred).mapv(|v| v.max(0.0).sqrt());
        }
        let Some(cutoff_mrad) = self.semiangle_cutoff else {
            return Array2::ones(alpha.raw_dim());
        };
        let cutoff = cutoff_mrad / 1000.0;
        let rolloff = self.rolloff / 1000.0;
        alpha.mapv(|a| {
            if a > cutoff {
                0.0
            } else if rolloff > 0.0 && a > cutoff - rolloff {
                0.5 * (1.0 + (PI * (a - cutoff + rolloff) / rolloff).cos())
            } else {
                1.0
            }
        })
    }

    /// Aberration phase `χ` in radians.
    pub fn chi(&self, alpha: &Array2<f64>, phi: &Array2<f64>) -> Array2<f64> {
        let p = &self.parameters;
        let scale = 2.0 * PI / self.wavelength;
        let mut out = Array2::zeros(alpha.raw_dim());
        ndarray::Zip::from(&mut out)
            .and(alpha)
            .and(phi)
            .for_each(|c, &a, &f| {
                let a2 = a * a;
                let second = 0.5 * a2 * (p.c10 + p.c12 * (2.0 * (f - p.phi12)).cos());
                let third = a2 * a / 3.0
                    * (p.c21 * (f - p.phi21).cos() + p.c23 * (3.0 * (f - p.phi23)).cos());
                let fourth = 0.25 * a2 * a2 * p.c30;
                *c = scale * (second + third + fourth);
            });
        out
    }

    /// Real-space probe, centred on the grid, `Σ|ψ|² = 1`.
    pub fn build(&self, backend: &dyn ArrayBackend) -> Array2<Complex64> {
        let (alpha, phi) = self.polar_coordinates();
        let aperture = self.aperture(&alpha);
        let chi = self.chi(&alpha, &phi);
        let mut field = Array2::zeros(alpha.raw_dim());
        ndarray::Zip::from(&mut field)
            .and(&aperture)
            .and(&chi)
            .for_each(|f, &a, &c| *f = Complex64::from_polar(a, -c));
        backend.ifft2(field.view_mut());
        let power: f64 = field.iter().map(|v| v.norm_sqr()).sum();
        if power > 0.0 {
            let norm = 1.0 / power.sqrt();
            field.mapv_inplace(|v| v * norm);
        }
        fftshift_2d(&field)
    }
}
