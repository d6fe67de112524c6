// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — Volume Rotation
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use ndarray::{Array3, ArrayView2};

/// Bilinear sample of a 2D plane, zero outside the grid.
fn bilinear_zero_fill(plane: &ArrayView2<'_, f64>, z: f64, y: f64) -> f64 {
    let (nz, ny) = plane.dim();
    let z0 = z.floor();
    let y0 = y.floor();
    let tz = z - z0;
    let ty = y - y0;
    let z0 = z0 as isize;
    let y0 = y0 as isize;

    let at = |zi: isize, yi: isize| -> f64 {
        if zi < 0 || yi < 0 || zi >= nz as isize || yi >= ny as isize {
            0.0
        } else {
            plane[[zi as usize, yi as usize]]
        }
    };

    (1.0 - tz) * (1.0 - ty) * at(z0, y0)
        + (1.0 - tz) * ty * at(z0, y0 + 1)
        + tz * (1.0 - ty) * at(z0 + 1, y0)
        + tz * ty * at(z0 + 1, y0 + 1)
}

/// Rotate a `(nz, nx, ny)` volume by `angle_deg` in the (axis 0, axis 2)
/// plane about the array centre. Axis 1 is the tilt axis. Samples mapped
/// from outside the input are zero.
///
/// The output voxel at `(z, y)` is read from the input at
/// `z_in = cosθ·(z − cz) + sinθ·(y − cy) + cz`,
/// `y_in = −sinθ·(z − cz) + cosθ·(y − cy) + cy`.
pub fn rotate_volume(volume: &Array3<f64>, angle_deg: f64) -> Array3<f64> {
    if angle_deg == 0.0 {
        return volume.clone();
    }
    let (nz, nx, ny) = volume.dim();
    let theta = angle_deg.to_radians();
    let (sin, cos) = theta.sin_cos();
    let cz = (nz as f64 - 1.0) / 2.0;
    let cy = (ny as f64 - 1.0) / 2.0;

    let mut out = Array3::zeros((nz, nx, ny));
    for x in 0..nx {
        let plane = volume.slice(ndarray::s![.., x, ..]);
        for z in 0..nz {
            let dz = z as f64 - cz;
            for y in 0..ny {
                let dy = y as f64 - cy;
                let z_in = cos * dz + sin * dy + cz;
                let y_in = -sin * dz + cos * dy + cy;
                out[[z, x, y]] = bilinear_zero_fill(&plane, z_in, y_in);
            }
        }
    }
    out
}
