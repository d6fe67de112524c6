// ─────────────────────────────────────────────────────────────────────
// Ptycho-Tomo — NPZ Persistence
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Save reconstructions to `.npz` and read them back as initial guesses.
//!
//! The complex probe is stored as two real arrays, `probe_real` and
//! `probe_imag`.

use std::fs::File;
use std::path::Path;

use ndarray::{Array1, Array2, Array3, Dimension, OwnedRepr, Zip};
use ndarray_npy::{NpzReader, NpzWriter};
use num_complex::Complex64;
use ptycho_types::error::{PtychoError, PtychoResult};
use ptycho_types::state::ReconstructionState;

pub fn save_npz(path: impl AsRef<Path>, state: &ReconstructionState) -> PtychoResult<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = NpzWriter::new(file);
    let write_err = |key: &str, e: ndarray_npy::WriteNpzError| {
        PtychoError::Npz(format!("Failed to write {key} to '{}': {e}", path.display()))
    };

    let probe_real = state.probe.mapv(|v| v.re);
    let probe_imag = state.probe.mapv(|v| v.im);
    let error = Array1::from_elem(1, state.error.unwrap_or(f64::NAN));

    writer
        .add_array("object", &state.object)
        .map_err(|e| write_err("object", e))?;
    writer
        .add_array("probe_real", &probe_real)
        .map_err(|e| write_err("probe_real", e))?;
    writer
        .add_array("probe_imag", &probe_imag)
        .map_err(|e| write_err("probe_imag", e))?;
    writer
        .add_array("positions_px", &state.positions_px)
        .map_err(|e| write_err("positions_px", e))?;
    writer
        .add_array("error", &error)
        .map_err(|e| write_err("error", e))?;
    writer.finish().map_err(|e| write_err("archive", e))?;

    log::info!("Saved reconstruction to {}", path.display());
    Ok(())
}

/// Object and probe stored in an archive, whichever are present.
pub fn load_npz_guesses(
    path: impl AsRef<Path>,
) -> PtychoResult<(Option<Array3<f64>>, Option<Array2<Complex64>>)> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut npz = NpzReader::new(file)
        .map_err(|e| PtychoError::Npz(format!("Failed to open npz '{}': {e}", path.display())))?;
    let names = npz
        .names()
        .map_err(|e| PtychoError::Npz(format!("Failed to list '{}': {e}", path.display())))?;
    let has = |key: &str| names.iter().any(|n| n == key || *n == format!("{key}.npy"));

    let object = if has("object") {
        Some(read_array::<ndarray::Ix3>(&mut npz, "object")?)
    } else {
        None
    };

    let probe = match (has("probe_real"), has("probe_imag")) {
        (true, true) => {
            let re = read_array::<ndarray::Ix2>(&mut npz, "probe_real")?;
            let im = read_array::<ndarray::Ix2>(&mut npz, "probe_imag")?;
            if re.dim() != im.dim() {
                return Err(PtychoError::shape_mismatch("probe_imag", re.shape(), im.shape()));
            }
            let mut probe = Array2::<Complex64>::zeros(re.raw_dim());
            Zip::from(&mut probe)
                .and(&re)
                .and(&im)
                .for_each(|p, &r, &i| *p = Complex64::new(r, i));
            Some(probe)
        }
        (false, false) => None,
        _ => {
            return Err(PtychoError::Npz(
                "probe_real and probe_imag must be stored together".to_string(),
            ))
        }
    };

    log::debug!(
        "Loaded guesses from {}: object={}, probe={}",
        path.display(),
        object.is_some(),
        probe.is_some()
    );
    Ok((object, probe))
}

fn read_array<D: Dimension>(
    npz: &mut NpzReader<File>,
    key: &str,
) -> PtychoResult<ndarray::Array<f64, D>> {
    npz.by_name::<OwnedRepr<f64>, D>(&format!("{key}.npy"))
        .or_else(|_| npz.by_name::<OwnedRepr<f64>, D>(key))
        .map_err(|e| PtychoError::Npz(format!("Failed to read {key} from npz: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(tag: &str) -> std::path::PathBuf {
        let epoch_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "ptycho_io_{tag}_{}_{}.npz",
            std::process::id(),
            epoch_ns
        ))
    }

    fn sample_state() -> ReconstructionState {
        ReconstructionState {
            object: Array3::from_shape_fn((3, 4, 3), |(i, j, k)| (i * 12 + j * 3 + k) as f64 * 0.01),
            probe: Array2::from_shape_fn((4, 4), |(i, j)| Complex64::new(i as f64, -(j as f64))),
            positions_px: Array2::from_shape_fn((5, 2), |(i, j)| i as f64 + 0.5 * j as f64),
            exit_waves: vec![Some(Array4::zeros((1, 5, 4, 4)))],
            error: Some(0.125),
            history: None,
        }
    }

    #[test]
    fn test_save_then_load_guesses() {
        let state = sample_state();
        let path = temp_path("roundtrip");
        save_npz(&path, &state).unwrap();

        let (object, probe) = load_npz_guesses(&path).unwrap();
        assert_eq!(object.unwrap(), state.object);
        assert_eq!(probe.unwrap(), state.probe);

        let mut npz = NpzReader::new(File::open(&path).unwrap()).unwrap();
        let error = read_array::<ndarray::Ix1>(&mut npz, "error").unwrap();
        assert_eq!(error[0], 0.125);
        let positions = read_array::<ndarray::Ix2>(&mut npz, "positions_px").unwrap();
        assert_eq!(positions, state.positions_px);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_probe_is_none() {
        let path = temp_path("object_only");
        let mut writer = NpzWriter::new(File::create(&path).unwrap());
        writer.add_array("object", &Array3::<f64>::ones((2, 2, 2))).unwrap();
        writer.finish().unwrap();

        let (object, probe) = load_npz_guesses(&path).unwrap();
        assert_eq!(object.unwrap().dim(), (2, 2, 2));
        assert!(probe.is_none());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_half_probe_rejected() {
        let path = temp_path("half_probe");
        let mut writer = NpzWriter::new(File::create(&path).unwrap());
        writer.add_array("probe_real", &Array2::<f64>::ones((2, 2))).unwrap();
        writer.finish().unwrap();

        let err = load_npz_guesses(&path).unwrap_err();
        assert!(matches!(err, PtychoError::Npz(_)));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_npz_guesses(temp_path("absent")).unwrap_err();
        assert!(matches!(err, PtychoError::Io(_)));
    }
}
