//! Perturbation file persistence against real NetCDF files.

use std::path::Path;

use perturbation::{deviate, load_ensemble, store, PerturbationError, VariableGroup, MEMBER_DIM};
use test_utils::{grid, scratch_dir, state_dataset, write_ensemble, write_state};

fn checksum(path: &Path) -> u32 {
    crc32fast::hash(&std::fs::read(path).unwrap())
}

fn perturbations(root: &Path) -> netcdf_dataset::Dataset {
    let variables = VariableGroup::Atmo.variables();
    write_ensemble(&root.join("ens"), 0, &grid::TINY, &variables, 4);
    let pattern = format!("{}/ens/f000/mem*.nc", root.display());
    deviate(&load_ensemble(&pattern, &variables).unwrap()).unwrap()
}

#[test]
fn test_round_trip_is_exact() {
    let root = scratch_dir();
    let perts = perturbations(root.path());
    let path = root.path().join("pert.nc");

    store::save(&perts, &path).unwrap();
    let loaded = store::load(&path).unwrap();

    assert_eq!(loaded.dimensions(), perts.dimensions());
    assert_eq!(loaded.dim_len(MEMBER_DIM), Some(4));
    for (name, var) in perts.variables() {
        let got = loaded.variable(name).unwrap();
        assert_eq!(got.dims(), var.dims(), "{}", name);
        // bit-for-bit
        let same = got
            .data()
            .iter()
            .zip(var.data().iter())
            .all(|(a, b)| a.to_bits() == b.to_bits());
        assert!(same, "{} changed on round trip", name);
        assert_eq!(got.attributes, var.attributes);
    }
}

#[test]
fn test_nan_survives_round_trip() {
    let root = scratch_dir();
    let mut perts = perturbations(root.path());
    let t = perts.variable("t").unwrap();
    let mut data = t.data().clone();
    data[[1, 0, 2, 3]] = f64::NAN;
    let t = t.with_data(t.dims().iter().cloned(), data).unwrap();
    perts.insert("t", t).unwrap();

    let path = root.path().join("pert.nc");
    store::save(&perts, &path).unwrap();
    let loaded = store::load(&path).unwrap();
    assert!(loaded.variable("t").unwrap().data()[[1, 0, 2, 3]].is_nan());
}

#[test]
fn test_overwrite_refused_leaves_file_unchanged() {
    let root = scratch_dir();
    let perts = perturbations(root.path());
    let path = root.path().join("pert.nc");
    store::save(&perts, &path).unwrap();
    let before = checksum(&path);

    let mut changed = perts.clone();
    changed.remove("t");
    let err = store::save(&changed, &path).unwrap_err();

    assert!(matches!(err, PerturbationError::OverwriteRefused(ref p) if p == &path));
    assert_eq!(checksum(&path), before);
}

#[test]
fn test_save_creates_parent_directories() {
    let root = scratch_dir();
    let perts = perturbations(root.path());
    let path = root.path().join("nested/dir/pert.nc");
    store::save(&perts, &path).unwrap();
    assert!(path.exists());
}

#[test]
fn test_load_without_member_dimension() {
    let root = scratch_dir();
    let path = root.path().join("state.nc");
    write_state(&path, &state_dataset(&grid::TINY, &["t"], 0.0));

    let err = store::load(&path).unwrap_err();
    assert!(matches!(err, PerturbationError::Format { .. }), "{}", err);
}

#[test]
fn test_load_missing() {
    let root = scratch_dir();
    let err = store::load(&root.path().join("nope.nc")).unwrap_err();
    assert!(matches!(err, PerturbationError::NotFound(_)));
}
