//! Common test fixtures for perturbation tests.
//!
//! Builds small model-state datasets over a regular grid and writes them as
//! NetCDF files laid out the way a forecast run leaves them on disk: one
//! directory per forecast hour, one file per ensemble member.

use std::path::{Path, PathBuf};

use netcdf_dataset::{
    write_dataset, AttrValue, Dataset, Encoding, Storage, StorageType, TextContent, TextVariable,
    Variable,
};

use crate::generators::{create_temperature_field, member_offset};

/// Grid specifications for testing.
pub mod grid {
    /// Grid specification for testing.
    #[derive(Debug, Clone, Copy)]
    pub struct GridSpec {
        pub nlev: usize,
        pub nlat: usize,
        pub nlon: usize,
    }

    /// Small 3-D grid, enough to catch axis mix-ups
    pub const TINY: GridSpec = GridSpec {
        nlev: 2,
        nlat: 3,
        nlon: 4,
    };

    /// One column of three levels
    pub const COLUMN: GridSpec = GridSpec {
        nlev: 3,
        nlat: 1,
        nlon: 1,
    };

    impl GridSpec {
        /// Number of cells in one horizontal layer.
        pub fn layer_size(&self) -> usize {
            self.nlat * self.nlon
        }

        /// Number of cells in the full 3-D grid.
        pub fn size(&self) -> usize {
            self.nlev * self.layer_size()
        }

        pub fn levels(&self) -> Vec<f64> {
            (1..=self.nlev).map(|k| k as f64).collect()
        }

        pub fn latitudes(&self) -> Vec<f64> {
            (0..self.nlat).map(|j| 30.0 + j as f64 * 0.5).collect()
        }

        pub fn longitudes(&self) -> Vec<f64> {
            (0..self.nlon).map(|i| 250.0 + i as f64 * 0.5).collect()
        }
    }
}

use grid::GridSpec;

/// Glob matching the member files of one forecast hour, relative to the
/// ensemble root. `{fhr}` is filled in by the pipeline.
pub const ENSEMBLE_PATTERN_TEMPLATE: &str = "f{fhr:03}/mem*.nc";

/// Orography of every base state. Not representable in `f32`.
pub const BASE_OROG: f64 = 1523.123456789;

/// Model name stored as a character variable in every base state.
pub const BASE_MODEL_NAME: &str = "FV3GFS";

/// Temporary directory for one test, removed when dropped.
pub fn scratch_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("perturbation-test")
        .tempdir()
        .expect("create scratch directory")
}

/// Directory holding the member files of `fhr` under `root`.
pub fn ensemble_dir(root: &Path, fhr: u32) -> PathBuf {
    root.join(format!("f{:03}", fhr))
}

/// Whether a variable is a single-level field.
///
/// Surface pressure and its boundary strips are 2-D; everything else has
/// levels.
pub fn is_surface_variable(name: &str) -> bool {
    name.starts_with("ps")
}

/// Build a state holding `variables` on `grid`, every value shifted by
/// `offset`.
///
/// Variable `n` (in the order given) is the temperature field plus
/// `10 * n`, so variables are distinguishable.
pub fn state_dataset<S: AsRef<str>>(grid: &GridSpec, variables: &[S], offset: f64) -> Dataset {
    let mut ds = Dataset::new();
    ds.attributes
        .insert("title".to_string(), AttrValue::from("synthetic model state"));

    insert(&mut ds, "lev", Variable::from_shape_vec(&["lev"], &[grid.nlev], grid.levels()));
    insert(&mut ds, "lat", Variable::from_shape_vec(&["lat"], &[grid.nlat], grid.latitudes()));
    insert(&mut ds, "lon", Variable::from_shape_vec(&["lon"], &[grid.nlon], grid.longitudes()));

    let field = create_temperature_field(grid.nlev, grid.nlat, grid.nlon);
    for (n, name) in variables.iter().enumerate() {
        let name = name.as_ref();
        let shift = 10.0 * n as f64 + offset;
        let var = if is_surface_variable(name) {
            let values = field[..grid.layer_size()].iter().map(|v| v + shift).collect();
            Variable::from_shape_vec(&["lat", "lon"], &[grid.nlat, grid.nlon], values)
        } else {
            let values = field.iter().map(|v| v + shift).collect();
            Variable::from_shape_vec(&["lev", "lat", "lon"], &[grid.nlev, grid.nlat, grid.nlon], values)
        };
        let var = var.map(|v| v.with_attribute("units", "K"));
        insert(&mut ds, name, var);
    }
    ds
}

fn insert(ds: &mut Dataset, name: &str, var: netcdf_dataset::DatasetResult<Variable>) {
    let var = var.unwrap_or_else(|e| panic!("fixture variable {}: {}", name, e));
    ds.insert(name, var)
        .unwrap_or_else(|e| panic!("fixture insert {}: {}", name, e));
}

/// Write a dataset in its source encoding, creating parent directories.
pub fn write_state(path: &Path, ds: &Dataset) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture directory");
    }
    write_dataset(ds, path, &Encoding::default())
        .unwrap_or_else(|e| panic!("write fixture {}: {}", path.display(), e));
}

/// Write `members` member files for `fhr` under `root`.
///
/// Member `m` is the base field plus [`member_offset`], so the ensemble
/// mean equals `state_dataset(grid, variables, 0.0)`. Returns the member
/// paths in member order.
pub fn write_ensemble<S: AsRef<str>>(
    root: &Path,
    fhr: u32,
    grid: &GridSpec,
    variables: &[S],
    members: usize,
) -> Vec<PathBuf> {
    let dir = ensemble_dir(root, fhr);
    (0..members)
        .map(|m| {
            let path = dir.join(format!("mem{:03}.nc", m + 1));
            write_state(&path, &state_dataset(grid, variables, member_offset(m, members)));
            path
        })
        .collect()
}

/// Write the same state `members` times, giving a spread-free ensemble.
pub fn write_identical_ensemble<S: AsRef<str>>(
    root: &Path,
    fhr: u32,
    grid: &GridSpec,
    variables: &[S],
    members: usize,
) -> Vec<PathBuf> {
    let dir = ensemble_dir(root, fhr);
    let state = state_dataset(grid, variables, 0.0);
    (0..members)
        .map(|m| {
            let path = dir.join(format!("mem{:03}.nc", m + 1));
            write_state(&path, &state);
            path
        })
        .collect()
}

/// Base state holding `variables` plus fields a model restart carries
/// alongside them.
///
/// Besides the group variables there is an `orog` field of [`BASE_OROG`],
/// an integer land-sea mask `slmsk`, a character variable `model` holding
/// [`BASE_MODEL_NAME`] and a `Time` coordinate on an unlimited dimension.
pub fn base_state_dataset<S: AsRef<str>>(grid: &GridSpec, variables: &[S], offset: f64) -> Dataset {
    let mut ds = state_dataset(grid, variables, offset);

    insert(&mut ds, "Time", Variable::from_shape_vec(&["Time"], &[1], vec![1.0]));
    ds.set_unlimited("Time")
        .unwrap_or_else(|e| panic!("fixture unlimited Time: {}", e));

    let orog = Variable::from_shape_vec(
        &["lat", "lon"],
        &[grid.nlat, grid.nlon],
        vec![BASE_OROG; grid.layer_size()],
    )
    .map(|v| v.with_attribute("units", "m"));
    insert(&mut ds, "orog", orog);

    let mask = (0..grid.layer_size()).map(|i| (i % 3) as f64).collect();
    let slmsk = Variable::from_shape_vec(&["lat", "lon"], &[grid.nlat, grid.nlon], mask).map(|v| {
        v.with_storage(Storage::new(StorageType::I32))
            .with_attribute("long_name", "sea-land-ice mask")
    });
    insert(&mut ds, "slmsk", slmsk);

    let name = BASE_MODEL_NAME.as_bytes().to_vec();
    let model = TextVariable::new(&["nchars"], &[name.len()], TextContent::Chars(name))
        .unwrap_or_else(|e| panic!("fixture variable model: {}", e));
    ds.insert_text("model", model)
        .unwrap_or_else(|e| panic!("fixture insert model: {}", e));
    ds
}

/// Write [`base_state_dataset`] to `path`.
pub fn write_base_state<S: AsRef<str>>(path: &Path, grid: &GridSpec, variables: &[S], offset: f64) {
    write_state(path, &base_state_dataset(grid, variables, offset));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_spec_size() {
        assert_eq!(grid::TINY.size(), 24);
        assert_eq!(grid::COLUMN.layer_size(), 1);
    }

    #[test]
    fn test_state_dataset_layout() {
        let ds = state_dataset(&grid::TINY, &["ps", "t"], 0.0);
        assert_eq!(ds.variable("ps").unwrap().shape(), &[3, 4]);
        assert_eq!(ds.variable("t").unwrap().shape(), &[2, 3, 4]);
        assert!(ds.is_coordinate("lev"));
        assert_eq!(ds.data_variables().count(), 2);
    }

    #[test]
    fn test_base_state_extras() {
        let ds = base_state_dataset(&grid::TINY, &["t"], 0.0);
        assert!(ds.is_unlimited("Time"));
        assert_eq!(
            ds.variable("slmsk").unwrap().storage.map(|s| s.dtype),
            Some(StorageType::I32)
        );
        assert_eq!(
            ds.text_variable("model").unwrap().content(),
            &TextContent::Chars(b"FV3GFS".to_vec())
        );
        assert!(ds.variable("orog").unwrap().data().iter().all(|&v| v == BASE_OROG));
    }

    #[test]
    fn test_ensemble_dir() {
        assert_eq!(
            ensemble_dir(Path::new("/ens"), 6),
            PathBuf::from("/ens/f006")
        );
    }
}
