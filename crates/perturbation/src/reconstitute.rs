//! Reconstitution of full member states from perturbations and a base state.

use netcdf_dataset::{ops, Dataset, DatasetError, Variable};
use tracing::trace;

use crate::error::{PerturbationError, Result};
use crate::MEMBER_DIM;

/// Builds member states by adding one member's perturbations to a base
/// state.
///
/// Holds shared references only, so a single instance serves every member
/// of a forecast hour.
#[derive(Debug)]
pub struct Reconstitutor<'a> {
    perturbations: &'a Dataset,
    base: &'a Dataset,
    variables: Vec<String>,
    member_count: usize,
    location: String,
}

impl<'a> Reconstitutor<'a> {
    /// Check that every variable has a perturbation and record the ensemble
    /// size.
    pub fn new<S: AsRef<str>>(
        perturbations: &'a Dataset,
        base: &'a Dataset,
        variables: &[S],
    ) -> Result<Self> {
        let location = perturbations
            .source()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "perturbation dataset".to_string());

        let member_count =
            perturbations
                .dim_len(MEMBER_DIM)
                .ok_or_else(|| PerturbationError::Format {
                    location: location.clone(),
                    detail: format!("no '{}' dimension", MEMBER_DIM),
                })?;

        let variables: Vec<String> = variables.iter().map(|v| v.as_ref().to_string()).collect();
        if let Some(missing) = variables.iter().find(|v| !perturbations.contains(v)) {
            return Err(PerturbationError::MissingVariable {
                location,
                variable: missing.clone(),
            });
        }

        Ok(Self {
            perturbations,
            base,
            variables,
            member_count,
            location,
        })
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    /// Full state for member `index` (0-based).
    ///
    /// Every other variable of the base state is carried over untouched.
    pub fn member(&self, index: usize) -> Result<Dataset> {
        if index >= self.member_count {
            return Err(PerturbationError::MemberIndex {
                index,
                count: self.member_count,
            });
        }

        let mut state = self.base.clone();
        for name in &self.variables {
            let slice = self.member_slice(name, index)?;
            let combined = match self.base.variable(name) {
                Some(base_var) => ops::add(name, base_var, &slice).map_err(shape_error)?,
                None => {
                    trace!(variable = %name, "Variable absent from base state, using perturbation");
                    self.copy_coordinates(&slice, &mut state)?;
                    slice
                }
            };
            state.insert(name.as_str(), combined).map_err(shape_error)?;
        }
        Ok(state)
    }

    fn member_slice(&self, name: &str, index: usize) -> Result<Variable> {
        let pert = self
            .perturbations
            .variable(name)
            .ok_or_else(|| PerturbationError::MissingVariable {
                location: self.location.clone(),
                variable: name.to_string(),
            })?;
        match pert.axis_of(MEMBER_DIM) {
            Some(_) => pert
                .index_dim(MEMBER_DIM, index)
                .map_err(|e| PerturbationError::dataset(name, e)),
            None => Ok(pert.clone()),
        }
    }

    fn copy_coordinates(&self, slice: &Variable, state: &mut Dataset) -> Result<()> {
        for dim in slice.dims() {
            if state.contains(dim) || !self.perturbations.is_coordinate(dim) {
                continue;
            }
            if let Some(coord) = self.perturbations.variable(dim) {
                state.insert(dim.as_str(), coord.clone()).map_err(shape_error)?;
            }
        }
        Ok(())
    }
}

fn shape_error(err: DatasetError) -> PerturbationError {
    match err {
        DatasetError::ShapeMismatch {
            variable,
            dimension,
            expected,
            found,
        } => PerturbationError::ShapeMismatch {
            variable,
            dimension,
            base: expected,
            perturbation: found,
        },
        other => PerturbationError::dataset("reconstituted state", other),
    }
}

/// Reconstitute a single member without keeping a [`Reconstitutor`] around.
pub fn reconstitute<S: AsRef<str>>(
    perturbations: &Dataset,
    base: &Dataset,
    member_index: usize,
    variables: &[S],
) -> Result<Dataset> {
    Reconstitutor::new(perturbations, base, variables)?.member(member_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perturbations(values: &[f64]) -> Dataset {
        let mut ds = Dataset::new();
        ds.insert(
            "t",
            Variable::from_shape_vec(&[MEMBER_DIM], &[values.len()], values.to_vec()).unwrap(),
        )
        .unwrap();
        ds
    }

    fn base(t: f64) -> Dataset {
        let mut ds = Dataset::new();
        ds.insert("t", Variable::scalar(t).with_attribute("units", "K"))
            .unwrap();
        ds.insert("orog", Variable::scalar(120.0)).unwrap();
        ds
    }

    #[test]
    fn test_scalar_base_plus_members() {
        let p = perturbations(&[-1.0, 0.0, 1.0]);
        let b = base(10.0);
        let r = Reconstitutor::new(&p, &b, &["t"]).unwrap();
        assert_eq!(r.member_count(), 3);

        let got: Vec<f64> = (0..3)
            .map(|i| r.member(i).unwrap().variable("t").unwrap().data().sum())
            .collect();
        assert_eq!(got, vec![9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_other_base_variables_untouched() {
        let p = perturbations(&[-1.0, 1.0]);
        let b = base(10.0);
        let state = reconstitute(&p, &b, 1, &["t"]).unwrap();
        assert_eq!(state.variable("orog"), b.variable("orog"));
        assert_eq!(
            state.variable("t").unwrap().attributes.get("units"),
            Some(&"K".into())
        );
        // base is left as it was
        assert_eq!(b.variable("t").unwrap().data().sum(), 10.0);
    }

    #[test]
    fn test_missing_variable_names_perturbation_file() {
        let mut p = perturbations(&[-1.0, 1.0]);
        p.set_source("/data/pert/pert_f006.nc");
        let b = base(10.0);
        let err = Reconstitutor::new(&p, &b, &["t", "q"]).unwrap_err();
        match err {
            PerturbationError::MissingVariable { location, variable } => {
                assert_eq!(location, "/data/pert/pert_f006.nc");
                assert_eq!(variable, "q");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_member_index_out_of_range() {
        let p = perturbations(&[-1.0, 0.0, 1.0]);
        let b = base(10.0);
        let err = reconstitute(&p, &b, 3, &["t"]).unwrap_err();
        assert!(matches!(err, PerturbationError::MemberIndex { index: 3, count: 3 }));
    }

    #[test]
    fn test_broadcast_by_dimension_name() {
        let mut p = Dataset::new();
        p.insert(
            "t",
            Variable::from_shape_vec(&["x", MEMBER_DIM, "y"], &[2, 2, 3], (0..12).map(f64::from).collect())
                .unwrap(),
        )
        .unwrap();
        let mut b = Dataset::new();
        b.insert(
            "t",
            Variable::from_shape_vec(&["y", "x"], &[3, 2], vec![100.0; 6]).unwrap(),
        )
        .unwrap();

        let state = reconstitute(&p, &b, 1, &["t"]).unwrap();
        let t = state.variable("t").unwrap();
        assert_eq!(t.dims(), &["y".to_string(), "x".to_string()]);
        // p[x=1, ens=1, y=2] = 1*6 + 1*3 + 2 = 11
        assert_eq!(t.data()[[2, 1]], 111.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut p = Dataset::new();
        p.insert(
            "t",
            Variable::from_shape_vec(&[MEMBER_DIM, "x"], &[1, 3], vec![0.0; 3]).unwrap(),
        )
        .unwrap();
        let mut b = Dataset::new();
        b.insert("t", Variable::from_shape_vec(&["x"], &[4], vec![0.0; 4]).unwrap())
            .unwrap();

        let err = reconstitute(&p, &b, 0, &["t"]).unwrap_err();
        match err {
            PerturbationError::ShapeMismatch {
                dimension,
                base,
                perturbation,
                ..
            } => {
                assert_eq!(dimension, "x");
                assert_eq!((base, perturbation), (4, 3));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_variable_absent_from_base_gets_slice_and_coordinates() {
        let mut p = perturbations(&[-1.0, 1.0]);
        p.insert(
            "x",
            Variable::from_shape_vec(&["x"], &[2], vec![0.5, 1.5]).unwrap(),
        )
        .unwrap();
        p.insert(
            "q",
            Variable::from_shape_vec(&[MEMBER_DIM, "x"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        )
        .unwrap();
        let b = base(10.0);

        let state = reconstitute(&p, &b, 1, &["t", "q"]).unwrap();
        let q = state.variable("q").unwrap();
        assert_eq!(q.data().iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0]);
        assert!(state.is_coordinate("x"));
    }

    #[test]
    fn test_variable_absent_from_perturbations() {
        let p = perturbations(&[-1.0, 1.0]);
        let b = base(10.0);
        let err = Reconstitutor::new(&p, &b, &["t", "sphum"]).unwrap_err();
        assert!(matches!(err, PerturbationError::MissingVariable { ref variable, .. } if variable == "sphum"));
    }
}
