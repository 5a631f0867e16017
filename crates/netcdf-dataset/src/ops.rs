//! Arithmetic between variables aligned by dimension name.

use ndarray::IxDyn;

use crate::dataset::Variable;
use crate::error::{DatasetError, DatasetResult};

/// Dimension names and lengths of the broadcast of `lhs` against `rhs`.
///
/// The result lists `lhs` dimensions first, then the dimensions only `rhs`
/// has. A dimension present in both with different lengths is a
/// `ShapeMismatch` reported against `name`.
pub fn broadcast_dims(
    name: &str,
    lhs: &Variable,
    rhs: &Variable,
) -> DatasetResult<(Vec<String>, Vec<usize>)> {
    let mut dims: Vec<String> = lhs.dims().to_vec();
    let mut shape: Vec<usize> = lhs.shape().to_vec();

    for (dim, &len) in rhs.dims().iter().zip(rhs.shape()) {
        match lhs.dim_len(dim) {
            Some(expected) if expected != len => {
                return Err(DatasetError::shape_mismatch(name, dim, expected, len));
            }
            Some(_) => {}
            None => {
                dims.push(dim.clone());
                shape.push(len);
            }
        }
    }

    Ok((dims, shape))
}

/// Elementwise `lhs + rhs`, broadcasting each side over the dimensions it
/// lacks. Attributes are taken from `lhs`.
pub fn add(name: &str, lhs: &Variable, rhs: &Variable) -> DatasetResult<Variable> {
    let (dims, shape) = broadcast_dims(name, lhs, rhs)?;

    let broadcast = |var: &Variable| {
        var.aligned_view(&dims)
            .ok_or_else(|| DatasetError::InvalidFormat(format!("cannot align '{}'", name)))
    };
    let left = broadcast(lhs)?;
    let right = broadcast(rhs)?;

    let left = left
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| DatasetError::InvalidFormat(format!("cannot broadcast '{}'", name)))?;
    let right = right
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| DatasetError::InvalidFormat(format!("cannot broadcast '{}'", name)))?;

    lhs.with_data(dims.clone(), &left + &right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_add_same_dims() {
        let a = Variable::new(["x"], arr1(&[1.0, 2.0]).into_dyn()).unwrap();
        let b = Variable::new(["x"], arr1(&[10.0, 20.0]).into_dyn()).unwrap();
        let sum = add("v", &a, &b).unwrap();
        assert_eq!(sum.data(), &arr1(&[11.0, 22.0]).into_dyn());
    }

    #[test]
    fn test_add_broadcasts_by_name() {
        let base = Variable::new(["y", "x"], arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn())
            .unwrap()
            .with_attribute("units", "K");
        let pert = Variable::new(["x"], arr1(&[0.5, -0.5]).into_dyn()).unwrap();

        let sum = add("t", &base, &pert).unwrap();
        assert_eq!(sum.dims(), base.dims());
        assert_eq!(sum.data(), &arr2(&[[1.5, 1.5], [3.5, 3.5]]).into_dyn());
        assert_eq!(sum.attributes, base.attributes);
    }

    #[test]
    fn test_add_transposed_operand() {
        let base = Variable::new(["y", "x"], arr2(&[[0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]).into_dyn())
            .unwrap();
        let pert = Variable::new(["x", "y"], arr2(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]).into_dyn())
            .unwrap();
        let sum = add("t", &base, &pert).unwrap();
        assert_eq!(sum.data(), &arr2(&[[1.0, 3.0, 5.0], [2.0, 4.0, 6.0]]).into_dyn());
    }

    #[test]
    fn test_add_appends_missing_dims() {
        let base = Variable::scalar(10.0);
        let pert = Variable::new(["x"], arr1(&[-1.0, 1.0]).into_dyn()).unwrap();
        let sum = add("t", &base, &pert).unwrap();
        assert_eq!(sum.dims(), &["x".to_string()]);
        assert_eq!(sum.data(), &arr1(&[9.0, 11.0]).into_dyn());
    }

    #[test]
    fn test_add_rejects_length_mismatch() {
        let a = Variable::new(["x"], arr1(&[1.0, 2.0]).into_dyn()).unwrap();
        let b = Variable::new(["x"], arr1(&[1.0, 2.0, 3.0]).into_dyn()).unwrap();
        let err = add("t", &a, &b).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::ShapeMismatch { expected: 2, found: 3, .. }
        ));
    }
}
