//! Test data generators for synthetic model state fields.
//!
//! Values are deterministic so that tests can recompute what a reader
//! should see.

/// Creates a temperature-like field in Kelvin.
///
/// Warmest at the lowest level and the first row, with a gentle east-west
/// gradient. Values stay between about 200K and 310K.
pub fn create_temperature_field(nlev: usize, nlat: usize, nlon: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(nlev * nlat * nlon);
    for k in 0..nlev {
        let lapse = k as f64 / nlev.max(1) as f64 * 80.0;
        for j in 0..nlat {
            let y = j as f64 / nlat.max(1) as f64;
            for i in 0..nlon {
                let x = i as f64 / nlon.max(1) as f64;
                data.push(300.0 - lapse - y * 20.0 + x * 5.0);
            }
        }
    }
    data
}

/// Offset added to every value of member `member` (0-based) in a synthetic
/// ensemble of `members`.
///
/// Offsets are symmetric around zero, so the ensemble mean of
/// `field + member_offset(m, n)` is `field` itself.
pub fn member_offset(member: usize, members: usize) -> f64 {
    member as f64 - (members.saturating_sub(1)) as f64 / 2.0
}

/// Replace every `stride`-th value with NaN, starting at `start`.
pub fn with_nans(mut data: Vec<f64>, start: usize, stride: usize) -> Vec<f64> {
    let stride = stride.max(1);
    for i in (start..data.len()).step_by(stride) {
        data[i] = f64::NAN;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_range() {
        let field = create_temperature_field(4, 10, 10);
        assert!(field.iter().all(|&t| (200.0..=310.0).contains(&t)));
        assert!(field[0] > field[field.len() - 1]);
    }

    #[test]
    fn test_member_offsets_are_symmetric() {
        let offsets: Vec<f64> = (0..3).map(|m| member_offset(m, 3)).collect();
        assert_eq!(offsets, vec![-1.0, 0.0, 1.0]);
        let sum: f64 = (0..4).map(|m| member_offset(m, 4)).sum();
        assert_eq!(sum, 0.0);
    }

    #[test]
    fn test_with_nans() {
        let data = with_nans(vec![1.0; 6], 1, 2);
        assert!(data[0] == 1.0 && data[1].is_nan() && data[3].is_nan() && data[5].is_nan());
    }
}
