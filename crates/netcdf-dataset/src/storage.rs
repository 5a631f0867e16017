//! On-disk representation of numeric variables.
//!
//! Values live in memory as `f64` with missing points as NaN. A [`Storage`]
//! remembers how a variable was laid out in the file it came from (element
//! type, fill and missing values, packing) so that writing it back
//! reproduces the stored values exactly.

use crate::error::{DatasetError, DatasetResult};

/// Element type of a stored numeric variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl StorageType {
    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

/// How a numeric variable is encoded in a file.
#[derive(Debug, Clone, Copy)]
pub struct Storage {
    pub dtype: StorageType,
    pub fill_value: Option<f64>,
    pub missing_value: Option<f64>,
    pub scale_factor: Option<f64>,
    pub add_offset: Option<f64>,
}

impl PartialEq for Storage {
    // NaN fill values compare equal
    fn eq(&self, other: &Self) -> bool {
        let bits = |v: Option<f64>| v.map(f64::to_bits);
        self.dtype == other.dtype
            && bits(self.fill_value) == bits(other.fill_value)
            && bits(self.missing_value) == bits(other.missing_value)
            && bits(self.scale_factor) == bits(other.scale_factor)
            && bits(self.add_offset) == bits(other.add_offset)
    }
}

impl Storage {
    /// Plain storage with no fill value or packing.
    pub fn new(dtype: StorageType) -> Self {
        Self {
            dtype,
            fill_value: None,
            missing_value: None,
            scale_factor: None,
            add_offset: None,
        }
    }

    /// Float storage with NaN marking missing points.
    pub fn float_with_nan_fill(dtype: StorageType) -> Self {
        Self {
            fill_value: Some(f64::NAN),
            ..Self::new(dtype)
        }
    }

    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    pub fn with_packing(mut self, scale_factor: f64, add_offset: f64) -> Self {
        self.scale_factor = Some(scale_factor);
        self.add_offset = Some(add_offset);
        self
    }

    fn is_packed(&self) -> bool {
        self.scale_factor.is_some() || self.add_offset.is_some()
    }

    /// Stored value to physical value. Fill and missing values become NaN.
    pub fn decode(&self, raw: f64) -> f64 {
        if Some(raw) == self.fill_value || Some(raw) == self.missing_value {
            return f64::NAN;
        }
        if !self.is_packed() {
            return raw;
        }
        raw * self.scale_factor.unwrap_or(1.0) + self.add_offset.unwrap_or(0.0)
    }

    /// Physical value to stored value.
    ///
    /// NaN becomes the fill value (or the missing value). Integer types are
    /// rounded to the nearest representable step.
    pub fn encode(&self, value: f64, variable: &str) -> DatasetResult<f64> {
        if value.is_nan() {
            return match self.fill_value.or(self.missing_value) {
                Some(fill) => Ok(fill),
                None if self.dtype.is_float() => Ok(f64::NAN),
                None => Err(DatasetError::InvalidFormat(format!(
                    "'{}' has missing values but its {} storage has no fill value",
                    variable,
                    self.dtype.as_str()
                ))),
            };
        }
        let raw = if self.is_packed() {
            (value - self.add_offset.unwrap_or(0.0)) / self.scale_factor.unwrap_or(1.0)
        } else {
            value
        };
        if self.dtype.is_float() {
            Ok(raw)
        } else {
            Ok(raw.round())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpacked_float_is_identity() {
        let storage = Storage::float_with_nan_fill(StorageType::F64);
        let value = 273.123456789;
        assert_eq!(storage.encode(value, "t").unwrap().to_bits(), value.to_bits());
        assert_eq!(storage.decode(value).to_bits(), value.to_bits());
        assert!(storage.encode(f64::NAN, "t").unwrap().is_nan());
    }

    #[test]
    fn test_packed_short_round_trip() {
        let storage = Storage::new(StorageType::I16)
            .with_fill_value(-32767.0)
            .with_packing(0.01, 250.0);

        let raw = 1234.0;
        let value = storage.decode(raw);
        assert!((value - 262.34).abs() < 1e-9);
        assert_eq!(storage.encode(value, "t").unwrap(), raw);

        assert!(storage.decode(-32767.0).is_nan());
        assert_eq!(storage.encode(f64::NAN, "t").unwrap(), -32767.0);
    }

    #[test]
    fn test_missing_value_used_when_no_fill() {
        let storage = Storage {
            missing_value: Some(-999.0),
            ..Storage::new(StorageType::I32)
        };
        assert!(storage.decode(-999.0).is_nan());
        assert_eq!(storage.encode(f64::NAN, "mask").unwrap(), -999.0);
        assert_eq!(storage.encode(2.6, "mask").unwrap(), 3.0);
    }

    #[test]
    fn test_nan_in_integer_without_fill() {
        let storage = Storage::new(StorageType::I32);
        assert!(storage.encode(f64::NAN, "mask").is_err());
    }

    #[test]
    fn test_nan_fill_values_compare_equal() {
        assert_eq!(
            Storage::float_with_nan_fill(StorageType::F32),
            Storage::float_with_nan_fill(StorageType::F32)
        );
        assert_ne!(
            Storage::float_with_nan_fill(StorageType::F32),
            Storage::float_with_nan_fill(StorageType::F64)
        );
    }
}
