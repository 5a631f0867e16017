//! Native NetCDF reading and writing using the netcdf library.
//!
//! Numeric values are decoded to `f64` on read: fill and missing values
//! become NaN and packed integers are unpacked with `scale_factor` /
//! `add_offset`. Those encoding attributes are consumed by the decoder and
//! kept in the variable's [`Storage`] rather than among its attributes.
//! `char` and `string` variables are read as [`TextVariable`]s.
//!
//! On write each variable goes back in the type and encoding it was read
//! with, record dimensions stay unlimited, and data variables get deflate
//! compression. [`Precision::Single`] and [`Precision::Double`] force a float
//! type on every data variable instead.

use std::path::Path;
use std::sync::Once;

use netcdf::types::{FloatType, IntType, NcVariableType};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::dataset::{AttrValue, Dataset, TextContent, TextVariable, Variable};
use crate::error::{DatasetError, DatasetResult};
use crate::storage::{Storage, StorageType};

/// Attributes that describe the on-disk encoding rather than the data.
const ENCODING_ATTRIBUTES: [&str; 4] = ["_FillValue", "missing_value", "scale_factor", "add_offset"];

/// Silence HDF5's automatic error printing to stderr.
///
/// The HDF5 C library prints verbose error messages to stderr even when errors
/// are handled gracefully by the Rust code (e.g., when probing for optional
/// attributes that don't exist). This function disables that output by calling
/// H5Eset_auto2 with null handlers. It only needs to be called once per
/// process, but is safe to call multiple times.
///
/// **Important**: Call this function early in your program's startup (e.g., in main())
/// before any HDF5/NetCDF operations occur.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 is thread-safe and we're passing null pointers
        // to disable error output, which is a documented valid use.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// Storage type for data variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Precision {
    /// Type each variable was read with; `f64` for variables built in memory
    #[default]
    #[serde(rename = "source")]
    Source,
    /// 32-bit floats
    #[serde(rename = "f32")]
    Single,
    /// 64-bit floats
    #[serde(rename = "f64")]
    Double,
}

impl Precision {
    /// Parse from string (case-insensitive). Unknown values give `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "source" | "native" => Some(Self::Source),
            "f32" | "float" | "single" => Some(Self::Single),
            "f64" | "double" => Some(Self::Double),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Single => "f32",
            Self::Double => "f64",
        }
    }
}

/// How data variables are encoded when a dataset is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    pub precision: Precision,
    /// Deflate level 1-9, or `None` to store uncompressed.
    pub deflate_level: Option<i32>,
    /// Byte shuffle filter ahead of deflate.
    pub shuffle: bool,
}

impl Default for Encoding {
    fn default() -> Self {
        Self {
            precision: Precision::Source,
            deflate_level: Some(4),
            shuffle: true,
        }
    }
}

impl Encoding {
    /// Every data variable as plain `f64`, so values round-trip exactly
    /// whatever type they were read with.
    pub fn exact() -> Self {
        Self {
            precision: Precision::Double,
            ..Self::default()
        }
    }

    /// Storage for variable `var` under this encoding.
    fn storage_for(&self, var: &Variable, is_coordinate: bool) -> Storage {
        let forced = match self.precision {
            _ if is_coordinate => None,
            Precision::Source => None,
            Precision::Single => Some(StorageType::F32),
            Precision::Double => Some(StorageType::F64),
        };
        match (forced, var.storage) {
            (Some(dtype), _) => Storage::float_with_nan_fill(dtype),
            (None, Some(storage)) => storage,
            (None, None) if is_coordinate => Storage::new(StorageType::F64),
            (None, None) => Storage::float_with_nan_fill(StorageType::F64),
        }
    }
}

/// `char` element, which netcdf does not read as an integer type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
struct NcChar(u8);

// SAFETY: one byte, laid out as NC_CHAR.
unsafe impl netcdf::NcTypeDescriptor for NcChar {
    fn type_descriptor() -> NcVariableType {
        NcVariableType::Char
    }
}

/// Open a NetCDF file and read every variable.
///
/// Variables of compound, enum, opaque or vlen type cannot be represented
/// and are skipped with a warning.
pub fn open_dataset(path: impl AsRef<Path>) -> DatasetResult<Dataset> {
    let path = path.as_ref();
    silence_hdf5_errors();

    let file = netcdf::open(path).map_err(|e| DatasetError::netcdf(path, e))?;
    let mut ds = Dataset::new();
    ds.set_source(path);
    ds.attributes = read_attributes(file.attributes());

    for dim in file.dimensions() {
        let name = dim.name();
        ds.add_dimension(&name, dim.len())?;
        if dim.is_unlimited() {
            ds.set_unlimited(&name)?;
        }
    }

    for var in file.variables() {
        match var.vartype() {
            NcVariableType::Int(_) | NcVariableType::Float(_) => {
                ds.insert(var.name(), read_variable(path, &var)?)?
            }
            NcVariableType::Char | NcVariableType::String => {
                ds.insert_text(var.name(), read_text_variable(path, &var)?)?
            }
            other => warn!(
                path = %path.display(),
                variable = %var.name(),
                vartype = ?other,
                "Skipping variable of unsupported type"
            ),
        }
    }

    trace!(
        path = %path.display(),
        variables = ds.variable_names().count(),
        text_variables = ds.text_variables().count(),
        "Opened dataset"
    );
    Ok(ds)
}

/// Open a NetCDF file and decode only the named variables plus the
/// coordinate variables of their dimensions.
///
/// A named variable missing from the file is a `MissingVariable` error.
pub fn open_dataset_subset<S: AsRef<str>>(
    path: impl AsRef<Path>,
    names: &[S],
) -> DatasetResult<Dataset> {
    let path = path.as_ref();
    silence_hdf5_errors();

    let file = netcdf::open(path).map_err(|e| DatasetError::netcdf(path, e))?;
    let mut ds = Dataset::new();
    ds.set_source(path);
    ds.attributes = read_attributes(file.attributes());

    for name in names {
        let name = name.as_ref();
        let var = file
            .variable(name)
            .ok_or_else(|| DatasetError::MissingVariable(name.to_string()))?;
        for dim in var.dimensions() {
            let dim_name = dim.name();
            if ds.contains(&dim_name) {
                continue;
            }
            if let Some(coord) = file.variable(&dim_name) {
                if let Ok(decoded) = read_variable(path, &coord) {
                    ds.insert(dim_name, decoded)?;
                }
            }
        }
        ds.insert(name, read_variable(path, &var)?)?;
    }

    Ok(ds)
}

/// Write a dataset to a new NetCDF-4 file, replacing any existing file.
pub fn write_dataset(
    ds: &Dataset,
    path: impl AsRef<Path>,
    encoding: &Encoding,
) -> DatasetResult<()> {
    let path = path.as_ref();
    silence_hdf5_errors();

    let nc = |e: netcdf::Error| DatasetError::netcdf(path, e);

    let mut file = netcdf::create_with(path, netcdf::Options::NETCDF4).map_err(nc)?;

    for (name, &len) in ds.dimensions() {
        if ds.is_unlimited(name) {
            file.add_unlimited_dimension(name).map_err(nc)?;
        } else {
            file.add_dimension(name, len).map_err(nc)?;
        }
    }
    for (name, value) in &ds.attributes {
        file.add_attribute(name, to_netcdf_attr(value)).map_err(nc)?;
    }

    for (name, var) in ds.variables() {
        let dims: Vec<&str> = var.dims().iter().map(String::as_str).collect();
        let is_coordinate = ds.is_coordinate(name);
        let storage = encoding.storage_for(var, is_coordinate);

        let values = var
            .data()
            .iter()
            .map(|&v| storage.encode(v, name))
            .collect::<DatasetResult<Vec<f64>>>()?;

        let mut out = file
            .add_variable_with_type(name, &dims, &nc_type(storage.dtype))
            .map_err(nc)?;
        if !is_coordinate && !dims.is_empty() {
            // netCDF refuses filters on scalar variables
            if let Some(level) = encoding.deflate_level {
                out.set_compression(level, encoding.shuffle).map_err(nc)?;
            }
        }
        if let Some(fill) = storage.fill_value {
            out.put_attribute("_FillValue", typed_attr(storage.dtype, fill))
                .map_err(nc)?;
        }
        if let Some(missing) = storage.missing_value {
            out.put_attribute("missing_value", typed_attr(storage.dtype, missing))
                .map_err(nc)?;
        }
        if let Some(scale) = storage.scale_factor {
            out.put_attribute("scale_factor", scale).map_err(nc)?;
        }
        if let Some(offset) = storage.add_offset {
            out.put_attribute("add_offset", offset).map_err(nc)?;
        }
        for (attr, value) in &var.attributes {
            if ENCODING_ATTRIBUTES.contains(&attr.as_str()) {
                continue;
            }
            out.put_attribute(attr, to_netcdf_attr(value)).map_err(nc)?;
        }

        // netcdf converts the doubles to the variable's type
        if dims.is_empty() {
            out.put_values(&values, ..).map_err(nc)?;
        } else {
            let start = vec![0usize; dims.len()];
            out.put_values(&values, (start.as_slice(), var.shape()))
                .map_err(nc)?;
        }
    }

    for (name, var) in ds.text_variables() {
        let dims: Vec<&str> = var.dims().iter().map(String::as_str).collect();
        let mut out = match var.content() {
            TextContent::Chars(_) => file
                .add_variable_with_type(name, &dims, &NcVariableType::Char)
                .map_err(nc)?,
            TextContent::Strings(_) => file.add_string_variable(name, &dims).map_err(nc)?,
        };
        for (attr, value) in &var.attributes {
            out.put_attribute(attr, to_netcdf_attr(value)).map_err(nc)?;
        }

        match var.content() {
            TextContent::Chars(bytes) => {
                let chars: Vec<NcChar> = bytes.iter().copied().map(NcChar).collect();
                if dims.is_empty() {
                    out.put_values(&chars, ..).map_err(nc)?;
                } else {
                    let start = vec![0usize; dims.len()];
                    out.put_values(&chars, (start.as_slice(), var.shape()))
                        .map_err(nc)?;
                }
            }
            TextContent::Strings(strings) => {
                if dims.is_empty() {
                    if let Some(s) = strings.first() {
                        out.put_string(s, ..).map_err(nc)?;
                    }
                } else {
                    for (flat, s) in strings.iter().enumerate() {
                        let index = unravel(flat, var.shape());
                        out.put_string(s, index.as_slice()).map_err(nc)?;
                    }
                }
            }
        }
    }

    debug!(
        path = %path.display(),
        variables = ds.variable_names().count(),
        text_variables = ds.text_variables().count(),
        precision = encoding.precision.as_str(),
        "Wrote dataset"
    );
    Ok(())
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Decode one numeric variable to `f64`, recording how it was stored.
fn read_variable(path: &Path, var: &netcdf::Variable) -> DatasetResult<Variable> {
    let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

    let dtype = match var.vartype() {
        NcVariableType::Int(int) => storage_type_of_int(int),
        NcVariableType::Float(FloatType::F32) => StorageType::F32,
        NcVariableType::Float(FloatType::F64) => StorageType::F64,
        other => {
            return Err(DatasetError::InvalidFormat(format!(
                "variable '{}' has non-numeric type {:?}",
                var.name(),
                other
            )))
        }
    };
    let storage = Storage {
        dtype,
        fill_value: get_f64_attr(var, "_FillValue"),
        missing_value: get_f64_attr(var, "missing_value"),
        scale_factor: get_f64_attr(var, "scale_factor"),
        add_offset: get_f64_attr(var, "add_offset"),
    };

    let values: Vec<f64> = var
        .get_values::<f64, _>(..)
        .map_err(|e| DatasetError::netcdf(path, e))?
        .into_iter()
        .map(|raw| storage.decode(raw))
        .collect();

    let mut decoded = Variable::from_shape_vec(&dims, &shape, values)?.with_storage(storage);
    decoded.attributes = read_attributes(var.attributes())
        .into_iter()
        .filter(|(name, _)| !ENCODING_ATTRIBUTES.contains(&name.as_str()))
        .collect();
    Ok(decoded)
}

/// Read a `char` or `string` variable.
fn read_text_variable(path: &Path, var: &netcdf::Variable) -> DatasetResult<TextVariable> {
    let nc = |e: netcdf::Error| DatasetError::netcdf(path, e);
    let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

    let content = match var.vartype() {
        NcVariableType::Char => {
            let chars = var.get_values::<NcChar, _>(..).map_err(nc)?;
            TextContent::Chars(chars.into_iter().map(|c| c.0).collect())
        }
        _ if shape.is_empty() => TextContent::Strings(vec![var.get_string(..).map_err(nc)?]),
        _ => {
            let len: usize = shape.iter().product();
            let strings = (0..len)
                .map(|flat| var.get_string(unravel(flat, &shape).as_slice()).map_err(nc))
                .collect::<DatasetResult<Vec<String>>>()?;
            TextContent::Strings(strings)
        }
    };

    let mut text = TextVariable::new(&dims, &shape, content)?;
    text.attributes = read_attributes(var.attributes());
    Ok(text)
}

/// Row-major multi-index of element `flat` in an array of `shape`.
fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (axis, &len) in shape.iter().enumerate().rev() {
        let len = len.max(1);
        index[axis] = flat % len;
        flat /= len;
    }
    index
}

fn storage_type_of_int(int: IntType) -> StorageType {
    match int {
        IntType::I8 => StorageType::I8,
        IntType::U8 => StorageType::U8,
        IntType::I16 => StorageType::I16,
        IntType::U16 => StorageType::U16,
        IntType::I32 => StorageType::I32,
        IntType::U32 => StorageType::U32,
        IntType::I64 => StorageType::I64,
        IntType::U64 => StorageType::U64,
    }
}

fn nc_type(dtype: StorageType) -> NcVariableType {
    match dtype {
        StorageType::I8 => NcVariableType::Int(IntType::I8),
        StorageType::U8 => NcVariableType::Int(IntType::U8),
        StorageType::I16 => NcVariableType::Int(IntType::I16),
        StorageType::U16 => NcVariableType::Int(IntType::U16),
        StorageType::I32 => NcVariableType::Int(IntType::I32),
        StorageType::U32 => NcVariableType::Int(IntType::U32),
        StorageType::I64 => NcVariableType::Int(IntType::I64),
        StorageType::U64 => NcVariableType::Int(IntType::U64),
        StorageType::F32 => NcVariableType::Float(FloatType::F32),
        StorageType::F64 => NcVariableType::Float(FloatType::F64),
    }
}

/// A fill or missing value as an attribute of the variable's own type.
fn typed_attr(dtype: StorageType, value: f64) -> netcdf::AttributeValue {
    use netcdf::AttributeValue as A;

    match dtype {
        StorageType::I8 => A::Schar(value as i8),
        StorageType::U8 => A::Uchar(value as u8),
        StorageType::I16 => A::Short(value as i16),
        StorageType::U16 => A::Ushort(value as u16),
        StorageType::I32 => A::Int(value as i32),
        StorageType::U32 => A::Uint(value as u32),
        StorageType::I64 => A::Longlong(value as i64),
        StorageType::U64 => A::Ulonglong(value as u64),
        StorageType::F32 => A::Float(value as f32),
        StorageType::F64 => A::Double(value),
    }
}

fn read_attributes<'a>(
    attrs: impl Iterator<Item = netcdf::Attribute<'a>>,
) -> std::collections::BTreeMap<String, AttrValue> {
    attrs
        .filter_map(|attr| {
            let value = attr.value().ok().and_then(from_netcdf_attr)?;
            Some((attr.name().to_string(), value))
        })
        .collect()
}

fn from_netcdf_attr(value: netcdf::AttributeValue) -> Option<AttrValue> {
    use netcdf::AttributeValue as A;

    let ints = |v: Vec<i64>| -> Option<AttrValue> {
        v.into_iter()
            .map(|x| i32::try_from(x).ok())
            .collect::<Option<Vec<i32>>>()
            .map(AttrValue::Ints)
    };

    match value {
        A::Str(s) => Some(AttrValue::Text(s)),
        A::Strs(s) => Some(AttrValue::Text(s.join(","))),
        A::Float(x) => Some(AttrValue::Floats(vec![x])),
        A::Floats(x) => Some(AttrValue::Floats(x)),
        A::Double(x) => Some(AttrValue::Doubles(vec![x])),
        A::Doubles(x) => Some(AttrValue::Doubles(x)),
        A::Schar(x) => ints(vec![x as i64]),
        A::Schars(x) => ints(x.into_iter().map(i64::from).collect()),
        A::Uchar(x) => ints(vec![x as i64]),
        A::Uchars(x) => ints(x.into_iter().map(i64::from).collect()),
        A::Short(x) => ints(vec![x as i64]),
        A::Shorts(x) => ints(x.into_iter().map(i64::from).collect()),
        A::Ushort(x) => ints(vec![x as i64]),
        A::Ushorts(x) => ints(x.into_iter().map(i64::from).collect()),
        A::Int(x) => ints(vec![x as i64]),
        A::Ints(x) => ints(x.into_iter().map(i64::from).collect()),
        A::Uint(x) => ints(vec![x as i64]),
        A::Uints(x) => ints(x.into_iter().map(i64::from).collect()),
        A::Longlong(x) => ints(vec![x]),
        A::Longlongs(x) => ints(x),
        A::Ulonglong(x) => i64::try_from(x).ok().and_then(|x| ints(vec![x])),
        A::Ulonglongs(x) => x
            .into_iter()
            .map(|v| i64::try_from(v).ok())
            .collect::<Option<Vec<i64>>>()
            .and_then(ints),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn to_netcdf_attr(value: &AttrValue) -> netcdf::AttributeValue {
    use netcdf::AttributeValue as A;

    match value {
        AttrValue::Text(s) => A::Str(s.clone()),
        AttrValue::Ints(v) if v.len() == 1 => A::Int(v[0]),
        AttrValue::Ints(v) => A::Ints(v.clone()),
        AttrValue::Floats(v) if v.len() == 1 => A::Float(v[0]),
        AttrValue::Floats(v) => A::Floats(v.clone()),
        AttrValue::Doubles(v) if v.len() == 1 => A::Double(v[0]),
        AttrValue::Doubles(v) => A::Doubles(v.clone()),
    }
}

/// Check if a variable has an attribute with the given name.
/// This avoids HDF5 error spam when checking for optional attributes.
fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

/// Helper to get f64 attribute.
fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}
