//! In-memory labeled datasets.
//!
//! A [`Dataset`] is a set of named variables sharing a table of named
//! dimensions. Every [`Variable`] carries its dimension names alongside an
//! `f64` array, so arithmetic between variables can line axes up by name
//! rather than by position.
//!
//! Text variables (`char` and `string` arrays) take no part in arithmetic
//! and are carried alongside as [`TextVariable`]s so a dataset read from a
//! file can be written back whole.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};

use crate::error::{DatasetError, DatasetResult};
use crate::storage::Storage;

/// Attribute value attached to a variable or to a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Ints(Vec<i32>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Doubles(vec![value])
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Ints(vec![value])
    }
}

/// A named-dimension array with attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    data: ArrayD<f64>,
    pub attributes: BTreeMap<String, AttrValue>,
    /// Encoding in the file this variable was read from
    pub storage: Option<Storage>,
}

impl Variable {
    /// Create a variable, checking that there is one dimension name per axis.
    pub fn new<I, S>(dims: I, data: ArrayD<f64>) -> DatasetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        if dims.len() != data.ndim() {
            return Err(DatasetError::InvalidFormat(format!(
                "{} dimension names given for a {}-dimensional array",
                dims.len(),
                data.ndim()
            )));
        }
        for (i, dim) in dims.iter().enumerate() {
            if dims[..i].contains(dim) {
                return Err(DatasetError::InvalidFormat(format!(
                    "dimension '{}' repeated",
                    dim
                )));
            }
        }
        Ok(Self {
            dims,
            data,
            attributes: BTreeMap::new(),
            storage: None,
        })
    }

    /// A zero-dimensional variable holding a single value.
    pub fn scalar(value: f64) -> Self {
        Self {
            dims: Vec::new(),
            data: ArrayD::from_elem(IxDyn(&[]), value),
            attributes: BTreeMap::new(),
            storage: None,
        }
    }

    /// Build a variable from row-major values and a shape.
    pub fn from_shape_vec<S: Into<String> + Clone>(
        dims: &[S],
        shape: &[usize],
        values: Vec<f64>,
    ) -> DatasetResult<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| DatasetError::InvalidFormat(e.to_string()))?;
        Self::new(dims.iter().cloned(), data)
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Replace dims and data while keeping this variable's attributes and
    /// storage.
    pub fn with_data<I, S>(&self, dims: I, data: ArrayD<f64>) -> DatasetResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut var = Self::new(dims, data)?;
        var.attributes = self.attributes.clone();
        var.storage = self.storage;
        Ok(var)
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Position of the named dimension among this variable's axes.
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Length of the named dimension, if this variable has it.
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|axis| self.data.len_of(Axis(axis)))
    }

    /// View of the data with axes reordered and expanded to follow `dims`.
    ///
    /// Dimensions this variable lacks become length-1 axes, ready for
    /// broadcasting. Returns `None` if the variable has a dimension that is
    /// not in `dims`.
    pub fn aligned_view(&self, dims: &[String]) -> Option<ArrayViewD<'_, f64>> {
        if self.dims.iter().any(|d| !dims.contains(d)) {
            return None;
        }
        let order: Vec<usize> = dims.iter().filter_map(|d| self.axis_of(d)).collect();
        let mut view = self.data.view().permuted_axes(IxDyn(&order));
        for (axis, dim) in dims.iter().enumerate() {
            if self.axis_of(dim).is_none() {
                view = view.insert_axis(Axis(axis));
            }
        }
        Some(view)
    }

    /// Select one position along `dim`, dropping that dimension.
    pub fn index_dim(&self, dim: &str, index: usize) -> DatasetResult<Self> {
        let axis = self
            .axis_of(dim)
            .ok_or_else(|| DatasetError::MissingData(format!("dimension {}", dim)))?;
        let len = self.data.len_of(Axis(axis));
        if index >= len {
            return Err(DatasetError::InvalidFormat(format!(
                "index {} out of range for dimension '{}' of length {}",
                index, dim, len
            )));
        }
        let dims: Vec<String> = self.dims.iter().filter(|d| *d != dim).cloned().collect();
        self.with_data(dims, self.data.index_axis(Axis(axis), index).to_owned())
    }
}

/// Contents of a text variable in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextContent {
    /// `char` array, one byte per element
    Chars(Vec<u8>),
    /// `string` array, one string per element
    Strings(Vec<String>),
}

impl TextContent {
    pub fn len(&self) -> usize {
        match self {
            Self::Chars(c) => c.len(),
            Self::Strings(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A non-numeric variable carried through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct TextVariable {
    dims: Vec<String>,
    shape: Vec<usize>,
    content: TextContent,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl TextVariable {
    pub fn new<S: Into<String> + Clone>(
        dims: &[S],
        shape: &[usize],
        content: TextContent,
    ) -> DatasetResult<Self> {
        let expected: usize = shape.iter().product();
        if dims.len() != shape.len() || content.len() != expected {
            return Err(DatasetError::InvalidFormat(format!(
                "text variable with {} dimension names, shape {:?} and {} elements",
                dims.len(),
                shape,
                content.len()
            )));
        }
        Ok(Self {
            dims: dims.iter().cloned().map(Into::into).collect(),
            shape: shape.to_vec(),
            content,
            attributes: BTreeMap::new(),
        })
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn content(&self) -> &TextContent {
        &self.content
    }
}

/// Collection of variables over a shared set of named dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    dimensions: BTreeMap<String, usize>,
    unlimited: BTreeSet<String>,
    variables: BTreeMap<String, Variable>,
    text: BTreeMap<String, TextVariable>,
    source: Option<PathBuf>,
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// File this dataset was read from.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn set_source(&mut self, path: impl Into<PathBuf>) {
        self.source = Some(path.into());
    }

    /// Register a dimension no variable uses yet. A known dimension must
    /// keep its length.
    pub fn add_dimension(&mut self, name: &str, len: usize) -> DatasetResult<()> {
        match self.dimensions.get(name) {
            Some(&expected) if expected != len => {
                Err(DatasetError::shape_mismatch(name, name, expected, len))
            }
            Some(_) => Ok(()),
            None => {
                self.dimensions.insert(name.to_string(), len);
                Ok(())
            }
        }
    }

    /// Mark a registered dimension as unlimited (record dimension).
    pub fn set_unlimited(&mut self, name: &str) -> DatasetResult<()> {
        if !self.dimensions.contains_key(name) {
            return Err(DatasetError::MissingData(format!("dimension {}", name)));
        }
        self.unlimited.insert(name.to_string());
        Ok(())
    }

    pub fn is_unlimited(&self, name: &str) -> bool {
        self.unlimited.contains(name)
    }

    pub fn dimensions(&self) -> &BTreeMap<String, usize> {
        &self.dimensions
    }

    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.dimensions.get(dim).copied()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Whether a numeric variable named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn text_variable(&self, name: &str) -> Option<&TextVariable> {
        self.text.get(name)
    }

    pub fn text_variables(&self) -> impl Iterator<Item = (&str, &TextVariable)> {
        self.text.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Whether `name` is a coordinate variable (a 1-D variable named after
    /// its own dimension).
    pub fn is_coordinate(&self, name: &str) -> bool {
        self.variables
            .get(name)
            .map(|v| v.dims().len() == 1 && v.dims()[0] == name)
            .unwrap_or(false)
    }

    /// Variables that are not coordinate variables.
    pub fn data_variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.variables()
            .filter(move |(name, _)| !self.is_coordinate(name))
    }

    /// Add or replace a variable.
    ///
    /// Dimensions the dataset has not seen yet are registered with the
    /// variable's lengths; known dimensions must match.
    pub fn insert(&mut self, name: impl Into<String>, var: Variable) -> DatasetResult<()> {
        let name = name.into();
        self.register_dims(&name, var.dims(), var.shape())?;
        self.text.remove(&name);
        self.variables.insert(name, var);
        Ok(())
    }

    /// Add or replace a text variable, with the same dimension checks as
    /// [`Dataset::insert`].
    pub fn insert_text(&mut self, name: impl Into<String>, var: TextVariable) -> DatasetResult<()> {
        let name = name.into();
        self.register_dims(&name, var.dims(), var.shape())?;
        self.variables.remove(&name);
        self.text.insert(name, var);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.variables.remove(name)
    }

    fn register_dims(&mut self, name: &str, dims: &[String], shape: &[usize]) -> DatasetResult<()> {
        for (dim, &len) in dims.iter().zip(shape) {
            if let Some(&expected) = self.dimensions.get(dim) {
                if expected != len {
                    return Err(DatasetError::shape_mismatch(name, dim, expected, len));
                }
            }
        }
        for (dim, &len) in dims.iter().zip(shape) {
            self.dimensions.entry(dim.clone()).or_insert(len);
        }
        Ok(())
    }
}
