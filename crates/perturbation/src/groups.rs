//! Variable groups subject to perturbation.
//!
//! Defines which model state variables are perturbed for each kind of file
//! handled by the pipeline: the atmospheric state, the lateral boundary
//! conditions and the land surface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PerturbationError, Result};

/// Atmospheric state variables.
pub const ATMO_VARIABLES: [&str; 8] = [
    "ps",    // Surface pressure
    "t",     // Temperature
    "zh",    // Height at layer interfaces
    "sphum", // Specific humidity
    "u_w",   // Zonal wind on west/east cell faces
    "v_w",   // Meridional wind on west/east cell faces
    "u_s",   // Zonal wind on south/north cell faces
    "v_s",   // Meridional wind on south/north cell faces
];

/// Lateral boundary faces, in the order boundary files list them.
pub const BOUNDARY_SUFFIXES: [&str; 4] = ["_bottom", "_top", "_right", "_left"];

/// Surface variables. Emissivity is perturbed in some ensembles but not here.
pub const SFC_VARIABLES: [&str; 6] = [
    "smc",   // Soil moisture
    "vfrac", // Vegetation fraction
    "alvsf", // Visible albedo, strong cosz dependency
    "alvwf", // Visible albedo, weak cosz dependency
    "alnsf", // Near-IR albedo, strong cosz dependency
    "alnwf", // Near-IR albedo, weak cosz dependency
];

/// A named set of variables perturbed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableGroup {
    /// Atmospheric state
    Atmo,
    /// Lateral boundary conditions
    Bndy,
    /// Land surface
    Sfc,
}

impl VariableGroup {
    pub const ALL: [VariableGroup; 3] = [Self::Atmo, Self::Bndy, Self::Sfc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Atmo => "atmo",
            Self::Bndy => "bndy",
            Self::Sfc => "sfc",
        }
    }

    /// Ordered variable names for this group.
    pub fn variables(&self) -> Vec<String> {
        match self {
            Self::Atmo => ATMO_VARIABLES.iter().map(|v| v.to_string()).collect(),
            Self::Bndy => ATMO_VARIABLES
                .iter()
                .flat_map(|var| {
                    BOUNDARY_SUFFIXES
                        .iter()
                        .map(move |suffix| format!("{}{}", var, suffix))
                })
                .collect(),
            Self::Sfc => SFC_VARIABLES.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl FromStr for VariableGroup {
    type Err = PerturbationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "atmo" => Ok(Self::Atmo),
            "bndy" => Ok(Self::Bndy),
            "sfc" => Ok(Self::Sfc),
            other => Err(PerturbationError::UnknownGroup(other.to_string())),
        }
    }
}

impl fmt::Display for VariableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve a group name to its ordered variable names.
pub fn resolve(group_name: &str) -> Result<Vec<String>> {
    Ok(group_name.parse::<VariableGroup>()?.variables())
}
