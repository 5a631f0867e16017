//! Run planning helpers: forecast-hour lists and filename templates.

use crate::error::{PerturbationError, Result};

/// Expand command-line forecast-hour arguments into the hours to process.
///
/// - one value: that hour
/// - two values: `start..stop` in steps of 1
/// - three values: `start..stop` in steps of the third value
/// - more: the values as given
///
/// `stop` is exclusive.
pub fn expand_forecast_hours(args: &[u32]) -> Result<Vec<u32>> {
    let hours: Vec<u32> = match *args {
        [] => {
            return Err(PerturbationError::InvalidConfig(
                "at least one forecast hour is required".to_string(),
            ))
        }
        [fhr] => vec![fhr],
        [start, stop] => (start..stop).collect(),
        [start, stop, step] => {
            if step == 0 {
                return Err(PerturbationError::InvalidConfig(
                    "forecast hour increment must be > 0".to_string(),
                ));
            }
            (start..stop).step_by(step as usize).collect()
        }
        _ => args.to_vec(),
    };

    if hours.is_empty() {
        return Err(PerturbationError::InvalidConfig(format!(
            "forecast hour range {:?} is empty",
            args
        )));
    }
    Ok(hours)
}

/// Values substituted into a filename template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateFields {
    /// Forecast hour
    pub fhr: Option<u32>,
    /// 1-based member number
    pub mem: Option<u32>,
}

impl TemplateFields {
    pub fn hour(fhr: u32) -> Self {
        Self {
            fhr: Some(fhr),
            mem: None,
        }
    }

    /// Fields for a 0-based member index within an hour.
    pub fn member(fhr: u32, index: usize) -> Self {
        Self {
            fhr: Some(fhr),
            mem: Some(index as u32 + 1),
        }
    }

    fn get(&self, name: &str) -> Option<u32> {
        match name {
            "fhr" => self.fhr,
            "mem" => self.mem,
            _ => None,
        }
    }
}

/// Substitute `{fhr}` and `{mem}` placeholders.
///
/// A placeholder may carry a width, `{fhr:03}` or `{fhr:03d}`; a leading
/// zero pads with zeros, otherwise with spaces. Placeholders with no value
/// and unknown placeholders are left as they are.
pub fn render_template(template: &str, fields: TemplateFields) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let Some(close) = after.find('}') else {
            out.push_str(after);
            return out;
        };

        let placeholder = &after[..=close];
        match render_placeholder(&after[1..close], &fields) {
            Some(value) => out.push_str(&value),
            None => out.push_str(placeholder),
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn render_placeholder(inner: &str, fields: &TemplateFields) -> Option<String> {
    let (name, spec) = match inner.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (inner, None),
    };
    let value = fields.get(name)?;

    let Some(spec) = spec else {
        return Some(value.to_string());
    };
    let digits = spec.strip_suffix('d').unwrap_or(spec);
    if digits.is_empty() {
        return Some(value.to_string());
    }
    let width: usize = digits.parse().ok()?;
    if digits.starts_with('0') {
        Some(format!("{:0width$}", value, width = width))
    } else {
        Some(format!("{:>width$}", value, width = width))
    }
}
