use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Format;

/// Static metadata for one evaluation, published once at start.
///
/// `formats` is the set of output formats the evaluation requires; negotiation assigns
/// exactly one consumer to each of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationDescription {
    /// Declared output formats.
    pub formats: BTreeSet<Format>,
    /// Free-form evaluation label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Name of the left (observed) variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_variable: Option<String>,
    /// Name of the right (predicted) variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_variable: Option<String>,
    /// Measurement unit of the paired values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_unit: Option<String>,
}

impl EvaluationDescription {
    /// Creates a description requiring the given formats.
    pub fn new(formats: impl IntoIterator<Item = Format>) -> Self {
        Self {
            formats: formats.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Attaches a label.
    #[inline]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Attaches the left and right variable names.
    #[inline]
    pub fn with_variables(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.left_variable = Some(left.into());
        self.right_variable = Some(right.into());
        self
    }

    /// Attaches the measurement unit.
    #[inline]
    pub fn with_measurement_unit(mut self, unit: impl Into<String>) -> Self {
        self.measurement_unit = Some(unit.into());
        self
    }
}
