//! Parameter store.
//!
//! A [`ParameterSet`] is the growable authoring form: one [`ParameterBlock`] per
//! fit iteration, each tagged with the function type it parameterizes. Hot loops
//! read a [`FrozenParams`] buffer instead, built once and rebuilt whenever the
//! authoring form changes.

pub mod text;

use crate::functions::FunctionFamily;
use msc_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters fitted (or supplied) for one function at one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBlock {
    /// Iteration index the block belongs to.
    pub iteration: u32,
    /// Function type code within the family.
    pub function_type: u32,
    /// Parameter values, in function order.
    pub values: Vec<f64>,
    /// Parameter errors (same length as `values`; zero when unknown).
    #[serde(default)]
    pub errors: Vec<f64>,
}

impl ParameterBlock {
    /// Block with zero errors.
    pub fn new(iteration: u32, function_type: u32, values: Vec<f64>) -> Self {
        let errors = vec![0.0; values.len()];
        Self { iteration, function_type, values, errors }
    }

    /// Block with explicit errors.
    pub fn with_errors(iteration: u32, function_type: u32, values: Vec<f64>, errors: Vec<f64>) -> Self {
        Self { iteration, function_type, values, errors }
    }

    /// Freeze the values into an evaluation buffer.
    pub fn frozen(&self) -> FrozenParams {
        FrozenParams::from_slice(&self.values)
    }
}

/// Ordered multi-iteration parameter set for one function family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Family the function types refer to.
    pub family: FunctionFamily,
    /// Blocks in iteration order.
    pub blocks: Vec<ParameterBlock>,
}

impl ParameterSet {
    /// Empty set.
    pub fn new(family: FunctionFamily) -> Self {
        Self { family, blocks: Vec::new() }
    }

    /// Append a block after checking its length against the registry.
    ///
    /// Missing errors are filled with zeros.
    pub fn push(&mut self, mut block: ParameterBlock) -> Result<()> {
        if block.errors.is_empty() {
            block.errors = vec![0.0; block.values.len()];
        }
        let expected = self.family.n_params(block.function_type)?;
        if block.values.len() != expected {
            return Err(Error::Configuration(format!(
                "{} function type {} expects {expected} parameters, got {}",
                self.family,
                block.function_type,
                block.values.len()
            )));
        }
        if block.errors.len() != block.values.len() {
            return Err(Error::Configuration(format!(
                "{} block has {} values but {} errors",
                self.family,
                block.values.len(),
                block.errors.len()
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Check every block against the registry.
    pub fn validate(&self) -> Result<()> {
        let mut check = ParameterSet::new(self.family);
        for block in &self.blocks {
            check.push(block.clone())?;
        }
        Ok(())
    }

    /// Block of the last iteration, if any.
    pub fn last(&self) -> Option<&ParameterBlock> {
        self.blocks.last()
    }

    /// Function type codes per iteration.
    pub fn function_types(&self) -> Vec<u32> {
        self.blocks.iter().map(|b| b.function_type).collect()
    }

    /// All values concatenated in block order.
    pub fn to_vec(&self) -> Vec<f64> {
        self.blocks.iter().flat_map(|b| b.values.iter().copied()).collect()
    }

    /// Flat evaluation buffer over all blocks.
    pub fn frozen(&self) -> FrozenParams {
        let mut builder = ParameterBuilder::new();
        for block in &self.blocks {
            builder.extend(&block.values);
        }
        builder.freeze()
    }

    /// Load from a file. JSON is detected by a leading `{`, anything else is the text format.
    ///
    /// A JSON file whose family differs from `family` is rejected.
    pub fn load(path: impl AsRef<Path>, family: FunctionFamily) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let set = Self::from_str_any(&content, family)?;
        tracing::debug!(
            path = %path.display(),
            family = %set.family,
            blocks = set.blocks.len(),
            "loaded parameter set"
        );
        Ok(set)
    }

    /// Parse either representation from memory.
    pub fn from_str_any(content: &str, family: FunctionFamily) -> Result<Self> {
        if content.trim_start().starts_with('{') {
            let set: ParameterSet = serde_json::from_str(content)?;
            if set.family != family {
                return Err(Error::Configuration(format!(
                    "parameter file holds {} parameters, expected {family}",
                    set.family
                )));
            }
            let mut checked = ParameterSet::new(family);
            for block in set.blocks {
                checked.push(block)?;
            }
            Ok(checked)
        } else {
            text::parse(family, content)
        }
    }

    /// Write the text representation.
    pub fn save_text(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, text::write(self))?;
        Ok(())
    }

    /// Write the JSON representation.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Growable parameter sequence, frozen into [`FrozenParams`] for evaluation.
#[derive(Debug, Clone, Default)]
pub struct ParameterBuilder {
    values: Vec<f64>,
}

impl ParameterBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value.
    pub fn push(&mut self, value: f64) -> &mut Self {
        self.values.push(value);
        self
    }

    /// Append a block of values.
    pub fn extend(&mut self, values: &[f64]) -> &mut Self {
        self.values.extend_from_slice(values);
        self
    }

    /// Overwrite value `i`.
    pub fn set(&mut self, i: usize, value: f64) -> Result<()> {
        let len = self.values.len();
        let slot = self.values.get_mut(i).ok_or_else(|| {
            Error::Validation(format!("parameter index {i} out of range (len {len})"))
        })?;
        *slot = value;
        Ok(())
    }

    /// Current length.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no values were added.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Authoring view.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Snapshot into an evaluation buffer.
    pub fn freeze(&self) -> FrozenParams {
        FrozenParams::from_slice(&self.values)
    }

    /// Finish authoring and take the values.
    pub fn into_vec(self) -> Vec<f64> {
        self.values
    }
}

/// Fixed-length flat parameter buffer read by the evaluation loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrozenParams {
    values: Box<[f64]>,
}

impl FrozenParams {
    /// Copy a slice into a new buffer.
    pub fn from_slice(values: &[f64]) -> Self {
        Self { values: values.into() }
    }

    /// Replace the contents in place, reallocating only on a length change.
    pub fn refreeze(&mut self, values: &[f64]) {
        if self.values.len() == values.len() {
            self.values.copy_from_slice(values);
        } else {
            self.values = values.into();
        }
    }

    /// Flat view.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Buffer length.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for an empty buffer.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
