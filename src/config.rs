//! Construction parameters of a [`crate::BucketTree`].

use std::collections::HashSet;

use crate::error::HistogramError;

/// Attributes, budget and eviction strategy of a bucket tree.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    attributes: Vec<String>,
    bucket_budget: usize,
    penalty_cache: bool,
}

impl Config {
    /// Validates the attribute names and budget. The penalty cache is on by default.
    pub fn new<S: Into<String>>(
        attributes: impl IntoIterator<Item = S>,
        bucket_budget: usize,
    ) -> Result<Self, HistogramError> {
        let config = Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
            bucket_budget,
            penalty_cache: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Selects between the memoized best-merge search and a full scan on every eviction.
    /// Both pick the same merges.
    pub fn with_penalty_cache(mut self, enabled: bool) -> Self {
        self.penalty_cache = enabled;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), HistogramError> {
        if self.attributes.is_empty() {
            return Err(HistogramError::NoAttributes);
        }
        if self.bucket_budget == 0 {
            return Err(HistogramError::InvalidBudget);
        }
        let mut seen = HashSet::with_capacity(self.attributes.len());
        for name in &self.attributes {
            if !seen.insert(name.as_str()) {
                return Err(HistogramError::DuplicateAttribute(name.clone()));
            }
        }
        Ok(())
    }

    #[inline]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    #[inline]
    pub fn dims(&self) -> usize {
        self.attributes.len()
    }

    #[inline]
    pub fn bucket_budget(&self) -> usize {
        self.bucket_budget
    }

    #[inline]
    pub fn penalty_cache(&self) -> bool {
        self.penalty_cache
    }

    /// Position of `name` among the attributes.
    pub fn attribute_index(&self, name: &str) -> Result<usize, HistogramError> {
        self.attributes
            .iter()
            .position(|a| a == name)
            .ok_or_else(|| HistogramError::UnknownAttribute(name.to_string()))
    }
}
