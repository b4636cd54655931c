//! Immutable configuration value for a validation run.
//!
//! [`ValidationOptions`] travels inside the request frame and is applied
//! uniformly to every target in the run. It is constructed once via the
//! builder-style `with_*` methods and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Default strictness applied when the caller does not choose one.
const DEFAULT_STRICTNESS: u8 = 5;

/// Default per-target timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Configuration for a validation run.
///
/// # Example
///
/// ```
/// use crucible_proto::ValidationOptions;
///
/// let options = ValidationOptions::default()
///     .with_strictness(8)
///     .with_categories(vec!["basic".into(), "parameters".into()]);
/// assert_eq!(options.strictness_level(), 8);
/// assert_eq!(options.categories().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOptions {
    strictness_level: u8,
    timeout_ms: u64,
    verbose: bool,
    random_seed: i64,
    repeats: u32,
    #[serde(with = "comma_list")]
    categories: Vec<String>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            strictness_level: DEFAULT_STRICTNESS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            verbose: false,
            random_seed: 0,
            repeats: 1,
            categories: Vec::new(),
        }
    }
}

impl ValidationOptions {
    /// Sets the strictness level, clamped to the 1..=10 range.
    #[must_use]
    pub fn with_strictness(mut self, level: u8) -> Self {
        self.strictness_level = level.clamp(1, 10);
        self
    }

    /// Sets the per-target timeout in milliseconds.
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Enables or disables verbose logging from the test suite.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets the randomisation seed handed to the test suite.
    #[must_use]
    pub const fn with_random_seed(mut self, seed: i64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Sets how many times each target is exercised.
    #[must_use]
    pub const fn with_repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    /// Restricts the run to the named check categories.
    ///
    /// An empty list means every category is enabled. Empty tokens are
    /// dropped because the transport encoding cannot represent them.
    #[must_use]
    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories.into_iter().filter(|c| !c.is_empty()).collect();
        self
    }

    /// Returns the strictness level (1..=10).
    #[must_use]
    pub const fn strictness_level(&self) -> u8 {
        self.strictness_level
    }

    /// Returns the per-target timeout in milliseconds.
    #[must_use]
    pub const fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Returns whether verbose suite logging is requested.
    #[must_use]
    pub const fn verbose(&self) -> bool {
        self.verbose
    }

    /// Returns the randomisation seed.
    #[must_use]
    pub const fn random_seed(&self) -> i64 {
        self.random_seed
    }

    /// Returns how many times each target is exercised.
    #[must_use]
    pub const fn repeats(&self) -> u32 {
        self.repeats
    }

    /// Returns the enabled check categories; empty means all.
    #[must_use]
    pub fn categories(&self) -> &[String] {
        &self.categories
    }
}

/// Serde representation for list-valued fields: a comma-joined token
/// string.
///
/// The empty list maps to the empty string and back. Bare empty tokens
/// are forbidden by the format, so a list containing an empty string is
/// not representable and decoding drops empty tokens.
mod comma_list {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(values: &[String], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&values.join(","))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let joined = String::deserialize(deserializer)?;
        if joined.chars().any(|c| c == ',') && joined.split(',').any(str::is_empty) {
            return Err(D::Error::custom("empty token in comma-joined list"));
        }
        Ok(joined
            .split(',')
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect())
    }
}
