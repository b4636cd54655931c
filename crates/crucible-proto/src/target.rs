//! Identification of the plugins a validation run operates on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One plugin to validate: either a raw path/identifier string, or a
/// plugin description that has already been resolved by a discovery
/// layer.
///
/// # Example
///
/// ```
/// use crucible_proto::ValidationTarget;
///
/// let target = ValidationTarget::path("/plugins/Reverb.vst3");
/// assert_eq!(target.id(), "/plugins/Reverb.vst3");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationTarget {
    /// A filesystem path or textual plugin identifier.
    Path {
        /// The path or identifier as given by the caller.
        value: String,
    },
    /// A plugin description resolved ahead of time.
    Description(PluginDescription),
}

impl ValidationTarget {
    /// Creates a path/identifier target.
    #[must_use]
    pub fn path(value: impl Into<String>) -> Self {
        Self::Path {
            value: value.into(),
        }
    }

    /// Returns the stable identifier used in progress events.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Path { value } => value.clone(),
            Self::Description(description) => description.id(),
        }
    }
}

impl fmt::Display for ValidationTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.id())
    }
}

/// A resolved plugin description.
///
/// Mirrors what a discovery layer knows about a plugin before it is
/// loaded: the hosting format, the format-scoped unique identifier, and
/// the vendor strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescription {
    format: String,
    unique_id: String,
    manufacturer: String,
    name: String,
}

impl PluginDescription {
    /// Creates a description from its four identifying fields.
    #[must_use]
    pub fn new(
        format: impl Into<String>,
        unique_id: impl Into<String>,
        manufacturer: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            format: format.into(),
            unique_id: unique_id.into(),
            manufacturer: manufacturer.into(),
            name: name.into(),
        }
    }

    /// Returns the hosting format, e.g. `VST3`.
    #[must_use]
    pub const fn format(&self) -> &str {
        self.format.as_str()
    }

    /// Returns the format-scoped unique identifier.
    #[must_use]
    pub const fn unique_id(&self) -> &str {
        self.unique_id.as_str()
    }

    /// Returns the manufacturer string.
    #[must_use]
    pub const fn manufacturer(&self) -> &str {
        self.manufacturer.as_str()
    }

    /// Returns the plugin display name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the identifier used in progress events.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}-{}", self.format, self.unique_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_target_id_is_the_path() {
        let target = ValidationTarget::path("/opt/plugins/Gain.so");
        assert_eq!(target.id(), "/opt/plugins/Gain.so");
        assert_eq!(target.to_string(), "/opt/plugins/Gain.so");
    }

    #[test]
    fn description_target_id_combines_format_and_unique_id() {
        let description = PluginDescription::new("VST3", "abcd1234", "Acme", "Gain");
        let target = ValidationTarget::Description(description);
        assert_eq!(target.id(), "VST3-abcd1234");
    }

    #[test]
    fn target_round_trips_through_json() {
        let targets = vec![
            ValidationTarget::path("a/b.vst3"),
            ValidationTarget::Description(PluginDescription::new("AU", "au77", "Acme", "Echo")),
        ];
        let json = serde_json::to_string(&targets).expect("serialise");
        let back: Vec<ValidationTarget> = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back, targets);
    }
}
