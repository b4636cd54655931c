//! Built-in checks the worker runs against each target.
//!
//! These are deliberately filesystem-level: existence, readability and
//! plausibility of the plugin artefact, plus consistency checks on
//! resolved plugin descriptions. Loading and exercising the plugin
//! binary itself belongs to format-specific suites layered on top.

use std::fs;
use std::path::Path;

use tracing::debug;

use crucible_proto::{PluginDescription, ValidationOptions, ValidationTarget};
use crucible_supervisor::TestSuite;

/// Tracing target for suite checks.
const SUITE_TARGET: &str = "crucible_cli::suite";

/// Strictness level at which optional plausibility checks switch on.
const STRICT_THRESHOLD: u8 = 8;

/// File extensions the strict checks recognise as plugin artefacts.
const KNOWN_EXTENSIONS: &[&str] = &["vst3", "component", "clap", "so", "dll", "dylib"];

/// The default validation suite.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicSuite;

impl TestSuite for BasicSuite {
    fn run(
        &self,
        target: &ValidationTarget,
        options: &ValidationOptions,
        log: &mut dyn FnMut(&str),
    ) -> u32 {
        debug!(
            target: SUITE_TARGET,
            target_id = %target.id(),
            strictness = options.strictness_level(),
            "running basic checks"
        );
        match target {
            ValidationTarget::Path { value } => check_path(Path::new(value), options, log),
            ValidationTarget::Description(description) => {
                check_description(description, options, log)
            }
        }
    }
}

fn check_path(path: &Path, options: &ValidationOptions, log: &mut dyn FnMut(&str)) -> u32 {
    if options.verbose() {
        log(&format!("inspecting {}", path.display()));
    }

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            log(&format!("cannot read {}: {err}", path.display()));
            return 1;
        }
    };

    let mut failures = 0u32;

    // Bundle formats (VST3, AU) ship as directories; single-file formats
    // must at least contain bytes.
    if metadata.is_file() && metadata.len() == 0 {
        log(&format!("{} is empty", path.display()));
        failures += 1;
    }

    if options.strictness_level() >= STRICT_THRESHOLD && !has_known_extension(path) {
        log(&format!(
            "{} has no recognised plugin extension",
            path.display()
        ));
        failures += 1;
    }

    failures
}

fn check_description(
    description: &PluginDescription,
    options: &ValidationOptions,
    log: &mut dyn FnMut(&str),
) -> u32 {
    if options.verbose() {
        log(&format!("inspecting description {}", description.id()));
    }

    let mut failures = 0u32;
    if description.name().is_empty() {
        log("plugin description has no name");
        failures += 1;
    }
    if description.unique_id().is_empty() {
        log("plugin description has no unique identifier");
        failures += 1;
    }
    if options.strictness_level() >= STRICT_THRESHOLD && description.manufacturer().is_empty() {
        log("plugin description has no manufacturer");
        failures += 1;
    }
    failures
}

fn has_known_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            KNOWN_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
}
