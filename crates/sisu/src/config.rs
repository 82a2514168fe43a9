//! Profile and region discovery.
//!
//! Profile names come from the shared AWS credential files under the user's
//! home directory. Discovery never fails: if neither file is readable the
//! single profile `default` is used, which matches the SDK's own fallback
//! chain.

use std::collections::BTreeSet;
use std::path::Path;

/// Regions shown when none are configured.
pub const DEFAULT_REGIONS: &[&str] = &[
    "us-east-1",
    "us-west-2",
    "eu-west-1",
    "eu-central-1",
    "ap-northeast-1",
];

/// Region sentinel for services that are not tied to a region.
pub const GLOBAL_REGION: &str = "global";

/// The region global services are actually served from.
pub(crate) const GLOBAL_HOME_REGION: &str = "us-east-1";

/// The default region list as owned strings.
pub fn default_regions() -> Vec<String> {
    DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect()
}

/// Enumerate profile names from `~/.aws/credentials` and `~/.aws/config`.
///
/// Section names from both files are merged and de-duplicated; the config
/// file's `profile ` prefix is stripped. `default` is always present.
pub fn load_profiles() -> Vec<String> {
    match dirs::home_dir() {
        Some(home) => profiles_from_dir(&home.join(".aws")),
        None => vec!["default".to_string()],
    }
}

/// Profile discovery against an explicit `.aws` directory.
pub fn profiles_from_dir(aws_dir: &Path) -> Vec<String> {
    let mut profiles = BTreeSet::new();
    profiles.insert("default".to_string());

    if let Ok(text) = std::fs::read_to_string(aws_dir.join("credentials")) {
        for name in section_names(&text) {
            profiles.insert(name.to_string());
        }
    }

    // The config file qualifies non-default sections as "profile <name>".
    if let Ok(text) = std::fs::read_to_string(aws_dir.join("config")) {
        for name in section_names(&text) {
            let name = name.strip_prefix("profile ").unwrap_or(name);
            profiles.insert(name.to_string());
        }
    }

    profiles.into_iter().collect()
}

/// Yield the `[section]` header names of an ini-style file.
fn section_names(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter_map(|line| {
        let line = line.trim();
        line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn write_aws_files(credentials: Option<&str>, config: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        if let Some(text) = credentials {
            std::fs::write(dir.path().join("credentials"), text).unwrap();
        }
        if let Some(text) = config {
            std::fs::write(dir.path().join("config"), text).unwrap();
        }
        dir
    }

    #[test]
    fn merges_profiles_from_both_files() {
        let dir = write_aws_files(
            Some("[default]\naws_access_key_id = AKIA\n\n[prod]\naws_access_key_id = AKIA\n"),
            Some("[profile staging]\nregion = eu-west-1\n"),
        );
        let profiles = profiles_from_dir(dir.path());
        assert_eq!(profiles, vec!["default", "prod", "staging"]);
    }

    #[test]
    fn strips_profile_prefix_and_dedups() {
        let dir = write_aws_files(
            Some("[prod]\n"),
            Some("[profile prod]\nregion = us-west-2\n[default]\n"),
        );
        let profiles = profiles_from_dir(dir.path());
        assert_eq!(profiles, vec!["default", "prod"]);
    }

    #[test]
    fn missing_files_fall_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(profiles_from_dir(dir.path()), vec!["default"]);
    }

    #[test]
    fn section_parsing_ignores_non_headers() {
        let names: Vec<_> =
            section_names("# comment\n[one]\nkey = [not a header]\n  [ two ]  \n").collect();
        assert_eq!(names, vec!["one", "two"]);
    }
}
