//! Mount-relative path parsing.
//!
//! Every path below the mount root follows the fixed skeleton
//! `profile/region/service/subpath`. Parsing is a pure split; validation of
//! each level is the engine's job.

/// A mount-relative path split into its skeleton levels.
///
/// Missing trailing levels are empty strings, so `prod/us-east-1` parses to
/// an empty `service` and `subpath`. The subpath is opaque here and
/// interpreted only by the provider it is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPath<'a> {
    pub profile: &'a str,
    pub region: &'a str,
    pub service: &'a str,
    pub subpath: &'a str,
}

impl<'a> ParsedPath<'a> {
    /// Split a mount-relative path. Returns `None` only for the empty path
    /// (the mount root), which has no profile level.
    pub fn parse(path: &'a str) -> Option<Self> {
        if path.is_empty() {
            return None;
        }

        let mut parts = path.splitn(4, '/');
        Some(Self {
            profile: parts.next().unwrap_or_default(),
            region: parts.next().unwrap_or_default(),
            service: parts.next().unwrap_or_default(),
            subpath: parts.next().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_profile() {
        assert_eq!(ParsedPath::parse(""), None);
    }

    #[test]
    fn partial_paths_leave_trailing_levels_empty() {
        let p = ParsedPath::parse("prod").unwrap();
        assert_eq!((p.profile, p.region, p.service, p.subpath), ("prod", "", "", ""));

        let p = ParsedPath::parse("prod/us-east-1").unwrap();
        assert_eq!(
            (p.profile, p.region, p.service, p.subpath),
            ("prod", "us-east-1", "", "")
        );

        let p = ParsedPath::parse("prod/us-east-1/ssm").unwrap();
        assert_eq!(
            (p.profile, p.region, p.service, p.subpath),
            ("prod", "us-east-1", "ssm", "")
        );
    }

    #[test]
    fn subpath_keeps_its_own_separators() {
        let p = ParsedPath::parse("default/global/s3/bucket/logs/app.log").unwrap();
        assert_eq!(p.profile, "default");
        assert_eq!(p.region, "global");
        assert_eq!(p.service, "s3");
        assert_eq!(p.subpath, "bucket/logs/app.log");
    }
}
