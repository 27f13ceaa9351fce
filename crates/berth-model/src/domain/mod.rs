mod kv;
pub use kv::KeyValue;

mod task_env;
pub use task_env::TaskEnv;

mod tag;
pub use tag::{ArtifactTag, TagError};

use std::fmt;
use std::path::PathBuf;

/// Build-context identity used to deduplicate image builds.
///
/// Services with the same dockerfile and context directory share one build,
/// whatever their names or image names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildKey {
    pub dockerfile: PathBuf,
    pub context: PathBuf,
}

/// One `(service, region, environment)` fan-out triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeployTarget {
    pub service: String,
    pub region: String,
    pub environment: String,
    pub repository_url: String,
}

impl fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.region, self.environment)
    }
}

/// Optional environment filter supplied by the caller; empty means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentFilter(Vec<String>);

impl EnvironmentFilter {
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn only<I, S>(environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(environments.into_iter().map(Into::into).collect())
    }

    #[inline]
    pub fn matches(&self, environment: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|e| e == environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EnvironmentFilter::all();
        assert!(filter.matches("staging"));
        assert!(filter.matches("production"));
    }

    #[test]
    fn explicit_filter_matches_listed_only() {
        let filter = EnvironmentFilter::only(["staging"]);
        assert!(filter.matches("staging"));
        assert!(!filter.matches("production"));
    }

    #[test]
    fn target_display_is_slash_joined() {
        let t = DeployTarget {
            service: "web".into(),
            region: "us-west-2".into(),
            environment: "staging".into(),
            repository_url: "repo".into(),
        };
        assert_eq!(t.to_string(), "web/us-west-2/staging");
    }
}
