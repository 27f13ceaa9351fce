use async_trait::async_trait;

use crate::CloudResult;

const VERSION_MARKERS: &[&str] = &["New version: v", "Use version: v"];

/// Result of one config-store CLI run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPublish {
    /// Captured stdout, shown to the operator.
    pub output: String,
    /// Revision the CLI reported, if any.
    pub revision: Option<u64>,
}

/// Versioned runtime configuration per environment.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Latest published revision for `environment`; `0` when nothing was published yet.
    async fn current_revision(&self, region: &str, environment: &str) -> CloudResult<u64>;

    /// Run the config-store CLI with `args`.
    async fn publish(&self, args: &[String]) -> CloudResult<ConfigPublish>;
}

/// Revision announced by the config-store CLI (`New version: vN` or `Use version: vN`).
pub fn parse_published_revision(output: &str) -> Option<u64> {
    VERSION_MARKERS.iter().find_map(|marker| {
        let start = output.find(marker)? + marker.len();
        let digits: String = output[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    })
}

/// Highest revision number among stored object keys under `prefix`.
///
/// The revision of a key is the first run of digits after the prefix.
pub fn latest_revision<'a>(prefix: &str, keys: impl IntoIterator<Item = &'a str>) -> u64 {
    keys.into_iter()
        .filter_map(|key| {
            let rest = key.strip_prefix(prefix)?;
            let digits: String = rest
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrapes_new_and_reused_versions() {
        assert_eq!(
            parse_published_revision("Uploading...\nNew version: v42\nDone"),
            Some(42)
        );
        assert_eq!(parse_published_revision("Use version: v7"), Some(7));
        assert_eq!(parse_published_revision("nothing changed"), None);
        assert_eq!(parse_published_revision("New version: vX"), None);
    }

    #[test]
    fn latest_revision_ignores_other_prefixes() {
        let keys = ["staging/3.env", "staging/12.env", "staging2/99.env", "production/50.env"];
        assert_eq!(latest_revision("staging/", keys), 12);
        assert_eq!(latest_revision("qa/", keys), 0);
    }
}
