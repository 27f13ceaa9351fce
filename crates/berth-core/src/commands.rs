//! Named exec shortcuts.

use std::collections::BTreeMap;

use thiserror::Error;

use berth_model::ProjectConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShortcutError {
    #[error("unknown shortcut '{0}'")]
    Unknown(String),
    #[error("shortcut '{0}' has an empty command")]
    Empty(String),
}

/// Shortcut name to command prefix, split into words.
#[derive(Debug, Clone, Default)]
pub struct ShortcutRegistry {
    entries: BTreeMap<String, Vec<String>>,
}

impl ShortcutRegistry {
    pub fn builder() -> ShortcutRegistryBuilder {
        ShortcutRegistryBuilder::default()
    }

    /// Registry holding every entry of the project's `exec` map.
    pub fn from_config(config: &ProjectConfig) -> Result<Self, ShortcutError> {
        config
            .exec
            .iter()
            .fold(Self::builder(), |b, (name, command)| b.register(name, command))
            .build()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Command prefix of `name` followed by `args`.
    pub fn expand(&self, name: &str, args: &[String]) -> Result<Vec<String>, ShortcutError> {
        let prefix = self
            .get(name)
            .ok_or_else(|| ShortcutError::Unknown(name.to_string()))?;
        Ok(prefix.iter().chain(args).cloned().collect())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(name, command line)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, String)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.join(" ")))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ShortcutRegistryBuilder {
    entries: Vec<(String, String)>,
}

impl ShortcutRegistryBuilder {
    /// Later registrations of the same name replace earlier ones.
    pub fn register(mut self, name: impl Into<String>, command: impl Into<String>) -> Self {
        self.entries.push((name.into(), command.into()));
        self
    }

    pub fn build(self) -> Result<ShortcutRegistry, ShortcutError> {
        let mut entries = BTreeMap::new();
        for (name, command) in self.entries {
            let words: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            if words.is_empty() {
                return Err(ShortcutError::Empty(name));
            }
            entries.insert(name, words);
        }
        Ok(ShortcutRegistry { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_config;

    #[test]
    fn loads_config_shortcuts() {
        let reg = ShortcutRegistry::from_config(&sample_config()).unwrap();
        assert_eq!(reg.names().collect::<Vec<_>>(), ["console", "migrate"]);
        assert_eq!(reg.get("console").unwrap(), ["bin/rails", "console"]);
    }

    #[test]
    fn expand_prepends_prefix() {
        let reg = ShortcutRegistry::builder()
            .register("rake", "bundle exec rake")
            .build()
            .unwrap();
        let cmd = reg.expand("rake", &["db:migrate".to_string()]).unwrap();
        assert_eq!(cmd, ["bundle", "exec", "rake", "db:migrate"]);
        assert_eq!(
            reg.expand("deploy", &[]),
            Err(ShortcutError::Unknown("deploy".into()))
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = ShortcutRegistry::builder()
            .register("noop", "   ")
            .build()
            .unwrap_err();
        assert_eq!(err, ShortcutError::Empty("noop".into()));
    }

    #[test]
    fn later_registration_wins() {
        let reg = ShortcutRegistry::builder()
            .register("console", "irb")
            .register("console", "bin/rails console")
            .build()
            .unwrap();
        assert_eq!(reg.iter().collect::<Vec<_>>(), [("console", "bin/rails console".to_string())]);
    }
}
