// src/config.rs

//! Domain settings consumed by the trigger factory
//!
//! Keys mirror the traditional make.conf variables. Every list value may be
//! written either as one space-delimited string or as a TOML array:
//!
//! ```toml
//! CONFIG_PROTECT = "/usr/share/config /var/lib/app"
//! CONFIG_PROTECT_MASK = ["/etc/env.d"]
//! FEATURES = "collision-protect sfperms -multilib-strict"
//! INSTALL_MASK = "*.la /usr/share/gtk-doc"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    String(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_tokens(self) -> Vec<String> {
        match self {
            StringOrList::String(s) => split_tokens(&s),
            StringOrList::List(items) => items.iter().flat_map(|s| split_tokens(s)).collect(),
        }
    }
}

fn split_tokens(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(StringOrList::deserialize(deserializer)?.into_tokens())
}

fn optional_string_or_list<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<StringOrList>::deserialize(deserializer)?.map(StringOrList::into_tokens))
}

fn features<'de, D>(deserializer: D) -> std::result::Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(fold_features(string_or_list(deserializer)?))
}

/// Apply incremental `FEATURES` tokens left to right
///
/// `-name` drops a feature, `-*` drops everything seen so far.
pub fn fold_features<I, S>(tokens: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut enabled = BTreeSet::new();
    for token in tokens {
        let token = token.as_ref();
        match token.strip_prefix('-') {
            Some("*") => enabled.clear(),
            Some(name) => {
                enabled.remove(name);
            }
            None => {
                enabled.insert(token.to_string());
            }
        }
    }
    enabled
}

/// Settings that select and configure the standard triggers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct DomainSettings {
    /// Extra protected prefixes; `/etc` is always protected
    #[serde(deserialize_with = "string_or_list")]
    pub config_protect: Vec<String>,

    /// Prefixes carved out of the protected set
    #[serde(deserialize_with = "string_or_list")]
    pub config_protect_mask: Vec<String>,

    #[serde(deserialize_with = "features")]
    pub features: BTreeSet<String>,

    /// Glob patterns pruned from incoming contents
    #[serde(deserialize_with = "string_or_list")]
    pub install_mask: Vec<String>,

    /// Directories where multilib-strict applies; leading and trailing `/` are ignored
    #[serde(deserialize_with = "string_or_list")]
    pub multilib_strict_dirs: Vec<String>,

    #[serde(deserialize_with = "optional_string_or_list", skip_serializing_if = "Option::is_none")]
    pub multilib_strict_exempt: Option<Vec<String>>,

    /// Regex matched against the described file type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multilib_strict_deny: Option<String>,
}

impl DomainSettings {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&contents)?;
        debug!("Loaded domain settings from {}: {:?}", path.display(), settings);
        Ok(settings)
    }

    /// Build settings from raw `KEY -> value` strings, e.g. a collapsed env
    ///
    /// Unknown keys are ignored.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "CONFIG_PROTECT" => settings.config_protect = split_tokens(value),
                "CONFIG_PROTECT_MASK" => settings.config_protect_mask = split_tokens(value),
                "FEATURES" => settings.features = fold_features(split_tokens(value)),
                "INSTALL_MASK" => settings.install_mask = split_tokens(value),
                "MULTILIB_STRICT_DIRS" => settings.multilib_strict_dirs = split_tokens(value),
                "MULTILIB_STRICT_EXEMPT" => settings.multilib_strict_exempt = Some(split_tokens(value)),
                "MULTILIB_STRICT_DENY" => {
                    let deny = value.trim();
                    if deny.is_empty() {
                        return Err(Error::Config("MULTILIB_STRICT_DENY is empty".to_string()));
                    }
                    settings.multilib_strict_deny = Some(deny.to_string());
                }
                _ => {}
            }
        }
        Ok(settings)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Exempt alternation for multilib-strict, e.g. `(perl5|gcc)`
    pub fn multilib_exempt_pattern(&self) -> Option<String> {
        self.multilib_strict_exempt
            .as_ref()
            .filter(|items| !items.is_empty())
            .map(|items| format!("({})", items.join("|")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_features() {
        let features = fold_features(["sfperms", "collision-protect", "-sfperms", "nodoc"]);
        assert_eq!(features.into_iter().collect::<Vec<_>>(), vec!["collision-protect", "nodoc"]);

        let features = fold_features(["sfperms", "-*", "nodoc"]);
        assert_eq!(features.into_iter().collect::<Vec<_>>(), vec!["nodoc"]);
    }

    #[test]
    fn test_from_toml() {
        let settings = DomainSettings::from_toml_str(
            r#"
CONFIG_PROTECT = "/usr/share/config  /var/lib/app"
CONFIG_PROTECT_MASK = ["/etc/env.d", "/etc/gconf /etc/ca-certificates.conf"]
FEATURES = "collision-protect sfperms -sfperms"
MULTILIB_STRICT_DENY = "64-bit.*shared object"
"#,
        )
        .unwrap();

        assert_eq!(settings.config_protect, vec!["/usr/share/config", "/var/lib/app"]);
        assert_eq!(
            settings.config_protect_mask,
            vec!["/etc/env.d", "/etc/gconf", "/etc/ca-certificates.conf"]
        );
        assert!(settings.has_feature("collision-protect"));
        assert!(!settings.has_feature("sfperms"));
        assert!(settings.install_mask.is_empty());
        assert_eq!(settings.multilib_strict_deny.as_deref(), Some("64-bit.*shared object"));
        assert_eq!(settings.multilib_exempt_pattern(), None);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            DomainSettings::from_toml_str("FEATURES = 3"),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn test_from_map() {
        let map = BTreeMap::from([
            ("FEATURES".to_string(), "-* multilib-strict".to_string()),
            ("MULTILIB_STRICT_DIRS".to_string(), "/lib32 /usr/lib32".to_string()),
            ("MULTILIB_STRICT_EXEMPT".to_string(), "perl5 gcc".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ]);
        let settings = DomainSettings::from_map(&map).unwrap();
        assert!(settings.has_feature("multilib-strict"));
        assert_eq!(settings.multilib_strict_dirs, vec!["/lib32", "/usr/lib32"]);
        assert_eq!(settings.multilib_exempt_pattern().as_deref(), Some("(perl5|gcc)"));

        let map = BTreeMap::from([("MULTILIB_STRICT_DENY".to_string(), " ".to_string())]);
        assert!(matches!(DomainSettings::from_map(&map), Err(Error::Config(_))));
    }
}
