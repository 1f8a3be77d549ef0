use log::trace;
use serde::{Serialize, Serializer};
use snafu::ensure;
use std::fmt;

use super::{error, Result};

const ID_SEPARATOR: char = '/';

/// Maximum name length matches the maximum filename length of 255.  The filesystem store names
/// each file after its resource, and falls back to a hash when the encoded name is too long.
const MAX_NAME_LENGTH: usize = 255;

/// A ResourceId is the name a resource is stored under.  It has two parts: a scope, which names
/// the kind of resource ("config", "au-state", ...), and a name within that scope, which is
/// opaque to the store ("expert", an AUID, ...).
///
/// Scopes are short lowercase tokens.  Names can hold nearly anything, because AUIDs and config
/// section names come from outside; only control characters are refused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    scope: String,
    name: String,
}

impl ResourceId {
    /// Creates a ResourceId from the given scope and name, checking both for acceptable
    /// characters and length.
    pub fn new<S1, S2>(scope: S1, name: S2) -> Result<Self>
    where
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let scope = scope.as_ref();
        let name = name.as_ref();

        Self::check_scope(scope)?;
        Self::check_name(scope, name)?;

        trace!("Made resource id {}{}{}", scope, ID_SEPARATOR, name);
        Ok(Self {
            scope: scope.to_string(),
            name: name.to_string(),
        })
    }

    /// Returns the scope (resource kind) part of the id.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the name of the resource within its scope.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_scope(scope: &str) -> Result<()> {
        ensure!(
            !scope.is_empty(),
            error::InvalidIdSnafu {
                id: scope,
                msg: "scope cannot be empty",
            }
        );
        if let Some(c) = scope.chars().find(|c| !Self::valid_scope_character(*c)) {
            return error::InvalidIdSnafu {
                id: scope,
                msg: format!("invalid character in scope: '{}'", c),
            }
            .fail();
        }
        Ok(())
    }

    fn check_name(scope: &str, name: &str) -> Result<()> {
        ensure!(
            !name.is_empty(),
            error::InvalidIdSnafu {
                id: format!("{}{}", scope, ID_SEPARATOR),
                msg: "name cannot be empty",
            }
        );
        ensure!(
            name.len() <= MAX_NAME_LENGTH,
            error::NameTooLongSnafu {
                name,
                max: MAX_NAME_LENGTH,
            }
        );
        ensure!(
            !name.chars().any(char::is_control),
            error::InvalidIdSnafu {
                id: format!("{}{}{}", scope, ID_SEPARATOR, name.escape_debug()),
                msg: "name contains control characters",
            }
        );
        Ok(())
    }

    /// Determines whether a character is acceptable within a scope.
    fn valid_scope_character(c: char) -> bool {
        matches!(c, 'a'..='z' | '0'..='9' | '-')
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scope, ID_SEPARATOR, self.name)
    }
}

// The scope and name can't be recovered unambiguously from the displayed form if the name holds
// a separator, so we only serialize.
impl Serialize for ResourceId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod test {
    use super::ResourceId;

    #[test]
    fn simple_id() {
        let id = ResourceId::new("config", "expert").unwrap();
        assert_eq!(id.scope(), "config");
        assert_eq!(id.name(), "expert");
        assert_eq!(id.to_string(), "config/expert");
    }

    #[test]
    fn name_allows_auid_characters() {
        let auid = "org|lockss|plugin|TestPlugin&base_url~http%3A%2F%2Fexample%2Ecom%2F";
        let id = ResourceId::new("au-state", auid).unwrap();
        assert_eq!(id.name(), auid);
    }

    #[test]
    fn bad_scopes() {
        for scope in &["", "Config", "au.state", "au state", "au/state"] {
            ResourceId::new(scope, "x").unwrap_err();
        }
    }

    #[test]
    fn bad_names() {
        ResourceId::new("config", "").unwrap_err();
        ResourceId::new("config", "line\nbreak").unwrap_err();
        ResourceId::new("config", "a".repeat(256)).unwrap_err();
        ResourceId::new("config", "a".repeat(255)).unwrap();
    }

    #[test]
    fn ordering_groups_by_scope() {
        let mut ids = vec![
            ResourceId::new("config", "z").unwrap(),
            ResourceId::new("au-state", "b").unwrap(),
            ResourceId::new("au-state", "a").unwrap(),
        ];
        ids.sort();
        let names: Vec<_> = ids.iter().map(|id| id.to_string()).collect();
        assert_eq!(names, vec!["au-state/a", "au-state/b", "config/z"]);
    }
}
