use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque Slack user identifier (`U…` / `W…`). Only equality and hashing are relied on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::UserId;

    #[test]
    fn serializes_as_bare_string() {
        let json = serde_json::to_string(&vec![UserId::new("U01"), UserId::new("U02")])
            .expect("serialize user ids");
        assert_eq!(json, r#"["U01","U02"]"#);
    }

    #[test]
    fn displays_raw_identifier() {
        assert_eq!(UserId::from("W123").to_string(), "W123");
    }
}
