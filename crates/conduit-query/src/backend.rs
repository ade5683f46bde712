use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data-source technologies known to the reader registry
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Relational, host/port addressed, pooled by min/max connection count
    Postgres,
    /// Relational, DSN addressed, pooled by min/max/increment session count
    Oracle,
    /// Object storage; rows come from files rather than queries
    S3,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Postgres, BackendKind::Oracle, BackendKind::S3];

    /// Canonical identifier, as written in `db_type` and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Oracle => "oracle",
            BackendKind::S3 => "s3",
        }
    }

    /// Identifiers accepted for this kind besides the canonical one
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            BackendKind::Postgres => &["postgresql"],
            BackendKind::Oracle => &[],
            BackendKind::S3 => &[],
        }
    }

    /// Whether `name` (case-insensitive) identifies this kind
    pub fn matches(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(self.as_str())
            || self.aliases().iter().any(|a| name.eq_ignore_ascii_case(a))
    }

    /// Row-oriented backends must have a query to execute
    pub fn is_row_oriented(&self) -> bool {
        !matches!(self, BackendKind::S3)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.matches(name))
            .ok_or_else(|| DataError::UnsupportedBackend(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("POSTGRES".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!("postgresql".parse::<BackendKind>().unwrap(), BackendKind::Postgres);
        assert_eq!(" Oracle ".parse::<BackendKind>().unwrap(), BackendKind::Oracle);
        assert_eq!("s3".parse::<BackendKind>().unwrap(), BackendKind::S3);
    }

    #[test]
    fn test_unknown_kind() {
        let err = "mongodb".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, DataError::UnsupportedBackend(ref k) if k == "mongodb"));
    }

    #[test]
    fn test_display_roundtrip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
    }
}
