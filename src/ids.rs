//! Lexicographically sortable, time-ordered, prefix-tagged ids (spec §3).
//!
//! Every entity id is a ULID rendered in Crockford base32 and prefixed with
//! a short tag (`evt_`, `jrn_`, `pol_`, `cst_`, `alc_`, `cmt_`, `acc_`,
//! `mir_`). Sorting the string form sorts by creation time.

use ulid::Ulid;

macro_rules! prefixed_id {
    ($name:ident, $prefix:expr) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn new() -> Self {
                Self(format!("{}{}", $prefix, Ulid::new().to_string().to_lowercase()))
            }

            pub fn parse(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

prefixed_id!(CanonicalEventId, "evt_");
prefixed_id!(JournalId, "jrn_");
prefixed_id!(PolicyId, "pol_");
prefixed_id!(ConstraintId, "cst_");
prefixed_id!(CalendarId, "alc_");
prefixed_id!(SessionId, "cmt_");
prefixed_id!(HoldId, "hld_");

/// Account ids are external identifiers handed to us by the platform (or the
/// literal string `"internal"` for user-authored events); they are not
/// minted here, so this is a thin newtype rather than a `prefixed_id!`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub const INTERNAL: &'static str = "internal";

    pub fn internal() -> Self {
        Self(Self::INTERNAL.to_string())
    }

    pub fn is_internal(&self) -> bool {
        self.0 == Self::INTERNAL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_sortable() {
        let a = CanonicalEventId::new();
        let b = CanonicalEventId::new();
        assert!(a.as_str().starts_with("evt_"));
        assert!(b.as_str().starts_with("evt_"));
        assert!(a < b, "later-minted ulid should sort after earlier one");
    }

    #[test]
    fn internal_account_recognized() {
        let acc = AccountId::internal();
        assert!(acc.is_internal());
        assert!(!AccountId::from("acc_123").is_internal());
    }
}
