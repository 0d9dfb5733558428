//! Provider payload tagging and classification (spec §6.1).
//!
//! Every managed provider-side event carries `extendedProperties.private`
//! tags. Classification of an inbound provider event drives Invariant E
//! (spec §9): managed-mirror provider events never re-enter as origin
//! events, which must be enforced here at the boundary, not downstream.

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, CanonicalEventId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// A real, user-or-provider-authored event we should treat as origin.
    Origin,
    /// An event we ourselves wrote as a mirror; never re-ingested as origin.
    ManagedMirror {
        canonical_event_id: CanonicalEventId,
        origin_account_id: AccountId,
    },
}

pub fn managed_tags(canonical_event_id: &CanonicalEventId, origin_account_id: &AccountId) -> serde_json::Value {
    serde_json::json!({
        "tminus": "true",
        "managed": "true",
        "canonical_event_id": canonical_event_id.as_str(),
        "origin_account_id": origin_account_id.as_str(),
    })
}

/// Classifies an inbound provider event from its `extendedProperties.private`
/// tag set. `tminus=="true" AND managed=="true"` -> managed mirror; anything
/// else, including other vendors' tags, is treated as origin (spec §6.1).
pub fn classify(extended_properties_private: Option<&serde_json::Value>) -> Classification {
    let Some(tags) = extended_properties_private else {
        return Classification::Origin;
    };
    let is_tminus = tags.get("tminus").and_then(|v| v.as_str()) == Some("true");
    let is_managed = tags.get("managed").and_then(|v| v.as_str()) == Some("true");
    if !is_tminus || !is_managed {
        return Classification::Origin;
    }
    let Some(cid) = tags.get("canonical_event_id").and_then(|v| v.as_str()) else {
        return Classification::Origin;
    };
    let Some(acct) = tags.get("origin_account_id").and_then(|v| v.as_str()) else {
        return Classification::Origin;
    };
    Classification::ManagedMirror {
        canonical_event_id: CanonicalEventId::from(cid.to_string()),
        origin_account_id: AccountId::from(acct.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untagged_is_origin() {
        assert_eq!(classify(None), Classification::Origin);
    }

    #[test]
    fn foreign_vendor_tag_is_origin() {
        let tags = json!({"otherVendor": "true"});
        assert_eq!(classify(Some(&tags)), Classification::Origin);
    }

    #[test]
    fn tminus_managed_is_managed_mirror() {
        let tags = json!({
            "tminus": "true",
            "managed": "true",
            "canonical_event_id": "evt_abc",
            "origin_account_id": "acc_xyz",
        });
        match classify(Some(&tags)) {
            Classification::ManagedMirror { canonical_event_id, origin_account_id } => {
                assert_eq!(canonical_event_id.as_str(), "evt_abc");
                assert_eq!(origin_account_id.as_str(), "acc_xyz");
            }
            _ => panic!("expected managed mirror"),
        }
    }

    #[test]
    fn half_tagged_is_origin() {
        let tags = json!({"tminus": "true"});
        assert_eq!(classify(Some(&tags)), Classification::Origin);
    }
}
