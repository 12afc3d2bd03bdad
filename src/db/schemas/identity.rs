//! Identity document schema
//!
//! One record per origin address. Holds the vote ledger: the set of codes
//! already voted on and the single-submission flag.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for identities
pub const IDENTITY_COLLECTION: &str = "users";

/// Identity document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IdentityDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Origin address this identity is derived from
    pub ip: String,

    /// Codes this identity has cast a counted vote under (set semantics)
    #[serde(default)]
    pub codes: Vec<ObjectId>,

    /// Whether this identity has submitted its entry
    #[serde(default)]
    pub added: bool,
}

impl IdentityDoc {
    /// Fresh identity with an empty ledger
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            ip: ip.into(),
            codes: Vec::new(),
            added: false,
        }
    }

    pub fn has_voted(&self, code_id: &ObjectId) -> bool {
        self.codes.contains(code_id)
    }
}

impl IntoIndexes for IdentityDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique ip keeps concurrent first contact from creating duplicates
            (
                doc! { "ip": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("ip_unique".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_voted() {
        let code = ObjectId::new();
        let mut identity = IdentityDoc::new("10.0.0.1");
        assert!(!identity.has_voted(&code));

        identity.codes.push(code);
        assert!(identity.has_voted(&code));
        assert!(!identity.has_voted(&ObjectId::new()));
    }

    #[test]
    fn test_record_created_before_added_flag_existed() {
        let doc = doc! { "_id": ObjectId::new(), "ip": "::1", "codes": [] };
        let identity: IdentityDoc = bson::from_document(doc).unwrap();
        assert!(!identity.added);
    }
}
