//! Code document schema
//!
//! A code owns its ordered entries; entries have no collection of their own.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for codes
pub const CODE_COLLECTION: &str = "codes";

/// Code document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Display number
    pub number: i32,

    /// Aggregate tally, reconciled (see the coordinator) rather than summed
    #[serde(default)]
    pub total_votes: i64,

    /// Entries in insertion order
    #[serde(default)]
    pub texts: Vec<EntryDoc>,
}

impl CodeDoc {
    /// Create an empty code
    pub fn new(number: i32) -> Self {
        Self {
            id: ObjectId::new(),
            number,
            total_votes: 0,
            texts: Vec::new(),
        }
    }

    /// Look up an entry by id
    pub fn entry(&self, entry_id: &ObjectId) -> Option<&EntryDoc> {
        self.texts.iter().find(|e| &e.id == entry_id)
    }
}

/// User-submitted entry embedded in a code
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EntryDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub text: String,

    #[serde(default)]
    pub votes: i64,
}

impl EntryDoc {
    /// Fresh entry with zero votes
    pub fn new(text: String) -> Self {
        Self {
            id: ObjectId::new(),
            text,
            votes: 0,
        }
    }
}

impl IntoIndexes for CodeDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One document per display number
            (
                doc! { "number": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("number_unique".to_string())
                        .build(),
                ),
            ),
            // Vote lookups match on the nested entry id
            (
                doc! { "texts._id": 1 },
                Some(
                    IndexOptions::builder()
                        .name("texts_id_index".to_string())
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
    fn test_code_doc_field_names() {
        let mut code = CodeDoc::new(412);
        code.texts.push(EntryDoc::new("hello".into()));

        let doc = bson::to_document(&code).unwrap();
        assert!(doc.contains_key("_id"));
        assert_eq!(doc.get_i32("number").unwrap(), 412);
        assert_eq!(doc.get_i64("totalVotes").unwrap(), 0);

        let texts = doc.get_array("texts").unwrap();
        let entry = texts[0].as_document().unwrap();
        assert_eq!(entry.get_str("text").unwrap(), "hello");
        assert_eq!(entry.get_i64("votes").unwrap(), 0);
    }

    #[test]
    fn test_legacy_document_without_texts() {
        let doc = doc! { "_id": ObjectId::new(), "number": 401 };
        let code: CodeDoc = bson::from_document(doc).unwrap();
        assert!(code.texts.is_empty());
        assert_eq!(code.total_votes, 0);
    }
}
