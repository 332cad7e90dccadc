//! Bulk operation types sent to the search store's bulk API.

use serde_json::json;

/// A single bulk operation: either index a document or delete one.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    /// Index (create or overwrite) a document.
    Index {
        /// the index to write to
        index: String,
        /// the document id, or `None` to let the search store assign one
        doc_id: Option<String>,
        /// the document body
        document: serde_json::Value,
    },
    /// Delete a document.
    Delete {
        /// the index to delete from
        index: String,
        /// the document id
        doc_id: String,
    },
}

impl BulkOp {
    /// Serialize this operation into its NDJSON bulk-API lines (one or two
    /// lines, each newline-terminated).
    pub fn serialize(&self) -> String {
        match self {
            BulkOp::Index { index, doc_id, document } => {
                let action = json!({"index": {"_index": index, "_id": doc_id}});
                format!("{}\n{}\n", action, document)
            }
            BulkOp::Delete { index, doc_id } => {
                let action = json!({"delete": {"_index": index, "_id": doc_id}});
                format!("{}\n", action)
            }
        }
    }

    /// The index this operation targets.
    pub fn index(&self) -> &str {
        match self {
            BulkOp::Index { index, .. } => index,
            BulkOp::Delete { index, .. } => index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_op_serializes_to_two_lines() {
        let op = BulkOp::Index {
            index: "data-specimens-latest".to_string(),
            doc_id: Some("abc".to_string()),
            document: json!({"id": "abc", "version": 1}),
        };
        let lines: Vec<&str> = op.serialize().lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"index\""));
        assert!(lines[0].contains("data-specimens-latest"));
        assert!(lines[1].contains("\"version\":1"));
    }

    #[test]
    fn index_op_with_no_id_lets_store_assign_one() {
        let op = BulkOp::Index {
            index: "data-specimens-arc-0".to_string(),
            doc_id: None,
            document: json!({}),
        };
        let lines: Vec<&str> = op.serialize().lines().collect();
        assert!(lines[0].contains("\"_id\":null"));
    }

    #[test]
    fn delete_op_serializes_to_one_line() {
        let op = BulkOp::Delete {
            index: "data-specimens-latest".to_string(),
            doc_id: "abc".to_string(),
        };
        let lines: Vec<&str> = op.serialize().lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"delete\""));
    }
}
