use std::collections::VecDeque;

use bson::raw::{RawBsonRef, RawDocument};

use crate::encoding::value::IndexValue;
use crate::error::EngineError;
use crate::schema::{CollectionSchema, FieldSchema, FieldType};

/// Synthetic path segment marking a nested array without enumerating
/// its contents.
pub const ARRAY_STUB_SEGMENT: &str = "_tigris_array_stub";
pub const CREATED_AT_FIELD: &str = "_tigris_created_at";
pub const UPDATED_AT_FIELD: &str = "_tigris_updated_at";

/// One projected leaf of a document: dotted path, typed value, and the
/// ordinal within the source array (0 outside arrays).
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLeaf {
    pub path: String,
    pub value: IndexValue,
    pub array_pos: u32,
}

struct Frame<'a> {
    path: String,
    schema: &'a FieldSchema,
    value: Option<RawBsonRef<'a>>,
    array_pos: u32,
    in_array: bool,
    indexed: bool,
    depth: usize,
}

/// Streaming schema-guided walk over a document.
///
/// Driven by an explicit work-stack so memory is bounded by the
/// configured depth limit, not the call stack. Yields leaves in
/// schema declaration order.
pub struct LeafWalker<'a> {
    stack: Vec<Frame<'a>>,
    pending: VecDeque<DocumentLeaf>,
    max_depth: usize,
    failed: bool,
}

impl<'a> LeafWalker<'a> {
    pub fn new(
        schema: &'a CollectionSchema,
        doc: &'a RawDocument,
        index_all: bool,
        max_depth: usize,
    ) -> Result<Self, EngineError> {
        let mut stack = Vec::with_capacity(schema.fields.len());
        for field in schema.fields.iter().rev() {
            let value = doc
                .get(&field.name)
                .map_err(|e| EngineError::InvalidDocument(e.to_string()))?;
            stack.push(Frame {
                path: field.name.clone(),
                schema: field,
                value,
                array_pos: 0,
                in_array: false,
                indexed: index_all || field.index,
                depth: 0,
            });
        }
        Ok(Self {
            stack,
            pending: VecDeque::new(),
            max_depth,
            failed: false,
        })
    }

    fn emit(&mut self, path: &str, value: IndexValue, array_pos: u32) {
        self.pending.push_back(DocumentLeaf {
            path: path.to_string(),
            value,
            array_pos,
        });
    }

    fn process(&mut self, frame: Frame<'a>) -> Result<(), EngineError> {
        if frame.depth > self.max_depth {
            return Err(EngineError::InvalidDocument(format!(
                "document nesting exceeds depth bound at '{}'",
                frame.path
            )));
        }
        match frame.schema.ty {
            FieldType::Object => self.process_object(frame),
            FieldType::Array => self.process_array(frame),
            scalar => {
                if !frame.indexed {
                    return Ok(());
                }
                let value = match frame.value {
                    None | Some(RawBsonRef::Null) => IndexValue::Null,
                    Some(raw) => IndexValue::from_raw(scalar, raw).map_err(|e| match e {
                        EngineError::SchemaMismatch(msg) => {
                            EngineError::SchemaMismatch(format!("{}: {msg}", frame.path))
                        }
                        other => other,
                    })?,
                };
                self.emit(&frame.path, value, frame.array_pos);
                Ok(())
            }
        }
    }

    fn process_object(&mut self, frame: Frame<'a>) -> Result<(), EngineError> {
        let doc = match frame.value {
            None | Some(RawBsonRef::Null) => None,
            Some(RawBsonRef::Document(d)) => Some(d),
            Some(other) => {
                return Err(EngineError::SchemaMismatch(format!(
                    "{}: expected object, found {:?}",
                    frame.path,
                    other.element_type()
                )));
            }
        };
        for field in frame.schema.fields.iter().rev() {
            let value = match doc {
                Some(d) => d
                    .get(&field.name)
                    .map_err(|e| EngineError::InvalidDocument(e.to_string()))?,
                // Absent objects still walk their children so each
                // scalar yields a null leaf.
                None => None,
            };
            self.stack.push(Frame {
                path: format!("{}.{}", frame.path, field.name),
                schema: field,
                value,
                array_pos: frame.array_pos,
                in_array: frame.in_array,
                indexed: frame.indexed || field.index,
                depth: frame.depth + 1,
            });
        }
        Ok(())
    }

    fn process_array(&mut self, frame: Frame<'a>) -> Result<(), EngineError> {
        let items = frame
            .schema
            .items
            .as_deref()
            .ok_or_else(|| EngineError::InvalidSchema(format!("array '{}' has no items", frame.path)))?;

        // An array reached from inside another array collapses to a
        // single stub per outer position.
        if frame.in_array {
            if frame.indexed {
                self.emit(
                    &format!("{}.{ARRAY_STUB_SEGMENT}", frame.path),
                    IndexValue::ArrayStub,
                    frame.array_pos,
                );
            }
            return Ok(());
        }

        let arr = match frame.value {
            None | Some(RawBsonRef::Null) => {
                if frame.indexed {
                    self.emit(&frame.path, IndexValue::Null, 0);
                }
                return Ok(());
            }
            Some(RawBsonRef::Array(arr)) => arr,
            Some(other) => {
                return Err(EngineError::SchemaMismatch(format!(
                    "{}: expected array, found {:?}",
                    frame.path,
                    other.element_type()
                )));
            }
        };

        let elems: Vec<RawBsonRef<'a>> = arr
            .into_iter()
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::InvalidDocument(e.to_string()))?;

        match items.ty {
            // Array of arrays: one stub per outer position.
            FieldType::Array => {
                if frame.indexed {
                    let stub_path = format!("{}.{ARRAY_STUB_SEGMENT}", frame.path);
                    for pos in 0..elems.len() {
                        self.emit(&stub_path, IndexValue::ArrayStub, pos as u32);
                    }
                }
                Ok(())
            }
            // Array of objects: cross-product of (array_pos, leaf).
            FieldType::Object => {
                for (pos, elem) in elems.into_iter().enumerate().rev() {
                    self.stack.push(Frame {
                        path: frame.path.clone(),
                        schema: items,
                        value: Some(elem),
                        array_pos: pos as u32,
                        in_array: true,
                        indexed: frame.indexed,
                        depth: frame.depth + 1,
                    });
                }
                Ok(())
            }
            // Array of scalars: one leaf per element.
            scalar => {
                if !frame.indexed {
                    return Ok(());
                }
                for (pos, elem) in elems.into_iter().enumerate() {
                    let value = match elem {
                        RawBsonRef::Null => IndexValue::Null,
                        raw => IndexValue::from_raw(scalar, raw).map_err(|e| match e {
                            EngineError::SchemaMismatch(msg) => EngineError::SchemaMismatch(
                                format!("{}[{pos}]: {msg}", frame.path),
                            ),
                            other => other,
                        })?,
                    };
                    self.emit(&frame.path, value, pos as u32);
                }
                Ok(())
            }
        }
    }
}

impl<'a> Iterator for LeafWalker<'a> {
    type Item = Result<DocumentLeaf, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(leaf) = self.pending.pop_front() {
                return Some(Ok(leaf));
            }
            let frame = self.stack.pop()?;
            if let Err(e) = self.process(frame) {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::from_json(&json!({
            "title": "t",
            "primary_key": ["id"],
            "properties": {
                "id": { "type": "integer", "index": true },
                "name": { "type": "string", "index": true },
                "address": {
                    "type": "object",
                    "properties": {
                        "city": { "type": "string", "index": true },
                        "zip": { "type": "integer", "index": true }
                    }
                },
                "tags": { "type": "array", "items": { "type": "string" }, "index": true },
                "orders": {
                    "type": "array",
                    "index": true,
                    "items": {
                        "type": "object",
                        "properties": {
                            "sku": { "type": "string" },
                            "lines": { "type": "array", "items": { "type": "integer" } }
                        }
                    }
                },
                "matrix": {
                    "type": "array",
                    "index": true,
                    "items": { "type": "array", "items": { "type": "integer" } }
                }
            }
        }))
        .unwrap()
    }

    fn leaves(doc: &RawDocument) -> Vec<DocumentLeaf> {
        LeafWalker::new(&schema(), doc, true, 32)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn find<'a>(leaves: &'a [DocumentLeaf], path: &str) -> Vec<&'a DocumentLeaf> {
        leaves.iter().filter(|l| l.path == path).collect()
    }

    #[test]
    fn scalars_walk_in_schema_order() {
        let doc = bson::rawdoc! { "id": 1, "name": "Ada" };
        let all = leaves(&doc);
        assert_eq!(all[0].path, "id");
        assert_eq!(all[0].value, IndexValue::Int(1));
        assert_eq!(all[1].path, "name");
        assert_eq!(all[1].value, IndexValue::String("Ada".into()));
    }

    #[test]
    fn absent_scalars_yield_null_leaves() {
        let doc = bson::rawdoc! { "id": 1 };
        let all = leaves(&doc);
        let name = find(&all, "name");
        assert_eq!(name.len(), 1);
        assert_eq!(name[0].value, IndexValue::Null);
    }

    #[test]
    fn explicit_null_and_absent_emit_the_same_leaf() {
        let with_null = bson::rawdoc! { "id": 1, "name": null };
        let without = bson::rawdoc! { "id": 1 };
        assert_eq!(
            find(&leaves(&with_null), "name")[0].value,
            find(&leaves(&without), "name")[0].value,
        );
    }

    #[test]
    fn nested_objects_use_dotted_paths() {
        let doc = bson::rawdoc! { "id": 1, "address": { "city": "Austin", "zip": 78701 } };
        let all = leaves(&doc);
        assert_eq!(find(&all, "address.city")[0].value, IndexValue::String("Austin".into()));
        assert_eq!(find(&all, "address.zip")[0].value, IndexValue::Int(78701));
    }

    #[test]
    fn absent_object_walks_children_as_nulls() {
        let doc = bson::rawdoc! { "id": 1 };
        let all = leaves(&doc);
        assert_eq!(find(&all, "address.city")[0].value, IndexValue::Null);
        assert_eq!(find(&all, "address.zip")[0].value, IndexValue::Null);
    }

    #[test]
    fn scalar_arrays_emit_one_leaf_per_element() {
        let doc = bson::rawdoc! { "id": 1, "tags": ["rust", "db", "engine"] };
        let all = leaves(&doc);
        let tags = find(&all, "tags");
        assert_eq!(tags.len(), 3);
        let positions: Vec<u32> = tags.iter().map(|l| l.array_pos).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(tags[1].value, IndexValue::String("db".into()));
    }

    #[test]
    fn null_array_element_yields_null_leaf() {
        let doc = bson::rawdoc! { "id": 1, "tags": ["a", null, "c"] };
        let all = leaves(&doc);
        let tags = find(&all, "tags");
        assert_eq!(tags[1].value, IndexValue::Null);
        assert_eq!(tags[1].array_pos, 1);
    }

    #[test]
    fn object_arrays_cross_product_with_positions() {
        let doc = bson::rawdoc! {
            "id": 1,
            "orders": [ { "sku": "A1" }, { "sku": "B2" } ]
        };
        let all = leaves(&doc);
        let skus = find(&all, "orders.sku");
        assert_eq!(skus.len(), 2);
        assert_eq!(skus[0].value, IndexValue::String("A1".into()));
        assert_eq!(skus[0].array_pos, 0);
        assert_eq!(skus[1].value, IndexValue::String("B2".into()));
        assert_eq!(skus[1].array_pos, 1);
    }

    #[test]
    fn array_inside_array_object_becomes_stub() {
        let doc = bson::rawdoc! {
            "id": 1,
            "orders": [
                { "sku": "A1", "lines": [1, 2, 3] },
                { "sku": "B2", "lines": [4] }
            ]
        };
        let all = leaves(&doc);
        let stubs = find(&all, &format!("orders.lines.{ARRAY_STUB_SEGMENT}"));
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].value, IndexValue::ArrayStub);
        assert_eq!(stubs[0].array_pos, 0);
        assert_eq!(stubs[1].array_pos, 1);
        // The nested contents themselves are not enumerated.
        assert!(find(&all, "orders.lines").is_empty());
    }

    #[test]
    fn array_of_arrays_becomes_stub_per_outer_position() {
        let doc = bson::rawdoc! { "id": 1, "matrix": [[1, 2], [3]] };
        let all = leaves(&doc);
        let stubs = find(&all, &format!("matrix.{ARRAY_STUB_SEGMENT}"));
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].array_pos, 0);
        assert_eq!(stubs[1].array_pos, 1);
    }

    #[test]
    fn absent_array_yields_single_null_leaf() {
        let doc = bson::rawdoc! { "id": 1 };
        let all = leaves(&doc);
        let tags = find(&all, "tags");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value, IndexValue::Null);
        assert_eq!(tags[0].array_pos, 0);
    }

    #[test]
    fn auto_timestamps_walk_as_datetime_leaves() {
        let doc = bson::rawdoc! {
            "id": 1,
            "_tigris_created_at": "2024-01-01T00:00:00Z"
        };
        let all = leaves(&doc);
        let created = find(&all, CREATED_AT_FIELD);
        assert_eq!(
            created[0].value,
            IndexValue::DateTime("2024-01-01T00:00:00.000000000Z".into())
        );
        assert_eq!(find(&all, UPDATED_AT_FIELD)[0].value, IndexValue::Null);
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let doc = bson::rawdoc! { "id": "not-an-int" };
        let result: Result<Vec<_>, _> =
            LeafWalker::new(&schema(), &doc, true, 32).unwrap().collect();
        assert!(matches!(result, Err(EngineError::SchemaMismatch(_))));
    }

    #[test]
    fn unindexed_fields_are_skipped_without_index_all() {
        let schema = CollectionSchema::from_json(&json!({
            "title": "t",
            "primary_key": ["id"],
            "properties": {
                "id": { "type": "integer" },
                "hot": { "type": "string", "index": true },
                "cold": { "type": "string" }
            }
        }))
        .unwrap();
        let doc = bson::rawdoc! { "id": 1, "hot": "a", "cold": "b" };
        let all: Vec<DocumentLeaf> = LeafWalker::new(&schema, &doc, false, 32)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(all.iter().any(|l| l.path == "hot"));
        assert!(!all.iter().any(|l| l.path == "cold"));
        assert!(!all.iter().any(|l| l.path == "id"));
    }

    #[test]
    fn walk_is_deterministic() {
        let doc = bson::rawdoc! {
            "id": 1,
            "tags": ["x", "y"],
            "address": { "city": "Oslo" }
        };
        assert_eq!(leaves(&doc), leaves(&doc));
    }

    #[test]
    fn depth_bound_is_enforced() {
        let doc = bson::rawdoc! { "id": 1, "address": { "city": "A" } };
        let result: Result<Vec<_>, _> = LeafWalker::new(&schema(), &doc, true, 0)
            .unwrap()
            .collect();
        assert!(matches!(result, Err(EngineError::InvalidDocument(_))));
    }
}
