use bson::raw::RawDocument;

use crate::encoding::value::IndexValue;
use crate::error::EngineError;
use crate::walker::{CREATED_AT_FIELD, UPDATED_AT_FIELD};

/// Leaf and container types a schema node can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Double,
    String,
    DateTime,
    Bytes,
    Object,
    Array,
}

impl FieldType {
    pub fn is_container(self) -> bool {
        matches!(self, Self::Object | Self::Array)
    }
}

/// One node of the typed field tree the schema validator yields.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub ty: FieldType,
    /// Whether this node is annotated `index: true`. Overridden by
    /// the `index_all` option.
    pub index: bool,
    /// Child fields when `ty == Object`.
    pub fields: Vec<FieldSchema>,
    /// Element schema when `ty == Array`.
    pub items: Option<Box<FieldSchema>>,
}

impl FieldSchema {
    fn scalar(name: &str, ty: FieldType, index: bool) -> Self {
        Self {
            name: name.to_string(),
            ty,
            index,
            fields: Vec::new(),
            items: None,
        }
    }
}

/// The schema of one collection: primary-key declaration plus the
/// field tree, in declaration order.
#[derive(Debug, Clone)]
pub struct CollectionSchema {
    pub name: String,
    pub primary_key: Vec<String>,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Ingest the JSON schema dialect:
    ///
    /// ```json
    /// {
    ///   "title": "users",
    ///   "primary_key": ["id"],
    ///   "properties": {
    ///     "id": { "type": "integer" },
    ///     "name": { "type": "string", "index": true },
    ///     "joined": { "type": "string", "format": "date-time" },
    ///     "tags": { "type": "array", "items": { "type": "string" } }
    ///   }
    /// }
    /// ```
    ///
    /// The auto-timestamp fields are appended as indexable datetime
    /// leaves.
    pub fn from_json(raw: &serde_json::Value) -> Result<CollectionSchema, EngineError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| EngineError::InvalidSchema("schema must be an object".into()))?;
        let name = obj
            .get("title")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::InvalidSchema("missing title".into()))?
            .to_string();
        let primary_key: Vec<String> = obj
            .get("primary_key")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if primary_key.is_empty() {
            return Err(EngineError::InvalidSchema("missing primary_key".into()));
        }

        let mut fields = parse_properties(obj.get("properties"))?;
        fields.push(FieldSchema::scalar(CREATED_AT_FIELD, FieldType::DateTime, true));
        fields.push(FieldSchema::scalar(UPDATED_AT_FIELD, FieldType::DateTime, true));

        for pk in &primary_key {
            let field = fields
                .iter()
                .find(|f| &f.name == pk)
                .ok_or_else(|| {
                    EngineError::InvalidSchema(format!("primary_key field '{pk}' not declared"))
                })?;
            if field.ty.is_container() {
                return Err(EngineError::InvalidSchema(format!(
                    "primary_key field '{pk}' must be a scalar"
                )));
            }
        }

        Ok(CollectionSchema {
            name,
            primary_key,
            fields,
        })
    }

    /// Look up the schema node at a dotted path. Array hops pass
    /// through the element schema.
    pub fn field(&self, path: &str) -> Option<&FieldSchema> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = self.fields.iter().find(|f| f.name == first)?;
        for segment in segments {
            let mut current = node;
            while current.ty == FieldType::Array {
                current = current.items.as_deref()?;
            }
            node = current.fields.iter().find(|f| f.name == segment)?;
        }
        Some(node)
    }

    /// The leaf type at a dotted path, unwrapping array nesting.
    pub fn leaf_type(&self, path: &str) -> Option<FieldType> {
        let mut node = self.field(path)?;
        while node.ty == FieldType::Array {
            node = node.items.as_deref()?;
        }
        Some(node.ty)
    }

    /// Whether an equality/range predicate on `path` can be served by
    /// the index subspace.
    pub fn is_indexed(&self, path: &str, index_all: bool) -> bool {
        match self.field(path) {
            Some(field) => index_all || field.index,
            None => false,
        }
    }

    /// Extract the primary-key tuple from a document.
    pub fn primary_key_values(&self, doc: &RawDocument) -> Result<Vec<IndexValue>, EngineError> {
        let mut parts = Vec::with_capacity(self.primary_key.len());
        for pk in &self.primary_key {
            let field = self
                .fields
                .iter()
                .find(|f| &f.name == pk)
                .ok_or_else(|| EngineError::InvalidSchema(format!("unknown pk field '{pk}'")))?;
            let raw = doc
                .get(pk)
                .map_err(|e| EngineError::InvalidDocument(e.to_string()))?
                .ok_or_else(|| {
                    EngineError::InvalidDocument(format!("missing primary key field '{pk}'"))
                })?;
            let value = IndexValue::from_raw(field.ty, raw)?;
            if value == IndexValue::Null {
                return Err(EngineError::InvalidDocument(format!(
                    "null primary key field '{pk}'"
                )));
            }
            parts.push(value);
        }
        Ok(parts)
    }
}

fn parse_properties(raw: Option<&serde_json::Value>) -> Result<Vec<FieldSchema>, EngineError> {
    let Some(props) = raw else {
        return Ok(Vec::new());
    };
    let props = props
        .as_object()
        .ok_or_else(|| EngineError::InvalidSchema("properties must be an object".into()))?;
    props
        .iter()
        .map(|(name, spec)| parse_field(name, spec))
        .collect()
}

fn parse_field(name: &str, spec: &serde_json::Value) -> Result<FieldSchema, EngineError> {
    let obj = spec
        .as_object()
        .ok_or_else(|| EngineError::InvalidSchema(format!("field '{name}' must be an object")))?;
    let type_name = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::InvalidSchema(format!("field '{name}' missing type")))?;
    let format = obj.get("format").and_then(|v| v.as_str());
    let index = obj
        .get("index")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let ty = match (type_name, format) {
        ("boolean", _) => FieldType::Bool,
        ("integer", _) => FieldType::Int,
        ("number", _) => FieldType::Double,
        ("string", Some("date-time")) => FieldType::DateTime,
        ("string", Some("byte")) => FieldType::Bytes,
        ("string", _) => FieldType::String,
        ("object", _) => FieldType::Object,
        ("array", _) => FieldType::Array,
        (other, _) => {
            return Err(EngineError::InvalidSchema(format!(
                "field '{name}' has unsupported type '{other}'"
            )));
        }
    };

    let fields = if ty == FieldType::Object {
        parse_properties(obj.get("properties"))?
    } else {
        Vec::new()
    };

    let items = if ty == FieldType::Array {
        let spec = obj.get("items").ok_or_else(|| {
            EngineError::InvalidSchema(format!("array field '{name}' missing items"))
        })?;
        Some(Box::new(parse_field("items", spec)?))
    } else {
        None
    };

    Ok(FieldSchema {
        name: name.to_string(),
        ty,
        index,
        fields,
        items,
    })
}
