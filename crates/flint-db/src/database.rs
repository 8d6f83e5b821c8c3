use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bson::raw::RawDocumentBuf;
use bson::Document;
use flint_engine::{
    datetime_from_millis, key, store_index, CancelToken, CollectionHandle, CollectionSchema,
    FieldSchema, IndexBuilder, IndexInfo, IndexMetadata, IndexState, IndexValue, IndexingOptions,
    Maintainer, CREATED_AT_FIELD, UPDATED_AT_FIELD,
};
use flint_query::{parse_filter, Sort};
use flint_store::{KvStore, KvTransaction};

use crate::error::DbError;
use crate::exec;
use crate::planner::plan::{Explain, QueryPlan};
use crate::planner::Planner;

fn default_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

/// Facade over the store, planner, maintainer and builder.
///
/// The collection catalog itself is kept in memory (persistent
/// catalog storage belongs to the layer above); index metadata and
/// counters live in the store so builds survive restarts.
pub struct Database<S: KvStore> {
    store: S,
    options: IndexingOptions,
    collections: RwLock<HashMap<String, CollectionHandle>>,
    next_table_id: AtomicU32,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl<S: KvStore> Database<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, IndexingOptions::default())
    }

    pub fn with_options(store: S, options: IndexingOptions) -> Self {
        Self {
            store,
            options,
            collections: RwLock::new(HashMap::new()),
            next_table_id: AtomicU32::new(1),
            clock: Arc::new(default_clock),
        }
    }

    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn options(&self) -> &IndexingOptions {
        &self.options
    }

    // ── DDL ─────────────────────────────────────────────────────

    /// Create a collection from its JSON schema. The catch-all index
    /// is created with it; when the schema declares indexed fields it
    /// is built immediately (trivial for an empty collection).
    pub fn create_collection(&self, schema_json: &serde_json::Value) -> Result<(), DbError> {
        let schema = CollectionSchema::from_json(schema_json)?;
        let name = schema.name.clone();
        let table_id = self.next_table_id.fetch_add(1, Ordering::SeqCst);

        let meta = IndexMetadata {
            id: 1,
            name: "all_fields".into(),
            state: IndexState::Inactive,
            schema_rev: 1,
        };
        let mut handle = CollectionHandle {
            schema,
            table_index_name: table_id.to_be_bytes().to_vec(),
            indexes: vec![meta],
        };

        let txn = self.store.begin(false)?;
        store_index(&txn, &handle.table_index_name, &handle.indexes[0])?;
        txn.commit()?;

        if self.schema_declares_indexes(&handle.schema) {
            IndexBuilder::new(&self.store, &self.options)
                .build_collection(&mut handle, &CancelToken::new())?;
        }

        self.collections.write().unwrap().insert(name, handle);
        Ok(())
    }

    /// Swap in a revised schema. Index states are untouched; run
    /// `build_collection` to activate an index over existing data.
    pub fn update_schema(&self, schema_json: &serde_json::Value) -> Result<(), DbError> {
        let schema = CollectionSchema::from_json(schema_json)?;
        let mut collections = self.collections.write().unwrap();
        let handle = collections
            .get_mut(&schema.name)
            .ok_or_else(|| DbError::CollectionNotFound(schema.name.clone()))?;
        handle.schema = schema;

        let txn = self.store.begin(false)?;
        for index in &mut handle.indexes {
            index.schema_rev += 1;
            store_index(&txn, &handle.table_index_name, index)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Drive every inactive index of the collection to `Active`;
    /// returns the index list with final states.
    pub fn build_collection(&self, name: &str) -> Result<Vec<IndexMetadata>, DbError> {
        self.build_collection_with(name, &CancelToken::new())
    }

    pub fn build_collection_with(
        &self,
        name: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<IndexMetadata>, DbError> {
        let mut handle = self.handle(name)?;

        // Publish the Building state before the scan starts, so
        // concurrent writers maintain the index through the normal
        // path and the scan-plus-replay equivalence holds.
        {
            let txn = self.store.begin(false)?;
            let table_index_name = handle.table_index_name.clone();
            for index in &mut handle.indexes {
                if index.state == IndexState::Inactive {
                    index.transition(IndexState::Building)?;
                    store_index(&txn, &table_index_name, index)?;
                }
            }
            txn.commit()?;
        }
        self.collections
            .write()
            .unwrap()
            .insert(name.to_string(), handle.clone());

        let result = IndexBuilder::new(&self.store, &self.options)
            .build_collection(&mut handle, cancel);
        // Keep whatever states the builder reached (Building on
        // cancellation) so a later call resumes.
        self.collections
            .write()
            .unwrap()
            .insert(name.to_string(), handle);
        result.map_err(DbError::from)
    }

    pub fn drop_index(&self, name: &str, index_id: u32) -> Result<u64, DbError> {
        let mut handle = self.handle(name)?;
        let txn = self.store.begin(false)?;
        let maintainer = Maintainer::new(&handle, &self.options);
        let removed = maintainer.delete_index(&txn, index_id)?;
        drop(maintainer);
        let table_index_name = handle.table_index_name.clone();
        let index = handle.index_mut(index_id)?;
        index.transition(IndexState::Deleted)?;
        store_index(&txn, &table_index_name, index)?;
        txn.commit()?;

        self.collections
            .write()
            .unwrap()
            .insert(name.to_string(), handle);
        Ok(removed)
    }

    pub fn list_indexes(&self, name: &str) -> Result<Vec<IndexMetadata>, DbError> {
        Ok(self.handle(name)?.indexes)
    }

    pub fn index_info(&self, name: &str, index_id: u32) -> Result<IndexInfo, DbError> {
        let handle = self.handle(name)?;
        let txn = self.store.begin(true)?;
        let maintainer = Maintainer::new(&handle, &self.options);
        Ok(maintainer.index_info(&txn, index_id)?)
    }

    // ── Writes ──────────────────────────────────────────────────

    pub fn insert(&self, name: &str, docs: Vec<Document>) -> Result<(), DbError> {
        let handle = self.handle(name)?;
        let maintainer = Maintainer::new(&handle, &self.options);
        let now = datetime_from_millis((self.clock)());

        let txn = self.store.begin(false)?;
        for mut doc in docs {
            if !doc.contains_key(CREATED_AT_FIELD) {
                doc.insert(CREATED_AT_FIELD, now.clone());
            }
            doc.insert(UPDATED_AT_FIELD, now.clone());
            let raw = RawDocumentBuf::try_from(&doc)
                .map_err(|e| DbError::Engine(flint_engine::EngineError::InvalidDocument(e.to_string())))?;
            let pk = handle.schema.primary_key_values(&raw)?;
            let data_key = key::data_key(&handle.table_index_name, &pk)?;
            if txn.get(&data_key)?.is_some() {
                return Err(DbError::DuplicateKey(pk_display(&pk)));
            }
            maintainer.index_document(&txn, &raw, &pk)?;
            txn.set(&data_key, raw.as_bytes())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Apply top-level field changes to every document matching the
    /// filter. Primary-key fields are immutable.
    pub fn update(&self, name: &str, filter: &Document, changes: &Document) -> Result<u64, DbError> {
        let handle = self.handle(name)?;
        for pk_field in &handle.schema.primary_key {
            if changes.contains_key(pk_field) {
                return Err(DbError::Engine(flint_engine::EngineError::InvalidDocument(
                    format!("primary key field '{pk_field}' is immutable"),
                )));
            }
        }
        let expr = parse_filter(filter)?;
        let plan = Planner::new(&handle, &self.options).plan(&expr, &[]);
        let maintainer = Maintainer::new(&handle, &self.options);
        let now = datetime_from_millis((self.clock)());

        let txn = self.store.begin(false)?;
        let rows = exec::execute(&txn, &handle, &self.options, &plan)?;
        let count = rows.len() as u64;
        for row in rows {
            let mut doc = Document::try_from(&*row.doc)
                .map_err(|e| DbError::Engine(flint_engine::EngineError::InvalidDocument(e.to_string())))?;
            for (field, value) in changes {
                doc.insert(field.clone(), value.clone());
            }
            doc.insert(UPDATED_AT_FIELD, now.clone());
            let new_raw = RawDocumentBuf::try_from(&doc)
                .map_err(|e| DbError::Engine(flint_engine::EngineError::InvalidDocument(e.to_string())))?;
            maintainer.update_document(&txn, &new_raw, &row.doc, &row.pk)?;
            let data_key = key::data_key(&handle.table_index_name, &row.pk)?;
            txn.set(&data_key, new_raw.as_bytes())?;
        }
        txn.commit()?;
        Ok(count)
    }

    pub fn delete(&self, name: &str, filter: &Document) -> Result<u64, DbError> {
        let handle = self.handle(name)?;
        let expr = parse_filter(filter)?;
        let plan = Planner::new(&handle, &self.options).plan(&expr, &[]);
        let maintainer = Maintainer::new(&handle, &self.options);

        let txn = self.store.begin(false)?;
        let rows = exec::execute(&txn, &handle, &self.options, &plan)?;
        let count = rows.len() as u64;
        for row in rows {
            maintainer.delete_document(&txn, &row.doc, &row.pk)?;
            let data_key = key::data_key(&handle.table_index_name, &row.pk)?;
            txn.clear(&data_key)?;
        }
        txn.commit()?;
        Ok(count)
    }

    // ── Reads ───────────────────────────────────────────────────

    pub fn find(
        &self,
        name: &str,
        filter: &Document,
        sort: &[Sort],
    ) -> Result<Vec<RawDocumentBuf>, DbError> {
        let handle = self.handle(name)?;
        let expr = parse_filter(filter)?;
        let plan = Planner::new(&handle, &self.options).plan(&expr, sort);
        let txn = self.store.begin(true)?;
        let rows = exec::execute(&txn, &handle, &self.options, &plan)?;
        Ok(rows.into_iter().map(|row| row.doc).collect())
    }

    /// Compile the query without executing it.
    pub fn explain(
        &self,
        name: &str,
        filter: &Document,
        sort: &[Sort],
    ) -> Result<Explain, DbError> {
        Ok(self.plan(name, filter, sort)?.explain)
    }

    pub fn plan(
        &self,
        name: &str,
        filter: &Document,
        sort: &[Sort],
    ) -> Result<QueryPlan, DbError> {
        let handle = self.handle(name)?;
        let expr = parse_filter(filter)?;
        Ok(Planner::new(&handle, &self.options).plan(&expr, sort))
    }

    // ── Internals ───────────────────────────────────────────────

    fn handle(&self, name: &str) -> Result<CollectionHandle, DbError> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::CollectionNotFound(name.to_string()))
    }

    /// Whether any user-declared field carries an index annotation
    /// (the auto-timestamps do not count: a schema with no indexed
    /// fields stays inactive until explicitly built).
    fn schema_declares_indexes(&self, schema: &CollectionSchema) -> bool {
        fn declares(field: &FieldSchema) -> bool {
            field.index
                || field.fields.iter().any(declares)
                || field.items.as_deref().is_some_and(declares)
        }
        self.options.index_all
            || schema
                .fields
                .iter()
                .filter(|f| f.name != CREATED_AT_FIELD && f.name != UPDATED_AT_FIELD)
                .any(declares)
    }
}

fn pk_display(pk: &[IndexValue]) -> String {
    pk.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
