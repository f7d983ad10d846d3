//! Database layer: catalog, table registry, and rollback target.
//!
//! A database is a directory holding one record file per table, one file
//! per index, and a JSON metadata file. Column offsets are computed here at
//! table creation; index creation backfills entries from the existing rows.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use corvus_buffer::{BufferPool, BufferPoolConfig, DiskManager};
use corvus_common::meta::IndexMeta;
use corvus_common::page::Rid;
use corvus_common::{ColMeta, ColType, CorvusError, Result, StorageConfig, TableMeta};
use corvus_storage::{BTreeIndex, RecordFile};
use corvus_txn::RecordStore;

const META_FILE: &str = "db.meta";

/// Persisted catalog metadata.
#[derive(Serialize, Deserialize)]
struct DbMeta {
    next_file_id: u32,
    tables: Vec<TableEntry>,
}

#[derive(Serialize, Deserialize)]
struct TableEntry {
    meta: TableMeta,
    file_id: u32,
    /// One file id per entry of `meta.indexes`, in the same order.
    index_file_ids: Vec<u32>,
}

/// An open index over a table.
pub struct TableIndex {
    pub meta: IndexMeta,
    pub file_id: u32,
    pub index: BTreeIndex,
}

/// An open table: metadata, record file, and indexes.
pub struct Table {
    pub name: String,
    /// The record file's id; doubles as the table's lock resource id.
    pub file_id: u32,
    pub file: RecordFile,
    meta: RwLock<TableMeta>,
    indexes: RwLock<Vec<Arc<TableIndex>>>,
}

impl Table {
    /// Returns a snapshot of the table metadata.
    pub fn meta(&self) -> TableMeta {
        self.meta.read().clone()
    }

    /// Returns the fixed record size.
    pub fn record_size(&self) -> usize {
        self.meta.read().record_size()
    }

    /// Returns a snapshot of the open indexes.
    pub fn indexes(&self) -> Vec<Arc<TableIndex>> {
        self.indexes.read().clone()
    }
}

/// An open database.
pub struct Database {
    root: PathBuf,
    pool: Arc<BufferPool>,
    next_file_id: Mutex<u32>,
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Database {
    /// Creates a new database directory.
    pub fn create(config: &StorageConfig) -> Result<Self> {
        let root = config.data_dir.clone();
        if root.exists() {
            return Err(CorvusError::DatabaseExists(root.display().to_string()));
        }
        std::fs::create_dir_all(&root)?;

        let db = Self {
            root,
            pool: Self::build_pool(config)?,
            next_file_id: Mutex::new(0),
            tables: RwLock::new(HashMap::new()),
        };
        db.save_meta()?;
        Ok(db)
    }

    /// Opens an existing database directory.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let root = config.data_dir.clone();
        if !root.join(META_FILE).exists() {
            return Err(CorvusError::DatabaseNotFound(root.display().to_string()));
        }

        let raw = std::fs::read_to_string(root.join(META_FILE))?;
        let meta: DbMeta = serde_json::from_str(&raw)
            .map_err(|e| CorvusError::Internal(format!("bad catalog metadata: {}", e)))?;

        let pool = Self::build_pool(config)?;
        let mut tables = HashMap::new();
        for entry in meta.tables {
            let file = RecordFile::open(pool.clone(), entry.file_id)?;
            let mut indexes = Vec::new();
            for (ix_meta, ix_file_id) in entry.meta.indexes.iter().zip(&entry.index_file_ids) {
                indexes.push(Arc::new(TableIndex {
                    meta: ix_meta.clone(),
                    file_id: *ix_file_id,
                    index: BTreeIndex::open(pool.clone(), *ix_file_id)?,
                }));
            }
            let name = entry.meta.name.clone();
            tables.insert(
                name.clone(),
                Arc::new(Table {
                    name,
                    file_id: entry.file_id,
                    file,
                    meta: RwLock::new(entry.meta),
                    indexes: RwLock::new(indexes),
                }),
            );
        }

        Ok(Self {
            root,
            pool,
            next_file_id: Mutex::new(meta.next_file_id),
            tables: RwLock::new(tables),
        })
    }

    fn build_pool(config: &StorageConfig) -> Result<Arc<BufferPool>> {
        let disk = Arc::new(DiskManager::new(&config.data_dir, config.fsync_enabled)?);
        Ok(Arc::new(BufferPool::new(
            disk,
            BufferPoolConfig {
                num_frames: config.buffer_pool_pages,
            },
        )))
    }

    /// Returns the buffer pool backing this database.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns the database directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn allocate_file_id(&self) -> u32 {
        let mut next = self.next_file_id.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// Writes the catalog metadata file.
    fn save_meta(&self) -> Result<()> {
        let tables = self.tables.read();
        let entries: Vec<TableEntry> = tables
            .values()
            .map(|t| TableEntry {
                meta: t.meta(),
                file_id: t.file_id,
                index_file_ids: t.indexes().iter().map(|ix| ix.file_id).collect(),
            })
            .collect();
        let meta = DbMeta {
            next_file_id: *self.next_file_id.lock(),
            tables: entries,
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| CorvusError::Internal(format!("catalog serialization: {}", e)))?;
        std::fs::write(self.root.join(META_FILE), json)?;
        Ok(())
    }

    /// Returns an open table handle.
    pub fn get_table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CorvusError::TableNotFound(name.to_string()))
    }

    /// Creates a table. Column offsets are assigned contiguously in
    /// declaration order.
    pub fn create_table(&self, name: &str, cols: &[(String, ColType, usize)]) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(CorvusError::TableExists(name.to_string()));
        }

        let mut offset = 0;
        let cols: Vec<ColMeta> = cols
            .iter()
            .map(|(col_name, col_type, declared_len)| {
                let len = col_type.fixed_size(*declared_len);
                let col = ColMeta {
                    tab_name: name.to_string(),
                    name: col_name.clone(),
                    col_type: *col_type,
                    len,
                    offset,
                };
                offset += len;
                col
            })
            .collect();

        let meta = TableMeta {
            name: name.to_string(),
            cols,
            indexes: Vec::new(),
        };
        let file_id = self.allocate_file_id();
        let file = RecordFile::create(self.pool.clone(), file_id, meta.record_size())?;

        tables.insert(
            name.to_string(),
            Arc::new(Table {
                name: name.to_string(),
                file_id,
                file,
                meta: RwLock::new(meta),
                indexes: RwLock::new(Vec::new()),
            }),
        );
        drop(tables);
        self.save_meta()
    }

    /// Drops a table and its indexes, deleting their files.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let table = {
            let mut tables = self.tables.write();
            tables
                .remove(name)
                .ok_or_else(|| CorvusError::TableNotFound(name.to_string()))?
        };

        for ix in table.indexes() {
            self.pool.discard_file(ix.file_id);
            self.pool.disk().delete_file(ix.file_id)?;
        }
        self.pool.discard_file(table.file_id);
        self.pool.disk().delete_file(table.file_id)?;
        self.save_meta()
    }

    /// Deterministic index name for a table and column list.
    pub fn index_name(table: &str, col_names: &[String]) -> String {
        format!("{}_{}.idx", table, col_names.join("_"))
    }

    /// Creates an index over the given columns, backfilling entries from
    /// the table's existing rows.
    pub fn create_index(&self, table_name: &str, col_names: &[String]) -> Result<()> {
        let table = self.get_table(table_name)?;
        let ix_name = Self::index_name(table_name, col_names);

        let ix_meta = {
            let meta = table.meta();
            if meta.has_index(col_names) {
                return Err(CorvusError::IndexExists(ix_name));
            }
            let cols: Vec<ColMeta> = col_names
                .iter()
                .map(|n| meta.get_col(n).map(|c| c.clone()))
                .collect::<Result<_>>()?;
            IndexMeta::new(cols)
        };

        let file_id = self.allocate_file_id();
        let key_cols: Vec<(ColType, usize)> = ix_meta
            .cols
            .iter()
            .map(|c| (c.col_type, c.len))
            .collect();
        let index = BTreeIndex::create(self.pool.clone(), file_id, &key_cols, None)?;

        // Backfill from existing rows
        let mut scan = table.file.scan()?;
        while !scan.is_end() {
            let rid = scan.rid();
            let record = table.file.get_record(rid)?;
            index.insert_entry(&ix_meta.build_key(&record.data), rid)?;
            scan.next()?;
        }

        table.meta.write().indexes.push(ix_meta.clone());
        table.indexes.write().push(Arc::new(TableIndex {
            meta: ix_meta,
            file_id,
            index,
        }));
        self.save_meta()
    }

    /// Drops the index over the given columns.
    pub fn drop_index(&self, table_name: &str, col_names: &[String]) -> Result<()> {
        let table = self.get_table(table_name)?;
        let ix_name = Self::index_name(table_name, col_names);

        let pos = {
            let meta = table.meta();
            meta.indexes
                .iter()
                .position(|ix| {
                    ix.cols.len() == col_names.len()
                        && ix.cols.iter().zip(col_names).all(|(c, n)| &c.name == n)
                })
                .ok_or(CorvusError::IndexNotFound(ix_name))?
        };

        table.meta.write().indexes.remove(pos);
        let removed = table.indexes.write().remove(pos);
        self.pool.discard_file(removed.file_id);
        self.pool.disk().delete_file(removed.file_id)?;
        self.save_meta()
    }

    /// Flushes all table and index state to disk.
    pub fn close(&self) -> Result<()> {
        for table in self.tables.read().values() {
            table.file.close()?;
            for ix in table.indexes() {
                ix.index.close()?;
            }
        }
        self.pool.flush_all()?;
        self.save_meta()
    }
}

impl RecordStore for Database {
    fn rollback_insert(&self, table: &str, rid: Rid) -> Result<()> {
        self.get_table(table)?.file.delete_record(rid)
    }

    fn rollback_delete(&self, table: &str, rid: Rid, old: &[u8]) -> Result<()> {
        self.get_table(table)?.file.put_record(rid, old)
    }

    fn rollback_update(&self, table: &str, rid: Rid, old: &[u8]) -> Result<()> {
        self.get_table(table)?.file.update_record(rid, old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> StorageConfig {
        StorageConfig {
            data_dir: dir.join("db"),
            buffer_pool_pages: 128,
            fsync_enabled: false,
            ..Default::default()
        }
    }

    fn int_cols(names: &[&str]) -> Vec<(String, ColType, usize)> {
        names
            .iter()
            .map(|n| (n.to_string(), ColType::Int, 4))
            .collect()
    }

    #[test]
    fn test_create_and_open_database() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        let db = Database::create(&config).unwrap();
        db.create_table("t", &int_cols(&["a", "b"])).unwrap();
        db.close().unwrap();
        drop(db);

        let db = Database::open(&config).unwrap();
        let table = db.get_table("t").unwrap();
        assert_eq!(table.record_size(), 8);
        assert_eq!(table.meta().cols[1].offset, 4);
    }

    #[test]
    fn test_create_existing_database_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());

        Database::create(&config).unwrap();
        assert!(matches!(
            Database::create(&config),
            Err(CorvusError::DatabaseExists(_))
        ));
    }

    #[test]
    fn test_open_missing_database_fails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        assert!(matches!(
            Database::open(&config),
            Err(CorvusError::DatabaseNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_table_fails() {
        let dir = tempdir().unwrap();
        let db = Database::create(&test_config(dir.path())).unwrap();
        db.create_table("t", &int_cols(&["a"])).unwrap();
        assert!(matches!(
            db.create_table("t", &int_cols(&["a"])),
            Err(CorvusError::TableExists(_))
        ));
    }

    #[test]
    fn test_drop_table() {
        let dir = tempdir().unwrap();
        let db = Database::create(&test_config(dir.path())).unwrap();
        db.create_table("t", &int_cols(&["a"])).unwrap();
        db.drop_table("t").unwrap();
        assert!(matches!(
            db.get_table("t"),
            Err(CorvusError::TableNotFound(_))
        ));
        assert!(matches!(
            db.drop_table("t"),
            Err(CorvusError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_mixed_column_offsets() {
        let dir = tempdir().unwrap();
        let db = Database::create(&test_config(dir.path())).unwrap();
        db.create_table(
            "t",
            &[
                ("id".to_string(), ColType::Int, 4),
                ("name".to_string(), ColType::Str, 12),
                ("score".to_string(), ColType::Float, 4),
            ],
        )
        .unwrap();

        let meta = db.get_table("t").unwrap().meta();
        assert_eq!(meta.cols[0].offset, 0);
        assert_eq!(meta.cols[1].offset, 4);
        assert_eq!(meta.cols[1].len, 12);
        assert_eq!(meta.cols[2].offset, 16);
        assert_eq!(meta.record_size(), 20);
    }

    #[test]
    fn test_index_name_is_deterministic() {
        assert_eq!(
            Database::index_name("t", &["a".to_string(), "b".to_string()]),
            "t_a_b.idx"
        );
    }

    #[test]
    fn test_create_index_backfills_existing_rows() {
        let dir = tempdir().unwrap();
        let db = Database::create(&test_config(dir.path())).unwrap();
        db.create_table("t", &int_cols(&["a", "b"])).unwrap();

        let table = db.get_table("t").unwrap();
        let mut rids = Vec::new();
        for v in 0..10i32 {
            let mut rec = v.to_le_bytes().to_vec();
            rec.extend_from_slice(&(v * 10).to_le_bytes());
            rids.push(table.file.insert_record(&rec).unwrap());
        }

        db.create_index("t", &["a".to_string()]).unwrap();

        let indexes = table.indexes();
        assert_eq!(indexes.len(), 1);
        for v in 0..10i32 {
            let found = indexes[0]
                .index
                .get_value(&v.to_le_bytes())
                .unwrap();
            assert_eq!(found, Some(rids[v as usize]));
        }
    }

    #[test]
    fn test_duplicate_index_fails() {
        let dir = tempdir().unwrap();
        let db = Database::create(&test_config(dir.path())).unwrap();
        db.create_table("t", &int_cols(&["a"])).unwrap();
        db.create_index("t", &["a".to_string()]).unwrap();
        assert!(matches!(
            db.create_index("t", &["a".to_string()]),
            Err(CorvusError::IndexExists(_))
        ));
    }

    #[test]
    fn test_drop_index() {
        let dir = tempdir().unwrap();
        let db = Database::create(&test_config(dir.path())).unwrap();
        db.create_table("t", &int_cols(&["a"])).unwrap();
        db.create_index("t", &["a".to_string()]).unwrap();
        db.drop_index("t", &["a".to_string()]).unwrap();
        assert!(db.get_table("t").unwrap().indexes().is_empty());
        assert!(matches!(
            db.drop_index("t", &["a".to_string()]),
            Err(CorvusError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_rollback_target_operations() {
        let dir = tempdir().unwrap();
        let db = Database::create(&test_config(dir.path())).unwrap();
        db.create_table("t", &int_cols(&["a"])).unwrap();

        let table = db.get_table("t").unwrap();
        let rid = table.file.insert_record(&1i32.to_le_bytes()).unwrap();

        db.rollback_update("t", rid, &2i32.to_le_bytes()).unwrap();
        assert_eq!(&table.file.get_record(rid).unwrap().data[..], &2i32.to_le_bytes());

        db.rollback_insert("t", rid).unwrap();
        assert!(!table.file.is_record(rid).unwrap());

        db.rollback_delete("t", rid, &3i32.to_le_bytes()).unwrap();
        assert_eq!(&table.file.get_record(rid).unwrap().data[..], &3i32.to_le_bytes());
    }
}
