use std::{
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{
    params,
    Connection,
};

use crate::{
    KeyValue,
    Order,
    WriteBatch,
    WriteOp,
};

const INIT: &str = r#"
CREATE TABLE IF NOT EXISTS hub_kv (
    key BLOB PRIMARY KEY,
    value BLOB NOT NULL
) WITHOUT ROWID;
"#;

// We only have a single SQLite connection which does not allow async calls,
// so queries cannot actually run concurrently. Each call holds the
// connection for its duration, which makes range scans atomic snapshots.
pub struct SqliteKeyValue {
    inner: Arc<Mutex<Inner>>,
    newly_created: bool,
}

struct Inner {
    connection: Connection,
}

impl SqliteKeyValue {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let newly_created = !Path::new(path).exists();
        let connection = Connection::open(path)?;
        // Create tables unconditionally since this is idempotent.
        connection.execute_batch(INIT)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { connection })),
            newly_created,
        })
    }
}

#[async_trait]
impl KeyValue for SqliteKeyValue {
    fn is_fresh(&self) -> bool {
        self.newly_created
    }

    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        let inner = self.inner.lock();
        let mut stmt = inner
            .connection
            .prepare_cached("SELECT value FROM hub_kv WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn range(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        order: Order,
        limit: usize,
    ) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let direction = match order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };
        let limit = limit.min(i64::MAX as usize);
        let upper = match end {
            Some(_) => " AND key < ?2",
            None => "",
        };
        let query = format!(
            "SELECT key, value FROM hub_kv WHERE key >= ?1{upper} ORDER BY key {direction} LIMIT \
             {limit}",
        );
        let inner = self.inner.lock();
        let mut stmt = inner.connection.prepare_cached(&query)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            let key: Vec<u8> = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            Ok((key, value))
        };
        let rows = match end {
            Some(end) => stmt
                .query_map(params![start, end], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![start], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    async fn write(&self, batch: WriteBatch) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let tx = inner.connection.transaction()?;
        {
            let mut put = tx.prepare_cached(
                "INSERT INTO hub_kv (key, value) VALUES (?1, ?2) ON CONFLICT (key) DO UPDATE SET \
                 value = excluded.value",
            )?;
            let mut delete = tx.prepare_cached("DELETE FROM hub_kv WHERE key = ?1")?;
            for op in batch.ops() {
                match op {
                    WriteOp::Put { key, value } => {
                        put.execute(params![key, value])?;
                    },
                    WriteOp::Delete { key } => {
                        delete.execute(params![key])?;
                    },
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
