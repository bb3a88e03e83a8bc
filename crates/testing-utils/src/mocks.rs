//! 内存中的模拟实现，单元测试不需要真实数据库

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{
    ClusterEvent, ClusterEventBus, DataColumn, DataRepository, DataSet, NodeDirectory, Value,
};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Default)]
struct MockTable {
    name: String,
    columns: Vec<String>,
    unique_columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// `DataRepository` 的内存实现，表名大小写不敏感
#[derive(Debug, Clone, Default)]
pub struct MockDataRepository {
    tables: Arc<Mutex<HashMap<String, MockTable>>>,
    failing_tables: Arc<Mutex<HashSet<String>>>,
    truncated: Arc<Mutex<Vec<String>>>,
}

impl MockDataRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.add_table(name, columns, rows);
        self
    }

    pub fn add_table(&self, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        let table = MockTable {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique_columns: Vec::new(),
            rows,
        };
        self.tables
            .lock()
            .unwrap()
            .insert(name.to_lowercase(), table);
    }

    /// 只有行数的表，行内容为单列递增整数
    pub fn with_row_count(self, name: &str, count: i64) -> Self {
        let rows = (1..=count).map(|i| vec![Value::Int(i)]).collect();
        self.with_table(name, &["id"], rows)
    }

    pub fn set_unique_columns(&self, table: &str, columns: &[&str]) {
        if let Some(t) = self.tables.lock().unwrap().get_mut(&table.to_lowercase()) {
            t.unique_columns = columns.iter().map(|c| c.to_string()).collect();
        }
    }

    /// 之后对该表的读操作都返回错误
    pub fn fail_table(&self, table: &str) {
        self.failing_tables
            .lock()
            .unwrap()
            .insert(table.to_lowercase());
    }

    pub fn rows_of(&self, table: &str) -> Vec<Vec<Value>> {
        self.tables
            .lock()
            .unwrap()
            .get(&table.to_lowercase())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn truncated_tables(&self) -> Vec<String> {
        self.truncated.lock().unwrap().clone()
    }

    fn table(&self, name: &str) -> MigrationResult<MockTable> {
        if self.failing_tables.lock().unwrap().contains(&name.to_lowercase()) {
            return Err(MigrationError::DatabaseOperation(format!(
                "模拟的读取失败: {name}"
            )));
        }
        self.tables
            .lock()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| MigrationError::DatabaseOperation(format!("表不存在: {name}")))
    }

    fn dataset(table: &MockTable, rows: Vec<Vec<Value>>) -> MigrationResult<DataSet> {
        let columns = table
            .columns
            .iter()
            .map(|c| DataColumn::new(c.clone(), "MOCK"))
            .collect();
        DataSet::new(columns, rows)
    }

    fn column_index(table: &MockTable, column: &str) -> MigrationResult<usize> {
        table
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| MigrationError::ColumnNotFound {
                column: column.to_string(),
            })
    }

    fn sorted_by(table: &MockTable, index: usize) -> Vec<Vec<Value>> {
        let mut rows = table.rows.clone();
        rows.sort_by_key(|row| row[index].as_i64().unwrap_or(i64::MIN));
        rows
    }
}

#[async_trait]
impl DataRepository for MockDataRepository {
    fn dialect_name(&self) -> &'static str {
        "mock"
    }

    async fn validate_connection(&self) -> MigrationResult<bool> {
        Ok(true)
    }

    async fn get_row_count(&self, table: &str) -> MigrationResult<i64> {
        Ok(self.table(table)?.rows.len() as i64)
    }

    async fn get_row_count_modified_after(
        &self,
        table: &str,
        _since: DateTime<Utc>,
    ) -> MigrationResult<i64> {
        self.get_row_count(table).await
    }

    async fn get_all(&self, table: &str, _ignore_columns: &[String]) -> MigrationResult<DataSet> {
        let table = self.table(table)?;
        Self::dataset(&table, table.rows.clone())
    }

    async fn get_all_modified_after(
        &self,
        table: &str,
        ignore_columns: &[String],
        _since: DateTime<Utc>,
    ) -> MigrationResult<DataSet> {
        self.get_all(table, ignore_columns).await
    }

    async fn get_batch_without_identifier(
        &self,
        table: &str,
        _order_columns: &[String],
        batch_size: u32,
        offset: u64,
        _since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet> {
        let table = self.table(table)?;
        let rows = table
            .rows
            .iter()
            .skip(offset as usize)
            .take(batch_size as usize)
            .cloned()
            .collect();
        Self::dataset(&table, rows)
    }

    async fn get_batch_ordered_by_column(
        &self,
        table: &str,
        column: &str,
        last_value: Option<&Value>,
        batch_size: u32,
        _since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet> {
        let table = self.table(table)?;
        let index = Self::column_index(&table, column)?;
        let start = last_value.and_then(Value::as_i64).unwrap_or(i64::MIN);
        let rows = Self::sorted_by(&table, index)
            .into_iter()
            .filter(|row| row[index].as_i64().unwrap_or(i64::MIN) >= start)
            .take(batch_size as usize)
            .collect();
        Self::dataset(&table, rows)
    }

    async fn get_batch_markers_ordered_by_column(
        &self,
        table: &str,
        column: &str,
        batch_size: u32,
        _since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet> {
        let table = self.table(table)?;
        let index = Self::column_index(&table, column)?;
        let markers = Self::sorted_by(&table, index)
            .into_iter()
            .enumerate()
            .filter(|(rownum, _)| rownum % batch_size.max(1) as usize == 0)
            .map(|(rownum, row)| vec![row[index].clone(), Value::Int(rownum as i64)])
            .collect();
        DataSet::new(
            vec![
                DataColumn::new(table.columns[index].clone(), "MOCK"),
                DataColumn::new("rownum", "MOCK"),
            ],
            markers,
        )
    }

    async fn get_unique_columns(&self, table: &str) -> MigrationResult<Vec<String>> {
        Ok(self.table(table)?.unique_columns)
    }

    async fn get_null_count(
        &self,
        table: &str,
        column: &str,
        _since: Option<DateTime<Utc>>,
    ) -> MigrationResult<i64> {
        let table = self.table(table)?;
        let index = Self::column_index(&table, column)?;
        Ok(table.rows.iter().filter(|row| row[index].is_null()).count() as i64)
    }

    async fn get_all_table_names(&self) -> MigrationResult<Vec<String>> {
        let mut names: Vec<String> = self
            .tables
            .lock()
            .unwrap()
            .values()
            .map(|t| t.name.clone())
            .collect();
        names.sort_by_key(|n| n.to_lowercase());
        Ok(names)
    }

    async fn get_all_column_names(&self, table: &str) -> MigrationResult<Vec<String>> {
        Ok(self.table(table)?.columns)
    }

    async fn truncate_table(&self, table: &str) -> MigrationResult<u64> {
        let mut tables = self.tables.lock().unwrap();
        let t = tables
            .get_mut(&table.to_lowercase())
            .ok_or_else(|| MigrationError::DatabaseOperation(format!("表不存在: {table}")))?;
        let removed = t.rows.len() as u64;
        t.rows.clear();
        self.truncated.lock().unwrap().push(table.to_string());
        Ok(removed)
    }

    async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> MigrationResult<u64> {
        let mut tables = self.tables.lock().unwrap();
        let t = tables
            .entry(table.to_lowercase())
            .or_insert_with(|| MockTable {
                name: table.to_string(),
                columns: columns.to_vec(),
                ..Default::default()
            });
        t.rows.extend(rows.iter().cloned());
        Ok(rows.len() as u64)
    }

    async fn disable_indexes_of_table(&self, _table: &str) -> MigrationResult<usize> {
        Ok(0)
    }

    async fn enable_indexes_of_table(&self, _table: &str) -> MigrationResult<usize> {
        Ok(0)
    }

    async fn drop_indexes_of_table(&self, _table: &str) -> MigrationResult<usize> {
        Ok(0)
    }

    async fn get_database_utilization(&self) -> Option<f64> {
        None
    }
}

/// 固定成员的节点目录，可以模拟查询失败
#[derive(Debug, Clone)]
pub struct MockNodeDirectory {
    local_node_id: i32,
    nodes: Arc<Mutex<Vec<i32>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockNodeDirectory {
    pub fn new(local_node_id: i32, nodes: Vec<i32>) -> Self {
        Self {
            local_node_id,
            nodes: Arc::new(Mutex::new(nodes)),
            failing: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set_nodes(&self, nodes: Vec<i32>) {
        *self.nodes.lock().unwrap() = nodes;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl NodeDirectory for MockNodeDirectory {
    fn local_node_id(&self) -> i32 {
        self.local_node_id
    }

    async fn live_node_ids(&self) -> MigrationResult<Vec<i32>> {
        if *self.failing.lock().unwrap() {
            return Err(MigrationError::DatabaseOperation(
                "模拟的节点查询失败".to_string(),
            ));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }
}

/// 记录所有已发布通知的事件总线，同时转发给订阅者
#[derive(Debug, Clone)]
pub struct RecordingEventBus {
    published: Arc<Mutex<Vec<ClusterEvent>>>,
    sender: broadcast::Sender<ClusterEvent>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            published: Arc::new(Mutex::new(Vec::new())),
            sender,
        }
    }

    pub fn published(&self) -> Vec<ClusterEvent> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_types(&self) -> Vec<String> {
        self.published()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

impl Default for RecordingEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterEventBus for RecordingEventBus {
    async fn publish(&self, event: &ClusterEvent) -> MigrationResult<()> {
        self.published.lock().unwrap().push(event.clone());
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self) -> MigrationResult<broadcast::Receiver<ClusterEvent>> {
        Ok(self.sender.subscribe())
    }
}
