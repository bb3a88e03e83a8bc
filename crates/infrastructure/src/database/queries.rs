//! 协调表的SQL，PostgreSQL与SQLite共用（两者都支持 $n 占位符与 ON CONFLICT）

pub const TASKS_TABLE: &str = "migrationtoolkit_tablecopytasks";

pub const POSTGRES_SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS migrationtoolkit_tablecopytasks (
        migrationid VARCHAR(255) NOT NULL,
        pipelinename VARCHAR(512) NOT NULL,
        sourcetablename VARCHAR(255) NOT NULL,
        targettablename VARCHAR(255) NOT NULL,
        columnmap TEXT NOT NULL,
        targetnodeid INTEGER NOT NULL,
        sourcerowcount BIGINT NOT NULL DEFAULT 0,
        targetrowcount BIGINT NOT NULL DEFAULT 0,
        status VARCHAR(32) NOT NULL,
        error TEXT,
        lastupdate TIMESTAMPTZ NOT NULL,
        durationms BIGINT,
        PRIMARY KEY (migrationid, pipelinename)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tablecopytasks_node_status
        ON migrationtoolkit_tablecopytasks (migrationid, targetnodeid, status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS migrationtoolkit_tablecopystatus (
        migrationid VARCHAR(255) PRIMARY KEY,
        status VARCHAR(32) NOT NULL,
        startat TIMESTAMPTZ NOT NULL,
        endat TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS migrationtoolkit_clusternodes (
        nodeid INTEGER PRIMARY KEY,
        hostname VARCHAR(255) NOT NULL,
        lastheartbeat TIMESTAMPTZ NOT NULL
    )
    "#,
];

pub const SQLITE_SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS migrationtoolkit_tablecopytasks (
        migrationid TEXT NOT NULL,
        pipelinename TEXT NOT NULL,
        sourcetablename TEXT NOT NULL,
        targettablename TEXT NOT NULL,
        columnmap TEXT NOT NULL,
        targetnodeid INTEGER NOT NULL,
        sourcerowcount INTEGER NOT NULL DEFAULT 0,
        targetrowcount INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error TEXT,
        lastupdate TEXT NOT NULL,
        durationms INTEGER,
        PRIMARY KEY (migrationid, pipelinename)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tablecopytasks_node_status
        ON migrationtoolkit_tablecopytasks (migrationid, targetnodeid, status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS migrationtoolkit_tablecopystatus (
        migrationid TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        startat TEXT NOT NULL,
        endat TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS migrationtoolkit_clusternodes (
        nodeid INTEGER PRIMARY KEY,
        hostname TEXT NOT NULL,
        lastheartbeat TEXT NOT NULL
    )
    "#,
];

pub const TASK_COLUMNS: &str = "migrationid, pipelinename, sourcetablename, targettablename, \
     columnmap, targetnodeid, sourcerowcount, targetrowcount, status, error, lastupdate, durationms";

pub const INSERT_STATUS: &str = "INSERT INTO migrationtoolkit_tablecopystatus (migrationid, status, startat) \
     VALUES ($1, 'RUNNING', $2) ON CONFLICT (migrationid) DO NOTHING";

pub const INSERT_TASK: &str = "INSERT INTO migrationtoolkit_tablecopytasks \
     (migrationid, pipelinename, sourcetablename, targettablename, columnmap, targetnodeid, \
      sourcerowcount, targetrowcount, status, error, lastupdate, durationms) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 'PENDING', NULL, $8, NULL) \
     ON CONFLICT (migrationid, pipelinename) DO NOTHING";

pub const CLAIM_TASK: &str = "UPDATE migrationtoolkit_tablecopytasks \
     SET status = 'RUNNING', lastupdate = $4 \
     WHERE migrationid = $1 AND pipelinename = $2 AND targetnodeid = $3 AND status = 'PENDING'";

pub const UPDATE_PROGRESS: &str = "UPDATE migrationtoolkit_tablecopytasks \
     SET targetrowcount = targetrowcount + $3, lastupdate = $4 \
     WHERE migrationid = $1 AND pipelinename = $2";

pub const MARK_COMPLETED: &str = "UPDATE migrationtoolkit_tablecopytasks \
     SET status = 'COMPLETED', targetrowcount = $3, durationms = $4, lastupdate = $5, error = NULL \
     WHERE migrationid = $1 AND pipelinename = $2 AND status IN ('PENDING', 'RUNNING')";

pub const MARK_FAILED: &str = "UPDATE migrationtoolkit_tablecopytasks \
     SET status = 'FAILED', error = $3, durationms = $4, lastupdate = $5 \
     WHERE migrationid = $1 AND pipelinename = $2 AND status IN ('PENDING', 'RUNNING')";

/// 只处理尚未被领取的任务，执行中的任务由工作节点在下一批次检查时结束
pub const FAIL_PENDING_TASKS: &str = "UPDATE migrationtoolkit_tablecopytasks \
     SET status = 'FAILED', error = $2, lastupdate = $3 \
     WHERE migrationid = $1 AND status = 'PENDING'";

pub const SELECT_STATUS_AGGREGATE: &str = "SELECT s.migrationid, s.status, s.startat, s.endat, \
     (SELECT COUNT(*) FROM migrationtoolkit_tablecopytasks t WHERE t.migrationid = s.migrationid) AS total, \
     (SELECT COUNT(*) FROM migrationtoolkit_tablecopytasks t WHERE t.migrationid = s.migrationid AND t.status = 'COMPLETED') AS completed, \
     (SELECT COUNT(*) FROM migrationtoolkit_tablecopytasks t WHERE t.migrationid = s.migrationid AND t.status = 'FAILED') AS failed, \
     (SELECT MAX(t.lastupdate) FROM migrationtoolkit_tablecopytasks t WHERE t.migrationid = s.migrationid) AS lastupdate \
     FROM migrationtoolkit_tablecopystatus s WHERE s.migrationid = $1";

pub const SELECT_PROGRESS: &str =
    "SELECT status FROM migrationtoolkit_tablecopystatus WHERE migrationid = $1";

pub const SET_STATUS: &str = "UPDATE migrationtoolkit_tablecopystatus SET status = $2 \
     WHERE migrationid = $1 AND status NOT IN ('COMPLETED', 'FAILED', 'ABORTED')";

/// 结束时间只写一次；已处于终态时只允许用同一状态补写结束时间
pub const FINISH_MIGRATION: &str = "UPDATE migrationtoolkit_tablecopystatus SET status = $2, endat = $3 \
     WHERE migrationid = $1 AND endat IS NULL \
     AND (status NOT IN ('COMPLETED', 'FAILED', 'ABORTED') OR status = $2)";

pub const SELECT_ACTIVE_MIGRATIONS: &str = "SELECT migrationid FROM migrationtoolkit_tablecopystatus \
     WHERE status IN ('RUNNING', 'STALLED') ORDER BY startat, migrationid";

pub const UPSERT_NODE: &str = "INSERT INTO migrationtoolkit_clusternodes (nodeid, hostname, lastheartbeat) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (nodeid) DO UPDATE SET hostname = EXCLUDED.hostname, lastheartbeat = EXCLUDED.lastheartbeat";

pub const SELECT_ALIVE_NODES: &str = "SELECT nodeid, hostname, lastheartbeat FROM migrationtoolkit_clusternodes \
     WHERE lastheartbeat >= $1 ORDER BY nodeid";

pub const DELETE_NODE: &str = "DELETE FROM migrationtoolkit_clusternodes WHERE nodeid = $1";

pub fn select_pending_tasks() -> String {
    format!(
        "SELECT {TASK_COLUMNS} FROM {TASKS_TABLE} \
         WHERE migrationid = $1 AND targetnodeid = $2 AND status = 'PENDING' \
         ORDER BY sourcerowcount, pipelinename"
    )
}

pub fn select_task() -> String {
    format!("SELECT {TASK_COLUMNS} FROM {TASKS_TABLE} WHERE migrationid = $1 AND pipelinename = $2")
}

pub fn select_updated_tasks() -> String {
    format!(
        "SELECT {TASK_COLUMNS} FROM {TASKS_TABLE} \
         WHERE migrationid = $1 AND lastupdate > $2 \
         ORDER BY lastupdate, pipelinename"
    )
}

pub fn encode_column_map(
    column_mapping: &std::collections::HashMap<String, String>,
) -> migration_core::MigrationResult<String> {
    Ok(serde_json::to_string(column_mapping)?)
}

pub fn decode_column_map(
    raw: &str,
) -> migration_core::MigrationResult<std::collections::HashMap<String, String>> {
    if raw.is_empty() {
        return Ok(Default::default());
    }
    Ok(serde_json::from_str(raw)?)
}
