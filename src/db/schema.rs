/// Bumped whenever SCHEMA changes; stored in `PRAGMA user_version`.
pub const CURRENT_VERSION: i32 = 1;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workout_plans (
    id TEXT PRIMARY KEY,
    parent_id TEXT,
    data TEXT NOT NULL,
    last_modified TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workout_plans_modified
    ON workout_plans(last_modified);

CREATE TABLE IF NOT EXISTS exercises (
    id TEXT PRIMARY KEY,
    parent_id TEXT,
    data TEXT NOT NULL,
    last_modified TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_exercises_plan
    ON exercises(parent_id);

-- Pending operations, replayed in id order
CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    payload TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_timestamp ON offline_queue(timestamp);
CREATE INDEX IF NOT EXISTS idx_offline_queue_action ON offline_queue(action);
"#;
