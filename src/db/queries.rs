pub const CREATE_GOALS: &str = r#"
CREATE TABLE IF NOT EXISTS goals (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  owner_id        TEXT NOT NULL,
  title           TEXT NOT NULL,
  goal_type       TEXT NOT NULL,
  measure         TEXT,
  cadence         TEXT,
  target_count    INTEGER,
  target_quantity REAL,
  unit            TEXT,
  due_at          INTEGER,
  completed       INTEGER NOT NULL DEFAULT 0,
  completed_at    INTEGER,
  archived        INTEGER NOT NULL DEFAULT 0,
  created_at      INTEGER NOT NULL,
  updated_at      INTEGER NOT NULL
);
"#;

pub const CREATE_MILESTONES: &str = r#"
CREATE TABLE IF NOT EXISTS milestones (
  id       INTEGER PRIMARY KEY AUTOINCREMENT,
  goal_id  INTEGER NOT NULL REFERENCES goals(id),
  title    TEXT NOT NULL,
  position INTEGER NOT NULL,
  done     INTEGER NOT NULL DEFAULT 0,
  done_at  INTEGER
);
"#;

pub const CREATE_ENTRIES: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
  id          INTEGER PRIMARY KEY AUTOINCREMENT,
  goal_id     INTEGER NOT NULL REFERENCES goals(id),
  owner_id    TEXT NOT NULL,
  occurred_at INTEGER NOT NULL,
  quantity    REAL,
  created_at  INTEGER NOT NULL
);
"#;

pub const CREATE_PROGRESS_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS progress_records (
  id               INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id          TEXT NOT NULL,
  book_id          INTEGER NOT NULL,
  status           TEXT NOT NULL,
  percent_complete REAL,
  privacy          TEXT NOT NULL DEFAULT 'public',
  started_at       INTEGER,
  finished_at      INTEGER,
  updated_at       INTEGER NOT NULL,
  UNIQUE(user_id, book_id)
);
"#;

pub const CREATE_PROGRESS_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS progress_events (
  id           INTEGER PRIMARY KEY AUTOINCREMENT,
  record_id    INTEGER NOT NULL,
  user_id      TEXT NOT NULL,
  book_id      INTEGER NOT NULL,
  before_json  TEXT,
  after_json   TEXT,
  created_at   INTEGER NOT NULL,
  processed_at INTEGER,
  attempts     INTEGER NOT NULL DEFAULT 0,
  last_error   TEXT
);
"#;

pub const CREATE_APPLIED_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS applied_events (
  event_id   INTEGER NOT NULL,
  aggregate  TEXT NOT NULL,
  applied_at INTEGER NOT NULL,
  PRIMARY KEY (event_id, aggregate)
);
"#;

pub const CREATE_PROFILES: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
  user_id      TEXT PRIMARY KEY,
  display_name TEXT NOT NULL,
  photo_url    TEXT,
  updated_at   INTEGER NOT NULL
);
"#;

pub const CREATE_USER_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS user_stats (
  user_id          TEXT PRIMARY KEY,
  finished_count   INTEGER NOT NULL DEFAULT 0,
  last_finished_at INTEGER,
  display_name     TEXT NOT NULL,
  photo_url        TEXT,
  updated_at       INTEGER NOT NULL
);
"#;

pub const CREATE_BOOK_STATS: &str = r#"
CREATE TABLE IF NOT EXISTS book_stats (
  book_id          INTEGER PRIMARY KEY,
  active_readers   INTEGER NOT NULL DEFAULT 0,
  finished_readers INTEGER NOT NULL DEFAULT 0,
  reader_count     INTEGER NOT NULL DEFAULT 0,
  sum_percent      REAL NOT NULL DEFAULT 0,
  avg_percent      REAL NOT NULL DEFAULT 0,
  updated_at       INTEGER NOT NULL
);
"#;

pub const INDEX_GOALS_OWNER: &str =
    "CREATE INDEX IF NOT EXISTS idx_goals_owner ON goals(owner_id);";

pub const INDEX_MILESTONES_GOAL: &str =
    "CREATE INDEX IF NOT EXISTS idx_milestones_goal ON milestones(goal_id, position);";

pub const INDEX_ENTRIES_GOAL_OCCURRED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_entries_goal_occurred_at ON entries(goal_id, occurred_at);";

pub const INDEX_PROGRESS_BOOK: &str =
    "CREATE INDEX IF NOT EXISTS idx_progress_records_book ON progress_records(book_id);";

pub const INDEX_EVENTS_PENDING: &str =
    "CREATE INDEX IF NOT EXISTS idx_progress_events_pending ON progress_events(processed_at, id);";

pub const INDEX_EVENTS_USER: &str =
    "CREATE INDEX IF NOT EXISTS idx_progress_events_user ON progress_events(user_id, processed_at);";

pub fn schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_GOALS,
        CREATE_MILESTONES,
        CREATE_ENTRIES,
        CREATE_PROGRESS_RECORDS,
        CREATE_PROGRESS_EVENTS,
        CREATE_APPLIED_EVENTS,
        CREATE_PROFILES,
        CREATE_USER_STATS,
        CREATE_BOOK_STATS,
        INDEX_GOALS_OWNER,
        INDEX_MILESTONES_GOAL,
        INDEX_ENTRIES_GOAL_OCCURRED_AT,
        INDEX_PROGRESS_BOOK,
        INDEX_EVENTS_PENDING,
        INDEX_EVENTS_USER,
    ]
}
