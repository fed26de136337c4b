pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE runs (
  run_id          TEXT PRIMARY KEY,
  type            TEXT NOT NULL CHECK (type IN ('collect','monitor')),
  timestamp       INTEGER NOT NULL,
  version         TEXT NOT NULL,
  file_system     INTEGER NOT NULL DEFAULT 0,
  ports           INTEGER NOT NULL DEFAULT 0,
  users           INTEGER NOT NULL DEFAULT 0,
  services        INTEGER NOT NULL DEFAULT 0,
  registry        INTEGER NOT NULL DEFAULT 0,
  certificates    INTEGER NOT NULL DEFAULT 0,
  finished_at     INTEGER
);

CREATE TABLE file_system (
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  row_key         TEXT NOT NULL,
  path            TEXT NOT NULL,
  permissions     TEXT,
  size            INTEGER,
  hash            TEXT,
  serialized      BLOB NOT NULL,
  UNIQUE (run_id, row_key)
);

CREATE TABLE network_ports (
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  row_key         TEXT NOT NULL,
  family          TEXT NOT NULL,
  address         TEXT NOT NULL,
  transport       TEXT NOT NULL,
  port            INTEGER NOT NULL,
  process_name    TEXT,
  serialized      BLOB NOT NULL,
  UNIQUE (run_id, row_key)
);

CREATE TABLE user_account (
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  row_key         TEXT NOT NULL,
  name            TEXT NOT NULL,
  uid             TEXT NOT NULL,
  account_type    TEXT,
  privileged      INTEGER NOT NULL DEFAULT 0,
  serialized      BLOB NOT NULL,
  UNIQUE (run_id, row_key)
);

CREATE TABLE win_system_service (
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  row_key         TEXT NOT NULL,
  service_name    TEXT NOT NULL,
  display_name    TEXT,
  current_state   TEXT,
  serialized      BLOB NOT NULL,
  UNIQUE (run_id, row_key)
);

CREATE TABLE registry (
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  row_key         TEXT NOT NULL,
  key             TEXT NOT NULL,
  serialized      BLOB NOT NULL,
  UNIQUE (run_id, row_key)
);

CREATE TABLE certificates (
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  row_key         TEXT NOT NULL,
  hash_plus_store TEXT NOT NULL,
  store_location  TEXT NOT NULL,
  store_name      TEXT NOT NULL,
  hash            TEXT NOT NULL,
  subject         TEXT,
  pkcs12          TEXT,
  serialized      BLOB NOT NULL,
  UNIQUE (run_id, row_key)
);

CREATE TABLE file_system_monitored (
  run_id          TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  row_key         TEXT NOT NULL,
  seq             INTEGER NOT NULL,
  timestamp       INTEGER NOT NULL,
  change_type     INTEGER NOT NULL,
  path            TEXT NOT NULL,
  old_path        TEXT,
  serialized      BLOB NOT NULL,
  UNIQUE (run_id, row_key)
);

CREATE TABLE compared (
  compared_id     INTEGER PRIMARY KEY AUTOINCREMENT,
  base_run_id     TEXT NOT NULL,
  compare_run_id  TEXT NOT NULL,
  base_row_key    TEXT,
  compare_row_key TEXT,
  change_type     INTEGER NOT NULL CHECK (change_type BETWEEN 1 AND 4),
  data_type       INTEGER NOT NULL CHECK (data_type BETWEEN 1 AND 6)
);

CREATE TABLE results (
  base_run_id     TEXT NOT NULL,
  compare_run_id  TEXT NOT NULL,
  status          TEXT NOT NULL CHECK (status IN ('running','completed')),
  PRIMARY KEY (base_run_id, compare_run_id)
);

CREATE INDEX idx_file_system_path ON file_system(path);
CREATE INDEX idx_file_system_run ON file_system(run_id);
CREATE INDEX idx_network_ports_run ON network_ports(run_id);
CREATE INDEX idx_user_account_run ON user_account(run_id);
CREATE INDEX idx_service_run ON win_system_service(run_id);
CREATE INDEX idx_registry_key ON registry(key);
CREATE INDEX idx_registry_run ON registry(run_id);
CREATE INDEX idx_certificates_run ON certificates(run_id);
CREATE INDEX idx_monitored_run ON file_system_monitored(run_id, seq);
CREATE INDEX idx_compared_lookup ON compared(base_run_id, compare_run_id, data_type);
CREATE INDEX idx_compared_change ON compared(change_type);

COMMIT;
"#;

/// Tables holding rows keyed by `run_id`, children of `runs`.
pub const RUN_SCOPED_TABLES: [&str; 7] = [
    "file_system",
    "network_ports",
    "user_account",
    "win_system_service",
    "registry",
    "certificates",
    "file_system_monitored",
];
