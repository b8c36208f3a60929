pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS canonical_addresses (
      _id INTEGER PRIMARY KEY AUTOINCREMENT,
      address TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS threads (
      _id INTEGER PRIMARY KEY AUTOINCREMENT,
      date INTEGER NOT NULL DEFAULT 0,
      message_count INTEGER NOT NULL DEFAULT 0,
      recipient_ids TEXT NOT NULL,
      snippet TEXT
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_threads_recipient_ids ON threads(recipient_ids);

    CREATE TABLE IF NOT EXISTS sms (
      _id INTEGER PRIMARY KEY AUTOINCREMENT,
      thread_id INTEGER,
      address TEXT,
      body TEXT,
      date INTEGER,
      date_sent INTEGER NOT NULL DEFAULT 0,
      locked INTEGER NOT NULL DEFAULT 0,
      protocol TEXT,
      read INTEGER NOT NULL DEFAULT 0,
      status INTEGER NOT NULL DEFAULT -1,
      type INTEGER,
      service_center TEXT,
      sub_id INTEGER NOT NULL DEFAULT -1
    );

    CREATE INDEX IF NOT EXISTS idx_sms_date ON sms(date);
    CREATE INDEX IF NOT EXISTS idx_sms_thread_id ON sms(thread_id, date DESC);

    CREATE TABLE IF NOT EXISTS mms (
      _id INTEGER PRIMARY KEY AUTOINCREMENT,
      thread_id INTEGER,
      date INTEGER,
      date_sent INTEGER NOT NULL DEFAULT 0,
      msg_box INTEGER,
      creator TEXT,
      ct_t TEXT,
      d_rpt INTEGER,
      locked INTEGER NOT NULL DEFAULT 0,
      m_type INTEGER,
      read INTEGER NOT NULL DEFAULT 0,
      rr INTEGER,
      seen INTEGER NOT NULL DEFAULT 0,
      text_only INTEGER NOT NULL DEFAULT 0,
      st INTEGER,
      sub TEXT,
      sub_cs INTEGER,
      sub_id INTEGER NOT NULL DEFAULT -1,
      tr_id TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_mms_identity ON mms(date, date_sent, thread_id, msg_box);

    CREATE TABLE IF NOT EXISTS part (
      _id INTEGER PRIMARY KEY AUTOINCREMENT,
      mid INTEGER NOT NULL,
      seq INTEGER NOT NULL DEFAULT 0,
      ct TEXT,
      name TEXT,
      chset TEXT,
      cd TEXT,
      fn TEXT,
      cid TEXT,
      cl TEXT,
      ctt_s TEXT,
      ctt_t TEXT,
      text TEXT,
      _data TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_part_mid ON part(mid);

    CREATE TABLE IF NOT EXISTS addr (
      _id INTEGER PRIMARY KEY AUTOINCREMENT,
      msg_id INTEGER NOT NULL,
      address TEXT,
      type INTEGER NOT NULL,
      charset INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_addr_msg_id ON addr(msg_id);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS imports (
      id TEXT PRIMARY KEY,
      imported_at INTEGER NOT NULL,
      source_filename TEXT NOT NULL,
      source_hash TEXT NOT NULL,
      status TEXT NOT NULL,
      stats_json TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_imports_source_hash ON imports(source_hash);
    "#,
];
