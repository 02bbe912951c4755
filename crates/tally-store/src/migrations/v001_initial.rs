//! v001 -- Initial relay schema: vaults, snapshots, updates, wrapped keys.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS vaults (
    id                   TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    owner_hash           TEXT NOT NULL,               -- hex BLAKE3 of owner's signing key
    pruned_below_version INTEGER NOT NULL DEFAULT 0,  -- retention horizon
    pruned_through_seq   INTEGER NOT NULL DEFAULT 0,
    created_at           TEXT NOT NULL                -- RFC-3339
);

CREATE TABLE IF NOT EXISTS snapshots (
    id             TEXT PRIMARY KEY NOT NULL,
    vault_id       TEXT NOT NULL,
    version        INTEGER NOT NULL,
    hlc            TEXT NOT NULL,
    encrypted_data TEXT NOT NULL,                     -- opaque base64 ciphertext
    through_seq    INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,

    UNIQUE (vault_id, version),
    FOREIGN KEY (vault_id) REFERENCES vaults(id) ON DELETE CASCADE
);

-- seq gives a strict arrival order; AUTOINCREMENT never reuses values
CREATE TABLE IF NOT EXISTS updates (
    seq                   INTEGER PRIMARY KEY AUTOINCREMENT,
    id                    TEXT NOT NULL UNIQUE,
    vault_id              TEXT NOT NULL,
    base_snapshot_version INTEGER NOT NULL,
    hlc                   TEXT NOT NULL,
    author_hash           TEXT NOT NULL,
    encrypted_data        TEXT NOT NULL,
    created_at            TEXT NOT NULL,

    FOREIGN KEY (vault_id) REFERENCES vaults(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_updates_vault_seq ON updates(vault_id, seq);

CREATE TABLE IF NOT EXISTS wrapped_keys (
    vault_id       TEXT NOT NULL,
    recipient_hash TEXT NOT NULL,
    wrapped_key    TEXT NOT NULL,                     -- base64
    sender_pubkey  TEXT,                              -- base64 X25519, NULL when sealed
    created_at     TEXT NOT NULL,

    PRIMARY KEY (vault_id, recipient_hash),
    FOREIGN KEY (vault_id) REFERENCES vaults(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
