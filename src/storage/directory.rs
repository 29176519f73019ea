use std::path::Path;

use rusqlite::{OptionalExtension, Result as SqlResult, params};

use crate::common::types::{DirectoryEntry, DirectoryUpdate, PublicRoomFilter};

use super::database::Database;

const DEFAULT_QUERY_LIMIT: u32 = 100;

/// Public-room table backing every directory-store variant: the embedded
/// store opens it on a file, the replicated variants keep it in memory as
/// their local replica.
pub struct RoomDirectory {
    db: Database,
}

impl RoomDirectory {
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let directory = Self {
            db: Database::open(path)?,
        };
        directory.init_schema()?;
        Ok(directory)
    }

    pub fn in_memory() -> SqlResult<Self> {
        let directory = Self {
            db: Database::in_memory()?,
        };
        directory.init_schema()?;
        Ok(directory)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS public_rooms (
                room_id TEXT PRIMARY KEY,
                name TEXT,
                topic TEXT,
                joined_members INTEGER NOT NULL DEFAULT 0,
                world_readable INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;
        Ok(())
    }

    /// Insert or replace an entry. Whole-entry replacement is what makes
    /// concurrent updates resolve to one writer's value, never a merge.
    pub fn upsert(&self, entry: &DirectoryEntry) -> SqlResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT OR REPLACE INTO public_rooms
                 (room_id, name, topic, joined_members, world_readable, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))",
            params![
                entry.room_id,
                entry.name,
                entry.topic,
                entry.joined_members,
                entry.world_readable as i64,
            ],
        )?;
        Ok(())
    }

    pub fn query(&self, filter: &PublicRoomFilter) -> SqlResult<Vec<DirectoryEntry>> {
        let conn = self.db.lock();
        let pattern = filter.search_term.as_ref().map(|term| format!("%{term}%"));
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT) as i64;

        let mut stmt = conn.prepare(
            "SELECT room_id, name, topic, joined_members, world_readable
             FROM public_rooms
             WHERE ?1 IS NULL OR room_id LIKE ?1 OR name LIKE ?1 OR topic LIKE ?1
             ORDER BY joined_members DESC, room_id ASC
             LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![pattern, limit], |row| {
                Ok(DirectoryEntry {
                    room_id: row.get(0)?,
                    name: row.get(1)?,
                    topic: row.get(2)?,
                    joined_members: row.get(3)?,
                    world_readable: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(entries)
    }

    pub fn get(&self, room_id: &str) -> SqlResult<Option<DirectoryEntry>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT room_id, name, topic, joined_members, world_readable
             FROM public_rooms WHERE room_id = ?1",
            params![room_id],
            |row| {
                Ok(DirectoryEntry {
                    room_id: row.get(0)?,
                    name: row.get(1)?,
                    topic: row.get(2)?,
                    joined_members: row.get(3)?,
                    world_readable: row.get::<_, i64>(4)? != 0,
                })
            },
        )
        .optional()
    }

    pub fn delete(&self, room_id: &str) -> SqlResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "DELETE FROM public_rooms WHERE room_id = ?1",
            params![room_id],
        )?;
        Ok(())
    }

    pub fn count(&self) -> SqlResult<usize> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM public_rooms", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Apply a change received from another peer, last-applied-wins.
    pub fn apply(&self, update: &DirectoryUpdate) -> SqlResult<()> {
        match update {
            DirectoryUpdate::Upsert(entry) => self.upsert(entry),
            DirectoryUpdate::Delete { room_id } => self.delete(room_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(room_id: &str, name: &str, members: i64) -> DirectoryEntry {
        DirectoryEntry {
            room_id: room_id.to_string(),
            name: Some(name.to_string()),
            topic: None,
            joined_members: members,
            world_readable: true,
        }
    }

    #[test]
    fn upsert_query_delete_roundtrip() {
        let dir = RoomDirectory::in_memory().unwrap();
        dir.upsert(&entry("!a:p2p", "rust", 3)).unwrap();
        dir.upsert(&entry("!b:p2p", "matrix", 7)).unwrap();

        let all = dir.query(&PublicRoomFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        // Ordered by member count, descending.
        assert_eq!(all[0].room_id, "!b:p2p");

        dir.delete("!b:p2p").unwrap();
        assert_eq!(dir.count().unwrap(), 1);
        assert!(dir.get("!b:p2p").unwrap().is_none());
    }

    #[test]
    fn query_filters_by_search_term() {
        let dir = RoomDirectory::in_memory().unwrap();
        dir.upsert(&entry("!a:p2p", "rust lang", 1)).unwrap();
        dir.upsert(&entry("!b:p2p", "cooking", 1)).unwrap();

        let filter = PublicRoomFilter {
            search_term: Some("rust".to_string()),
            limit: None,
        };
        let found = dir.query(&filter).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].room_id, "!a:p2p");
    }

    #[test]
    fn conflicting_updates_resolve_to_one_value() {
        let dir = RoomDirectory::in_memory().unwrap();
        let from_a = entry("!room:p2p", "A's view", 5);
        let from_b = entry("!room:p2p", "B's view", 9);

        dir.apply(&DirectoryUpdate::Upsert(from_a.clone())).unwrap();
        dir.apply(&DirectoryUpdate::Upsert(from_b.clone())).unwrap();

        // Last applied wins wholesale; never a field-level merge of both.
        let observed = dir.get("!room:p2p").unwrap().unwrap();
        assert!(observed == from_a || observed == from_b);
        assert_eq!(observed, from_b);
    }

    #[test]
    fn remote_delete_removes_entry() {
        let dir = RoomDirectory::in_memory().unwrap();
        dir.upsert(&entry("!a:p2p", "gone soon", 2)).unwrap();
        dir.apply(&DirectoryUpdate::Delete {
            room_id: "!a:p2p".to_string(),
        })
        .unwrap();
        assert_eq!(dir.count().unwrap(), 0);
    }
}
