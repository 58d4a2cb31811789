//! SQLite Store
//!
//! Implements every storage port on a single SQLite database file.
//! Queries run on the blocking pool; the connection is shared behind a mutex.

use crate::domain::entities::{GeoPoint, Merchant, MerchantTag, MerchantTagRelation};
use crate::domain::ports::{
    FavoriteStore, GeoPointFilter, GeoPointRepository, MerchantFilter, MerchantRepository,
    MerchantTagRepository, TagFilter,
};
use crate::domain::services::CoarseWindow;
use crate::domain::value_objects::{Paging, Permission};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const MERCHANT_COLUMNS: &str = "id, title, description, phone, address, city, area, lng, lat, \
     geocode_level, geocode_score, geocode_description, geocode_attempts, owner_id, created, updated";

const TAG_COLUMNS: &str =
    "id, tag_name, alias, class, remarks, hex_color, owner_id, created, updated";

const POINT_COLUMNS: &str =
    "id, merchant_id, source, longitude, latitude, address, accuracy, metadata, created, updated";

/// SQLite-backed store for merchants, tags, geo points and favorites.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        tracing::info!("sqlite store opened at {}", path.as_ref().display());
        Ok(store)
    }

    /// Private in-memory database, gone when the store is dropped.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create tables and indexes if missing.
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS merchants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                phone TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                city TEXT NOT NULL DEFAULT '',
                area TEXT NOT NULL DEFAULT '',
                lng REAL,
                lat REAL,
                geocode_level TEXT NOT NULL DEFAULT '',
                geocode_score INTEGER NOT NULL DEFAULT 0,
                geocode_description TEXT NOT NULL DEFAULT 'pending',
                geocode_attempts INTEGER NOT NULL DEFAULT 0,
                owner_id INTEGER NOT NULL,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_merchants_owner ON merchants (owner_id);

            CREATE TABLE IF NOT EXISTS merchant_tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tag_name TEXT NOT NULL,
                alias TEXT NOT NULL DEFAULT '',
                class TEXT NOT NULL DEFAULT '',
                remarks TEXT NOT NULL DEFAULT '',
                hex_color TEXT NOT NULL DEFAULT '',
                owner_id INTEGER NOT NULL,
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_merchant_tags_owner ON merchant_tags (owner_id);

            CREATE TABLE IF NOT EXISTS merchant_tag_relations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                merchant_id INTEGER NOT NULL,
                merchant_tag_id INTEGER NOT NULL,
                created TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_relations_merchant ON merchant_tag_relations (merchant_id);
            CREATE INDEX IF NOT EXISTS idx_relations_tag ON merchant_tag_relations (merchant_tag_id);

            CREATE TABLE IF NOT EXISTS geo_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                merchant_id INTEGER,
                source TEXT NOT NULL DEFAULT '',
                longitude REAL NOT NULL,
                latitude REAL NOT NULL,
                address TEXT NOT NULL DEFAULT '',
                accuracy INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL DEFAULT '',
                created TEXT NOT NULL,
                updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_geo_points_lookup ON geo_points (address, source);
            CREATE INDEX IF NOT EXISTS idx_geo_points_coords ON geo_points (longitude, latitude);
            CREATE INDEX IF NOT EXISTS idx_geo_points_merchant ON geo_points (merchant_id);

            CREATE TABLE IF NOT EXISTS merchant_favorites (
                user_id INTEGER NOT NULL,
                merchant_id INTEGER NOT NULL,
                PRIMARY KEY (user_id, merchant_id)
            );",
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }

    fn row_to_merchant(row: &Row) -> rusqlite::Result<Merchant> {
        Ok(Merchant {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            phone: row.get(3)?,
            address: row.get(4)?,
            city: row.get(5)?,
            area: row.get(6)?,
            lng: row.get(7)?,
            lat: row.get(8)?,
            geocode_level: row.get(9)?,
            geocode_score: row.get(10)?,
            geocode_description: row.get(11)?,
            geocode_attempts: row.get::<_, i64>(12)? as u32,
            owner_id: row.get(13)?,
            tags: Vec::new(),
            geo_points: Vec::new(),
            is_favorite: false,
            max_permission: Permission::Read,
            created: row.get(14)?,
            updated: row.get(15)?,
        })
    }

    fn row_to_tag(row: &Row) -> rusqlite::Result<MerchantTag> {
        Ok(MerchantTag {
            id: row.get(0)?,
            tag_name: row.get(1)?,
            alias: row.get(2)?,
            class: row.get(3)?,
            remarks: row.get(4)?,
            hex_color: row.get(5)?,
            owner_id: row.get(6)?,
            max_permission: Permission::Read,
            created: row.get(7)?,
            updated: row.get(8)?,
        })
    }

    fn row_to_point(row: &Row) -> rusqlite::Result<GeoPoint> {
        Ok(GeoPoint {
            id: row.get(0)?,
            merchant_id: row.get(1)?,
            source: row.get(2)?,
            longitude: row.get(3)?,
            latitude: row.get(4)?,
            address: row.get(5)?,
            accuracy: row.get(6)?,
            metadata: row.get(7)?,
            created: row.get(8)?,
            updated: row.get(9)?,
        })
    }
}

/// `LIKE` pattern for a substring search. Empty search matches everything.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// `(limit, offset)` for SQLite; `-1` means no limit.
fn limit_offset(paging: Paging) -> (i64, i64) {
    match paging.window() {
        Some((offset, limit)) => (limit as i64, offset as i64),
        None => (-1, 0),
    }
}

#[async_trait]
impl MerchantRepository for SqliteStore {
    async fn insert_merchant(&self, merchant: Merchant) -> Result<Merchant> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO merchants (title, description, phone, address, city, area, lng, lat,
                    geocode_level, geocode_score, geocode_description, geocode_attempts, owner_id,
                    created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    merchant.title,
                    merchant.description,
                    merchant.phone,
                    merchant.address,
                    merchant.city,
                    merchant.area,
                    merchant.lng,
                    merchant.lat,
                    merchant.geocode_level,
                    merchant.geocode_score,
                    merchant.geocode_description,
                    merchant.geocode_attempts as i64,
                    merchant.owner_id,
                    merchant.created,
                    merchant.updated,
                ],
            )?;
            let mut row = merchant.row();
            row.id = conn.last_insert_rowid();
            Ok(row)
        })
        .await
    }

    async fn get_merchant(&self, id: i64) -> Result<Option<Merchant>> {
        self.run(move |conn| {
            let merchant = conn
                .query_row(
                    &format!("SELECT {} FROM merchants WHERE id = ?1", MERCHANT_COLUMNS),
                    params![id],
                    Self::row_to_merchant,
                )
                .optional()?;
            Ok(merchant)
        })
        .await
    }

    async fn update_merchant(&self, merchant: &Merchant) -> Result<bool> {
        let m = merchant.row();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE merchants SET title = ?2, description = ?3, phone = ?4, address = ?5,
                    city = ?6, area = ?7, lng = ?8, lat = ?9, geocode_level = ?10,
                    geocode_score = ?11, geocode_description = ?12, geocode_attempts = ?13,
                    updated = ?14
                 WHERE id = ?1",
                params![
                    m.id,
                    m.title,
                    m.description,
                    m.phone,
                    m.address,
                    m.city,
                    m.area,
                    m.lng,
                    m.lat,
                    m.geocode_level,
                    m.geocode_score,
                    m.geocode_description,
                    m.geocode_attempts as i64,
                    m.updated,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_merchant(&self, id: i64) -> Result<bool> {
        self.run(move |conn| Ok(conn.execute("DELETE FROM merchants WHERE id = ?1", params![id])? > 0))
            .await
    }

    async fn find_merchants(&self, filter: &MerchantFilter) -> Result<(Vec<Merchant>, u64)> {
        let owner_id = filter.owner_id;
        let pattern = like_pattern(&filter.search);
        let (limit, offset) = limit_offset(filter.paging);

        self.run(move |conn| {
            let condition = "owner_id = ?1 AND (title LIKE ?2 ESCAPE '\\' OR address LIKE ?2 ESCAPE '\\'
                 OR city LIKE ?2 ESCAPE '\\' OR area LIKE ?2 ESCAPE '\\')";

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM merchants WHERE {}", condition),
                params![owner_id, pattern],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM merchants WHERE {} ORDER BY id LIMIT ?3 OFFSET ?4",
                MERCHANT_COLUMNS, condition
            ))?;
            let merchants = stmt
                .query_map(params![owner_id, pattern, limit, offset], Self::row_to_merchant)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((merchants, total as u64))
        })
        .await
    }
}

#[async_trait]
impl MerchantTagRepository for SqliteStore {
    async fn insert_tag(&self, tag: MerchantTag) -> Result<MerchantTag> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO merchant_tags (tag_name, alias, class, remarks, hex_color, owner_id,
                    created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tag.tag_name,
                    tag.alias,
                    tag.class,
                    tag.remarks,
                    tag.hex_color,
                    tag.owner_id,
                    tag.created,
                    tag.updated,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(MerchantTag { id, ..tag })
        })
        .await
    }

    async fn get_tag(&self, id: i64) -> Result<Option<MerchantTag>> {
        self.run(move |conn| {
            let tag = conn
                .query_row(
                    &format!("SELECT {} FROM merchant_tags WHERE id = ?1", TAG_COLUMNS),
                    params![id],
                    Self::row_to_tag,
                )
                .optional()?;
            Ok(tag)
        })
        .await
    }

    async fn update_tag(&self, tag: &MerchantTag) -> Result<bool> {
        let tag = tag.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE merchant_tags SET tag_name = ?2, alias = ?3, class = ?4, remarks = ?5,
                    hex_color = ?6, updated = ?7
                 WHERE id = ?1",
                params![
                    tag.id,
                    tag.tag_name,
                    tag.alias,
                    tag.class,
                    tag.remarks,
                    tag.hex_color,
                    tag.updated,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_tag(&self, id: i64) -> Result<bool> {
        self.run(move |conn| {
            Ok(conn.execute("DELETE FROM merchant_tags WHERE id = ?1", params![id])? > 0)
        })
        .await
    }

    async fn find_tags(&self, filter: &TagFilter) -> Result<(Vec<MerchantTag>, u64)> {
        let owner_id = filter.owner_id;
        let class = filter.class.clone();
        let pattern = like_pattern(&filter.search);
        let (limit, offset) = limit_offset(filter.paging);

        self.run(move |conn| {
            let condition = "owner_id = ?1 AND (?2 IS NULL OR class = ?2)
                 AND (tag_name LIKE ?3 ESCAPE '\\' OR alias LIKE ?3 ESCAPE '\\'
                      OR class LIKE ?3 ESCAPE '\\' OR remarks LIKE ?3 ESCAPE '\\')";

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM merchant_tags WHERE {}", condition),
                params![owner_id, class, pattern],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM merchant_tags WHERE {} ORDER BY id LIMIT ?4 OFFSET ?5",
                TAG_COLUMNS, condition
            ))?;
            let tags = stmt
                .query_map(params![owner_id, class, pattern, limit, offset], Self::row_to_tag)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((tags, total as u64))
        })
        .await
    }

    async fn find_tags_by_names(&self, owner_id: i64, names: &[String]) -> Result<Vec<MerchantTag>> {
        // SQLite lower() only folds ASCII, so match in Rust
        let wanted: HashSet<String> = names.iter().map(|n| n.trim().to_lowercase()).collect();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM merchant_tags WHERE owner_id = ?1 ORDER BY id",
                TAG_COLUMNS
            ))?;
            let tags = stmt
                .query_map(params![owner_id], Self::row_to_tag)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tags
                .into_iter()
                .filter(|t| wanted.contains(&t.tag_name.to_lowercase()))
                .collect())
        })
        .await
    }

    async fn add_relation(&self, relation: MerchantTagRelation) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO merchant_tag_relations (merchant_id, merchant_tag_id, created)
                 VALUES (?1, ?2, ?3)",
                params![relation.merchant_id, relation.merchant_tag_id, relation.created],
            )?;
            Ok(())
        })
        .await
    }

    async fn relations_for_merchants(&self, merchant_ids: &[i64]) -> Result<Vec<MerchantTagRelation>> {
        let ids: HashSet<i64> = merchant_ids.iter().copied().collect();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT merchant_id, merchant_tag_id, created FROM merchant_tag_relations ORDER BY id",
            )?;
            let relations = stmt
                .query_map([], |row| {
                    Ok(MerchantTagRelation {
                        merchant_id: row.get(0)?,
                        merchant_tag_id: row.get(1)?,
                        created: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(relations
                .into_iter()
                .filter(|r| ids.contains(&r.merchant_id))
                .collect())
        })
        .await
    }

    async fn delete_relations_for_merchant(&self, merchant_id: i64) -> Result<usize> {
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM merchant_tag_relations WHERE merchant_id = ?1",
                params![merchant_id],
            )?)
        })
        .await
    }

    async fn delete_relations_for_tag(&self, tag_id: i64) -> Result<usize> {
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM merchant_tag_relations WHERE merchant_tag_id = ?1",
                params![tag_id],
            )?)
        })
        .await
    }
}

#[async_trait]
impl GeoPointRepository for SqliteStore {
    async fn insert_point(&self, point: GeoPoint) -> Result<GeoPoint> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO geo_points (merchant_id, source, longitude, latitude, address,
                    accuracy, metadata, created, updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    point.merchant_id,
                    point.source,
                    point.longitude,
                    point.latitude,
                    point.address,
                    point.accuracy,
                    point.metadata,
                    point.created,
                    point.updated,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(GeoPoint { id, ..point })
        })
        .await
    }

    async fn get_point(&self, id: i64) -> Result<Option<GeoPoint>> {
        self.run(move |conn| {
            let point = conn
                .query_row(
                    &format!("SELECT {} FROM geo_points WHERE id = ?1", POINT_COLUMNS),
                    params![id],
                    Self::row_to_point,
                )
                .optional()?;
            Ok(point)
        })
        .await
    }

    async fn update_point(&self, point: &GeoPoint) -> Result<bool> {
        let p = point.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE geo_points SET merchant_id = ?2, source = ?3, longitude = ?4,
                    latitude = ?5, address = ?6, accuracy = ?7, metadata = ?8, updated = ?9
                 WHERE id = ?1",
                params![
                    p.id,
                    p.merchant_id,
                    p.source,
                    p.longitude,
                    p.latitude,
                    p.address,
                    p.accuracy,
                    p.metadata,
                    p.updated,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_point(&self, id: i64) -> Result<bool> {
        self.run(move |conn| {
            Ok(conn.execute("DELETE FROM geo_points WHERE id = ?1", params![id])? > 0)
        })
        .await
    }

    async fn find_by_address_and_source(&self, address: &str, source: &str) -> Result<Option<GeoPoint>> {
        let address = address.to_string();
        let source = source.to_string();
        self.run(move |conn| {
            let point = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM geo_points WHERE address = ?1 AND source = ?2
                         ORDER BY id LIMIT 1",
                        POINT_COLUMNS
                    ),
                    params![address, source],
                    Self::row_to_point,
                )
                .optional()?;
            Ok(point)
        })
        .await
    }

    async fn find_points(&self, filter: &GeoPointFilter) -> Result<(Vec<GeoPoint>, u64)> {
        let merchant_id = filter.merchant_id;
        let pattern = like_pattern(&filter.search);
        let (limit, offset) = limit_offset(filter.paging);

        self.run(move |conn| {
            let condition = "merchant_id = ?1 AND address LIKE ?2 ESCAPE '\\'";

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM geo_points WHERE {}", condition),
                params![merchant_id, pattern],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM geo_points WHERE {} ORDER BY id LIMIT ?3 OFFSET ?4",
                POINT_COLUMNS, condition
            ))?;
            let points = stmt
                .query_map(params![merchant_id, pattern, limit, offset], Self::row_to_point)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((points, total as u64))
        })
        .await
    }

    async fn find_in_window(&self, window: &CoarseWindow, limit: usize) -> Result<Vec<GeoPoint>> {
        let window = *window;
        let limit = if limit == 0 { -1 } else { limit as i64 };
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM geo_points
                 WHERE ABS(longitude - ?1) < ?3 AND ABS(latitude - ?2) < ?3
                 ORDER BY id LIMIT ?4",
                POINT_COLUMNS
            ))?;
            let points = stmt
                .query_map(
                    params![window.center_lng, window.center_lat, window.delta_deg, limit],
                    Self::row_to_point,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(points)
        })
        .await
    }

    async fn set_point_merchant(&self, id: i64, merchant_id: Option<i64>) -> Result<bool> {
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE geo_points SET merchant_id = ?2 WHERE id = ?1",
                params![id, merchant_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete_points_for_merchant(&self, merchant_id: i64) -> Result<usize> {
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM geo_points WHERE merchant_id = ?1",
                params![merchant_id],
            )?)
        })
        .await
    }
}

#[async_trait]
impl FavoriteStore for SqliteStore {
    async fn is_favorite(&self, user_id: i64, merchant_id: i64) -> Result<bool> {
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM merchant_favorites WHERE user_id = ?1 AND merchant_id = ?2",
                    params![user_id, merchant_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn add_favorite(&self, user_id: i64, merchant_id: i64) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO merchant_favorites (user_id, merchant_id) VALUES (?1, ?2)",
                params![user_id, merchant_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_favorite(&self, user_id: i64, merchant_id: i64) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM merchant_favorites WHERE user_id = ?1 AND merchant_id = ?2",
                params![user_id, merchant_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn favorites_among(&self, user_id: i64, merchant_ids: &[i64]) -> Result<HashSet<i64>> {
        let ids: HashSet<i64> = merchant_ids.iter().copied().collect();
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT merchant_id FROM merchant_favorites WHERE user_id = ?1")?;
            let favorites = stmt
                .query_map(params![user_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(favorites.into_iter().filter(|id| ids.contains(id)).collect())
        })
        .await
    }

    async fn remove_favorites_for_merchant(&self, merchant_id: i64) -> Result<usize> {
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM merchant_favorites WHERE merchant_id = ?1",
                params![merchant_id],
            )?)
        })
        .await
    }
}
