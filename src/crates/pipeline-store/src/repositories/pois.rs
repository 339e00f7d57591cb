//! POI row access, upserted by checksum so re-analysis of unchanged
//! content never creates a duplicate (invariant 1).

use crate::error::map_sqlx;
use pipeline_core::error::Result;
use pipeline_core::model::{Poi, PoiType};
use sqlx::{Executor, Row, Sqlite, SqlitePool};

fn poi_type_str(t: PoiType) -> &'static str {
    match t {
        PoiType::File => "File",
        PoiType::Class => "Class",
        PoiType::Function => "Function",
        PoiType::Method => "Method",
        PoiType::Variable => "Variable",
        PoiType::Import => "Import",
        PoiType::Export => "Export",
        PoiType::Database => "Database",
        PoiType::Table => "Table",
        PoiType::View => "View",
    }
}

fn row_to_poi(row: &sqlx::sqlite::SqliteRow) -> Option<Poi> {
    let poi_type = PoiType::parse(row.get::<String, _>("poi_type").as_str())?;
    Some(Poi {
        id: row.get("id"),
        file_id: row.get("file_id"),
        poi_type,
        name: row.get("name"),
        start_line: row.get::<i64, _>("start_line") as u32,
        end_line: row.get::<i64, _>("end_line") as u32,
        is_exported: row.get::<i64, _>("is_exported") != 0,
        checksum: row.get("checksum"),
    })
}

/// Insert the POI if its checksum is unseen; otherwise a no-op (treated
/// as success per the error handling design's "unique-key violation on
/// POI insert" row).
pub async fn upsert_by_checksum<'e, E>(executor: E, poi: &Poi) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO pois (id, file_id, poi_type, name, start_line, end_line, is_exported, checksum)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(checksum) DO NOTHING",
    )
    .bind(&poi.id)
    .bind(&poi.file_id)
    .bind(poi_type_str(poi.poi_type))
    .bind(&poi.name)
    .bind(poi.start_line as i64)
    .bind(poi.end_line as i64)
    .bind(poi.is_exported as i64)
    .bind(&poi.checksum)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

pub async fn get_by_checksum(pool: &SqlitePool, checksum: &str) -> Result<Option<Poi>> {
    let row = sqlx::query("SELECT * FROM pois WHERE checksum = ?")
        .bind(checksum)
        .fetch_optional(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(row.as_ref().and_then(row_to_poi))
}

pub async fn list_by_file(pool: &SqlitePool, file_id: &str) -> Result<Vec<Poi>> {
    let rows = sqlx::query("SELECT * FROM pois WHERE file_id = ?")
        .bind(file_id)
        .fetch_all(pool)
        .await
        .map_err(map_sqlx)?;
    Ok(rows.iter().filter_map(row_to_poi).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConnection;

    async fn setup() -> DatabaseConnection {
        let conn = DatabaseConnection::connect("sqlite::memory:").await.unwrap();
        conn.run_migrations().await.unwrap();
        crate::repositories::files::upsert(
            conn.pool(),
            &pipeline_core::model::File {
                id: "f1".into(),
                path: "src/lib.rs".into(),
                checksum: "chk".into(),
                language: None,
                status: pipeline_core::model::FileStatus::Pending,
                special_type: None,
                last_processed: None,
            },
        )
        .await
        .unwrap();
        conn
    }

    fn sample_poi(checksum: &str) -> Poi {
        Poi {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: "f1".into(),
            poi_type: PoiType::Function,
            name: "parse".into(),
            start_line: 10,
            end_line: 20,
            is_exported: true,
            checksum: checksum.into(),
        }
    }

    #[tokio::test]
    async fn duplicate_checksum_is_a_noop_not_a_duplicate_row() {
        let conn = setup().await;
        let poi = sample_poi("c1");
        upsert_by_checksum(conn.pool(), &poi).await.unwrap();
        upsert_by_checksum(conn.pool(), &poi).await.unwrap();

        let rows = list_by_file(conn.pool(), "f1").await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
