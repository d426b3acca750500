// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Clinic (tenant) registry operations.

use rusqlite::params;
use waitline_core::WaitlineError;

use crate::database::Database;
use crate::models::Clinic;

fn clinic_from_row(row: &rusqlite::Row<'_>) -> Result<Clinic, rusqlite::Error> {
    Ok(Clinic {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        daily_limit: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Register a clinic.
pub async fn create_clinic(db: &Database, clinic: &Clinic) -> Result<(), WaitlineError> {
    let clinic = clinic.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO clinics (id, slug, name, daily_limit, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    clinic.id,
                    clinic.slug,
                    clinic.name,
                    clinic.daily_limit,
                    clinic.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a clinic by id.
pub async fn get_clinic(db: &Database, id: &str) -> Result<Option<Clinic>, WaitlineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT id, slug, name, daily_limit, created_at FROM clinics WHERE id = ?1",
                params![id],
                clinic_from_row,
            );
            match result {
                Ok(clinic) => Ok(Some(clinic)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Resolve a clinic by its join slug (case-insensitive).
pub async fn get_clinic_by_slug(db: &Database, slug: &str) -> Result<Option<Clinic>, WaitlineError> {
    let slug = slug.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                "SELECT id, slug, name, daily_limit, created_at FROM clinics
                 WHERE slug = ?1 COLLATE NOCASE",
                params![slug],
                clinic_from_row,
            );
            match result {
                Ok(clinic) => Ok(Some(clinic)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use waitline_core::types::now_iso;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn make_clinic(slug: &str) -> Clinic {
        Clinic {
            id: format!("clinic-{slug}"),
            slug: slug.to_string(),
            name: "City Clinic".to_string(),
            daily_limit: 50,
            created_at: now_iso(),
        }
    }

    #[tokio::test]
    async fn create_and_resolve_by_slug() {
        let (db, _dir) = setup_db().await;
        create_clinic(&db, &make_clinic("cityclinic")).await.unwrap();

        let found = get_clinic_by_slug(&db, "cityclinic").await.unwrap().unwrap();
        assert_eq!(found.id, "clinic-cityclinic");
        assert_eq!(found.daily_limit, 50);

        // Slug match is case-insensitive: inbound commands are uppercased.
        let upper = get_clinic_by_slug(&db, "CITYCLINIC").await.unwrap();
        assert!(upper.is_some());

        assert!(get_clinic_by_slug(&db, "nope").await.unwrap().is_none());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_slug_rejected() {
        let (db, _dir) = setup_db().await;
        create_clinic(&db, &make_clinic("dup")).await.unwrap();

        let mut second = make_clinic("dup");
        second.id = "other-id".into();
        assert!(create_clinic(&db, &second).await.is_err());
        db.close().await.unwrap();
    }
}
