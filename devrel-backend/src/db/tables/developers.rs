//! Organization, developer and identifier database operations
//!
//! Identity resolution runs against a plain `&Connection` so that activity
//! ingestion can resolve identifiers inside its own transaction.

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, Row, ToSql};
use uuid::Uuid;

use crate::db::{now_ts, string_list_col, ts_col};
use crate::models::developer::{
    CreateDeveloperRequest, CreateOrganizationRequest, DeveloperDetail, DeveloperListQuery, UpdateDeveloperRequest,
};
use crate::models::{Developer, Identifier, IdentifierInput, IdentifierKind, Organization, Page};
use super::super::Database;

const DEVELOPER_COLUMNS: &str =
    "id, tenant_id, display_name, primary_email, org_id, avatar_url, tags, created_at, updated_at";

/// Outcome of matching a set of identifiers against known developers
#[derive(Debug, Clone)]
pub struct Resolution {
    pub developer_id: String,
    pub created: bool,
    pub attached: Vec<IdentifierInput>,
    pub conflicting_developer_ids: Vec<String>,
}

impl Database {
    pub fn create_organization(&self, tenant_id: &str, req: &CreateOrganizationRequest) -> SqliteResult<Organization> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = now_ts();
        conn.execute(
            "INSERT INTO organizations (id, tenant_id, name, domain, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![&id, tenant_id, req.name.trim(), req.domain.as_deref().map(str::trim), &now],
        )?;
        conn.query_row(
            "SELECT id, name, domain, created_at, updated_at FROM organizations WHERE id = ?1",
            [&id],
            Self::row_to_organization,
        )
    }

    pub fn list_organizations(&self, tenant_id: &str) -> SqliteResult<Vec<Organization>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, domain, created_at, updated_at FROM organizations WHERE tenant_id = ?1 ORDER BY name",
        )?;
        let orgs = stmt
            .query_map([tenant_id], Self::row_to_organization)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(orgs)
    }

    pub fn organization_exists(&self, tenant_id: &str, org_id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT 1 FROM organizations WHERE tenant_id = ?1 AND id = ?2")?;
        stmt.exists([tenant_id, org_id])
    }

    /// Insert a developer and its (already normalized) identifiers atomically
    pub fn create_developer(
        &self,
        tenant_id: &str,
        req: &CreateDeveloperRequest,
        identifiers: &[IdentifierInput],
    ) -> SqliteResult<Developer> {
        let id = Uuid::new_v4().to_string();
        let tags = serde_json::to_string(&req.tags).unwrap_or_else(|_| "[]".to_string());

        self.transaction(|tx| {
            let now = now_ts();
            tx.execute(
                &format!(
                    "INSERT INTO developers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    DEVELOPER_COLUMNS
                ),
                rusqlite::params![
                    &id,
                    tenant_id,
                    req.display_name.trim(),
                    req.primary_email.as_deref().map(|e| e.trim().to_lowercase()),
                    req.org_id,
                    req.avatar_url,
                    &tags,
                    &now,
                ],
            )?;
            for identifier in identifiers {
                insert_identifier(tx, tenant_id, &id, identifier)?;
            }
            Ok::<_, rusqlite::Error>(())
        })?;

        self.get_developer(tenant_id, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_developer(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<Developer>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM developers WHERE tenant_id = ?1 AND id = ?2", DEVELOPER_COLUMNS),
            [tenant_id, id],
            Self::row_to_developer,
        )
        .optional()
    }

    pub fn get_developer_detail(&self, tenant_id: &str, id: &str) -> SqliteResult<Option<DeveloperDetail>> {
        let Some(developer) = self.get_developer(tenant_id, id)? else {
            return Ok(None);
        };
        let identifiers = self.list_identifiers(tenant_id, id)?;
        let conn = self.conn();
        let activity_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM activities WHERE tenant_id = ?1 AND developer_id = ?2",
            [tenant_id, id],
            |row| row.get(0),
        )?;
        Ok(Some(DeveloperDetail {
            developer,
            identifiers,
            activity_count,
        }))
    }

    pub fn list_developers(
        &self,
        tenant_id: &str,
        query: &DeveloperListQuery,
        page: Page,
    ) -> SqliteResult<(Vec<Developer>, i64)> {
        let mut clauses = vec!["d.tenant_id = ?".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(tenant_id.to_string())];

        if let Some(q) = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            clauses.push(
                "(LOWER(d.display_name) LIKE ? OR LOWER(COALESCE(d.primary_email, '')) LIKE ?
                  OR EXISTS (SELECT 1 FROM developer_identifiers i WHERE i.developer_id = d.id AND LOWER(i.value) LIKE ?))"
                    .to_string(),
            );
            let pattern = format!("%{}%", q.to_lowercase());
            for _ in 0..3 {
                params.push(Box::new(pattern.clone()));
            }
        }
        if let Some(org_id) = &query.org_id {
            clauses.push("d.org_id = ?".to_string());
            params.push(Box::new(org_id.clone()));
        }
        let where_sql = clauses.join(" AND ");

        let conn = self.conn();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM developers d WHERE {}", where_sql),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;

        params.push(Box::new(page.limit()));
        params.push(Box::new(page.offset()));
        let columns = DEVELOPER_COLUMNS
            .split(", ")
            .map(|c| format!("d.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM developers d WHERE {} ORDER BY d.created_at DESC, d.id LIMIT ? OFFSET ?",
            columns, where_sql
        ))?;
        let developers = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), Self::row_to_developer)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok((developers, total))
    }

    pub fn update_developer(
        &self,
        tenant_id: &str,
        id: &str,
        req: &UpdateDeveloperRequest,
    ) -> SqliteResult<Option<Developer>> {
        let Some(current) = self.get_developer(tenant_id, id)? else {
            return Ok(None);
        };
        let tags = req.tags.as_ref().unwrap_or(&current.tags);
        let tags = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());

        {
            let conn = self.conn();
            conn.execute(
                "UPDATE developers SET display_name = ?1, primary_email = ?2, org_id = ?3, avatar_url = ?4, tags = ?5, updated_at = ?6
                 WHERE tenant_id = ?7 AND id = ?8",
                rusqlite::params![
                    req.display_name.as_deref().map(str::trim).unwrap_or(&current.display_name),
                    req.primary_email
                        .as_deref()
                        .map(|e| e.trim().to_lowercase())
                        .or(current.primary_email),
                    req.org_id.as_ref().or(current.org_id.as_ref()),
                    req.avatar_url.as_ref().or(current.avatar_url.as_ref()),
                    &tags,
                    now_ts(),
                    tenant_id,
                    id,
                ],
            )?;
        }
        self.get_developer(tenant_id, id)
    }

    /// Identifiers cascade; activities keep their row with `developer_id` nulled
    pub fn delete_developer(&self, tenant_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM developers WHERE tenant_id = ?1 AND id = ?2", [tenant_id, id])?;
        Ok(rows > 0)
    }

    pub fn list_identifiers(&self, tenant_id: &str, developer_id: &str) -> SqliteResult<Vec<Identifier>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, developer_id, kind, value, created_at FROM developer_identifiers
             WHERE tenant_id = ?1 AND developer_id = ?2 ORDER BY created_at, kind",
        )?;
        let identifiers = stmt
            .query_map([tenant_id, developer_id], Self::row_to_identifier)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(identifiers)
    }

    pub fn add_identifier(
        &self,
        tenant_id: &str,
        developer_id: &str,
        identifier: &IdentifierInput,
    ) -> SqliteResult<Identifier> {
        let conn = self.conn();
        let id = insert_identifier(&conn, tenant_id, developer_id, identifier)?;
        conn.query_row(
            "SELECT id, developer_id, kind, value, created_at FROM developer_identifiers WHERE id = ?1",
            [&id],
            Self::row_to_identifier,
        )
    }

    pub fn remove_identifier(&self, tenant_id: &str, developer_id: &str, identifier_id: &str) -> SqliteResult<bool> {
        let conn = self.conn();
        let rows = conn.execute(
            "DELETE FROM developer_identifiers WHERE tenant_id = ?1 AND developer_id = ?2 AND id = ?3",
            [tenant_id, developer_id, identifier_id],
        )?;
        Ok(rows > 0)
    }

    /// Match identifiers to a developer, creating or extending one as needed
    pub fn resolve_developer(
        &self,
        tenant_id: &str,
        identifiers: &[IdentifierInput],
        display_name: Option<&str>,
    ) -> SqliteResult<Resolution> {
        self.transaction(|tx| resolve_identifiers(tx, tenant_id, identifiers, display_name))
    }

    /// Move identifiers and activities from `source_id` into `target_id`, then
    /// delete the source. Returns false when either developer is unknown.
    pub fn merge_developers(&self, tenant_id: &str, target_id: &str, source_id: &str) -> SqliteResult<bool> {
        self.transaction(|tx| {
            let mut exists = tx.prepare("SELECT tags FROM developers WHERE tenant_id = ?1 AND id = ?2")?;
            let target_tags: Option<String> = exists.query_row([tenant_id, target_id], |r| r.get(0)).optional()?;
            let source_tags: Option<String> = exists.query_row([tenant_id, source_id], |r| r.get(0)).optional()?;
            drop(exists);
            let (Some(target_tags), Some(source_tags)) = (target_tags, source_tags) else {
                return Ok(false);
            };

            tx.execute(
                "UPDATE developer_identifiers SET developer_id = ?1 WHERE tenant_id = ?2 AND developer_id = ?3",
                [target_id, tenant_id, source_id],
            )?;
            let moved = tx.execute(
                "UPDATE activities SET developer_id = ?1 WHERE tenant_id = ?2 AND developer_id = ?3",
                [target_id, tenant_id, source_id],
            )?;

            let mut tags: Vec<String> = serde_json::from_str(&target_tags).unwrap_or_default();
            for tag in serde_json::from_str::<Vec<String>>(&source_tags).unwrap_or_default() {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            let tags = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());

            // Fill gaps on the target from the source profile
            tx.execute(
                "UPDATE developers SET
                    primary_email = COALESCE(primary_email, (SELECT primary_email FROM developers WHERE id = ?3)),
                    org_id = COALESCE(org_id, (SELECT org_id FROM developers WHERE id = ?3)),
                    avatar_url = COALESCE(avatar_url, (SELECT avatar_url FROM developers WHERE id = ?3)),
                    tags = ?4, updated_at = ?5
                 WHERE tenant_id = ?1 AND id = ?2",
                rusqlite::params![tenant_id, target_id, source_id, &tags, now_ts()],
            )?;
            tx.execute("DELETE FROM developers WHERE tenant_id = ?1 AND id = ?2", [tenant_id, source_id])?;

            log::info!(
                "Merged developer {} into {} ({} activities moved)",
                source_id,
                target_id,
                moved
            );
            Ok(true)
        })
    }

    /// Developers with the most activities, for the dashboard
    pub fn top_developers(&self, tenant_id: &str, limit: i64) -> SqliteResult<Vec<(Developer, i64)>> {
        let conn = self.conn();
        let columns = DEVELOPER_COLUMNS
            .split(", ")
            .map(|c| format!("d.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, COUNT(a.id) AS n FROM developers d
             JOIN activities a ON a.developer_id = d.id AND a.tenant_id = d.tenant_id
             WHERE d.tenant_id = ?1 GROUP BY d.id ORDER BY n DESC, d.display_name LIMIT ?2",
            columns
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![tenant_id, limit], |row| {
                Ok((Self::row_to_developer(row)?, row.get(9)?))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    fn row_to_organization(row: &Row<'_>) -> SqliteResult<Organization> {
        Ok(Organization {
            id: row.get(0)?,
            name: row.get(1)?,
            domain: row.get(2)?,
            created_at: ts_col(row, 3)?,
            updated_at: ts_col(row, 4)?,
        })
    }

    fn row_to_developer(row: &Row<'_>) -> SqliteResult<Developer> {
        Ok(Developer {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            display_name: row.get(2)?,
            primary_email: row.get(3)?,
            org_id: row.get(4)?,
            avatar_url: row.get(5)?,
            tags: string_list_col(row, 6)?,
            created_at: ts_col(row, 7)?,
            updated_at: ts_col(row, 8)?,
        })
    }

    fn row_to_identifier(row: &Row<'_>) -> SqliteResult<Identifier> {
        Ok(Identifier {
            id: row.get(0)?,
            developer_id: row.get(1)?,
            kind: row.get::<_, String>(2)?.parse().unwrap_or(IdentifierKind::Custom),
            value: row.get(3)?,
            created_at: ts_col(row, 4)?,
        })
    }
}

fn insert_identifier(
    conn: &Connection,
    tenant_id: &str,
    developer_id: &str,
    identifier: &IdentifierInput,
) -> SqliteResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO developer_identifiers (id, tenant_id, developer_id, kind, value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![&id, tenant_id, developer_id, identifier.kind.as_ref(), &identifier.value, now_ts()],
    )?;
    Ok(id)
}

fn identifier_owner(conn: &Connection, tenant_id: &str, identifier: &IdentifierInput) -> SqliteResult<Option<String>> {
    conn.query_row(
        "SELECT developer_id FROM developer_identifiers WHERE tenant_id = ?1 AND kind = ?2 AND value = ?3",
        [tenant_id, identifier.kind.as_ref(), identifier.value.as_str()],
        |row| row.get(0),
    )
    .optional()
}

/// Resolution core. The first developer found (in submission order) wins;
/// identifiers owned by other developers are reported, never moved.
pub(crate) fn resolve_identifiers(
    conn: &Connection,
    tenant_id: &str,
    identifiers: &[IdentifierInput],
    display_name: Option<&str>,
) -> SqliteResult<Resolution> {
    let mut owners: Vec<String> = Vec::new();
    let mut unowned: Vec<&IdentifierInput> = Vec::new();

    for identifier in identifiers {
        match identifier_owner(conn, tenant_id, identifier)? {
            Some(owner) => {
                if !owners.contains(&owner) {
                    owners.push(owner);
                }
            }
            None => {
                if !unowned.contains(&identifier) {
                    unowned.push(identifier);
                }
            }
        }
    }

    let (developer_id, created) = match owners.first() {
        Some(owner) => (owner.clone(), false),
        None => {
            let id = Uuid::new_v4().to_string();
            let primary_email = identifiers
                .iter()
                .find(|i| i.kind == IdentifierKind::Email)
                .map(|i| i.value.clone());
            let name = display_name
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .or_else(|| identifiers.first().map(|i| i.value.clone()))
                .unwrap_or_else(|| "Unknown developer".to_string());
            let now = now_ts();
            conn.execute(
                "INSERT INTO developers (id, tenant_id, display_name, primary_email, tags, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, '[]', ?5, ?5)",
                rusqlite::params![&id, tenant_id, &name, primary_email, &now],
            )?;
            (id, true)
        }
    };

    let mut attached = Vec::new();
    for identifier in unowned {
        insert_identifier(conn, tenant_id, &developer_id, identifier)?;
        attached.push(identifier.clone());
    }

    Ok(Resolution {
        developer_id,
        created,
        attached,
        conflicting_developer_ids: owners.into_iter().skip(1).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, String) {
        let db = Database::new(":memory:").unwrap();
        let (tenant, _) = db.create_tenant_with_admin("Acme", "a@acme.dev", "A", "h").unwrap();
        (db, tenant.id)
    }

    fn ident(kind: IdentifierKind, value: &str) -> IdentifierInput {
        IdentifierInput {
            kind,
            value: value.to_string(),
        }
    }

    fn developer(db: &Database, tenant: &str, name: &str, identifiers: &[IdentifierInput]) -> Developer {
        let req = CreateDeveloperRequest {
            display_name: name.to_string(),
            primary_email: None,
            org_id: None,
            avatar_url: None,
            tags: vec!["beta".to_string()],
            identifiers: vec![],
        };
        db.create_developer(tenant, &req, identifiers).unwrap()
    }

    #[test]
    fn test_create_with_identifiers() {
        let (db, tenant) = setup();
        let dev = developer(&db, &tenant, "Ada", &[ident(IdentifierKind::Github, "ada")]);
        let detail = db.get_developer_detail(&tenant, &dev.id).unwrap().unwrap();
        assert_eq!(detail.identifiers.len(), 1);
        assert_eq!(detail.developer.tags, vec!["beta".to_string()]);
        assert_eq!(detail.activity_count, 0);
    }

    #[test]
    fn test_duplicate_identifier_rolls_back_developer() {
        let (db, tenant) = setup();
        developer(&db, &tenant, "Ada", &[ident(IdentifierKind::Github, "ada")]);
        let req = CreateDeveloperRequest {
            display_name: "Copy".to_string(),
            primary_email: None,
            org_id: None,
            avatar_url: None,
            tags: vec![],
            identifiers: vec![],
        };
        let err = db
            .create_developer(&tenant, &req, &[ident(IdentifierKind::Github, "ada")])
            .unwrap_err();
        assert!(crate::errors::is_unique_violation(&err));
        let (_, total) = db
            .list_developers(&tenant, &DeveloperListQuery::default(), Page::default())
            .unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_resolve_creates_then_attaches() {
        let (db, tenant) = setup();
        let first = db
            .resolve_developer(&tenant, &[ident(IdentifierKind::Email, "ada@example.com")], Some("Ada"))
            .unwrap();
        assert!(first.created);

        let second = db
            .resolve_developer(
                &tenant,
                &[
                    ident(IdentifierKind::Email, "ada@example.com"),
                    ident(IdentifierKind::Github, "ada"),
                ],
                None,
            )
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.developer_id, first.developer_id);
        assert_eq!(second.attached, vec![ident(IdentifierKind::Github, "ada")]);

        let dev = db.get_developer(&tenant, &first.developer_id).unwrap().unwrap();
        assert_eq!(dev.primary_email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_resolve_reports_conflicts_without_merging() {
        let (db, tenant) = setup();
        let a = developer(&db, &tenant, "A", &[ident(IdentifierKind::Github, "a")]);
        let b = developer(&db, &tenant, "B", &[ident(IdentifierKind::Twitter, "b")]);

        let res = db
            .resolve_developer(
                &tenant,
                &[ident(IdentifierKind::Github, "a"), ident(IdentifierKind::Twitter, "b")],
                None,
            )
            .unwrap();
        assert_eq!(res.developer_id, a.id);
        assert_eq!(res.conflicting_developer_ids, vec![b.id.clone()]);
        assert!(db.get_developer(&tenant, &b.id).unwrap().is_some());
    }

    #[test]
    fn test_identifiers_are_tenant_scoped() {
        let (db, tenant) = setup();
        let (other, _) = db.create_tenant_with_admin("Other", "o@other.dev", "O", "h").unwrap();
        developer(&db, &tenant, "A", &[ident(IdentifierKind::Github, "same")]);
        let res = db
            .resolve_developer(&other.id, &[ident(IdentifierKind::Github, "same")], None)
            .unwrap();
        assert!(res.created);
    }

    #[test]
    fn test_merge_moves_identifiers() {
        let (db, tenant) = setup();
        let a = developer(&db, &tenant, "A", &[ident(IdentifierKind::Github, "a")]);
        let b = developer(&db, &tenant, "B", &[ident(IdentifierKind::Twitter, "b")]);

        assert!(db.merge_developers(&tenant, &a.id, &b.id).unwrap());
        assert!(db.get_developer(&tenant, &b.id).unwrap().is_none());
        assert_eq!(db.list_identifiers(&tenant, &a.id).unwrap().len(), 2);
        assert!(!db.merge_developers(&tenant, &a.id, "missing").unwrap());
    }

    #[test]
    fn test_search_matches_identifier_values() {
        let (db, tenant) = setup();
        developer(&db, &tenant, "Grace", &[ident(IdentifierKind::Github, "hopper")]);
        developer(&db, &tenant, "Linus", &[]);
        let query = DeveloperListQuery {
            q: Some("hop".to_string()),
            org_id: None,
        };
        let (items, total) = db.list_developers(&tenant, &query, Page::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].display_name, "Grace");
    }
}
