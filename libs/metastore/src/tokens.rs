//! Bearer tokens and projects. Identity proper (key hashing, rotation)
//! lives outside the engine; this table is the lookup surface it feeds.

use fanout_core::{Error, Result, now_rfc3339};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::Metastore;

/// Resolution of one bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: String,
    pub org_id: String,
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub org_id: String,
    pub project_id: String,
    pub created_at: String,
}

impl Metastore {
    pub async fn resolve_token(&self, token: &str) -> Result<Option<TokenRecord>> {
        let token = token.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT token, org_id, project_id FROM tokens WHERE token = ?1",
                params![token],
                |row| {
                    Ok(TokenRecord {
                        token: row.get(0)?,
                        org_id: row.get(1)?,
                        project_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    pub async fn insert_token(&self, token: &str, org_id: &str, project_id: &str) -> Result<()> {
        {
            let (token, org_id, project_id) =
                (token.to_string(), org_id.to_string(), project_id.to_string());
            self.with_conn(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO tokens (token, org_id, project_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![token, org_id, project_id, now_rfc3339()],
                )
                .map(|_| ())
            })
            .await?;
        }
        self.create_project(org_id, project_id).await
    }

    pub async fn create_project(&self, org_id: &str, project_id: &str) -> Result<()> {
        if org_id.is_empty() || project_id.is_empty() {
            return Ok(());
        }
        let (org_id, project_id) = (org_id.to_string(), project_id.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO projects (org_id, project_id, created_at) \
                 VALUES (?1, ?2, ?3)",
                params![org_id, project_id, now_rfc3339()],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn list_projects(&self, org_id: &str) -> Result<Vec<Project>> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT org_id, project_id, created_at FROM projects \
                 WHERE org_id = ?1 ORDER BY project_id",
            )?;
            let rows = stmt.query_map(params![org_id], |row| {
                Ok(Project {
                    org_id: row.get(0)?,
                    project_id: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    pub async fn delete_project(&self, org_id: &str, project_id: &str) -> Result<()> {
        let (org_id, project_id) = (org_id.to_string(), project_id.to_string());
        let affected = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM projects WHERE org_id = ?1 AND project_id = ?2",
                    params![org_id, project_id],
                )
            })
            .await?;
        if affected == 0 {
            return Err(Error::not_found("project"));
        }
        Ok(())
    }
}
