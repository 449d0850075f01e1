//! Script groups, scripts, versions and virtual environments

use chrono::Utc;
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::script::{
        Script, ScriptGroup, ScriptSearchResult, ScriptSummary, ScriptVersion, VersionInfo, VirtualEnvironment,
    },
    text::unique_slug,
};

#[derive(Clone)]
pub struct ScriptsRepository {
    pool: Pool<Postgres>,
}

/// Slugs of `table` starting with `base`, used to pick a free one
async fn taken_slugs(pool: &Pool<Postgres>, table: &str, base: &str) -> AppResult<Vec<String>> {
    let query = format!("SELECT slug FROM {} WHERE slug LIKE $1 || '%'", table);
    let slugs = sqlx::query_scalar::<_, String>(&query)
        .bind(base)
        .fetch_all(pool)
        .await?;
    Ok(slugs)
}

pub(crate) async fn free_slug(pool: &Pool<Postgres>, table: &str, name: &str) -> AppResult<String> {
    let base = crate::text::slugify(name);
    let taken = taken_slugs(pool, table, &base).await?;
    Ok(unique_slug(name, |candidate| taken.iter().any(|t| t == candidate)))
}

impl ScriptsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    // Groups

    pub async fn list_active_groups(&self) -> AppResult<Vec<ScriptGroup>> {
        let groups = sqlx::query_as::<_, ScriptGroup>(
            "SELECT * FROM script_groups WHERE is_active = TRUE ORDER BY group_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    pub async fn get_group(&self, id: i32) -> AppResult<ScriptGroup> {
        sqlx::query_as::<_, ScriptGroup>("SELECT * FROM script_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Script group with id {} not found", id)))
    }

    /// Group with the given name, created when missing
    pub async fn get_or_create_group(&self, name: &str) -> AppResult<ScriptGroup> {
        let existing = sqlx::query_as::<_, ScriptGroup>("SELECT * FROM script_groups WHERE group_name = $1 ORDER BY id LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(group) = existing {
            return Ok(group);
        }

        let slug = free_slug(&self.pool, "script_groups", name).await?;
        let group = sqlx::query_as::<_, ScriptGroup>(
            r#"
            INSERT INTO script_groups (group_name, slug, group_order, is_active)
            VALUES ($1, $2, 1, TRUE)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(&slug)
        .fetch_one(&self.pool)
        .await?;
        tracing::info!("Created script group {} ({})", name, slug);
        Ok(group)
    }

    /// User groups allowed to use a script group (empty: everyone)
    pub async fn group_user_groups(&self, group_id: i32) -> AppResult<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT user_group_id FROM script_group_user_groups WHERE script_group_id = $1",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    // Scripts

    pub async fn get_by_id(&self, id: i32) -> AppResult<Script> {
        sqlx::query_as::<_, Script>("SELECT * FROM scripts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Script with id {} not found", id)))
    }

    pub async fn get_by_slug(&self, slug: &str) -> AppResult<Script> {
        sqlx::query_as::<_, Script>("SELECT * FROM scripts WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Script '{}' not found", slug)))
    }

    pub async fn get_by_name(&self, name: &str) -> AppResult<Option<Script>> {
        let script = sqlx::query_as::<_, Script>("SELECT * FROM scripts WHERE script_name = $1 ORDER BY id LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(script)
    }

    pub async fn create(
        &self,
        name: &str,
        group_id: i32,
        description: Option<&str>,
        ignore_bad_imports: bool,
    ) -> AppResult<Script> {
        let slug = free_slug(&self.pool, "scripts", name).await?;
        let now = Utc::now();
        let script = sqlx::query_as::<_, Script>(
            r#"
            INSERT INTO scripts (
                script_name, slug, script_group_id, script_description, script_order,
                is_active, ignore_bad_imports, execute_full_path, created_date, modified_date
            ) VALUES ($1, $2, $3, $4, 1, TRUE, $5, TRUE, $6, $6)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(&slug)
        .bind(group_id)
        .bind(description)
        .bind(ignore_bad_imports)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(script)
    }

    /// Refresh description and flags of an existing script on re-registration
    pub async fn touch(&self, id: i32, description: Option<&str>, ignore_bad_imports: bool) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE scripts
            SET script_description = COALESCE($1, script_description),
                ignore_bad_imports = $2,
                modified_date = $3
            WHERE id = $4
            "#,
        )
        .bind(description)
        .bind(ignore_bad_imports)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Active scripts of a group with their default version metadata
    pub async fn list_group_scripts(&self, group_id: i32) -> AppResult<Vec<ScriptSummary>> {
        let scripts = sqlx::query_as::<_, ScriptSummary>(
            r#"
            SELECT s.id, s.slug, s.script_name, s.script_description,
                   v.modified_date, cu.username AS created_by, mu.username AS modified_by
            FROM scripts s
            LEFT JOIN script_versions v ON v.script_id = s.id AND v.default_version = TRUE
            LEFT JOIN users cu ON cu.id = v.created_by
            LEFT JOIN users mu ON mu.id = v.modified_by
            WHERE s.script_group_id = $1 AND s.is_active = TRUE
            ORDER BY s.script_order, s.script_name
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(scripts)
    }

    /// Active scripts whose name contains `q` (case-insensitive)
    pub async fn search(&self, q: &str) -> AppResult<Vec<ScriptSearchResult>> {
        let results = sqlx::query_as::<_, ScriptSearchResult>(
            r#"
            SELECT id, script_name AS name, slug, script_group_id AS group_id
            FROM scripts
            WHERE is_active = TRUE AND script_name ILIKE '%' || $1 || '%'
            ORDER BY script_name
            "#,
        )
        .bind(q)
        .fetch_all(&self.pool)
        .await?;
        Ok(results)
    }

    /// User groups allowed to use a script (empty: everyone)
    pub async fn script_user_groups(&self, script_id: i32) -> AppResult<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>("SELECT user_group_id FROM script_user_groups WHERE script_id = $1")
            .bind(script_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    // Versions

    pub async fn get_version(&self, id: i32) -> AppResult<ScriptVersion> {
        sqlx::query_as::<_, ScriptVersion>("SELECT * FROM script_versions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Script version with id {} not found", id)))
    }

    pub async fn default_version(&self, script_id: i32) -> AppResult<Option<ScriptVersion>> {
        let version = sqlx::query_as::<_, ScriptVersion>(
            "SELECT * FROM script_versions WHERE script_id = $1 AND default_version = TRUE ORDER BY id DESC LIMIT 1",
        )
        .bind(script_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(version)
    }

    /// Last version matching the given version string and/or iteration
    pub async fn find_version(
        &self,
        script_id: i32,
        version: Option<&str>,
        iteration: Option<i16>,
    ) -> AppResult<Option<ScriptVersion>> {
        let found = sqlx::query_as::<_, ScriptVersion>(
            r#"
            SELECT * FROM script_versions
            WHERE script_id = $1
              AND ($2::text IS NULL OR script_version = $2)
              AND ($3::smallint IS NULL OR script_iteration = $3)
            ORDER BY script_iteration DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(script_id)
        .bind(version)
        .bind(iteration)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found)
    }

    pub async fn list_versions(&self, script_id: i32) -> AppResult<Vec<VersionInfo>> {
        let versions = sqlx::query_as::<_, VersionInfo>(
            r#"
            SELECT v.id, v.script_version, v.script_iteration, v.default_version, v.checksum,
                   cu.username AS created_by, v.created_date,
                   mu.username AS modified_by, v.modified_date
            FROM script_versions v
            LEFT JOIN users cu ON cu.id = v.created_by
            LEFT JOIN users mu ON mu.id = v.modified_by
            WHERE v.script_id = $1
            ORDER BY v.script_version, v.script_iteration
            "#,
        )
        .bind(script_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(versions)
    }

    pub async fn checksum_exists(&self, script_id: i32, checksum: &str) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM script_versions WHERE script_id = $1 AND checksum = $2)",
        )
        .bind(script_id)
        .bind(checksum)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn max_iteration(&self, script_id: i32, version: &str) -> AppResult<Option<i16>> {
        let max: Option<i16> = sqlx::query_scalar(
            "SELECT MAX(script_iteration) FROM script_versions WHERE script_id = $1 AND script_version = $2",
        )
        .bind(script_id)
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    /// Insert a version and make it the only default version of its script
    pub async fn create_version(
        &self,
        script_id: i32,
        version: &str,
        iteration: i16,
        script_path: &str,
        checksum: &str,
        user_id: Option<i32>,
    ) -> AppResult<ScriptVersion> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query("UPDATE script_versions SET default_version = FALSE WHERE script_id = $1")
            .bind(script_id)
            .execute(&mut *tx)
            .await?;

        let created = sqlx::query_as::<_, ScriptVersion>(
            r#"
            INSERT INTO script_versions (
                script_id, script_version, script_iteration, script_path, default_version,
                checksum, created_by, modified_by, created_date, modified_date
            ) VALUES ($1, $2, $3, $4, TRUE, $5, $6, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(script_id)
        .bind(version)
        .bind(iteration)
        .bind(script_path)
        .bind(checksum)
        .bind(user_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    pub async fn get_virtual_environment(&self, id: i32) -> AppResult<VirtualEnvironment> {
        sqlx::query_as::<_, VirtualEnvironment>("SELECT * FROM virtual_environments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Virtual environment with id {} not found", id)))
    }
}
