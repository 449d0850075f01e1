//! Stored files and user files

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::file::{ScriptlyFile, UserFile, UserFileRow},
};

const USER_FILE_SELECT: &str = r#"
    SELECT uf.id, uf.filename, uf.job_id, uf.parameter_id, uf.system_file_id,
           sf.filepath, sf.filepreview, sf.filetype, sf.size_bytes, sf.checksum,
           sp.is_output
    FROM user_files uf
    JOIN scriptly_files sf ON sf.id = uf.system_file_id
    LEFT JOIN job_parameters jp ON jp.id = uf.parameter_id
    LEFT JOIN script_parameters sp ON sp.id = jp.parameter_id
"#;

/// Metadata of a file about to be stored
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub filepath: &'a str,
    pub checksum: &'a str,
    pub filetype: Option<&'a str>,
    pub filepreview: Option<&'a str>,
    pub size_bytes: Option<i64>,
}

#[derive(Clone)]
pub struct FilesRepository {
    pool: Pool<Postgres>,
}

impl FilesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Stored file with the same checksum, or a new one. The flag tells
    /// whether it was created.
    pub async fn get_or_create(&self, new: &NewFile<'_>) -> AppResult<(ScriptlyFile, bool)> {
        let mut conn = self.pool.acquire().await?;
        Self::get_or_create_with(&mut conn, new).await
    }

    /// [`Self::get_or_create`] on a given connection or transaction
    pub(crate) async fn get_or_create_with(
        conn: &mut PgConnection,
        new: &NewFile<'_>,
    ) -> AppResult<(ScriptlyFile, bool)> {
        let existing = sqlx::query_as::<_, ScriptlyFile>(
            "SELECT * FROM scriptly_files WHERE checksum = $1 ORDER BY id LIMIT 1",
        )
        .bind(new.checksum)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(existing) = existing {
            return Ok((existing, false));
        }
        let file = sqlx::query_as::<_, ScriptlyFile>(
            r#"
            INSERT INTO scriptly_files (filepath, filepreview, filetype, size_bytes, checksum)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(new.filepath)
        .bind(new.filepreview)
        .bind(new.filetype)
        .bind(new.size_bytes)
        .bind(new.checksum)
        .fetch_one(&mut *conn)
        .await?;
        Ok((file, true))
    }

    /// Link a stored file to a job unless the same link already exists
    pub async fn get_or_create_user_file(
        &self,
        job_id: i32,
        system_file_id: i32,
        parameter_id: Option<i32>,
        filename: &str,
    ) -> AppResult<UserFile> {
        let mut conn = self.pool.acquire().await?;
        Self::get_or_create_user_file_with(&mut conn, job_id, system_file_id, parameter_id, filename).await
    }

    pub(crate) async fn get_or_create_user_file_with(
        conn: &mut PgConnection,
        job_id: i32,
        system_file_id: i32,
        parameter_id: Option<i32>,
        filename: &str,
    ) -> AppResult<UserFile> {
        let existing = sqlx::query_as::<_, UserFile>(
            r#"
            SELECT * FROM user_files
            WHERE job_id = $1 AND system_file_id = $2
              AND parameter_id IS NOT DISTINCT FROM $3 AND filename = $4
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .bind(system_file_id)
        .bind(parameter_id)
        .bind(filename)
        .fetch_optional(&mut *conn)
        .await?;
        if let Some(user_file) = existing {
            return Ok(user_file);
        }
        let user_file = sqlx::query_as::<_, UserFile>(
            r#"
            INSERT INTO user_files (filename, job_id, system_file_id, parameter_id)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(filename)
        .bind(job_id)
        .bind(system_file_id)
        .bind(parameter_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(user_file)
    }

    /// Owners of the jobs a stored file is linked to
    pub async fn file_owners(&self, filepath: &str) -> AppResult<Vec<Option<i32>>> {
        let owners = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT DISTINCT j.user_id
            FROM scriptly_files sf
            JOIN user_files uf ON uf.system_file_id = sf.id
            JOIN scriptly_jobs j ON j.id = uf.job_id
            WHERE sf.filepath = $1
            "#,
        )
        .bind(filepath)
        .fetch_all(&self.pool)
        .await?;
        Ok(owners)
    }

    pub async fn get_user_file(&self, id: i32) -> AppResult<UserFileRow> {
        let query = format!("{} WHERE uf.id = $1", USER_FILE_SELECT);
        sqlx::query_as::<_, UserFileRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File with id {} not found", id)))
    }

    pub async fn files_for_job(&self, job_id: i32) -> AppResult<Vec<UserFileRow>> {
        let query = format!("{} WHERE uf.job_id = $1 ORDER BY uf.filename, uf.id", USER_FILE_SELECT);
        let rows = sqlx::query_as::<_, UserFileRow>(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Files produced by a job: unlinked outputs and output parameters
    pub async fn output_files_for_job(&self, job_id: i32) -> AppResult<Vec<UserFileRow>> {
        let query = format!(
            "{} WHERE uf.job_id = $1 AND (uf.parameter_id IS NULL OR sp.is_output = TRUE) ORDER BY uf.id",
            USER_FILE_SELECT
        );
        let rows = sqlx::query_as::<_, UserFileRow>(&query)
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn delete_user_file(&self, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM user_files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of user files pointing at a stored file
    pub async fn link_count(&self, system_file_id: i32) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_files WHERE system_file_id = $1")
            .bind(system_file_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn delete_system_file(&self, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM scriptly_files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
