//! Repository layer for database operations

pub mod files;
pub mod jobs;
pub mod parameters;
pub mod scripts;
pub mod users;

use sqlx::{Pool, Postgres};

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub users: users::UsersRepository,
    pub scripts: scripts::ScriptsRepository,
    pub parameters: parameters::ParametersRepository,
    pub jobs: jobs::JobsRepository,
    pub files: files::FilesRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            users: users::UsersRepository::new(pool.clone()),
            scripts: scripts::ScriptsRepository::new(pool.clone()),
            parameters: parameters::ParametersRepository::new(pool.clone()),
            jobs: jobs::JobsRepository::new(pool.clone()),
            files: files::FilesRepository::new(pool.clone()),
            pool,
        }
    }

    /// Round trip to the database
    pub async fn ping(&self) -> crate::error::AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
