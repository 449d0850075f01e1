//! Business logic services

pub mod files;
pub mod jobs;
pub mod realtime;
pub mod scripts;
pub mod users;

use crate::{
    config::AppConfig,
    error::AppResult,
    models::user::UserClaims,
    repository::Repository,
    storage::FileStore,
};

/// Who is making a request, with the user groups access checks need
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: Option<i32>,
    pub username: Option<String>,
    pub is_superuser: bool,
    pub groups: Vec<i32>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub users: users::UsersService,
    pub scripts: scripts::ScriptsService,
    pub jobs: jobs::JobsService,
    pub files: files::FilesService,
    pub realtime: realtime::RealtimeService,
    repository: Repository,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(repository: Repository, config: &AppConfig, realtime: realtime::RealtimeService) -> Self {
        let store = FileStore::from_config(&config.storage);
        let users = users::UsersService::new(repository.clone(), config.auth.clone());
        let scripts = scripts::ScriptsService::new(
            repository.clone(),
            config.scriptly.clone(),
            config.storage.clone(),
            store.clone(),
        );
        let jobs = jobs::JobsService::new(
            repository.clone(),
            config.scriptly.clone(),
            store.clone(),
            realtime.clone(),
            scripts.clone(),
        );
        Self {
            users,
            scripts,
            jobs,
            files: files::FilesService::new(repository.clone(), store),
            realtime,
            repository,
        }
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.repository.ping().await
    }

    /// Resolve the caller of a request from its (optional) claims
    pub async fn caller(&self, claims: Option<&UserClaims>) -> AppResult<Caller> {
        let Some(claims) = claims else {
            return Ok(Caller::anonymous());
        };
        Ok(Caller {
            user_id: Some(claims.user_id),
            username: Some(claims.sub.clone()),
            is_superuser: claims.is_superuser,
            groups: self.users.group_ids(Some(claims.user_id)).await?,
        })
    }
}
