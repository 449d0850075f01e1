//! Data models for Scriptly

pub mod file;
pub mod job;
pub mod parameter;
pub mod schema;
pub mod script;
pub mod user;

// Re-export commonly used types
pub use file::{FileGroups, ScriptlyFile, UserFile};
pub use job::{JobParameter, JobStatus, ScriptlyJob};
pub use parameter::{ChoiceLimit, FieldKind, ScriptParameter, ScriptParameterGroup, ScriptParser};
pub use schema::ScriptSchema;
pub use script::{Script, ScriptGroup, ScriptVersion, VirtualEnvironment};
pub use user::{User, UserClaims};
