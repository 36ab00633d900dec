use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    generations::model::{Generation, GenerationFilter, GenerationPatch, NewGeneration},
    users::model::User,
};

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    /// The owner referenced by a new record no longer exists.
    #[error("user not found")]
    UnknownUser,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence seam for users and their generation history.
///
/// Generation operations are always scoped by owner: a record that exists but
/// belongs to another user is reported exactly like a missing one.
#[async_trait]
pub trait Store: Send + Sync {
    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, StoreError>;
    async fn update_user_name(
        &self,
        id: Uuid,
        full_name: Option<String>,
    ) -> anyhow::Result<Option<User>>;
    /// Removes the user and, by cascade, every generation it owns.
    async fn delete_user(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Returns `(total, page)`; the page is ordered newest first.
    async fn list_generations(
        &self,
        user_id: Uuid,
        filter: GenerationFilter,
    ) -> anyhow::Result<(i64, Vec<Generation>)>;
    async fn find_generation(&self, user_id: Uuid, id: Uuid)
        -> anyhow::Result<Option<Generation>>;
    /// Fails with [`StoreError::UnknownUser`] when `user_id` was deleted.
    async fn create_generation(
        &self,
        user_id: Uuid,
        new: NewGeneration,
    ) -> Result<Generation, StoreError>;
    async fn update_generation(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: GenerationPatch,
    ) -> anyhow::Result<Option<Generation>>;
    async fn delete_generation(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<bool>;
}
