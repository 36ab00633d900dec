use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::{
    generations::model::{
        Generation, GenerationFilter, GenerationPatch, GenerationStatus, NewGeneration,
    },
    users::model::User,
};

/// In-process store with the same semantics as the Postgres one.
/// Selected with `DATABASE_URL=memory`; also backs the handler tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    // insertion order; newest last
    generations: Vec<Generation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let needle = email.to_lowercase();
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email.to_lowercase() == needle)
            .cloned())
    }

    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let lowered = email.to_lowercase();
        if inner.users.values().any(|u| u.email.to_lowercase() == lowered) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            full_name: full_name.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
            updated_at: None,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user_name(
        &self,
        id: Uuid,
        full_name: Option<String>,
    ) -> anyhow::Result<Option<User>> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&id).map(|u| {
            u.full_name = full_name;
            u.updated_at = Some(OffsetDateTime::now_utc());
            u.clone()
        }))
    }

    async fn delete_user(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(&id).is_none() {
            return Ok(false);
        }
        inner.generations.retain(|g| g.user_id != id);
        Ok(true)
    }

    async fn list_generations(
        &self,
        user_id: Uuid,
        filter: GenerationFilter,
    ) -> anyhow::Result<(i64, Vec<Generation>)> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Generation> = inner
            .generations
            .iter()
            .rev()
            .filter(|g| g.user_id == user_id)
            .filter(|g| filter.kind.map_or(true, |k| g.kind == k))
            .collect();
        // stable: equal timestamps keep newest-inserted first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((total, page))
    }

    async fn find_generation(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Generation>> {
        let inner = self.inner.read().await;
        Ok(inner
            .generations
            .iter()
            .find(|g| g.id == id && g.user_id == user_id)
            .cloned())
    }

    async fn create_generation(
        &self,
        user_id: Uuid,
        new: NewGeneration,
    ) -> Result<Generation, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::UnknownUser);
        }
        let generation = Generation {
            id: Uuid::new_v4(),
            user_id,
            kind: new.kind,
            status: GenerationStatus::Pending,
            input_images: new.input_images,
            output_images: Vec::new(),
            parameters: new.parameters,
            error_message: None,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        };
        inner.generations.push(generation.clone());
        Ok(generation)
    }

    async fn update_generation(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: GenerationPatch,
    ) -> anyhow::Result<Option<Generation>> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .generations
            .iter_mut()
            .find(|g| g.id == id && g.user_id == user_id)
            .map(|g| {
                patch.apply(g, OffsetDateTime::now_utc());
                g.clone()
            }))
    }

    async fn delete_generation(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.generations.len();
        inner
            .generations
            .retain(|g| !(g.id == id && g.user_id == user_id));
        Ok(inner.generations.len() < before)
    }
}
