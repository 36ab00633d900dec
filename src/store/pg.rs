use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::{
    generations::model::{
        Completion, Generation, GenerationFilter, GenerationPatch, GenerationRow, NewGeneration,
    },
    users::model::User,
};

const USER_COLUMNS: &str = "id, email, password_hash, full_name, created_at, updated_at";
const GENERATION_COLUMNS: &str = "id, user_id, type, status, input_images, output_images, \
     parameters, error_message, created_at, completed_at";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, StoreError> {
        let res = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, full_name)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .bind(full_name)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateEmail)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn update_user_name(
        &self,
        id: Uuid,
        full_name: Option<String>,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET full_name = $2, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(full_name)
        .fetch_optional(&self.db)
        .await
        .context("update user")?;
        Ok(user)
    }

    async fn delete_user(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_generations(
        &self,
        user_id: Uuid,
        filter: GenerationFilter,
    ) -> anyhow::Result<(i64, Vec<Generation>)> {
        let kind = filter.kind.map(|k| k.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
              FROM generation_history
             WHERE user_id = $1 AND ($2::text IS NULL OR type = $2)
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .fetch_one(&self.db)
        .await
        .context("count generations")?;

        let rows = sqlx::query_as::<_, GenerationRow>(&format!(
            r#"
            SELECT {GENERATION_COLUMNS}
              FROM generation_history
             WHERE user_id = $1 AND ($2::text IS NULL OR type = $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3 OFFSET $4
            "#
        ))
        .bind(user_id)
        .bind(kind)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.db)
        .await
        .context("list generations")?;

        let items = rows
            .into_iter()
            .map(Generation::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((total, items))
    }

    async fn find_generation(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> anyhow::Result<Option<Generation>> {
        let row = sqlx::query_as::<_, GenerationRow>(&format!(
            "SELECT {GENERATION_COLUMNS} FROM generation_history WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await
        .context("find generation")?;
        row.map(Generation::try_from).transpose()
    }

    async fn create_generation(
        &self,
        user_id: Uuid,
        new: NewGeneration,
    ) -> Result<Generation, StoreError> {
        let res = sqlx::query_as::<_, GenerationRow>(&format!(
            r#"
            INSERT INTO generation_history
                   (id, user_id, type, status, input_images, output_images, parameters)
            VALUES ($1, $2, $3, 'pending', $4, '[]'::jsonb, $5)
            RETURNING {GENERATION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(new.kind.as_str())
        .bind(Json(&new.input_images))
        .bind(&new.parameters)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(row) => Ok(Generation::try_from(row)?),
            // user_id no longer references a row in users
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StoreError::UnknownUser)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert generation").into()),
        }
    }

    async fn update_generation(
        &self,
        user_id: Uuid,
        id: Uuid,
        patch: GenerationPatch,
    ) -> anyhow::Result<Option<Generation>> {
        let (completion, stamped_at) = match patch.completion(OffsetDateTime::now_utc()) {
            Completion::Keep => ("keep", None),
            Completion::Stamp(at) => ("stamp", Some(at)),
            Completion::Clear => ("clear", None),
        };

        let row = sqlx::query_as::<_, GenerationRow>(&format!(
            r#"
            UPDATE generation_history
               SET status        = COALESCE($3, status),
                   output_images = COALESCE($4, output_images),
                   error_message = CASE WHEN $5::bool THEN $6 ELSE error_message END,
                   completed_at  = CASE $7::text
                                       WHEN 'stamp' THEN $8
                                       WHEN 'clear' THEN NULL
                                       ELSE completed_at
                                   END
             WHERE id = $1 AND user_id = $2
            RETURNING {GENERATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(user_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.output_images.map(Json))
        .bind(patch.error_message.is_some())
        .bind(patch.error_message.flatten())
        .bind(completion)
        .bind(stamped_at)
        .fetch_optional(&self.db)
        .await
        .context("update generation")?;
        row.map(Generation::try_from).transpose()
    }

    async fn delete_generation(&self, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM generation_history WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await
            .context("delete generation")?;
        Ok(res.rows_affected() > 0)
    }
}
