//! # murmur-store
//!
//! Durable storage for chat events: messages, shared posts, reply links,
//! reactions and per-user deletion markers.
//!
//! The hub talks to storage through the [`EventStore`] trait. Every mutating
//! operation commits before it returns, so a caller that pushes a notification
//! after a successful call never announces a change that did not persist.
//! [`SqliteStore`] is the bundled implementation.

pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod sqlite;

use async_trait::async_trait;
use chrono::Utc;
use murmur_protocol::{Identity, MediaRef, ReplyPreview};
use std::time::Duration;

pub use error::{Result, StoreError};
pub use models::{
    format_timestamp, ConversationItem, EditOutcome, EntityRef, Message, MessageInfo, MessageView,
    Post, ReactionOutcome, ReplyTarget, SharedPost, SharedPostView, Timestamp, User,
};
pub use sqlite::SqliteStore;

/// The narrow persistence interface the hub depends on.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Look up display data for an identity.
    async fn user(&self, id: Identity) -> Result<Option<User>>;

    /// Look up a shareable post.
    async fn post(&self, id: i64) -> Result<Option<Post>>;

    /// Persist a message, and its reply link when `reply_to` is set, in one
    /// transaction. Returns the rendered row.
    async fn insert_message(
        &self,
        sender: Identity,
        receiver: Identity,
        content: Option<String>,
        media: Option<MediaRef>,
        reply_to: ReplyTarget,
    ) -> Result<MessageView>;

    /// Link an existing message to the entry it replies to.
    async fn insert_reply_link(&self, reply_id: i64, target: ReplyTarget) -> Result<()>;

    /// Persist a share of `post_id` from `sender` to `receiver`.
    async fn insert_shared_post(
        &self,
        sender: Identity,
        receiver: Identity,
        post_id: i64,
        caption: Option<String>,
    ) -> Result<SharedPostView>;

    async fn message(&self, id: i64) -> Result<Option<Message>>;

    async fn shared_post(&self, id: i64) -> Result<Option<SharedPostView>>;

    /// Preview of what a reply points at, for rendering.
    async fn reply_preview(&self, target: ReplyTarget) -> Result<Option<ReplyPreview>>;

    /// Whether `user` has hidden `target` from their own view.
    async fn is_hidden_for(&self, user: Identity, target: EntityRef) -> Result<bool>;

    /// Mark one message or share read at `at`. False if it already was.
    async fn mark_read(&self, target: EntityRef, at: Timestamp) -> Result<bool>;

    /// Batch-mark every live, unread message to `receiver` created up to
    /// `before` as read, returning them oldest first.
    async fn mark_messages_read(&self, receiver: Identity, before: Timestamp)
        -> Result<Vec<Message>>;

    /// Batch-mark every live, unread share to `receiver` as read, oldest first.
    async fn mark_shares_read(&self, receiver: Identity) -> Result<Vec<SharedPost>>;

    /// Mark everything `sender` sent to `reader` as read. Returns rows changed.
    async fn mark_conversation_read(
        &self,
        reader: Identity,
        sender: Identity,
        at: Timestamp,
    ) -> Result<usize>;

    /// Soft-delete for both parties. False if `requester` is not the sender
    /// or it was already deleted.
    async fn set_deleted_for_everyone(&self, target: EntityRef, requester: Identity)
        -> Result<bool>;

    /// Toggle or replace `reactor`'s reaction on `target`.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing or deleted target, `NotParticipant` when the
    /// reactor is outside the conversation.
    async fn upsert_or_toggle_reaction(
        &self,
        target: EntityRef,
        reactor: Identity,
        emoji: String,
    ) -> Result<ReactionOutcome>;

    /// Hide `target` from `user` only. Idempotent; returns whether a new
    /// marker was written.
    async fn add_deletion_marker(&self, user: Identity, target: EntityRef) -> Result<bool>;

    /// Replace the text of a message authored by `requester`.
    async fn edit_message(
        &self,
        message_id: i64,
        requester: Identity,
        new_content: String,
        max_edit_window: Duration,
    ) -> Result<EditOutcome>;

    /// Mark and return everything addressed to `identity` that was never
    /// delivered, merged oldest first.
    async fn fetch_undelivered_backlog(&self, identity: Identity) -> Result<Vec<ConversationItem>>;

    /// Whether `requester` may edit `message_id` at `now`.
    async fn can_edit_at(
        &self,
        message_id: i64,
        requester: Identity,
        max_edit_window: Duration,
        now: Timestamp,
    ) -> Result<bool>;

    /// Whether `requester` may edit `message_id` right now.
    async fn can_edit(
        &self,
        message_id: i64,
        requester: Identity,
        max_edit_window: Duration,
    ) -> Result<bool> {
        self.can_edit_at(message_id, requester, max_edit_window, Utc::now())
            .await
    }

    /// The conversation as `user` sees it, oldest first.
    async fn chat_history(&self, user: Identity, friend: Identity) -> Result<Vec<ConversationItem>>;

    /// Hide every message of the conversation from `user`. Returns markers written.
    async fn clear_chat(&self, user: Identity, friend: Identity) -> Result<usize>;

    async fn message_info(&self, message_id: i64, requester: Identity) -> Result<MessageInfo>;
}
