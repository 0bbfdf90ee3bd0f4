//! SQLite implementation of [`EventStore`].

use async_trait::async_trait;
use chrono::Utc;
use murmur_protocol::{Identity, MediaRef, ReplyPreview};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::models::{
    ConversationItem, EditOutcome, EntityRef, Message, MessageInfo, MessageView, Post,
    ReactionOutcome, ReplyTarget, SharedPost, SharedPostView, Timestamp, User,
};
use crate::{migrations, queries, EventStore};

/// Event store backed by a single SQLite connection.
///
/// Queries run on the blocking pool; the connection mutex serializes them, so
/// every operation observes the writes of the ones before it.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers from other processes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::from_connection(conn)?;

        info!("Event store opened at {}", path.display());
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await?
    }

    /// Insert or update a user's display names.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn upsert_user(&self, user: User) -> Result<()> {
        self.with_conn(move |conn| queries::upsert_user(conn, &user))
            .await
    }

    /// Create a post owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn insert_post(
        &self,
        owner_id: Identity,
        title: impl Into<String>,
        content: impl Into<String>,
        media: Option<MediaRef>,
    ) -> Result<Post> {
        let title = title.into();
        let content = content.into();
        self.with_conn(move |conn| {
            queries::insert_post(conn, owner_id, &title, &content, media.as_ref(), Utc::now())
        })
        .await
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn user(&self, id: Identity) -> Result<Option<User>> {
        self.with_conn(move |conn| queries::get_user(conn, id)).await
    }

    async fn post(&self, id: i64) -> Result<Option<Post>> {
        self.with_conn(move |conn| queries::get_post(conn, id)).await
    }

    async fn insert_message(
        &self,
        sender: Identity,
        receiver: Identity,
        content: Option<String>,
        media: Option<MediaRef>,
        reply_to: ReplyTarget,
    ) -> Result<MessageView> {
        let now = Utc::now();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = queries::insert_message(
                &tx,
                sender,
                receiver,
                content.as_deref(),
                media.as_ref(),
                now,
            )?;
            queries::insert_reply_link(&tx, id, reply_to)?;
            let view = queries::get_message_view(&tx, id)?
                .ok_or(StoreError::NotFound { entity: "message", id })?;
            tx.commit()?;
            Ok(view)
        })
        .await
    }

    async fn insert_reply_link(&self, reply_id: i64, target: ReplyTarget) -> Result<()> {
        self.with_conn(move |conn| queries::insert_reply_link(conn, reply_id, target))
            .await
    }

    async fn insert_shared_post(
        &self,
        sender: Identity,
        receiver: Identity,
        post_id: i64,
        caption: Option<String>,
    ) -> Result<SharedPostView> {
        let now = Utc::now();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let id = queries::insert_shared_post(
                &tx,
                sender,
                receiver,
                post_id,
                caption.as_deref(),
                now,
            )?;
            let view = queries::get_shared_post_view(&tx, id)?.ok_or(StoreError::NotFound {
                entity: "shared post",
                id,
            })?;
            tx.commit()?;
            Ok(view)
        })
        .await
    }

    async fn message(&self, id: i64) -> Result<Option<Message>> {
        self.with_conn(move |conn| queries::get_message(conn, id)).await
    }

    async fn shared_post(&self, id: i64) -> Result<Option<SharedPostView>> {
        self.with_conn(move |conn| queries::get_shared_post_view(conn, id))
            .await
    }

    async fn reply_preview(&self, target: ReplyTarget) -> Result<Option<ReplyPreview>> {
        self.with_conn(move |conn| queries::reply_preview(conn, target))
            .await
    }

    async fn is_hidden_for(&self, user: Identity, target: EntityRef) -> Result<bool> {
        self.with_conn(move |conn| queries::is_hidden_for(conn, user, target))
            .await
    }

    async fn mark_read(&self, target: EntityRef, at: Timestamp) -> Result<bool> {
        self.with_conn(move |conn| queries::mark_read(conn, target, at))
            .await
    }

    async fn mark_messages_read(
        &self,
        receiver: Identity,
        before: Timestamp,
    ) -> Result<Vec<Message>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let views = queries::unread_messages(&tx, receiver, before)?;
            queries::mark_messages_read(&tx, receiver, before)?;
            tx.commit()?;
            Ok(views
                .into_iter()
                .map(|view| Message {
                    is_read: true,
                    read_at: Some(before),
                    ..view.message
                })
                .collect())
        })
        .await
    }

    async fn mark_shares_read(&self, receiver: Identity) -> Result<Vec<SharedPost>> {
        let now = Utc::now();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let views = queries::unread_shares(&tx, receiver, now)?;
            queries::mark_shares_read(&tx, receiver, now)?;
            tx.commit()?;
            Ok(views
                .into_iter()
                .map(|view| SharedPost {
                    is_read: true,
                    read_at: Some(now),
                    ..view.share
                })
                .collect())
        })
        .await
    }

    async fn mark_conversation_read(
        &self,
        reader: Identity,
        sender: Identity,
        at: Timestamp,
    ) -> Result<usize> {
        self.with_conn(move |conn| queries::mark_conversation_read(conn, reader, sender, at))
            .await
    }

    async fn set_deleted_for_everyone(
        &self,
        target: EntityRef,
        requester: Identity,
    ) -> Result<bool> {
        self.with_conn(move |conn| queries::set_deleted_for_everyone(conn, target, requester))
            .await
    }

    async fn upsert_or_toggle_reaction(
        &self,
        target: EntityRef,
        reactor: Identity,
        emoji: String,
    ) -> Result<ReactionOutcome> {
        let now = Utc::now();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let outcome = queries::toggle_reaction(&tx, target, reactor, &emoji, now)?;
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn add_deletion_marker(&self, user: Identity, target: EntityRef) -> Result<bool> {
        let now = Utc::now();
        self.with_conn(move |conn| queries::add_deletion_marker(conn, user, target, now))
            .await
    }

    async fn edit_message(
        &self,
        message_id: i64,
        requester: Identity,
        new_content: String,
        max_edit_window: Duration,
    ) -> Result<EditOutcome> {
        let now = Utc::now();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let outcome = queries::edit_message(
                &tx,
                message_id,
                requester,
                &new_content,
                max_edit_window,
                now,
            )?;
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn fetch_undelivered_backlog(&self, identity: Identity) -> Result<Vec<ConversationItem>> {
        let now = Utc::now();
        let items = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let messages = queries::unread_messages(&tx, identity, now)?;
                queries::mark_messages_read(&tx, identity, now)?;
                let shares = queries::unread_shares(&tx, identity, now)?;
                queries::mark_shares_read(&tx, identity, now)?;
                tx.commit()?;

                let mut items = queries::merge_timeline(messages, shares);
                for item in &mut items {
                    item.mark_read(now);
                }
                Ok(items)
            })
            .await?;

        debug!(identity, count = items.len(), "Fetched undelivered backlog");
        Ok(items)
    }

    async fn can_edit_at(
        &self,
        message_id: i64,
        requester: Identity,
        max_edit_window: Duration,
        now: Timestamp,
    ) -> Result<bool> {
        self.with_conn(move |conn| {
            queries::can_edit_at(conn, message_id, requester, max_edit_window, now)
        })
        .await
    }

    async fn chat_history(
        &self,
        user: Identity,
        friend: Identity,
    ) -> Result<Vec<ConversationItem>> {
        self.with_conn(move |conn| queries::conversation(conn, user, friend))
            .await
    }

    async fn clear_chat(&self, user: Identity, friend: Identity) -> Result<usize> {
        let now = Utc::now();
        self.with_conn(move |conn| queries::clear_chat(conn, user, friend, now))
            .await
    }

    async fn message_info(&self, message_id: i64, requester: Identity) -> Result<MessageInfo> {
        self.with_conn(move |conn| queries::message_info(conn, message_id, requester))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_protocol::ServerEvent;

    const ALICE: Identity = 1;
    const BOB: Identity = 2;
    const CAROL: Identity = 3;
    const WINDOW: Duration = Duration::from_secs(15 * 60);

    async fn seeded() -> (SqliteStore, Post) {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, name) in [(ALICE, "alice"), (BOB, "bob"), (CAROL, "carol")] {
            store
                .upsert_user(User {
                    id,
                    username: name.to_string(),
                    nickname: name.to_uppercase(),
                })
                .await
                .unwrap();
        }
        let body = "x".repeat(150);
        let post = store
            .insert_post(CAROL, "A post about rust", body, None)
            .await
            .unwrap();
        (store, post)
    }

    async fn send(store: &SqliteStore, from: Identity, to: Identity, text: &str) -> Message {
        store
            .insert_message(from, to, Some(text.to_string()), None, ReplyTarget::None)
            .await
            .unwrap()
            .message
    }

    #[tokio::test]
    async fn test_insert_message_starts_unread() {
        let (store, _) = seeded().await;

        let view = store
            .insert_message(ALICE, BOB, Some("hi".into()), None, ReplyTarget::None)
            .await
            .unwrap();

        assert_eq!(view.sender_nickname.as_deref(), Some("ALICE"));
        assert!(!view.message.is_read);
        assert!(view.message.read_at.is_none());
        assert_eq!(view.message.reply_to, ReplyTarget::None);

        let chat = view.to_chat_message();
        assert_eq!(chat.content.as_deref(), Some("hi"));
        assert!(!chat.is_reply);
    }

    #[tokio::test]
    async fn test_reply_links_render_previews() {
        let (store, post) = seeded().await;
        let original = send(&store, BOB, ALICE, "original").await;

        let reply = store
            .insert_message(
                ALICE,
                BOB,
                Some("re".into()),
                None,
                ReplyTarget::Message(original.id),
            )
            .await
            .unwrap();
        assert_eq!(
            reply.reply_preview,
            Some(ReplyPreview::Message {
                msg_id: original.id,
                content: Some("original".into()),
                sender_name: "bob".into(),
            })
        );

        let share = store
            .insert_shared_post(BOB, ALICE, post.id, None)
            .await
            .unwrap();
        let share_reply = store
            .insert_message(
                ALICE,
                BOB,
                None,
                Some(MediaRef {
                    url: "/img/a.png".into(),
                    media_type: Some("image".into()),
                }),
                ReplyTarget::SharedPost(share.share.id),
            )
            .await
            .unwrap();

        let chat = share_reply.to_chat_message();
        assert!(chat.is_reply && chat.is_reply_to_share);
        assert_eq!(chat.media_type.as_deref(), Some("image"));
        match chat.reply_to {
            Some(ReplyPreview::SharedPost {
                post_content,
                post_owner,
                ..
            }) => {
                assert_eq!(post_content.chars().count(), 103);
                assert!(post_content.ends_with("..."));
                assert_eq!(post_owner, "carol");
            }
            other => panic!("unexpected preview {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_standalone_reply_link() {
        let (store, _) = seeded().await;
        let original = send(&store, BOB, ALICE, "original").await;
        let reply = send(&store, ALICE, BOB, "late link").await;

        store
            .insert_reply_link(reply.id, ReplyTarget::Message(original.id))
            .await
            .unwrap();

        let linked = store.message(reply.id).await.unwrap().unwrap();
        assert_eq!(linked.reply_to, ReplyTarget::Message(original.id));

        // A reply links to exactly one target.
        assert!(store
            .insert_reply_link(reply.id, ReplyTarget::Message(original.id))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_backlog_is_ordered_and_marked_read() {
        let (store, post) = seeded().await;
        send(&store, ALICE, BOB, "one").await;
        store
            .insert_shared_post(CAROL, BOB, post.id, Some("look".into()))
            .await
            .unwrap();
        send(&store, CAROL, BOB, "two").await;
        send(&store, ALICE, BOB, "three").await;
        send(&store, BOB, ALICE, "not for bob").await;

        let backlog = store.fetch_undelivered_backlog(BOB).await.unwrap();

        assert_eq!(backlog.len(), 4);
        assert!(backlog.windows(2).all(|w| w[0].sent_at() <= w[1].sent_at()));
        assert!(backlog.iter().all(|item| match item {
            ConversationItem::Message(view) => view.message.is_read,
            ConversationItem::SharedPost(view) => view.share.is_read,
        }));

        for item in &backlog {
            if let ConversationItem::Message(view) = item {
                let stored = store.message(view.message.id).await.unwrap().unwrap();
                assert!(stored.is_read);
                assert!(stored.read_at.is_some());
            }
        }
        assert!(store.fetch_undelivered_backlog(BOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_mark_read() {
        let (store, post) = seeded().await;
        send(&store, ALICE, BOB, "one").await;
        send(&store, CAROL, BOB, "two").await;
        store
            .insert_shared_post(CAROL, BOB, post.id, None)
            .await
            .unwrap();

        let messages = store.mark_messages_read(BOB, Utc::now()).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.is_read));

        let shares = store.mark_shares_read(BOB).await.unwrap();
        assert_eq!(shares.len(), 1);

        assert!(store.mark_messages_read(BOB, Utc::now()).await.unwrap().is_empty());
        assert!(store.mark_shares_read(BOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_for_everyone_is_invisible() {
        let (store, _) = seeded().await;
        let gone = send(&store, ALICE, BOB, "oops").await;
        let kept = send(&store, ALICE, BOB, "fine").await;

        assert!(!store
            .set_deleted_for_everyone(EntityRef::Message(gone.id), BOB)
            .await
            .unwrap());
        assert!(store
            .set_deleted_for_everyone(EntityRef::Message(gone.id), ALICE)
            .await
            .unwrap());
        assert!(!store
            .set_deleted_for_everyone(EntityRef::Message(gone.id), ALICE)
            .await
            .unwrap());

        let backlog = store.fetch_undelivered_backlog(BOB).await.unwrap();
        let ids: Vec<EntityRef> = backlog.iter().map(ConversationItem::entity).collect();
        assert_eq!(ids, vec![EntityRef::Message(kept.id)]);

        for (user, friend) in [(ALICE, BOB), (BOB, ALICE)] {
            let history = store.chat_history(user, friend).await.unwrap();
            assert!(history
                .iter()
                .all(|item| item.entity() != EntityRef::Message(gone.id)));
        }
        assert!(store.message(gone.id).await.unwrap().unwrap().is_deleted_for_everyone);
    }

    #[tokio::test]
    async fn test_reaction_toggle_and_replace() {
        let (store, _) = seeded().await;
        let msg = send(&store, ALICE, BOB, "react to me").await;
        let target = EntityRef::Message(msg.id);

        let first = store
            .upsert_or_toggle_reaction(target, BOB, "❤️".into())
            .await
            .unwrap();
        assert_eq!(first.reaction.as_deref(), Some("❤️"));
        assert_eq!(first.reaction_count, 1);
        assert_eq!((first.sender_id, first.receiver_id), (ALICE, BOB));

        let second = store
            .upsert_or_toggle_reaction(target, BOB, "❤️".into())
            .await
            .unwrap();
        assert_eq!(second.reaction, None);
        assert_eq!(second.reaction_count, 0);

        store
            .upsert_or_toggle_reaction(target, BOB, "❤️".into())
            .await
            .unwrap();
        let replaced = store
            .upsert_or_toggle_reaction(target, BOB, "😂".into())
            .await
            .unwrap();
        assert_eq!(replaced.reaction.as_deref(), Some("😂"));
        assert_eq!(replaced.reaction_count, 1);

        let rows = store
            .with_conn(move |conn| queries::reaction_rows(conn, target))
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_reaction_rejects_outsiders() {
        let (store, post) = seeded().await;
        let msg = send(&store, ALICE, BOB, "private").await;
        let share = store
            .insert_shared_post(ALICE, BOB, post.id, None)
            .await
            .unwrap();

        let err = store
            .upsert_or_toggle_reaction(EntityRef::Message(msg.id), CAROL, "👍".into())
            .await;
        assert!(matches!(err, Err(StoreError::NotParticipant { .. })));

        let missing = store
            .upsert_or_toggle_reaction(EntityRef::Message(999), ALICE, "👍".into())
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));

        let on_share = store
            .upsert_or_toggle_reaction(EntityRef::SharedPost(share.share.id), BOB, "👍".into())
            .await
            .unwrap();
        assert_eq!(on_share.reaction_count, 1);
        assert_eq!(store.message(msg.id).await.unwrap().unwrap().reaction_count, 0);
    }

    #[tokio::test]
    async fn test_edit_window() {
        let (store, _) = seeded().await;
        let msg = send(&store, ALICE, BOB, "draft").await;
        let soon = msg.created_at + chrono::Duration::minutes(5);
        let late = msg.created_at + chrono::Duration::minutes(16);

        assert!(store.can_edit_at(msg.id, ALICE, WINDOW, soon).await.unwrap());
        assert!(!store.can_edit_at(msg.id, ALICE, WINDOW, late).await.unwrap());
        assert!(!store.can_edit_at(msg.id, BOB, WINDOW, soon).await.unwrap());
        assert!(!store.can_edit_at(999, ALICE, WINDOW, soon).await.unwrap());
        assert!(store.can_edit(msg.id, ALICE, WINDOW).await.unwrap());
    }

    #[tokio::test]
    async fn test_edit_outcomes() {
        let (store, _) = seeded().await;
        let msg = send(&store, ALICE, BOB, "helo").await;

        let unchanged = store
            .edit_message(msg.id, ALICE, "helo".into(), WINDOW)
            .await
            .unwrap();
        assert!(matches!(unchanged, EditOutcome::Unchanged(ref m) if !m.is_edited));

        let updated = store
            .edit_message(msg.id, ALICE, "hello".into(), WINDOW)
            .await
            .unwrap();
        match updated {
            EditOutcome::Updated(m) => {
                assert_eq!(m.content.as_deref(), Some("hello"));
                assert!(m.is_edited && m.edited_at.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let again = store
            .edit_message(msg.id, ALICE, "hello".into(), WINDOW)
            .await
            .unwrap();
        assert!(matches!(again, EditOutcome::Unchanged(ref m) if m.is_edited));

        let expired = store
            .edit_message(msg.id, ALICE, "later".into(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(expired, EditOutcome::Expired);

        let stranger = store.edit_message(msg.id, BOB, "hijack".into(), WINDOW).await;
        assert!(matches!(stranger, Err(StoreError::NotAuthor { .. })));
    }

    #[tokio::test]
    async fn test_deletion_markers() {
        let (store, _) = seeded().await;
        let msg = send(&store, ALICE, BOB, "hide me").await;
        let target = EntityRef::Message(msg.id);

        assert!(store.add_deletion_marker(BOB, target).await.unwrap());
        assert!(!store.add_deletion_marker(BOB, target).await.unwrap());
        assert!(store.is_hidden_for(BOB, target).await.unwrap());
        assert!(!store.is_hidden_for(ALICE, target).await.unwrap());

        let outsider = store.add_deletion_marker(CAROL, target).await;
        assert!(matches!(outsider, Err(StoreError::NotParticipant { .. })));
        let missing = store.add_deletion_marker(BOB, EntityRef::Message(999)).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_chat_history_visibility() {
        let (store, post) = seeded().await;
        let mine = send(&store, ALICE, BOB, "from alice").await;
        let undelivered = send(&store, BOB, ALICE, "not yet delivered").await;
        let delivered = send(&store, BOB, ALICE, "delivered").await;
        store
            .mark_read(EntityRef::Message(delivered.id), Utc::now())
            .await
            .unwrap();
        let hidden = send(&store, ALICE, BOB, "hidden").await;
        store
            .mark_read(EntityRef::Message(hidden.id), Utc::now())
            .await
            .unwrap();
        store
            .add_deletion_marker(ALICE, EntityRef::Message(hidden.id))
            .await
            .unwrap();
        let share = store
            .insert_shared_post(ALICE, BOB, post.id, None)
            .await
            .unwrap();

        let history = store.chat_history(ALICE, BOB).await.unwrap();
        let ids: Vec<EntityRef> = history.iter().map(ConversationItem::entity).collect();

        assert!(ids.contains(&EntityRef::Message(mine.id)));
        assert!(ids.contains(&EntityRef::Message(delivered.id)));
        assert!(ids.contains(&EntityRef::SharedPost(share.share.id)));
        assert!(!ids.contains(&EntityRef::Message(undelivered.id)));
        assert!(!ids.contains(&EntityRef::Message(hidden.id)));
        assert!(history.windows(2).all(|w| w[0].sent_at() <= w[1].sent_at()));

        // Bob still sees what Alice hid from herself.
        let bob_view = store.chat_history(BOB, ALICE).await.unwrap();
        assert!(bob_view
            .iter()
            .any(|item| item.entity() == EntityRef::Message(hidden.id)));

        assert!(matches!(
            store.chat_history(ALICE, ALICE).await,
            Err(StoreError::SelfConversation)
        ));
    }

    #[tokio::test]
    async fn test_clear_chat() {
        let (store, _) = seeded().await;
        let first = send(&store, ALICE, BOB, "one").await;
        send(&store, ALICE, BOB, "two").await;
        send(&store, BOB, ALICE, "undelivered").await;
        store
            .mark_conversation_read(BOB, ALICE, Utc::now())
            .await
            .unwrap();
        store
            .add_deletion_marker(ALICE, EntityRef::Message(first.id))
            .await
            .unwrap();

        assert_eq!(store.clear_chat(ALICE, BOB).await.unwrap(), 1);
        assert!(store.chat_history(ALICE, BOB).await.unwrap().is_empty());
        assert_eq!(store.chat_history(BOB, ALICE).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_read_receipt_marks_conversation() {
        let (store, _) = seeded().await;
        send(&store, ALICE, BOB, "one").await;
        send(&store, ALICE, BOB, "two").await;
        send(&store, CAROL, BOB, "other conversation").await;

        assert_eq!(
            store.mark_conversation_read(BOB, ALICE, Utc::now()).await.unwrap(),
            2
        );
        assert_eq!(
            store.mark_conversation_read(BOB, ALICE, Utc::now()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_message_info() {
        let (store, _) = seeded().await;
        let msg = send(&store, ALICE, BOB, "status?").await;

        let info = store.message_info(msg.id, ALICE).await.unwrap();
        assert_eq!(info.delivered_at, msg.created_at);
        assert!(!info.is_read && info.read_at.is_none());

        let at = Utc::now();
        store.mark_read(EntityRef::Message(msg.id), at).await.unwrap();
        let info = store.message_info(msg.id, BOB).await.unwrap();
        assert!(info.is_read);
        assert!(info.read_at.is_some());

        assert!(matches!(
            store.message_info(msg.id, CAROL).await,
            Err(StoreError::NotParticipant { .. })
        ));
    }

    #[tokio::test]
    async fn test_shared_post_preview() {
        let (store, post) = seeded().await;
        let view = store
            .insert_shared_post(ALICE, BOB, post.id, None)
            .await
            .unwrap();

        match ConversationItem::SharedPost(view).to_event() {
            ServerEvent::SharedPost(preview) => {
                assert_eq!(preview.title, "A post about rust");
                assert_eq!(preview.owner_nickname.as_deref(), Some("CAROL"));
                assert_eq!(preview.sender_nickname, "ALICE");
                assert_eq!(
                    preview.caption_message.as_deref(),
                    Some("ALICE shared a post with you!")
                );
                assert!(!preview.is_read);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
