//! Composition root for the chat hub.
//!
//! A [`Hub`] owns the registry and wires the delivery engine, router and
//! backlog loader to one event store. The admission layer authenticates a
//! transport, then calls [`Hub::connect`] and feeds every inbound text frame
//! to [`Hub::handle_text`] in order.

use murmur_protocol::{codec, ClientFrame, Identity};
use murmur_store::{
    ConversationItem, EntityRef, EventStore, MessageInfo, SharedPostView, StoreError,
};
use murmur_transport::Transport;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backlog::{BacklogReport, MissedContentLoader};
use crate::config::HubConfig;
use crate::connection::Connection;
use crate::delivery::{Delivery, DeliveryEngine, LogNotifier, OfflineNotifier};
use crate::error::{HubError, Result};
use crate::registry::Registry;
use crate::router::EventRouter;

/// The realtime chat hub.
pub struct Hub {
    registry: Arc<Registry>,
    store: Arc<dyn EventStore>,
    delivery: DeliveryEngine,
    router: EventRouter,
    loader: MissedContentLoader,
    config: HubConfig,
}

impl Hub {
    /// Create a hub whose offline targets are only logged.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, config: HubConfig) -> Self {
        Self::with_notifier(store, config, Arc::new(LogNotifier))
    }

    /// Create a hub that hands offline targets to `notifier`.
    #[must_use]
    pub fn with_notifier(
        store: Arc<dyn EventStore>,
        config: HubConfig,
        notifier: Arc<dyn OfflineNotifier>,
    ) -> Self {
        let registry = Registry::with_write_timeout(config.heartbeat(), config.write_timeout);
        let delivery = DeliveryEngine::new(Arc::clone(&registry), Arc::clone(&store), notifier);
        let router = EventRouter::new(Arc::clone(&store), delivery.clone(), config.max_edit_window);
        let loader = MissedContentLoader::new(Arc::clone(&store));

        Self {
            registry,
            store,
            delivery,
            router,
            loader,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    #[must_use]
    pub fn is_online(&self, identity: Identity) -> bool {
        self.registry.is_online(identity)
    }

    /// Admit an authenticated transport without loading its backlog.
    pub async fn admit(
        &self,
        identity: Identity,
        transport: Box<dyn Transport>,
    ) -> Arc<Connection> {
        self.registry.admit(identity, transport).await
    }

    /// Admit an authenticated transport and push everything it missed.
    ///
    /// A backlog that cannot be loaded is logged; the connection stays up and
    /// the entries remain unread for the next connect.
    pub async fn connect(
        &self,
        identity: Identity,
        transport: Box<dyn Transport>,
    ) -> Arc<Connection> {
        let conn = self.admit(identity, transport).await;
        if let Err(e) = self.deliver_backlog(&conn).await {
            error!(identity, connection = %conn.id(), "Failed to load missed content: {}", e);
        }
        conn
    }

    /// Push the missed content of `conn`'s identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog cannot be fetched.
    pub async fn deliver_backlog(&self, conn: &Connection) -> Result<BacklogReport> {
        self.loader.deliver_backlog(conn).await
    }

    /// The receive loop of `conn` ended. Returns false if the server had
    /// already removed it (eviction or a newer session).
    pub async fn disconnect(&self, conn: &Arc<Connection>) -> bool {
        let released = self.registry.release(conn).await;
        if released {
            info!(identity = conn.identity(), connection = %conn.id(), "Client disconnected");
        } else {
            debug!(connection = %conn.id(), "Disconnect of a connection already removed");
        }
        released
    }

    /// Decode and handle one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns the protocol or handler error. Either way the frame is
    /// finished with and the connection stays usable.
    pub async fn handle_text(&self, conn: &Connection, text: &str) -> Result<()> {
        let frame = self.decode_frame(conn, text)?;
        self.handle_frame(conn, frame).await
    }

    /// Decode one inbound text frame from `conn`, logging a malformed one.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Protocol`] if the text is not a valid frame.
    pub fn decode_frame(&self, conn: &Connection, text: &str) -> Result<ClientFrame> {
        codec::decode(text).map_err(|e| {
            warn!(
                identity = conn.identity(),
                connection = %conn.id(),
                "Skipping malformed frame: {}", e
            );
            HubError::from(e)
        })
    }

    /// Route one decoded frame.
    ///
    /// # Errors
    ///
    /// Returns the handler error after logging it: refusals at debug, store
    /// failures at error.
    pub async fn handle_frame(&self, conn: &Connection, frame: ClientFrame) -> Result<()> {
        let frame_type = frame.frame_type();
        debug!(identity = conn.identity(), frame_type = frame_type.as_str(), "Handling frame");

        let result = self.router.route(conn, frame).await;
        if let Err(e) = &result {
            if e.is_rejection() {
                debug!(
                    identity = conn.identity(),
                    frame_type = frame_type.as_str(),
                    "Frame dropped: {}", e
                );
            } else {
                error!(
                    identity = conn.identity(),
                    frame_type = frame_type.as_str(),
                    "Frame handling failed: {}", e
                );
            }
        }
        result
    }

    /// Whether `requester` may still edit `message_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn can_edit(&self, message_id: i64, requester: Identity) -> Result<bool> {
        Ok(self
            .store
            .can_edit(message_id, requester, self.config.max_edit_window)
            .await?)
    }

    /// Share `post_id` from `from` to `to` and deliver it like a message.
    ///
    /// Returns the stored share, marked read if it reached the receiver.
    ///
    /// # Errors
    ///
    /// [`HubError::SelfShare`] when `from == to`; `NotFound` for an unknown
    /// post or receiver.
    pub async fn share_post(
        &self,
        from: Identity,
        to: Identity,
        post_id: i64,
        caption: Option<String>,
    ) -> Result<SharedPostView> {
        if from == to {
            return Err(HubError::SelfShare);
        }
        if self.store.post(post_id).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "post",
                id: post_id,
            }
            .into());
        }
        if self.store.user(to).await?.is_none() {
            return Err(StoreError::NotFound {
                entity: "user",
                id: to,
            }
            .into());
        }

        let mut view = self.store.insert_shared_post(from, to, post_id, caption).await?;
        let outcome = self
            .delivery
            .deliver(&mut ConversationItem::SharedPost(view.clone()))
            .await;
        if let Delivery::Delivered(read_at) = outcome {
            view.share.is_read = true;
            view.share.read_at = Some(read_at);
        }
        info!(identity = from, receiver = to, share_id = view.share.id, ?outcome, "Post shared");
        Ok(view)
    }

    /// Hide `target` from `user`'s own view. Returns whether a new marker was
    /// written.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing target, `NotParticipant` when `user` is
    /// neither its sender nor its receiver.
    pub async fn delete_for_me(&self, user: Identity, target: EntityRef) -> Result<bool> {
        let written = self.store.add_deletion_marker(user, target).await?;
        debug!(identity = user, entity = ?target, written, "Deleted for me");
        Ok(written)
    }

    /// Hide the whole conversation with `friend` from `user`.
    ///
    /// # Errors
    ///
    /// Returns an error for a self-conversation or a store failure.
    pub async fn clear_chat(&self, user: Identity, friend: Identity) -> Result<usize> {
        let written = self.store.clear_chat(user, friend).await?;
        info!(identity = user, friend, written, "Chat cleared");
        Ok(written)
    }

    /// The conversation with `friend` as `user` sees it, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error for a self-conversation or a store failure.
    pub async fn chat_history(
        &self,
        user: Identity,
        friend: Identity,
    ) -> Result<Vec<ConversationItem>> {
        Ok(self.store.chat_history(user, friend).await?)
    }

    /// Delivery details of one message, for its participants.
    ///
    /// # Errors
    ///
    /// `NotFound` or `NotParticipant`, or a store failure.
    pub async fn message_info(&self, message_id: i64, requester: Identity) -> Result<MessageInfo> {
        Ok(self.store.message_info(message_id, requester).await?)
    }

    /// Close every live connection.
    pub async fn shutdown(&self) {
        info!(online = self.registry.len(), "Closing all connections");
        self.registry.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_protocol::{CloseCode, ReplyPreview, ServerEvent};
    use murmur_store::{Post, ReplyTarget, SqliteStore, User};
    use murmur_transport::memory::{self, MemoryPeer, Outbound};
    use std::time::Duration;

    const ALICE: Identity = 1;
    const BOB: Identity = 2;
    const CAROL: Identity = 3;

    struct Fixture {
        hub: Hub,
        store: Arc<SqliteStore>,
        post: Post,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
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
        let post = store
            .insert_post(CAROL, "Weekend hike", "Up the ridge and back.", None)
            .await
            .unwrap();

        let config = HubConfig {
            heartbeat_interval: Duration::from_secs(3600),
            pong_timeout: Duration::from_secs(3600),
            ..HubConfig::default()
        };
        let hub = Hub::new(store.clone(), config);
        Fixture { hub, store, post }
    }

    async fn join(hub: &Hub, identity: Identity) -> (Arc<Connection>, MemoryPeer) {
        let (transport, peer) = memory::pair();
        let conn = hub.connect(identity, Box::new(transport)).await;
        (conn, peer)
    }

    fn chat(event: ServerEvent) -> murmur_protocol::ChatMessage {
        match event {
            ServerEvent::Message(msg) => msg,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_to_online_receiver() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (_bob, mut bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"type":"message","to":2,"content":"hi"}"#)
            .await
            .unwrap();

        let pushed = chat(bob_peer.drain_events().remove(0));
        assert_eq!(pushed.content.as_deref(), Some("hi"));
        assert_eq!(pushed.sender_id, ALICE);
        assert_eq!(pushed.sender_nickname.as_deref(), Some("ALICE"));

        let echo = chat(alice_peer.drain_events().remove(0));
        assert_eq!(echo.id, pushed.id);
        assert!(echo.is_read);

        let stored = f.store.message(pushed.id).await.unwrap().unwrap();
        assert!(stored.is_read);
        assert!(stored.read_at.is_some());
    }

    #[tokio::test]
    async fn test_message_to_offline_receiver_waits_in_backlog() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;

        f.hub
            .handle_text(&alice, r#"{"to":"2","content":"later"}"#)
            .await
            .unwrap();

        let echo = chat(alice_peer.drain_events().remove(0));
        assert!(!echo.is_read);
        assert!(!f.store.message(echo.id).await.unwrap().unwrap().is_read);

        let (_bob, mut bob_peer) = join(&f.hub, BOB).await;
        let backlog = bob_peer.drain_events();
        assert_eq!(backlog.len(), 1);
        let missed = chat(backlog[0].clone());
        assert_eq!(missed.id, echo.id);
        assert!(missed.is_read);
        assert!(f.store.message(echo.id).await.unwrap().unwrap().is_read);
    }

    #[tokio::test]
    async fn test_reaction_twice_toggles_and_notifies_both() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"react to me"}"#)
            .await
            .unwrap();
        let id = chat(bob_peer.drain_events().remove(0)).id;
        alice_peer.drain();

        let frame = format!(r#"{{"type":"reaction","message_id":{id},"reaction":"❤️"}}"#);
        f.hub.handle_text(&bob, &frame).await.unwrap();

        for peer in [&mut alice_peer, &mut bob_peer] {
            match peer.drain_events().as_slice() {
                [ServerEvent::ReactionUpdate { data }] => {
                    assert_eq!(data.message_id, id);
                    assert_eq!(data.reaction.as_deref(), Some("❤️"));
                    assert_eq!(data.reaction_count, 1);
                    assert_eq!(data.reacted_by, BOB);
                }
                other => panic!("unexpected events {other:?}"),
            }
        }

        f.hub.handle_text(&bob, &frame).await.unwrap();
        for peer in [&mut alice_peer, &mut bob_peer] {
            match peer.drain_events().as_slice() {
                [ServerEvent::ReactionUpdate { data }] => {
                    assert_eq!(data.reaction, None);
                    assert_eq!(data.reaction_count, 0);
                }
                other => panic!("unexpected events {other:?}"),
            }
        }
        assert_eq!(f.store.message(id).await.unwrap().unwrap().reaction_count, 0);
    }

    #[tokio::test]
    async fn test_outsider_reaction_is_dropped() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (carol, mut carol_peer) = join(&f.hub, CAROL).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"private"}"#)
            .await
            .unwrap();
        let id = chat(alice_peer.drain_events().remove(0)).id;

        let frame = format!(r#"{{"type":"reaction","message_id":{id},"reaction":"👍"}}"#);
        let err = f.hub.handle_text(&carol, &frame).await.unwrap_err();
        assert!(err.is_rejection());
        assert!(carol_peer.drain().is_empty());
        assert!(alice_peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_delete_for_everyone() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"oops"}"#)
            .await
            .unwrap();
        let id = chat(bob_peer.drain_events().remove(0)).id;
        alice_peer.drain();

        // Only the sender may delete for everyone.
        let frame = format!(
            r#"{{"type":"delete_for_everyone","message_id":{id},"receiver_id":1}}"#
        );
        f.hub.handle_text(&bob, &frame).await.unwrap();
        assert!(alice_peer.drain().is_empty());
        assert!(bob_peer.drain().is_empty());
        assert!(!f.store.message(id).await.unwrap().unwrap().is_deleted_for_everyone);

        let frame = format!(
            r#"{{"type":"delete_for_everyone","message_id":{id},"receiver_id":2}}"#
        );
        f.hub.handle_text(&alice, &frame).await.unwrap();
        let expected = ServerEvent::MessageDeleted {
            message_id: id,
            is_deleted_for_everyone: true,
        };
        assert_eq!(alice_peer.drain_events(), vec![expected.clone()]);
        assert_eq!(bob_peer.drain_events(), vec![expected]);

        assert!(f.hub.chat_history(BOB, ALICE).await.unwrap().is_empty());
        assert!(f.hub.chat_history(ALICE, BOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_message() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"helo"}"#)
            .await
            .unwrap();
        let id = chat(bob_peer.drain_events().remove(0)).id;
        alice_peer.drain();

        // Same text: nothing changes, both still hear about it.
        let same = format!(
            r#"{{"type":"edit_message","msg_id":{id},"new_content":"helo","receiver_id":2}}"#
        );
        f.hub.handle_text(&alice, &same).await.unwrap();
        let unchanged = ServerEvent::EditedMsg {
            message_id: id,
            new_content: None,
            is_edited: false,
        };
        assert_eq!(bob_peer.drain_events(), vec![unchanged.clone()]);
        assert_eq!(alice_peer.drain_events(), vec![unchanged]);

        let fixed = format!(
            r#"{{"type":"edit_message","msg_id":{id},"new_content":"hello","receiver_id":2}}"#
        );
        f.hub.handle_text(&alice, &fixed).await.unwrap();
        let edited = ServerEvent::EditedMsg {
            message_id: id,
            new_content: Some("hello".into()),
            is_edited: true,
        };
        assert_eq!(bob_peer.drain_events(), vec![edited.clone()]);
        assert_eq!(alice_peer.drain_events(), vec![edited]);

        // The receiver is not the author.
        let hijack = format!(
            r#"{{"type":"edit_message","msg_id":{id},"new_content":"mine","receiver_id":1}}"#
        );
        assert!(f.hub.handle_text(&bob, &hijack).await.unwrap_err().is_rejection());
        assert!(bob_peer.drain().is_empty());

        assert!(f.hub.can_edit(id, ALICE).await.unwrap());
        assert!(!f.hub.can_edit(id, BOB).await.unwrap());
    }

    #[tokio::test]
    async fn test_reply_to_deleted_original_creates_nothing() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"original"}"#)
            .await
            .unwrap();
        let id = chat(bob_peer.drain_events().remove(0)).id;
        let frame = format!(
            r#"{{"type":"delete_for_everyone","message_id":{id},"receiver_id":2}}"#
        );
        f.hub.handle_text(&alice, &frame).await.unwrap();
        alice_peer.drain();
        bob_peer.drain();

        let reply = format!(
            r#"{{"type":"reply_message","to":1,"reply_msg_id":{id},"content":"re"}}"#
        );
        assert!(f.hub.handle_text(&bob, &reply).await.unwrap_err().is_rejection());

        assert!(alice_peer.drain().is_empty());
        assert!(bob_peer.drain().is_empty());
        assert!(f.store.message(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_to_original_hidden_for_me_creates_nothing() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"original"}"#)
            .await
            .unwrap();
        let id = chat(bob_peer.drain_events().remove(0)).id;
        alice_peer.drain();
        assert!(f.hub.delete_for_me(BOB, EntityRef::Message(id)).await.unwrap());
        let before = f.hub.chat_history(ALICE, BOB).await.unwrap().len();

        let reply = format!(
            r#"{{"type":"reply_message","to":1,"reply_msg_id":{id},"content":"re"}}"#
        );
        let err = f.hub.handle_text(&bob, &reply).await.unwrap_err();
        assert!(err.is_rejection());

        assert!(alice_peer.drain().is_empty());
        assert!(bob_peer.drain().is_empty());
        assert_eq!(f.hub.chat_history(ALICE, BOB).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_reply_to_hidden_or_deleted_share_creates_nothing() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        let hidden = f.hub.share_post(ALICE, BOB, f.post.id, None).await.unwrap();
        let deleted = f.hub.share_post(ALICE, BOB, f.post.id, None).await.unwrap();
        assert!(f
            .hub
            .delete_for_me(BOB, EntityRef::SharedPost(hidden.share.id))
            .await
            .unwrap());
        let frame = format!(
            r#"{{"type":"delete_share_for_everyone","message_id":{},"receiver_id":2}}"#,
            deleted.share.id
        );
        f.hub.handle_text(&alice, &frame).await.unwrap();
        alice_peer.drain();
        bob_peer.drain();
        let before = f.hub.chat_history(ALICE, BOB).await.unwrap().len();

        for share_id in [hidden.share.id, deleted.share.id] {
            let reply = format!(
                r#"{{"type":"reply_to_share","to":1,"shared_post_id":{share_id},"content":"nice"}}"#
            );
            let err = f.hub.handle_text(&bob, &reply).await.unwrap_err();
            assert!(err.is_rejection());
        }

        assert!(alice_peer.drain().is_empty());
        assert!(bob_peer.drain().is_empty());
        assert_eq!(f.hub.chat_history(ALICE, BOB).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_reply_carries_preview() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"lunch?"}"#)
            .await
            .unwrap();
        let id = chat(bob_peer.drain_events().remove(0)).id;
        alice_peer.drain();

        let reply = format!(
            r#"{{"type":"reply_message","to":1,"reply_msg_id":{id},"content":"sure"}}"#
        );
        f.hub.handle_text(&bob, &reply).await.unwrap();

        let pushed = chat(alice_peer.drain_events().remove(0));
        assert!(pushed.is_reply);
        assert!(!pushed.is_reply_to_share);
        assert_eq!(
            pushed.reply_to,
            Some(ReplyPreview::Message {
                msg_id: id,
                content: Some("lunch?".into()),
                sender_name: "alice".into(),
            })
        );
        assert_eq!(bob_peer.drain_events().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_to_share() {
        let f = fixture().await;
        let (_alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (bob, mut bob_peer) = join(&f.hub, BOB).await;

        let share = f
            .hub
            .share_post(ALICE, BOB, f.post.id, None)
            .await
            .unwrap();
        assert!(share.share.is_read);
        bob_peer.drain();

        let reply = format!(
            r#"{{"type":"reply_to_share","to":1,"shared_post_id":{},"content":"nice"}}"#,
            share.share.id
        );
        f.hub.handle_text(&bob, &reply).await.unwrap();

        let pushed = chat(alice_peer.drain_events().remove(0));
        assert!(pushed.is_reply);
        assert!(pushed.is_reply_to_share);
        match pushed.reply_to {
            Some(ReplyPreview::SharedPost {
                shared_post_id,
                post_id,
                post_content,
                post_owner,
                ..
            }) => {
                assert_eq!(shared_post_id, share.share.id);
                assert_eq!(post_id, f.post.id);
                assert_eq!(post_content, "Up the ridge and back.");
                assert_eq!(post_owner, "carol");
            }
            other => panic!("unexpected preview {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typing_reaches_online_receiver_only() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;

        f.hub
            .handle_text(&alice, r#"{"type":"typing","receiver_id":2,"is_typing":true}"#)
            .await
            .unwrap();
        assert!(alice_peer.drain().is_empty());

        let (_bob, mut bob_peer) = join(&f.hub, BOB).await;
        assert!(bob_peer.drain().is_empty());

        f.hub
            .handle_text(&alice, r#"{"type":"typing","receiver_id":2,"is_typing":false}"#)
            .await
            .unwrap();
        assert_eq!(
            bob_peer.drain_events(),
            vec![ServerEvent::Typing {
                sender_id: ALICE,
                typing_status: false
            }]
        );
    }

    #[tokio::test]
    async fn test_read_receipt_pushed_once() {
        let f = fixture().await;
        let (_alice, mut alice_peer) = join(&f.hub, ALICE).await;

        for text in ["one", "two"] {
            f.store
                .insert_message(ALICE, BOB, Some(text.into()), None, ReplyTarget::None)
                .await
                .unwrap();
        }
        // Admitted without a backlog load, so the messages are still unread.
        let (transport, _bob_peer) = memory::pair();
        let bob = f.hub.admit(BOB, Box::new(transport)).await;

        f.hub
            .handle_text(&bob, r#"{"type":"read_receipt","sender_id":1}"#)
            .await
            .unwrap();
        match alice_peer.drain_events().as_slice() {
            [ServerEvent::ReadReceipt {
                reader_id,
                conversation_with,
                ..
            }] => {
                assert_eq!(*reader_id, BOB);
                assert_eq!(*conversation_with, BOB);
            }
            other => panic!("unexpected events {other:?}"),
        }

        f.hub
            .handle_text(&bob, r#"{"type":"read_receipt","sender_id":1}"#)
            .await
            .unwrap();
        assert!(alice_peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_evicts_receiver_only() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (_bob, mut bob_peer) = join(&f.hub, BOB).await;
        bob_peer.break_link();

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"anyone there?"}"#)
            .await
            .unwrap();

        assert!(!f.hub.is_online(BOB));
        assert!(f.hub.is_online(ALICE));
        assert_eq!(bob_peer.drain(), vec![Outbound::Close(CloseCode::Evicted)]);

        let echo = chat(alice_peer.drain_events().remove(0));
        assert!(!echo.is_read);
        assert!(!f.store.message(echo.id).await.unwrap().unwrap().is_read);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;

        let err = f.hub.handle_text(&alice, "{not json").await.unwrap_err();
        assert!(matches!(err, HubError::Protocol(_)));
        let err = f.hub.handle_text(&alice, r#"{"type":"teleport"}"#).await.unwrap_err();
        assert!(matches!(err, HubError::Protocol(_)));

        let frame = f.hub.decode_frame(&alice, r#"{"type":"pong"}"#).unwrap();
        assert_eq!(frame.frame_type().as_str(), "pong");
        assert!(matches!(
            f.hub.decode_frame(&alice, "[]"),
            Err(HubError::Protocol(_))
        ));

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"still here"}"#)
            .await
            .unwrap();
        assert!(f.hub.is_online(ALICE));
        assert_eq!(alice_peer.drain_events().len(), 1);
    }

    #[tokio::test]
    async fn test_pong_is_accepted() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;

        f.hub.handle_text(&alice, r#"{"type":"pong"}"#).await.unwrap();
        assert!(alice.last_pong().is_some());
        assert!(alice_peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_share_post_online_and_offline() {
        let f = fixture().await;
        let (_bob, mut bob_peer) = join(&f.hub, BOB).await;

        let delivered = f
            .hub
            .share_post(ALICE, BOB, f.post.id, Some("look".into()))
            .await
            .unwrap();
        assert!(delivered.share.is_read);
        match bob_peer.drain_events().as_slice() {
            [ServerEvent::SharedPost(preview)] => {
                assert_eq!(preview.shared_id, delivered.share.id);
                assert_eq!(preview.title, "Weekend hike");
                assert_eq!(preview.caption_message.as_deref(), Some("look"));
                assert_eq!(preview.sender_nickname, "ALICE");
                assert!(preview.is_read);
            }
            other => panic!("unexpected events {other:?}"),
        }

        let pending = f
            .hub
            .share_post(BOB, ALICE, f.post.id, None)
            .await
            .unwrap();
        assert!(!pending.share.is_read);
        assert_eq!(
            pending.to_preview().caption_message.as_deref(),
            Some("BOB shared a post with you!")
        );
    }

    #[tokio::test]
    async fn test_share_post_rejections() {
        let f = fixture().await;

        assert!(matches!(
            f.hub.share_post(ALICE, ALICE, f.post.id, None).await,
            Err(HubError::SelfShare)
        ));
        assert!(matches!(
            f.hub.share_post(ALICE, BOB, 999, None).await,
            Err(HubError::Store(StoreError::NotFound { entity: "post", .. }))
        ));
        assert!(matches!(
            f.hub.share_post(ALICE, 404, f.post.id, None).await,
            Err(HubError::Store(StoreError::NotFound { entity: "user", .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_for_me_is_participant_only() {
        let f = fixture().await;
        let message = f
            .store
            .insert_message(ALICE, BOB, Some("hey".into()), None, ReplyTarget::None)
            .await
            .unwrap()
            .message;
        let target = EntityRef::Message(message.id);

        assert!(f.hub.delete_for_me(ALICE, target).await.unwrap());
        assert!(!f.hub.delete_for_me(ALICE, target).await.unwrap());
        assert!(matches!(
            f.hub.delete_for_me(CAROL, target).await,
            Err(HubError::Store(StoreError::NotParticipant { .. }))
        ));
        assert!(matches!(
            f.hub.delete_for_me(ALICE, EntityRef::Message(999)).await,
            Err(HubError::Store(StoreError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_displaces_previous_session() {
        let f = fixture().await;
        let (first, mut first_peer) = join(&f.hub, ALICE).await;
        let (second, mut second_peer) = join(&f.hub, ALICE).await;

        assert_eq!(first_peer.drain(), vec![Outbound::Close(CloseCode::Evicted)]);

        // The stale receive loop ending must not drop the new session.
        assert!(!f.hub.disconnect(&first).await);
        assert!(f.hub.is_online(ALICE));

        f.hub.registry().send_direct(ALICE, &ServerEvent::Ping).await;
        assert_eq!(second_peer.drain_events(), vec![ServerEvent::Ping]);

        assert!(f.hub.disconnect(&second).await);
        assert!(!f.hub.is_online(ALICE));
    }

    #[tokio::test]
    async fn test_message_info_and_clear_chat() {
        let f = fixture().await;
        let (alice, mut alice_peer) = join(&f.hub, ALICE).await;
        let (_bob, _bob_peer) = join(&f.hub, BOB).await;

        f.hub
            .handle_text(&alice, r#"{"to":2,"content":"seen"}"#)
            .await
            .unwrap();
        let id = chat(alice_peer.drain_events().remove(0)).id;

        let info = f.hub.message_info(id, BOB).await.unwrap();
        assert!(info.is_read);
        assert!(info.read_at.is_some());
        assert!(f.hub.message_info(id, CAROL).await.is_err());

        assert_eq!(f.hub.chat_history(BOB, ALICE).await.unwrap().len(), 1);
        assert_eq!(f.hub.clear_chat(BOB, ALICE).await.unwrap(), 1);
        assert!(f.hub.chat_history(BOB, ALICE).await.unwrap().is_empty());
        assert_eq!(f.hub.chat_history(ALICE, BOB).await.unwrap().len(), 1);
    }
}
