//! Event router: one handler per inbound frame type.
//!
//! Handlers commit to the store before pushing anything. A handler that
//! returns an error has pushed nothing for that frame.

use chrono::Utc;
use murmur_protocol::frames::{
    DeleteRequest, EditMessage, ReadReceipt, ReplyMessage, ReplyToShare, SendMessage, Typing,
};
use murmur_protocol::{ClientFrame, Identity, ReactionUpdate, ServerEvent};
use murmur_store::{
    format_timestamp, ConversationItem, EditOutcome, EntityRef, EventStore, ReplyTarget,
    StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::connection::Connection;
use crate::delivery::DeliveryEngine;
use crate::error::{HubError, Result};

fn not_found(target: EntityRef) -> HubError {
    StoreError::NotFound {
        entity: target.kind(),
        id: target.id(),
    }
    .into()
}

fn not_participant(identity: Identity, target: EntityRef) -> HubError {
    StoreError::NotParticipant {
        identity,
        entity: target.kind(),
        id: target.id(),
    }
    .into()
}

/// Dispatches decoded frames from one connection.
#[derive(Clone)]
pub struct EventRouter {
    store: Arc<dyn EventStore>,
    delivery: DeliveryEngine,
    max_edit_window: Duration,
}

impl EventRouter {
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        delivery: DeliveryEngine,
        max_edit_window: Duration,
    ) -> Self {
        Self {
            store,
            delivery,
            max_edit_window,
        }
    }

    /// Handle one frame sent by `conn`.
    ///
    /// # Errors
    ///
    /// Returns an error when the frame was dropped: the store refused it
    /// (missing target, not a participant, not the author) or failed.
    pub async fn route(&self, conn: &Connection, frame: ClientFrame) -> Result<()> {
        let me = conn.identity();
        match frame {
            ClientFrame::Message(msg) => self.on_message(me, msg).await,
            ClientFrame::ReplyMessage(reply) => self.on_reply(me, reply).await,
            ClientFrame::ReplyToShare(reply) => self.on_reply_to_share(me, reply).await,
            ClientFrame::DeleteForEveryone(req) => self.on_delete_message(me, req).await,
            ClientFrame::DeleteShareForEveryone(req) => self.on_delete_share(me, req).await,
            ClientFrame::EditMessage(edit) => self.on_edit(me, edit).await,
            ClientFrame::Reaction(reaction) => {
                self.on_reaction(me, EntityRef::Message(reaction.message_id), reaction.reaction)
                    .await
            }
            ClientFrame::SharedPostReaction(reaction) => {
                self.on_reaction(
                    me,
                    EntityRef::SharedPost(reaction.shared_post_id),
                    reaction.reaction,
                )
                .await
            }
            ClientFrame::Typing(typing) => {
                self.on_typing(me, typing).await;
                Ok(())
            }
            ClientFrame::ReadReceipt(receipt) => self.on_read_receipt(me, receipt).await,
            ClientFrame::Pong => {
                conn.signal_pong();
                trace!(connection = %conn.id(), "Pong");
                Ok(())
            }
        }
    }

    /// Deliver a freshly stored entry, then show the sender the result.
    async fn deliver_and_echo(&self, sender: Identity, mut item: ConversationItem) {
        let outcome = self.delivery.deliver(&mut item).await;
        debug!(identity = sender, entity = ?item.entity(), ?outcome, "Entry stored");
        self.delivery.echo(sender, &item.to_event()).await;
    }

    async fn on_message(&self, me: Identity, msg: SendMessage) -> Result<()> {
        let media = msg.media();
        let view = self
            .store
            .insert_message(me, msg.to, msg.content, media, ReplyTarget::None)
            .await?;
        self.deliver_and_echo(me, ConversationItem::Message(view)).await;
        Ok(())
    }

    async fn on_reply(&self, me: Identity, reply: ReplyMessage) -> Result<()> {
        let target = EntityRef::Message(reply.reply_msg_id);
        let original = self
            .store
            .message(reply.reply_msg_id)
            .await?
            .filter(|m| !m.is_deleted_for_everyone)
            .ok_or_else(|| not_found(target))?;
        if !original.is_participant(me) {
            return Err(not_participant(me, target));
        }
        if self.store.is_hidden_for(me, target).await? {
            return Err(not_found(target));
        }

        let media = reply.media();
        let view = self
            .store
            .insert_message(
                me,
                reply.to,
                reply.content,
                media,
                ReplyTarget::Message(reply.reply_msg_id),
            )
            .await?;
        self.deliver_and_echo(me, ConversationItem::Message(view)).await;
        Ok(())
    }

    async fn on_reply_to_share(&self, me: Identity, reply: ReplyToShare) -> Result<()> {
        let target = EntityRef::SharedPost(reply.shared_post_id);
        let share = self
            .store
            .shared_post(reply.shared_post_id)
            .await?
            .filter(|view| !view.share.is_deleted_for_everyone)
            .ok_or_else(|| not_found(target))?;
        if !share.share.is_participant(me) {
            return Err(not_participant(me, target));
        }
        if self.store.is_hidden_for(me, target).await? {
            return Err(not_found(target));
        }

        let media = reply.media();
        let view = self
            .store
            .insert_message(
                me,
                reply.to,
                reply.content,
                media,
                ReplyTarget::SharedPost(reply.shared_post_id),
            )
            .await?;
        self.deliver_and_echo(me, ConversationItem::Message(view)).await;
        Ok(())
    }

    async fn on_delete_message(&self, me: Identity, req: DeleteRequest) -> Result<()> {
        let target = EntityRef::Message(req.message_id);
        let Some(message) = self.store.message(req.message_id).await? else {
            return Err(not_found(target));
        };
        if !self.store.set_deleted_for_everyone(target, me).await? {
            debug!(
                identity = me,
                message_id = req.message_id,
                "Delete ignored: not the sender or already deleted"
            );
            return Ok(());
        }

        let event = ServerEvent::MessageDeleted {
            message_id: req.message_id,
            is_deleted_for_everyone: true,
        };
        self.delivery
            .notify_both(me, message.peer_of(me), &event)
            .await;
        Ok(())
    }

    async fn on_delete_share(&self, me: Identity, req: DeleteRequest) -> Result<()> {
        let target = EntityRef::SharedPost(req.message_id);
        let Some(view) = self.store.shared_post(req.message_id).await? else {
            return Err(not_found(target));
        };
        if !self.store.set_deleted_for_everyone(target, me).await? {
            debug!(
                identity = me,
                share_id = req.message_id,
                "Delete ignored: not the sender or already deleted"
            );
            return Ok(());
        }

        let event = ServerEvent::ShareDeleted {
            share_id: req.message_id,
            is_deleted_for_everyone: true,
        };
        self.delivery
            .notify_both(me, view.share.receiver_id, &event)
            .await;
        Ok(())
    }

    async fn on_edit(&self, me: Identity, edit: EditMessage) -> Result<()> {
        let outcome = self
            .store
            .edit_message(edit.msg_id, me, edit.new_content, self.max_edit_window)
            .await?;

        let (event, receiver) = match outcome {
            EditOutcome::Updated(message) => (
                ServerEvent::EditedMsg {
                    message_id: message.id,
                    new_content: message.content,
                    is_edited: true,
                },
                message.receiver_id,
            ),
            EditOutcome::Unchanged(message) => (
                ServerEvent::EditedMsg {
                    message_id: message.id,
                    new_content: None,
                    is_edited: message.is_edited,
                },
                message.receiver_id,
            ),
            EditOutcome::Expired => {
                debug!(identity = me, message_id = edit.msg_id, "Edit window closed");
                return Ok(());
            }
        };

        self.delivery.notify_both(me, receiver, &event).await;
        Ok(())
    }

    async fn on_reaction(&self, me: Identity, target: EntityRef, emoji: String) -> Result<()> {
        let outcome = self
            .store
            .upsert_or_toggle_reaction(target, me, emoji)
            .await?;

        let peer = if outcome.sender_id == me {
            outcome.receiver_id
        } else {
            outcome.sender_id
        };
        let event = ServerEvent::ReactionUpdate {
            data: ReactionUpdate {
                message_id: target.id(),
                reaction: outcome.reaction,
                reaction_count: outcome.reaction_count,
                reacted_by: me,
            },
        };
        self.delivery.notify_both(me, peer, &event).await;
        Ok(())
    }

    async fn on_typing(&self, me: Identity, typing: Typing) {
        let event = ServerEvent::Typing {
            sender_id: me,
            typing_status: typing.is_typing,
        };
        self.delivery.notify(typing.receiver_id, &event).await;
    }

    async fn on_read_receipt(&self, me: Identity, receipt: ReadReceipt) -> Result<()> {
        let read_at = Utc::now();
        let changed = self
            .store
            .mark_conversation_read(me, receipt.sender_id, read_at)
            .await?;
        if changed == 0 {
            return Ok(());
        }

        debug!(identity = me, sender = receipt.sender_id, changed, "Conversation read");
        let event = ServerEvent::ReadReceipt {
            reader_id: me,
            read_at: format_timestamp(&read_at),
            conversation_with: me,
        };
        self.delivery.notify(receipt.sender_id, &event).await;
        Ok(())
    }
}
