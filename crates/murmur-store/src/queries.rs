//! SQL for the event store.
//!
//! Every function takes a plain `&Connection` so callers decide the
//! transaction boundary; a `&Transaction` coerces to it.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::time::Duration;

use murmur_protocol::{Identity, MediaRef, ReplyPreview};

use crate::error::{Result, StoreError};
use crate::models::{
    format_timestamp, parse_timestamp, preview_text, ConversationItem, EditOutcome, EntityRef,
    Message, MessageInfo, MessageView, Post, ReactionOutcome, ReplyTarget, SharedPostView,
    SharedPost, Timestamp, User, POST_CONTENT_PREVIEW_CHARS,
};

const MESSAGE_SELECT: &str = "
    SELECT m.id, m.sender_id, m.receiver_id, m.content, m.media_url, m.media_type,
           m.created_at, m.is_read, m.read_at, m.is_edited, m.edited_at,
           m.is_deleted_for_everyone, m.reaction_count,
           rl.original_message_id, rl.shared_post_id, u.nickname
    FROM messages m
    LEFT JOIN reply_links rl ON rl.reply_id = m.id
    LEFT JOIN users u ON u.id = m.sender_id";

const SHARE_SELECT: &str = "
    SELECT s.id, s.post_id, s.sender_id, s.receiver_id, s.caption, s.created_at,
           s.is_read, s.read_at, s.is_deleted_for_everyone, s.reaction_count,
           p.title, p.media_url, p.media_type, owner.nickname, sender.nickname
    FROM shared_posts s
    JOIN posts p ON p.id = s.post_id
    LEFT JOIN users owner ON owner.id = p.owner_id
    LEFT JOIN users sender ON sender.id = s.sender_id";

/// Table names for one kind of target entity.
struct Tables {
    entity: &'static str,
    reactions: &'static str,
    reaction_key: &'static str,
    markers: &'static str,
    marker_key: &'static str,
}

fn tables(target: EntityRef) -> Tables {
    match target {
        EntityRef::Message(_) => Tables {
            entity: "messages",
            reactions: "message_reactions",
            reaction_key: "message_id",
            markers: "deleted_messages",
            marker_key: "message_id",
        },
        EntityRef::SharedPost(_) => Tables {
            entity: "shared_posts",
            reactions: "shared_post_reactions",
            reaction_key: "shared_post_id",
            markers: "deleted_shared_posts",
            marker_key: "shared_post_id",
        },
    }
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| {
        parse_timestamp(&text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn message_view_from_row(row: &Row<'_>) -> rusqlite::Result<MessageView> {
    let media_url: Option<String> = row.get(4)?;
    let media_type: Option<String> = row.get(5)?;
    let message = Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        media: media_url.map(|url| MediaRef { url, media_type }),
        created_at: time_column(row, 6)?,
        is_read: row.get(7)?,
        read_at: optional_time_column(row, 8)?,
        is_edited: row.get(9)?,
        edited_at: optional_time_column(row, 10)?,
        is_deleted_for_everyone: row.get(11)?,
        reaction_count: row.get(12)?,
        reply_to: ReplyTarget::from_columns(row.get(13)?, row.get(14)?),
    };
    Ok(MessageView {
        message,
        sender_nickname: row.get(15)?,
        reply_preview: None,
    })
}

fn share_view_from_row(row: &Row<'_>) -> rusqlite::Result<SharedPostView> {
    let share = SharedPost {
        id: row.get(0)?,
        post_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        caption: row.get(4)?,
        created_at: time_column(row, 5)?,
        is_read: row.get(6)?,
        read_at: optional_time_column(row, 7)?,
        is_deleted_for_everyone: row.get(8)?,
        reaction_count: row.get(9)?,
    };
    Ok(SharedPostView {
        share,
        title: row.get(10)?,
        media_url: row.get(11)?,
        media_type: row.get(12)?,
        owner_nickname: row.get(13)?,
        sender_nickname: row.get(14)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        media_url: row.get(4)?,
        media_type: row.get(5)?,
    })
}

// -- Users and posts --

pub fn upsert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, username, nickname) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET username = excluded.username, nickname = excluded.nickname",
        params![user.id, user.username, user.nickname],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: Identity) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, nickname FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    nickname: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub fn insert_post(
    conn: &Connection,
    owner_id: Identity,
    title: &str,
    content: &str,
    media: Option<&MediaRef>,
    now: Timestamp,
) -> Result<Post> {
    conn.execute(
        "INSERT INTO posts (owner_id, title, content, media_url, media_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            owner_id,
            title,
            content,
            media.map(|m| m.url.as_str()),
            media.and_then(|m| m.media_type.as_deref()),
            format_timestamp(&now),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_post(conn, id)?.ok_or(StoreError::NotFound { entity: "post", id })
}

pub fn get_post(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let post = conn
        .query_row(
            "SELECT id, owner_id, title, content, media_url, media_type FROM posts WHERE id = ?1",
            [id],
            post_from_row,
        )
        .optional()?;
    Ok(post)
}

// -- Messages --

pub fn insert_message(
    conn: &Connection,
    sender: Identity,
    receiver: Identity,
    content: Option<&str>,
    media: Option<&MediaRef>,
    now: Timestamp,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (sender_id, receiver_id, content, media_url, media_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            sender,
            receiver,
            content,
            media.map(|m| m.url.as_str()),
            media.and_then(|m| m.media_type.as_deref()),
            format_timestamp(&now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_reply_link(conn: &Connection, reply_id: i64, target: ReplyTarget) -> Result<()> {
    let (message, shared_post) = match target {
        ReplyTarget::None => return Ok(()),
        ReplyTarget::Message(id) => (Some(id), None),
        ReplyTarget::SharedPost(id) => (None, Some(id)),
    };
    conn.execute(
        "INSERT INTO reply_links (reply_id, original_message_id, shared_post_id)
         VALUES (?1, ?2, ?3)",
        params![reply_id, message, shared_post],
    )?;
    Ok(())
}

pub fn get_message_view(conn: &Connection, id: i64) -> Result<Option<MessageView>> {
    let view = conn
        .query_row(
            &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
            [id],
            message_view_from_row,
        )
        .optional()?;
    match view {
        Some(mut view) => {
            attach_reply_preview(conn, &mut view)?;
            Ok(Some(view))
        }
        None => Ok(None),
    }
}

pub fn get_message(conn: &Connection, id: i64) -> Result<Option<Message>> {
    let view = conn
        .query_row(
            &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
            [id],
            message_view_from_row,
        )
        .optional()?;
    Ok(view.map(|view| view.message))
}

pub fn get_shared_post_view(conn: &Connection, id: i64) -> Result<Option<SharedPostView>> {
    let view = conn
        .query_row(
            &format!("{SHARE_SELECT} WHERE s.id = ?1"),
            [id],
            share_view_from_row,
        )
        .optional()?;
    Ok(view)
}

pub fn insert_shared_post(
    conn: &Connection,
    sender: Identity,
    receiver: Identity,
    post_id: i64,
    caption: Option<&str>,
    now: Timestamp,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO shared_posts (post_id, sender_id, receiver_id, caption, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![post_id, sender, receiver, caption, format_timestamp(&now)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Preview of a reply target. A target deleted for everyone keeps its
/// identity but loses its content.
pub fn reply_preview(conn: &Connection, target: ReplyTarget) -> Result<Option<ReplyPreview>> {
    let preview = match target {
        ReplyTarget::None => None,
        ReplyTarget::Message(id) => conn
            .query_row(
                "SELECT m.id, m.content, m.is_deleted_for_everyone,
                        COALESCE(u.username, 'user ' || m.sender_id)
                 FROM messages m LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.id = ?1",
                [id],
                |row| {
                    let deleted: bool = row.get(2)?;
                    let content: Option<String> = row.get(1)?;
                    Ok(ReplyPreview::Message {
                        msg_id: row.get(0)?,
                        content: if deleted { None } else { content },
                        sender_name: row.get(3)?,
                    })
                },
            )
            .optional()?,
        ReplyTarget::SharedPost(id) => conn
            .query_row(
                "SELECT s.id, p.id, p.content,
                        COALESCE(u.username, 'user ' || p.owner_id), p.media_url
                 FROM shared_posts s
                 JOIN posts p ON p.id = s.post_id
                 LEFT JOIN users u ON u.id = p.owner_id
                 WHERE s.id = ?1",
                [id],
                |row| {
                    let content: String = row.get(2)?;
                    Ok(ReplyPreview::SharedPost {
                        shared_post_id: row.get(0)?,
                        post_id: row.get(1)?,
                        post_content: preview_text(&content, POST_CONTENT_PREVIEW_CHARS),
                        post_owner: row.get(3)?,
                        media_url: row.get(4)?,
                    })
                },
            )
            .optional()?,
    };
    Ok(preview)
}

fn attach_reply_preview(conn: &Connection, view: &mut MessageView) -> Result<()> {
    view.reply_preview = reply_preview(conn, view.message.reply_to)?;
    Ok(())
}

fn collect_message_views(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<MessageView>> {
    let mut stmt = conn.prepare(sql)?;
    let mut views = stmt
        .query_map(params, message_view_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for view in &mut views {
        attach_reply_preview(conn, view)?;
    }
    Ok(views)
}

fn collect_share_views(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<SharedPostView>> {
    let mut stmt = conn.prepare(sql)?;
    let views = stmt
        .query_map(params, share_view_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(views)
}

// -- Participation and visibility --

/// Sender and receiver of a live entity.
#[derive(Debug, Clone, Copy)]
pub struct Participants {
    pub sender_id: Identity,
    pub receiver_id: Identity,
}

impl Participants {
    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.sender_id == identity || self.receiver_id == identity
    }
}

/// Participants of `target`, rejecting missing or deleted-for-everyone rows
/// and callers outside the conversation.
pub fn require_participant(
    conn: &Connection,
    target: EntityRef,
    identity: Identity,
) -> Result<Participants> {
    let t = tables(target);
    let row: Option<(Identity, Identity, bool)> = conn
        .query_row(
            &format!(
                "SELECT sender_id, receiver_id, is_deleted_for_everyone FROM {} WHERE id = ?1",
                t.entity
            ),
            [target.id()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let not_found = StoreError::NotFound {
        entity: target.kind(),
        id: target.id(),
    };
    let (sender_id, receiver_id, deleted) = row.ok_or(not_found)?;
    if deleted {
        return Err(StoreError::NotFound {
            entity: target.kind(),
            id: target.id(),
        });
    }

    let participants = Participants {
        sender_id,
        receiver_id,
    };
    if !participants.contains(identity) {
        return Err(StoreError::NotParticipant {
            identity,
            entity: target.kind(),
            id: target.id(),
        });
    }
    Ok(participants)
}

pub fn is_hidden_for(conn: &Connection, user: Identity, target: EntityRef) -> Result<bool> {
    let t = tables(target);
    let hidden = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE user_id = ?1 AND {} = ?2",
                t.markers, t.marker_key
            ),
            params![user, target.id()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(hidden)
}

/// Hide `target` from `user` only. Returns false if it was already hidden.
pub fn add_deletion_marker(
    conn: &Connection,
    user: Identity,
    target: EntityRef,
    now: Timestamp,
) -> Result<bool> {
    let t = tables(target);
    let exists: Option<(Identity, Identity)> = conn
        .query_row(
            &format!("SELECT sender_id, receiver_id FROM {} WHERE id = ?1", t.entity),
            [target.id()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (sender_id, receiver_id) = exists.ok_or(StoreError::NotFound {
        entity: target.kind(),
        id: target.id(),
    })?;
    if user != sender_id && user != receiver_id {
        return Err(StoreError::NotParticipant {
            identity: user,
            entity: target.kind(),
            id: target.id(),
        });
    }

    let written = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} (user_id, {}, created_at) VALUES (?1, ?2, ?3)",
            t.markers, t.marker_key
        ),
        params![user, target.id(), format_timestamp(&now)],
    )?;
    Ok(written > 0)
}

/// Soft-delete for both parties. Only the sender may do this, and only once.
pub fn set_deleted_for_everyone(
    conn: &Connection,
    target: EntityRef,
    requester: Identity,
) -> Result<bool> {
    let t = tables(target);
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET is_deleted_for_everyone = 1
             WHERE id = ?1 AND sender_id = ?2 AND is_deleted_for_everyone = 0",
            t.entity
        ),
        params![target.id(), requester],
    )?;
    Ok(changed > 0)
}

// -- Read state --

pub fn mark_read(conn: &Connection, target: EntityRef, at: Timestamp) -> Result<bool> {
    let t = tables(target);
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET is_read = 1, read_at = ?2 WHERE id = ?1 AND is_read = 0",
            t.entity
        ),
        params![target.id(), format_timestamp(&at)],
    )?;
    Ok(changed > 0)
}

/// Undelivered, live messages addressed to `receiver`, oldest first.
pub fn unread_messages(
    conn: &Connection,
    receiver: Identity,
    before: Timestamp,
) -> Result<Vec<MessageView>> {
    collect_message_views(
        conn,
        &format!(
            "{MESSAGE_SELECT}
             WHERE m.receiver_id = ?1 AND m.is_read = 0 AND m.is_deleted_for_everyone = 0
               AND m.created_at <= ?2
             ORDER BY m.created_at, m.id"
        ),
        params![receiver, format_timestamp(&before)],
    )
}

pub fn mark_messages_read(conn: &Connection, receiver: Identity, at: Timestamp) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE messages SET is_read = 1, read_at = ?2
         WHERE receiver_id = ?1 AND is_read = 0 AND is_deleted_for_everyone = 0
           AND created_at <= ?2",
        params![receiver, format_timestamp(&at)],
    )?;
    Ok(changed)
}

/// Undelivered, live shares addressed to `receiver`, oldest first.
pub fn unread_shares(
    conn: &Connection,
    receiver: Identity,
    before: Timestamp,
) -> Result<Vec<SharedPostView>> {
    collect_share_views(
        conn,
        &format!(
            "{SHARE_SELECT}
             WHERE s.receiver_id = ?1 AND s.is_read = 0 AND s.is_deleted_for_everyone = 0
               AND s.created_at <= ?2
             ORDER BY s.created_at, s.id"
        ),
        params![receiver, format_timestamp(&before)],
    )
}

pub fn mark_shares_read(conn: &Connection, receiver: Identity, at: Timestamp) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE shared_posts SET is_read = 1, read_at = ?2
         WHERE receiver_id = ?1 AND is_read = 0 AND is_deleted_for_everyone = 0
           AND created_at <= ?2",
        params![receiver, format_timestamp(&at)],
    )?;
    Ok(changed)
}

/// Mark everything `sender` sent to `reader` as read.
pub fn mark_conversation_read(
    conn: &Connection,
    reader: Identity,
    sender: Identity,
    at: Timestamp,
) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE messages SET is_read = 1, read_at = ?3
         WHERE sender_id = ?2 AND receiver_id = ?1 AND is_read = 0 AND is_deleted_for_everyone = 0",
        params![reader, sender, format_timestamp(&at)],
    )?;
    Ok(changed)
}

/// Merge messages and shares into one timeline. The sort is stable, so a
/// message and a share with the same instant keep messages first.
#[must_use]
pub fn merge_timeline(
    messages: Vec<MessageView>,
    shares: Vec<SharedPostView>,
) -> Vec<ConversationItem> {
    let mut items: Vec<ConversationItem> = messages
        .into_iter()
        .map(ConversationItem::Message)
        .chain(shares.into_iter().map(ConversationItem::SharedPost))
        .collect();
    items.sort_by_key(ConversationItem::sent_at);
    items
}

// -- Reactions --

/// Add, replace or remove `reactor`'s reaction on `target`, keeping the
/// denormalized count in step. Run inside a transaction.
pub fn toggle_reaction(
    conn: &Connection,
    target: EntityRef,
    reactor: Identity,
    emoji: &str,
    now: Timestamp,
) -> Result<ReactionOutcome> {
    let t = tables(target);
    let participants = require_participant(conn, target, reactor)?;

    let existing: Option<String> = conn
        .query_row(
            &format!(
                "SELECT reaction FROM {} WHERE {} = ?1 AND user_id = ?2",
                t.reactions, t.reaction_key
            ),
            params![target.id(), reactor],
            |row| row.get(0),
        )
        .optional()?;

    let (reaction, delta) = match existing {
        None => {
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}, user_id, reaction, created_at) VALUES (?1, ?2, ?3, ?4)",
                    t.reactions, t.reaction_key
                ),
                params![target.id(), reactor, emoji, format_timestamp(&now)],
            )?;
            (Some(emoji.to_string()), 1)
        }
        Some(current) if current == emoji => {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1 AND user_id = ?2",
                    t.reactions, t.reaction_key
                ),
                params![target.id(), reactor],
            )?;
            (None, -1)
        }
        Some(_) => {
            conn.execute(
                &format!(
                    "UPDATE {} SET reaction = ?3, created_at = ?4 WHERE {} = ?1 AND user_id = ?2",
                    t.reactions, t.reaction_key
                ),
                params![target.id(), reactor, emoji, format_timestamp(&now)],
            )?;
            (Some(emoji.to_string()), 0)
        }
    };

    if delta != 0 {
        conn.execute(
            &format!(
                "UPDATE {} SET reaction_count = reaction_count + ?2 WHERE id = ?1",
                t.entity
            ),
            params![target.id(), delta],
        )?;
    }

    let reaction_count: i64 = conn.query_row(
        &format!("SELECT reaction_count FROM {} WHERE id = ?1", t.entity),
        [target.id()],
        |row| row.get(0),
    )?;

    Ok(ReactionOutcome {
        target,
        reaction,
        reaction_count,
        sender_id: participants.sender_id,
        receiver_id: participants.receiver_id,
    })
}

/// Number of reaction rows on `target`.
pub fn reaction_rows(conn: &Connection, target: EntityRef) -> Result<i64> {
    let t = tables(target);
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE {} = ?1", t.reactions, t.reaction_key),
        [target.id()],
        |row| row.get(0),
    )?;
    Ok(count)
}

// -- Editing --

fn within_window(created_at: Timestamp, window: Duration, now: Timestamp) -> bool {
    match (now - created_at).to_std() {
        Ok(age) => age <= window,
        // Created after `now`: clock skew, treat as brand new.
        Err(_) => true,
    }
}

pub fn can_edit_at(
    conn: &Connection,
    message_id: i64,
    requester: Identity,
    window: Duration,
    now: Timestamp,
) -> Result<bool> {
    let row: Option<(Identity, bool, String)> = conn
        .query_row(
            "SELECT sender_id, is_deleted_for_everyone, created_at FROM messages WHERE id = ?1",
            [message_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((sender_id, deleted, created_at)) = row else {
        return Ok(false);
    };
    if deleted || sender_id != requester {
        return Ok(false);
    }
    let created_at = parse_timestamp(&created_at).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e))
    })?;
    Ok(within_window(created_at, window, now))
}

/// Replace a message's text. Run inside a transaction.
pub fn edit_message(
    conn: &Connection,
    message_id: i64,
    requester: Identity,
    new_content: &str,
    window: Duration,
    now: Timestamp,
) -> Result<EditOutcome> {
    let message = get_message(conn, message_id)?
        .filter(|m| !m.is_deleted_for_everyone)
        .ok_or(StoreError::NotFound {
            entity: "message",
            id: message_id,
        })?;

    if message.sender_id != requester {
        return Err(StoreError::NotAuthor {
            identity: requester,
            id: message_id,
        });
    }
    if !within_window(message.created_at, window, now) {
        return Ok(EditOutcome::Expired);
    }
    if message.content.as_deref().map(str::trim) == Some(new_content) {
        return Ok(EditOutcome::Unchanged(message));
    }

    conn.execute(
        "UPDATE messages SET content = ?2, is_edited = 1, edited_at = ?3 WHERE id = ?1",
        params![message_id, new_content, format_timestamp(&now)],
    )?;

    Ok(EditOutcome::Updated(Message {
        content: Some(new_content.to_string()),
        is_edited: true,
        edited_at: Some(now),
        ..message
    }))
}

// -- Conversations --

/// Everything `user` may see of the conversation with `friend`, oldest first.
///
/// The friend's entries appear only once delivered to `user`.
pub fn conversation(
    conn: &Connection,
    user: Identity,
    friend: Identity,
) -> Result<Vec<ConversationItem>> {
    if user == friend {
        return Err(StoreError::SelfConversation);
    }

    let messages = collect_message_views(
        conn,
        &format!(
            "{MESSAGE_SELECT}
             WHERE m.is_deleted_for_everyone = 0
               AND ((m.sender_id = ?1 AND m.receiver_id = ?2)
                 OR (m.sender_id = ?2 AND m.receiver_id = ?1 AND m.is_read = 1))
               AND NOT EXISTS (
                   SELECT 1 FROM deleted_messages d WHERE d.user_id = ?1 AND d.message_id = m.id)
             ORDER BY m.created_at, m.id"
        ),
        params![user, friend],
    )?;

    let shares = collect_share_views(
        conn,
        &format!(
            "{SHARE_SELECT}
             WHERE s.is_deleted_for_everyone = 0
               AND ((s.sender_id = ?1 AND s.receiver_id = ?2)
                 OR (s.sender_id = ?2 AND s.receiver_id = ?1 AND s.is_read = 1))
               AND NOT EXISTS (
                   SELECT 1 FROM deleted_shared_posts d
                   WHERE d.user_id = ?1 AND d.shared_post_id = s.id)
             ORDER BY s.created_at, s.id"
        ),
        params![user, friend],
    )?;

    Ok(merge_timeline(messages, shares))
}

/// Hide every message `user` can currently see in the conversation.
pub fn clear_chat(
    conn: &Connection,
    user: Identity,
    friend: Identity,
    now: Timestamp,
) -> Result<usize> {
    if user == friend {
        return Err(StoreError::SelfConversation);
    }
    let written = conn.execute(
        "INSERT OR IGNORE INTO deleted_messages (user_id, message_id, created_at)
         SELECT ?1, m.id, ?3 FROM messages m
         WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
            OR (m.sender_id = ?2 AND m.receiver_id = ?1 AND m.is_read = 1)",
        params![user, friend, format_timestamp(&now)],
    )?;
    Ok(written)
}

pub fn message_info(
    conn: &Connection,
    message_id: i64,
    requester: Identity,
) -> Result<MessageInfo> {
    let message = get_message(conn, message_id)?
        .filter(|m| !m.is_deleted_for_everyone)
        .ok_or(StoreError::NotFound {
            entity: "message",
            id: message_id,
        })?;
    if !message.is_participant(requester) {
        return Err(StoreError::NotParticipant {
            identity: requester,
            entity: "message",
            id: message_id,
        });
    }
    Ok(MessageInfo {
        message_id,
        delivered_at: message.created_at,
        read_at: message.read_at,
        is_read: message.is_read,
    })
}
