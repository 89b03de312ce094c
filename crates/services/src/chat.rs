//! # Chat store
//!
//! Direct conversations and their messages. The chat list and the open
//! conversation are two independent subscriptions.

use std::sync::Arc;

use domains::document::{collections, Direction, DocumentData, Query, Update, WriteBatch};
use domains::errors::{require_text, ValidationError, WriteError};
use domains::models::{pair_key, Chat, ChatMessage};

use crate::backend::Backend;
use crate::error::{Result, StoreError};
use crate::live::{self, SubscriptionSlot};
use crate::observable::Observable;
use crate::optimistic::{self, Compensation};
use crate::session::SessionStore;

/// Longest text kept as a chat's `lastMessage` preview.
const PREVIEW_CHARS: usize = 80;

/// Same two participants always map to the same chat id.
pub fn direct_chat_id(a: &str, b: &str) -> String {
    pair_key(a, b)
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

#[derive(Clone)]
pub struct ChatStore {
    backend: Backend,
    session: SessionStore,
    chats: Observable<Vec<Chat>>,
    messages: Observable<Vec<ChatMessage>>,
    open_chat: Observable<Option<String>>,
    chats_subscription: Arc<SubscriptionSlot>,
    messages_subscription: Arc<SubscriptionSlot>,
}

impl ChatStore {
    pub fn new(backend: Backend, session: SessionStore) -> Self {
        Self {
            backend,
            session,
            chats: Observable::default(),
            messages: Observable::default(),
            open_chat: Observable::default(),
            chats_subscription: Arc::new(SubscriptionSlot::new()),
            messages_subscription: Arc::new(SubscriptionSlot::new()),
        }
    }

    pub fn chats(&self) -> Observable<Vec<Chat>> {
        self.chats.clone()
    }

    pub fn messages(&self) -> Observable<Vec<ChatMessage>> {
        self.messages.clone()
    }

    /// Id of the conversation whose messages are mirrored.
    pub fn open_chat(&self) -> Option<String> {
        self.open_chat.get()
    }

    /// Mirrors the caller's conversations, most recently active first.
    pub async fn watch_chats(&self) -> Result<()> {
        let uid = self.session.require_identity()?.id;
        self.chats_subscription.clear().await;
        let query = Query::collection(collections::CHATS)
            .where_array_contains("participants", uid.as_str())
            .order_by("updatedAt", Direction::Descending);
        let handle = live::mirror(&self.backend.documents, query, self.chats.clone()).await?;
        self.chats_subscription.set(handle);
        Ok(())
    }

    /// Returns the direct chat with `other`, creating it on first contact.
    pub async fn open_direct_chat(&self, other: &str) -> Result<String> {
        let me = self.session.require_active()?.id;
        let other = require_text("participant", other)?;
        if other == me {
            return Err(ValidationError::new("participant", "cannot start a chat with yourself").into());
        }

        let id = direct_chat_id(&me, &other);
        let chat = Chat {
            participants: vec![me, other],
            ..Chat::default()
        };
        let data = DocumentData::from_record(&chat)?
            .with_server_timestamp("createdAt")
            .with_server_timestamp("updatedAt");
        match self.backend.documents.create(collections::CHATS, &id, data).await {
            Ok(()) => tracing::info!(chat_id = %id, "direct chat created"),
            Err(WriteError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(id)
    }

    /// Mirrors the messages of `chat_id`, oldest first, replacing whichever
    /// conversation was open before.
    pub async fn watch_messages(&self, chat_id: &str) -> Result<()> {
        self.session.require_identity()?;
        self.messages_subscription.clear().await;
        self.messages.replace(Vec::new());
        let query = Query::collection(collections::messages(chat_id)).order_by("createdAt", Direction::Ascending);
        let handle = live::mirror(&self.backend.documents, query, self.messages.clone()).await?;
        self.messages_subscription.set(handle);
        self.open_chat.replace(Some(chat_id.to_string()));
        Ok(())
    }

    pub async fn close_messages(&self) {
        self.messages_subscription.clear().await;
        self.messages.replace(Vec::new());
        self.open_chat.replace(None);
    }

    pub async fn stop(&self) {
        self.close_messages().await;
        self.chats_subscription.clear().await;
        self.chats.replace(Vec::new());
    }

    /// Writes the message and the chat preview together. The message shows
    /// up locally at once when its conversation is open.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<String> {
        let sender = self.session.require_active()?;
        let text = require_text("text", text)?;

        let id = self.backend.documents.new_id();
        let message = ChatMessage {
            id: id.clone(),
            sender_id: sender.id.clone(),
            sender_name: sender.display_name,
            text,
            ..ChatMessage::default()
        };
        let batch = WriteBatch::new()
            .create(
                collections::messages(chat_id),
                id.clone(),
                DocumentData::from_record(&message)?.with_server_timestamp("createdAt"),
            )
            .update(
                collections::CHATS,
                chat_id,
                Update::new()
                    .set("lastMessage", preview(&message.text))
                    .set("lastSenderId", sender.id.as_str())
                    .server_timestamp("updatedAt"),
            );

        let is_open = self.open_chat.read(|open| open.as_deref() == Some(chat_id));
        optimistic::apply(
            &self.messages,
            "send_message",
            move |messages: &mut Vec<ChatMessage>| -> Option<Compensation<Vec<ChatMessage>>> {
                if !is_open {
                    return None;
                }
                let pending = message.id.clone();
                messages.push(message);
                Some(Box::new(move |messages: &mut Vec<ChatMessage>| {
                    messages.retain(|m| m.id != pending);
                }))
            },
            self.backend.documents.commit(batch),
        )
        .await?;
        Ok(id)
    }

    /// Soft-deletes one of the caller's own messages.
    pub async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<()> {
        let uid = self.session.require_active()?.id;
        let collection = collections::messages(chat_id);
        let message: ChatMessage = self
            .backend
            .documents
            .get(&collection, message_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?
            .decode()?;
        if message.sender_id != uid {
            return Err(StoreError::Forbidden("only the sender can delete a message".into()));
        }

        optimistic::apply(
            &self.messages,
            "delete_message",
            optimistic::hide_item(message_id.to_string()),
            self.backend
                .documents
                .update(&collection, message_id, Update::new().set("deleted", true)),
        )
        .await
    }
}
