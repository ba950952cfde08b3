//! Typed wrappers over common engine methods.
//!
//! Each helper builds the engine object and returns the pending result
//! without waiting; chats are only found once the engine has stored them.

use serde_json::json;
use tdbridge_core::{ClientError, Command, PendingResult};

use crate::client::Client;

/// Paging window for [`Client::get_chat_history`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    pub from_message_id: i64,
    pub offset: i32,
    pub limit: i32,
    pub only_local: bool,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            from_message_id: 0,
            offset: 0,
            limit: 1_000,
            only_local: false,
        }
    }
}

impl Client {
    pub fn get_me(&self) -> Result<PendingResult, ClientError> {
        self.send(Command::new("getMe"))
    }

    pub fn get_user(&self, user_id: i64) -> Result<PendingResult, ClientError> {
        self.send(Command::new("getUser").param("user_id", user_id))
    }

    /// Local lookup; the chat must already be in the engine database.
    pub fn get_chat(&self, chat_id: i64) -> Result<PendingResult, ClientError> {
        self.send(Command::new("getChat").param("chat_id", chat_id))
    }

    pub fn get_chats(
        &self,
        offset_order: i64,
        offset_chat_id: i64,
        limit: i32,
    ) -> Result<PendingResult, ClientError> {
        self.send(Command::with_params(
            "getChats",
            json!({
                "offset_order": offset_order,
                "offset_chat_id": offset_chat_id,
                "limit": limit,
            }),
        ))
    }

    pub fn get_chat_history(
        &self,
        chat_id: i64,
        window: HistoryWindow,
    ) -> Result<PendingResult, ClientError> {
        self.send(Command::with_params(
            "getChatHistory",
            json!({
                "chat_id": chat_id,
                "limit": window.limit,
                "from_message_id": window.from_message_id,
                "offset": window.offset,
                "only_local": window.only_local,
            }),
        ))
    }

    pub fn get_message(&self, chat_id: i64, message_id: i64) -> Result<PendingResult, ClientError> {
        self.send(
            Command::new("getMessage")
                .param("chat_id", chat_id)
                .param("message_id", message_id),
        )
    }

    /// Send plain text to a chat known to the engine.
    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<PendingResult, ClientError> {
        self.send(Command::with_params(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "input_message_content": {
                    "@type": "inputMessageText",
                    "text": {"@type": "formattedText", "text": text},
                },
            }),
        ))
    }

    pub fn delete_messages(
        &self,
        chat_id: i64,
        message_ids: &[i64],
        revoke: bool,
    ) -> Result<PendingResult, ClientError> {
        self.send(Command::with_params(
            "deleteMessages",
            json!({
                "chat_id": chat_id,
                "message_ids": message_ids,
                "revoke": revoke,
            }),
        ))
    }

    pub fn get_supergroup_full_info(&self, supergroup_id: i64) -> Result<PendingResult, ClientError> {
        self.send(Command::new("getSupergroupFullInfo").param("supergroup_id", supergroup_id))
    }

    pub fn create_basic_group_chat(&self, basic_group_id: i64) -> Result<PendingResult, ClientError> {
        self.send(Command::new("createBasicGroupChat").param("basic_group_id", basic_group_id))
    }

    /// The engine answers 404 when the page has no instant view.
    pub fn get_web_page_instant_view(
        &self,
        url: &str,
        force_full: bool,
    ) -> Result<PendingResult, ClientError> {
        self.send(
            Command::new("getWebPageInstantView")
                .param("url", url)
                .param("force_full", force_full),
        )
    }

    /// Query the engine's state without touching the local handshake state.
    ///
    /// Uses a generated id; the reserved query id belongs to the handshake.
    pub fn get_authorization_state(&self) -> Result<PendingResult, ClientError> {
        self.send(Command::new("getAuthorizationState"))
    }
}
