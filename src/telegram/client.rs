//! grammers-backed client: authentication, the new-message pump and the
//! [`Transport`] implementation used by the dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken, UpdateStream, UpdatesConfiguration};
use grammers_client::message::{InputMessage, Message};
use grammers_client::peer::{Peer, PeerKind};
use grammers_client::update::Update;
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::transport::{
    ChatKind, IncomingMessage, MessageRef, OutgoingMessage, ParseMode, Transport, TransportError,
};

/// Re-export types for external use.
pub use grammers_client::client::{LoginToken as Token, PasswordToken as PwdToken};

/// How long a message stays addressable for edits and deletes.
const MESSAGE_TTL: Duration = Duration::from_secs(60 * 60);

/// Upper bound on addressable messages kept in memory.
const MAX_CACHED_MESSAGES: usize = 4096;

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized. Please sign in first.")]
    NotAuthorized,

    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Password required for 2FA")]
    PasswordRequired(PasswordToken),

    #[error("Invalid password")]
    InvalidPassword(PasswordToken),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Update stream already taken")]
    UpdatesTaken,

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if let Some(seconds) = flood_wait_of(&err_str) {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

impl From<InvocationError> for TransportError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        match flood_wait_of(&err_str) {
            Some(seconds) => Self::FloodWait(seconds),
            None => Self::Rejected(err_str),
        }
    }
}

fn flood_wait_of(err_str: &str) -> Option<u32> {
    if err_str.contains("FLOOD_WAIT") || err_str.to_lowercase().contains("flood") {
        extract_flood_wait_seconds(err_str)
    } else {
        None
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];
    let lowered = err_msg.to_lowercase();

    for pattern in patterns {
        if let Some(idx) = lowered.find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = err_msg[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

struct CachedMessage {
    message: Message,
    seen: Instant,
}

/// Messages the transport can still act on, keyed by chat and id.
#[derive(Default)]
struct MessageCache {
    entries: Mutex<HashMap<MessageRef, CachedMessage>>,
}

impl MessageCache {
    async fn insert(&self, reference: MessageRef, message: Message) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if entries.len() >= MAX_CACHED_MESSAGES {
            entries.retain(|_, cached| now.duration_since(cached.seen) < MESSAGE_TTL);
        }
        if entries.len() >= MAX_CACHED_MESSAGES
            && let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, cached)| cached.seen)
                .map(|(key, _)| *key)
        {
            entries.remove(&oldest);
        }

        entries.insert(reference, CachedMessage { message, seen: now });
    }

    async fn get(&self, reference: &MessageRef) -> Result<Message, TransportError> {
        self.entries
            .lock()
            .await
            .get(reference)
            .map(|cached| cached.message.clone())
            .ok_or(TransportError::UnknownMessage {
                chat_id: reference.chat_id,
                message_id: reference.message_id,
            })
    }

    async fn remove(&self, reference: &MessageRef) {
        self.entries.lock().await.remove(reference);
    }
}

/// High-level Telegram client wrapper.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Update stream, until [`TelegramBot::listen`] takes it.
    updates: Mutex<Option<UpdateStream>>,

    messages: Arc<MessageCache>,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened or the server
    /// cannot be reached.
    pub async fn connect(config: &TelegramConfig) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        let stream = client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );

        Ok(Self {
            client,
            handle: handle.thin,
            updates: Mutex::new(Some(stream)),
            messages: Arc::new(MessageCache::default()),
            _pool_task: pool_task,
        })
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, TelegramError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::PasswordRequired`] when the account has 2FA
    /// enabled, or another error if sign in fails.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), TelegramError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code).await {
            Ok(_user) => {
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(TelegramError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(TelegramError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is invalid.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), TelegramError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(TelegramError::InvalidPassword(token)),
            Err(e) => Err(TelegramError::SignInFailed(e.to_string())),
        }
    }

    /// Id of the logged-in account.
    ///
    /// # Errors
    ///
    /// Returns an error if not authorized or the API call fails.
    pub async fn account_id(&self) -> Result<i64, TelegramError> {
        if !self.is_authorized().await? {
            return Err(TelegramError::NotAuthorized);
        }

        let request = tl::functions::users::GetUsers {
            id: vec![tl::enums::InputUser::UserSelf],
        };

        match self.client.invoke(&request).await {
            Ok(users) => match users.first() {
                Some(tl::enums::User::User(user)) => {
                    info!("Logged in as user {}", user.id);
                    Ok(user.id)
                }
                _ => Err(TelegramError::Invocation(
                    "Could not get own user info".to_owned(),
                )),
            },
            Err(e) => {
                warn!("Failed to get own user info: {}", e);
                Err(e.into())
            }
        }
    }

    /// Starts forwarding every new message into `tx`.
    ///
    /// The pump stops when the stream fails or when `tx` is closed.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::UpdatesTaken`] if already listening.
    pub async fn listen(
        &self,
        tx: mpsc::Sender<IncomingMessage>,
    ) -> Result<JoinHandle<()>, TelegramError> {
        let mut stream = self
            .updates
            .lock()
            .await
            .take()
            .ok_or(TelegramError::UpdatesTaken)?;
        let messages = Arc::clone(&self.messages);

        Ok(tokio::spawn(async move {
            info!("Listening for new messages");
            loop {
                let update = match stream.next().await {
                    Ok(update) => update,
                    Err(e) => {
                        error!("Update stream failed: {}", e);
                        break;
                    }
                };

                let Update::NewMessage(message) = update else {
                    continue;
                };

                let incoming = to_incoming(&message);
                messages.insert(incoming.reference(), message).await;

                if tx.send(incoming).await.is_err() {
                    debug!("Dispatcher gone, stopping update pump");
                    break;
                }
            }
            stream.sync_update_state();
        }))
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }
}

#[async_trait]
impl Transport for TelegramBot {
    async fn send_message(
        &self,
        anchor: &MessageRef,
        message: OutgoingMessage,
    ) -> Result<MessageRef, TransportError> {
        let anchor_message = self.messages.get(anchor).await?;
        let sent = anchor_message.respond(to_input(&message)).await?;

        let reference = MessageRef::new(anchor.chat_id, sent.id());
        self.messages.insert(reference, sent).await;
        Ok(reference)
    }

    async fn edit_message(
        &self,
        target: &MessageRef,
        message: OutgoingMessage,
    ) -> Result<MessageRef, TransportError> {
        let cached = self.messages.get(target).await?;
        cached.edit(to_input(&message)).await?;
        Ok(*target)
    }

    async fn delete_message(
        &self,
        target: &MessageRef,
        revoke: bool,
    ) -> Result<(), TransportError> {
        let cached = self.messages.get(target).await?;
        // grammers always revokes; a one-sided delete is not exposed.
        debug!(revoke, "Deleting message {}", target.message_id);
        cached.delete().await?;
        self.messages.remove(target).await;
        Ok(())
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot").finish_non_exhaustive()
    }
}

fn to_incoming(message: &Message) -> IncomingMessage {
    let peer = message.peer_id();

    // Megagroups travel as channel peers; only the resolved chat tells them
    // apart from broadcast channels.
    let megagroup = match message.peer() {
        Some(Peer::Group(group)) => Some(group.is_megagroup()),
        Some(Peer::Channel(_)) => Some(false),
        _ => None,
    };
    let chat_kind = classify_chat(peer.kind(), megagroup);

    IncomingMessage {
        id: message.id(),
        chat_id: peer.bare_id(),
        chat_kind,
        sender_id: message.sender_id().map(|sender| sender.bare_id()),
        text: message.text().to_owned(),
        outgoing: message.outgoing(),
        reply_to_message_id: message.reply_to_message_id(),
        date: message.date(),
    }
}

fn classify_chat(kind: PeerKind, megagroup: Option<bool>) -> ChatKind {
    match (kind, megagroup) {
        (PeerKind::User | PeerKind::UserSelf, _) => ChatKind::Private,
        (PeerKind::Chat, _) => ChatKind::Group,
        (PeerKind::Channel, Some(true)) => ChatKind::Supergroup,
        (PeerKind::Channel, Some(false)) => ChatKind::Channel,
        (PeerKind::Channel, None) => ChatKind::Unknown,
    }
}

fn to_input(message: &OutgoingMessage) -> InputMessage {
    let input = InputMessage::new();
    let input = match message.parse_mode {
        ParseMode::Plain => input.text(&message.text),
        ParseMode::Html => input.html(&message.text),
        ParseMode::Markdown => input.markdown(&message.text),
    };

    input
        .reply_to(message.reply_to)
        .silent(message.silent)
        .link_preview(message.link_preview)
}

/// Masks a phone number for logging (shows last 4 digits).
fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_flood_wait_detection() {
        assert_eq!(flood_wait_of("rpc error 420: FLOOD_WAIT_30"), Some(30));
        assert_eq!(flood_wait_of("rpc error 400: MESSAGE_NOT_MODIFIED"), None);
    }

    #[test]
    fn test_classify_chat() {
        assert_eq!(classify_chat(PeerKind::User, None), ChatKind::Private);
        assert_eq!(classify_chat(PeerKind::UserSelf, None), ChatKind::Private);
        assert_eq!(classify_chat(PeerKind::Chat, None), ChatKind::Group);

        let megagroup = classify_chat(PeerKind::Channel, Some(true));
        assert_eq!(megagroup, ChatKind::Supergroup);
        assert!(megagroup.is_group());
        assert!(!megagroup.is_channel());

        assert_eq!(classify_chat(PeerKind::Channel, Some(false)), ChatKind::Channel);
        assert_eq!(classify_chat(PeerKind::Channel, None), ChatKind::Unknown);
    }
}
