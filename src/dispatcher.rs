//! Command dispatcher
//!
//! Routes normalized user commands to the matchmaker and the session state
//! machine, answers help/start, relays chat text and serves the admin
//! commands. Whether searching is enabled comes from an injected
//! [`SystemSwitch`].

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, ChatError};
use crate::hub::{HubCommand, HubHandle};
use crate::lifecycle::{EndOutcome, Presence, SessionMachine};
use crate::matchmaker::{MatchOutcome, Matchmaker};
use crate::message::{ErrorCode, ServerMessage};
use crate::notifier::{HubNotifier, Notifier};
use crate::store::SessionStore;
use crate::types::UserId;

const HELP_TEXT: &str = "Meet a random anonymous stranger and chat one-on-one.\n\n\
Commands:\n\
start - Show the welcome message\n\
search - Find a chat partner\n\
end - End the chat with your partner (or stop searching)\n\
help - Show this help\n";

/// A normalized user action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Search,
    End,
    Help,
    Chat { content: String },
    Admin { token: String, command: String },
}

/// What a command amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Chatting with this partner (new or existing match)
    Matched(UserId),
    /// Waiting for a partner
    Waiting,
    /// No live session to act on
    NotInSession,
    /// The session was ended
    Ended,
    /// Text was passed on to the partner
    Relayed,
    /// A plain reply was sent
    Replied,
    /// Searching is switched off
    Unavailable,
    /// Admin command without valid credentials
    Denied,
    /// The operation failed; safe to retry
    Failed,
}

/// Operator commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Start,
    Stop,
    Monitor,
}

impl FromStr for AdminCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(AdminCommand::Start),
            "stop" => Ok(AdminCommand::Stop),
            "monitor" => Ok(AdminCommand::Monitor),
            other => Err(other.to_string()),
        }
    }
}

/// Shared on/off switch for searching
#[derive(Debug, Clone)]
pub struct SystemSwitch(Arc<AtomicBool>);

impl SystemSwitch {
    pub fn new(on: bool) -> Self {
        Self(Arc::new(AtomicBool::new(on)))
    }

    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::SeqCst);
    }
}

pub struct Dispatcher<S> {
    store: Arc<S>,
    matchmaker: Matchmaker<S>,
    machine: SessionMachine<S>,
    notifier: Arc<dyn Notifier>,
    hub: HubHandle,
    switch: SystemSwitch,
    admin_token: Option<String>,
    next_user: AtomicU64,
    started_at: Instant,
}

impl<S: SessionStore> Dispatcher<S> {
    pub fn new(store: Arc<S>, hub: HubHandle, switch: SystemSwitch, config: &Config) -> Self {
        let notifier: Arc<dyn Notifier> = Arc::new(HubNotifier::new(hub.clone()));
        let matchmaker = match config.rng_seed {
            Some(seed) => Matchmaker::with_seed(store.clone(), notifier.clone(), seed),
            None => Matchmaker::new(store.clone(), notifier.clone()),
        };

        Self {
            machine: SessionMachine::new(store.clone(), notifier.clone()),
            matchmaker,
            store,
            notifier,
            hub,
            switch,
            admin_token: config.admin_token.clone(),
            next_user: AtomicU64::new(1),
            started_at: Instant::now(),
        }
    }

    /// Register a new connection and issue its user handle
    pub async fn connect(&self, sender: mpsc::Sender<ServerMessage>) -> Result<UserId, AppError> {
        let user_id = UserId(self.next_user.fetch_add(1, Ordering::SeqCst));

        self.store
            .register_user(user_id)
            .await
            .map_err(ChatError::from)?;

        if !self.hub.send(HubCommand::Register { user_id, sender }).await {
            error!("Failed to register user {} - hub closed", user_id);
            return Err(AppError::ChannelSend);
        }

        info!("User {} connected", user_id);
        Ok(user_id)
    }

    /// Tear down a connection, ending whatever session the user was in
    pub async fn disconnect(&self, user_id: UserId) {
        if let Err(e) = self.machine.abandon(user_id).await {
            error!("Could not end session of disconnected user {}: {}", user_id, e);
        }
        self.hub.send(HubCommand::Unregister { user_id }).await;
        info!("User {} disconnected", user_id);
    }

    /// Process a single command
    pub async fn dispatch(&self, user_id: UserId, cmd: Command) -> CommandOutcome {
        match cmd {
            Command::Start => {
                self.reply(user_id, ServerMessage::Welcome).await;
                CommandOutcome::Replied
            }
            Command::Help => {
                self.reply(
                    user_id,
                    ServerMessage::Help {
                        text: HELP_TEXT.to_string(),
                    },
                )
                .await;
                CommandOutcome::Replied
            }
            Command::Search => self.handle_search(user_id).await,
            Command::End => self.handle_end(user_id).await,
            Command::Chat { content } => self.handle_chat(user_id, content).await,
            Command::Admin { token, command } => self.handle_admin(user_id, &token, &command).await,
        }
    }

    /// Handle partner search
    async fn handle_search(&self, user_id: UserId) -> CommandOutcome {
        if !self.switch.is_on() {
            info!("User {} searched while the system is off", user_id);
            self.reply(user_id, ServerMessage::Maintenance).await;
            return CommandOutcome::Unavailable;
        }

        match self.matchmaker.request_match(user_id).await {
            Ok(MatchOutcome::Matched { partner, .. }) => CommandOutcome::Matched(partner),
            Ok(MatchOutcome::AlreadyActive {
                partner: Some(partner),
                ..
            }) => CommandOutcome::Matched(partner),
            Ok(_) => CommandOutcome::Waiting,
            Err(_) => {
                self.reply(user_id, ServerMessage::failure(ErrorCode::MatchFailed)).await;
                CommandOutcome::Failed
            }
        }
    }

    /// Handle chat ending / search cancelling
    async fn handle_end(&self, user_id: UserId) -> CommandOutcome {
        match self.machine.end_session(user_id).await {
            Ok(EndOutcome::Ended { .. }) => CommandOutcome::Ended,
            Ok(EndOutcome::NotInSession) => CommandOutcome::NotInSession,
            Err(_) => {
                self.reply(user_id, ServerMessage::failure(ErrorCode::EndFailed)).await;
                CommandOutcome::Failed
            }
        }
    }

    /// Handle chat text
    async fn handle_chat(&self, user_id: UserId, content: String) -> CommandOutcome {
        match self.machine.presence(user_id).await {
            Ok(Presence::Chatting { partner }) => {
                self.reply(partner, ServerMessage::Chat { content }).await;
                CommandOutcome::Relayed
            }
            Ok(Presence::Waiting) => {
                self.reply(user_id, ServerMessage::AlreadyWaiting).await;
                CommandOutcome::Waiting
            }
            Ok(Presence::Idle) => {
                self.reply(user_id, ServerMessage::NotInChat).await;
                CommandOutcome::NotInSession
            }
            Err(e) => {
                error!("Relay for user {} failed: {}", user_id, e);
                self.reply(user_id, ServerMessage::failure(ErrorCode::Internal)).await;
                CommandOutcome::Failed
            }
        }
    }

    /// Handle operator commands
    async fn handle_admin(&self, user_id: UserId, token: &str, command: &str) -> CommandOutcome {
        if self.admin_token.as_deref() != Some(token) {
            warn!("User {}: not admin", user_id);
            return CommandOutcome::Denied;
        }

        let command = match command.parse::<AdminCommand>() {
            Ok(command) => command,
            Err(unknown) => {
                self.reply(
                    user_id,
                    ServerMessage::Error {
                        code: ErrorCode::UnknownCommand,
                        message: format!("Command not found: '{}'", unknown),
                    },
                )
                .await;
                return CommandOutcome::Replied;
            }
        };

        match command {
            AdminCommand::Start | AdminCommand::Stop => {
                let on = command == AdminCommand::Start;
                self.switch.set(on);
                info!("User {} switched the system {}", user_id, if on { "on" } else { "off" });
                self.reply(user_id, ServerMessage::SystemStatus { on }).await;
                CommandOutcome::Replied
            }
            AdminCommand::Monitor => match self.store.stats().await {
                Ok(stats) => {
                    let status = ServerMessage::Status {
                        on: self.switch.is_on(),
                        uptime: format_uptime(self.started_at.elapsed()),
                        total_users: stats.total_users,
                        total_sessions: stats.total_sessions,
                        active_sessions: stats.active,
                        waiting_sessions: stats.waiting,
                    };
                    self.reply(user_id, status).await;
                    CommandOutcome::Replied
                }
                Err(e) => {
                    error!("Monitor query failed: {}", e);
                    self.reply(user_id, ServerMessage::failure(ErrorCode::Internal)).await;
                    CommandOutcome::Failed
                }
            },
        }
    }

    async fn reply(&self, user_id: UserId, message: ServerMessage) {
        if let Err(e) = self.notifier.notify(user_id, message).await {
            warn!("Failed to notify user {}: {}", user_id, e);
        }
    }
}

/// Render an uptime as `1d 2h 3m 4s`
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
}
