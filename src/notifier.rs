//! Outbound notification seam
//!
//! The matchmaker and the session state machine report outcomes through a
//! [`Notifier`]. Delivery is fire-and-forget: a failed notification is logged
//! by the caller and never undoes a committed state change.

use async_trait::async_trait;

use crate::error::NotifyError;
use crate::hub::{HubCommand, HubHandle};
use crate::message::ServerMessage;
use crate::types::UserId;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user: UserId, message: ServerMessage) -> Result<(), NotifyError>;
}

/// Notifier that hands messages to the Hub actor for delivery
#[derive(Debug, Clone)]
pub struct HubNotifier {
    hub: HubHandle,
}

impl HubNotifier {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Notifier for HubNotifier {
    async fn notify(&self, user: UserId, message: ServerMessage) -> Result<(), NotifyError> {
        let delivered = self
            .hub
            .send(HubCommand::Deliver {
                user_id: user,
                message,
            })
            .await;
        if delivered {
            Ok(())
        } else {
            Err(NotifyError::HubClosed)
        }
    }
}
