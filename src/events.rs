use ethers::types::Address;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::providers::NetworkState;
use crate::types::TokensSnapshot;

/// Capacity used for controller event and state channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// External state changes the controllers react to.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// The token-set provider published a new snapshot.
    TokensStateChanged(Arc<TokensSnapshot>),
    /// Network configurations or the selected network changed.
    NetworkStateChanged(Arc<NetworkState>),
    SelectedAccountChanged(Address),
}

impl ControllerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerEvent::TokensStateChanged(_) => "tokens_state_changed",
            ControllerEvent::NetworkStateChanged(_) => "network_state_changed",
            ControllerEvent::SelectedAccountChanged(_) => "selected_account_changed",
        }
    }
}

pub type EventSender = broadcast::Sender<ControllerEvent>;
pub type EventReceiver = broadcast::Receiver<ControllerEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

/// Drives `handler` with every event from `rx` until the channel closes.
///
/// A lagging receiver skips what it missed and keeps going.
pub(crate) async fn drive_events<F, Fut>(component: &'static str, mut rx: EventReceiver, mut handler: F)
where
    F: FnMut(ControllerEvent) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        match rx.recv().await {
            Ok(event) => handler(event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("{}: event listener lagged, skipped {} events", component, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                log::debug!("{}: event channel closed, listener exiting", component);
                break;
            }
        }
    }
}
