//! Holder notifications.
//!
//! Notifications are best-effort: the table mutation they accompany has
//! already happened when a callback runs, and a failing callback is only
//! logged.

use tokio::sync::mpsc;
use tracing::warn;
use vsl_core::Address;

use crate::error::{Error, Result};

/// Notification sink supplied by a lock holder.
///
/// Callbacks run outside the table mutex and must not block.
pub trait LockCallback: Send + Sync {
    fn on_acquired(&self, _path: &Address) -> Result<()> {
        Ok(())
    }

    fn on_will_expire(&self, _path: &Address) -> Result<()> {
        Ok(())
    }

    fn on_expired(&self, _path: &Address) -> Result<()> {
        Ok(())
    }
}

/// A callback that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

impl LockCallback for NoopCallback {}

/// Lifecycle event delivered by [`ChannelCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Acquired(Address),
    WillExpire(Address),
    Expired(Address),
}

/// Forwards notifications into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<LockEvent>,
}

impl ChannelCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LockEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: LockEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| Error::Callback(format!("event receiver dropped: {:?}", e.0)))
    }
}

impl LockCallback for ChannelCallback {
    fn on_acquired(&self, path: &Address) -> Result<()> {
        self.send(LockEvent::Acquired(path.clone()))
    }

    fn on_will_expire(&self, path: &Address) -> Result<()> {
        self.send(LockEvent::WillExpire(path.clone()))
    }

    fn on_expired(&self, path: &Address) -> Result<()> {
        self.send(LockEvent::Expired(path.clone()))
    }
}

/// Run a callback, logging instead of propagating failure.
pub(crate) fn notify(event: &'static str, path: &Address, result: Result<()>) {
    if let Err(e) = result {
        warn!(path = %path, event, error = %e, "Lock holder callback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_callback_forwards_events() {
        let (callback, mut rx) = ChannelCallback::new();
        let path = Address::new("/a");
        callback.on_acquired(&path).unwrap();
        callback.on_expired(&path).unwrap();

        assert_eq!(rx.try_recv().unwrap(), LockEvent::Acquired(path.clone()));
        assert_eq!(rx.try_recv().unwrap(), LockEvent::Expired(path));
    }

    #[test]
    fn dropped_receiver_is_an_error() {
        let (callback, rx) = ChannelCallback::new();
        drop(rx);
        let err = callback.on_will_expire(&Address::new("/a")).unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
    }

    #[test]
    fn noop_accepts_everything() {
        let path = Address::new("/a");
        assert!(NoopCallback.on_acquired(&path).is_ok());
        assert!(NoopCallback.on_will_expire(&path).is_ok());
        assert!(NoopCallback.on_expired(&path).is_ok());
    }
}
