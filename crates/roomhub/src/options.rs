//! Room configuration: lifecycle callbacks and the cleanup cadence.

use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with a member id (connect, disconnect, remove).
pub type MemberCallback<M> = Arc<dyn Fn(M) + Send + Sync>;

/// Callback invoked with a member id and an inbound payload.
pub type MessageCallback<M> = Arc<dyn Fn(M, Vec<u8>) + Send + Sync>;

/// How long a disconnected member is retained before cleanup, by default.
pub const DEFAULT_CLEANUP_PERIOD: Duration = Duration::from_secs(30);

/// Configuration for a [`Room`](crate::Room).
///
/// Every field is optional: missing callbacks are no-ops, and a zero
/// `cleanup_period` means [`DEFAULT_CLEANUP_PERIOD`]. Callbacks run on
/// fresh tasks, concurrently with each other and with the room loop, and
/// must not block indefinitely.
pub struct RoomOptions<M> {
    /// Fired once after a member is admitted and registered.
    pub on_connect: Option<MemberCallback<M>>,
    /// Fired each time a member transitions from connected to disconnected.
    pub on_disconnect: Option<MemberCallback<M>>,
    /// Fired when a member is forgotten (cleanup expiry or explicit removal).
    pub on_remove: Option<MemberCallback<M>>,
    /// Fired for each inbound application payload.
    pub on_message: Option<MessageCallback<M>>,
    /// Interval between cleanup sweeps. Zero selects the default.
    pub cleanup_period: Duration,
}

impl<M> Default for RoomOptions<M> {
    fn default() -> Self {
        Self {
            on_connect: None,
            on_disconnect: None,
            on_remove: None,
            on_message: None,
            cleanup_period: Duration::ZERO,
        }
    }
}

impl<M> Clone for RoomOptions<M> {
    fn clone(&self) -> Self {
        Self {
            on_connect: self.on_connect.clone(),
            on_disconnect: self.on_disconnect.clone(),
            on_remove: self.on_remove.clone(),
            on_message: self.on_message.clone(),
            cleanup_period: self.cleanup_period,
        }
    }
}

impl<M> RoomOptions<M> {
    /// Options with no callbacks and the default cleanup period.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect callback.
    pub fn on_connect(mut self, callback: impl Fn(M) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Sets the disconnect callback.
    pub fn on_disconnect(
        mut self,
        callback: impl Fn(M) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(callback));
        self
    }

    /// Sets the remove callback.
    pub fn on_remove(mut self, callback: impl Fn(M) + Send + Sync + 'static) -> Self {
        self.on_remove = Some(Arc::new(callback));
        self
    }

    /// Sets the message callback.
    pub fn on_message(
        mut self,
        callback: impl Fn(M, Vec<u8>) + Send + Sync + 'static,
    ) -> Self {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Sets the cleanup sweep interval.
    pub fn cleanup_period(mut self, period: Duration) -> Self {
        self.cleanup_period = period;
        self
    }

    /// The sweep interval after zero-means-default normalisation.
    pub(crate) fn effective_cleanup_period(&self) -> Duration {
        if self.cleanup_period == Duration::ZERO {
            DEFAULT_CLEANUP_PERIOD
        } else {
            self.cleanup_period
        }
    }
}
