//! Turns locate/refresh requests and permission changes into coordinates
//! and weather results.
//!
//! A [`Coordinator`] owns the last resolved coordinate (the refresh target)
//! and publishes three streams: resolved coordinates, an echo of every
//! permission change, and weather fetch results. It can be driven inline
//! with [`Coordinator::handle`], or moved onto its own task with
//! [`Coordinator::spawn`], where it becomes the only writer of its state and
//! fetches run concurrently.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::location::{LocationManager, LocationObserver};
use crate::provider::WeatherProvider;
use crate::types::{
    AuthorizationStatus, Coordinate, FetchError, PermissionStatus, WeatherSnapshot,
};

const OUTPUT_CAPACITY: usize = 64;

pub type WeatherResult = Result<WeatherSnapshot, FetchError>;

/// An input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// "Show me where I am"
    Locate,
    /// Re-fetch weather for the last resolved coordinate
    Refresh,
    PermissionChanged(AuthorizationStatus),
}

/// Why a trigger ended without fetching. Never published; only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Dropped {
    #[error("waiting for the user to answer the permission prompt")]
    PermissionPending,
    #[error("device location is not available")]
    CoordinateUnavailable,
    #[error("no usable weather API key configured")]
    ConfigurationMissing,
    #[error("location services are disabled")]
    LocationServicesDisabled,
    #[error("location access is restricted")]
    AccessRestricted,
}

/// Receivers for everything a coordinator publishes
#[derive(Debug)]
pub struct Subscriptions {
    pub coordinate: broadcast::Receiver<Coordinate>,
    /// Raw authorization statuses, exactly as received
    pub permission: broadcast::Receiver<AuthorizationStatus>,
    pub weather: broadcast::Receiver<WeatherResult>,
}

#[derive(Debug, Clone)]
struct Outputs {
    coordinate: broadcast::Sender<Coordinate>,
    permission: broadcast::Sender<AuthorizationStatus>,
    weather: broadcast::Sender<WeatherResult>,
}

impl Outputs {
    fn new() -> Self {
        Self {
            coordinate: broadcast::channel(OUTPUT_CAPACITY).0,
            permission: broadcast::channel(OUTPUT_CAPACITY).0,
            weather: broadcast::channel(OUTPUT_CAPACITY).0,
        }
    }

    fn subscribe(&self) -> Subscriptions {
        Subscriptions {
            coordinate: self.coordinate.subscribe(),
            permission: self.permission.subscribe(),
            weather: self.weather.subscribe(),
        }
    }

    // Sending fails only when nobody is subscribed, which is fine
    fn publish_coordinate(&self, coordinate: Coordinate) {
        let _ = self.coordinate.send(coordinate);
    }

    fn publish_permission(&self, status: AuthorizationStatus) {
        let _ = self.permission.send(status);
    }
}

pub struct Coordinator<M> {
    manager: Arc<M>,
    provider: Option<WeatherProvider>,
    last_resolved: watch::Sender<Coordinate>,
    outputs: Outputs,
}

impl<M: LocationManager> Coordinator<M> {
    /// `provider` is `None` when no API key is configured; coordinates are
    /// still resolved but weather is never fetched.
    pub fn new(manager: Arc<M>, provider: Option<WeatherProvider>) -> Self {
        Self {
            manager,
            provider,
            last_resolved: watch::channel(Coordinate::FALLBACK).0,
            outputs: Outputs::new(),
        }
    }

    pub fn subscribe(&self) -> Subscriptions {
        self.outputs.subscribe()
    }

    /// Coordinate that `Refresh` fetches for
    pub fn last_resolved(&self) -> Coordinate {
        *self.last_resolved.borrow()
    }

    /// Process one trigger and wait for its fetch, if any, to publish.
    pub async fn handle(&mut self, trigger: Trigger) -> Result<(), Dropped> {
        let target = self.resolve(trigger)?;
        self.dispatch(target)?.await;
        Ok(())
    }

    /// Move the coordinator onto its own task. The returned handle is also
    /// subscribed to the location manager's permission notifications.
    ///
    /// The task stops when the handle is shut down or dropped.
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let outputs = self.outputs.clone();
        let last_resolved = self.last_resolved.subscribe();

        // Weak, so the manager never keeps a stopped coordinator's queue alive
        self.manager.subscribe(Arc::new(TriggerSink {
            triggers: tx.downgrade(),
        }));

        let task = tokio::spawn(self.run(rx, cancel.clone()));

        CoordinatorHandle {
            triggers: tx,
            outputs,
            last_resolved,
            cancel: cancel.drop_guard(),
            task,
        }
    }

    async fn run(
        mut self,
        mut triggers: mpsc::UnboundedReceiver<Trigger>,
        cancel: CancellationToken,
    ) {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Triggers sent before shutdown still count
                    triggers.close();
                    while let Ok(trigger) = triggers.try_recv() {
                        self.accept(trigger, &mut in_flight);
                    }
                    break;
                }
                trigger = triggers.recv() => {
                    let Some(trigger) = trigger else { break };
                    self.accept(trigger, &mut in_flight);
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Weather fetch task failed: {e}");
                    }
                }
            }
        }

        // Fetches aren't cancellable; let the ones already sent deliver
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Weather fetch task failed: {e}");
            }
        }
        tracing::debug!("Coordinator stopped");
    }

    fn accept(&mut self, trigger: Trigger, in_flight: &mut JoinSet<()>) {
        match self.resolve(trigger).and_then(|target| self.dispatch(target)) {
            Ok(fetch) => {
                in_flight.spawn(fetch);
            }
            Err(reason) => tracing::debug!(?trigger, "Trigger dropped: {reason}"),
        }
    }

    /// Work out which coordinate a trigger should fetch for, publishing and
    /// recording any newly resolved coordinate on the way.
    fn resolve(&mut self, trigger: Trigger) -> Result<Coordinate, Dropped> {
        match trigger {
            Trigger::Locate => self.locate(),
            Trigger::Refresh => Ok(self.last_resolved()),
            Trigger::PermissionChanged(status) => {
                let target = self.permission_changed(status);
                self.outputs.publish_permission(status);
                target
            }
        }
    }

    fn locate(&mut self) -> Result<Coordinate, Dropped> {
        if !self.manager.services_enabled() {
            return Err(Dropped::LocationServicesDisabled);
        }

        match self.manager.authorization_status().permission() {
            PermissionStatus::Unknown => {
                tracing::info!("Location permission not determined, asking");
                self.manager.request_authorization();
                // Resumes only when the answer arrives as PermissionChanged
                Err(Dropped::PermissionPending)
            }
            PermissionStatus::Granted => {
                self.manager.start_updating_location();
                self.use_device_location()
            }
            PermissionStatus::Denied => Ok(self.use_fallback()),
            PermissionStatus::Restricted => Err(Dropped::AccessRestricted),
        }
    }

    fn permission_changed(&mut self, status: AuthorizationStatus) -> Result<Coordinate, Dropped> {
        tracing::info!(?status, "Location permission changed");
        match status.permission() {
            PermissionStatus::Unknown => Err(Dropped::PermissionPending),
            PermissionStatus::Granted => self.use_device_location(),
            PermissionStatus::Denied => Ok(self.use_fallback()),
            PermissionStatus::Restricted => Err(Dropped::AccessRestricted),
        }
    }

    fn use_device_location(&mut self) -> Result<Coordinate, Dropped> {
        let coordinate = self
            .manager
            .location()
            .ok_or(Dropped::CoordinateUnavailable)?;
        self.record_resolved(coordinate);
        Ok(coordinate)
    }

    fn use_fallback(&mut self) -> Coordinate {
        self.record_resolved(Coordinate::FALLBACK);
        Coordinate::FALLBACK
    }

    /// The only place the refresh target changes
    fn record_resolved(&mut self, coordinate: Coordinate) {
        self.outputs.publish_coordinate(coordinate);
        self.last_resolved.send_replace(coordinate);
    }

    /// A future that fetches weather for `target` and publishes the result
    fn dispatch(
        &self,
        target: Coordinate,
    ) -> Result<impl Future<Output = ()> + Send + 'static, Dropped> {
        let provider = self.provider.clone().ok_or(Dropped::ConfigurationMissing)?;
        let weather = self.outputs.weather.clone();

        Ok(async move {
            tracing::info!(%target, "Fetching weather");
            let result = provider.fetch(target).await;
            if let Err(e) = &result {
                tracing::warn!(%target, "Weather fetch failed: {e}");
            }
            let _ = weather.send(result);
        })
    }
}

/// Feeds permission notifications into a running coordinator
struct TriggerSink {
    triggers: mpsc::WeakUnboundedSender<Trigger>,
}

impl LocationObserver for TriggerSink {
    fn on_status_changed(&self, status: AuthorizationStatus) {
        let sent = self
            .triggers
            .upgrade()
            .is_some_and(|tx| tx.send(Trigger::PermissionChanged(status)).is_ok());
        if !sent {
            tracing::debug!(?status, "Coordinator stopped, permission change ignored");
        }
    }

    fn is_closed(&self) -> bool {
        match self.triggers.upgrade() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    fn on_location_update(&self, coordinate: Coordinate) {
        // Coordinates are read on demand
        tracing::trace!(%coordinate, "Location update");
    }
}

/// Handle to a coordinator running on its own task. Dropping it stops the
/// task the same way [`CoordinatorHandle::shutdown`] does, without waiting.
#[derive(Debug)]
pub struct CoordinatorHandle {
    triggers: mpsc::UnboundedSender<Trigger>,
    outputs: Outputs,
    last_resolved: watch::Receiver<Coordinate>,
    cancel: DropGuard,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    pub fn locate(&self) {
        self.send(Trigger::Locate);
    }

    pub fn refresh(&self) {
        self.send(Trigger::Refresh);
    }

    pub fn permission_changed(&self, status: AuthorizationStatus) {
        self.send(Trigger::PermissionChanged(status));
    }

    pub fn send(&self, trigger: Trigger) {
        if self.triggers.send(trigger).is_err() {
            tracing::warn!(?trigger, "Coordinator is not running");
        }
    }

    pub fn subscribe(&self) -> Subscriptions {
        self.outputs.subscribe()
    }

    pub fn last_resolved(&self) -> Coordinate {
        *self.last_resolved.borrow()
    }

    /// Wait until the refresh target changes
    pub async fn last_resolved_changed(&mut self) -> Option<Coordinate> {
        self.last_resolved.changed().await.ok()?;
        Some(*self.last_resolved.borrow_and_update())
    }

    /// Stop taking triggers and wait for in-flight fetches to publish.
    /// Triggers already sent are processed before the task exits.
    pub async fn shutdown(self) {
        self.cancel.disarm().cancel();
        if let Err(e) = self.task.await {
            tracing::error!("Coordinator task failed: {e}");
        }
    }
}
