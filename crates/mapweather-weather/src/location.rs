//! Platform location capability and an in-process simulation of it.

use std::sync::Arc;

use mapweather_core::DeviceConfig;
use parking_lot::Mutex;

use crate::types::{AuthorizationStatus, Coordinate};

/// Receives notifications from a [`LocationManager`]
pub trait LocationObserver: Send + Sync {
    /// Authorization changed, including the answer to a permission prompt
    fn on_status_changed(&self, status: AuthorizationStatus);

    /// New fix while location updates are running
    fn on_location_update(&self, _coordinate: Coordinate) {}

    /// An observer that will never act again. Managers may forget it.
    fn is_closed(&self) -> bool {
        false
    }
}

/// What the coordinator needs from the platform's location subsystem
pub trait LocationManager: Send + Sync + 'static {
    /// Whether location services are switched on device-wide
    fn services_enabled(&self) -> bool {
        true
    }

    fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask the user for access. The answer arrives later through
    /// [`LocationObserver::on_status_changed`].
    fn request_authorization(&self);

    /// Most recent fix, if the device has one
    fn location(&self) -> Option<Coordinate>;

    /// Begin continuous tracking. There is no matching stop.
    fn start_updating_location(&self);

    fn subscribe(&self, observer: Arc<dyn LocationObserver>);
}

#[derive(Debug)]
struct DeviceState {
    status: AuthorizationStatus,
    location: Option<Coordinate>,
    prompt_answer: AuthorizationStatus,
    services_enabled: bool,
    updating: bool,
    authorization_requests: usize,
}

/// A location manager driven entirely by its owner: status changes, fixes
/// and the answer to the permission prompt are all set programmatically.
pub struct SimulatedLocationManager {
    state: Mutex<DeviceState>,
    observers: Mutex<Vec<Arc<dyn LocationObserver>>>,
}

impl SimulatedLocationManager {
    pub fn new(status: AuthorizationStatus) -> Self {
        Self {
            state: Mutex::new(DeviceState {
                status,
                location: None,
                prompt_answer: AuthorizationStatus::AuthorizedWhenInUse,
                services_enabled: true,
                updating: false,
                authorization_requests: 0,
            }),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        let manager = Self::new(config.authorization.into())
            .with_prompt_answer(config.prompt_answer.into())
            .with_services_enabled(config.services_enabled);
        match config.coordinate() {
            Some((latitude, longitude)) => {
                manager.with_location(Coordinate::new(latitude, longitude))
            }
            None => manager,
        }
    }

    pub fn with_location(self, coordinate: Coordinate) -> Self {
        self.state.lock().location = Some(coordinate);
        self
    }

    /// Status the simulated user picks when asked for permission
    pub fn with_prompt_answer(self, answer: AuthorizationStatus) -> Self {
        self.state.lock().prompt_answer = answer;
        self
    }

    pub fn with_services_enabled(self, enabled: bool) -> Self {
        self.state.lock().services_enabled = enabled;
        self
    }

    /// Change authorization and notify observers, like the user flipping
    /// the setting
    pub fn set_status(&self, status: AuthorizationStatus) {
        self.state.lock().status = status;
        tracing::debug!(?status, "Simulated authorization changed");
        for observer in self.observers() {
            observer.on_status_changed(status);
        }
    }

    /// Move the device. Observers hear about it only while updating.
    pub fn set_location(&self, location: Option<Coordinate>) {
        let notify = {
            let mut state = self.state.lock();
            state.location = location;
            state.updating
        };
        if let (true, Some(coordinate)) = (notify, location) {
            for observer in self.observers() {
                observer.on_location_update(coordinate);
            }
        }
    }

    /// How many times permission was requested
    pub fn authorization_requests(&self) -> usize {
        self.state.lock().authorization_requests
    }

    pub fn is_updating(&self) -> bool {
        self.state.lock().updating
    }

    /// Observers still registered
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    // Snapshot so callbacks run without holding the lock. Closed observers
    // are pruned on the way.
    fn observers(&self) -> Vec<Arc<dyn LocationObserver>> {
        let mut observers = self.observers.lock();
        observers.retain(|observer| !observer.is_closed());
        observers.clone()
    }
}

impl LocationManager for SimulatedLocationManager {
    fn services_enabled(&self) -> bool {
        self.state.lock().services_enabled
    }

    fn authorization_status(&self) -> AuthorizationStatus {
        self.state.lock().status
    }

    fn request_authorization(&self) {
        let answer = {
            let mut state = self.state.lock();
            state.authorization_requests += 1;
            // The prompt is only shown once
            (state.status == AuthorizationStatus::NotDetermined).then_some(state.prompt_answer)
        };
        if let Some(answer) = answer {
            self.set_status(answer);
        }
    }

    fn location(&self) -> Option<Coordinate> {
        self.state.lock().location
    }

    fn start_updating_location(&self) {
        self.state.lock().updating = true;
    }

    fn subscribe(&self, observer: Arc<dyn LocationObserver>) {
        let mut observers = self.observers.lock();
        observers.retain(|observer| !observer.is_closed());
        observers.push(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapweather_core::AuthorizationSetting;

    #[derive(Default)]
    struct Recorder {
        statuses: Mutex<Vec<AuthorizationStatus>>,
        fixes: Mutex<Vec<Coordinate>>,
        closed: Mutex<bool>,
    }

    impl LocationObserver for Recorder {
        fn on_status_changed(&self, status: AuthorizationStatus) {
            self.statuses.lock().push(status);
        }

        fn on_location_update(&self, coordinate: Coordinate) {
            self.fixes.lock().push(coordinate);
        }

        fn is_closed(&self) -> bool {
            *self.closed.lock()
        }
    }

    #[test]
    fn test_prompt_answer_is_broadcast() {
        let manager = SimulatedLocationManager::new(AuthorizationStatus::NotDetermined)
            .with_prompt_answer(AuthorizationStatus::Denied);
        let recorder = Arc::new(Recorder::default());
        manager.subscribe(recorder.clone());

        manager.request_authorization();

        assert_eq!(manager.authorization_status(), AuthorizationStatus::Denied);
        assert_eq!(*recorder.statuses.lock(), vec![AuthorizationStatus::Denied]);
    }

    #[test]
    fn test_prompt_only_shown_once() {
        let manager = SimulatedLocationManager::new(AuthorizationStatus::Denied);
        let recorder = Arc::new(Recorder::default());
        manager.subscribe(recorder.clone());

        manager.request_authorization();

        assert_eq!(manager.authorization_requests(), 1);
        assert_eq!(manager.authorization_status(), AuthorizationStatus::Denied);
        assert!(recorder.statuses.lock().is_empty());
    }

    #[test]
    fn test_location_updates_only_while_updating() {
        let manager = SimulatedLocationManager::new(AuthorizationStatus::AuthorizedWhenInUse);
        let recorder = Arc::new(Recorder::default());
        manager.subscribe(recorder.clone());

        manager.set_location(Some(Coordinate::new(1.0, 2.0)));
        assert!(recorder.fixes.lock().is_empty());

        manager.start_updating_location();
        manager.set_location(Some(Coordinate::new(3.0, 4.0)));
        manager.set_location(None);

        assert_eq!(*recorder.fixes.lock(), vec![Coordinate::new(3.0, 4.0)]);
        assert_eq!(manager.location(), None);
    }

    #[test]
    fn test_closed_observers_are_pruned() {
        let manager = SimulatedLocationManager::new(AuthorizationStatus::NotDetermined);
        let gone = Arc::new(Recorder::default());
        let live = Arc::new(Recorder::default());
        manager.subscribe(gone.clone());
        manager.subscribe(live.clone());
        assert_eq!(manager.observer_count(), 2);

        *gone.closed.lock() = true;
        manager.set_status(AuthorizationStatus::Denied);

        assert_eq!(manager.observer_count(), 1);
        assert!(gone.statuses.lock().is_empty());
        assert_eq!(*live.statuses.lock(), vec![AuthorizationStatus::Denied]);
    }

    #[test]
    fn test_from_config() {
        let config = DeviceConfig {
            latitude: Some(35.1796),
            longitude: Some(129.0756),
            authorization: AuthorizationSetting::AuthorizedAlways,
            prompt_answer: AuthorizationSetting::Denied,
            services_enabled: false,
        };
        let manager = SimulatedLocationManager::from_config(&config);

        assert_eq!(
            manager.authorization_status(),
            AuthorizationStatus::AuthorizedAlways
        );
        assert_eq!(manager.location(), Some(Coordinate::new(35.1796, 129.0756)));
        assert!(!manager.services_enabled());
    }
}
