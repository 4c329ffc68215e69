/*!
 * Driver catalog.
 *
 * Maps driver names to profiles and creates drivers from them. Profiles are
 * shared: every driver instantiated from the same entry holds the same
 * `Arc<DriverProfile>`.
 */
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use avlink_engine::{Driver, DriverProfile, DriverSettings};

use crate::drivers::BUILTIN;
use crate::error::{Error, Result};

/// Capacity of the event channel
const EVENT_CAPACITY: usize = 100;

/// Catalog change notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    /// A profile was registered
    ProfileAdded(String),
    /// A profile was removed
    ProfileRemoved(String),
}

/// Named driver profiles
#[derive(Debug)]
pub struct DriverCatalog {
    profiles: RwLock<BTreeMap<String, Arc<DriverProfile>>>,
    event_sender: broadcast::Sender<CatalogEvent>,
}

impl DriverCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            profiles: RwLock::new(BTreeMap::new()),
            event_sender,
        }
    }

    /// Create a catalog holding every built-in profile
    pub fn with_builtin() -> Result<Self> {
        let catalog = Self::new();
        for (name, build) in BUILTIN {
            catalog.register(*name, build()?)?;
        }
        info!("Loaded {} built-in driver profiles", BUILTIN.len());
        Ok(catalog)
    }

    /// Register a profile under `name`
    pub fn register<S: Into<String>>(&self, name: S, profile: DriverProfile) -> Result<()> {
        let name = name.into();
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| Error::other("Failed to acquire write lock on driver catalog"))?;

        if profiles.contains_key(&name) {
            return Err(Error::DuplicateDriver(name));
        }

        debug!(driver = %name, manufacturer = %profile.metadata.manufacturer, "Registered driver profile");
        profiles.insert(name.clone(), Arc::new(profile));
        let _ = self.event_sender.send(CatalogEvent::ProfileAdded(name));

        Ok(())
    }

    /// Remove the profile registered under `name`
    ///
    /// Drivers already created from it keep working.
    pub fn unregister(&self, name: &str) -> Result<Arc<DriverProfile>> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| Error::other("Failed to acquire write lock on driver catalog"))?;

        let profile = profiles.remove(name).ok_or_else(|| Error::unknown_driver(name))?;
        let _ = self
            .event_sender
            .send(CatalogEvent::ProfileRemoved(name.to_string()));
        debug!(driver = %name, "Unregistered driver profile");

        Ok(profile)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Result<Vec<String>> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| Error::other("Failed to acquire read lock on driver catalog"))?;

        Ok(profiles.keys().cloned().collect())
    }

    /// The profile registered under `name`
    pub fn profile(&self, name: &str) -> Result<Arc<DriverProfile>> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| Error::other("Failed to acquire read lock on driver catalog"))?;

        profiles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_driver(name))
    }

    /// Create a driver from the profile registered under `name`
    pub fn instantiate(&self, name: &str, settings: DriverSettings) -> Result<Driver> {
        Ok(Driver::new(self.profile(name)?, settings))
    }

    /// Whether a profile is registered under `name`
    pub fn contains(&self, name: &str) -> Result<bool> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| Error::other("Failed to acquire read lock on driver catalog"))?;

        Ok(profiles.contains_key(name))
    }

    /// Number of registered profiles
    pub fn len(&self) -> Result<usize> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| Error::other("Failed to acquire read lock on driver catalog"))?;

        Ok(profiles.len())
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Subscribe to catalog changes
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.event_sender.subscribe()
    }
}

impl Default for DriverCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{kramer, symetrix, visca};
    use avlink_engine::{args, TransportKind};

    #[test_log::test]
    fn test_builtin_catalog() {
        let catalog = DriverCatalog::with_builtin().unwrap();
        let names = catalog.names().unwrap();
        assert_eq!(names.len(), BUILTIN.len());
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(catalog.contains(symetrix::NAME).unwrap());

        let profile = catalog.profile(visca::NAME).unwrap();
        assert_eq!(profile.transport.kind, TransportKind::Udp);
        assert_eq!(profile.transport.port, Some(1259));
    }

    #[test]
    fn test_instantiate_shares_profile() {
        let catalog = DriverCatalog::with_builtin().unwrap();
        let mut a = catalog.instantiate(kramer::NAME, DriverSettings::default()).unwrap();
        let b = catalog.instantiate(kramer::NAME, DriverSettings::default()).unwrap();
        assert!(Arc::ptr_eq(a.profile(), b.profile()));

        tokio_test::assert_ok!(a.build_command("GetButtonRGB", &args! { "button" => 2 }));
        assert_eq!(a.pending_count(), 1);
        assert_eq!(b.pending_count(), 0);
    }

    #[test]
    fn test_unknown_and_duplicate() {
        let catalog = DriverCatalog::new();
        assert!(catalog.is_empty().unwrap());
        assert!(matches!(
            catalog.instantiate("nope", DriverSettings::default()),
            Err(Error::UnknownDriver(name)) if name == "nope"
        ));

        catalog.register("kramer", kramer::profile().unwrap()).unwrap();
        assert!(matches!(
            catalog.register("kramer", kramer::profile().unwrap()),
            Err(Error::DuplicateDriver(_))
        ));
    }

    #[test]
    fn test_events() {
        let catalog = DriverCatalog::new();
        let mut rx = catalog.subscribe();

        catalog.register("a", kramer::profile().unwrap()).unwrap();
        let removed = catalog.unregister("a").unwrap();
        assert_eq!(removed.metadata.manufacturer, "Kramer");
        assert!(catalog.unregister("a").is_err());

        assert_eq!(rx.try_recv().unwrap(), CatalogEvent::ProfileAdded("a".to_string()));
        assert_eq!(rx.try_recv().unwrap(), CatalogEvent::ProfileRemoved("a".to_string()));
    }
}
