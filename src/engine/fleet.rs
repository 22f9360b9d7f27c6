use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn check_name(name: Option<&str>) -> Result<(), EngineError> {
    if name.is_some_and(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::Validation("name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn register_vehicle(&self, id: Ulid, name: Option<String>) -> Result<Vehicle, EngineError> {
        check_name(name.as_deref())?;
        if self.store.vehicle_count() >= MAX_VEHICLES_PER_FLEET {
            return Err(EngineError::Validation("too many vehicles"));
        }
        let _guard = self.vehicle_locks.lock(id).await;
        if self.store.contains_vehicle(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let vehicle = Vehicle::new(id, name, self.now());
        self.persist(Event::VehiclePut(vehicle.clone())).await?;
        tracing::info!("registered vehicle {id}");
        Ok(vehicle)
    }

    pub async fn register_driver(&self, id: Ulid, name: Option<String>) -> Result<Driver, EngineError> {
        check_name(name.as_deref())?;
        if self.store.driver_count() >= MAX_DRIVERS_PER_FLEET {
            return Err(EngineError::Validation("too many drivers"));
        }
        let _guard = self.driver_locks.lock(id).await;
        if self.store.contains_driver(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let driver = Driver::new(id, name, self.now());
        self.persist(Event::DriverPut(driver.clone())).await?;
        tracing::info!("registered driver {id}");
        Ok(driver)
    }
}
