use crate::error::RegistryError;
use crate::model::{
    Application, DeviceDetails, DeviceProfile, DeviceSummary, Tenant, Visibility,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_TENANT_NAME: &str = "HA owned";
pub const DEFAULT_APPLICATION_NAME: &str = "HA integration";

/// Read access to the LoRaWAN network server's device registry.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<Tenant>>;
    async fn create_tenant(&self, name: &str) -> Result<String>;

    async fn list_applications(&self, tenant_id: &str) -> Result<Vec<Application>>;
    async fn create_application(&self, tenant_id: &str, name: &str) -> Result<String>;
    async fn get_application(&self, id: &str) -> Result<Option<Application>>;

    async fn list_devices(&self, application_id: &str) -> Result<Vec<DeviceSummary>>;
    async fn get_device(&self, dev_eui: &str) -> Result<DeviceDetails>;
    async fn get_device_profile(&self, id: &str) -> Result<DeviceProfile>;

    /// Last-seen time and expected uplink interval for one device.
    async fn visibility(&self, dev_eui: &str) -> Result<Visibility> {
        let device = self.get_device(dev_eui).await?;
        let profile = self.get_device_profile(&device.device_profile_id).await?;
        let interval = (profile.uplink_interval > 0)
            .then(|| Duration::from_secs(u64::from(profile.uplink_interval)));
        Ok(Visibility { last_seen: device.last_seen, uplink_interval: interval })
    }
}

/// Returns the application to bridge. A configured id wins when it exists;
/// otherwise the first tenant and first application are used, creating
/// both when the registry is empty.
pub async fn resolve_application(
    registry: &dyn Registry,
    configured: Option<&str>,
) -> Result<String> {
    if let Some(id) = configured.filter(|id| !id.is_empty()) {
        if registry.get_application(id).await?.is_some() {
            return Ok(id.to_string());
        }
        tracing::warn!("configured application {id} not found, selecting one");
    }

    let tenant_id = match registry.list_tenants().await?.into_iter().next() {
        Some(tenant) => tenant.id,
        None => {
            info!("registry has no tenant, creating \"{DEFAULT_TENANT_NAME}\"");
            let id = registry.create_tenant(DEFAULT_TENANT_NAME).await?;
            if id.is_empty() {
                return Err(RegistryError::NoTenant.into());
            }
            id
        }
    };

    match registry.list_applications(&tenant_id).await?.into_iter().next() {
        Some(app) => Ok(app.id),
        None => {
            info!("tenant {tenant_id} has no application, creating \"{DEFAULT_APPLICATION_NAME}\"");
            registry.create_application(&tenant_id, DEFAULT_APPLICATION_NAME).await
        }
    }
}

#[derive(Default, Clone)]
pub struct InMemoryRegistry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    tenants: Vec<Tenant>,
    applications: Vec<Application>,
    devices: BTreeMap<String, StoredDevice>,
    profiles: BTreeMap<String, DeviceProfile>,
    next_id: u64,
}

struct StoredDevice {
    application_id: String,
    summary: DeviceSummary,
    details: DeviceDetails,
}

impl InMemoryRegistry {
    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("registry lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("registry lock poisoned"))
    }

    pub fn add_application(&self, tenant_id: &str, id: &str, name: &str) -> Result<()> {
        let mut g = self.write()?;
        if !g.tenants.iter().any(|t| t.id == tenant_id) {
            g.tenants.push(Tenant { id: tenant_id.to_string(), name: tenant_id.to_string() });
        }
        g.applications.push(Application {
            id: id.to_string(),
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
        });
        Ok(())
    }

    pub fn upsert_profile(&self, profile: DeviceProfile) -> Result<()> {
        self.write()?.profiles.insert(profile.id.clone(), profile);
        Ok(())
    }

    pub fn upsert_device(
        &self,
        application_id: &str,
        summary: DeviceSummary,
        details: DeviceDetails,
    ) -> Result<()> {
        let stored =
            StoredDevice { application_id: application_id.to_string(), summary, details };
        self.write()?.devices.insert(stored.summary.dev_eui.clone(), stored);
        Ok(())
    }

    pub fn remove_device(&self, dev_eui: &str) -> Result<()> {
        self.write()?.devices.remove(dev_eui);
        Ok(())
    }

    pub fn set_last_seen(
        &self,
        dev_eui: &str,
        last_seen: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<()> {
        let mut g = self.write()?;
        let device = g
            .devices
            .get_mut(dev_eui)
            .ok_or_else(|| RegistryError::DeviceNotFound(dev_eui.to_string()))?;
        device.details.last_seen = last_seen;
        Ok(())
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.read()?.tenants.clone())
    }

    async fn create_tenant(&self, name: &str) -> Result<String> {
        let mut g = self.write()?;
        g.next_id += 1;
        let id = format!("tenant-{}", g.next_id);
        g.tenants.push(Tenant { id: id.clone(), name: name.to_string() });
        Ok(id)
    }

    async fn list_applications(&self, tenant_id: &str) -> Result<Vec<Application>> {
        let g = self.read()?;
        Ok(g.applications.iter().filter(|a| a.tenant_id == tenant_id).cloned().collect())
    }

    async fn create_application(&self, tenant_id: &str, name: &str) -> Result<String> {
        let mut g = self.write()?;
        g.next_id += 1;
        let id = format!("application-{}", g.next_id);
        g.applications.push(Application {
            id: id.clone(),
            name: name.to_string(),
            tenant_id: tenant_id.to_string(),
        });
        Ok(id)
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        Ok(self.read()?.applications.iter().find(|a| a.id == id).cloned())
    }

    async fn list_devices(&self, application_id: &str) -> Result<Vec<DeviceSummary>> {
        let g = self.read()?;
        Ok(g.devices
            .values()
            .filter(|d| d.application_id == application_id)
            .map(|d| d.summary.clone())
            .collect())
    }

    async fn get_device(&self, dev_eui: &str) -> Result<DeviceDetails> {
        let g = self.read()?;
        g.devices
            .get(dev_eui)
            .map(|d| d.details.clone())
            .ok_or_else(|| RegistryError::DeviceNotFound(dev_eui.to_string()).into())
    }

    async fn get_device_profile(&self, id: &str) -> Result<DeviceProfile> {
        let g = self.read()?;
        g.profiles
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::ProfileNotFound(id.to_string()).into())
    }
}
