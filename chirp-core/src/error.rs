use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker session is closed")]
    Closed,
    #[error("broker refused connection: {0}")]
    Refused(String),
    #[error("no broker acknowledgement within {0:?}")]
    ConnectTimeout(std::time::Duration),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("device profile {0} not found")]
    ProfileNotFound(String),
    #[error("application {0} not found")]
    ApplicationNotFound(String),
    #[error("registry has no tenant and refused to create one")]
    NoTenant,
}
