//! Subset of the ChirpStack v4 `api` package used by the registry client.
//! Field tags follow the upstream `.proto` definitions.

use std::collections::HashMap;

use prost_types::Timestamp;

pub const TENANT_LIST: &str = "/api.TenantService/List";
pub const TENANT_CREATE: &str = "/api.TenantService/Create";
pub const APPLICATION_LIST: &str = "/api.ApplicationService/List";
pub const APPLICATION_CREATE: &str = "/api.ApplicationService/Create";
pub const APPLICATION_GET: &str = "/api.ApplicationService/Get";
pub const DEVICE_LIST: &str = "/api.DeviceService/List";
pub const DEVICE_GET: &str = "/api.DeviceService/Get";
pub const DEVICE_PROFILE_GET: &str = "/api.DeviceProfileService/Get";

#[derive(Clone, PartialEq, prost::Message)]
pub struct Tenant {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(bool, tag = "4")]
    pub can_have_gateways: bool,
    #[prost(uint32, tag = "5")]
    pub max_gateway_count: u32,
    #[prost(uint32, tag = "6")]
    pub max_device_count: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TenantListItem {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "4")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListTenantsRequest {
    #[prost(uint32, tag = "1")]
    pub limit: u32,
    #[prost(uint32, tag = "2")]
    pub offset: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListTenantsResponse {
    #[prost(uint32, tag = "1")]
    pub total_count: u32,
    #[prost(message, repeated, tag = "2")]
    pub result: Vec<TenantListItem>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateTenantRequest {
    #[prost(message, optional, tag = "1")]
    pub tenant: Option<Tenant>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateResponse {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Application {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, tag = "4")]
    pub tenant_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ApplicationListItem {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "4")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListApplicationsRequest {
    #[prost(uint32, tag = "1")]
    pub limit: u32,
    #[prost(uint32, tag = "2")]
    pub offset: u32,
    #[prost(string, tag = "4")]
    pub tenant_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListApplicationsResponse {
    #[prost(uint32, tag = "1")]
    pub total_count: u32,
    #[prost(message, repeated, tag = "2")]
    pub result: Vec<ApplicationListItem>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateApplicationRequest {
    #[prost(message, optional, tag = "1")]
    pub application: Option<Application>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetApplicationRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetApplicationResponse {
    #[prost(message, optional, tag = "1")]
    pub application: Option<Application>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceStatus {
    #[prost(int32, tag = "1")]
    pub margin: i32,
    #[prost(bool, tag = "2")]
    pub external_power_source: bool,
    #[prost(float, tag = "3")]
    pub battery_level: f32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceListItem {
    #[prost(string, tag = "1")]
    pub dev_eui: String,
    #[prost(message, optional, tag = "4")]
    pub last_seen_at: Option<Timestamp>,
    #[prost(string, tag = "5")]
    pub name: String,
    #[prost(string, tag = "6")]
    pub description: String,
    #[prost(string, tag = "7")]
    pub device_profile_id: String,
    #[prost(string, tag = "8")]
    pub device_profile_name: String,
    #[prost(message, optional, tag = "9")]
    pub device_status: Option<DeviceStatus>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListDevicesRequest {
    #[prost(uint32, tag = "1")]
    pub limit: u32,
    #[prost(uint32, tag = "2")]
    pub offset: u32,
    #[prost(string, tag = "4")]
    pub application_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListDevicesResponse {
    #[prost(uint32, tag = "1")]
    pub total_count: u32,
    #[prost(message, repeated, tag = "2")]
    pub result: Vec<DeviceListItem>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Device {
    #[prost(string, tag = "1")]
    pub dev_eui: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(string, tag = "4")]
    pub application_id: String,
    #[prost(string, tag = "5")]
    pub device_profile_id: String,
    #[prost(bool, tag = "7")]
    pub is_disabled: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetDeviceRequest {
    #[prost(string, tag = "1")]
    pub dev_eui: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetDeviceResponse {
    #[prost(message, optional, tag = "1")]
    pub device: Option<Device>,
    #[prost(message, optional, tag = "4")]
    pub last_seen_at: Option<Timestamp>,
    #[prost(message, optional, tag = "5")]
    pub device_status: Option<DeviceStatus>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Measurement {
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "3")]
    pub kind: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeviceProfile {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub tenant_id: String,
    #[prost(string, tag = "3")]
    pub name: String,
    /// `common.MacVersion` enum code.
    #[prost(int32, tag = "6")]
    pub mac_version: i32,
    #[prost(string, tag = "10")]
    pub payload_codec_script: String,
    /// Seconds.
    #[prost(uint32, tag = "12")]
    pub uplink_interval: u32,
    #[prost(map = "string, message", tag = "27")]
    pub measurements: HashMap<String, Measurement>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetDeviceProfileRequest {
    #[prost(string, tag = "1")]
    pub id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct GetDeviceProfileResponse {
    #[prost(message, optional, tag = "1")]
    pub device_profile: Option<DeviceProfile>,
}
