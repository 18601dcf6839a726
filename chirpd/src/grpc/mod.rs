use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chirp_core::{
    error::RegistryError,
    model::{Application, DeviceDetails, DeviceProfile, DeviceSummary, MacVersion, Tenant},
    registry::Registry,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use prost_types::Timestamp;
use tonic::{
    Code, Request, Status,
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    metadata::{Ascii, MetadataValue},
    transport::{Channel, Endpoint},
};
use tracing::{info, trace, warn};

pub mod pb;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Registry`] backed by the ChirpStack v4 gRPC API.
#[derive(Clone)]
pub struct ChirpstackRegistry {
    channel: Channel,
    bearer: Option<MetadataValue<Ascii>>,
}

impl ChirpstackRegistry {
    /// Opens a channel to `endpoint` (`http://host:port`).
    pub async fn connect(endpoint: &str, api_key: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .with_context(|| format!("invalid registry endpoint {endpoint}"))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await
            .with_context(|| format!("connect to registry {endpoint}"))?;
        info!("gRPC channel opened for {endpoint}");
        Self::with_channel(channel, api_key)
    }

    pub fn with_channel(channel: Channel, api_key: &str) -> Result<Self> {
        let bearer = if api_key.is_empty() {
            warn!("no API key configured, registry calls are unauthenticated");
            None
        } else {
            Some(format!("Bearer {api_key}").parse().context("API key is not valid ASCII")?)
        };
        Ok(Self { channel, bearer })
    }

    async fn call<Req, Resp>(&self, path: &'static str, message: Req) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("registry channel not ready: {e}")))?;

        let mut request = Request::new(message);
        if let Some(bearer) = &self.bearer {
            request.metadata_mut().insert("authorization", bearer.clone());
        }
        trace!("registry call {path}");
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc.unary(request, PathAndQuery::from_static(path), codec).await?;
        Ok(response.into_inner())
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        self.call(path, message).await.map_err(|status| {
            counter!("registry.call.failed").increment(1);
            anyhow::Error::new(status).context(format!("registry call {path}"))
        })
    }
}

#[async_trait]
impl Registry for ChirpstackRegistry {
    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let mut req = pb::ListTenantsRequest::default();
        let probe: pb::ListTenantsResponse = self.unary(pb::TENANT_LIST, req.clone()).await?;
        if probe.total_count == 0 {
            return Ok(Vec::new());
        }
        req.limit = probe.total_count;
        let resp: pb::ListTenantsResponse = self.unary(pb::TENANT_LIST, req).await?;
        Ok(resp.result.into_iter().map(|t| Tenant { id: t.id, name: t.name }).collect())
    }

    async fn create_tenant(&self, name: &str) -> Result<String> {
        let req = pb::CreateTenantRequest {
            tenant: Some(pb::Tenant {
                name: name.to_string(),
                can_have_gateways: true,
                max_gateway_count: 1,
                ..Default::default()
            }),
        };
        let resp: pb::CreateResponse = self.unary(pb::TENANT_CREATE, req).await?;
        info!("Tenant {name} (id {}) created", resp.id);
        Ok(resp.id)
    }

    async fn list_applications(&self, tenant_id: &str) -> Result<Vec<Application>> {
        let mut req =
            pb::ListApplicationsRequest { tenant_id: tenant_id.to_string(), ..Default::default() };
        let probe: pb::ListApplicationsResponse =
            self.unary(pb::APPLICATION_LIST, req.clone()).await?;
        if probe.total_count == 0 {
            return Ok(Vec::new());
        }
        req.limit = probe.total_count;
        let resp: pb::ListApplicationsResponse = self.unary(pb::APPLICATION_LIST, req).await?;
        Ok(resp
            .result
            .into_iter()
            .map(|a| Application { id: a.id, name: a.name, tenant_id: tenant_id.to_string() })
            .collect())
    }

    async fn create_application(&self, tenant_id: &str, name: &str) -> Result<String> {
        let req = pb::CreateApplicationRequest {
            application: Some(pb::Application {
                name: name.to_string(),
                tenant_id: tenant_id.to_string(),
                ..Default::default()
            }),
        };
        let resp: pb::CreateResponse = self.unary(pb::APPLICATION_CREATE, req).await?;
        info!("Application {name} (id {}, tenant {tenant_id}) created", resp.id);
        Ok(resp.id)
    }

    async fn get_application(&self, id: &str) -> Result<Option<Application>> {
        let req = pb::GetApplicationRequest { id: id.to_string() };
        match self.call::<_, pb::GetApplicationResponse>(pb::APPLICATION_GET, req).await {
            Ok(resp) => Ok(resp.application.map(|a| Application {
                id: a.id,
                name: a.name,
                tenant_id: a.tenant_id,
            })),
            // Malformed ids are rejected before lookup.
            Err(status) if matches!(status.code(), Code::NotFound | Code::InvalidArgument) => {
                Ok(None)
            }
            Err(status) => Err(anyhow::Error::new(status).context("registry call get application")),
        }
    }

    async fn list_devices(&self, application_id: &str) -> Result<Vec<DeviceSummary>> {
        let mut req = pb::ListDevicesRequest {
            application_id: application_id.to_string(),
            ..Default::default()
        };
        let probe: pb::ListDevicesResponse = self.unary(pb::DEVICE_LIST, req.clone()).await?;
        if probe.total_count == 0 {
            return Ok(Vec::new());
        }
        req.limit = probe.total_count;
        let resp: pb::ListDevicesResponse = self.unary(pb::DEVICE_LIST, req).await?;
        Ok(resp.result.into_iter().map(device_summary).collect())
    }

    async fn get_device(&self, dev_eui: &str) -> Result<DeviceDetails> {
        let req = pb::GetDeviceRequest { dev_eui: dev_eui.to_string() };
        let resp: pb::GetDeviceResponse = self.unary(pb::DEVICE_GET, req).await?;
        device_details(resp).ok_or_else(|| RegistryError::DeviceNotFound(dev_eui.to_string()).into())
    }

    async fn get_device_profile(&self, id: &str) -> Result<DeviceProfile> {
        let req = pb::GetDeviceProfileRequest { id: id.to_string() };
        let resp: pb::GetDeviceProfileResponse = self.unary(pb::DEVICE_PROFILE_GET, req).await?;
        resp.device_profile
            .map(device_profile)
            .ok_or_else(|| RegistryError::ProfileNotFound(id.to_string()).into())
    }
}

fn device_summary(item: pb::DeviceListItem) -> DeviceSummary {
    let status = item.device_status.as_ref();
    DeviceSummary {
        battery_level: status.map(|s| s.battery_level),
        external_power_source: status.is_some_and(|s| s.external_power_source),
        dev_eui: item.dev_eui,
        name: item.name,
        device_profile_id: item.device_profile_id,
    }
}

fn device_details(resp: pb::GetDeviceResponse) -> Option<DeviceDetails> {
    let device = resp.device?;
    Some(DeviceDetails {
        dev_eui: device.dev_eui,
        name: device.name,
        device_profile_id: device.device_profile_id,
        is_disabled: device.is_disabled,
        last_seen: resp.last_seen_at.and_then(to_datetime),
    })
}

fn device_profile(profile: pb::DeviceProfile) -> DeviceProfile {
    DeviceProfile {
        id: profile.id,
        name: profile.name,
        mac_version: MacVersion::from_code(profile.mac_version).map(|v| v.code_name().to_string()),
        payload_codec_script: profile.payload_codec_script,
        uplink_interval: profile.uplink_interval,
        measurements: profile.measurements.into_iter().map(|(key, m)| (key, m.name)).collect(),
    }
}

fn to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?)
}
