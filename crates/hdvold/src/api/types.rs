//! Volume plugin protocol messages.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use hdvol::{Scope, VolumeInfo};

/// Request naming a single volume.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    /// Volume name.
    #[serde(default)]
    pub name: String,
}

/// `/VolumeDriver.Create` request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Driver options (`-o key=value`).
    #[serde(default)]
    pub opts: Option<HashMap<String, String>>,
}

/// `/VolumeDriver.Mount` and `/VolumeDriver.Unmount` request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// Caller identifier.
    #[serde(rename = "ID", default)]
    pub id: String,
}

/// Response with no payload.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

/// Failure response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    #[serde(rename = "Err")]
    pub err: String,
}

/// `/Plugin.Activate` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    /// Implemented subsystems.
    pub implements: Vec<&'static str>,
}

/// Mount and path response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MountpointResponse {
    /// Host path of the volume.
    pub mountpoint: String,
}

/// A volume as reported to the host.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    /// Volume name.
    pub name: String,
    /// Host path of the volume.
    pub mountpoint: String,
    /// Creation time, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Driver specific details.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<&'static str, serde_json::Value>,
}

impl From<VolumeInfo> for Volume {
    fn from(info: VolumeInfo) -> Self {
        let mut status = BTreeMap::new();
        if let Some(device) = info.device {
            status.insert("device", device.into());
            status.insert("mounts", info.mount_count.into());
        }

        Self {
            name: info.name.to_string(),
            mountpoint: info.mountpoint.display().to_string(),
            created_at: info.created_at.map(|t| t.to_rfc3339()),
            status,
        }
    }
}

/// `/VolumeDriver.Get` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    /// The volume.
    pub volume: Volume,
}

/// `/VolumeDriver.List` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    /// All volumes.
    pub volumes: Vec<Volume>,
}

/// Driver capabilities.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesBody {
    /// `local` or `global`.
    pub scope: Scope,
}

/// `/VolumeDriver.Capabilities` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    /// Driver capabilities.
    pub capabilities: CapabilitiesBody,
}
