//! yavirtd Data Model
//!
//! Request and reply types shared by every transport. On the HTTP wire they
//! are JSON objects with PascalCase keys (acronyms upper-cased, e.g. `ID`,
//! `CPU`) and byte fields encoded as base64 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Host resources reported by the daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HostInfo {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "CPU")]
    pub cpu: i64,
    pub mem: i64,
    pub storage: i64,
    #[serde(with = "base64_map")]
    pub resources: HashMap<String, Vec<u8>>,
}

/// A managed virtual machine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Guest {
    #[serde(rename = "ID")]
    pub id: String,
    pub status: String,
    pub transit_status: String,
    pub create_time: i64,
    pub transit_time: i64,
    pub update_time: i64,
    #[serde(rename = "CPU")]
    pub cpu: i64,
    pub mem: i64,
    pub storage: i64,
    #[serde(rename = "ImageID")]
    pub image_id: i64,
    pub image_name: String,
    pub image_user: String,
    pub networks: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    #[serde(rename = "IPs")]
    pub ips: Vec<String>,
    pub hostname: String,
    pub running: bool,
}

/// Filters for listing guest ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct GetGuestIdListReq {
    pub filters: HashMap<String, String>,
}

/// Parameters for creating a guest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CreateGuestReq {
    #[serde(rename = "CPU")]
    pub cpu: i64,
    pub mem: i64,
    pub image_name: String,
    pub image_user: String,
    pub volumes: HashMap<String, i64>,
    #[serde(rename = "DmiUUID")]
    pub dmi_uuid: String,
    pub labels: HashMap<String, String>,
    #[serde(rename = "AncestorID")]
    pub ancestor_id: String,
    pub cmd: Vec<String>,
    pub lambda: bool,
    pub stdin: bool,
    #[serde(with = "base64_map")]
    pub resources: HashMap<String, Vec<u8>>,
}

/// Plain textual reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Msg {
    pub msg: String,
}

impl Msg {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// Options for attaching to a guest console
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct AttachGuestFlags {
    pub force: bool,
    pub safe: bool,
}

/// Output of a batch command run inside a guest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ExecuteGuestMessage {
    pub pid: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(with = "saturating_i32")]
    pub exit_code: i32,
}

/// Parameters for resizing a guest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ResizeGuestReq {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "CPU")]
    pub cpu: i64,
    pub mem: i64,
    pub volumes: HashMap<String, i64>,
    #[serde(with = "base64_map")]
    pub resources: HashMap<String, Vec<u8>>,
}

/// Parameters for capturing a guest into a user image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CaptureGuestReq {
    #[serde(rename = "ID")]
    pub id: String,
    pub user: String,
    pub name: String,
    pub overridden: bool,
}

/// Image produced by capturing a guest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct UserImage {
    #[serde(rename = "ID")]
    pub id: i64,
    pub name: String,
    pub distro: String,
    pub latest_version: i64,
    pub size: i64,
}

/// Parameters for plugging a guest into a network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ConnectNetworkReq {
    pub network: String,
    #[serde(rename = "IPv4")]
    pub ipv4: String,
    #[serde(rename = "ID")]
    pub id: String,
}

/// Parameters for unplugging a guest from a network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct DisconnectNetworkReq {
    pub network: String,
    #[serde(rename = "ID")]
    pub id: String,
}

/// Lifecycle event published by the daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct EventMessage {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub action: String,
    pub time_nano: i64,
}

impl EventMessage {
    /// Event time as a UTC timestamp
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.time_nano)
    }
}

/// A network known to the daemon
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Network {
    pub name: String,
    /// Subnets in CIDR notation
    pub subnets: Vec<String>,
}

/// Result of waiting for a guest to stop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WaitResult {
    pub msg: String,
    #[serde(with = "saturating_i32")]
    pub code: i32,
}

/// A volume snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Snapshot {
    #[serde(rename = "VolID")]
    pub vol_id: String,
    pub vol_mount_dir: String,
    #[serde(rename = "SnapID")]
    pub snap_id: String,
    pub created_time: i64,
}

/// A system image stored on the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SysImage {
    pub name: String,
    pub user: String,
    pub distro: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub size: i64,
    pub digest: String,
}

/// Narrow a wire `int64` to `i32`, saturating at the bounds
pub(crate) fn saturate_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Exit codes travel as 64-bit integers; out-of-range values saturate
pub(crate) mod saturating_i32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        let wide = Option::<i64>::deserialize(deserializer)?.unwrap_or_default();
        Ok(super::saturate_i32(wide))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_map {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        map: &HashMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, value) in map {
            out.serialize_entry(key, &STANDARD.encode(value))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<String, Vec<u8>>, D::Error> {
        let encoded = Option::<HashMap<String, String>>::deserialize(deserializer)?
            .unwrap_or_default();
        encoded
            .into_iter()
            .map(|(key, value)| {
                STANDARD
                    .decode(value.as_bytes())
                    .map(|bytes| (key, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}
