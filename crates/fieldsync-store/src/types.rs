//! Project and device data model.
//!
//! Every identifier and secret here is exactly [`KEY_LEN`] bytes and travels
//! as 64 hex characters. Secrets (`ProjectKey`, `EncryptionKey`) redact
//! themselves in `Debug` output; public ids and device ids do not.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseKeyError;

/// Length in bytes of every key and identifier.
pub const KEY_LEN: usize = 32;

fn parse_hex32(s: &str) -> Result<[u8; KEY_LEN], ParseKeyError> {
    if s.len() != KEY_LEN * 2 {
        return Err(ParseKeyError::Length {
            expected: KEY_LEN * 2,
            actual: s.len(),
        });
    }
    if s.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(ParseKeyError::Uppercase);
    }
    let mut out = [0u8; KEY_LEN];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

macro_rules! hex32 {
    ($(#[$meta:meta])* $name:ident, $debug:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; KEY_LEN]);

        impl $name {
            /// Wrap raw bytes.
            pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
                &self.0
            }

            /// Lowercase hex encoding.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseKeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex32(s).map(Self)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseKeyError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.to_hex()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let render: fn(&$name) -> String = $debug;
                write!(f, "{}({})", stringify!($name), render(self))
            }
        }
    };
}

hex32!(
    /// Non-secret project identifier derived one-way from a [`ProjectKey`].
    PublicId,
    |id| id.to_hex()
);

hex32!(
    /// Secret key identifying a project.
    ProjectKey,
    |_| "<redacted>".to_string()
);

hex32!(
    /// One of the five per-namespace project encryption keys.
    EncryptionKey,
    |_| "<redacted>".to_string()
);

hex32!(
    /// Identifier of a device, including this server.
    DeviceId,
    |id| id.to_hex()
);

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl DeviceId {
    /// Generate a fresh random device id.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

/// The five encryption keys of a project. Each is supplied independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKeys {
    pub auth: EncryptionKey,
    pub config: EncryptionKey,
    pub data: EncryptionKey,
    pub blob_index: EncryptionKey,
    pub blob: EncryptionKey,
}

/// A registered project as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub public_id: PublicId,
    pub name: String,
    pub project_key: ProjectKey,
    pub encryption_keys: EncryptionKeys,
    /// Registration time, unix milliseconds.
    pub created_at: u64,
    /// Set once ongoing sync has been started for the project.
    #[serde(default)]
    pub sync_enabled: bool,
}

/// Public view of a registered project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub public_id: PublicId,
    pub name: String,
}

/// Handle to an existing project, as returned by
/// [`ProjectStore::get_project`](crate::ProjectStore::get_project).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectHandle {
    pub public_id: PublicId,
    pub name: String,
}

impl From<&ProjectRecord> for ProjectHandle {
    fn from(record: &ProjectRecord) -> Self {
        Self {
            public_id: record.public_id,
            name: record.name.clone(),
        }
    }
}

/// Kind of device announced in a [`DeviceIdentity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
    SelfHostedServer,
    #[default]
    Unspecified,
}

/// Extra announcement data for self-hosted servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfHostedServerDetails {
    /// URL clients should use to reach this server.
    pub base_url: String,
}

/// The server's own self-announced identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_hosted_server_details: Option<SelfHostedServerDetails>,
}

impl DeviceIdentity {
    /// A fresh identity with a random device id and no name.
    pub fn generate() -> Self {
        Self {
            device_id: DeviceId::random(),
            name: String::new(),
            device_type: DeviceType::Unspecified,
            self_hosted_server_details: None,
        }
    }

    /// Base URL currently announced, if any.
    pub fn base_url(&self) -> Option<&str> {
        self.self_hosted_server_details
            .as_ref()
            .map(|d| d.base_url.as_str())
    }
}
