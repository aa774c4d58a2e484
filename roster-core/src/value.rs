//! Decoded registry values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered microservice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "serviceId", alias = "serviceid")]
    pub service_id: String,
    #[serde(rename = "appId", alias = "appid", default)]
    pub app_id: String,
    #[serde(rename = "serviceName", alias = "servicename", default)]
    pub service_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(rename = "modTimestamp", alias = "modtimestamp", default, skip_serializing_if = "String::is_empty")]
    pub mod_timestamp: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// A running instance of a service, usually bound to a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "instanceId", alias = "instanceid")]
    pub instance_id: String,
    #[serde(rename = "serviceId", alias = "serviceid", default)]
    pub service_id: String,
    #[serde(rename = "hostName", alias = "hostname", default)]
    pub host_name: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(rename = "modTimestamp", alias = "modtimestamp", default, skip_serializing_if = "String::is_empty")]
    pub mod_timestamp: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// Typed value of a key-value entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Map(serde_json::Map<String, serde_json::Value>),
    Service(Service),
    Instance(Instance),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            Value::Service(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Instance(i) => Some(i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Service> for Value {
    fn from(s: Service) -> Self {
        Value::Service(s)
    }
}

impl From<Instance> for Value {
    fn from(i: Instance) -> Self {
        Value::Instance(i)
    }
}
