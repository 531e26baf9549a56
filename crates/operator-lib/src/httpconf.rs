//! TLS config for the Vertica http server, built from a kubernetes.io/tls
//! secret

use crate::error::{ReconcileError, Result};
use crate::names::NamespacedName;
use crate::platform::PlatformApi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TLS_KEY: &str = "tls.key";
pub const TLS_CERT: &str = "tls.crt";
pub const CA_CERT: &str = "ca.crt";

/// Contents of httpstls.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpsTlsConf {
    pub name: String,
    pub private_key: String,
    pub certificate: String,
    pub ca_certificate: String,
}

impl HttpsTlsConf {
    pub fn from_secret_data(data: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        Ok(Self {
            name: "server".to_string(),
            private_key: secret_value(data, TLS_KEY)?,
            certificate: secret_value(data, TLS_CERT)?,
            ca_certificate: secret_value(data, CA_CERT)?,
        })
    }
}

fn secret_value(data: &BTreeMap<String, Vec<u8>>, key: &str) -> Result<String> {
    let raw = data.get(key).ok_or_else(|| ReconcileError::Parse {
        what: "http server secret",
        message: format!("missing key '{key}'"),
    })?;
    String::from_utf8(raw.clone()).map_err(|e| ReconcileError::Parse {
        what: "http server secret",
        message: format!("key '{key}' is not utf-8: {e}"),
    })
}

/// Read the secret and render the json file
pub async fn gen_conf(platform: &dyn PlatformApi, secret: &NamespacedName) -> Result<String> {
    let data = platform.get_secret_data(secret).await?;
    let conf = HttpsTlsConf::from_secret_data(&data)?;
    Ok(serde_json::to_string_pretty(&conf)?)
}
