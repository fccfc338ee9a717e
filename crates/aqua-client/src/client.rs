//! HTTP client for the controller's REST API.

use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;

use crate::connection::ControllerAddress;
use crate::error::{ClientError, Result};
use crate::state::{
    light_values, top_off_values, ControllerState, ControllerValues, LightMode,
};

/// Controller the dashboard talks to by default.
pub const DEFAULT_CONTROLLER_ID: &str = "aqua";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to wait for the TCP/TLS connection
    pub connect_timeout: Duration,
    /// Timeout for a whole request, including the body
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    controller_id: &'a str,
    values: &'a ControllerValues,
}

/// Reads and writes the values of one controller.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: Client,
    address: ControllerAddress,
    controller_id: String,
}

impl DeviceClient {
    /// Client for `controller_id` behind `address`.
    pub fn new(
        address: ControllerAddress,
        controller_id: impl Into<String>,
        config: &ClientConfig,
    ) -> Result<Self> {
        let controller_id = controller_id.into();
        if controller_id.trim().is_empty() {
            return Err(ClientError::InvalidValue("controller id cannot be empty".into()));
        }
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(concat!("aquarium/", env!("CARGO_PKG_VERSION")))
            .build()?;

        tracing::debug!(
            address = %address,
            source = address.source().label(),
            controller = %controller_id,
            "Device client ready"
        );
        Ok(Self {
            http,
            address,
            controller_id,
        })
    }

    /// API base this client talks to.
    #[must_use]
    pub fn address(&self) -> &ControllerAddress {
        &self.address
    }

    /// Controller identity.
    #[must_use]
    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    /// Fetch the current state.
    pub async fn get_state(&self) -> Result<ControllerState> {
        let url = self
            .address
            .endpoint(&format!("controller/{}", self.controller_id));
        tracing::debug!(%url, "Fetching controller state");

        let response = check_status(self.http.get(&url).send().await?, &url)?;
        let body = response.bytes().await?;
        let state: ControllerState = serde_json::from_slice(&body)?;
        tracing::trace!(values = state.values.len(), "Controller state received");
        Ok(state)
    }

    /// Write `values`, then re-fetch and return the resulting state.
    pub async fn send_values(&self, values: &ControllerValues) -> Result<ControllerState> {
        if values.is_empty() {
            return Err(ClientError::InvalidValue("nothing to send".into()));
        }
        let url = self.address.endpoint("updateController");
        let request = UpdateRequest {
            controller_id: &self.controller_id,
            values,
        };
        tracing::info!(
            controller = %self.controller_id,
            names = ?values.keys().collect::<Vec<_>>(),
            "Updating controller values"
        );

        check_status(self.http.post(&url).json(&request).send().await?, &url)?;
        self.get_state().await
    }

    /// Switch the lights, keeping sunlight and moonlight exclusive.
    pub async fn set_light(&self, mode: LightMode) -> Result<ControllerState> {
        let current = self.get_state().await?;
        if current.light_mode() == mode {
            tracing::debug!(mode = mode.label(), "Lights already in requested mode");
        }
        self.send_values(&light_values(mode, &current)).await
    }

    /// Run the top-off pump for `duration`.
    pub async fn top_off(&self, duration: Duration) -> Result<ControllerState> {
        self.send_values(&top_off_values(duration)?).await
    }
}

fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        tracing::warn!(%url, status = status.as_u16(), "Controller request failed");
        Err(ClientError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::AddressSource;

    #[test]
    fn test_new_rejects_empty_controller_id() {
        let err = DeviceClient::new(ControllerAddress::default(), "  ", &ClientConfig::default())
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidValue(_)));
    }

    #[test]
    fn test_client_keeps_address_and_id() {
        let address = ControllerAddress::parse("tank.local/api", AddressSource::Config).unwrap();
        let client = DeviceClient::new(address, "aqua", &ClientConfig::default()).unwrap();
        assert_eq!(client.address().as_str(), "http://tank.local:8080/api");
        assert_eq!(client.controller_id(), "aqua");
    }

    #[test]
    fn test_update_request_body() {
        let values = ControllerValues::from([("sunlight".to_string(), serde_json::json!(1))]);
        let body = serde_json::to_value(UpdateRequest {
            controller_id: "aqua",
            values: &values,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "controllerId": "aqua", "values": { "sunlight": 1 } })
        );
    }

    #[tokio::test]
    async fn test_send_values_rejects_empty_update() {
        let client =
            DeviceClient::new(ControllerAddress::default(), "aqua", &ClientConfig::default())
                .unwrap();
        let err = client.send_values(&ControllerValues::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidValue(_)));
    }
}
