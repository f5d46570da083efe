use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use super::bot_api::{
    error_message, BotApi, ConfigMap, InputAck, InputRequest, OutputResponse, StatusResponse,
};
use crate::sync::transport::TransportError;

/// [`BotApi`] over the bot server's JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpBotApi {
    client: Client,
    base_url: String,
}

impl HttpBotApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            code: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn get_config(&self) -> Result<Value, TransportError> {
        let response = self.send(self.client.get(self.url("config"))).await?;
        Self::decode(response).await
    }

    async fn save_config(&self, config: &ConfigMap) -> Result<(), TransportError> {
        self.send(self.client.post(self.url("config")).json(config))
            .await
            .map(|_| ())
    }

    async fn get_status(&self) -> Result<StatusResponse, TransportError> {
        let response = self.send(self.client.get(self.url("status"))).await?;
        Self::decode(response).await
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.send(self.client.post(self.url("start")))
            .await
            .map(|_| ())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.send(self.client.post(self.url("stop")))
            .await
            .map(|_| ())
    }

    async fn get_output(&self) -> Result<OutputResponse, TransportError> {
        let response = self.send(self.client.get(self.url("output"))).await?;
        Self::decode(response).await
    }

    async fn send_input(&self, input: &str) -> Result<InputAck, TransportError> {
        let response = self
            .send(self.client.post(self.url("input")).json(&InputRequest { input }))
            .await?;
        // Delivery is already acknowledged by the status code; the body is advisory.
        Ok(response.json::<InputAck>().await.unwrap_or_default())
    }
}
