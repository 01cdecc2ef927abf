use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GreenApiInstance, WhatsAppGateway};
use crate::config::GreenApiConfig;
use crate::gateway::GatewayError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageResponse {
    id_message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateInstanceResponse {
    state_instance: String,
}

pub struct GreenApiClient {
    http: Client,
    api_url: String,
}

impl GreenApiClient {
    pub fn new(config: &GreenApiConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, instance: &GreenApiInstance, method: &str) -> String {
        format!(
            "{}/waInstance{}/{}/{}",
            self.api_url,
            instance.id,
            method,
            instance.token()
        )
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::status(status, body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl WhatsAppGateway for GreenApiClient {
    async fn send_message(
        &self,
        instance: &GreenApiInstance,
        chat_id: &str,
        message: &str,
    ) -> Result<String, GatewayError> {
        let response = self
            .http
            .post(self.method_url(instance, "sendMessage"))
            .json(&SendMessageRequest { chat_id, message })
            .send()
            .await?;
        let sent: SendMessageResponse = Self::read_json(response).await?;
        debug!(instance = %instance.id, chat_id, id_message = %sent.id_message, "Message sent");
        Ok(sent.id_message)
    }

    async fn instance_state(&self, instance: &GreenApiInstance) -> Result<String, GatewayError> {
        let response = self
            .http
            .get(self.method_url(instance, "getStateInstance"))
            .send()
            .await?;
        let state: StateInstanceResponse = Self::read_json(response).await?;
        Ok(state.state_instance)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer) -> GreenApiClient {
        GreenApiClient::new(&GreenApiConfig {
            api_url: format!("{}/", server.uri()),
            webhook_token: None,
            timeout_secs: 5,
        })
        .expect("client")
    }

    #[tokio::test]
    async fn send_message_posts_chat_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/waInstance1101/sendMessage/tok"))
            .and(body_json(json!({
                "chatId": "79001112233@c.us",
                "message": "Welcome!"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "idMessage": "BAE5F4886F6F2D05" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .send_message(
                &GreenApiInstance::new("1101", "tok"),
                "79001112233@c.us",
                "Welcome!",
            )
            .await
            .expect("sent");
        assert_eq!(id, "BAE5F4886F6F2D05");
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_message(&GreenApiInstance::new("1", "t"), "1@c.us", "hi")
            .await
            .expect_err("502");
        assert!(err.is_transient());
        assert!(matches!(err, GatewayError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "message": "bad chatId" })))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_message(&GreenApiInstance::new("1", "t"), "oops", "hi")
            .await
            .expect_err("400");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn instance_state_is_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/waInstance1101/getStateInstance/tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "stateInstance": "authorized" })),
            )
            .mount(&server)
            .await;

        let state = client(&server)
            .instance_state(&GreenApiInstance::new("1101", "tok"))
            .await
            .expect("state");
        assert_eq!(state, "authorized");
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(json!({ "idMessage": "x" })),
            )
            .mount(&server)
            .await;

        let client = GreenApiClient::new(&GreenApiConfig {
            api_url: server.uri(),
            webhook_token: None,
            timeout_secs: 1,
        })
        .expect("client");
        let err = client
            .send_message(&GreenApiInstance::new("1", "t"), "1@c.us", "hi")
            .await
            .expect_err("timeout");
        assert!(matches!(err, GatewayError::Timeout));
    }
}
