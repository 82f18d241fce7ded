use async_trait::async_trait;
use chat_proto::Command;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Client for the message relay: outgoing commands are POSTed as JSON and
/// the relay answers with an acknowledgement shaped like an inbound event.
#[derive(Clone)]
pub struct RelayClient {
    endpoint: Url,
    backend: Arc<dyn RelayBackend>,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("relay returned http status {0}")]
    HttpStatus(StatusCode),
}

impl RelayClient {
    pub fn new(endpoint: Url) -> Result<Self, RelayError> {
        let backend = Arc::new(ReqwestRelayBackend::new()?);
        Ok(Self { endpoint, backend })
    }

    #[cfg(test)]
    pub(crate) fn with_backend(endpoint: Url, backend: Arc<dyn RelayBackend>) -> Self {
        Self { endpoint, backend }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn submit(&self, command: &Command) -> Result<Value, RelayError> {
        self.backend.submit(&self.endpoint, command).await
    }
}

#[async_trait]
pub(crate) trait RelayBackend: Send + Sync {
    async fn submit(&self, endpoint: &Url, command: &Command) -> Result<Value, RelayError>;
}

struct ReqwestRelayBackend {
    client: reqwest::Client,
}

impl ReqwestRelayBackend {
    fn new() -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RelayBackend for ReqwestRelayBackend {
    async fn submit(&self, endpoint: &Url, command: &Command) -> Result<Value, RelayError> {
        let response = self
            .client
            .post(endpoint.clone())
            .json(command)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RelayError::HttpStatus(response.status()));
        }
        let payload = response.json::<Value>().await?;
        Ok(payload)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every submitted command. Replies with scripted responses in
    /// order, falling back to an echo acknowledgement shaped the way the
    /// relay echoes the sender's own message.
    pub(crate) struct RecordingRelayBackend {
        commands: Mutex<Vec<Command>>,
        responses: Mutex<VecDeque<Result<Value, RelayError>>>,
    }

    impl RecordingRelayBackend {
        pub(crate) fn new() -> Self {
            Self {
                commands: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
            }
        }

        pub(crate) fn script(&self, response: Result<Value, RelayError>) {
            self.responses.lock().unwrap().push_back(response);
        }

        pub(crate) fn commands(&self) -> Vec<Command> {
            self.commands.lock().unwrap().clone()
        }

        fn echo_ack(command: &Command) -> Value {
            let message = command
                .params
                .as_ref()
                .and_then(|params| params.get("message"))
                .cloned()
                .unwrap_or_default();
            json!({
                "data": message,
                "nickname": command.sender.clone().unwrap_or_default(),
                "origin": "peer",
            })
        }
    }

    #[async_trait]
    impl RelayBackend for RecordingRelayBackend {
        async fn submit(&self, _endpoint: &Url, command: &Command) -> Result<Value, RelayError> {
            self.commands.lock().unwrap().push(command.clone());
            match self.responses.lock().unwrap().pop_front() {
                Some(response) => response,
                None => Ok(Self::echo_ack(command)),
            }
        }
    }
}
