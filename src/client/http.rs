use crate::api::*;
use crate::rpc::ErrorResponse;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// [`ArenaApi`] over the coordinator's HTTP routes.
#[derive(Clone)]
pub struct HttpArenaApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpArenaApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client: reqwest::Client::new() }
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, ApiError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/wabisabi/{}", self.base_url, path))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

fn transport(e: reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

async fn decode<Resp: DeserializeOwned>(response: reqwest::Response) -> Result<Resp, ApiError> {
    if response.status().is_success() {
        return response.json().await.map_err(transport);
    }
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(error) => Err(error.into()),
        Err(_) => Err(ApiError::Transport(format!("coordinator returned {}", status))),
    }
}

#[async_trait]
impl ArenaApi for HttpArenaApi {
    async fn register_input(&self, request: InputRegistrationRequest) -> Result<InputRegistrationResponse, ApiError> {
        self.post("input-registration", &request).await
    }

    async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> Result<ConnectionConfirmationResponse, ApiError> {
        self.post("connection-confirmation", &request).await
    }

    async fn register_output(&self, request: OutputRegistrationRequest) -> Result<OutputRegistrationResponse, ApiError> {
        self.post("output-registration", &request).await
    }

    async fn reissue_credentials(&self, request: ReissueCredentialRequest) -> Result<ReissueCredentialResponse, ApiError> {
        self.post("credential-issuance", &request).await
    }

    async fn remove_input(&self, request: InputsRemovalRequest) -> Result<(), ApiError> {
        self.post("input-unregistration", &request).await
    }

    async fn sign_transaction(&self, request: TransactionSignaturesRequest) -> Result<(), ApiError> {
        self.post("transaction-signature", &request).await
    }

    async fn get_status(&self) -> Result<Vec<RoundState>, ApiError> {
        let response = self
            .client
            .get(format!("{}/wabisabi/status", self.base_url))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}
