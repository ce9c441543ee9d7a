use async_trait::async_trait;
use common::routes::{block_path, set_block_path, BLOCK_SIZE_PATH, STATE_INFO_PATH};
use common::{BlockCoords, BlockMatrix, StateInfo};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use viewer::{BlockApi, TransportError};

/// The generation server's HTTP API.
#[derive(Clone)]
pub struct HttpBlockApi {
    http: Client,
    base_url: String,
}

impl HttpBlockApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, TransportError> {
        let res = request.send().await.map_err(request_error)?;
        if res.status().is_success() {
            Ok(res)
        } else {
            Err(TransportError::Status(res.status().as_u16()))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, TransportError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn request_error(e: reqwest::Error) -> TransportError {
    if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

#[async_trait]
impl BlockApi for HttpBlockApi {
    async fn block_size(&self) -> Result<usize, TransportError> {
        self.get_json(self.http.get(self.url(BLOCK_SIZE_PATH))).await
    }

    async fn fetch_block(
        &self,
        coords: BlockCoords,
        is_updating: bool,
    ) -> Result<BlockMatrix, TransportError> {
        let request = self
            .http
            .get(self.url(&block_path(coords)))
            .query(&[("isUpdating", is_updating)]);
        self.get_json(request).await
    }

    async fn commit_block(
        &self,
        coords: BlockCoords,
        matrix: BlockMatrix,
    ) -> Result<(), TransportError> {
        let request = self.http.put(self.url(&set_block_path(coords))).json(&matrix);
        self.send(request).await.map(drop)
    }

    async fn state_info(&self) -> Result<StateInfo, TransportError> {
        self.get_json(self.http.get(self.url(STATE_INFO_PATH))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_double_slashes() {
        let api = HttpBlockApi::new("http://localhost:8080/");
        assert_eq!(
            api.url(&block_path(BlockCoords::new(-1, 2))),
            "http://localhost:8080/gen-api/block/-1/2"
        );
        assert_eq!(api.url(BLOCK_SIZE_PATH), "http://localhost:8080/gen-api/blocksize");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        let api = HttpBlockApi::new("http://127.0.0.1:9");
        assert!(matches!(api.block_size().await, Err(TransportError::Request(_))));
    }
}
