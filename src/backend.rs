use crate::constants::{
    BLENDER_DATA_PATH, BLENDER_REFRESH_PATH, CLEAR_MESSAGES_PATH, GET_MESSAGES_PATH,
    STREAM_ANALYZE_PATH, TEST_CONNECTION_PATH,
};
use crate::types::{
    AnalyzeRequest, ArmatureError, ConnectionInfo, HistoryPage, NodeContext, ObservedError, Result,
};

/// Thin client over the local analysis backend. Cheap to clone; every clone
/// shares the same pooled `reqwest` connection state.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Probes the backend health endpoint. A reachable backend answers with a
    /// small status document; anything else surfaces as an error so the
    /// caller can show a disconnected indicator instead of guessing.
    pub async fn test_connection(&self) -> Result<ConnectionInfo> {
        let response = self.client.get(self.url(TEST_CONNECTION_PATH)).send().await?;
        let response = expect_success(response).await?;
        Ok(response.json::<ConnectionInfo>().await?)
    }

    /// Fetches the persisted conversation history, newest-last as the backend
    /// stores it.
    pub async fn fetch_history(&self) -> Result<HistoryPage> {
        let response = self.client.get(self.url(GET_MESSAGES_PATH)).send().await?;
        let response = expect_success(response).await?;
        Ok(response.json::<HistoryPage>().await?)
    }

    /// Asks the backend to drop all persisted history.
    pub async fn clear_history(&self) -> Result<()> {
        let response = self.client.post(self.url(CLEAR_MESSAGES_PATH)).send().await?;
        expect_success(response).await?;
        Ok(())
    }

    /// Pulls the current scene snapshot from the plugin bridge. The text goes
    /// out verbatim as the `content` attachment of the next question.
    pub async fn fetch_node_context(&self) -> Result<NodeContext> {
        let response = self.client.get(self.url(BLENDER_DATA_PATH)).send().await?;
        let response = expect_success(response).await?;
        Ok(response.json::<NodeContext>().await?)
    }

    /// Tells the backend to re-export the scene snapshot from the editor. The
    /// refreshed data is picked up by the next `fetch_node_context` call.
    pub async fn trigger_node_refresh(&self) -> Result<()> {
        let response = self
            .client
            .post(self.url(BLENDER_REFRESH_PATH))
            .json(&serde_json::json!({ "action": "refresh_nodes" }))
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    /// Opens the analysis stream. Returns the raw response without a status
    /// check: the session loop inspects the status itself so an HTTP failure
    /// becomes a terminal outcome on the stream rather than a thrown error.
    pub async fn open_stream(&self, request: &AnalyzeRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(STREAM_ANALYZE_PATH))
            .json(request)
            .send()
            .await?;
        Ok(response)
    }
}

/// Maps a non-success status to `ArmatureError::Backend`, keeping the body
/// text for diagnostics.
async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let error_body = match response.text().await {
            Ok(text) => text,
            Err(_) => "Unknown error".to_string(),
        };
        Err(ObservedError::from(ArmatureError::Backend(
            status, error_body,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_is_normalized() {
        let client = BackendClient::new(reqwest::Client::new(), "http://127.0.0.1:5000/");
        assert_eq!(
            client.url(STREAM_ANALYZE_PATH),
            "http://127.0.0.1:5000/api/stream-analyze"
        );
    }

    #[test]
    fn test_url_joins_every_endpoint() {
        let client = BackendClient::new(reqwest::Client::new(), "http://localhost:5000");
        for path in [
            TEST_CONNECTION_PATH,
            GET_MESSAGES_PATH,
            CLEAR_MESSAGES_PATH,
            BLENDER_DATA_PATH,
            BLENDER_REFRESH_PATH,
        ] {
            let url = client.url(path);
            assert!(url.starts_with("http://localhost:5000/api/"), "{}", url);
        }
    }

    #[test]
    fn test_clone_shares_base_url() {
        let client = BackendClient::new(reqwest::Client::new(), "http://localhost:5000");
        let clone = client.clone();
        assert_eq!(client.base_url(), clone.base_url());
    }
}
