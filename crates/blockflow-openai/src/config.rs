use std::time::Duration;

/// Configuration for the OpenAI-compatible endpoint. API keys are not part
/// of the config: they arrive per-request from resolved block inputs.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL for the endpoint. Useful for proxies or local test servers.
    pub base_url: String,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_trims_trailing_slash() {
        let config = OpenAiConfig::new().base_url("http://localhost:8080/");
        assert_eq!(
            config.chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }
}
