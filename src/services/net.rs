use std::time::Duration;

pub const USER_AGENT: &str = "ModUpdater/0.1.0 (+https://github.com/modupdater)";

pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const HEAD_TIMEOUT: Duration = Duration::from_secs(8);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Build a client with the fixed User-Agent, a 10 s connect timeout and the
/// given request timeout. Redirects are followed (reqwest default).
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Optional bearer token for authenticated manifest hosts, read from the
/// environment so it never lands in the remote config.
pub fn bearer_token() -> Option<String> {
    std::env::var("MODUPDATER_BEARER_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
}
