#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub url: String,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u64,
}

impl MqttConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: None,
            username: None,
            password: None,
            keep_alive_seconds: 30,
        }
    }
}
