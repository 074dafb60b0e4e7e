//! Client for the runtime configuration admin API.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Reply to a get or set. `ok == false` carries `error_kind`, one of
/// `unknown_category`, `unknown_key`, `read_only`, `invalid_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigReply {
    pub ok: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
    pub revision: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entry {
    pub category: String,
    pub key: String,
    pub value_type: String,
    pub value: String,
    pub default: String,
    pub mutable: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dump {
    pub revision: u64,
    pub entries: Vec<Entry>,
}

#[derive(Serialize)]
struct SetBody {
    value: Value,
}

pub struct ConfigClient {
    client: Client,
    base_url: String,
}

impl ConfigClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Current value of `category.key`. Unknown names come back as a reply
    /// with `ok == false`, not as an `Err`.
    pub async fn get(&self, category: &str, key: &str) -> ClientResult<ConfigReply> {
        let resp = self.client.get(self.value_url(category, key)?).send().await?;
        Self::reply(resp).await
    }

    /// Set `category.key`. Accepts strings, numbers and booleans.
    pub async fn set(&self, category: &str, key: &str, value: impl Into<Value>) -> ClientResult<ConfigReply> {
        let resp = self
            .client
            .put(self.value_url(category, key)?)
            .json(&SetBody { value: value.into() })
            .send()
            .await?;
        Self::reply(resp).await
    }

    pub async fn dump(&self) -> ClientResult<Dump> {
        let resp = self.client.get(format!("{}/config", self.base_url)).send().await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn health(&self) -> ClientResult<Health> {
        let resp = self.client.get(format!("{}/health", self.base_url)).send().await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    /// `{base}/config/{category}/{key}` with both names percent-encoded, so
    /// names with spaces or slashes reach the server verbatim.
    fn value_url(&self, category: &str, key: &str) -> ClientResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| format!("{} cannot be a base URL", self.base_url))?
            .pop_if_empty()
            .extend(["config", category, key]);
        Ok(url)
    }

    async fn reply(resp: reqwest::Response) -> ClientResult<ConfigReply> {
        let status = resp.status();
        let text = resp.text().await?;
        match serde_json::from_str::<ConfigReply>(&text) {
            Ok(reply) => Ok(reply),
            Err(_) => Err(format!("server returned {status}: {text}").into()),
        }
    }
}
