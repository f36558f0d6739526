use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use url::Url;

const USER_AGENT: &str = concat!("davprobe/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum DavError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

/// Status plus raw body for operations where the probe asserts on content.
#[derive(Debug)]
pub struct DavResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Thin WebDAV client. Unlike a production client it never maps status codes
/// to errors: the probe asserts on the raw status itself, so every operation
/// returns whatever the server said.
#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl DavClient {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, DavError> {
        Ok(Self {
            http: Client::builder().user_agent(USER_AGENT).build()?,
            base_url: Url::parse(base_url)?,
            username: username.into(),
            password: password.into(),
        })
    }

    /// MKCOL on a collection path.
    pub async fn make_collection(&self, path: &str) -> Result<StatusCode, DavError> {
        let response = self
            .http
            .request(dav_method(b"MKCOL"), self.endpoint(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn put(&self, path: &str, body: Vec<u8>) -> Result<StatusCode, DavError> {
        let response = self
            .http
            .put(self.endpoint(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .body(body)
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn get(&self, path: &str) -> Result<DavResponse, DavError> {
        let response = self
            .http
            .get(self.endpoint(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(DavResponse { status, body })
    }

    /// PROPFIND with an explicit `Depth` directive and no request body.
    pub async fn propfind(&self, path: &str, depth: u32) -> Result<DavResponse, DavError> {
        let response = self
            .http
            .request(dav_method(b"PROPFIND"), self.endpoint(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", depth.to_string())
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(DavResponse { status, body })
    }

    pub async fn delete(&self, path: &str) -> Result<StatusCode, DavError> {
        let response = self
            .http
            .delete(self.endpoint(path)?)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Ok(response.status())
    }

    fn endpoint(&self, path: &str) -> Result<Url, DavError> {
        Ok(self.base_url.join(path)?)
    }
}

fn dav_method(name: &'static [u8]) -> Method {
    Method::from_bytes(name).expect("static WebDAV method token")
}
