//! Remote platform boundary
//!
//! The resource-group / site directory is consumed through [`PlatformApi`].
//! [`HttpPlatformClient`] is the blocking JSON implementation used by the
//! binary; tests substitute in-memory fakes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::KelError;
use crate::plugin::types::PluginDescriptor;
use crate::uri::Uri;

const USER_AGENT: &str = concat!("kel/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    #[serde(default)]
    pub resource_group: Option<ResourceGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    NotFound,
    Status { code: u16, body: String },
    Transport(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::NotFound => write!(f, "not found"),
            RemoteError::Status { code, body } => write!(f, "HTTP {}: {}", code, body),
            RemoteError::Transport(message) => write!(f, "{}", message),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Operations consumed from the hosting platform.
pub trait PlatformApi {
    fn get_resource_group(&self, name: &str) -> RemoteResult<ResourceGroup>;
    fn list_resource_groups(&self) -> RemoteResult<Vec<ResourceGroup>>;
    fn create_resource_group(&self, name: &str, token: Option<&str>)
        -> RemoteResult<ResourceGroup>;

    fn get_site(&self, resource_group: &str, name: &str) -> RemoteResult<Site>;
    fn list_sites(&self, resource_group: &str) -> RemoteResult<Vec<Site>>;
    fn create_site(&self, resource_group: &str, name: &str) -> RemoteResult<Site>;

    /// Plugins a site expects its operators to have installed.
    fn site_plugins(&self, resource_group: &str, site: &str)
        -> RemoteResult<Vec<PluginDescriptor>>;
}

/// Map a lookup failure, keeping "does not exist" distinct from other
/// failures.
pub fn lookup_error(kind: &'static str, name: &str, err: RemoteError) -> KelError {
    match err {
        RemoteError::NotFound => KelError::RemoteNotFound {
            kind,
            name: name.to_string(),
        },
        other => KelError::Remote {
            action: format!("get {}", kind),
            message: other.to_string(),
        },
    }
}

/// Map a failure of an operation where not-found has no special meaning.
pub fn remote_error(action: &str, err: RemoteError) -> KelError {
    KelError::Remote {
        action: action.to_string(),
        message: err.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct CreateResourceGroup<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateSite<'a> {
    name: &'a str,
    resource_group: &'a str,
}

/// JSON-over-HTTP client for a cluster.
pub struct HttpPlatformClient {
    base_url: String,
    authorization: Option<String>,
}

impl HttpPlatformClient {
    /// `https://<host>/v1/self`, or `http://` when the URI is insecure.
    pub fn new(uri: &Uri, credential: Option<&Credential>) -> Self {
        let scheme = if uri.insecure() { "http" } else { "https" };
        Self {
            base_url: format!("{}://{}/v1/self", scheme, uri.host()),
            authorization: credential.map(Credential::authorization),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let request = ureq::request(method, &format!("{}{}", self.base_url, path))
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/json");
        match &self.authorization {
            Some(value) => request.set("Authorization", value),
            None => request,
        }
    }

    fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
        decode(self.request("GET", path).call())
    }

    fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        request: ureq::Request,
        body: &B,
    ) -> RemoteResult<T> {
        decode(request.send_json(body))
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    response: std::result::Result<ureq::Response, ureq::Error>,
) -> RemoteResult<T> {
    match response {
        Ok(resp) => resp
            .into_json()
            .map_err(|e| RemoteError::Transport(format!("invalid response body: {}", e))),
        Err(ureq::Error::Status(404, _)) => Err(RemoteError::NotFound),
        Err(ureq::Error::Status(code, resp)) => Err(RemoteError::Status {
            code,
            body: resp.into_string().unwrap_or_default(),
        }),
        Err(e) => Err(RemoteError::Transport(e.to_string())),
    }
}

impl PlatformApi for HttpPlatformClient {
    fn get_resource_group(&self, name: &str) -> RemoteResult<ResourceGroup> {
        self.get(&format!("/resource-groups/{}/", name))
    }

    fn list_resource_groups(&self) -> RemoteResult<Vec<ResourceGroup>> {
        self.get("/resource-groups/")
    }

    fn create_resource_group(
        &self,
        name: &str,
        token: Option<&str>,
    ) -> RemoteResult<ResourceGroup> {
        let mut request = self.request("POST", "/resource-groups/");
        if let Some(token) = token {
            request = request.query("token", token);
        }
        self.post(request, &CreateResourceGroup { name })
    }

    fn get_site(&self, resource_group: &str, name: &str) -> RemoteResult<Site> {
        self.get(&format!(
            "/resource-groups/{}/sites/{}/",
            resource_group, name
        ))
    }

    fn list_sites(&self, resource_group: &str) -> RemoteResult<Vec<Site>> {
        self.get(&format!("/resource-groups/{}/sites/", resource_group))
    }

    fn create_site(&self, resource_group: &str, name: &str) -> RemoteResult<Site> {
        let request = self.request(
            "POST",
            &format!("/resource-groups/{}/sites/", resource_group),
        );
        self.post(
            request,
            &CreateSite {
                name,
                resource_group,
            },
        )
    }

    fn site_plugins(
        &self,
        resource_group: &str,
        site: &str,
    ) -> RemoteResult<Vec<PluginDescriptor>> {
        self.get(&format!(
            "/resource-groups/{}/sites/{}/plugins/",
            resource_group, site
        ))
    }
}
