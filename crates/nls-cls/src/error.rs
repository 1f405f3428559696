//! ---
//! nls_section: "05-networking-external-interfaces"
//! nls_subsection: "module"
//! nls_type: "source"
//! nls_scope: "code"
//! nls_description: "Licensing API client and hierarchical snapshot fetcher."
//! nls_version: "v0.1.0"
//! nls_owner: "tbd"
//! ---
use thiserror::Error;

/// Result alias used throughout the client.
pub type Result<T> = std::result::Result<T, ClsError>;

/// Errors raised while talking to the licensing API.
///
/// Fan-out failures are wrapped in one of the context variants naming the
/// virtual group, server or service instance that was being fetched.
#[derive(Debug, Error)]
pub enum ClsError {
    /// Missing or blank client settings.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
    /// The base URL cannot be used to build endpoint paths.
    #[error("invalid api base url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL as supplied.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
    /// Transport failure (connect, timeout, body read).
    #[error("request {endpoint} failed: {source}")]
    Request {
        /// Endpoint that was requested.
        endpoint: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The API answered with a non-2xx status.
    #[error("request {endpoint} failed with status {status}")]
    Status {
        /// Endpoint that was requested.
        endpoint: String,
        /// HTTP status code returned.
        status: u16,
    },
    /// The response body was not the expected JSON document.
    #[error("decode response from {endpoint}: {source}")]
    Decode {
        /// Endpoint that was requested.
        endpoint: String,
        /// JSON decoding failure.
        #[source]
        source: serde_json::Error,
    },
    /// A fan-out task panicked or was torn down.
    #[error("fetch task failed: {0}")]
    Task(String),
    /// Listing the servers of a virtual group failed.
    #[error("list license servers for virtual-group {virtual_group_id}: {source}")]
    LicenseServers {
        /// Virtual group being listed.
        virtual_group_id: i64,
        /// Underlying failure.
        #[source]
        source: Box<ClsError>,
    },
    /// Listing the pools of a server failed.
    #[error(
        "list license pools for server {server_id} in virtual-group {virtual_group_id}: {source}"
    )]
    LicensePools {
        /// Owning virtual group.
        virtual_group_id: i64,
        /// Server being listed.
        server_id: String,
        /// Underlying failure.
        #[source]
        source: Box<ClsError>,
    },
    /// Listing active leases for a service instance failed.
    #[error(
        "list active leases for virtual-group {virtual_group_id} service-instance {service_instance_id}: {source}"
    )]
    ActiveLeases {
        /// Virtual group being listed.
        virtual_group_id: i64,
        /// Service instance sent in the request header.
        service_instance_id: String,
        /// Underlying failure.
        #[source]
        source: Box<ClsError>,
    },
}

impl ClsError {
    /// Strip context wrappers and return the innermost error.
    pub fn root_cause(&self) -> &ClsError {
        match self {
            ClsError::LicenseServers { source, .. }
            | ClsError::LicensePools { source, .. }
            | ClsError::ActiveLeases { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// HTTP status of the innermost error, when the API returned one.
    pub fn status(&self) -> Option<u16> {
        match self.root_cause() {
            ClsError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
