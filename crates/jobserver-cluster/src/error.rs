use std::sync::PoisonError;

use thiserror::Error;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster not found or offline: {0}")]
    NotFound(String),
    #[error("authentication: {authentication}, cluster: {cluster}, login failed: {message}")]
    AuthenticationFailure {
        cluster: String,
        authentication: String,
        message: String,
    },
    #[error("{0}")]
    ResourceLimit(String),
    #[error("inconsistent Kerberos configuration for cluster {cluster}: {message}")]
    InconsistentKerberos { cluster: String, message: String },
    #[error("cannot find an active resource manager for cluster {0}")]
    NoActiveResourceManager(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("error in HTTP client: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("invalid XML configuration: {0}")]
    XmlError(#[from] quick_xml::de::DeError),
    #[error("repository error: {0}")]
    RepositoryError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ClusterError {
    pub fn authentication(
        cluster: impl Into<String>,
        authentication: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        ClusterError::AuthenticationFailure {
            cluster: cluster.into(),
            authentication: authentication.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ClusterError::InvalidConfiguration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ClusterError::InternalError(message.into())
    }
}

impl<T> From<PoisonError<T>> for ClusterError {
    fn from(error: PoisonError<T>) -> Self {
        ClusterError::InternalError(error.to_string())
    }
}
