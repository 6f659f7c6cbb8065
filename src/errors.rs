use thiserror::Error;

/// Errors surfaced by the controllers' public API.
///
/// Transport failures of the remote services are not represented here: they
/// are logged and absorbed by the refresh paths, leaving cached state as it was.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetsError {
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),

    #[error("invalid token address: {0}")]
    InvalidAddress(String),

    #[error("no network configuration for network client id '{0}'")]
    UnknownNetworkClient(String),

    #[error("polling input must name at least one chain")]
    EmptyPollingInput,

    #[error("no account is selected")]
    NoSelectedAccount,
}
