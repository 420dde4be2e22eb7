// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::discovery::TypeNameSource;
use crate::plugin::ContractId;

/// Boxed error returned by plugin constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised when no working factory can be produced for the calling scope.
///
/// Only this error reaches callers of the resolver; failures while probing
/// individual discovery sources are absorbed and reported to diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no factory type named '{type_name}' is registered in {searched}")]
    TypeNotFound { type_name: String, searched: String },

    #[error(
        "factory type '{type_name}' implements {found} but the resolver expects {expected}. \
         The conflict is caused by multiple copies of the factory contract in incompatible \
         isolation scopes. Make sure only one copy of the contract is reachable from each scope, \
         or select the default factory explicitly."
    )]
    IncompatibleContract {
        type_name: String,
        found: ContractId,
        expected: ContractId,
    },

    #[error(
        "factory type '{type_name}' implements {found}, not {expected}. Please check the custom \
         implementation."
    )]
    NotAFactory {
        type_name: String,
        found: ContractId,
        expected: ContractId,
    },

    #[error("unable to construct factory '{type_name}'")]
    Construction {
        type_name: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to create factory '{type_name}' named by {origin}")]
    Resolution {
        type_name: String,
        origin: TypeNameSource,
        #[source]
        source: Box<ConfigurationError>,
    },

    #[error("unable to create log instance '{name}'")]
    Instance {
        name: String,
        #[source]
        source: BoxError,
    },
}

/// The host refused to reveal the caller's isolation scope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("isolation scope is unavailable: {0}")]
pub struct ScopeUnavailable(pub String);

/// Failure while probing a resource in a scope's namespace.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("access to '{path}' was denied")]
    Denied { path: String },

    #[error("failed to read '{path}'")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResourceError {
    pub(crate) fn from_io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Denied { path }
        } else {
            Self::Io { path, source }
        }
    }
}
