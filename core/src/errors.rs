// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

use crate::definitions::{ConnectionType, ConnectorAddress, ConnectorRole};
use crate::topology::{ControlRef, Endpoint};

/// Errors returned synchronously by the routing cache, the composite router and switchers.
///
/// Every variant except `UnsupportedOperation` is a caller error: the request could never
/// be valid for this component and the cache state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Connection type must not be None")]
    NoneFlag,

    #[error("Single connection type required, got composite {0}")]
    CompositeFlag(ConnectionType),

    #[error("Input {0} is not declared on this component")]
    UnknownInput(ConnectorAddress),

    #[error("Output {0} is not declared on this component")]
    UnknownOutput(ConnectorAddress),

    #[error("{role} {address} does not carry {flag}")]
    UnsupportedOperation {
        role: ConnectorRole,
        address: ConnectorAddress,
        flag: ConnectionType,
    },
}

impl RoutingError {
    /// True for the invalid-argument family (none flag, composite flag, unknown address).
    pub fn is_invalid_argument(&self) -> bool {
        !matches!(self, RoutingError::UnsupportedOperation { .. })
    }
}

/// Reasons a single topology connection could not be turned into an endpoint mapping.
///
/// These never abort a rebuild; the mapping is logged and skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Local {role} {address} is not declared on this component")]
    UnknownLocalConnector {
        role: ConnectorRole,
        address: ConnectorAddress,
    },

    #[error("Control {0} not found")]
    ControlNotFound(ControlRef),

    #[error("Control {0} does not produce content")]
    NotAProducer(ControlRef),

    #[error("Control {0} does not consume content")]
    NotAConsumer(ControlRef),

    #[error("Local {role} {address} does not carry {flags}")]
    UnsupportedLocalConnector {
        role: ConnectorRole,
        address: ConnectorAddress,
        flags: ConnectionType,
    },

    #[error("Local {role} {address} is already mapped")]
    DuplicateMapping {
        role: ConnectorRole,
        address: ConnectorAddress,
    },

    #[error("Remote endpoint {endpoint} is already mapped to local {role} {mapped}")]
    DuplicateEndpoint {
        role: ConnectorRole,
        endpoint: Endpoint,
        mapped: ConnectorAddress,
    },
}

/// Failure reported by an external control when it is commanded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Control {control} rejected content on input {input}: {reason}")]
    Rejected {
        control: ControlRef,
        input: ConnectorAddress,
        reason: String,
    },

    #[error("Other error: {0}")]
    OtherError(String),
}

impl From<String> for ControlError {
    fn from(other: String) -> Self {
        ControlError::OtherError(other)
    }
}
