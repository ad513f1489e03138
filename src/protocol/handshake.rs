//! Bootstrap handshake line types
//!
//! After connecting, the client sends its metadata document as one JSON
//! line and the server answers with one JSON line describing which
//! listeners to bind. That reply is the only configuration the session
//! ever receives.

use super::{Family, ProtocolError, Transport, TunnelId};
use serde::Deserialize;
use std::collections::HashSet;

/// The server's bind-configuration line:
/// `{"bind": [{"family": F, "protocol": T, "port": P}, ...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BindConfig {
    pub bind: Vec<BindRequest>,
}

/// One requested listener, in raw wire constants.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BindRequest {
    pub family: u8,
    pub protocol: u8,
    pub port: u16,
}

impl BindConfig {
    /// Parse a configuration line received from the server.
    pub fn parse(line: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(line).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))
    }

    /// Translate the raw wire constants into tunnel identifiers.
    ///
    /// Rejects unknown family/protocol codes, port 0, and duplicate
    /// identifiers: the dispatch table is keyed by identifier, so a
    /// duplicate could never be routed to.
    pub fn tunnel_ids(&self) -> Result<Vec<TunnelId>, ProtocolError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(self.bind.len());
        for request in &self.bind {
            if request.port == 0 {
                return Err(ProtocolError::InvalidPort);
            }
            let id = TunnelId {
                family: Family::try_from(request.family)?,
                transport: Transport::try_from(request.protocol)?,
                port: request.port,
            };
            if !seen.insert(id) {
                return Err(ProtocolError::DuplicateBinding(id));
            }
            ids.push(id);
        }
        Ok(ids)
    }
}
