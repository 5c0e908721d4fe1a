use serde::{Deserialize, Serialize};

/// JWT claims shared across mingle-api (REST middleware) and mingle-server
/// (WebSocket upgrade authentication). Canonical definition lives here in
/// mingle-types to eliminate duplication. Tokens are issued by the external
/// auth service; this subsystem only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub exp: usize,
}
