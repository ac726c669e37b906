use std::sync::Arc;

use super::auth::JwtAuth;
use crate::access::AccessPolicy;
use crate::services::WalletServices;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<WalletServices>,
    pub auth: Arc<JwtAuth>,
    pub access: AccessPolicy,
}

impl AppState {
    pub fn new(services: Arc<WalletServices>, auth: JwtAuth, access: AccessPolicy) -> Self {
        Self {
            services,
            auth: Arc::new(auth),
            access,
        }
    }
}
