use std::sync::Arc;

use funnel_core::launch::LaunchVerifier;

use crate::deals::DealService;
use crate::store::DealStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DealStore>,
    pub deals: Arc<DealService>,
    pub verifier: Arc<LaunchVerifier>,
}
