use std::sync::Arc;

use crate::facade::Broker;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub auth_token: String,
}
