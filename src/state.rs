use std::sync::Arc;

use crate::maintenance::Maintenance;

#[derive(Clone)]
pub struct AppState {
    pub maintenance: Arc<Maintenance>,
}

impl AppState {
    pub fn new(maintenance: Maintenance) -> Self {
        Self {
            maintenance: Arc::new(maintenance),
        }
    }

    pub fn maintenance(&self) -> Arc<Maintenance> {
        self.maintenance.clone()
    }
}
