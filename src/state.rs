use std::sync::Arc;

use sqlx::PgPool;

use crate::certificate::Certificates;
use crate::config::Config;

pub struct AppState {
    pub pg: PgPool,
    pub config: &'static Config,
    pub certificates: Certificates,
}

impl AppState {
    pub fn new(pg: PgPool, config: &'static Config) -> Arc<Self> {
        Arc::new(Self {
            pg,
            certificates: Certificates::new(config.certificate_dir.clone()),
            config,
        })
    }
}
