pub(crate) mod auth;
mod error;
mod handlers;
mod router;

use anyhow::Result;
use tracing::info;

use crate::core::guard::Guard;
use crate::core::store::Store;

pub struct ApiServer {
    store: Store,
    guard: Guard,
    host: String,
    port: u16,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Store,
    pub(crate) guard: Guard,
}

impl ApiServer {
    pub fn new(store: Store, guard: Guard, host: String, port: u16) -> Self {
        Self {
            store,
            guard,
            host,
            port,
        }
    }

    pub async fn serve(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let state = AppState {
            store: self.store,
            guard: self.guard,
        };
        let app = router::build_api_router(state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server running at http://{addr}");
        axum::serve(listener, app).await?;
        Ok(())
    }
}
