//! Health, readiness and metrics endpoint.

mod routes;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::dev::ServerHandle;
use actix_web::{App, HttpServer, web};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::database::CheckStore;
use crate::metrics::Metrics;
use crate::queue::JobQueue;

pub use routes::routes;

/// Shared with every request handler
pub struct HealthState {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn CheckStore>,
    pub metrics: Arc<Metrics>,
}

/// A running health server
pub struct HealthServer {
    addr: Option<SocketAddr>,
    handle: ServerHandle,
    task: JoinHandle<io::Result<()>>,
}

impl HealthServer {
    /// Bind and start serving in the background
    pub fn start(state: HealthState, bind: &str, port: u16) -> io::Result<Self> {
        let data = web::Data::new(state);
        let server =
            HttpServer::new(move || App::new().app_data(data.clone()).configure(routes))
                .workers(1)
                .disable_signals()
                .bind((bind, port))?;

        let addr = server.addrs().first().copied();
        let server = server.run();
        let handle = server.handle();
        let task = tokio::spawn(server);

        info!(address = ?addr, "health server listening");
        Ok(Self { addr, handle, task })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// Stop accepting requests and wait for the server to finish
    pub async fn stop(self) {
        self.handle.stop(true).await;
        match self.task.await {
            Ok(Ok(())) => info!("health server stopped"),
            Ok(Err(e)) => error!(error = %e, "health server failed"),
            Err(e) => error!(error = %e, "health server task failed"),
        }
    }
}
