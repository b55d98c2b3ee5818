//! Minimal admin HTTP surface: `/metrics` (Prometheus text exposition) and
//! `/ready` (liveness/readiness). Grounded on the teacher's
//! `ioxd_common::server_type` + `trace_http` pattern described for the admin
//! surface; those crates' sources aren't present in this workspace's
//! reference pack, so the handler itself is self-authored directly against
//! `hyper`, which both `ioxd_compactor` and this crate depend on.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use metric::Registry;
use observability_deps::tracing::{error, info};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn handle(req: Request<Body>, registry: Arc<Registry>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .header("content-type", "text/plain; version=0.0.4")
            .body(Body::from(registry.report()))
            .unwrap(),
        (&Method::GET, "/ready") => Response::new(Body::from("ready\n")),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found\n"))
            .unwrap(),
    };
    Ok(response)
}

/// Serve `/metrics` and `/ready` on `bind_address` until `cancel` fires.
pub async fn serve(bind_address: SocketAddr, registry: Arc<Registry>, cancel: CancellationToken) {
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, registry.clone()))) }
    });

    let server = Server::bind(&bind_address).serve(make_svc);
    info!(%bind_address, "admin HTTP surface listening");

    let graceful = server.with_graceful_shutdown(async move {
        cancel.cancelled().await;
    });

    if let Err(e) = graceful.await {
        error!(%e, "admin HTTP server exited with an error");
    }
}
