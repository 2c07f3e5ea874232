//! HTTP server for the local API surface

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::cluster::{HaCoordinator, HaError, HaState};
use crate::metrics::Metrics;

/// Largest request body accepted
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Shared state of request handlers
pub struct ApiContext {
    pub coordinator: Arc<HaCoordinator>,
    pub metrics: Option<Arc<Metrics>>,
}

/// HTTP server for the local API surface
pub struct ApiServer {
    context: Arc<ApiContext>,
    addr: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct NodeRequest {
    addr: IpAddr,
}

#[derive(Debug, Serialize)]
struct InstanceStateResponse<'a> {
    instance: &'a str,
    state: &'a str,
}

impl ApiServer {
    pub fn new(context: ApiContext, addr: SocketAddr) -> Self {
        Self {
            context: Arc::new(context),
            addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("API server listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let context = self.context.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let context = context.clone();
                    async move { handle_request(req, context).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving API connection: {:?}", err);
                }
            });
        }
    }
}

/// Route one request
pub async fn handle_request<B>(
    req: Request<B>,
    context: Arc<ApiContext>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("API {} {}", method, path);

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let coordinator = &context.coordinator;

    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["config", "params"]) => {
            let args = coordinator.args();
            json_response(
                StatusCode::OK,
                &json!({
                    "spawn_keepalive": args.spawn_keepalive,
                    "remote_ip": args.remote_ip,
                    "source_ip": args.source_ip,
                    "interval": args.interval_us,
                }),
            )
        }
        (&Method::GET, ["health"]) | (&Method::GET, ["healthz"]) => {
            text_response(StatusCode::OK, "OK")
        }
        (&Method::GET, ["metrics"]) => match &context.metrics {
            Some(metrics) => metrics_response(metrics),
            None => text_response(StatusCode::NOT_FOUND, "Not Found"),
        },
        (&Method::GET, ["ha", "state"]) => {
            json_response(StatusCode::OK, &coordinator.all_states())
        }
        (&Method::GET, ["ha", "state", instance]) => match coordinator.instance_state(instance) {
            Ok(state) => json_response(
                StatusCode::OK,
                &InstanceStateResponse { instance, state },
            ),
            Err(e) => error_response(&e),
        },
        (&Method::GET, ["ha", "vip", instance]) => match coordinator.vip(instance) {
            Ok(vip) => json_response(StatusCode::OK, &json!({ "instance": instance, "vip": vip })),
            Err(e) => error_response(&e),
        },
        (&Method::POST, ["ha", "state"]) => match read_json::<B, HaState>(req).await {
            Ok(update) => match coordinator.update_state(update) {
                Ok(role) => json_response(StatusCode::OK, &json!({ "role": role.code() })),
                Err(e) => error_response(&e),
            },
            Err(response) => response,
        },
        (&Method::GET, ["cluster", "node"]) => {
            json_response(StatusCode::OK, &coordinator.cluster_nodes())
        }
        (&Method::POST, ["cluster", "node"]) => match read_json::<B, NodeRequest>(req).await {
            Ok(node) => match coordinator.cluster_node_add(node.addr) {
                Ok(()) => json_response(StatusCode::OK, &json!({ "result": "success" })),
                Err(e) => error_response(&e),
            },
            Err(response) => response,
        },
        (&Method::DELETE, ["cluster", "node", addr]) => match addr.parse::<IpAddr>() {
            Ok(addr) => match coordinator.cluster_node_delete(addr) {
                Ok(()) => json_response(StatusCode::OK, &json!({ "result": "success" })),
                Err(e) => error_response(&e),
            },
            Err(_) => json_error(StatusCode::BAD_REQUEST, "invalid node address"),
        },
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

async fn read_json<B, T>(req: Request<B>) -> Result<T, Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    T: for<'de> Deserialize<'de>,
{
    let body = Limited::new(req.into_body(), MAX_BODY_SIZE)
        .collect()
        .await
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, &format!("body: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&body)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, &format!("invalid request: {}", e)))
}

fn error_response(err: &HaError) -> Response<Full<Bytes>> {
    let status = match err {
        HaError::NotFound(_) => StatusCode::NOT_FOUND,
        HaError::Conflict(_) => StatusCode::CONFLICT,
        HaError::InvalidState { .. } => StatusCode::BAD_REQUEST,
        HaError::Datapath(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    json_error(status, &err.to_string())
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": message }))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap(),
        Err(e) => {
            error!("Failed to encode API response: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode response")
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn metrics_response(metrics: &Metrics) -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, encoder.format_type())
            .body(Full::new(Bytes::from(buffer)))
            .unwrap(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use async_trait::async_trait;

    use super::*;
    use crate::cluster::{Collaborators, KeepaliveArgs, Role};
    use crate::datapath::{Datapath, DatapathError, PeerWork};
    use crate::liveness::{ApiProbe, HttpApiProbe};
    use crate::process::ProcessControl;
    use crate::routing::RoutingPeer;

    struct Sink;

    impl RoutingPeer for Sink {
        fn update_ha_state(&self, _instance: &str, _role: Role, _vip: IpAddr) {}
    }

    impl ProcessControl for Sink {
        fn terminate_liveness_process(&self) {}
    }

    #[async_trait]
    impl Datapath for Sink {
        fn submit_peer_work(&self, _work: PeerWork) -> Result<(), DatapathError> {
            Ok(())
        }

        fn resync_vip_rules(&self, _states: Vec<HaState>) {}

        async fn wait_sync_ready(&self) {}
    }

    fn context() -> Arc<ApiContext> {
        let sink = Arc::new(Sink);
        let coordinator = HaCoordinator::new(
            KeepaliveArgs::default(),
            Collaborators {
                routing: sink.clone(),
                datapath: sink.clone(),
                process: sink,
            },
        );
        Arc::new(ApiContext {
            coordinator: Arc::new(coordinator),
            metrics: Some(Arc::new(Metrics::new())),
        })
    }

    async fn call(
        context: &Arc<ApiContext>,
        method: Method,
        path: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();
        let res = handle_request(req, context.clone()).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let ctx = context();

        let (status, body) = call(
            &ctx,
            Method::POST,
            "/ha/state",
            r#"{"instance":"default","state":"MASTER","vip":"10.0.0.1"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], 1);

        let (status, body) = call(&ctx, Method::GET, "/ha/state/default", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "MASTER");

        let (status, body) = call(&ctx, Method::GET, "/ha/vip/default", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vip"], "10.0.0.1");

        let (status, body) = call(&ctx, Method::GET, "/ha/state", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let ctx = context();

        let (status, _) = call(&ctx, Method::GET, "/ha/vip/default", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &ctx,
            Method::POST,
            "/ha/state",
            r#"{"instance":"default","state":"BOGUS","vip":"0.0.0.0"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("BOGUS"));

        let (status, _) = call(&ctx, Method::POST, "/ha/state", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&ctx, Method::GET, "/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cluster_node_endpoints() {
        let ctx = context();

        let (status, _) = call(
            &ctx,
            Method::POST,
            "/cluster/node",
            r#"{"addr":"192.168.1.5"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &ctx,
            Method::POST,
            "/cluster/node",
            r#"{"addr":"192.168.1.5"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&ctx, Method::GET, "/cluster/node", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["addr"], "192.168.1.5");
        assert_eq!(body[0]["status"], "pending");

        let (status, _) = call(&ctx, Method::DELETE, "/cluster/node/192.168.1.5", "").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&ctx, Method::DELETE, "/cluster/node/192.168.1.5", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&ctx, Method::DELETE, "/cluster/node/bogus", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let ctx = context();
        let req = Request::builder()
            .uri("/metrics")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let res = handle_request(req, ctx).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_probe_against_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ApiServer {
            context: context(),
            addr,
        };
        tokio::spawn(server.serve(listener));

        let probe = HttpApiProbe::new(addr);
        assert!(probe.is_ready().await);
    }
}
