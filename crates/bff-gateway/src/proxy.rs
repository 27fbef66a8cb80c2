use crate::admin::{record_request, record_upstream_latency};
use crate::error::ForwardError;
use crate::policy::{carries_body, is_cacheable};
use crate::route::{QueryMode, RouteTable, RouteTarget};
use crate::upstream::{is_https, Connector};
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use axum::routing::any;
use axum::Router;
use bff_cache::{CachedResponse, ResponseStore};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Shared application state passed to all handlers.
pub struct AppState {
    pub store: Arc<ResponseStore>,
    pub routes: RouteTable,
    pub connector: Connector,
    pub query_mode: QueryMode,
    /// Applied separately to "connect + response head" and to buffering a
    /// cacheable body. `None` waits forever.
    pub timeout: Option<Duration>,
}

/// Catch-all router: every method and path goes through [`proxy_handler`].
pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the route, serve a fresh cached copy if there is one, otherwise
/// forward upstream.
pub async fn proxy_handler(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response<Body> {
    let raw_target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());

    let target = match state.routes.resolve(&raw_target, state.query_mode) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %raw_target, error = %e, "cannot resolve route");
            let err = ForwardError::from(e);
            record_request(err.kind());
            return err.into_response();
        }
    };

    let cacheable = is_cacheable(req.method(), &target.segment, None);
    if cacheable {
        if let Some(cached) = state.store.get(&raw_target) {
            tracing::debug!(key = %raw_target, "cache HIT");
            record_request("hit");
            return cached_response(&cached);
        }
    }

    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let method = req.method().clone();
    let start = Instant::now();
    let cache_key = cacheable.then_some(raw_target.as_str());

    match forward(&state, req, &target, client_addr, cache_key).await {
        Ok(response) => {
            tracing::debug!(
                method = %method,
                path = %raw_target,
                upstream = %target.url(),
                status = response.status().as_u16(),
                cacheable,
                latency_us = start.elapsed().as_micros(),
                "forwarded"
            );
            record_request(if cacheable { "miss" } else { "forwarded" });
            response
        }
        Err(e) => {
            tracing::error!(
                method = %method,
                path = %raw_target,
                upstream = %target.url(),
                error = %e,
                "proxy request failed"
            );
            record_request(e.kind());
            e.into_response()
        }
    }
}

/// One upstream exchange. `cache_key` is set when the request passed the
/// pre-forward cacheability check; the response is then buffered instead of
/// streamed.
async fn forward(
    state: &AppState,
    req: Request<Body>,
    target: &RouteTarget,
    client_addr: Option<SocketAddr>,
    cache_key: Option<&str>,
) -> Result<Response<Body>, ForwardError> {
    let uri = target.uri()?;
    let (parts, body) = req.into_parts();

    // Nothing has been sent upstream yet, so a failed read aborts cleanly.
    let body = if carries_body(&parts.method) {
        body.collect()
            .await
            .map_err(ForwardError::InboundBody)?
            .to_bytes()
    } else {
        Bytes::new()
    };

    let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut upstream_req = Request::builder()
        .method(parts.method.clone())
        .uri(path)
        .body(Full::new(body.clone()))?;
    *upstream_req.headers_mut() = upstream_headers(&parts.headers, &uri, client_addr, body.len());

    let started = Instant::now();
    let response = within(state.timeout, async {
        let mut sender = state.connector.connect(&uri).await?;
        sender
            .send_request(upstream_req)
            .await
            .map_err(ForwardError::Request)
    })
    .await?;
    record_upstream_latency(started.elapsed());

    let (mut head, incoming) = response.into_parts();
    strip_hop_by_hop(&mut head.headers);

    let Some(key) = cache_key else {
        return Ok(Response::from_parts(head, Body::new(incoming)));
    };

    let body = within(state.timeout, async {
        incoming
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(ForwardError::ResponseBody)
    })
    .await?;

    if is_cacheable(&parts.method, &target.segment, Some(head.status)) {
        let entry = CachedResponse::new(
            head.status.as_u16(),
            header_pairs(&head.headers),
            body.clone(),
            state.store.now(),
        );
        state.store.put(key.to_owned(), entry);
        tracing::debug!(key, bytes = body.len(), "cached response");
    }

    head.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
    Ok(Response::from_parts(head, Body::from(body)))
}

async fn within<T, F>(limit: Option<Duration>, fut: F) -> Result<T, ForwardError>
where
    F: Future<Output = Result<T, ForwardError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ForwardError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Inbound headers as sent upstream: hop-by-hop headers dropped, `host`
/// pointed at the upstream, `content-length` always set to the bytes actually
/// sent, forwarded-* headers added for TLS upstreams.
fn upstream_headers(
    inbound: &HeaderMap,
    uri: &Uri,
    client_addr: Option<SocketAddr>,
    body_len: usize,
) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);

    if let Some(host) = host_header(uri) {
        headers.insert(header::HOST, host);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));

    if is_https(uri) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        headers.insert(X_FORWARDED_PORT, HeaderValue::from_static("443"));
        if let Some(addr) = client_addr {
            if let Ok(ip) = HeaderValue::from_str(&addr.ip().to_string()) {
                headers.insert(X_FORWARDED_FOR, ip);
            }
        }
    }

    headers
}

fn host_header(uri: &Uri) -> Option<HeaderValue> {
    let host = uri.host()?;
    let value = match uri.port_u16() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    HeaderValue::from_str(&value).ok()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let nominated: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(nominated.iter()) {
        headers.remove(name);
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
        .collect()
}

/// Build an HTTP response from a cached entry.
fn cached_response(cached: &CachedResponse) -> Response<Body> {
    let mut response = Response::new(Body::from(cached.body.clone()));
    *response.status_mut() = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);

    let headers = response.headers_mut();
    for (key, value) in &cached.headers {
        if let (Ok(k), Ok(v)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(k, v);
        }
    }
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use bff_cache::ManualClock;
    use http_body::Frame;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    /// Upstream stand-in. Counts every request it receives.
    ///
    /// - `GET /1` → 200 `{"id":"1"}`
    /// - `/missing` → 404
    /// - `/slow` → waits 5s
    /// - anything else → 200 with an echo of what arrived
    async fn stub(State(hits): State<Arc<AtomicUsize>>, req: Request<Body>) -> Response<Body> {
        hits.fetch_add(1, Ordering::SeqCst);
        let (parts, body) = req.into_parts();
        let body = body.collect().await.unwrap().to_bytes();
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        match parts.uri.path() {
            "/1" => Response::builder()
                .header("content-type", "application/json")
                .body(Body::from(r#"{"id":"1"}"#))
                .unwrap(),
            "/missing" => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::from(r#"{"message":"Product not found"}"#))
                .unwrap(),
            "/slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Response::new(Body::empty())
            }
            _ => {
                let echo = serde_json::json!({
                    "method": parts.method.as_str(),
                    "path": parts.uri.path_and_query().map(|pq| pq.as_str()),
                    "host": header("host"),
                    "content_length": header("content-length"),
                    "x_request_id": header("x-request-id"),
                    "x_forwarded_proto": header("x-forwarded-proto"),
                    "body": String::from_utf8_lossy(&body),
                });
                Response::new(Body::from(echo.to_string()))
            }
        }
    }

    async fn spawn_stub() -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().fallback(stub).with_state(Arc::clone(&hits));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    async fn dead_addr() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    /// Consume one request head from a raw upstream socket.
    async fn read_head(tcp: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = tcp.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before request head");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Inbound body whose first read fails.
    struct BrokenBody;

    impl http_body::Body for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
            Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client reset",
            ))))
        }
    }

    struct Gateway {
        app: Router,
        store: Arc<ResponseStore>,
        clock: Arc<ManualClock>,
    }

    fn gateway(routes: &[(&str, String)], timeout: Option<Duration>) -> Gateway {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(ResponseStore::with_clock(
            Duration::from_secs(120),
            clock.clone(),
        ));
        let state = Arc::new(AppState {
            store: Arc::clone(&store),
            routes: RouteTable::from_vars(routes.iter().map(|(k, v)| (k.to_string(), v.clone()))),
            connector: Connector::new(),
            query_mode: QueryMode::Legacy,
            timeout,
        });
        Gateway {
            app: proxy_router(state),
            store,
            clock,
        }
    }

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn echo(body: &Bytes) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn unresolved_route_is_bad_gateway() {
        let (addr, hits) = spawn_stub().await;
        let gw = gateway(&[("PRODUCT_API_URL", format!("http://{addr}"))], None);

        let (status, _, body) = call(&gw.app, get("/orders")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body, Bytes::from_static(b"Cannot process request"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn product_reads_are_cached_for_the_freshness_window() {
        let (addr, hits) = spawn_stub().await;
        let gw = gateway(&[("PRODUCT_API_URL", format!("http://{addr}"))], None);

        let (status, headers, body) = call(&gw.app, get("/product/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(br#"{"id":"1"}"#));
        assert_eq!(headers["x-cache"], "MISS");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let (status, headers, body) = call(&gw.app, get("/product/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(br#"{"id":"1"}"#));
        assert_eq!(headers["x-cache"], "HIT");
        assert_eq!(headers["content-type"], "application/json");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        gw.clock.advance(Duration::from_secs(121));

        let (status, headers, body) = call(&gw.app, get("/product/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(br#"{"id":"1"}"#));
        assert_eq!(headers["x-cache"], "MISS");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_ok_product_reads_are_not_cached() {
        let (addr, hits) = spawn_stub().await;
        let gw = gateway(&[("PRODUCT_API_URL", format!("http://{addr}"))], None);

        for _ in 0..2 {
            let (status, _, _) = call(&gw.app, get("/product/missing")).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(gw.store.is_empty());
    }

    #[tokio::test]
    async fn other_methods_and_segments_bypass_the_cache() {
        let (addr, hits) = spawn_stub().await;
        let gw = gateway(
            &[
                ("PRODUCT_API_URL", format!("http://{addr}")),
                ("IMPORT_API_URL", format!("http://{addr}")),
            ],
            None,
        );

        for _ in 0..2 {
            let (status, headers, _) = call(&gw.app, get("/import/1")).await;
            assert_eq!(status, StatusCode::OK);
            assert!(headers.get("x-cache").is_none());
        }
        let (status, _, _) = call(
            &gw.app,
            Request::delete("/product/1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _, _) = call(
            &gw.app,
            Request::post("/product").body(Body::from("{}")).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert!(gw.store.is_empty());
    }

    #[tokio::test]
    async fn body_is_forwarded_with_content_length() {
        let (addr, _) = spawn_stub().await;
        let gw = gateway(&[("PRODUCT_API_URL", format!("http://{addr}"))], None);
        let payload = r#"{"title":"Goose cup","description":"300ml","price":25,"count":4}"#;

        for method in ["POST", "PUT", "PATCH"] {
            let req = Request::builder()
                .method(method)
                .uri("/product")
                .body(Body::from(payload))
                .unwrap();
            assert!(req.headers().get("content-length").is_none());

            let (status, _, body) = call(&gw.app, req).await;
            assert_eq!(status, StatusCode::OK);
            let echo = echo(&body);
            assert_eq!(echo["method"], method);
            assert_eq!(echo["body"], payload);
            assert_eq!(echo["content_length"], payload.len().to_string());
        }
    }

    #[tokio::test]
    async fn bodyless_methods_send_zero_content_length() {
        let (addr, _) = spawn_stub().await;
        let gw = gateway(&[("IMPORT_API_URL", format!("http://{addr}"))], None);

        for method in ["GET", "DELETE"] {
            let req = Request::builder()
                .method(method)
                .uri("/import/files")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap();
            let (_, _, body) = call(&gw.app, req).await;
            let echo = echo(&body);
            assert_eq!(echo["content_length"], "0");
            assert_eq!(echo["path"], "/files");
            assert_eq!(echo["host"], addr.to_string());
            assert_eq!(echo["x_request_id"], "abc-123");
            assert!(echo["x_forwarded_proto"].is_null());
        }
    }

    #[tokio::test]
    async fn legacy_query_is_forwarded_as_query_string() {
        let (addr, _) = spawn_stub().await;
        let gw = gateway(&[("IMPORT_API_URL", format!("http://{addr}/import"))], None);

        let (status, _, body) = call(&gw.app, get("/import&name=goods.csv")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(echo(&body)["path"], "/import?name=goods.csv");
    }

    #[tokio::test]
    async fn refused_upstream_is_500_and_gateway_keeps_serving() {
        let (addr, hits) = spawn_stub().await;
        let dead = dead_addr().await;
        let gw = gateway(
            &[
                ("PRODUCT_API_URL", format!("http://{dead}")),
                ("IMPORT_API_URL", format!("http://{addr}")),
            ],
            None,
        );

        let (status, _, body) = call(
            &gw.app,
            Request::post("/product").body(Body::from("{}")).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, Bytes::from_static(b"Proxy Error"));

        let (status, _, _) = call(&gw.app, get("/product/1")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(gw.store.is_empty());

        let (status, _, _) = call(&gw.app, get("/import/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_base_url_is_bad_gateway() {
        let gw = gateway(&[("PRODUCT_API_URL", "not a url".to_string())], None);
        let (status, _, _) = call(&gw.app, get("/product/1")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let (addr, _) = spawn_stub().await;
        let gw = gateway(
            &[("IMPORT_API_URL", format!("http://{addr}"))],
            Some(Duration::from_millis(100)),
        );

        let (status, _, _) = call(&gw.app, get("/import/slow")).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn tls_upstreams_get_forwarded_headers() {
        let uri: Uri = "https://api.example.com/prod/products".parse().unwrap();
        let mut inbound = HeaderMap::new();
        inbound.insert(header::HOST, HeaderValue::from_static("localhost"));
        inbound.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-hop"));
        inbound.insert("x-hop", HeaderValue::from_static("1"));
        inbound.insert(header::CONTENT_LENGTH, HeaderValue::from_static("999"));

        let client: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        let headers = upstream_headers(&inbound, &uri, Some(client), 12);

        assert_eq!(headers["host"], "api.example.com");
        assert_eq!(headers["content-length"], "12");
        assert_eq!(headers["x-forwarded-proto"], "https");
        assert_eq!(headers["x-forwarded-port"], "443");
        assert_eq!(headers["x-forwarded-for"], "10.1.2.3");
        assert!(headers.get("connection").is_none());
        assert!(headers.get("x-hop").is_none());
    }

    #[test]
    fn cached_response_replays_repeated_headers() {
        let entry = CachedResponse::new(
            200,
            vec![
                ("set-cookie".into(), "a=1".into()),
                ("set-cookie".into(), "b=2".into()),
            ],
            Bytes::from_static(b"[]"),
            std::time::Instant::now(),
        );
        let response = cached_response(&entry);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get_all("set-cookie").iter().count(), 2);
        assert_eq!(response.headers()["x-cache"], "HIT");
    }

    #[tokio::test]
    async fn uncached_responses_stream_before_upstream_finishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (finish_tx, finish_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            read_head(&mut tcp).await;
            tcp.write_all(b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n5\r\nhello\r\n")
                .await
                .unwrap();
            let _ = finish_rx.await;
            let _ = tcp.write_all(b"0\r\n\r\n").await;
        });
        let gw = gateway(&[("IMPORT_API_URL", format!("http://{addr}"))], None);

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            gw.app.clone().oneshot(get("/import/files")),
        )
        .await
        .expect("response head should arrive while the upstream is still sending")
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-cache").is_none());

        let mut body = response.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("first chunk should arrive while the upstream is still sending")
            .unwrap()
            .unwrap();
        assert_eq!(frame.into_data().unwrap(), Bytes::from_static(b"hello"));

        finish_tx.send(()).unwrap();
        let rest = body.collect().await.unwrap().to_bytes();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn failed_request_body_is_400_and_never_reaches_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let conns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&conns);
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let gw = gateway(&[("PRODUCT_API_URL", format!("http://{addr}"))], None);

        let req = Request::post("/product").body(Body::new(BrokenBody)).unwrap();
        let (status, _, body) = call(&gw.app, req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, Bytes::from_static(b"Request Error"));
        tokio::task::yield_now().await;
        assert_eq!(conns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn client_disconnect_abandons_upstream_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = oneshot::channel();
        let upstream = tokio::spawn(async move {
            let (mut tcp, _) = listener.accept().await.unwrap();
            read_head(&mut tcp).await;
            seen_tx.send(()).unwrap();
            // Never answer; wait for the gateway to hang up.
            let mut buf = [0u8; 64];
            tcp.read(&mut buf).await
        });
        let gw = gateway(&[("IMPORT_API_URL", format!("http://{addr}"))], None);

        let app = gw.app.clone();
        let client = tokio::spawn(async move { app.oneshot(get("/import/hang")).await });
        seen_rx.await.unwrap();
        client.abort();

        let read = tokio::time::timeout(Duration::from_secs(5), upstream)
            .await
            .expect("upstream connection should close once the client is gone")
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)), "got {read:?}");
    }
}
