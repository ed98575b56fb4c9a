use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use warp::Filter;

use super::subscription::{SubscriptionError, SubscriptionResult};
use super::types::{CallbackTarget, RawEvent, SubscriptionConfig, SubscriptionId};
use crate::model::{ServiceKind, Udn};

/// Callback path for one device service, unique per (UDN, service)
pub fn callback_path(udn: &Udn, service: ServiceKind) -> String {
    format!(
        "/events/{}/{}",
        utf8_percent_encode(udn.as_str(), NON_ALPHANUMERIC),
        service.id()
    )
}

/// HTTP server receiving GENA NOTIFY requests
pub struct CallbackServer {
    port: u16,
    base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Binds the first free port in the configured range and starts serving
    pub async fn start(config: &SubscriptionConfig, router: Arc<EventRouter>) -> SubscriptionResult<Self> {
        let host = config
            .callback_host
            .or_else(detect_local_ip)
            .ok_or_else(|| SubscriptionError::CallbackServerError("Unable to determine a callback address".to_string()))?;

        let (start, end) = config.callback_port_range;
        for port in start..=end {
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let bound = warp::serve(routes(Arc::clone(&router))).try_bind_with_graceful_shutdown(
                SocketAddr::from(([0, 0, 0, 0], port)),
                async move {
                    let _ = shutdown_rx.await;
                },
            );

            match bound {
                Ok((addr, server)) => {
                    let server_handle = tokio::spawn(server);
                    let base_url = format!("http://{}", SocketAddr::new(host, addr.port()));
                    log::info!("Event callback server listening on {} (advertised as {})", addr, base_url);
                    return Ok(Self {
                        port: addr.port(),
                        base_url,
                        shutdown_tx: Some(shutdown_tx),
                        server_handle: Some(server_handle),
                    });
                }
                Err(e) => log::debug!("Callback port {} unavailable: {}", port, e),
            }
        }

        Err(SubscriptionError::CallbackServerError(format!(
            "No available ports in range {}..{}",
            start, end
        )))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL devices are told to call back on
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_running(&self) -> bool {
        self.server_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the HTTP server and wait for it to finish
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            if let Err(e) = handle.await {
                log::warn!("Callback server task failed: {}", e);
            }
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

fn routes(
    router: Arc<EventRouter>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone + Send + Sync + 'static {
    let with_router = warp::any().map(move || Arc::clone(&router));

    warp::method()
        .and(warp::path::full())
        .and(warp::header::headers_cloned())
        .and(warp::body::bytes())
        .and(with_router)
        .and_then(handle_notify_request)
}

/// warp adapter around `EventRouter::handle_notify_request`
async fn handle_notify_request(
    method: warp::http::Method,
    path: warp::path::FullPath,
    headers: warp::http::HeaderMap,
    body: bytes::Bytes,
    router: Arc<EventRouter>,
) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(router.handle_notify_request(&method, path.as_str(), &headers, body).await)
}

/// The address other hosts on the LAN reach us on. No packets are sent.
fn detect_local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect(("239.255.255.250", 1900)).ok()?;
    socket
        .local_addr()
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_unspecified())
}

/// Routes NOTIFY requests to the device service registered for their path
pub struct EventRouter {
    /// Maps callback paths to their targets
    routes: RwLock<HashMap<String, CallbackTarget>>,
    event_sender: mpsc::UnboundedSender<RawEvent>,
}

impl EventRouter {
    pub fn new(event_sender: mpsc::UnboundedSender<RawEvent>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            event_sender,
        }
    }

    pub async fn register(&self, callback_path: String, target: CallbackTarget) {
        self.routes.write().await.insert(callback_path, target);
    }

    pub async fn unregister(&self, callback_path: &str) -> bool {
        self.routes.write().await.remove(callback_path).is_some()
    }

    pub async fn target(&self, callback_path: &str) -> Option<CallbackTarget> {
        self.routes.read().await.get(callback_path).cloned()
    }

    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Queue a received event for processing. False once the receiver is gone.
    pub fn deliver(&self, event: RawEvent) -> bool {
        self.event_sender.send(event).is_ok()
    }

    pub async fn handle_notify_request(
        &self,
        method: &warp::http::Method,
        callback_path: &str,
        headers: &warp::http::HeaderMap,
        body: bytes::Bytes,
    ) -> warp::reply::WithStatus<&'static str> {
        use warp::http::StatusCode;

        if method.as_str() != "NOTIFY" {
            return warp::reply::with_status("Method not allowed", StatusCode::METHOD_NOT_ALLOWED);
        }

        let Some(target) = self.target(callback_path).await else {
            log::warn!("NOTIFY on unregistered path {}", callback_path);
            return warp::reply::with_status("Unknown subscription", StatusCode::NOT_FOUND);
        };

        if !Self::is_property_change(headers) {
            log::warn!("Invalid NOTIFY headers for {} {}", target.udn, target.service);
            return warp::reply::with_status("Invalid headers", StatusCode::BAD_REQUEST);
        }

        let event_xml = match String::from_utf8(body.to_vec()) {
            Ok(xml) => xml,
            Err(_) => {
                log::warn!("Invalid UTF-8 in event body for {} {}", target.udn, target.service);
                return warp::reply::with_status("Invalid body encoding", StatusCode::BAD_REQUEST);
            }
        };

        let sid = header(headers, "sid").map(SubscriptionId::new);
        let seq = header(headers, "seq").and_then(|v| v.trim().parse::<u32>().ok());

        if sid.is_none() {
            log::warn!("NOTIFY without SID for {} {}", target.udn, target.service);
            return warp::reply::with_status("Missing SID", StatusCode::PRECONDITION_FAILED);
        }

        log::debug!("Event for {} {} (SEQ {:?})", target.udn, target.service, seq);

        if !self.deliver(RawEvent::new(target, sid, seq, event_xml)) {
            log::error!("Event receiver closed, dropping NOTIFY for {}", callback_path);
            return warp::reply::with_status("Internal server error", StatusCode::INTERNAL_SERVER_ERROR);
        }

        warp::reply::with_status("OK", StatusCode::OK)
    }

    /// NT and NTS must name a GENA property change
    fn is_property_change(headers: &warp::http::HeaderMap) -> bool {
        header(headers, "nt") == Some("upnp:event") && header(headers, "nts") == Some("upnp:propchange")
    }
}

fn header<'a>(headers: &'a warp::http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}
