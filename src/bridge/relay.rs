//! TCP relay between the daemon, desktop tools, and the browser extension.
//!
//! Clients connect to `port + 1`, announce themselves with one hello line
//! (`{"type": "browser"}`), then exchange newline-delimited JSON both ways.
//! The [`Hub`] is the shared client registry every subsystem broadcasts
//! through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::bridge::types::{ClientKind, RelayMessage};
use crate::capture::exporter;
use crate::capture::types::{CapturedRequest, ExportFormat};
use crate::capture::CaptureProcessor;
use crate::controller::tool_supervisor::ToolSupervisor;
use crate::error_handling::types::BridgeError;
use crate::session_management::{CaptchaChallenge, SessionManager};
use crate::storage::data_dir::DataDir;

/// How much of an unparseable line gets logged.
const INVALID_LINE_LOG_LIMIT: usize = 100;

struct HubClient {
    kind: ClientKind,
    tx: mpsc::UnboundedSender<String>,
}

/// Registry of connected relay clients and tool activity flags.
pub struct Hub {
    clients: Mutex<HashMap<u64, HubClient>>,
    next_id: AtomicU64,
    active_tools: Mutex<HashMap<String, bool>>,
}

impl Hub {
    pub fn new() -> Self {
        let mut active_tools = HashMap::new();
        for tool in ["api_tester", "sms_panel", "dev_tools"] {
            active_tools.insert(tool.to_string(), false);
        }
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            active_tools: Mutex::new(active_tools),
        }
    }

    /// Register a new connection, returning its id and outbound queue.
    fn register(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().unwrap().insert(
            id,
            HubClient {
                kind: ClientKind::Unknown,
                tx,
            },
        );
        (id, rx)
    }

    fn set_kind(&self, id: u64, kind: ClientKind) {
        if let Some(client) = self.clients.lock().unwrap().get_mut(&id) {
            client.kind = kind;
        }
    }

    fn deregister(&self, id: u64) -> Option<ClientKind> {
        self.clients
            .lock()
            .unwrap()
            .remove(&id)
            .map(|client| client.kind)
    }

    /// Flip a tool's activity flag. Unknown tool names are ignored.
    pub fn set_tool_active(&self, tool: &str, active: bool) {
        let mut tools = self.active_tools.lock().unwrap();
        if let Some(flag) = tools.get_mut(tool) {
            *flag = active;
        }
    }

    pub fn tool_active(&self, tool: &str) -> bool {
        *self.active_tools.lock().unwrap().get(tool).unwrap_or(&false)
    }

    pub fn tools_snapshot(&self) -> HashMap<String, bool> {
        self.active_tools.lock().unwrap().clone()
    }

    /// Queue a message for every client matching its target. Clients whose
    /// queue is gone are dropped from the registry. Returns the delivery
    /// count.
    pub fn broadcast(&self, message: &RelayMessage) -> usize {
        let line = message.to_line();
        let mut clients = self.clients.lock().unwrap();
        let mut dead = Vec::new();
        let mut delivered = 0;
        for (id, client) in clients.iter() {
            if !client.kind.matches_target(&message.target) {
                continue;
            }
            if client.tx.send(line.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            clients.remove(&id);
        }
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// The relay server itself; one instance per daemon.
pub struct Relay {
    hub: Arc<Hub>,
    processor: Arc<CaptureProcessor>,
    sessions: Arc<SessionManager>,
    supervisor: Arc<ToolSupervisor>,
    data: DataDir,
    auto_captcha: bool,
}

impl Relay {
    pub fn new(
        hub: Arc<Hub>,
        processor: Arc<CaptureProcessor>,
        sessions: Arc<SessionManager>,
        supervisor: Arc<ToolSupervisor>,
        data: DataDir,
        auto_captcha: bool,
    ) -> Self {
        Self {
            hub,
            processor,
            sessions,
            supervisor,
            data,
            auto_captcha,
        }
    }

    /// Accept loop. Runs until `shutdown` flips to true.
    pub async fn run(
        self: Arc<Self>,
        port: u16,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(BridgeError::BindError)?;
        info!("Relay listening on {}", addr);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("Relay client connected from {}", peer);
                            let relay = self.clone();
                            tokio::spawn(async move {
                                relay.handle_client(stream).await;
                            });
                        }
                        Err(e) => {
                            error!("Relay accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Relay shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_client(&self, stream: TcpStream) {
        let (read_half, mut write_half) = stream.into_split();
        let (id, mut outbound) = self.hub.register();

        let writer = tokio::spawn(async move {
            while let Some(line) = outbound.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(read_half).lines();
        let mut kind = ClientKind::Unknown;

        // Hello line identifies the client.
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Ok(hello) = serde_json::from_str::<Value>(&line) {
                    kind = ClientKind::from_str(hello["type"].as_str().unwrap_or("unknown"));
                }
                self.hub.set_kind(id, kind);
                match kind {
                    ClientKind::Browser => {
                        info!("Browser connected (client {})", id);
                        self.supervisor.on_browser_connected().await;
                    }
                    ClientKind::ApiTester | ClientKind::SmsPanel => {
                        info!("{} connected (client {})", kind.as_str(), id);
                        self.hub.set_tool_active(kind.as_str(), true);
                    }
                    ClientKind::Unknown => {
                        warn!("Unidentified relay client {}", id);
                    }
                }
            }
            Ok(None) | Err(_) => {
                self.disconnect(id).await;
                writer.abort();
                return;
            }
        }

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if kind == ClientKind::Browser {
                        self.supervisor.touch_browser_activity();
                    }
                    match serde_json::from_str::<Value>(&line) {
                        Ok(message) => self.dispatch(&message).await,
                        Err(_) => {
                            let prefix: String =
                                line.chars().take(INVALID_LINE_LOG_LIMIT).collect();
                            warn!("Invalid JSON from client {}: {}", id, prefix);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Relay client {} read error: {}", id, e);
                    break;
                }
            }
        }

        self.disconnect(id).await;
        writer.abort();
    }

    async fn disconnect(&self, id: u64) {
        if let Some(kind) = self.hub.deregister(id) {
            match kind {
                ClientKind::Browser => {
                    self.supervisor.on_browser_disconnected().await;
                }
                ClientKind::ApiTester | ClientKind::SmsPanel => {
                    self.hub.set_tool_active(kind.as_str(), false);
                }
                ClientKind::Unknown => {}
            }
        }
        debug!("Relay client {} disconnected", id);
    }

    async fn dispatch(&self, message: &Value) {
        match message["type"].as_str().unwrap_or("") {
            "capture_data" => {
                self.handle_capture_data(message).await;
            }
            "tool_status" => {
                if let Some(tool) = message["tool"].as_str() {
                    let active = message["status"].as_str() == Some("active");
                    self.hub.set_tool_active(tool, active);
                }
            }
            "launch_request" => {
                if let Some(tool) = message["tool"].as_str() {
                    if let Err(e) = self.supervisor.launch_tool(tool).await {
                        error!("Tool launch failed for {}: {}", tool, e);
                    }
                }
            }
            "export_request" => {
                let tool = message["tool"].as_str().unwrap_or("");
                let format = ExportFormat::parse(message["format"].as_str().unwrap_or("json"));
                match exporter::export_tool_data(tool, format, &self.data) {
                    Ok(Some(path)) => info!("Export written to {}", path.display()),
                    Ok(None) => {}
                    Err(e) => error!("Export failed for {}: {}", tool, e),
                }
            }
            "captcha_request" => {
                let challenge: CaptchaChallenge =
                    serde_json::from_value(message["captcha"].clone()).unwrap_or_default();
                let solution = self.sessions.solve_captcha(&challenge).await;
                self.hub
                    .broadcast(&RelayMessage::captcha_solution(solution.as_deref()));
            }
            other => {
                debug!("Unhandled relay message type {:?}", other);
            }
        }
    }

    async fn handle_capture_data(&self, message: &Value) {
        let raw_requests = match message["requests"].as_array() {
            Some(items) => items.clone(),
            None => return,
        };
        let requests: Vec<CapturedRequest> = raw_requests
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect();
        let outcome = self.processor.process_batch(&requests).await;

        if self.hub.tool_active("api_tester") {
            self.hub
                .broadcast(&RelayMessage::api_requests(&Value::Array(raw_requests)));
        }
        if !outcome.sms.is_empty() && self.hub.tool_active("sms_panel") {
            let payload = json!(outcome.sms);
            self.hub.broadcast(&RelayMessage::sms_data(&payload));
        }

        // A capture batch can carry a CAPTCHA alongside the requests.
        if self.auto_captcha && message["captcha"].is_object() {
            let challenge: CaptchaChallenge =
                serde_json::from_value(message["captcha"].clone()).unwrap_or_default();
            let solution = self.sessions.solve_captcha(&challenge).await;
            self.hub
                .broadcast(&RelayMessage::captcha_solution(solution.as_deref()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_broadcast_respects_targets() {
        let hub = Hub::new();
        let (browser_id, mut browser_rx) = hub.register();
        hub.set_kind(browser_id, ClientKind::Browser);
        let (panel_id, mut panel_rx) = hub.register();
        hub.set_kind(panel_id, ClientKind::SmsPanel);

        let delivered = hub.broadcast(&RelayMessage::captcha_solution(Some("7")));
        assert_eq!(delivered, 1);
        assert!(browser_rx.try_recv().is_ok());
        assert!(panel_rx.try_recv().is_err());

        // new_captures goes to the tools, never back to the browser
        let delivered = hub.broadcast(&RelayMessage::new_captures(3));
        assert_eq!(delivered, 1);
        assert!(panel_rx.try_recv().is_ok());
        assert!(browser_rx.try_recv().is_err());

        let delivered = hub.broadcast(&RelayMessage::browser_connected());
        assert_eq!(delivered, 2);
    }

    #[test]
    fn test_hub_drops_dead_clients() {
        let hub = Hub::new();
        let (id, rx) = hub.register();
        hub.set_kind(id, ClientKind::Browser);
        drop(rx);

        let delivered = hub.broadcast(&RelayMessage::browser_connected());
        assert_eq!(delivered, 0);
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn test_tool_flags() {
        let hub = Hub::new();
        assert!(!hub.tool_active("api_tester"));
        hub.set_tool_active("api_tester", true);
        assert!(hub.tool_active("api_tester"));
        // Unknown names never become flags
        hub.set_tool_active("toaster", true);
        assert!(!hub.tool_active("toaster"));
        assert_eq!(hub.tools_snapshot().len(), 3);
    }
}
