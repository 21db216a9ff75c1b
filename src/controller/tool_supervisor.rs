//! Desktop tool process supervision.
//!
//! Launches and stops the tool processes (`api_tester`, `sms_panel`),
//! restarts crashed ones, and tracks browser extension liveness. Tool
//! lifecycle events go out as relay broadcasts through an event channel so
//! connected clients stay informed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;

use crate::bridge::types::RelayMessage;
use crate::configuration::config::Config;
use crate::error_handling::types::ControllerError;

/// Tools the supervisor can run as processes.
const PROCESS_TOOLS: [&str; 2] = ["api_tester", "sms_panel"];

/// How often crashed tools and browser liveness are checked.
const MONITOR_INTERVAL_SECS: u64 = 10;

/// A silent browser is considered disconnected after this long.
const BROWSER_IDLE_TIMEOUT_SECS: i64 = 60;

/// Grace period between asking a tool to die and force-killing it.
const STOP_GRACE_SECS: u64 = 1;

struct RunningTool {
    child: Child,
    pid: Option<u32>,
    started: DateTime<Utc>,
    auto_restart: bool,
}

pub struct ToolSupervisor {
    config: Config,
    events: mpsc::UnboundedSender<RelayMessage>,
    running: Mutex<HashMap<String, RunningTool>>,
    browser_connected: AtomicBool,
    last_browser_activity: std::sync::Mutex<Option<DateTime<Utc>>>,
}

impl ToolSupervisor {
    pub fn new(config: Config, events: mpsc::UnboundedSender<RelayMessage>) -> Self {
        Self {
            config,
            events,
            running: Mutex::new(HashMap::new()),
            browser_connected: AtomicBool::new(false),
            last_browser_activity: std::sync::Mutex::new(None),
        }
    }

    /// Launch a tool process. Returns whether the tool is running after the
    /// call; spawn failures are logged, not escalated.
    pub async fn launch_tool(&self, tool: &str) -> Result<bool, ControllerError> {
        // Runs inside the browser, nothing to spawn.
        if tool == "dev_tools" {
            return Ok(true);
        }
        if !PROCESS_TOOLS.contains(&tool) {
            warn!("Unknown tool {:?}", tool);
            return Ok(false);
        }

        let mut running = self.running.lock().await;
        if let Some(existing) = running.get_mut(tool) {
            match existing.child.try_wait() {
                Ok(None) => {
                    warn!("{} is already running", tool);
                    return Ok(true);
                }
                _ => {
                    running.remove(tool);
                }
            }
        }

        let argv = self
            .config
            .tool_command(tool)
            .map_err(ControllerError::ConfigurationError)?;
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        match command.spawn() {
            Ok(child) => {
                let pid = child.id();
                running.insert(
                    tool.to_string(),
                    RunningTool {
                        child,
                        pid,
                        started: Utc::now(),
                        auto_restart: true,
                    },
                );
                info!("Launched {} (pid {:?})", tool, pid);
                Ok(true)
            }
            Err(e) => {
                error!("Launch failed for {} ({:?}): {}", tool, argv, e);
                Ok(false)
            }
        }
    }

    /// Stop a tool: SIGTERM first so it can shut down cleanly, SIGKILL
    /// after the grace period. Returns whether a running tool was stopped.
    pub async fn stop_tool(&self, tool: &str) -> bool {
        let mut running = self.running.lock().await;
        let mut entry = match running.remove(tool) {
            Some(entry) => entry,
            None => {
                warn!("{} is not running", tool);
                return false;
            }
        };
        drop(running);

        if let Some(pid) = entry.pid {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
        match timeout(Duration::from_secs(STOP_GRACE_SECS), entry.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                if let Err(e) = entry.child.kill().await {
                    warn!("Force kill for {} failed: {}", tool, e);
                }
            }
        }
        info!("Stopped {}", tool);
        true
    }

    /// Launch every tool enabled in the configuration.
    pub async fn launch_all(&self) {
        info!("Launching all configured tools");
        if self.config.auto_launch.api_tester {
            let _ = self.launch_tool("api_tester").await;
        }
        if self.config.auto_launch.sms_panel {
            let _ = self.launch_tool("sms_panel").await;
        }
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.running.lock().await.keys().cloned().collect();
        for tool in names {
            self.stop_tool(&tool).await;
        }
        info!("All tools stopped");
    }

    /// Browser extension opened its relay connection.
    pub async fn on_browser_connected(&self) {
        info!("Browser extension connected");
        self.browser_connected.store(true, Ordering::Relaxed);
        self.touch_browser_activity();
        if self.config.auto_launch.on_browser_connect {
            self.launch_all().await;
        }
        let _ = self.events.send(RelayMessage::browser_connected());
    }

    /// Browser extension went away (closed connection or went silent).
    pub async fn on_browser_disconnected(&self) {
        if self.browser_connected.swap(false, Ordering::Relaxed) {
            info!("Browser extension disconnected");
            let _ = self.events.send(RelayMessage::browser_disconnected());
        }
    }

    pub fn touch_browser_activity(&self) {
        *self.last_browser_activity.lock().unwrap() = Some(Utc::now());
    }

    pub fn browser_connected(&self) -> bool {
        self.browser_connected.load(Ordering::Relaxed)
    }

    /// Supervisor status snapshot. Every process tool appears, running or
    /// not; pid and start time only when it is.
    pub async fn status(&self) -> Value {
        let running = self.running.lock().await;
        let mut tools = serde_json::Map::new();
        for name in PROCESS_TOOLS {
            let entry = match running.get(name) {
                Some(tool) => json!({
                    "running": true,
                    "pid": tool.pid,
                    "started": tool.started.to_rfc3339(),
                    "auto_restart": tool.auto_restart,
                }),
                None => json!({ "running": false }),
            };
            tools.insert(name.to_string(), entry);
        }
        let last_activity = self
            .last_browser_activity
            .lock()
            .unwrap()
            .map(|t| t.to_rfc3339());
        json!({
            "browser_connected": self.browser_connected(),
            "last_activity": last_activity,
            "running_tools": tools,
            "automation_rules": &self.config.automation_rules,
        })
    }

    /// Periodic check: reap exited tools (restarting the ones flagged for
    /// it) and demote a browser that has gone silent.
    pub fn spawn_monitor(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(MONITOR_INTERVAL_SECS));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check_tools().await;
                        self.check_browser_idle().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn check_tools(&self) {
        let mut restart = Vec::new();
        {
            let mut running = self.running.lock().await;
            let mut exited = Vec::new();
            for (name, tool) in running.iter_mut() {
                if let Ok(Some(status)) = tool.child.try_wait() {
                    warn!("{} exited with {}", name, status);
                    if tool.auto_restart {
                        restart.push(name.clone());
                    }
                    exited.push(name.clone());
                }
            }
            for name in exited {
                running.remove(&name);
            }
        }
        for name in restart {
            info!("Restarting {}", name);
            let _ = self.launch_tool(&name).await;
        }
    }

    async fn check_browser_idle(&self) {
        if !self.browser_connected() {
            return;
        }
        let idle = self
            .last_browser_activity
            .lock()
            .unwrap()
            .map(|t| (Utc::now() - t).num_seconds())
            .unwrap_or(0);
        if idle > BROWSER_IDLE_TIMEOUT_SECS {
            warn!("No browser activity for {} seconds", idle);
            self.on_browser_disconnected().await;
        }
    }
}
