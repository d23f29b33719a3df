//! Supervises the bridge's role tasks: parsers, the order queue dispatcher, the account
//! event streamer, and the policy report drain (§4.11/C13).
//!
//! The bounded-restart back-off is the same trip/cool-down shape as the teacher's
//! `DataSourceKillSwitch` (count recent failures in a window, disable once a threshold is
//! crossed), generalised here from a request kill-switch to a task restart policy with a
//! sliding window of restart timestamps instead of a consecutive-failure counter.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RESTARTS: usize = 10;
const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(5 * 60);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub type RoleBody = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleStatus {
    Running,
    Restarting,
    Stopped,
    Exhausted,
}

struct RoleState {
    status: RoleStatus,
    started: u64,
    crashed: u64,
    restarted: u64,
    recent_restarts: VecDeque<Instant>,
    last_error: Option<String>,
}

impl RoleState {
    fn new() -> Self {
        Self {
            status: RoleStatus::Running,
            started: 0,
            crashed: 0,
            restarted: 0,
            recent_restarts: VecDeque::new(),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleSnapshot {
    pub name: String,
    pub status: RoleStatus,
    pub started: u64,
    pub crashed: u64,
    pub restarted: u64,
    pub last_error: Option<String>,
}

struct RoleProcess {
    name: String,
    body: RoleBody,
    state: Mutex<RoleState>,
}

/// Launches and restarts named role tasks under one supervisor, with a bounded-restart
/// back-off policy shared across all roles.
pub struct Supervisor {
    roles: Mutex<Vec<Arc<RoleProcess>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    restart_delay: Duration,
    max_restarts: usize,
    restart_window: Duration,
    shutdown: Arc<tokio::sync::Notify>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_RESTART_DELAY, DEFAULT_MAX_RESTARTS, DEFAULT_RESTART_WINDOW)
    }

    pub fn with_policy(restart_delay: Duration, max_restarts: usize, restart_window: Duration) -> Self {
        Self {
            roles: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
            restart_delay,
            max_restarts,
            restart_window,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Registers a role but does not start it; call [`Supervisor::start_all`] once every
    /// role is registered.
    pub fn register(&self, name: impl Into<String>, body: RoleBody) {
        self.roles.lock().push(Arc::new(RoleProcess {
            name: name.into(),
            body,
            state: Mutex::new(RoleState::new()),
        }));
    }

    pub fn start_all(&self) {
        let roles = self.roles.lock().clone();
        let mut handles = self.handles.lock();
        for role in roles {
            let shutdown = self.shutdown.clone();
            let restart_delay = self.restart_delay;
            let max_restarts = self.max_restarts;
            let restart_window = self.restart_window;
            handles.push(tokio::spawn(run_role(
                role,
                shutdown,
                restart_delay,
                max_restarts,
                restart_window,
            )));
        }
        let heartbeat_roles = self.roles.lock().clone();
        let heartbeat_shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(heartbeat(heartbeat_roles, heartbeat_shutdown)));
    }

    pub fn snapshot(&self) -> Vec<RoleSnapshot> {
        self.roles
            .lock()
            .iter()
            .map(|role| {
                let state = role.state.lock();
                RoleSnapshot {
                    name: role.name.clone(),
                    status: state.status,
                    started: state.started,
                    crashed: state.crashed,
                    restarted: state.restarted,
                    last_error: state.last_error.clone(),
                }
            })
            .collect()
    }

    /// Signals every role to stop and waits up to the shutdown grace period before the
    /// handles are dropped (and their tasks aborted).
    pub async fn shutdown(&self) {
        self.shutdown.notify_waiters();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let wait = tokio::time::timeout(SHUTDOWN_GRACE, futures_util::future::join_all(handles));
        if wait.await.is_err() {
            warn!("roles did not stop within the shutdown grace period");
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_role(
    role: Arc<RoleProcess>,
    shutdown: Arc<tokio::sync::Notify>,
    restart_delay: Duration,
    max_restarts: usize,
    restart_window: Duration,
) {
    loop {
        {
            let mut state = role.state.lock();
            state.status = RoleStatus::Running;
            state.started += 1;
        }
        info!(role = %role.name, "role starting");

        let body = role.body.clone();
        let task = tokio::spawn(async move { body().await });

        tokio::select! {
            _ = shutdown.notified() => {
                task.abort();
                role.state.lock().status = RoleStatus::Stopped;
                info!(role = %role.name, "role stopped by shutdown signal");
                return;
            }
            outcome = task => {
                let error_message = match outcome {
                    Ok(Ok(())) => {
                        info!(role = %role.name, "role exited cleanly");
                        role.state.lock().status = RoleStatus::Stopped;
                        return;
                    }
                    Ok(Err(err)) => err.to_string(),
                    Err(join_error) => join_error.to_string(),
                };

                let mut state = role.state.lock();
                state.crashed += 1;
                state.last_error = Some(error_message.clone());
                error!(role = %role.name, error = %error_message, "role crashed");

                let now = Instant::now();
                state.recent_restarts.push_back(now);
                while state
                    .recent_restarts
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > restart_window)
                {
                    state.recent_restarts.pop_front();
                }

                if state.recent_restarts.len() > max_restarts {
                    state.status = RoleStatus::Exhausted;
                    error!(role = %role.name, "role exceeded restart budget, giving up");
                    return;
                }

                state.restarted += 1;
                state.status = RoleStatus::Restarting;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = shutdown.notified() => {
                role.state.lock().status = RoleStatus::Stopped;
                return;
            }
        }
    }
}

async fn heartbeat(roles: Vec<Arc<RoleProcess>>, shutdown: Arc<tokio::sync::Notify>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                for role in &roles {
                    let state = role.state.lock();
                    info!(
                        role = %role.name,
                        status = ?state.status,
                        crashed = state.crashed,
                        restarted = state.restarted,
                        "heartbeat"
                    );
                }
            }
            _ = shutdown.notified() => return,
        }
    }
}
