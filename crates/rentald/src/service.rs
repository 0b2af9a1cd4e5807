//! Main service state and request dispatch

use anyhow::{Context, Result};
use rental_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus,
    Response, ResponsePayload, API_VERSION,
};
use rental_config::Policy;
use rental_core::{CoreEvent, RentalEngine};
use rental_ipc::{IpcServer, ServerMessage};
use rental_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use rental_util::RateLimiter;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

/// Requests per second allowed per client
const RATE_LIMIT_PER_SECOND: u32 = 30;

/// How often idle rate-limiter buckets are dropped
const RATE_LIMIT_CLEANUP: Duration = Duration::from_secs(60);

const DB_FILENAME: &str = "rentald.db";

/// Main service state
pub struct Service {
    engine: Arc<RentalEngine>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    tick_interval: Duration,
}

impl Service {
    /// Open the store, recover in-progress sessions and start listening
    pub async fn new(policy: &Policy, socket_path: &Path, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DB_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let engine = Arc::new(RentalEngine::new(policy, store.clone()));
        let recovered = engine.recover(rental_util::now());
        if recovered > 0 {
            info!(recovered, "Resumed tracking of in-progress sessions");
        }

        let mut ipc = IpcServer::new(socket_path, policy.sync.event_buffer);
        ipc.start()
            .await
            .with_context(|| format!("Failed to listen on {:?}", socket_path))?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            ipc: Arc::new(ipc),
            store,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_PER_SECOND,
                Duration::from_secs(1),
            ))),
            tick_interval: policy.service.tick_interval,
        })
    }

    pub fn engine(&self) -> &Arc<RentalEngine> {
        &self.engine
    }

    pub fn socket_path(&self) -> PathBuf {
        self.ipc.socket_path().to_path_buf()
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let ipc = self.ipc.clone();
        let engine = self.engine.clone();
        let mut ipc_messages = ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        // Engine broadcasts reach IPC subscribers through this task
        let (engine_events, _) = engine.subscribe(rental_util::now());
        let forwarder = tokio::spawn(Self::forward_events(engine_events, ipc.clone()));

        let ipc_accept = ipc.clone();
        let acceptor = tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut tick_timer = tokio::time::interval(self.tick_interval);
        let mut cleanup_timer = tokio::time::interval(RATE_LIMIT_CLEANUP);
        tokio::pin!(shutdown);

        info!("Service running");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                // Expiry warnings and automatic expiry
                _ = tick_timer.tick() => {
                    for event in engine.tick(rental_util::now()) {
                        match event {
                            CoreEvent::ExpiryWarning { session_id, remaining_minutes, .. } => {
                                debug!(session_id = %session_id, remaining_minutes, "Tick: expiry warning");
                            }
                            CoreEvent::Expired(outcome) => {
                                debug!(
                                    session_id = %outcome.session.session_id,
                                    billed_amount = %outcome.billed_amount,
                                    "Tick: session expired"
                                );
                            }
                        }
                    }
                }

                _ = cleanup_timer.tick() => {
                    self.rate_limiter.lock().await.cleanup(RATE_LIMIT_CLEANUP);
                }

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg).await;
                }
            }
        }

        info!("Shutting down rentald");

        acceptor.abort();
        forwarder.abort();

        engine.shutdown(rental_util::now());
        // Sends the shutdown notice itself and closes every connection
        ipc.shutdown();

        if let Err(e) = self.store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    async fn forward_events(mut events: broadcast::Receiver<Event>, ipc: Arc<IpcServer>) {
        loop {
            match events.recv().await {
                Ok(event) => ipc.broadcast_event(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event forwarder lagged");
                    ipc.broadcast_event(Event::new(EventPayload::ResyncRequired { missed }));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_ipc_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request {
                observer_id,
                request,
            } => {
                let throttled = self.rate_limiter.lock().await.check(&observer_id);
                if let Err(retry_after) = throttled {
                    debug!(observer_id = %observer_id, ?retry_after, "Request throttled");
                    let response = Response::error(
                        request.request_id,
                        ErrorInfo::new(
                            ErrorCode::RateLimited,
                            format!("Too many requests, retry in {}ms", retry_after.as_millis()),
                        ),
                    );
                    let _ = self.ipc.send_response(&observer_id, response).await;
                    return;
                }

                let engine = self.engine.clone();
                let ipc = self.ipc.clone();
                tokio::spawn(async move {
                    let info = ipc
                        .get_client_info(&observer_id)
                        .await
                        .unwrap_or_else(|| ClientInfo {
                            observer_id: observer_id.clone(),
                            role: ClientRole::Observer,
                            uid: None,
                        });

                    let response = if request.api_version != API_VERSION {
                        Response::error(
                            request.request_id,
                            ErrorInfo::new(
                                ErrorCode::InvalidRequest,
                                format!(
                                    "Unsupported API version {} (expected {})",
                                    request.api_version, API_VERSION
                                ),
                            ),
                        )
                    } else {
                        handle_command(&engine, &ipc, &info, request.request_id, request.command)
                            .await
                    };

                    let _ = ipc.send_response(&observer_id, response).await;
                });
            }
            ServerMessage::ClientConnected { observer_id, info } => {
                info!(
                    observer_id = %observer_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );
                let _ = self.store.append_audit(AuditEvent::new(AuditEventType::ClientConnected {
                    observer_id: observer_id.to_string(),
                    role: format!("{:?}", info.role),
                    uid: info.uid,
                }));
            }
            ServerMessage::ClientDisconnected { observer_id } => {
                debug!(observer_id = %observer_id, "Client disconnected");
                let _ = self.store.append_audit(AuditEvent::new(
                    AuditEventType::ClientDisconnected {
                        observer_id: observer_id.to_string(),
                    },
                ));
                self.rate_limiter.lock().await.remove_observer(&observer_id);
            }
        }
    }
}

fn reply<T>(
    request_id: u64,
    result: rental_util::Result<T>,
    payload: impl FnOnce(T) -> ResponsePayload,
) -> Response {
    match result {
        Ok(value) => Response::success(request_id, payload(value)),
        Err(e) => {
            debug!(request_id, error = %e, "Request failed");
            Response::error(request_id, ErrorInfo::from(&e))
        }
    }
}

fn permission_denied(request_id: u64, info: &ClientInfo) -> Response {
    warn!(observer_id = %info.observer_id, role = ?info.role, "Permission denied");
    Response::error(
        request_id,
        ErrorInfo::new(
            ErrorCode::PermissionDenied,
            format!("{:?} clients may not do that", info.role),
        ),
    )
}

/// Execute one command on behalf of `info`
pub async fn handle_command(
    engine: &RentalEngine,
    ipc: &IpcServer,
    info: &ClientInfo,
    request_id: u64,
    command: Command,
) -> Response {
    let now = rental_util::now();

    if command.is_session_mutation() && !info.role.can_mutate_sessions() {
        return permission_denied(request_id, info);
    }

    match command {
        Command::Start {
            resource_id,
            customer_name,
            mode,
            duration_minutes,
        } => reply(
            request_id,
            engine.start(&resource_id, &customer_name, mode, duration_minutes, now),
            ResponsePayload::Session,
        ),

        Command::Pause { session_id } => reply(
            request_id,
            engine.pause(&session_id, now),
            ResponsePayload::Session,
        ),

        Command::Resume { session_id } => reply(
            request_id,
            engine.resume(&session_id, now),
            ResponsePayload::Session,
        ),

        Command::Finish { session_id } => reply(
            request_id,
            engine.finish(&session_id, now),
            ResponsePayload::Finished,
        ),

        Command::ListActive => {
            Response::success(request_id, ResponsePayload::Snapshot(engine.snapshot(now)))
        }

        Command::History { filter } => reply(request_id, engine.history(&filter), |sessions| {
            ResponsePayload::Sessions { sessions }
        }),

        Command::Stats { filter } => {
            reply(request_id, engine.stats(&filter), ResponsePayload::Stats)
        }

        Command::ListResources => Response::success(
            request_id,
            ResponsePayload::Resources {
                resources: engine.list_resources(),
            },
        ),

        Command::Quote { session_id } => reply(
            request_id,
            engine.quote(&session_id, now),
            ResponsePayload::Quote,
        ),

        Command::Reconcile { report } => reply(
            request_id,
            engine.reconcile(&report, now),
            ResponsePayload::Reconciled,
        ),

        Command::SubscribeEvents => Response::success(
            request_id,
            ResponsePayload::Subscribed {
                observer_id: info.observer_id.clone(),
                snapshot: engine.snapshot(now),
            },
        ),

        Command::UnsubscribeEvents => {
            Response::success(request_id, ResponsePayload::Unsubscribed)
        }

        Command::GetHealth => {
            let store_ok = engine.is_store_healthy();
            Response::success(
                request_id,
                ResponsePayload::Health(HealthStatus {
                    live: true,
                    ready: store_ok,
                    store_ok,
                    active_sessions: engine.active_count(),
                    connected_clients: ipc.client_count().await,
                }),
            )
        }

        Command::ClearHistory { before } => {
            if !info.role.can_clear_history() {
                return permission_denied(request_id, info);
            }
            reply(request_id, engine.clear_history(before, now), |removed| {
                ResponsePayload::HistoryCleared { removed }
            })
        }

        Command::Ping => Response::success(request_id, ResponsePayload::Pong),
    }
}
