//! IPC server implementation

use rental_api::{
    ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, Request, Response,
};
use rental_util::ObserverId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from client to server
pub enum ServerMessage {
    Request {
        observer_id: ObserverId,
        request: Request,
    },
    ClientConnected {
        observer_id: ObserverId,
        info: ClientInfo,
    },
    ClientDisconnected {
        observer_id: ObserverId,
    },
}

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ObserverId, ClientHandle>>>,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
    shutdown_tx: watch::Sender<bool>,
    closed: AtomicBool,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

impl IpcServer {
    /// Create a new IPC server. `event_buffer` bounds how far a slow
    /// subscriber may fall behind before it is told to resync.
    pub fn new(socket_path: impl AsRef<Path>, event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
            shutdown_tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Stale socket from a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group (the counter staff) only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid, nix::unistd::getuid().as_raw());

                    let info = ClientInfo::new(role);
                    let info = match uid {
                        Some(u) => info.with_uid(u),
                        None => info,
                    };

                    debug!(observer_id = %info.observer_id, uid = ?uid, role = ?role, "Accepted connection");

                    self.handle_client(stream, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, info: ClientInfo) {
        let observer_id = info.observer_id.clone();
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        // Subscribe before registering so no event published after the
        // client's SubscribeEvents request can be missed
        let mut event_rx = self.event_tx.subscribe();

        {
            let mut clients = self.clients.write().await;
            clients.insert(
                observer_id.clone(),
                ClientHandle {
                    info: info.clone(),
                    response_tx: response_tx.clone(),
                    subscribed: false,
                },
            );
        }

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            observer_id: observer_id.clone(),
            info,
        });

        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let reader_id = observer_id.clone();
        let mut reader_shutdown = self.shutdown_tx.subscribe();
        let mut writer_shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                let read = tokio::select! {
                    read = reader.read_line(&mut line) => read,
                    _ = reader_shutdown.changed() => break,
                };
                match read {
                    Ok(0) => {
                        debug!(observer_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                // The flag flips before the request is
                                // dispatched, so the snapshot in the reply
                                // is never older than the first delta sent
                                let subscribed = match request.command {
                                    Command::SubscribeEvents => Some(true),
                                    Command::UnsubscribeEvents => Some(false),
                                    _ => None,
                                };
                                if let Some(subscribed) = subscribed {
                                    let mut clients = clients.write().await;
                                    if let Some(handle) = clients.get_mut(&reader_id) {
                                        handle.subscribed = subscribed;
                                    }
                                }

                                let _ = message_tx.send(ServerMessage::Request {
                                    observer_id: reader_id.clone(),
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(
                                    observer_id = %reader_id,
                                    error = %e,
                                    "Invalid request"
                                );
                                let response = Response::error(
                                    0,
                                    ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                                );
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = response_tx.send(json);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(observer_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }

            // Dropping the handle closes the writer's response channel
            clients.write().await.remove(&reader_id);
        });

        let clients_writer = self.clients.clone();
        let message_tx_writer = self.message_tx.clone();

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                let line = tokio::select! {
                    response = response_rx.recv() => match response {
                        Some(response) => response,
                        None => break,
                    },

                    event = event_rx.recv() => {
                        let is_subscribed = {
                            let clients = clients_writer.read().await;
                            clients.get(&observer_id).map(|h| h.subscribed).unwrap_or(false)
                        };

                        let event = match event {
                            Ok(event) => event,
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(observer_id = %observer_id, missed, "Observer lagged behind event stream");
                                Event::new(EventPayload::ResyncRequired { missed })
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        if !is_subscribed {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event");
                                continue;
                            }
                        }
                    }

                    _ = writer_shutdown.changed() => {
                        // Deliver what was queued, the shutdown notice included
                        let is_subscribed = {
                            let clients = clients_writer.read().await;
                            clients.get(&observer_id).map(|h| h.subscribed).unwrap_or(false)
                        };
                        while let Ok(event) = event_rx.try_recv() {
                            if !is_subscribed {
                                continue;
                            }
                            if let Ok(mut json) = serde_json::to_string(&event) {
                                json.push('\n');
                                if writer.write_all(json.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                        }
                        break;
                    }
                };

                let mut msg = line;
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(observer_id = %observer_id, error = %e, "Write error");
                    break;
                }
            }

            let _ = message_tx_writer.send(ServerMessage::ClientDisconnected {
                observer_id: observer_id.clone(),
            });

            clients_writer.write().await.remove(&observer_id);
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, observer_id: &ObserverId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(observer_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Get client info
    pub async fn get_client_info(&self, observer_id: &ObserverId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(observer_id).map(|h| h.info.clone())
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Notify subscribers, close every connection and remove the socket
    /// file. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.event_tx.send(Event::new(EventPayload::Shutdown));
        self.shutdown_tx.send_replace(true);

        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        info!(path = %self.socket_path.display(), "IPC server closed");
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Role granted to a peer. The service owner and root administer; other
/// local users that can open the socket operate the counter; peers without
/// credentials only watch.
pub fn role_for_uid(peer_uid: Option<u32>, service_uid: u32) -> ClientRole {
    match peer_uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == service_uid => ClientRole::Admin,
        Some(_) => ClientRole::Operator,
        None => ClientRole::Observer,
    }
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path, 16);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        assert!(server.take_message_receiver().await.is_some());
        assert!(server.take_message_receiver().await.is_none());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[test]
    fn test_roles_from_uid() {
        assert_eq!(role_for_uid(Some(0), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1000), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1001), 1000), ClientRole::Operator);
        assert_eq!(role_for_uid(None, 1000), ClientRole::Observer);
    }

    #[tokio::test]
    async fn test_connect_registers_client() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path, 16);
        server.start().await.unwrap();
        let mut messages = server.take_message_receiver().await.unwrap();
        let server = Arc::new(server);

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });

        let _stream = UnixStream::connect(&socket_path).await.unwrap();

        match messages.recv().await {
            Some(ServerMessage::ClientConnected { observer_id, info }) => {
                assert_eq!(observer_id, info.observer_id);
                assert_eq!(info.role, ClientRole::Admin);
                assert!(server.get_client_info(&observer_id).await.is_some());
            }
            _ => panic!("Expected ClientConnected"),
        }
        assert_eq!(server.client_count().await, 1);
    }
}
