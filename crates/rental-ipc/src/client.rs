//! IPC client implementation

use rental_api::{ActiveSnapshot, Command, Event, Request, Response, ResponsePayload, ResponseResult};
use rental_util::ObserverId;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// A line from the service: either a reply or a pushed event
#[derive(Deserialize)]
#[serde(untagged)]
enum Incoming {
    Response(Response),
    Event(Event),
}

/// IPC Client for connecting to rentald
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
    /// Partial line kept across cancelled reads
    line: String,
    /// Events that arrived while waiting for a response
    pending_events: VecDeque<Event>,
}

impl IpcClient {
    /// Connect to rentald
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            line: String::new(),
            pending_events: VecDeque::new(),
        })
    }

    /// Read one complete message. Safe to cancel: a partial line stays in
    /// the buffer for the next call.
    async fn read_message(&mut self) -> IpcResult<Incoming> {
        loop {
            let n = self.reader.read_line(&mut self.line).await?;
            if n == 0 {
                return Err(IpcError::ConnectionClosed);
            }
            if !self.line.ends_with('\n') {
                continue;
            }

            let line = std::mem::take(&mut self.line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map_err(|e| IpcError::InvalidMessage(format!("{}: {}", e, line)));
        }
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        loop {
            match self.read_message().await? {
                Incoming::Event(event) => self.pending_events.push_back(event),
                // Parse failures are reported with request id 0
                Incoming::Response(response)
                    if response.request_id == request_id || response.request_id == 0 =>
                {
                    return Ok(response);
                }
                Incoming::Response(response) => {
                    return Err(IpcError::InvalidMessage(format!(
                        "Response for request {} while waiting for {}",
                        response.request_id, request_id
                    )));
                }
            }
        }
    }

    /// Send a command and unwrap a successful payload
    pub async fn call(&mut self, command: Command) -> IpcResult<ResponsePayload> {
        match self.send(command).await?.result {
            ResponseResult::Ok(payload) => Ok(payload),
            ResponseResult::Err(e) => Err(IpcError::ServerError(format!("{:?}: {}", e.code, e.message))),
        }
    }

    /// Subscribe to events. Returns the observer id the service assigned
    /// and a snapshot taken after the subscription became effective.
    ///
    /// Calling this again while subscribed fetches a fresh snapshot.
    pub async fn subscribe(&mut self) -> IpcResult<(ObserverId, ActiveSnapshot)> {
        match self.call(Command::SubscribeEvents).await? {
            ResponsePayload::Subscribed {
                observer_id,
                snapshot,
            } => Ok((observer_id, snapshot)),
            other => Err(IpcError::InvalidMessage(format!(
                "Unexpected subscribe reply: {:?}",
                other
            ))),
        }
    }

    /// Wait for the next pushed event
    pub async fn next_event(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }

        loop {
            match self.read_message().await? {
                Incoming::Event(event) => return Ok(event),
                Incoming::Response(response) => {
                    tracing::debug!(request_id = response.request_id, "Ignoring unsolicited response");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rental_api::{EventPayload, API_VERSION};

    #[test]
    fn incoming_distinguishes_responses_and_events() {
        let response = serde_json::to_string(&Response::success(3, ResponsePayload::Pong)).unwrap();
        assert!(matches!(
            serde_json::from_str::<Incoming>(&response).unwrap(),
            Incoming::Response(r) if r.request_id == 3
        ));

        let event = serde_json::to_string(&Event::new(EventPayload::Shutdown)).unwrap();
        match serde_json::from_str::<Incoming>(&event).unwrap() {
            Incoming::Event(e) => {
                assert_eq!(e.api_version, API_VERSION);
                assert!(matches!(e.payload, EventPayload::Shutdown));
            }
            Incoming::Response(_) => panic!("Event parsed as response"),
        }
    }
}
