//! Drain loop and per-variant task delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::host::Param;
use crate::observability::metrics;
use crate::queue::{
    CompletionTask, HttpCompletion, WsClose, WsError, WsMessage, WsOpen, WsServerClose,
    WsServerError, WsServerMessage, WsServerOpen,
};
use crate::websocket::{MessageMode, PeerInfo, WebSocketClientSession};

/// Clears the drain flag even if a callback panics.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn dropped(task: &'static str, reason: &'static str) -> bool {
    tracing::trace!(task, reason, "Task dropped");
    metrics::record_task_dropped(task, reason);
    false
}

fn peer_params(peer: &PeerInfo) -> [Param; 2] {
    [
        Param::Str(peer.remote_address.clone()),
        Param::Str(peer.connection_id.to_string()),
    ]
}

impl Bridge {
    /// Deliver every task queued so far, in queue order, on this thread.
    ///
    /// Tasks pushed while draining wait for the next call. A nested call
    /// from inside a callback returns 0 without draining.
    pub fn drain(&self) -> usize {
        if self.draining.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _guard = DrainGuard(&self.draining);

        let tasks = self.queue.drain_all();
        let count = tasks.len();
        for task in tasks {
            let kind = task.kind();
            if self.deliver(task) {
                metrics::record_task_delivered(kind);
            }
        }
        if count > 0 {
            tracing::trace!(count, "Drained tasks");
        }
        count
    }

    /// Returns whether a callback ran.
    fn deliver(&self, task: CompletionTask) -> bool {
        match task {
            CompletionTask::HttpCompletion(task) => self.deliver_http(task),
            CompletionTask::WsMessage(task) => self.deliver_ws_message(task),
            CompletionTask::WsOpen(task) => self.deliver_ws_open(task),
            CompletionTask::WsClose(task) => self.deliver_ws_close(task),
            CompletionTask::WsError(task) => self.deliver_ws_error(task),
            CompletionTask::WsServerMessage(task) => self.deliver_server_message(task),
            CompletionTask::WsServerOpen(task) => self.deliver_server_open(task),
            CompletionTask::WsServerClose(task) => self.deliver_server_close(task),
            CompletionTask::WsServerError(task) => self.deliver_server_error(task),
        }
    }

    fn deliver_http(&self, task: HttpCompletion) -> bool {
        let Ok(session) = self.http_requests.get(task.request) else {
            return dropped("http_completion", "released");
        };
        let ran = if session.response_forward().has_listeners() {
            let body_len = task.body.len() as i64;
            session.response_forward().execute(
                self,
                &[
                    Param::Handle(task.request),
                    Param::Str(task.body),
                    Param::Cell(i64::from(task.status)),
                    Param::Cell(body_len),
                    Param::Cell(task.value),
                ],
            );
            true
        } else {
            dropped("http_completion", "no_listener")
        };
        // Single-shot: the callback may already have released it.
        let _ = self.http_requests.release(task.request);
        ran
    }

    fn deliver_ws_message(&self, task: WsMessage) -> bool {
        let Ok(client) = self.ws_clients.get(task.client) else {
            return dropped("ws_message", "released");
        };
        let forward = client.message_forward();
        if !forward.has_listeners() {
            return dropped("ws_message", "no_listener");
        }
        let len = task.text.len() as i64 + 1;

        match client.mode() {
            MessageMode::Text => {
                forward.execute(
                    self,
                    &[Param::Handle(task.client), Param::Str(task.text), Param::Cell(len)],
                );
            }
            MessageMode::Json => {
                let document = match self.json.parse(&task.text) {
                    Ok(document) => document,
                    Err(e) => {
                        tracing::error!(client = %task.client, error = %e, "Dropping WebSocket message that is not valid JSON");
                        return dropped("ws_message", "json_parse");
                    }
                };
                forward.execute(
                    self,
                    &[Param::Handle(task.client), Param::Handle(document), Param::Cell(len)],
                );
                let _ = self.json.release(document);
            }
        }
        true
    }

    fn deliver_ws_open(&self, task: WsOpen) -> bool {
        let Ok(client) = self.ws_clients.get(task.client) else {
            return dropped("ws_open", "released");
        };
        if !client.open_forward().has_listeners() {
            return dropped("ws_open", "no_listener");
        }
        client.open_forward().execute(self, &[Param::Handle(task.client)]);
        true
    }

    fn deliver_ws_close(&self, task: WsClose) -> bool {
        let Ok(client) = self.ws_clients.get(task.client) else {
            return dropped("ws_close", "released");
        };
        if !client.close_forward().has_listeners() {
            return dropped("ws_close", "no_listener");
        }
        client.close_forward().execute(
            self,
            &[
                Param::Handle(task.client),
                Param::Cell(i64::from(task.code)),
                Param::Str(task.reason),
            ],
        );
        true
    }

    fn deliver_ws_error(&self, task: WsError) -> bool {
        let Ok(client) = self.ws_clients.get(task.client) else {
            return dropped("ws_error", "released");
        };
        if !client.error_forward().has_listeners() {
            return dropped("ws_error", "no_listener");
        }
        client
            .error_forward()
            .execute(self, &[Param::Handle(task.client), Param::Str(task.reason)]);
        true
    }

    fn deliver_server_message(&self, task: WsServerMessage) -> bool {
        let Ok(server) = self.ws_servers.get(task.server) else {
            return dropped("ws_server_message", "released");
        };
        if !server.message_forward().has_listeners() {
            return dropped("ws_server_message", "no_listener");
        }

        let headers = server
            .connection_headers(task.peer.connection_id)
            .unwrap_or_default();
        let ephemeral = self
            .ws_clients
            .insert(Arc::new(WebSocketClientSession::ephemeral(task.link, headers)));
        let len = task.text.len() as i64;
        let [remote, id] = peer_params(&task.peer);

        server.message_forward().execute(
            self,
            &[
                Param::Handle(task.server),
                Param::Handle(ephemeral),
                Param::Str(task.text),
                Param::Cell(len),
                remote,
                id,
            ],
        );
        let _ = self.ws_clients.release(ephemeral);
        true
    }

    fn deliver_server_open(&self, task: WsServerOpen) -> bool {
        let Ok(server) = self.ws_servers.get(task.server) else {
            return dropped("ws_server_open", "released");
        };
        if !server.open_forward().has_listeners() {
            return dropped("ws_server_open", "no_listener");
        }
        let [remote, id] = peer_params(&task.peer);
        server
            .open_forward()
            .execute(self, &[Param::Handle(task.server), remote, id]);
        true
    }

    fn deliver_server_close(&self, task: WsServerClose) -> bool {
        let Ok(server) = self.ws_servers.get(task.server) else {
            return dropped("ws_server_close", "released");
        };
        if !server.close_forward().has_listeners() {
            return dropped("ws_server_close", "no_listener");
        }
        let [remote, id] = peer_params(&task.peer);
        server.close_forward().execute(
            self,
            &[
                Param::Handle(task.server),
                Param::Cell(i64::from(task.code)),
                Param::Str(task.reason),
                remote,
                id,
            ],
        );
        true
    }

    fn deliver_server_error(&self, task: WsServerError) -> bool {
        let Ok(server) = self.ws_servers.get(task.server) else {
            return dropped("ws_server_error", "released");
        };
        if !server.error_forward().has_listeners() {
            return dropped("ws_server_error", "no_listener");
        }
        let [remote, id] = peer_params(&task.peer);
        server.error_forward().execute(
            self,
            &[Param::Handle(task.server), Param::Str(task.reason), remote, id],
        );
        true
    }
}
