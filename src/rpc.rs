//! JSON-RPC поверх любого двунаправленного канала строковых сообщений.
//!
//! Канал ничего не знает о WebRTC и комнатах: исходящие сообщения уходят
//! через [`MessageSink`], входящие передаются в [`RpcChannel::handle_message`].
//!
//! Входящие вызовы с асинхронным обработчиком выполняются в отдельной задаче,
//! поэтому медленный обработчик не задерживает остальные сообщения.
//! Синхронные обработчики выполняются прямо в `handle_message` в порядке
//! поступления; долгий синхронный обработчик задерживает следующее сообщение.

use crate::error::RpcError;
use crate::utils::new_call_id;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Таймаут ожидания ответа по умолчанию
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Единственный способ, которым канал отправляет данные
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send_message(&self, raw: String) -> Result<(), String>;
}

#[async_trait]
impl MessageSink for mpsc::UnboundedSender<String> {
    async fn send_message(&self, raw: String) -> Result<(), String> {
        self.send(raw).map_err(|_| "transport closed".to_string())
    }
}

type SyncHandler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Sync(SyncHandler),
    Async(AsyncHandler),
}

/// Исходящий вызов; `id == None` означает уведомление без ответа
#[derive(Serialize, Debug)]
struct CallEnvelope<'a> {
    method: &'a str,
    params: &'a Value,
    id: Option<&'a str>,
}

#[derive(Serialize, Debug)]
struct ResponseEnvelope<'a> {
    id: &'a str,
    result: Value,
}

#[derive(Deserialize, Debug)]
struct InboundEnvelope {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
}

pub struct RpcChannel {
    label: String,
    sink: Arc<dyn MessageSink>,
    default_timeout: Duration,
    handlers: RwLock<HashMap<String, Handler>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    closed: AtomicBool,
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("label", &self.label)
            .field("pending", &self.pending.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RpcChannel {
    pub fn new(label: impl Into<String>, sink: Arc<dyn MessageSink>) -> Arc<Self> {
        Self::with_timeout(label, sink, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(
        label: impl Into<String>,
        sink: Arc<dyn MessageSink>,
        default_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            sink,
            default_timeout,
            handlers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Регистрирует асинхронный обработчик; повторная регистрация заменяет прежний
    pub fn on<F, Fut, E>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let handler: AsyncHandler = Arc::new(move |params| {
            let fut = handler(params);
            Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
        });
        self.handlers
            .write()
            .insert(method.to_string(), Handler::Async(handler));
    }

    /// Регистрирует синхронный обработчик, выполняемый в порядке поступления
    pub fn on_sync<F, E>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value, E> + Send + Sync + 'static,
        E: fmt::Display + 'static,
    {
        let handler: SyncHandler = Arc::new(move |params| handler(params).map_err(|e| e.to_string()));
        self.handlers
            .write()
            .insert(method.to_string(), Handler::Sync(handler));
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }

    /// Количество вызовов, ожидающих ответа
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Уведомление без ожидания ответа; доставка не гарантируется
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        self.call(method, params, false, self.default_timeout)
            .await
            .map(|_| ())
    }

    /// Вызов с ожиданием ответа и таймаутом по умолчанию
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.request_with_timeout(method, params, self.default_timeout)
            .await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.call(method, params, true, timeout)
            .await
            .map(|v| v.unwrap_or(Value::Null))
    }

    /// Отправляет `{method, params, id}`.
    ///
    /// Без `await_response` возвращается сразу с `Ok(None)`. Иначе ждёт ответ
    /// не дольше `timeout` и возвращает `result`.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        await_response: bool,
        timeout: Duration,
    ) -> Result<Option<Value>, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Closed {
                method: method.to_string(),
            });
        }

        if !await_response {
            let raw = serde_json::to_string(&CallEnvelope {
                method,
                params: &params,
                id: None,
            })?;
            self.send(method, raw).await?;
            return Ok(None);
        }

        let id = new_call_id();
        let raw = serde_json::to_string(&CallEnvelope {
            method,
            params: &params,
            id: Some(&id),
        })?;

        // регистрируем ожидание до отправки, чтобы не пропустить быстрый ответ
        let (tx, rx) = oneshot::channel();
        {
            // флаг проверяется под тем же замком, которым `close` чистит ожидания
            let mut pending = self.pending.lock();
            if self.is_closed() {
                return Err(RpcError::Closed {
                    method: method.to_string(),
                });
            }
            pending.insert(id.clone(), tx);
        }

        if let Err(e) = self.send(method, raw).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.pending.lock().remove(&id);

        let result = match outcome {
            Err(_) => {
                tracing::warn!(target: "agent_room::rpc", channel = %self.label, method, "call timed out");
                return Err(RpcError::Timeout {
                    method: method.to_string(),
                });
            }
            Ok(Err(_)) => {
                return Err(RpcError::Closed {
                    method: method.to_string(),
                })
            }
            Ok(Ok(result)) => result,
        };

        if let Some(message) = error_message(&result) {
            return Err(RpcError::Remote {
                method: method.to_string(),
                message,
            });
        }

        Ok(Some(result))
    }

    async fn send(&self, method: &str, raw: String) -> Result<(), RpcError> {
        self.sink
            .send_message(raw)
            .await
            .map_err(|reason| RpcError::Send {
                method: method.to_string(),
                reason,
            })
    }

    /// Входящее сообщение от транспорта. Никогда не возвращает ошибку:
    /// испорченные и неадресуемые сообщения логируются и отбрасываются.
    pub async fn handle_message(self: &Arc<Self>, raw: &str) {
        let envelope: InboundEnvelope = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "agent_room::rpc", channel = %self.label, "Error parsing message: {e}");
                return;
            }
        };

        let id = match envelope.id {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };

        match (envelope.method, envelope.params) {
            (Some(method), Some(params)) if !params.is_null() => {
                self.dispatch_call(method, params, id).await;
            }
            _ => self.deliver_response(id, envelope.result),
        }
    }

    async fn dispatch_call(self: &Arc<Self>, method: String, params: Value, id: Option<String>) {
        let handler = self.handlers.read().get(&method).cloned();
        let Some(handler) = handler else {
            tracing::warn!(target: "agent_room::rpc", channel = %self.label, method = %method, "no handler for message, dropping");
            return;
        };
        tracing::debug!(target: "agent_room::rpc", channel = %self.label, method = %method, "Handling request");

        match handler {
            Handler::Sync(h) => {
                let outcome = h(params);
                self.finish_call(&method, id, outcome).await;
            }
            Handler::Async(h) => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = h(params).await;
                    this.finish_call(&method, id, outcome).await;
                });
            }
        }
    }

    async fn finish_call(&self, method: &str, id: Option<String>, outcome: Result<Value, String>) {
        let Some(id) = id else {
            if let Err(e) = outcome {
                tracing::warn!(target: "agent_room::rpc", channel = %self.label, method, "notification handler failed: {e}");
            }
            return;
        };

        let result = match outcome {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "agent_room::rpc", channel = %self.label, method, "Error handling message: {e}");
                json!({ "error": e })
            }
        };

        let raw = match serde_json::to_string(&ResponseEnvelope { id: &id, result }) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(target: "agent_room::rpc", channel = %self.label, method, "failed to encode response: {e}");
                return;
            }
        };
        if let Err(e) = self.sink.send_message(raw).await {
            tracing::warn!(target: "agent_room::rpc", channel = %self.label, method, "failed to send response: {e}");
        }
    }

    fn deliver_response(&self, id: Option<String>, result: Option<Value>) {
        let Some(id) = id else {
            tracing::warn!(target: "agent_room::rpc", channel = %self.label, "message is neither a call nor a response, dropping");
            return;
        };

        let Some(tx) = self.pending.lock().remove(&id) else {
            tracing::warn!(target: "agent_room::rpc", channel = %self.label, id = %id, "response for unknown call, dropping");
            return;
        };

        // ожидающий мог уже уйти по таймауту
        let _ = tx.send(result.unwrap_or(Value::Null));
    }

    /// Закрывает канал: все ожидающие вызовы завершаются с `RpcError::Closed`
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.lock().clear();
    }
}

/// `result.error` в смысле JavaScript-истинности
fn error_message(result: &Value) -> Option<String> {
    match result.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn channel() -> (Arc<RpcChannel>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        (RpcChannel::new("test", Arc::new(tx)), rx)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame expected")
            .expect("sink open");
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_notify_has_no_id_and_no_pending_entry() {
        let (rpc, mut rx) = channel();
        rpc.notify("relay_ice_candidate", json!({"peer_id": "p1"}))
            .await
            .unwrap();
        assert_eq!(rpc.pending_calls(), 0);

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["method"], "relay_ice_candidate");
        assert!(frame["id"].is_null());

        // поздний "ответ" ни на что не влияет
        rpc.handle_message(r#"{"id": "whatever", "result": {}}"#).await;
        assert_eq!(rpc.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let (rpc, _rx) = channel();
        let start = Instant::now();
        let err = rpc
            .request_with_timeout("join", json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("join"));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(1500));
        assert_eq!(rpc.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_request_resolves_with_result() {
        let (rpc, mut rx) = channel();
        let caller = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.request("join", json!({"room_id": "room1"})).await })
        };

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["params"]["room_id"], "room1");
        let id = frame["id"].as_str().unwrap().to_string();
        rpc.handle_message(&json!({"id": id, "result": {"existing_peers": []}}).to_string())
            .await;

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result, json!({"existing_peers": []}));
        assert_eq!(rpc.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_error_result_becomes_remote_error() {
        let (rpc, mut rx) = channel();
        let caller = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.request("join", json!({})).await })
        };

        let frame = next_frame(&mut rx).await;
        let id = frame["id"].as_str().unwrap().to_string();
        rpc.handle_message(&json!({"id": id, "result": {"error": "room is full"}}).to_string())
            .await;

        match caller.await.unwrap() {
            Err(RpcError::Remote { method, message }) => {
                assert_eq!(method, "join");
                assert_eq!(message, "room is full");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_response_leaves_pending_calls_alone() {
        let (rpc, mut rx) = channel();
        let caller = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.request("join", json!({})).await })
        };
        let frame = next_frame(&mut rx).await;
        let id = frame["id"].as_str().unwrap().to_string();

        rpc.handle_message(r#"{"id": "not-a-pending-id", "result": {"x": 1}}"#)
            .await;
        rpc.handle_message("{not json").await;
        rpc.handle_message(r#"{"result": {}}"#).await;
        assert_eq!(rpc.pending_calls(), 1);

        rpc.handle_message(&json!({"id": id, "result": {"ok": true}}).to_string())
            .await;
        assert_eq!(caller.await.unwrap().unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_inbound_call_gets_response() {
        let (rpc, mut rx) = channel();
        rpc.on("echo", |params: Value| async move { Ok::<_, String>(params) });

        rpc.handle_message(r#"{"method": "echo", "params": {"a": 1}, "id": "c1"}"#)
            .await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame, json!({"id": "c1", "result": {"a": 1}}));
    }

    #[tokio::test]
    async fn test_handler_error_is_sent_back() {
        let (rpc, mut rx) = channel();
        rpc.on_sync("fail", |_| Err::<Value, _>("nope"));

        rpc.handle_message(r#"{"method": "fail", "params": {}, "id": "c2"}"#)
            .await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame, json!({"id": "c2", "result": {"error": "nope"}}));
    }

    #[tokio::test]
    async fn test_missing_handler_is_dropped() {
        let (rpc, mut rx) = channel();
        rpc.handle_message(r#"{"method": "unknown", "params": {}, "id": "c3"}"#)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let (rpc, mut rx) = channel();
        rpc.on_sync("m", |_| Ok::<_, String>(json!(1)));
        rpc.on_sync("m", |_| Ok::<_, String>(json!(2)));

        rpc.handle_message(r#"{"method": "m", "params": {}, "id": "c4"}"#)
            .await;
        assert_eq!(next_frame(&mut rx).await["result"], 2);
    }

    #[tokio::test]
    async fn test_notification_runs_handler_without_response() {
        let (rpc, mut rx) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            rpc.on_sync("speech_detected", move |params: Value| {
                seen.lock().push(params["text"].as_str().unwrap_or_default().to_string());
                Ok::<_, String>(Value::Null)
            });
        }

        rpc.handle_message(r#"{"method": "speech_detected", "params": {"text": "hi"}, "id": null}"#)
            .await;
        rpc.handle_message(r#"{"method": "speech_detected", "params": {"text": "there"}}"#)
            .await;

        assert_eq!(*seen.lock(), vec!["hi".to_string(), "there".to_string()]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_fails_pending_calls() {
        let (rpc, _rx) = channel();
        let caller = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.request("join", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        rpc.close();

        assert!(matches!(
            caller.await.unwrap(),
            Err(RpcError::Closed { .. })
        ));
        assert!(matches!(
            rpc.notify("x", json!({})).await,
            Err(RpcError::Closed { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_with_requests_never_waits_for_timeout() {
        let (tx, _rx) = mpsc::unbounded_channel::<String>();
        let rpc = RpcChannel::with_timeout("test", Arc::new(tx), Duration::from_secs(30));

        let callers: Vec<_> = (0..64)
            .map(|_| {
                let rpc = rpc.clone();
                tokio::spawn(async move { rpc.request("join", json!({})).await })
            })
            .collect();
        rpc.close();

        for caller in callers {
            let result = tokio::time::timeout(Duration::from_secs(2), caller)
                .await
                .expect("request outlived close")
                .unwrap();
            assert!(matches!(result, Err(RpcError::Closed { .. })));
        }
        assert_eq!(rpc.pending_calls(), 0);
    }
}
