//! Chat session: the per-conversation runtime. Owns a local event bus, a
//! message manager, and drives an explicit tool-calling loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use agent_mcp_client::McpClientManager;
use agent_storage::StorageBackend;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::event_bus::{CancellationHandle, EventBus};
use crate::events::{GlobalEvent, SessionEventKind};
use crate::formatter::{Formatter, GenericFormatter};
use crate::history::MessageHistory;
use crate::llm_service::{LlmConfig, LlmService, LlmServiceError, LlmTurn, ToolCall};
use crate::message::Message;
use crate::tokenizer::{ApproxTokenizer, Tokenizer};

/// Default safety bound on tool-calling-loop iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

/// Cooperative cancellation handle threaded through `run`. Checked
/// between loop iterations and before/after each tool call;
/// aborting mid-tool-call cannot interrupt a transport that doesn't
/// support it, but the loop will not start another iteration afterward.
#[derive(Clone, Default)]
pub struct RunCancellation(Arc<AtomicBool>);

impl RunCancellation {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Message manager: history plus the provider/model-specific tokenizer and
/// router-specific formatter.
struct MessageManager {
    history: MessageHistory,
    tokenizer: Arc<dyn Tokenizer>,
    formatter: Arc<dyn Formatter>,
}

fn tokenizer_for_provider(_provider: &str) -> Arc<dyn Tokenizer> {
    // No provider-native tokenizer is implemented here; every provider
    // currently resolves to the same whitespace heuristic. The per-provider seam
    // exists so a real tokenizer can be slotted in without touching
    // `switch_llm`'s rebuild-on-provider-change logic.
    Arc::new(ApproxTokenizer)
}

fn formatter_for_router(router: &str) -> Arc<dyn Formatter> {
    Arc::new(GenericFormatter::new(router))
}

/// The per-conversation, in-memory runtime.
pub struct ChatSession {
    pub id: String,
    local_bus: EventBus<SessionEventKind>,
    forward_scope: CancellationHandle<SessionEventKind>,
    message_manager: tokio::sync::Mutex<MessageManager>,
    llm_service: tokio::sync::RwLock<Arc<dyn LlmService>>,
    llm_config: tokio::sync::RwLock<LlmConfig>,
    mcp: Arc<McpClientManager>,
    disposed: AtomicBool,
    next_call_id: AtomicUsize,

    // Counters exposed for the "LM switch optimization" invariant (spec
    // §8): tests assert these only increment when the provider/router
    // actually changes.
    pub tokenizer_rebuilds: AtomicUsize,
    pub formatter_rebuilds: AtomicUsize,
}

impl ChatSession {
    /// Acquires the collection provider for history and constructs the
    /// message manager and LM service handle. An
    /// initialization failure here is fatal to the session — callers
    /// should not retain a `ChatSession` from an `Err` result.
    pub async fn new(
        id: impl Into<String>,
        history_backend: Arc<dyn StorageBackend>,
        llm_service: Arc<dyn LlmService>,
        mcp: Arc<McpClientManager>,
        global_bus: EventBus<GlobalEvent>,
    ) -> CoreResult<Self> {
        let id = id.into();
        let config = llm_service.get_config();
        let history = MessageHistory::new(history_backend, &id);

        let message_manager = MessageManager {
            history,
            tokenizer: tokenizer_for_provider(&config.provider),
            formatter: formatter_for_router(&config.router),
        };

        let local_bus: EventBus<SessionEventKind> = EventBus::new();
        let forward_scope = local_bus.scope();
        let session_id = id.clone();
        forward_scope.on(move |event: &SessionEventKind| {
            global_bus.emit(GlobalEvent::from_session(session_id.clone(), event.clone()));
        });

        Ok(Self {
            id,
            local_bus,
            forward_scope,
            message_manager: tokio::sync::Mutex::new(message_manager),
            llm_service: tokio::sync::RwLock::new(llm_service),
            llm_config: tokio::sync::RwLock::new(config),
            mcp,
            disposed: AtomicBool::new(false),
            next_call_id: AtomicUsize::new(1),
            tokenizer_rebuilds: AtomicUsize::new(0),
            formatter_rebuilds: AtomicUsize::new(0),
        })
    }

    pub fn local_bus(&self) -> &EventBus<SessionEventKind> {
        &self.local_bus
    }

    fn new_call_id(&self) -> String {
        format!("call-{}", self.next_call_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Runs the tool-calling loop:
    /// (a) push the user message; (b) ask the LM; (c) if the response
    /// contains tool calls, execute them and push results, then loop;
    /// (d) stop on a terminal text or after `max_iterations`.
    pub async fn run(
        &self,
        user_text: &str,
        image_data: Option<&[u8]>,
        cancellation: Option<RunCancellation>,
    ) -> CoreResult<String> {
        let manager = self.message_manager.lock().await;
        manager
            .history
            .add_message(&Message::user(user_text))
            .await?;

        let max_iterations = self.llm_config.read().await.max_iterations.max(1);
        let llm = self.llm_service.read().await.clone();

        let mut image_for_next_call = image_data;
        for iteration in 0..max_iterations {
            if cancellation.as_ref().is_some_and(RunCancellation::is_cancelled) {
                self.local_bus.emit(SessionEventKind::Error {
                    message: "run cancelled".into(),
                    context: Some("cancelled".into()),
                    recoverable: false,
                });
                return Err(CoreError::Cancelled);
            }

            if iteration == 0 {
                self.local_bus.emit(SessionEventKind::Thinking);
            }

            let messages = manager.history.get_messages().await?;
            let rendered = manager.formatter.format(&messages);

            let turn = llm
                .complete_task(&rendered, image_for_next_call)
                .await
                .map_err(|e| self.emit_llm_error(e));
            image_for_next_call = None;

            let turn = match turn {
                Ok(t) => t,
                Err(e) => return Err(e),
            };

            match turn {
                LlmTurn::Final { text, token_count } => {
                    manager
                        .history
                        .add_message(&Message::assistant(&text))
                        .await?;
                    self.local_bus.emit(SessionEventKind::Response {
                        text: text.clone(),
                        token_count,
                        model: Some(self.llm_config.read().await.model.clone()),
                    });
                    return Ok(text);
                }
                LlmTurn::ToolCalls(calls) => {
                    self.execute_tool_calls(&manager, calls, cancellation.as_ref())
                        .await?;
                    if cancellation.as_ref().is_some_and(RunCancellation::is_cancelled) {
                        self.local_bus.emit(SessionEventKind::Error {
                            message: "run cancelled".into(),
                            context: Some("cancelled".into()),
                            recoverable: false,
                        });
                        return Err(CoreError::Cancelled);
                    }
                }
            }

            if iteration + 1 == max_iterations {
                let message = "tool-calling loop exceeded max_iterations".to_string();
                self.local_bus.emit(SessionEventKind::Error {
                    message: message.clone(),
                    context: Some("max_iterations".into()),
                    recoverable: false,
                });
                return Err(CoreError::Llm(message));
            }
        }

        unreachable!("loop returns or errors before exhausting max_iterations")
    }

    async fn execute_tool_calls(
        &self,
        manager: &MessageManager,
        calls: Vec<ToolCall>,
        cancellation: Option<&RunCancellation>,
    ) -> CoreResult<()> {
        for call in calls {
            let call_id = if call.call_id.is_empty() {
                self.new_call_id()
            } else {
                call.call_id.clone()
            };

            manager
                .history
                .add_message(&Message::assistant_tool_call(
                    &call_id,
                    &call.name,
                    call.arguments.clone(),
                ))
                .await?;

            self.local_bus.emit(SessionEventKind::ToolCall {
                tool_name: call.name.clone(),
                args: call.arguments.clone(),
                call_id: call_id.clone(),
            });

            if cancellation.is_some_and(RunCancellation::is_cancelled) {
                break;
            }

            let raw_result = self.mcp.execute_tool(&call.name, call.arguments).await;
            let success = !raw_result.starts_with("error:");
            let result_value: Value = serde_json::from_str(&raw_result)
                .unwrap_or(Value::String(raw_result.clone()));

            manager
                .history
                .add_message(&Message::tool_result(&call_id, result_value.clone()))
                .await?;

            self.local_bus.emit(SessionEventKind::ToolResult {
                tool_name: call.name,
                result: result_value,
                call_id,
                success,
            });
        }
        Ok(())
    }

    fn emit_llm_error(&self, err: LlmServiceError) -> CoreError {
        let (message, context) = match &err {
            LlmServiceError::Timeout => (err.to_string(), Some("timeout".to_string())),
            LlmServiceError::Cancelled => (err.to_string(), Some("cancelled".to_string())),
            LlmServiceError::Provider(_) => (err.to_string(), None),
        };
        self.local_bus.emit(SessionEventKind::Error {
            message: message.clone(),
            context,
            recoverable: false,
        });
        CoreError::Llm(message)
    }

    /// Clears this session's history and emits `conversationReset` locally
    /// (and, via the forwarding handler, globally).
    pub async fn reset(&self) -> CoreResult<()> {
        let manager = self.message_manager.lock().await;
        manager.history.clear().await?;
        drop(manager);
        self.local_bus.emit(SessionEventKind::ConversationReset);
        Ok(())
    }

    pub async fn get_messages(&self) -> CoreResult<Vec<Message>> {
        Ok(self.message_manager.lock().await.history.get_messages().await?)
    }

    /// Optimization: only rebuild the tokenizer if the
    /// provider changed; only rebuild the formatter if the router changed;
    /// always recompute `max_tokens` and update the message manager.
    pub async fn switch_llm(&self, new_service: Arc<dyn LlmService>, new_config: LlmConfig) {
        let old_config = self.llm_config.read().await.clone();
        let mut manager = self.message_manager.lock().await;

        if new_config.provider != old_config.provider {
            manager.tokenizer = tokenizer_for_provider(&new_config.provider);
            self.tokenizer_rebuilds.fetch_add(1, Ordering::SeqCst);
        }
        if new_config.router != old_config.router {
            manager.formatter = formatter_for_router(&new_config.router);
            self.formatter_rebuilds.fetch_add(1, Ordering::SeqCst);
        }
        drop(manager);

        *self.llm_service.write().await = new_service;
        *self.llm_config.write().await = new_config.clone();

        self.local_bus.emit(SessionEventKind::Switched {
            new_config: serde_json::to_value(&new_config).unwrap_or(Value::Null),
            router: new_config.router,
            history_retained: true,
        });
    }

    pub async fn current_config(&self) -> LlmConfig {
        self.llm_config.read().await.clone()
    }

    /// Detaches all forwarding handlers from the local bus. Idempotent.
    pub fn dispose(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.forward_scope.abort();
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Deterministic LM stub: replays a fixed script of turns, one per
    /// call to `complete_task`.
    pub struct ScriptedLlmService {
        script: StdMutex<Vec<LlmTurn>>,
        config: LlmConfig,
    }

    impl ScriptedLlmService {
        pub fn new(config: LlmConfig, script: Vec<LlmTurn>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script),
                config,
            })
        }
    }

    #[async_trait]
    impl LlmService for ScriptedLlmService {
        async fn complete_task(
            &self,
            _rendered_messages: &Value,
            _image_data: Option<&[u8]>,
        ) -> Result<LlmTurn, LlmServiceError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(LlmTurn::Final {
                    text: String::new(),
                    token_count: None,
                });
            }
            Ok(script.remove(0))
        }

        async fn get_all_tools(&self) -> Vec<crate::llm_service::ToolDescriptor> {
            Vec::new()
        }

        fn get_config(&self) -> LlmConfig {
            self.config.clone()
        }
    }

    pub fn test_config(provider: &str, router: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model: "test-model".to_string(),
            router: router.to_string(),
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}
