//! Script sandbox for `executeToolCode`.
//!
//! Each execution builds a fresh Rhai engine with one global constant per
//! allowed client and one method per allowed tool; a method call routes back
//! through the tool executor under the same filter rules as a direct call.
//! The engine has no filesystem or network access. A `parallel([...])`
//! builtin evaluates an array of zero-argument closures on separate threads
//! and returns their results in input order, which is how a snippet runs
//! independent tool calls concurrently. Scripts run on the blocking pool;
//! tool methods re-enter the async runtime through a captured handle.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use once_cell::sync::OnceCell;
use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr, Map, Position, Scope, AST};
use serde_json::Value;
use tracing::debug;

use mcp_wire::ToolSchema;

use crate::context::ExecContext;
use crate::executor::ToolExecutor;
use crate::registry::sanitize_name;

/// Operation budget per script; a runaway loop terminates well before this
/// burns noticeable CPU.
const MAX_OPERATIONS: u64 = 5_000_000;
const MAX_CALL_LEVELS: usize = 64;

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        message.into().into(),
        Position::NONE,
    ))
}

/// Per-client global injected into the script scope.
#[derive(Clone)]
struct ServerBinding {
    /// Method name (sanitized tool name) to visible prefixed tool name.
    methods: Arc<HashMap<String, String>>,
    executor: Arc<ToolExecutor>,
    ctx: ExecContext,
    handle: tokio::runtime::Handle,
}

impl ServerBinding {
    fn invoke(&self, method: &str, args: Map) -> Result<Dynamic, Box<EvalAltResult>> {
        let visible = self
            .methods
            .get(method)
            .ok_or_else(|| runtime_error(format!("tool '{}' is not bound", method)))?;
        let args_value: Value = rhai::serde::from_dynamic(&Dynamic::from(args))?;
        let args_json = serde_json::to_string(&args_value)
            .map_err(|e| runtime_error(format!("argument marshalling: {}", e)))?;

        let call_id = format!("code-{}", uuid::Uuid::new_v4());
        let text = self
            .handle
            .block_on(
                self.executor
                    .execute_raw(&self.ctx, visible, &args_json, &call_id),
            )
            .map_err(|e| runtime_error(e.to_string()))?;

        // Parsed JSON body when the tool returned JSON, raw string otherwise.
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => rhai::serde::to_dynamic(&value),
            Err(_) => Ok(text.into()),
        }
    }
}

/// Runs one code snippet against the given clients and returns the script's
/// final value as JSON, or the error message a failed script produced.
pub(crate) async fn run_code(
    executor: Arc<ToolExecutor>,
    ctx: &ExecContext,
    clients: Vec<(String, Vec<ToolSchema>)>,
    code: String,
) -> Result<Value, String> {
    let handle = tokio::runtime::Handle::current();
    let ast_cell: Arc<OnceCell<AST>> = Arc::new(OnceCell::new());

    let deadline = ctx.deadline();
    let cancel_token = ctx.token().clone();

    let engine = Arc::new_cyclic(|weak: &Weak<Engine>| {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);

        engine.on_progress(move |_ops| {
            if cancel_token.is_cancelled() {
                return Some("cancelled".into());
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Some("deadline exceeded".into());
                }
            }
            None
        });

        engine
            .register_type_with_name::<ServerBinding>("McpServer")
            .register_fn("to_string", |_: &mut ServerBinding| {
                "<mcp server>".to_string()
            });

        // One method per allowed tool. Identical method names across clients
        // share an overload slot, so the closure resolves the target through
        // the receiver's own method table rather than a captured name.
        let mut registered: std::collections::HashSet<String> = std::collections::HashSet::new();
        for (_, tools) in &clients {
            for tool in tools {
                let method = sanitize_name(&tool.name);
                if !registered.insert(method.clone()) {
                    continue;
                }
                let with_args = method.clone();
                engine.register_fn(
                    method.as_str(),
                    move |srv: &mut ServerBinding, args: Map| srv.invoke(&with_args, args),
                );
                let without_args = method.clone();
                engine.register_fn(method.as_str(), move |srv: &mut ServerBinding| {
                    srv.invoke(&without_args, Map::new())
                });
            }
        }

        let weak_engine = weak.clone();
        let parallel_ast = Arc::clone(&ast_cell);
        engine.register_fn(
            "parallel",
            move |jobs: Array| -> Result<Array, Box<EvalAltResult>> {
                let engine = weak_engine
                    .upgrade()
                    .ok_or_else(|| runtime_error("engine gone"))?;
                let ast = parallel_ast
                    .get()
                    .ok_or_else(|| runtime_error("script not compiled"))?;

                let closures: Vec<FnPtr> = jobs
                    .into_iter()
                    .map(|job| {
                        job.try_cast::<FnPtr>()
                            .ok_or_else(|| runtime_error("parallel expects an array of closures"))
                    })
                    .collect::<Result<_, _>>()?;

                let results: Vec<Result<Dynamic, Box<EvalAltResult>>> =
                    std::thread::scope(|scope| {
                        let handles: Vec<_> = closures
                            .iter()
                            .map(|closure| {
                                let engine = &engine;
                                scope.spawn(move || closure.call::<Dynamic>(engine, ast, ()))
                            })
                            .collect();
                        handles
                            .into_iter()
                            .map(|h| {
                                h.join()
                                    .unwrap_or_else(|_| Err(runtime_error("parallel job panicked")))
                            })
                            .collect()
                    });

                results.into_iter().collect()
            },
        );

        engine
    });

    let mut scope: Scope<'static> = Scope::new();
    for (client_name, tools) in &clients {
        let methods: HashMap<String, String> = tools
            .iter()
            .map(|tool| {
                (
                    sanitize_name(&tool.name),
                    format!("{}-{}", client_name, tool.name),
                )
            })
            .collect();
        // Pushed as a variable, not a constant: method dispatch takes the
        // receiver by &mut and rhai rejects that on constants.
        scope.push(
            client_name.clone(),
            ServerBinding {
                methods: Arc::new(methods),
                executor: Arc::clone(&executor),
                ctx: ctx.clone(),
                handle: handle.clone(),
            },
        );
    }

    debug!(clients = clients.len(), "code-mode: running snippet");
    let outcome = tokio::task::spawn_blocking(move || {
        let ast = engine
            .compile(&code)
            .map_err(|e| format!("compile error: {}", e))?;
        let _ = ast_cell.set(ast.clone());
        engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| format!("sandbox task failed: {}", e))?;

    let value = outcome?;
    dynamic_to_json(&value)
}

fn dynamic_to_json(value: &Dynamic) -> Result<Value, String> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    rhai::serde::from_dynamic::<Value>(value).map_err(|e| format!("result not serializable: {}", e))
}
