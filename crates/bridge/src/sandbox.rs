//! Engine construction for user scripts.

use std::sync::{Arc, OnceLock};

use rhai::{Dynamic, Engine, EvalAltResult, module_resolvers::DummyModuleResolver};
use scriptbridge_trace::consts::TRACE_TARGET_SCRIPT;
use serde_json::Value;

use crate::value::{dynamic_to_json, json_to_dynamic};

/// Language features scripts may not use.
const DISABLED_SYMBOLS: &[&str] = &["eval", "import", "export"];

/// Resource limits applied to script execution. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxConfig {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 0,
            max_array_size: 0,
            max_map_size: 0,
        }
    }
}

/// Synchronous access to the host for script-initiated calls.
pub trait HostCaller: Send + Sync + 'static {
    /// # Errors
    /// Returns a description of the failure.
    fn call_host(&self, method: &str, data: Option<Value>) -> Result<Value, String>;
}

/// Late-bound slot for the [`HostCaller`].
///
/// Scripts are compiled before the gateway exists, so `host_call` resolves
/// its target on every call.
#[derive(Clone, Default)]
pub struct HostLink(Arc<OnceLock<Arc<dyn HostCaller>>>);

impl HostLink {
    /// Attach the caller. Only the first attachment takes effect.
    pub fn attach(&self, caller: Arc<dyn HostCaller>) -> bool {
        self.0.set(caller).is_ok()
    }

    fn call(&self, method: &str, data: Option<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
        let Some(caller) = self.0.get() else {
            return Err(format!("host_call({method}): host channel is not connected").into());
        };
        let data = data
            .map(|d| dynamic_to_json(&d))
            .transpose()
            .map_err(|e| format!("host_call({method}): {e}"))?;
        let result = caller
            .call_host(method, data)
            .map_err(|e| format!("host_call({method}) failed: {e}"))?;
        Ok(json_to_dynamic(&result))
    }
}

/// Creates an engine with sandbox limits and the bridge's host functions.
#[must_use]
pub fn create_engine(config: &SandboxConfig, link: &HostLink) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(config.max_operations);
    engine.set_max_call_levels(config.max_call_levels);
    engine.set_max_expr_depths(config.max_expr_depth, config.max_function_expr_depth);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);

    // No filesystem access through modules.
    engine.set_module_resolver(DummyModuleResolver::new());
    for &symbol in DISABLED_SYMBOLS {
        engine.disable_symbol(symbol);
    }

    engine.on_print(|text| {
        tracing::info!(target: TRACE_TARGET_SCRIPT, "{text}");
    });
    engine.on_debug(|text, source, pos| {
        tracing::debug!(
            target: TRACE_TARGET_SCRIPT,
            source = source.unwrap_or_default(),
            %pos,
            "{text}"
        );
    });

    let host = link.clone();
    engine.register_fn("host_call", move |method: &str| host.call(method, None));
    let host = link.clone();
    engine.register_fn("host_call", move |method: &str, data: Dynamic| {
        host.call(method, Some(data))
    });

    engine
}
