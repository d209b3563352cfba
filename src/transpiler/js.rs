//! JavaScript units on an embedded QuickJS runtime
//!
//! Units use the CommonJS shape: the body runs as a function of
//! `(exports, require, module, __filename, __dirname)` and whatever ends up in
//! `module.exports` is the exported value, marshalled to the host as JSON. A unit
//! that never assigns to `exports`/`module.exports`, or only assigns `null` or
//! `undefined` to `module.exports`, exports `null`.
//!
//! Every execution gets a fresh runtime. Host bindings installed on the global
//! object:
//! - `console.{log,info,warn,error,debug,trace}` forwarded to `tracing`
//! - `require(request)` and `require.resolve(request)` (blocking)
//! - `requireAsync(request)` (non-blocking executions only)
//! - `loader` with `resolve`, `load` and, when non-blocking, `loadAsync`
//! - `global`, plus every injected binding; keys of an injected `global` object
//!   are spread onto the global object as well
//!
//! In non-blocking executions the body is an `async` function, so it may
//! `await requireAsync(...)`, and a promise assigned to `module.exports` is
//! awaited before it is treated as the result.

use anyhow::{anyhow, Context as _};
use rquickjs::{async_with, function::Async, AsyncContext, AsyncRuntime, CatchResultExt, Context, Ctx, Function, Promise, Runtime};
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, error, info, trace, warn};

use super::{BoxFuture, Transpiler};
use crate::error::LoadError;
use crate::loader::{ExecutionScope, UnitLoader};
use crate::logging::SCRIPT_TARGET;

/// Host bindings and module plumbing shared by both execution modes
///
/// Expects `__scope` and `__nonBlocking` to be in scope.
const PRELUDE: &str = r#"
const __format = (args) => args
  .map((arg) => {
    if (typeof arg === 'string') return arg;
    if (arg instanceof Error) return arg.stack ? `${arg}\n${arg.stack}` : String(arg);
    try {
      const text = JSON.stringify(arg);
      return text === undefined ? String(arg) : text;
    } catch (_) {
      return String(arg);
    }
  })
  .join(' ');
const __unwrap = (reply) => {
  const parsed = JSON.parse(reply);
  if (Object.prototype.hasOwnProperty.call(parsed, 'error')) throw new Error(parsed.error);
  return parsed.ok;
};
const __log = (level) => (...args) => __modload_log(level, __format(args));
const require = (request) => __unwrap(__modload_require(String(request)));
require.resolve = (request) => __unwrap(__modload_resolve(String(request)));
const loader = { resolve: require.resolve, load: require };
if (__nonBlocking) {
  loader.loadAsync = (request) => __modload_require_async(String(request)).then(__unwrap);
  globalThis.requireAsync = loader.loadAsync;
}
globalThis.global = globalThis;
globalThis.console = {
  log: __log('info'),
  info: __log('info'),
  warn: __log('warn'),
  error: __log('error'),
  debug: __log('debug'),
  trace: __log('trace'),
};
globalThis.require = require;
globalThis.loader = Object.freeze(loader);
const { global: __global = {}, ...__bindings } = __scope.bindings;
Object.assign(globalThis, __global, __bindings);

let __exported = false;
const __exports = new Proxy({}, {
  set(target, key, value) {
    __exported = true;
    target[key] = value;
    return true;
  },
  defineProperty(target, key, descriptor) {
    __exported = true;
    return Reflect.defineProperty(target, key, descriptor);
  },
});
const __module = new Proxy({ exports: __exports, id: __scope.filename, filename: __scope.filename, loaded: false }, {
  set(target, key, value) {
    if (key === 'exports') {
      if (value !== null && value !== undefined) __exported = true;
      target.exports = value ?? {};
      return true;
    }
    target[key] = value;
    return true;
  },
});
const __serialize = (result) => {
  if (!__exported) return 'null';
  const text = JSON.stringify(result);
  return text === undefined ? 'null' : text;
};
"#;

#[derive(Debug, Clone)]
pub struct JsTranspiler {
    extensions: Vec<String>,
}

impl Default for JsTranspiler {
    fn default() -> Self {
        Self::new()
    }
}

impl JsTranspiler {
    pub fn new() -> Self {
        Self {
            extensions: vec!["js".to_string()],
        }
    }

    /// Also handle files with `extension` (without the dot)
    pub fn with_extension(mut self, extension: &str) -> Self {
        let extension = extension.trim_start_matches('.').to_string();
        if !self.extensions.contains(&extension) {
            self.extensions.push(extension);
        }
        self
    }
}

impl Transpiler for JsTranspiler {
    fn name(&self) -> &str {
        "javascript"
    }

    fn extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    /// Strip a byte order mark and neutralize a leading hashbang line, keeping
    /// line numbers intact
    fn convert(&self, _location: &Path, source: &str) -> anyhow::Result<String> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        if source.starts_with("#!") {
            Ok(format!("//{}", source))
        } else {
            Ok(source.to_string())
        }
    }

    fn execute(&self, converted: &str, scope: &ExecutionScope) -> anyhow::Result<Value> {
        let program = program(converted, scope, false);
        let runtime = Runtime::new()?;
        let context = Context::full(&runtime)?;

        let output = context.with(|ctx| -> anyhow::Result<String> {
            install(&ctx, scope.loader(), scope.location(), false)?;
            ctx.eval::<String, _>(program.as_bytes())
                .catch(&ctx)
                .map_err(|err| anyhow!("{}", err))
        })?;

        parse_output(&output)
    }

    fn execute_async<'a>(
        &'a self,
        converted: &'a str,
        scope: &'a ExecutionScope,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let program = program(converted, scope, true);
            let unit = scope.loader().clone();
            let location = scope.location().to_path_buf();

            let runtime = AsyncRuntime::new()?;
            let context = AsyncContext::full(&runtime).await?;

            let output = async_with!(context => |ctx| {
                install(&ctx, &unit, &location, true)?;
                let promise = ctx
                    .eval::<Promise, _>(program.as_bytes())
                    .catch(&ctx)
                    .map_err(|err| anyhow!("{}", err))?;
                promise
                    .into_future::<String>()
                    .await
                    .catch(&ctx)
                    .map_err(|err| anyhow!("{}", err))
            })
            .await?;

            parse_output(&output)
        })
    }
}

/// Wrap the unit body into a self-contained program evaluating to its JSON export
fn program(converted: &str, scope: &ExecutionScope, non_blocking: bool) -> String {
    let scope_json = json!({
        "filename": scope.location().to_string_lossy(),
        "dirname": scope.dirname().to_string_lossy(),
        "bindings": Value::Object(scope.bindings().clone()),
    });

    let (opening, function, call, closing) = if non_blocking {
        ("(async () => {", "async function", "await ", "})()")
    } else {
        ("(() => {", "function", "", "})()")
    };

    format!(
        "{opening}\nconst __scope = {scope_json};\nconst __nonBlocking = {non_blocking};\n{PRELUDE}\n\
         const __unit = {function} (exports, require, module, __filename, __dirname) {{\n{converted}\n}};\n\
         {call}__unit.call(__exports, __exports, require, __module, __scope.filename, __scope.dirname);\n\
         __module.loaded = true;\n\
         return __serialize({call}__module.exports);\n{closing}"
    )
}

fn parse_output(output: &str) -> anyhow::Result<Value> {
    serde_json::from_str(output).context("unit exported a value that is not representable as JSON")
}

/// Reply envelope for host calls; failures become JS exceptions in the prelude
fn reply(outcome: Result<Value, LoadError>) -> String {
    match outcome {
        Ok(value) => json!({ "ok": value }),
        Err(err) => json!({ "error": err.to_string() }),
    }
    .to_string()
}

fn install(ctx: &Ctx<'_>, unit: &UnitLoader, location: &Path, non_blocking: bool) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let loader = unit.clone();
    globals.set(
        "__modload_require",
        Function::new(ctx.clone(), move |request: String| -> rquickjs::Result<String> {
            Ok(reply(loader.require(&request)))
        })?,
    )?;

    let loader = unit.clone();
    globals.set(
        "__modload_resolve",
        Function::new(ctx.clone(), move |request: String| -> rquickjs::Result<String> {
            Ok(reply(loader.resolve(&request).map(Value::String)))
        })?,
    )?;

    let unit_location = location.display().to_string();
    globals.set(
        "__modload_log",
        Function::new(ctx.clone(), move |level: String, message: String| {
            let location = unit_location.as_str();
            match level.as_str() {
                "error" => error!(target: SCRIPT_TARGET, location, "{}", message),
                "warn" => warn!(target: SCRIPT_TARGET, location, "{}", message),
                "debug" => debug!(target: SCRIPT_TARGET, location, "{}", message),
                "trace" => trace!(target: SCRIPT_TARGET, location, "{}", message),
                _ => info!(target: SCRIPT_TARGET, location, "{}", message),
            }
        })?,
    )?;

    if non_blocking {
        let loader = unit.clone();
        globals.set(
            "__modload_require_async",
            Function::new(
                ctx.clone(),
                Async(move |request: String| {
                    let loader = loader.clone();
                    async move { Ok::<String, rquickjs::Error>(reply(loader.require_async(&request).await)) }
                }),
            )?,
        )?;
    }

    Ok(())
}
