//! `code_executor` node — sandboxed Python execution.
//!
//! Every run is: static AST validation (reject the banned construct list),
//! an input/context size guard, then a child `python3` process fed a
//! restricted-builtins wrapper over stdin/stdout, bounded by a hard
//! wall-clock timeout. The sandbox is best-effort, not a security boundary
//! against a hostile interpreter — it stops accidental misuse (imports,
//! filesystem access, infinite loops), not a determined escape.

use std::time::Duration;

use async_trait::async_trait;
use rustpython_parser::ast::{self, Expr, Stmt};
use rustpython_parser::{Parse, ParseError};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{ExecutableNode, ExecutionContext, NodeError};

const BANNED_NAMES: &[&str] = &[
    "__import__",
    "__builtins__",
    "__loader__",
    "__spec__",
    "open",
    "eval",
    "exec",
    "compile",
    "globals",
    "locals",
    "vars",
    "dir",
    "help",
    "input",
    "breakpoint",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "type",
    "object",
    "super",
    "classmethod",
    "staticmethod",
    "property",
];

const ALLOWED_CALL_NAMES: &[&str] = &[
    "abs", "all", "any", "bool", "dict", "enumerate", "filter", "float", "int", "len", "list",
    "map", "max", "min", "pow", "range", "reversed", "round", "set", "sorted", "str", "sum",
    "tuple", "zip", "print",
];

const ALLOWED_ATTR_MODULES: &[&str] = &["math", "json", "re"];

struct SandboxLimits {
    timeout_sec: f64,
    max_memory_mb: u64,
    max_stdout_chars: usize,
    max_input_bytes: usize,
    max_result_bytes: usize,
}

impl SandboxLimits {
    fn from_config(config: &Value) -> Self {
        let num = |key: &str, default: f64| -> f64 {
            config.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
        };
        Self {
            timeout_sec: num("timeout_sec", num("timeout", 3.0)).max(0.1),
            max_memory_mb: (num("max_memory_mb", 256.0) as u64).max(16),
            max_stdout_chars: (num("max_stdout_chars", 10_000.0) as usize).max(1000),
            max_input_bytes: (num("max_input_bytes", 2_000_000.0) as usize).max(10_000),
            max_result_bytes: (num("max_result_bytes", 2_000_000.0) as usize).max(10_000),
        }
    }
}

/// Parse `code` and reject any of the banned constructs, recursively.
/// Mirrors the original sandbox's `ast.walk` pass one-for-one.
fn validate_ast(code: &str) -> Result<(), String> {
    let suite = ast::Suite::parse(code, "<code_executor>").map_err(|e: ParseError| e.to_string())?;
    for stmt in &suite {
        check_stmt(stmt)?;
    }
    Ok(())
}

fn check_stmt(stmt: &Stmt) -> Result<(), String> {
    match stmt {
        Stmt::Import(_) | Stmt::ImportFrom(_) => {
            return Err("import is not allowed in sandbox".into())
        }
        Stmt::Global(_) | Stmt::Nonlocal(_) => {
            return Err("global/nonlocal is not allowed in sandbox".into())
        }
        Stmt::FunctionDef(_) | Stmt::AsyncFunctionDef(_) | Stmt::ClassDef(_) => {
            return Err("function/class/lambda is not allowed in sandbox".into())
        }
        Stmt::While(_) => return Err("while is not allowed in sandbox (use for/range)".into()),
        Stmt::Try(_) => return Err("try/except is not allowed in sandbox".into()),
        Stmt::With(_) | Stmt::AsyncWith(_) => {
            return Err("with is not allowed in sandbox".into())
        }
        Stmt::Raise(_) | Stmt::Assert(_) | Stmt::Delete(_) => {
            return Err("raise/assert/delete is not allowed in sandbox".into())
        }
        Stmt::Expr(e) => check_expr(&e.value)?,
        Stmt::Assign(a) => {
            for t in &a.targets {
                check_expr(t)?;
            }
            check_expr(&a.value)?;
        }
        Stmt::AugAssign(a) => {
            check_expr(&a.target)?;
            check_expr(&a.value)?;
        }
        Stmt::AnnAssign(a) => {
            check_expr(&a.target)?;
            if let Some(v) = &a.value {
                check_expr(v)?;
            }
        }
        Stmt::If(i) => {
            check_expr(&i.test)?;
            for s in &i.body {
                check_stmt(s)?;
            }
            for s in &i.orelse {
                check_stmt(s)?;
            }
        }
        Stmt::For(f) => {
            check_expr(&f.target)?;
            check_expr(&f.iter)?;
            for s in &f.body {
                check_stmt(s)?;
            }
            for s in &f.orelse {
                check_stmt(s)?;
            }
        }
        Stmt::Return(r) => {
            if let Some(v) = &r.value {
                check_expr(v)?;
            }
        }
        Stmt::Pass(_) | Stmt::Break(_) | Stmt::Continue(_) => {}
        _ => {}
    }
    Ok(())
}

fn check_expr(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Lambda(_) => return Err("function/class/lambda is not allowed in sandbox".into()),
        Expr::Attribute(a) => {
            if a.attr.as_str().starts_with("__") {
                return Err("dunder attribute access is not allowed".into());
            }
            check_expr(&a.value)?;
        }
        Expr::Name(n) => {
            let id = n.id.as_str();
            if BANNED_NAMES.contains(&id) || id.starts_with("__") {
                return Err(format!("name not allowed in sandbox: {id}"));
            }
        }
        Expr::Call(c) => {
            match c.func.as_ref() {
                Expr::Name(n) => {
                    if !ALLOWED_CALL_NAMES.contains(&n.id.as_str()) {
                        return Err(format!("call not allowed in sandbox: {}", n.id));
                    }
                }
                Expr::Attribute(a) => {
                    if a.attr.as_str().starts_with("__") {
                        return Err("dunder attribute call is not allowed".into());
                    }
                    match a.value.as_ref() {
                        Expr::Name(n) if ALLOWED_ATTR_MODULES.contains(&n.id.as_str()) => {}
                        _ => return Err("only module attribute calls (math/json/re) are allowed".into()),
                    }
                }
                _ => return Err("unsupported call target in sandbox".into()),
            }
            for a in &c.args {
                check_expr(a)?;
            }
            for kw in &c.keywords {
                check_expr(&kw.value)?;
            }
        }
        Expr::BinOp(b) => {
            check_expr(&b.left)?;
            check_expr(&b.right)?;
        }
        Expr::UnaryOp(u) => check_expr(&u.operand)?,
        Expr::BoolOp(b) => {
            for v in &b.values {
                check_expr(v)?;
            }
        }
        Expr::Compare(c) => {
            check_expr(&c.left)?;
            for v in &c.comparators {
                check_expr(v)?;
            }
        }
        Expr::IfExp(i) => {
            check_expr(&i.test)?;
            check_expr(&i.body)?;
            check_expr(&i.orelse)?;
        }
        Expr::Dict(d) => {
            for k in d.keys.iter().flatten() {
                check_expr(k)?;
            }
            for v in &d.values {
                check_expr(v)?;
            }
        }
        Expr::List(l) => {
            for e in &l.elts {
                check_expr(e)?;
            }
        }
        Expr::Tuple(t) => {
            for e in &t.elts {
                check_expr(e)?;
            }
        }
        Expr::Set(s) => {
            for e in &s.elts {
                check_expr(e)?;
            }
        }
        Expr::Subscript(s) => {
            check_expr(&s.value)?;
            check_expr(&s.slice)?;
        }
        Expr::Slice(s) => {
            if let Some(l) = &s.lower {
                check_expr(l)?;
            }
            if let Some(u) = &s.upper {
                check_expr(u)?;
            }
            if let Some(st) = &s.step {
                check_expr(st)?;
            }
        }
        Expr::Starred(s) => check_expr(&s.value)?,
        Expr::Constant(_) => {}
        _ => {
            return Err("unsupported expression in sandbox".into());
        }
    }
    Ok(())
}

fn estimate_bytes(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// The Python wrapper run inside the child process. Reads `{code,
/// input_data, context}` as one JSON object on stdin, writes `{success,
/// result, stdout}` / `{success: false, error}` as one JSON object on
/// stdout. Kept intentionally small: all trust boundaries are enforced by
/// [`validate_ast`] before this ever runs.
const SANDBOX_WRAPPER: &str = r#"
import sys, json, math, re

payload = json.loads(sys.stdin.read())
code = payload["code"]
input_data = payload["input_data"]
context = payload["context"]
max_stdout_chars = payload["max_stdout_chars"]

_stdout_parts = []

def _safe_print(*args, **kwargs):
    sep = kwargs.get("sep", " ")
    end = kwargs.get("end", "\n")
    s = sep.join(str(a) for a in args) + str(end)
    current = sum(len(x) for x in _stdout_parts)
    if current >= max_stdout_chars:
        return
    _stdout_parts.append(s[: max_stdout_chars - current])

_safe_builtins = {
    "abs": abs, "all": all, "any": any, "bool": bool, "dict": dict,
    "enumerate": enumerate, "filter": filter, "float": float, "int": int,
    "len": len, "list": list, "map": map, "max": max, "min": min, "pow": pow,
    "range": range, "reversed": reversed, "round": round, "set": set,
    "sorted": sorted, "str": str, "sum": sum, "tuple": tuple, "zip": zip,
    "print": _safe_print,
}

sandbox_globals = {
    "__builtins__": _safe_builtins,
    "json": json, "re": re, "math": math,
    "input_data": input_data, "context": context, "result": None,
}
sandbox_locals = {}

try:
    exec(compile(code, "<code_executor>", "exec"), sandbox_globals, sandbox_locals)
    result = sandbox_locals.get("result", sandbox_globals.get("result"))
    print(json.dumps({"success": True, "result": result, "stdout": "".join(_stdout_parts)}))
except Exception as e:
    print(json.dumps({"success": False, "error": str(e)}))
"#;

pub struct CodeExecutorNode;

#[async_trait]
impl ExecutableNode for CodeExecutorNode {
    async fn execute(
        &self,
        input: Value,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let code = config
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::Fatal("code_executor node: config.code is required".into()))?;
        let language = config.get("language").and_then(|v| v.as_str()).unwrap_or("python");
        if language != "python" {
            return Err(NodeError::Fatal(format!(
                "code_executor node: unsupported language: {language}"
            )));
        }

        let limits = SandboxLimits::from_config(config);
        let input_data = input.get("data").cloned().unwrap_or(Value::Null);
        let context_data = ctx.global_context.clone();

        if let Err(e) = validate_ast(code) {
            return Ok(json!({"success": false, "error": e}));
        }

        let total_bytes = estimate_bytes(&input_data) + estimate_bytes(&context_data);
        if total_bytes > limits.max_input_bytes {
            return Ok(json!({
                "success": false,
                "error": format!("input/context too large: {total_bytes} bytes (limit {})", limits.max_input_bytes),
            }));
        }

        let stdin_payload = json!({
            "code": code,
            "input_data": input_data,
            "context": context_data,
            "max_stdout_chars": limits.max_stdout_chars,
        });

        let sandbox = json!({
            "timeout_sec": limits.timeout_sec,
            "max_memory_mb": limits.max_memory_mb,
            "max_stdout_chars": limits.max_stdout_chars,
            "max_input_bytes": limits.max_input_bytes,
            "max_result_bytes": limits.max_result_bytes,
        });

        let run = run_sandbox(&stdin_payload, &limits);
        let outcome = match tokio::time::timeout(Duration::from_secs_f64(limits.timeout_sec), run).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => json!({"success": false, "error": format!("sandbox failed without result: {e}")}),
            Err(_) => json!({"success": false, "error": format!("Timeout after {}s", limits.timeout_sec)}),
        };

        if outcome["success"].as_bool().unwrap_or(false) {
            let result = outcome.get("result").cloned().unwrap_or(Value::Null);
            if estimate_bytes(&result) > limits.max_result_bytes {
                return Ok(json!({
                    "success": false,
                    "error": format!("result too large (limit {} bytes)", limits.max_result_bytes),
                }));
            }
            Ok(json!({
                "result": result,
                "stdout": outcome.get("stdout").cloned().unwrap_or(Value::String(String::new())),
                "execution_output": "Code executed successfully",
                "sandbox": sandbox,
            }))
        } else {
            Ok(json!({
                "success": false,
                "error": outcome.get("error").cloned().unwrap_or(Value::String("unknown sandbox error".into())),
            }))
        }
    }
}

async fn run_sandbox(stdin_payload: &Value, limits: &SandboxLimits) -> std::io::Result<Value> {
    let mut command = Command::new("python3");
    command
        .arg("-c")
        .arg(SANDBOX_WRAPPER)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null());

    apply_rlimits(&mut command, limits);

    let mut child = command.spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let bytes = serde_json::to_vec(stdin_payload).unwrap_or_default();
        stdin.write_all(&bytes).await?;
    }

    let output = child.wait_with_output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let last_line = stdout.lines().last().unwrap_or("");
    Ok(serde_json::from_str(last_line)
        .unwrap_or_else(|_| json!({"success": false, "error": "sandbox produced no parseable output"})))
}

/// OS-level resource limits applied in the child, best-effort — mirrors
/// the original sandbox's `resource.setrlimit(RLIMIT_CPU/RLIMIT_AS, ...)`
/// call inside the forked worker. A `setrlimit` failure here must not
/// abort the spawn; the parent's wall-clock timeout is the hard backstop.
#[cfg(unix)]
fn apply_rlimits(command: &mut Command, limits: &SandboxLimits) {
    use std::os::unix::process::CommandExt;

    let cpu_seconds = (limits.timeout_sec + 1.0).ceil().max(1.0) as libc::rlim_t;
    let address_space_bytes = limits.max_memory_mb.saturating_mul(1024 * 1024) as libc::rlim_t;

    unsafe {
        command.pre_exec(move || {
            let cpu_limit = libc::rlimit {
                rlim_cur: cpu_seconds,
                rlim_max: cpu_seconds,
            };
            libc::setrlimit(libc::RLIMIT_CPU, &cpu_limit);

            let mem_limit = libc::rlimit {
                rlim_cur: address_space_bytes,
                rlim_max: address_space_bytes,
            };
            libc::setrlimit(libc::RLIMIT_AS, &mem_limit);

            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_rlimits(_command: &mut Command, _limits: &SandboxLimits) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_import_statements() {
        let err = validate_ast("import os\n").unwrap_err();
        assert!(err.contains("import"));
    }

    #[test]
    fn rejects_dunder_attribute_access() {
        let err = validate_ast("result = (1).__class__\n").unwrap_err();
        assert!(err.contains("dunder"));
    }

    #[test]
    fn rejects_banned_builtin_calls() {
        let err = validate_ast("result = eval('1')\n").unwrap_err();
        assert!(err.contains("not allowed"));
    }

    #[test]
    fn rejects_function_definitions() {
        let err = validate_ast("def f():\n    pass\n").unwrap_err();
        assert!(err.contains("function"));
    }

    #[test]
    fn allows_whitelisted_arithmetic_and_builtins() {
        assert!(validate_ast("result = sum([1, 2, 3]) + len('abc')\n").is_ok());
    }

    #[test]
    fn allows_math_module_attribute_calls() {
        assert!(validate_ast("result = math.sqrt(4)\n").is_ok());
    }

    #[test]
    fn rejects_while_loops() {
        let err = validate_ast("while True:\n    pass\n").unwrap_err();
        assert!(err.contains("while"));
    }
}
