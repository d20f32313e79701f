//! Embedded interpreter lifecycle.
//!
//! This module owns every RustPython API call. Each execution gets a fresh
//! interpreter: nothing a candidate program does to its namespace, to
//! `sys.stdout` or to the chart recorder can leak into the next attempt.
//!
//! The restricted namespace is assembled in three steps, in order:
//! 1. An import hook replaces `builtins.__import__` and rejects any module
//!    outside the policy allowlist when the import originates in user code.
//! 2. `sys.stdout`/`sys.stderr` are replaced with objects that write into a
//!    bounded [`OutputBuffer`].
//! 3. A trusted bootstrap runs in the execution scope: it imports the
//!    allowed modules, binds `df`, then shadows every builtin outside the
//!    allowlist with a guard that raises on call. Imports happen before
//!    shadowing because the bootstrap itself still needs real builtins.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustpython_vm::{
    builtins::PyBaseExceptionRef, compiler::Mode, function::FuncArgs, scope::Scope, AsObject,
    Interpreter, PyObjectRef, PyResult, VirtualMachine,
};

use crate::chart::FigureSpec;
use crate::sandbox::output::OutputBuffer;
use crate::sandbox::policy::ExecPolicy;
use crate::table::{DataTable, Value};

/// Raw result of one interpreter run, before the runner classifies it.
#[derive(Debug)]
pub(crate) struct VmOutcome {
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub figures: Vec<FigureSpec>,
    pub error: Option<VmError>,
}

#[derive(Debug)]
pub(crate) enum VmError {
    Syntax {
        message: String,
    },
    Runtime {
        type_name: String,
        message: String,
        traceback: String,
    },
}

/// Trusted code run in the execution scope before the candidate program.
///
/// Allowed-module imports come first; the builtin shadowing loop must run
/// last because the bootstrap itself relies on real builtins up to that
/// point (`except Exception` stops resolving once `Exception` is shadowed).
const BOOTSTRAP: &str = "\
import math
import plt
import tabular
import statistics
try:
    import datetime
except Exception:
    datetime = None
df = tabular.DataFrame(__table_columns__, __table_rows__)
del __table_columns__
del __table_rows__
try:
    __builtin_names__ = list(__builtins__.keys())
except AttributeError:
    __builtin_names__ = dir(__builtins__)
def __make_guard__(name):
    def __guard__(*args, **kwargs):
        raise RuntimeError('builtin %r is disabled in the sandbox' % name)
    return __guard__
__globals__ = globals()
for __n__ in __builtin_names__:
    if __n__.startswith('__'):
        continue
    if __n__ not in __allowed_builtins__:
        __globals__[__n__] = __make_guard__(__n__)
del __globals__
del __n__
del __builtin_names__
del __make_guard__
del __allowed_builtins__
";

/// Execute `source` against `table` inside a fresh restricted interpreter.
///
/// Never returns a host error: interpreter-level failures are carried in
/// [`VmOutcome::error`] so the runner can classify them.
pub(crate) fn execute(
    policy: &ExecPolicy,
    table: &DataTable,
    source: &str,
    max_output_chars: usize,
) -> VmOutcome {
    let output = OutputBuffer::new(max_output_chars);
    let allowed_modules = Arc::new(policy.allowed_modules.clone());
    let interpreter = build_interpreter();

    let (error, figures) = interpreter.enter(|vm| {
        install_import_hook(vm, &allowed_modules);
        install_output_capture(vm, output.clone());

        let scope = vm.new_scope_with_builtins();
        if let Err(exc) = prepare_scope(vm, &scope, policy, table) {
            return (Some(internal_error(vm, exc)), Vec::new());
        }

        let code = match vm.compile(source, Mode::Exec, "<candidate>".to_owned()) {
            Ok(code) => code,
            Err(e) => {
                return (
                    Some(VmError::Syntax {
                        message: e.to_string(),
                    }),
                    Vec::new(),
                );
            }
        };

        match vm.run_code_obj(code, scope.clone()) {
            Ok(_) => (None, export_figures(vm, &scope)),
            Err(exc) => (Some(runtime_error(vm, exc)), Vec::new()),
        }
    });

    let (stdout, stderr, truncated) = output.snapshot();
    VmOutcome {
        stdout,
        stderr,
        truncated,
        figures,
        error,
    }
}

/// Builds a fresh interpreter with the native stdlib modules and the two
/// frozen host modules (`plt`, `tabular`) registered.
fn build_interpreter() -> Interpreter {
    let settings = rustpython_vm::Settings::default();
    Interpreter::with_init(settings, |vm| {
        vm.add_native_modules(rustpython_stdlib::get_module_inits());

        // Chart recorder. Candidate code draws through this module; the host
        // reads the recorded figures back as JSON and renders them itself.
        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
_figures = []
_current = None

class _Figure:
    def __init__(self):
        self.title = ''
        self.xlabel = ''
        self.ylabel = ''
        self.series = []

def _active():
    global _current
    if _current is None:
        figure()
    return _current

def figure(*args, **kwargs):
    global _current
    _current = _Figure()
    _figures.append(_current)
    return _current

def plot(x, y=None, label=''):
    if y is None:
        y = list(x)
        x = list(range(len(y)))
    s = {'kind': 'line', 'x': [float(v) for v in x], 'y': [float(v) for v in y], 'label': str(label)}
    _active().series.append(s)

def scatter(x, y, label=''):
    s = {'kind': 'scatter', 'x': [float(v) for v in x], 'y': [float(v) for v in y], 'label': str(label)}
    _active().series.append(s)

def bar(labels, values):
    s = {'kind': 'bar', 'labels': [str(l) for l in labels], 'values': [float(v) for v in values]}
    _active().series.append(s)

def hist(values, bins=10):
    s = {'kind': 'hist', 'values': [float(v) for v in values], 'bins': int(bins)}
    _active().series.append(s)

def title(text):
    _active().title = str(text)

def xlabel(text):
    _active().xlabel = str(text)

def ylabel(text):
    _active().ylabel = str(text)

def legend(*args, **kwargs):
    pass

def grid(*args, **kwargs):
    pass

def tight_layout(*args, **kwargs):
    pass

def xticks(*args, **kwargs):
    pass

def yticks(*args, **kwargs):
    pass

def show(*args, **kwargs):
    pass

def savefig(*args, **kwargs):
    pass

def get_fignums():
    return list(range(1, len(_figures) + 1))

def close(*args):
    global _current
    del _figures[:]
    _current = None

def _escape(s):
    out = ['"']
    for c in s:
        if c == '"':
            out.append('\\"')
        elif c == '\\':
            out.append('\\\\')
        elif c == '\n':
            out.append('\\n')
        elif c == '\r':
            out.append('\\r')
        elif c == '\t':
            out.append('\\t')
        elif ord(c) < 32:
            out.append('\\u%04x' % ord(c))
        else:
            out.append(c)
    out.append('"')
    return ''.join(out)

def _num(v):
    v = float(v)
    if v != v or v == float('inf') or v == float('-inf'):
        return '0'
    return repr(v)

def _nums(values):
    return '[' + ', '.join(_num(v) for v in values) + ']'

def _strs(values):
    return '[' + ', '.join(_escape(str(v)) for v in values) + ']'

def _series_json(s):
    kind = s['kind']
    if kind == 'line' or kind == 'scatter':
        return '{"kind": %s, "x": %s, "y": %s, "label": %s}' % (
            _escape(kind), _nums(s['x']), _nums(s['y']), _escape(s['label']))
    if kind == 'bar':
        return '{"kind": "bar", "labels": %s, "values": %s}' % (
            _strs(s['labels']), _nums(s['values']))
    return '{"kind": "hist", "values": %s, "bins": %d}' % (_nums(s['values']), s['bins'])

def _figure_json(fig):
    return '{"title": %s, "xlabel": %s, "ylabel": %s, "series": [%s]}' % (
        _escape(fig.title), _escape(fig.xlabel), _escape(fig.ylabel),
        ', '.join(_series_json(s) for s in fig.series))

def _export_json():
    return '[' + ', '.join(_figure_json(f) for f in _figures) + ']'
"#,
            module_name = "plt"
        ));

        // Read-only table access for candidate code. `df` is an instance of
        // this DataFrame, constructed by the bootstrap from host-injected
        // column and row data.
        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
class DataFrame:
    def __init__(self, columns, rows):
        self._columns = list(columns)
        self._rows = [dict(r) for r in rows]

    def columns(self):
        return list(self._columns)

    def shape(self):
        return (len(self._rows), len(self._columns))

    def rows(self):
        return [dict(r) for r in self._rows]

    def column(self, name):
        if name not in self._columns:
            raise KeyError(name)
        return [r.get(name) for r in self._rows]

    def numeric(self, name):
        values = []
        for v in self.column(name):
            if isinstance(v, bool):
                continue
            if isinstance(v, (int, float)):
                values.append(v)
        return values

    def head(self, n=5):
        return [dict(r) for r in self._rows[:n]]

    def __len__(self):
        return len(self._rows)
"#,
            module_name = "tabular"
        ));

        // Minimal statistics module. The native stdlib set has no pure-Python
        // statistics, and candidate code reaches for mean/median often enough
        // to warrant a frozen stand-in.
        vm.add_frozen(rustpython_vm::py_freeze!(
            source = r#"
def mean(values):
    values = list(values)
    if not values:
        raise ValueError('mean requires at least one data point')
    return sum(values) / len(values)

def median(values):
    values = sorted(values)
    if not values:
        raise ValueError('median requires at least one data point')
    n = len(values)
    mid = n // 2
    if n % 2 == 1:
        return values[mid]
    return (values[mid - 1] + values[mid]) / 2

def variance(values):
    values = list(values)
    if len(values) < 2:
        raise ValueError('variance requires at least two data points')
    m = mean(values)
    return sum((v - m) ** 2 for v in values) / (len(values) - 1)

def pvariance(values):
    values = list(values)
    if not values:
        raise ValueError('pvariance requires at least one data point')
    m = mean(values)
    return sum((v - m) ** 2 for v in values) / len(values)

def stdev(values):
    return variance(values) ** 0.5

def pstdev(values):
    return pvariance(values) ** 0.5
"#,
            module_name = "statistics"
        ));
    })
}

/// Injects table data and the builtin allowlist, then runs [`BOOTSTRAP`].
fn prepare_scope(
    vm: &VirtualMachine,
    scope: &Scope,
    policy: &ExecPolicy,
    table: &DataTable,
) -> PyResult<()> {
    scope
        .globals
        .set_item("__name__", vm.ctx.new_str("__main__").into(), vm)?;

    let columns: Vec<PyObjectRef> = table
        .columns()
        .iter()
        .map(|c| vm.ctx.new_str(c.as_str()).into())
        .collect();
    scope
        .globals
        .set_item("__table_columns__", vm.ctx.new_list(columns).into(), vm)?;

    let mut rows: Vec<PyObjectRef> = Vec::with_capacity(table.row_count());
    for row in table.rows() {
        let dict = vm.ctx.new_dict();
        for (name, value) in table.columns().iter().zip(row) {
            dict.set_item(name.as_str(), value_to_py(vm, value), vm)?;
        }
        rows.push(dict.into());
    }
    scope
        .globals
        .set_item("__table_rows__", vm.ctx.new_list(rows).into(), vm)?;

    let allowed: Vec<PyObjectRef> = policy
        .allowed_builtins
        .iter()
        .map(|name| vm.ctx.new_str(name.as_str()).into())
        .collect();
    scope.globals.set_item(
        "__allowed_builtins__",
        vm.ctx.new_list(allowed).into(),
        vm,
    )?;

    let code = vm
        .compile(BOOTSTRAP, Mode::Exec, "<bootstrap>".to_owned())
        .map_err(|e| vm.new_runtime_error(format!("bootstrap failed to compile: {}", e)))?;
    vm.run_code_obj(code, scope.clone())?;
    Ok(())
}

fn value_to_py(vm: &VirtualMachine, value: &Value) -> PyObjectRef {
    match value {
        Value::Null => vm.ctx.none(),
        Value::Bool(b) => vm.ctx.new_bool(*b).into(),
        Value::Int(i) => vm.ctx.new_int(*i).into(),
        Value::Float(f) => vm.ctx.new_float(*f).into(),
        Value::Str(s) => vm.ctx.new_str(s.as_str()).into(),
    }
}

/// Replaces `builtins.__import__` with an allowlist gate.
///
/// The check applies only to imports whose calling globals carry
/// `__name__ == "__main__"`, so frozen and native modules keep importing
/// their own dependencies freely.
fn install_import_hook(vm: &VirtualMachine, allowed: &Arc<BTreeSet<String>>) {
    const SAVED_IMPORT_ATTR: &str = "__statbot_original_import__";

    let original_import = if let Ok(saved) = vm.builtins.get_attr(SAVED_IMPORT_ATTR, vm) {
        saved
    } else {
        let real = match vm.builtins.get_attr("__import__", vm) {
            Ok(f) => f,
            Err(_) => return,
        };
        let _ = vm.builtins.set_attr(SAVED_IMPORT_ATTR, real.clone(), vm);
        real
    };

    // PyObjectRef is not Send+Sync but the closure only ever runs on the
    // interpreter's thread.
    #[allow(clippy::arc_with_non_send_sync)]
    let original_import = Arc::new(original_import);
    let allowed = Arc::clone(allowed);

    let hook = vm.new_function(
        "__import__",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let module_name: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();

            if is_user_code_import(&args, vm) {
                let top_level = module_name.split('.').next().unwrap_or(&module_name);
                if !allowed.contains(&module_name) && !allowed.contains(top_level) {
                    return Err(vm.new_import_error(
                        format!("import of module {:?} is not allowed", module_name),
                        vm.ctx.new_str(module_name),
                    ));
                }
            }

            original_import.call(args, vm)
        },
    );

    let _ = vm.builtins.set_attr("__import__", hook, vm);
}

/// `__import__(name, globals, locals, fromlist, level)`: the calling
/// module's globals are the second positional argument. User code runs with
/// `__name__ == "__main__"`; real modules carry their own name.
fn is_user_code_import(args: &FuncArgs, vm: &VirtualMachine) -> bool {
    let Some(globals) = args.args.get(1) else {
        return true;
    };
    if vm.is_none(globals) {
        return true;
    }
    if let Ok(name_val) = vm.call_method(globals, "get", (vm.ctx.new_str("__name__"),)) {
        if !vm.is_none(&name_val) {
            if let Ok(name) = name_val.str(vm) {
                return name.as_str() == "__main__" || name.as_str().is_empty();
            }
        }
    }
    true
}

/// Points `sys.stdout`/`sys.stderr` at the shared [`OutputBuffer`].
fn install_output_capture(vm: &VirtualMachine, output: OutputBuffer) {
    let stdout_obj = build_writer_object(vm, output.clone(), true);
    let stderr_obj = build_writer_object(vm, output, false);
    let _ = vm.sys_module.set_attr("stdout", stdout_obj, vm);
    let _ = vm.sys_module.set_attr("stderr", stderr_obj, vm);
}

/// A module-as-namespace with `write`/`flush` plus the `closed` and
/// `encoding` attributes some library code probes for.
fn build_writer_object(vm: &VirtualMachine, output: OutputBuffer, is_stdout: bool) -> PyObjectRef {
    let write_buf = output.clone();
    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let data: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();
            if is_stdout {
                write_buf.write_stdout(&data);
            } else {
                write_buf.write_stderr(&data);
            }
            Ok(vm.ctx.new_int(data.len()).into())
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            Ok(vm.ctx.none())
        },
    );

    let ns = vm.new_module("<writer>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    let _ = ns.set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}

/// Reads the figures the candidate recorded through `plt`.
///
/// Only reached on the success path; a failed run never exports charts.
fn export_figures(vm: &VirtualMachine, scope: &Scope) -> Vec<FigureSpec> {
    let globals: PyObjectRef = scope.globals.clone().into();
    let plt = match vm.call_method(&globals, "get", (vm.ctx.new_str("plt"),)) {
        Ok(obj) if !vm.is_none(&obj) => obj,
        _ => return Vec::new(),
    };
    let json = match vm.call_method(&plt, "_export_json", FuncArgs::default()) {
        Ok(obj) => obj,
        Err(_) => return Vec::new(),
    };
    let figures = json
        .str(vm)
        .ok()
        .and_then(|s| serde_json::from_str::<Vec<FigureSpec>>(s.as_str()).ok())
        .unwrap_or_default();
    let _ = vm.call_method(&plt, "close", FuncArgs::default());
    figures
}

fn runtime_error(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> VmError {
    let type_name = exc
        .class()
        .as_object()
        .get_attr("__name__", vm)
        .ok()
        .and_then(|o| o.str(vm).ok())
        .map(|s| s.as_str().to_owned())
        .unwrap_or_else(|| "Exception".to_owned());

    let message = exc
        .as_object()
        .str(vm)
        .map(|s| s.as_str().to_owned())
        .unwrap_or_else(|_| "unknown runtime error".to_owned());

    let mut traceback = String::new();
    let _ = vm.write_exception(&mut traceback, &exc);

    VmError::Runtime {
        type_name,
        message,
        traceback,
    }
}

fn internal_error(vm: &VirtualMachine, exc: PyBaseExceptionRef) -> VmError {
    match runtime_error(vm, exc) {
        VmError::Runtime {
            message, traceback, ..
        } => VmError::Runtime {
            type_name: "InternalError".to_owned(),
            message: format!("sandbox bootstrap failed: {}", message),
            traceback,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> DataTable {
        DataTable::new(
            vec!["region".into(), "sales".into()],
            vec![
                vec![Value::Str("North".into()), Value::Int(1200)],
                vec![Value::Str("South".into()), Value::Int(900)],
            ],
        )
        .unwrap()
    }

    fn run(source: &str) -> VmOutcome {
        execute(&ExecPolicy::default(), &table(), source, 10_000)
    }

    #[test]
    fn test_stdout_capture_and_df_binding() {
        let outcome = run("print('rows:', len(df.rows()))");
        assert!(outcome.error.is_none(), "error: {:?}", outcome.error);
        assert_eq!(outcome.stdout, "rows: 2\n");
        assert!(outcome.stderr.is_empty());
    }

    #[test]
    fn test_shadowed_builtin_raises() {
        let outcome = run("open('/etc/passwd')");
        match outcome.error {
            Some(VmError::Runtime {
                ref type_name,
                ref message,
                ..
            }) => {
                assert_eq!(type_name, "RuntimeError");
                assert!(message.contains("disabled"), "message: {}", message);
            }
            other => panic!("expected RuntimeError, got {:?}", other),
        }
    }

    #[test]
    fn test_denied_import_raises_import_error() {
        let outcome = run("import socket");
        match outcome.error {
            Some(VmError::Runtime { ref type_name, .. }) => {
                assert_eq!(type_name, "ImportError");
            }
            other => panic!("expected ImportError, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_column_is_key_error() {
        let outcome = run("print(df.column('profit'))");
        match outcome.error {
            Some(VmError::Runtime { ref type_name, .. }) => {
                assert_eq!(type_name, "KeyError");
            }
            other => panic!("expected KeyError, got {:?}", other),
        }
    }

    #[test]
    fn test_figures_exported_on_success() {
        let outcome = run(
            "plt.bar([row['region'] for row in df.rows()], [row['sales'] for row in df.rows()])\n\
             plt.title('sales by region')\n\
             print('done')",
        );
        assert!(outcome.error.is_none(), "error: {:?}", outcome.error);
        assert_eq!(outcome.figures.len(), 1);
        assert_eq!(outcome.figures[0].title, "sales by region");
    }

    #[test]
    fn test_no_figures_without_plotting() {
        let outcome = run("x = sum(row['sales'] for row in df.rows())\nprint(x)");
        assert!(outcome.error.is_none(), "error: {:?}", outcome.error);
        assert!(outcome.figures.is_empty());
        assert_eq!(outcome.stdout, "2100\n");
    }

    #[test]
    fn test_statistics_module_available() {
        let outcome = run("print(statistics.mean([1, 2, 3]))");
        assert!(outcome.error.is_none(), "error: {:?}", outcome.error);
        assert_eq!(outcome.stdout, "2.0\n");
    }

    #[test]
    fn test_truncation_flag_set() {
        let outcome = run("print('x' * 20000)");
        assert!(outcome.error.is_none(), "error: {:?}", outcome.error);
        assert!(outcome.truncated);
        assert_eq!(outcome.stdout.chars().count(), 10_000);
    }
}
