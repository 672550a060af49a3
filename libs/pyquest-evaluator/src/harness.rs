//! Test-harness code synthesizer.
//!
//! Turns student source plus a test specification into a second Python
//! program. That program loads the student's definitions, drives them with
//! each case, and prints a sentinel-delimited JSON block for
//! [`crate::parser`]. Student source and case data are embedded
//! base64-encoded, so no quoting in the student's code can break out of the
//! harness.
//!
//! Everything the student's code prints is captured and carried inside the
//! block (`programOutput`, per-case `stdout`), so the harness is the only
//! writer of the real stdout.
//!
//! A harness that cannot reach its test loop (syntax error, top-level
//! exception, missing target) prints a single `Error: <Type>: <message>`
//! line and never prints the sentinel block.

use base64::{engine::general_purpose, Engine as _};
use pyquest_common::types::{FunctionTarget, TestCase};
use serde_json::{json, Map, Value};

pub const RESULTS_BEGIN: &str = "===TEST_RESULTS_JSON===";
pub const RESULTS_END: &str = "===END_TEST_RESULTS_JSON===";
pub const TURTLE_BEGIN: &str = "===TURTLE_PATH_JSON===";
pub const TURTLE_END: &str = "===END_TURTLE_PATH_JSON===";

/// Module name given to student code that is only loaded for its
/// definitions, so `if __name__ == "__main__":` blocks stay dormant.
const DEFINITIONS_MODULE: &str = "__student__";

const PRELUDE: &str = r#"import base64, builtins, contextlib, io, json, sys

_ORIGINAL_INPUT = builtins.input


def _decode(blob):
    return base64.b64decode(blob).decode("utf-8")


def _describe(exc):
    return "%s: %s" % (type(exc).__name__, exc)


def _compile_error(exc):
    message = "%s: %s" % (type(exc).__name__, exc.msg)
    if exc.lineno:
        message += " (line %d)" % exc.lineno
    return message


def _fail(message):
    builtins.input = _ORIGINAL_INPUT
    sys.stdout.write("\nError: " + message + "\n")
    sys.stdout.flush()
    sys.exit(0)


class _Stdin:
    def __init__(self, lines):
        self.lines = list(lines)

    def __call__(self, prompt=""):
        sys.stdout.write(str(prompt))
        if not self.lines:
            raise EOFError("EOF when reading a line")
        return self.lines.pop(0)


def _encode(value):
    try:
        return json.loads(json.dumps(value, allow_nan=False)), False
    except (TypeError, ValueError):
        return repr(value), True


def _emit(begin, payload, end):
    try:
        body = json.dumps(payload, allow_nan=False)
    except ValueError as exc:
        _fail(_describe(exc))
    sys.stdout.write("\n" + begin + "\n" + body + "\n" + end + "\n")
    sys.stdout.flush()


def _load(source):
    try:
        return compile(source, "<student>", "exec")
    except SyntaxError as exc:
        _fail(_compile_error(exc))
"#;

const FUNCTION_BODY: &str = r#"
_SOURCE = _decode("{{SOURCE}}")
_CASES = json.loads(_decode("{{CASES}}"))
_TARGET = "{{TARGET}}"

_code = _load(_SOURCE)
_records = []
_top = io.StringIO()
try:
    _namespace = {"__name__": "{{MODULE}}"}
    builtins.input = _Stdin([])
    try:
        with contextlib.redirect_stdout(_top):
            exec(_code, _namespace)
    except SystemExit as exc:
        if exc.code not in (None, 0):
            _fail(_describe(exc))
    except BaseException as exc:
        _fail(_describe(exc))

    _function = _namespace.get(_TARGET)
    if not callable(_function):
        _fail("NameError: function '%s' is not defined" % _TARGET)

    for _index, _case in enumerate(_CASES):
        _buffer = io.StringIO()
        builtins.input = _Stdin(_case["stdin"])
        try:
            with contextlib.redirect_stdout(_buffer):
                _value = _function(*_case["args"])
            _actual, _opaque = _encode(_value)
            _records.append({"index": _index, "actual": _actual, "error": False,
                             "opaque": _opaque, "stdout": _buffer.getvalue()})
        except BaseException as exc:
            _records.append({"index": _index, "actual": _describe(exc), "error": True,
                             "opaque": False, "stdout": _buffer.getvalue()})
except Exception as exc:
    _fail(_describe(exc))
finally:
    builtins.input = _ORIGINAL_INPUT

_emit("{{BEGIN}}", {"outcomes": _records, "programOutput": _top.getvalue()}, "{{END}}")
"#;

const PROGRAM_BODY: &str = r#"
_SOURCE = _decode("{{SOURCE}}")
_CASES = json.loads(_decode("{{CASES}}"))
_BINDINGS = json.loads(_decode("{{BINDINGS}}"))

_code = _load(_SOURCE)
_records = []
try:
    for _index, _case in enumerate(_CASES):
        _buffer = io.StringIO()
        _namespace = {"__name__": "__main__"}
        _namespace.update(_BINDINGS)
        builtins.input = _Stdin(_case["stdin"])
        _error = None
        try:
            with contextlib.redirect_stdout(_buffer):
                exec(_code, _namespace)
        except SystemExit as exc:
            if exc.code not in (None, 0):
                _error = _describe(exc)
        except BaseException as exc:
            _error = _describe(exc)
        if _error is None:
            _records.append({"index": _index, "actual": _buffer.getvalue(), "error": False,
                             "opaque": False, "stdout": ""})
        else:
            _records.append({"index": _index, "actual": _error, "error": True,
                             "opaque": False, "stdout": _buffer.getvalue()})
except Exception as exc:
    _fail(_describe(exc))
finally:
    builtins.input = _ORIGINAL_INPUT

_emit("{{BEGIN}}", {"outcomes": _records, "programOutput": ""}, "{{END}}")
"#;

/// Recording stand-in for the `turtle` module. Pen-down moves append a
/// segment; turns only change the heading. Animation and event-loop calls
/// are no-ops, so the end of the program is the completion signal.
const TURTLE_SHIM: &str = r#"
import math, types

_SEGMENTS = []


class _Pen:
    def __init__(self):
        self._x = 0.0
        self._y = 0.0
        self._heading = 0.0
        self._down = True

    def _move(self, x, y):
        x, y = float(x), float(y)
        if not (math.isfinite(x) and math.isfinite(y)):
            raise ValueError("turtle position must be a finite number")
        if self._down and (x, y) != (self._x, self._y):
            _SEGMENTS.append({"start": [self._x, self._y], "end": [x, y]})
        self._x, self._y = x, y

    def forward(self, distance):
        rad = math.radians(self._heading)
        self._move(self._x + distance * math.cos(rad), self._y + distance * math.sin(rad))

    def backward(self, distance):
        self.forward(-distance)

    def left(self, angle):
        self._heading = (self._heading + angle) % 360.0

    def right(self, angle):
        self.left(-angle)

    def setheading(self, angle):
        self._heading = float(angle) % 360.0

    def goto(self, x, y=None):
        if y is None:
            x, y = x
        self._move(x, y)

    def setx(self, x):
        self._move(x, self._y)

    def sety(self, y):
        self._move(self._x, y)

    def home(self):
        self._move(0.0, 0.0)
        self._heading = 0.0

    def circle(self, radius, extent=None, steps=None):
        extent = 360.0 if extent is None else float(extent)
        if steps is None:
            frac = abs(extent) / 360.0
            steps = 1 + int(min(11 + abs(radius) / 6.0, 59.0) * frac)
        w = extent / steps
        w2 = 0.5 * w
        length = 2.0 * radius * math.sin(math.radians(w2))
        if radius < 0:
            length, w, w2 = -length, -w, -w2
        self.left(w2)
        for _ in range(steps):
            self.forward(length)
            self.left(w)
        self.left(-w2)

    def penup(self):
        self._down = False

    def pendown(self):
        self._down = True

    def isdown(self):
        return self._down

    def position(self):
        return (self._x, self._y)

    def xcor(self):
        return self._x

    def ycor(self):
        return self._y

    def heading(self):
        return self._heading

    def reset(self):
        del _SEGMENTS[:]
        self._x, self._y, self._heading, self._down = 0.0, 0.0, 0.0, True

    fd = forward
    bk = back = backward
    lt = left
    rt = right
    seth = setheading
    setpos = setposition = goto
    pu = up = penup
    pd = down = pendown
    pos = position

    def __getattr__(self, name):
        return lambda *args, **kwargs: None


class _Screen:
    def __getattr__(self, name):
        return lambda *args, **kwargs: None


_DEFAULT = _Pen()
_module = types.ModuleType("turtle")
_module.Turtle = _Pen
_module.RawTurtle = _Pen
_module.Pen = _Pen
_module.Screen = lambda *args, **kwargs: _Screen()
_exported = ["Turtle", "RawTurtle", "Pen", "Screen"]
for _name in ("forward", "fd", "backward", "bk", "back", "left", "lt", "right", "rt",
              "setheading", "seth", "goto", "setpos", "setposition", "setx", "sety",
              "home", "circle", "penup", "pu", "up", "pendown", "pd", "down", "isdown",
              "position", "pos", "xcor", "ycor", "heading", "reset", "clear"):
    setattr(_module, _name, getattr(_DEFAULT, _name))
    _exported.append(_name)
for _name in ("done", "mainloop", "exitonclick", "bye", "speed", "tracer", "update",
              "delay", "color", "pencolor", "fillcolor", "bgcolor", "begin_fill",
              "end_fill", "width", "pensize", "hideturtle", "ht", "showturtle", "st",
              "shape", "dot", "stamp", "write", "title", "setup", "degrees"):
    setattr(_module, _name, lambda *args, **kwargs: None)
    _exported.append(_name)
_module.__all__ = _exported
_module.__getattr__ = lambda name: (lambda *args, **kwargs: None)
sys.modules["turtle"] = _module

_SOURCE = _decode("{{SOURCE}}")
_code = _load(_SOURCE)
_error = None
_top = io.StringIO()
try:
    with contextlib.redirect_stdout(_top):
        exec(_code, {"__name__": "__main__"})
except SystemExit as exc:
    if exc.code not in (None, 0):
        _error = _describe(exc)
except BaseException as exc:
    _error = _describe(exc)

_emit("{{BEGIN}}", {"segments": _SEGMENTS, "error": _error, "programOutput": _top.getvalue()}, "{{END}}")
"#;

fn b64(text: &str) -> String {
    general_purpose::STANDARD.encode(text.as_bytes())
}

fn stdin_of(case: &TestCase) -> Value {
    json!(case.stdin)
}

/// Harness for a testing section.
///
/// * `__main__`: run the whole program once per case (normally one) with
///   stdout captured; the captured text is the case's actual value.
/// * named function: load the definitions, then call `target(*args)` for
///   every case, catching each case's exception individually.
pub fn synthesize(source: &str, target: &FunctionTarget, cases: &[TestCase]) -> String {
    match target {
        FunctionTarget::Main => {
            let cases: Vec<Value> = cases.iter().map(|c| json!({ "stdin": stdin_of(c) })).collect();
            program_harness(source, &cases, &Map::new())
        }
        FunctionTarget::Function(name) => {
            let cases: Vec<Value> = cases
                .iter()
                .map(|c| json!({ "args": c.args(), "stdin": stdin_of(c) }))
                .collect();
            let body = FUNCTION_BODY
                .replace("{{SOURCE}}", &b64(source))
                .replace("{{CASES}}", &b64(&Value::Array(cases).to_string()))
                .replace("{{TARGET}}", &python_identifier(name))
                .replace("{{MODULE}}", DEFINITIONS_MODULE)
                .replace("{{BEGIN}}", RESULTS_BEGIN)
                .replace("{{END}}", RESULTS_END);
            format!("{}{}", PRELUDE, body)
        }
    }
}

/// Harness for a coverage challenge: the parameters are bound into the
/// program's global scope before it runs, never spliced into its text.
pub fn synthesize_coverage(code: &str, bindings: &Map<String, Value>) -> String {
    program_harness(code, &[json!({ "stdin": [] })], bindings)
}

/// Harness for a turtle section: installs the recording `turtle` module and
/// prints the recorded segments.
pub fn synthesize_turtle(source: &str) -> String {
    let body = TURTLE_SHIM
        .replace("{{SOURCE}}", &b64(source))
        .replace("{{BEGIN}}", TURTLE_BEGIN)
        .replace("{{END}}", TURTLE_END);
    format!("{}{}", PRELUDE, body)
}

fn program_harness(source: &str, cases: &[Value], bindings: &Map<String, Value>) -> String {
    let body = PROGRAM_BODY
        .replace("{{SOURCE}}", &b64(source))
        .replace("{{CASES}}", &b64(&Value::Array(cases.to_vec()).to_string()))
        .replace("{{BINDINGS}}", &b64(&Value::Object(bindings.clone()).to_string()))
        .replace("{{BEGIN}}", RESULTS_BEGIN)
        .replace("{{END}}", RESULTS_END);
    format!("{}{}", PRELUDE, body)
}

/// Target names are interpolated into a string literal; keep only
/// identifier characters.
fn python_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}
