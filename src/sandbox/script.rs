use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::test_runner::{PRELUDE, RUN_TRIGGER};
use super::transform::{MODULE_PROLOGUE, without_prologue};

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// Builds the single script run for one request.
///
/// Order of evaluation: the harness, the solution, the direct invocations of
/// `function_name` (timed), then the test module and the run trigger. Every
/// throw lands in the same catch and rejects the settled promise.
///
/// Both blocks run in strict mode: the prologue each one was compiled with is
/// moved to the top of the enclosing function.
pub fn synthesize(
    solution: &str,
    tests: &str,
    test_cases: &[Vec<Value>],
    function_name: &str,
) -> String {
    // serde_json output is a valid JavaScript literal
    let cases = serde_json::to_string(test_cases).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"{PRELUDE}
__codebox.settle((function () {{
  {MODULE_PROLOGUE}
  var __state = {{ returns: [], timeTaken: 0 }};
  var __testsDone;
  try {{
{solution}
    const __runTests = async () => {{
{tests}
      return {RUN_TRIGGER};
    }};
    const __testCases = {cases};
    const __started = __codebox.now();
    for (const __args of __testCases) {{
      __state.returns.push({call});
    }}
    __state.timeTaken = __codebox.now() - __started;
    __testsDone = __runTests();
  }} catch (__error) {{
    return Promise.reject(__error);
  }}
  return __testsDone.then(function (testResults) {{
    return {{
      testResults: testResults,
      timeTaken: __state.timeTaken,
      message: __codebox.stringify(__state.returns),
    }};
  }});
}})());
"#,
        solution = without_prologue(solution),
        tests = without_prologue(tests),
        call = invocation(function_name),
    )
}

/// Inline call expression for the function under test
fn invocation(function_name: &str) -> String {
    if IDENTIFIER_RE.is_match(function_name) {
        format!("{function_name}(...__args)")
    } else {
        let quoted = serde_json::to_string(function_name).unwrap_or_else(|_| "\"\"".to_string());
        format!("(() => {{ throw new ReferenceError({quoted} + \" is not defined\"); }})()")
    }
}
