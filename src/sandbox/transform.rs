use std::path::Path;
use std::sync::LazyLock;

use boa_engine::{Context, Script, Source};
use oxc::allocator::Allocator;
use oxc::codegen::CodeGenerator;
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc::span::SourceType;
use oxc::transformer::{JsxOptions, JsxRuntime, TransformOptions, Transformer};
use regex::Regex;
use thiserror::Error;

/// Directive emitted at the top of every compiled block
pub const MODULE_PROLOGUE: &str = "\"use strict\";";

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import\s+[\w$*\s{},]+?\s*from\s*['"][^'"\n]+['"][ \t]*;?"#).unwrap()
});

static PURE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*\s*[#@]__PURE__\s*\*/[ \t]?").unwrap());

/// Ordered rewrites turning module syntax into plain script declarations
static EXPORT_REWRITES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // export default function name(...) / export default class Name
        (
            r"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\b\s*\*?\s*[A-Za-z_$][\w$]*\s*\()",
            "${1}${2}",
        ),
        (
            r"(?m)^([ \t]*)export\s+default\s+(class\s+[A-Za-z_$][\w$]*)",
            "${1}${2}",
        ),
        // anything else exported by default becomes a binding
        (
            r"(?m)^([ \t]*)export\s+default\s+",
            "${1}var __default_export = ",
        ),
        // export { a, b as c } [from '...'] and export * from '...'
        (
            r#"(?m)^([ \t]*)export\s+(?:\{[^}]*\}\s*(?:from\s*['"][^'"\n]*['"])?|\*\s*(?:as\s+[\w$]+\s+)?from\s*['"][^'"\n]*['"])[ \t]*;?"#,
            "${1}",
        ),
        (
            r"(?m)^([ \t]*)export\s+((?:async\s+)?function|class|const|let|var)\b",
            "${1}${2}",
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).unwrap(), replacement))
    .collect()
});

#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error("{0}")]
    Compilation(String),
    #[error("compiler produced no output")]
    EmptyOutput,
}

/// A code block ready to ship across the message boundary and to execute
#[derive(Debug, Clone, PartialEq)]
pub struct TranspiledBlock {
    /// Original import statements followed by the compiled source
    pub iframe_code: String,
    /// Compiled source without build markers, kept for display
    pub source_code: String,
    /// Compiled source used for execution
    pub script: String,
}

/// Returns every import statement in source order
pub fn extract_imports(source: &str) -> Vec<String> {
    IMPORT_RE
        .find_iter(source)
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

pub fn strip_imports(source: &str) -> String {
    IMPORT_RE.replace_all(source, "").trim().to_string()
}

/// Compiles one block into script form.
///
/// Module syntax is lowered first, then the block is parsed as a JSX-enabled
/// module and JSX is compiled to `React.createElement` calls. The generated
/// code gets the strict prologue and must parse as a script for the engine.
pub fn compile(source: &str) -> Result<String, TransformError> {
    let mut lowered = source.to_string();
    for (re, replacement) in EXPORT_REWRITES.iter() {
        lowered = re.replace_all(&lowered, *replacement).into_owned();
    }

    let lowered = lowered.trim();
    if lowered.is_empty() {
        return Err(TransformError::EmptyOutput);
    }

    let generated = transform_syntax(lowered)?;
    let generated = generated.trim();
    if generated.is_empty() {
        return Err(TransformError::EmptyOutput);
    }

    let compiled = format!("{MODULE_PROLOGUE}\n{generated}");

    let mut context = Context::default();
    Script::parse(Source::from_bytes(&compiled), None, &mut context)
        .map_err(|e| TransformError::Compilation(e.to_string()))?;

    Ok(compiled)
}

fn transform_options() -> TransformOptions {
    TransformOptions {
        jsx: JsxOptions {
            runtime: JsxRuntime::Classic,
            ..JsxOptions::default()
        },
        ..TransformOptions::default()
    }
}

/// Parses, transforms and prints a block with the oxc toolchain
fn transform_syntax(source: &str) -> Result<String, TransformError> {
    let allocator = Allocator::default();
    let source_type = SourceType::mjs().with_jsx(true);

    let parsed = Parser::new(&allocator, source, source_type).parse();
    if let Some(error) = parsed.errors.first() {
        return Err(TransformError::Compilation(error.to_string()));
    }
    let mut program = parsed.program;

    let (symbols, scopes) = SemanticBuilder::new()
        .build(&program)
        .semantic
        .into_symbol_table_and_scope_tree();

    let transformed = Transformer::new(&allocator, Path::new("block.jsx"), &transform_options())
        .build_with_symbols_and_scopes(symbols, scopes, &mut program);
    if let Some(error) = transformed.errors.first() {
        return Err(TransformError::Compilation(error.to_string()));
    }

    Ok(CodeGenerator::new().build(&program).code)
}

pub fn strip_build_markers(compiled: &str) -> String {
    PURE_MARKER_RE.replace_all(compiled, "").into_owned()
}

pub fn transpile(source: &str) -> Result<TranspiledBlock, TransformError> {
    let imports = extract_imports(source);
    let compiled = compile(&strip_imports(source))?;

    let iframe_code = if imports.is_empty() {
        compiled.clone()
    } else {
        format!("{}\n{}", imports.join("\n"), compiled)
    };

    Ok(TranspiledBlock {
        iframe_code,
        source_code: strip_build_markers(&compiled),
        script: compiled,
    })
}

/// Removes the prologue line `compile` adds, leaving the block's statements
pub fn without_prologue(compiled: &str) -> &str {
    compiled
        .strip_prefix(MODULE_PROLOGUE)
        .map(|rest| rest.strip_prefix('\n').unwrap_or(rest))
        .unwrap_or(compiled)
}
