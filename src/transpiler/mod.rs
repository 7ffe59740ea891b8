//! TypeScript to JavaScript transpiler using OXC
//!
//! Worker scripts may be written in TypeScript. They are stripped down to
//! plain JavaScript (parser, semantic analysis, transformer, codegen) right
//! before a context executes them.

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{TransformOptions, Transformer};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during TypeScript transpilation
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("Failed to parse TypeScript: {0}")]
    ParseError(String),

    #[error("Failed to transform TypeScript: {0}")]
    TransformError(String),

    #[error("Invalid source type: {0}")]
    InvalidSourceType(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for transpilation operations
pub type TranspileResult<T> = Result<T, TranspileError>;

/// Configuration for the TypeScript transpiler
#[derive(Debug, Clone, Default)]
pub struct TranspilerConfig {
    /// Whether to minify the output
    pub minify: bool,
}

/// Whether a script id names a TypeScript source
pub fn is_typescript(filename: &str) -> bool {
    [".ts", ".mts", ".cts"]
        .iter()
        .any(|ext| filename.ends_with(ext))
}

/// TypeScript transpiler that converts TypeScript to JavaScript
#[derive(Debug, Clone, Default)]
pub struct Transpiler {
    config: TranspilerConfig,
}

impl Transpiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TranspilerConfig) -> Self {
        Self { config }
    }

    /// Transpile `source` to JavaScript. `filename` selects the source type.
    pub fn transpile(&self, source: &str, filename: &str) -> TranspileResult<String> {
        let allocator = Allocator::default();

        let source_type = SourceType::from_path(filename).map_err(|e| {
            TranspileError::InvalidSourceType(format!("Unknown file extension: {:?}", e))
        })?;

        let parser_return = Parser::new(&allocator, source, source_type).parse();
        if !parser_return.errors.is_empty() {
            let error_messages: Vec<String> = parser_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::ParseError(error_messages.join("\n")));
        }

        let mut program = parser_return.program;

        // Semantic errors are not fatal for type stripping
        let semantic_ret = SemanticBuilder::new().build(&program);
        for error in &semantic_ret.errors {
            tracing::warn!(file = filename, "{}", error);
        }
        let scoping = semantic_ret.semantic.into_scoping();

        let transform_options = TransformOptions::default();
        let transformer_return =
            Transformer::new(&allocator, Path::new(filename), &transform_options)
                .build_with_scoping(scoping, &mut program);

        if !transformer_return.errors.is_empty() {
            let error_messages: Vec<String> = transformer_return
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect();
            return Err(TranspileError::TransformError(error_messages.join("\n")));
        }

        let codegen_options = CodegenOptions {
            minify: self.config.minify,
            ..Default::default()
        };

        Ok(Codegen::new()
            .with_options(codegen_options)
            .build(&program)
            .code)
    }

    /// Transpile the file at `path`
    pub fn transpile_file(&self, path: &Path) -> TranspileResult<String> {
        let source = std::fs::read_to_string(path)?;

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input.ts");

        self.transpile(&source, filename)
    }
}
