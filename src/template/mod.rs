//! A small text templating engine in the style of Go's `text/template`.
//!
//! Templates are parsed once and executed many times against a [`Value`]
//! tree. Supported syntax:
//!
//! - `.a.b` field access, `$` for the root, `$x` for variables
//! - pipelines (`.a | default "x"`) and parenthesised sub-pipelines
//! - `if` / `else if` / `else`, `range` (with `break` / `continue`), `with`
//! - `$x := value` declarations and `$x = value` assignments
//! - comments (`/* ... */`) and whitespace trim markers (`- `, ` -`)
//!
//! Delimiters are configurable so templates can live inside JSON bodies
//! without escaping braces.

mod builtins;
mod exec;
mod lexer;
mod parse;
mod value;

pub use value::{Value, MISSING_VALUE};

use builtins::BUILTINS;
use exec::Exec;
use lexer::Lexer;
use parse::{Node, Parser};
use std::collections::HashMap;
use std::sync::Arc;

/// A function callable from templates.
pub type Func = fn(&[Value]) -> Result<Value, String>;

/// Named functions injected into a template at parse time.
#[derive(Debug, Clone, Default)]
pub struct FuncMap {
    funcs: HashMap<&'static str, Func>,
}

impl FuncMap {
    /// An empty function map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &'static str, func: Func) -> Self {
        self.funcs.insert(name, func);
        self
    }

    /// Look up a function by name.
    pub fn get(&self, name: &str) -> Option<Func> {
        self.funcs.get(name).copied()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

/// Check a function's argument count.
pub fn arity(args: &[Value], want: usize) -> Result<(), String> {
    if args.len() != want {
        return Err(format!(
            "wrong number of args: want {} got {}",
            want,
            args.len()
        ));
    }
    Ok(())
}

/// Template errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error("template: {name}:{line}: {message}")]
    Parse {
        name: String,
        line: usize,
        message: String,
    },

    #[error("template: {name}: {message}")]
    Exec { name: String, message: String },
}

/// Configures and parses a [`Template`].
pub struct TemplateBuilder {
    name: String,
    funcs: Arc<FuncMap>,
    left: String,
    right: String,
}

impl TemplateBuilder {
    /// Start a template named `name` with `{{ }}` delimiters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            funcs: Arc::new(FuncMap::new()),
            left: "{{".to_string(),
            right: "}}".to_string(),
        }
    }

    /// Functions available to the template in addition to the builtins.
    pub fn funcs(mut self, funcs: Arc<FuncMap>) -> Self {
        self.funcs = funcs;
        self
    }

    /// Action delimiters.
    pub fn delims(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.left = left.into();
        self.right = right.into();
        self
    }

    /// Parse `src`. Unknown functions are reported here.
    pub fn parse(self, src: &str) -> Result<Template, TemplateError> {
        let parse_error = |(line, message): (usize, String)| TemplateError::Parse {
            name: self.name.clone(),
            line,
            message,
        };

        let tokens = Lexer::new(src, &self.left, &self.right)
            .tokenize()
            .map_err(parse_error)?;
        let funcs = &self.funcs;
        let is_func = |name: &str| funcs.contains(name) || BUILTINS.contains(name);
        let nodes = Parser::new(tokens, &is_func).parse().map_err(parse_error)?;

        Ok(Template {
            name: self.name,
            nodes,
            funcs: self.funcs,
        })
    }
}

/// A parsed template. Immutable and safe to share across threads.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
    funcs: Arc<FuncMap>,
}

impl Template {
    /// The template name used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the template against `data`.
    pub fn execute(&self, data: &Value) -> Result<String, TemplateError> {
        Exec::new(data, &self.funcs)
            .run(&self.nodes)
            .map_err(|message| TemplateError::Exec {
                name: self.name.clone(),
                message,
            })
    }
}
