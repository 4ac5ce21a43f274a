//! Module bodies for the in-memory heap.
//!
//! One statement per line; blank lines and `#` comments are skipped:
//!
//! ```text
//! greeting = "hello"
//! answer = 42
//! alias = greeting
//! nothing = None
//! import pkg.util as util
//! raise something went wrong
//! ```

use serde::{Deserialize, Serialize};

use crate::{error::ForeignError, foreign::CompileMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    None,
    Str(String),
    Int(i64),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    Assign { target: String, value: Expr },
    Import { module: String, alias: Option<String> },
    Raise { message: String },
}

impl Statement {
    /// The global name an import statement binds.
    pub fn import_binding(module: &str, alias: Option<&str>) -> String {
        alias.unwrap_or(module).to_string()
    }
}

pub fn compile(source: &str, filename: &str, mode: CompileMode) -> Result<Vec<Statement>, ForeignError> {
    let mut body = Vec::new();

    for (i, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let statement = parse_statement(line)
            .ok_or_else(|| syntax_error("invalid syntax", filename, i + 1))?;
        body.push(statement);
    }

    if mode == CompileMode::Single && body.len() > 1 {
        return Err(syntax_error(
            "multiple statements found while compiling a single statement",
            filename,
            1,
        ));
    }

    Ok(body)
}

fn syntax_error(message: &str, filename: &str, line: usize) -> ForeignError {
    ForeignError::new("SyntaxError", format!("{message} ({filename}, line {line})"))
}

fn parse_statement(line: &str) -> Option<Statement> {
    if let Some(rest) = line.strip_prefix("import ") {
        return parse_import(rest.trim());
    }
    if let Some(rest) = line.strip_prefix("raise ") {
        let message = rest.trim();
        return (!message.is_empty()).then(|| Statement::Raise {
            message: message.to_string(),
        });
    }

    let (target, value) = line.split_once('=')?;
    let target = target.trim();
    if !is_identifier(target) {
        return None;
    }
    Some(Statement::Assign {
        target: target.to_string(),
        value: parse_expr(value.trim())?,
    })
}

fn parse_import(rest: &str) -> Option<Statement> {
    let (module, alias) = match rest.split_once(" as ") {
        Some((module, alias)) => (module.trim(), Some(alias.trim())),
        None => (rest, None),
    };
    if !module.split('.').all(is_identifier) {
        return None;
    }
    if let Some(alias) = alias {
        if !is_identifier(alias) {
            return None;
        }
    }
    Some(Statement::Import {
        module: module.to_string(),
        alias: alias.map(str::to_string),
    })
}

fn parse_expr(text: &str) -> Option<Expr> {
    if let Some(inner) = text.strip_prefix('"') {
        return parse_string_body(inner).map(Expr::Str);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Expr::Int(n));
    }
    if text == "None" {
        return Some(Expr::None);
    }
    is_identifier(text).then(|| Expr::Name(text.to_string()))
}

/// Parses the remainder of a double-quoted literal, which must end the line.
fn parse_string_body(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => return chars.as_str().trim().is_empty().then_some(out),
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                _ => return None,
            },
            c => out.push(c),
        }
    }

    None
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
