//! Built-in local tools: calculator, knowledge-base search, sandboxed
//! file writes, and email drafting.

use std::path::{Component, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};

use ens_domain::error::{Error, Result};
use ens_memory::vector::VectorIndex;

use crate::registry::{Tool, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// calculator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Arithmetic over `+ - * /` with parentheses and unary minus.
pub struct CalculatorTool;

struct ExprParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> ExprParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(Error::InputInvalid("division by zero".into()));
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(Error::InputInvalid("unbalanced parentheses".into()));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => {
                let start = self.pos;
                while self
                    .input
                    .get(self.pos)
                    .is_some_and(|b| b.is_ascii_digit() || *b == b'.')
                {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.input[start..self.pos])
                    .map_err(|_| Error::InputInvalid("bad number".into()))?;
                text.parse::<f64>()
                    .map_err(|_| Error::InputInvalid(format!("bad number: {text}")))
            }
            other => Err(Error::InputInvalid(format!(
                "unexpected character in expression: {:?}",
                other.map(char::from)
            ))),
        }
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64> {
    let mut parser = ExprParser::new(expression);
    let value = parser.expr()?;
    if parser.peek().is_some() {
        return Err(Error::InputInvalid(format!(
            "trailing input in expression: {expression}"
        )));
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[async_trait::async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculator".into(),
            description: "Evaluate an arithmetic expression (+, -, *, /, parentheses).".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": { "type": "string", "description": "Expression to evaluate, e.g. '12*7'" }
                },
                "required": ["expression"]
            }),
        }
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let expression = args
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputInvalid("missing required argument: expression".into()))?;
        Ok(format_number(evaluate(expression)?))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// kb.search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Search the shared knowledge-base index.
pub struct KbSearchTool {
    index: Arc<dyn VectorIndex>,
}

impl KbSearchTool {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait::async_trait]
impl Tool for KbSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "kb.search".into(),
            description: "Search the internal knowledge base for relevant passages.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "k": { "type": "integer", "description": "Max passages (default 5)" }
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputInvalid("missing required argument: query".into()))?;
        let k = args.get("k").and_then(Value::as_u64).unwrap_or(5) as usize;

        let hits = self.index.search(query, k)?;
        let rendered: Vec<Value> = hits
            .iter()
            .map(|h| {
                json!({
                    "doc_id": h.doc_id,
                    "chunk_id": h.chunk_id,
                    "text": h.text.chars().take(500).collect::<String>(),
                })
            })
            .collect();
        Ok(serde_json::to_string_pretty(&rendered)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// file.write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Write a file beneath a sandbox root. Absolute paths and `..`
/// components are rejected.
pub struct FileWriteTool {
    root: PathBuf,
}

impl FileWriteTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = PathBuf::from(relative);
        if rel.is_absolute() {
            return Err(Error::InputInvalid("path must be relative".into()));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(Error::InputInvalid(format!(
                        "path escapes the sandbox: {relative}"
                    )))
                }
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait::async_trait]
impl Tool for FileWriteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file.write".into(),
            description: "Write a text file inside the run workspace.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path inside the workspace" },
                    "content": { "type": "string", "description": "File contents" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputInvalid("missing required argument: path".into()))?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputInvalid("missing required argument: content".into()))?;

        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content)?;
        Ok(json!({ "ok": true, "path": path, "bytes": content.len() }).to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// email.draft
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render a professional email draft. Drafting only; nothing is sent.
pub struct EmailDraftTool;

#[async_trait::async_trait]
impl Tool for EmailDraftTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "email.draft".into(),
            description: "Draft an email. Returns the draft text; nothing is sent.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "to": { "type": "string", "description": "Recipient" },
                    "subject": { "type": "string", "description": "Subject line" },
                    "body": { "type": "string", "description": "Body text" }
                },
                "required": ["body"]
            }),
        }
    }

    async fn invoke(&self, args: &Value) -> Result<String> {
        let body = args
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputInvalid("missing required argument: body".into()))?;
        let to = args.get("to").and_then(Value::as_str).unwrap_or("(unspecified)");
        let subject = args
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("(no subject)");
        Ok(format!("To: {to}\nSubject: {subject}\n\n{body}"))
    }
}
