//! STEP physical file entity scanner.
//!
//! Splits the DATA section into `#id = TYPE(args);` statements and keeps
//! every argument as raw text. Values are only interpreted when a consumer
//! asks for them through the typed accessors on [`IfcEntity`].

use std::collections::HashMap;

/// One parsed entity declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct IfcEntity {
    pub id: u32,
    /// Upper-cased type tag, e.g. `IFCWALL`.
    pub type_name: String,
    /// Top-level arguments, trimmed but otherwise untouched.
    pub args: Vec<String>,
}

impl IfcEntity {
    /// Raw argument text; `None` for missing, `$` (null) and `*` (derived).
    pub fn arg(&self, index: usize) -> Option<&str> {
        match self.args.get(index).map(String::as_str) {
            None | Some("$") | Some("*") => None,
            Some(raw) => Some(raw),
        }
    }

    /// Quoted string argument with escapes decoded.
    pub fn string_arg(&self, index: usize) -> Option<String> {
        self.arg(index).and_then(unquote)
    }

    /// Entity reference argument: `#123`.
    pub fn ref_arg(&self, index: usize) -> Option<u32> {
        self.arg(index).and_then(parse_ref)
    }

    /// List of entity references: `(#1,#2,#3)`. Non-reference items are skipped.
    pub fn ref_list_arg(&self, index: usize) -> Vec<u32> {
        self.arg(index)
            .map(|raw| parse_list(raw).iter().filter_map(|item| parse_ref(item)).collect())
            .unwrap_or_default()
    }
}

/// All entities of one file, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    entities: HashMap<u32, IfcEntity>,
    order: Vec<u32>,
}

impl EntityTable {
    /// Scan a whole file. Statements that do not look like entity
    /// declarations are skipped; this never fails.
    pub fn parse(content: &str) -> Self {
        let mut table = Self::default();
        let mut skipped = 0usize;

        for statement in StatementScanner::new(content) {
            if !statement.starts_with('#') {
                continue;
            }
            match parse_statement(statement) {
                Some(entity) => {
                    let id = entity.id;
                    if table.entities.insert(id, entity).is_none() {
                        table.order.push(id);
                    }
                }
                None => skipped += 1,
            }
        }

        tracing::debug!(
            entities = table.order.len(),
            skipped,
            "Scanned exchange file"
        );
        table
    }

    pub fn get(&self, id: u32) -> Option<&IfcEntity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entities in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &IfcEntity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Entities with the given type tag (case-insensitive), in declaration order.
    pub fn entities_of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a IfcEntity> {
        self.iter()
            .filter(move |entity| entity.type_name.eq_ignore_ascii_case(type_name))
    }
}

/// Yields `;`-terminated statements, ignoring semicolons inside quoted
/// strings and skipping `/* */` comments.
struct StatementScanner<'a> {
    content: &'a str,
    position: usize,
}

impl<'a> StatementScanner<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            content,
            position: 0,
        }
    }
}

impl<'a> Iterator for StatementScanner<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let bytes = self.content.as_bytes();
        loop {
            // Skip whitespace and comments before the statement
            while self.position < bytes.len() {
                if bytes[self.position].is_ascii_whitespace() {
                    self.position += 1;
                } else if bytes[self.position..].starts_with(b"/*") {
                    self.position = match self.content[self.position + 2..].find("*/") {
                        Some(end) => self.position + 2 + end + 2,
                        None => bytes.len(),
                    };
                } else {
                    break;
                }
            }
            if self.position >= bytes.len() {
                return None;
            }

            let start = self.position;
            let mut in_quote = false;
            let mut i = start;
            while i < bytes.len() {
                match bytes[i] {
                    b'\'' => in_quote = !in_quote,
                    b';' if !in_quote => break,
                    _ => {}
                }
                i += 1;
            }

            let statement = self.content[start..i].trim();
            self.position = i + 1;
            if !statement.is_empty() {
                return Some(statement);
            }
            if i >= bytes.len() {
                return None;
            }
        }
    }
}

/// Parse `#id = TYPE(args)` (without the trailing semicolon).
fn parse_statement(statement: &str) -> Option<IfcEntity> {
    let rest = statement.strip_prefix('#')?;
    let id_end = rest.find(|c: char| !c.is_ascii_digit())?;
    let id = rest[..id_end].parse::<u32>().ok()?;

    let rest = rest[id_end..].trim_start().strip_prefix('=')?.trim_start();
    let type_end = rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))?;
    if type_end == 0 {
        return None;
    }
    let type_name = rest[..type_end].to_ascii_uppercase();

    let body = rest[type_end..].trim();
    let inner = body.strip_prefix('(')?.strip_suffix(')')?;

    Some(IfcEntity {
        id,
        type_name,
        args: split_args(inner),
    })
}

/// Split an argument list at top-level commas. Commas inside quoted
/// strings or nested parentheses do not split.
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    if input.trim().is_empty() {
        return args;
    }

    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            ',' if !in_quote && depth == 0 => {
                args.push(input[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(input[start..].trim().to_string());
    args
}

/// Parse entity reference: #123
pub fn parse_ref(raw: &str) -> Option<u32> {
    raw.trim().strip_prefix('#')?.parse().ok()
}

/// Items of a parenthesized list: `(a,b,c)`.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .map(split_args)
        .unwrap_or_default()
}

/// Unquote a string literal. `''` is one literal quote.
pub fn unquote(raw: &str) -> Option<String> {
    let inner = raw.trim().strip_prefix('\'')?.strip_suffix('\'')?;
    Some(decode_string(&inner.replace("''", "'")))
}

/// Decode STEP control directives in string content:
/// `\X2\hhhh…\X0\` (UTF-16), `\X\hh` (ISO 8859-1), `\S\c` (high half) and `\\`.
pub fn decode_string(input: &str) -> String {
    if !input.contains('\\') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if let Some(tail) = rest.strip_prefix("\\X2\\") {
            if let Some(end) = tail.find("\\X0\\") {
                let hex = &tail[..end];
                let units: Vec<u16> = hex
                    .as_bytes()
                    .chunks(4)
                    .filter_map(|chunk| {
                        std::str::from_utf8(chunk)
                            .ok()
                            .and_then(|s| u16::from_str_radix(s, 16).ok())
                    })
                    .collect();
                out.extend(char::decode_utf16(units).map(|r| r.unwrap_or('\u{FFFD}')));
                rest = &tail[end + 4..];
                continue;
            }
        } else if let Some(tail) = rest.strip_prefix("\\X\\") {
            if let Some(code) = tail.get(..2).and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(code as char);
                rest = &tail[2..];
                continue;
            }
        } else if let Some(tail) = rest.strip_prefix("\\S\\") {
            if let Some(c) = tail.chars().next().filter(char::is_ascii) {
                out.push(((c as u8) + 128) as char);
                rest = &tail[c.len_utf8()..];
                continue;
            }
        } else if let Some(tail) = rest.strip_prefix("\\\\") {
            out.push('\\');
            rest = tail;
            continue;
        }

        // Unknown directive: keep the backslash literally
        out.push('\\');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}
