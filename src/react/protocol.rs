//! 决策/行动之间的文本协议
//!
//! 只接受两种行：
//! - `TOOL_CALL: name|k1=v1|k2=v2`
//! - `FINAL_ANSWER: <text>`
//!
//! 参数值按小型字面量文法解析（数字、字符串、列表、映射、True/False/None），失败则保留为去空白的字符串；
//! 点号键（`a.b=1`）展开为嵌套映射。`|` 只在括号外、引号外才分隔参数。模型输出永远不会被当作代码执行。

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::core::AgentError;

pub const TOOL_CALL_PREFIX: &str = "TOOL_CALL:";
pub const FINAL_ANSWER_PREFIX: &str = "FINAL_ANSWER:";

/// 解析后的工具调用
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
    /// 每个参数的原始文本（按完整键，含点号），供需要保留原样的归一化使用
    pub raw_arguments: HashMap<String, String>,
}

pub fn is_tool_call(line: &str) -> bool {
    line.trim_start().starts_with(TOOL_CALL_PREFIX)
}

pub fn is_final_answer(line: &str) -> bool {
    line.trim_start().starts_with(FINAL_ANSWER_PREFIX)
}

/// 去掉 FINAL_ANSWER: 前缀；没有前缀时原样返回（去首尾空白）
pub fn format_final_answer(line: &str) -> String {
    let trimmed = line.trim();
    trimmed
        .strip_prefix(FINAL_ANSWER_PREFIX)
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// 解析 `TOOL_CALL: name|k=v|...`
pub fn parse_tool_call(line: &str) -> Result<ToolCall, AgentError> {
    let body = line
        .trim()
        .strip_prefix(TOOL_CALL_PREFIX)
        .ok_or_else(|| AgentError::ToolCallParse(format!("missing {TOOL_CALL_PREFIX} prefix")))?
        .trim();

    let mut parts = split_top_level(body, '|').into_iter();
    let name = parts.next().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return Err(AgentError::ToolCallParse("empty tool name".into()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(AgentError::ToolCallParse(format!("invalid tool name '{name}'")));
    }

    let mut arguments = Map::new();
    let mut raw_arguments = HashMap::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, raw) = part
            .split_once('=')
            .ok_or_else(|| AgentError::ToolCallParse(format!("expected key=value, got '{part}'")))?;
        let value = parse_literal(raw).unwrap_or_else(|| Value::String(raw.trim().to_string()));
        insert_dotted(&mut arguments, key.trim(), value)?;
        raw_arguments.insert(key.trim().to_string(), raw.trim().to_string());
    }

    Ok(ToolCall {
        name: name.to_string(),
        arguments,
        raw_arguments,
    })
}

/// `a.b.c=v` → {"a": {"b": {"c": v}}}；与已有映射合并，非映射的旧值被覆盖
fn insert_dotted(map: &mut Map<String, Value>, key: &str, value: Value) -> Result<(), AgentError> {
    let segments: Vec<&str> = key.split('.').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(AgentError::ToolCallParse(format!("invalid argument key '{key}'")));
    }
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Err(AgentError::ToolCallParse("empty argument key".into())),
    };
    let mut current = map;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(inner) => inner,
            _ => return Err(AgentError::ToolCallParse(format!("invalid argument key '{key}'"))),
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// 按分隔符切分，忽略括号内与引号内的分隔符
///
/// 引号只在片段开头或 `= [ { ( , :` 及空白之后才视为开引号，单词内的撇号（it's）不影响切分。
pub fn split_top_level(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            prev = Some(c);
            continue;
        }
        match c {
            '"' | '\'' if opens_quote(prev) => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth = depth.saturating_sub(1),
            _ if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
                prev = None;
                continue;
            }
            _ => {}
        }
        prev = Some(c);
    }
    parts.push(&input[start..]);
    parts
}

fn opens_quote(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(p) => p.is_whitespace() || matches!(p, '=' | '[' | '{' | '(' | ',' | ':'),
    }
}

/// 把整段文本解析为一个字面量；必须完整消费输入，否则返回 None
pub fn parse_literal(text: &str) -> Option<Value> {
    LiteralParser::new(text).parse_all()
}

/// 同 parse_literal，但数字保留为原始写法的字符串（`2101.00010` 不会变成 2101.0001）
pub fn parse_literal_lexemes(text: &str) -> Option<Value> {
    let mut parser = LiteralParser::new(text);
    parser.numbers_as_text = true;
    parser.parse_all()
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    numbers_as_text: bool,
}

impl LiteralParser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            numbers_as_text: false,
        }
    }

    fn parse_all(mut self) -> Option<Value> {
        self.skip_ws();
        let value = self.value()?;
        self.skip_ws();
        if self.at_end() {
            Some(value)
        } else {
            None
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            '[' => self.sequence('[', ']'),
            '(' => self.sequence('(', ')'),
            '{' => self.mapping(),
            '"' | '\'' => self.string().map(Value::String),
            c if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            c if c.is_ascii_alphabetic() => self.keyword(),
            _ => None,
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Option<Value> {
        if !self.eat(open) {
            return None;
        }
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Some(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.skip_ws();
            return if self.eat(close) {
                Some(Value::Array(items))
            } else {
                None
            };
        }
    }

    fn mapping(&mut self) -> Option<Value> {
        if !self.eat('{') {
            return None;
        }
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Some(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            self.skip_ws();
            if !self.eat(':') {
                return None;
            }
            self.skip_ws();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.skip_ws();
            return if self.eat('}') {
                Some(Value::Object(map))
            } else {
                None
            };
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    c @ ('\\' | '"' | '\'') => out.push(c),
                    c => {
                        out.push('\\');
                        out.push(c);
                    }
                },
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.pos += 1;
        }
        let mut seen_digit = false;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => seen_digit = true,
                '.' if !is_float => is_float = true,
                'e' | 'E' if seen_digit => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-' | '+')) {
                        self.pos += 1;
                    }
                    continue;
                }
                _ => break,
            }
            self.pos += 1;
        }
        if !seen_digit {
            return None;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let text = text.trim_start_matches('+');
        if self.numbers_as_text {
            return Some(Value::String(text.to_string()));
        }
        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Some(Value::Number(n.into()));
            }
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    }

    fn keyword(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Some(Value::Bool(true)),
            "False" | "false" => Some(Value::Bool(false)),
            "None" | "null" => Some(Value::Null),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_numbers_and_lists() {
        let call = parse_tool_call("TOOL_CALL: foo|x=1|y=[1,2,3]").unwrap();
        assert_eq!(call.name, "foo");
        assert_eq!(Value::Object(call.arguments), json!({"x": 1, "y": [1, 2, 3]}));
    }

    #[test]
    fn test_dotted_keys_nest() {
        let call = parse_tool_call("TOOL_CALL: foo|a.b=5|a.c='x'").unwrap();
        assert_eq!(Value::Object(call.arguments), json!({"a": {"b": 5, "c": "x"}}));
    }

    #[test]
    fn test_bare_words_fall_back_to_trimmed_string() {
        let call = parse_tool_call("TOOL_CALL: paper_retrieval_tool| keywords = quantum computing ").unwrap();
        assert_eq!(call.arguments["keywords"], json!("quantum computing"));
    }

    #[test]
    fn test_pipe_inside_brackets_or_quotes_does_not_split() {
        let call =
            parse_tool_call(r#"TOOL_CALL: t|q="a|b"|ids=["x|y", "z"]|text=it's fine"#).unwrap();
        assert_eq!(call.arguments["q"], json!("a|b"));
        assert_eq!(call.arguments["ids"], json!(["x|y", "z"]));
        assert_eq!(call.arguments["text"], json!("it's fine"));
    }

    #[test]
    fn test_python_style_literals() {
        assert_eq!(
            parse_literal("{'k': True, 'n': None, 'v': (1, -2.5)}"),
            Some(json!({"k": true, "n": null, "v": [1, -2.5]}))
        );
        assert_eq!(parse_literal("2023-01-01"), None);
        assert_eq!(parse_literal("[1, 2"), None);
    }

    #[test]
    fn test_raw_argument_text_is_kept() {
        let call = parse_tool_call("TOOL_CALL: t|paper_ids=2101.00010|a.b= [1.50, 'x'] ").unwrap();
        assert_eq!(call.raw_arguments["paper_ids"], "2101.00010");
        assert_eq!(call.raw_arguments["a.b"], "[1.50, 'x']");
        assert_eq!(
            parse_literal_lexemes("[2101.00010, +7, 'x']"),
            Some(json!(["2101.00010", "7", "x"]))
        );
    }

    #[test]
    fn test_rejects_malformed_calls() {
        assert!(parse_tool_call("FINAL_ANSWER: hi").is_err());
        assert!(parse_tool_call("TOOL_CALL: ").is_err());
        assert!(parse_tool_call("TOOL_CALL: foo|novalue").is_err());
        assert!(parse_tool_call("TOOL_CALL: foo|a..b=1").is_err());
    }

    #[test]
    fn test_format_final_answer() {
        assert_eq!(format_final_answer("FINAL_ANSWER:  done "), "done");
        assert_eq!(format_final_answer("plain text"), "plain text");
    }
}
