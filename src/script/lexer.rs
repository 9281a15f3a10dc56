// 该文件是 Shanan （山南西风） 项目的一部分。
// src/script/lexer.rs - 例程语言词法分析（含缩进记号）
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use super::error::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
  Name(String),
  Int(i64),
  Float(f64),
  Str(String),
  /// f-string 的原始内容，花括号内的表达式由语法分析器处理
  FStr(String),
  Op(&'static str),
  Newline,
  Indent,
  Dedent,
  Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
  pub token: Token,
  pub line: usize,
}

// 最长匹配优先
const OPERATORS: &[&str] = &[
  "**=", "//=", "...", "->", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "(",
  ")", "[", "]", "{", "}", ",", ":", ".", ";", "+", "-", "*", "/", "%", "<", ">", "=", "@", "|",
  "&", "^", "~",
];

const STRING_PREFIXES: &[&str] = &["f", "r", "b", "u", "rf", "fr", "br", "rb"];

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ScriptError> {
  Lexer::new(source, 1).run()
}

/// 从给定行号开始分析（用于 f-string 内嵌表达式）
pub fn tokenize_at(source: &str, line: usize) -> Result<Vec<Spanned>, ScriptError> {
  Lexer::new(source, line).run()
}

struct Lexer {
  chars: Vec<char>,
  pos: usize,
  line: usize,
  depth: usize,
  indents: Vec<usize>,
  tokens: Vec<Spanned>,
  at_line_start: bool,
}

fn is_ident_start(c: char) -> bool {
  c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
  c == '_' || c.is_alphanumeric()
}

impl Lexer {
  fn new(source: &str, line: usize) -> Self {
    Lexer {
      chars: source.replace("\r\n", "\n").chars().collect(),
      pos: 0,
      line,
      depth: 0,
      indents: vec![0],
      tokens: Vec::new(),
      at_line_start: true,
    }
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn peek_at(&self, offset: usize) -> Option<char> {
    self.chars.get(self.pos + offset).copied()
  }

  fn push(&mut self, token: Token) {
    self.tokens.push(Spanned {
      token,
      line: self.line,
    });
  }

  fn push_newline(&mut self) {
    match self.tokens.last() {
      None => {}
      Some(last) if last.token == Token::Newline => {}
      Some(_) => self.push(Token::Newline),
    }
  }

  fn run(mut self) -> Result<Vec<Spanned>, ScriptError> {
    loop {
      if self.at_line_start && self.depth == 0 {
        self.indentation()?;
      }
      let Some(c) = self.peek() else { break };

      match c {
        '\n' => {
          self.pos += 1;
          if self.depth == 0 {
            self.push_newline();
            self.at_line_start = true;
          }
          self.line += 1;
        }
        ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
        '#' => self.skip_comment(),
        '\\' if self.peek_at(1) == Some('\n') => {
          self.pos += 2;
          self.line += 1;
        }
        '"' | '\'' => {
          let token = self.string("")?;
          self.push(token);
        }
        c if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) => {
          let token = self.number()?;
          self.push(token);
        }
        c if is_ident_start(c) => {
          let name = self.identifier();
          let quoted = matches!(self.peek(), Some('"') | Some('\''));
          if quoted && STRING_PREFIXES.contains(&name.to_ascii_lowercase().as_str()) {
            let token = self.string(&name.to_ascii_lowercase())?;
            self.push(token);
          } else {
            self.push(Token::Name(name));
          }
        }
        _ => {
          let op = self.operator()?;
          match op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
            _ => {}
          }
          self.push(Token::Op(op));
        }
      }
    }

    self.push_newline();
    while self.indents.len() > 1 {
      self.indents.pop();
      self.push(Token::Dedent);
    }
    self.push(Token::Eof);
    Ok(self.tokens)
  }

  fn skip_comment(&mut self) {
    while let Some(c) = self.peek() {
      if c == '\n' {
        break;
      }
      self.pos += 1;
    }
  }

  /// 处理行首缩进，跳过空行和注释行
  fn indentation(&mut self) -> Result<(), ScriptError> {
    loop {
      let mut width = 0;
      while let Some(c) = self.peek() {
        match c {
          ' ' => width += 1,
          '\t' => width = (width / 8 + 1) * 8,
          '\x0c' => width = 0,
          _ => break,
        }
        self.pos += 1;
      }

      match self.peek() {
        None => return Ok(()),
        Some('\n') => {
          self.pos += 1;
          self.line += 1;
          continue;
        }
        Some('#') => {
          self.skip_comment();
          continue;
        }
        _ => {}
      }

      self.at_line_start = false;
      let current = self.indents.last().copied().unwrap_or(0);
      if width > current {
        self.indents.push(width);
        self.push(Token::Indent);
      } else {
        while width < self.indents.last().copied().unwrap_or(0) {
          self.indents.pop();
          self.push(Token::Dedent);
        }
        if width != self.indents.last().copied().unwrap_or(0) {
          return Err(ScriptError::syntax(
            "unindent does not match any outer indentation level",
            self.line,
          ));
        }
      }
      return Ok(());
    }
  }

  fn identifier(&mut self) -> String {
    let start = self.pos;
    while self.peek().is_some_and(is_ident_continue) {
      self.pos += 1;
    }
    self.chars[start..self.pos].iter().collect()
  }

  fn number(&mut self) -> Result<Token, ScriptError> {
    let start = self.pos;

    if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
      self.pos += 2;
      let digits_start = self.pos;
      while self.peek().is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
        self.pos += 1;
      }
      let digits: String = self.chars[digits_start..self.pos]
        .iter()
        .filter(|c| **c != '_')
        .collect();
      return i64::from_str_radix(&digits, 16)
        .map(Token::Int)
        .map_err(|_| ScriptError::syntax("invalid hexadecimal literal", self.line));
    }

    let mut is_float = false;
    while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
      self.pos += 1;
    }
    if self.peek() == Some('.') && !self.peek_at(1).is_some_and(is_ident_start) {
      is_float = true;
      self.pos += 1;
      while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
        self.pos += 1;
      }
    }
    if matches!(self.peek(), Some('e') | Some('E')) {
      let signed = matches!(self.peek_at(1), Some('+') | Some('-'));
      let digit_at = if signed { 2 } else { 1 };
      if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
        is_float = true;
        self.pos += digit_at;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
          self.pos += 1;
        }
      }
    }

    let text: String = self.chars[start..self.pos]
      .iter()
      .filter(|c| **c != '_')
      .collect();
    if is_float {
      text
        .parse::<f64>()
        .map(Token::Float)
        .map_err(|_| ScriptError::syntax(format!("invalid number '{}'", text), self.line))
    } else {
      text
        .parse::<i64>()
        .map(Token::Int)
        .map_err(|_| ScriptError::syntax(format!("integer literal too large: {}", text), self.line))
    }
  }

  fn string(&mut self, prefix: &str) -> Result<Token, ScriptError> {
    let raw = prefix.contains('r');
    let formatted = prefix.contains('f');
    let start_line = self.line;

    let Some(quote) = self.peek() else {
      return Err(ScriptError::syntax("unterminated string literal", start_line));
    };
    let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
    self.pos += if triple { 3 } else { 1 };

    let mut out = String::new();
    loop {
      let Some(c) = self.peek() else {
        return Err(ScriptError::syntax("unterminated string literal", start_line));
      };

      if c == quote {
        if !triple {
          self.pos += 1;
          break;
        }
        if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
          self.pos += 3;
          break;
        }
      }

      if c == '\n' {
        if !triple {
          return Err(ScriptError::syntax("unterminated string literal", start_line));
        }
        self.line += 1;
      }

      if c == '\\' {
        let Some(next) = self.peek_at(1) else {
          return Err(ScriptError::syntax("unterminated string literal", start_line));
        };
        self.pos += 2;
        if raw {
          out.push('\\');
          out.push(next);
          continue;
        }
        match next {
          'n' => out.push('\n'),
          't' => out.push('\t'),
          'r' => out.push('\r'),
          '0' => out.push('\0'),
          '\\' => out.push('\\'),
          '\'' => out.push('\''),
          '"' => out.push('"'),
          '\n' => self.line += 1,
          other => {
            out.push('\\');
            out.push(other);
          }
        }
        continue;
      }

      out.push(c);
      self.pos += 1;
    }

    Ok(if formatted {
      Token::FStr(out)
    } else {
      Token::Str(out)
    })
  }

  fn operator(&mut self) -> Result<&'static str, ScriptError> {
    for op in OPERATORS {
      let matched = op
        .chars()
        .enumerate()
        .all(|(i, c)| self.peek_at(i) == Some(c));
      if matched {
        self.pos += op.chars().count();
        return Ok(op);
      }
    }
    let c = self.peek().unwrap_or(' ');
    Err(ScriptError::syntax(
      format!("invalid character '{}'", c),
      self.line,
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(source: &str) -> Vec<Token> {
    tokenize(source).unwrap().into_iter().map(|s| s.token).collect()
  }

  #[test]
  fn indentation_produces_block_tokens() {
    let tokens = kinds("def f(a):\n    if a:\n        return 1\n    return 2\n");
    let indents = tokens.iter().filter(|t| **t == Token::Indent).count();
    let dedents = tokens.iter().filter(|t| **t == Token::Dedent).count();
    assert_eq!(indents, 2);
    assert_eq!(dedents, 2);
    assert_eq!(tokens.last(), Some(&Token::Eof));
  }

  #[test]
  fn blank_and_comment_lines_are_ignored() {
    let tokens = kinds("x = 1\n\n    # comment\n\ny = 2  # trailing\n");
    assert!(!tokens.contains(&Token::Indent));
    assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 2);
  }

  #[test]
  fn brackets_join_lines() {
    let tokens = kinds("x = [1,\n     2]\n");
    assert_eq!(tokens.iter().filter(|t| **t == Token::Newline).count(), 1);
  }

  #[test]
  fn literals() {
    let tokens = kinds("a = 1_000 + 2.5e1 + .5\nb = f'n={n}' + r'\\d' + 'x\\ty'\n");
    assert!(tokens.contains(&Token::Int(1000)));
    assert!(tokens.contains(&Token::Float(25.0)));
    assert!(tokens.contains(&Token::Float(0.5)));
    assert!(tokens.contains(&Token::FStr("n={n}".into())));
    assert!(tokens.contains(&Token::Str("\\d".into())));
    assert!(tokens.contains(&Token::Str("x\ty".into())));
  }

  #[test]
  fn triple_quoted_strings_span_lines() {
    let spanned = tokenize("s = \"\"\"a\nb\"\"\"\nt = 1\n").unwrap();
    assert!(spanned.iter().any(|s| s.token == Token::Str("a\nb".into())));
    let t = spanned
      .iter()
      .find(|s| s.token == Token::Name("t".into()))
      .unwrap();
    assert_eq!(t.line, 3);
  }

  #[test]
  fn bad_dedent_is_rejected() {
    let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
    assert!(matches!(err, ScriptError::Syntax { line: 3, .. }));
  }

  #[test]
  fn unterminated_string_is_rejected() {
    assert!(tokenize("x = 'abc\n").is_err());
  }
}
