//! Tokenizer for ChocoPy's Python-style, indentation-sensitive syntax.
//! Grounded on the grammar `chocopy_parse.{hpp,cpp}` drives, but since that
//! parser is bison-generated (a separate flex lexer feeds it), this module
//! is a from-scratch hand-rolled scanner in the CPython tokenizer's style:
//! an explicit indent stack emitting synthetic `Indent`/`Dedent` tokens so
//! the parser itself never has to reason about whitespace.

use crate::diagnostics::Diagnostic;
use crate::span::{Location, Position};
use crate::symbol::{intern, Symbol};

#[derive(Clone, Debug, PartialEq)]
pub enum TokKind {
  Newline,
  Indent,
  Dedent,
  Eof,
  Ident(Symbol),
  Int(i32),
  Str(String),
  Def, If, Elif, Else, While, For, In, Class, Return, Pass,
  Global, Nonlocal, And, Or, Not, Is, True, False, None,
  Plus, Minus, Star, SlashSlash, Percent,
  EqEq, NotEq, Lt, Le, Gt, Ge, Eq,
  Arrow, Colon, Comma, Dot,
  LBracket, RBracket, LParen, RParen,
}

#[derive(Clone, Debug)]
pub struct Token {
  pub kind: TokKind,
  pub span: Location,
}

fn keyword(s: &str) -> Option<TokKind> {
  Some(match s {
    "def" => TokKind::Def,
    "if" => TokKind::If,
    "elif" => TokKind::Elif,
    "else" => TokKind::Else,
    "while" => TokKind::While,
    "for" => TokKind::For,
    "in" => TokKind::In,
    "class" => TokKind::Class,
    "return" => TokKind::Return,
    "pass" => TokKind::Pass,
    "global" => TokKind::Global,
    "nonlocal" => TokKind::Nonlocal,
    "and" => TokKind::And,
    "or" => TokKind::Or,
    "not" => TokKind::Not,
    "is" => TokKind::Is,
    "True" => TokKind::True,
    "False" => TokKind::False,
    "None" => TokKind::None,
    _ => return Option::None,
  })
}

struct Lexer<'a> {
  src: &'a [u8],
  pos: usize,
  line: u32,
  col: u32,
  indents: Vec<u32>,
  paren_depth: i32,
  toks: Vec<Token>,
}

impl<'a> Lexer<'a> {
  fn here(&self) -> Position { Position::new(self.line, self.col) }

  fn peek(&self) -> Option<u8> { self.src.get(self.pos).copied() }
  fn peek2(&self) -> Option<u8> { self.src.get(self.pos + 1).copied() }

  fn bump(&mut self) -> Option<u8> {
    let b = self.peek()?;
    self.pos += 1;
    if b == b'\n' { self.line += 1; self.col = 1; } else { self.col += 1; }
    Some(b)
  }

  fn err(&self, at: Position, msg: impl Into<String>) -> Diagnostic {
    Diagnostic::syntax(Location::new(at, at), msg)
  }

  fn push(&mut self, kind: TokKind, start: Position) {
    self.toks.push(Token { kind, span: Location::new(start, self.here()) });
  }

  fn handle_indentation(&mut self) -> Result<bool, Diagnostic> {
    // Returns Ok(true) if this line had real content to tokenize.
    let mut indent = 0u32;
    loop {
      match self.peek() {
        Some(b' ') => { indent += 1; self.bump(); }
        Some(b'\t') => { indent += 8 - (indent % 8); self.bump(); }
        _ => break,
      }
    }
    match self.peek() {
      None => return Ok(false),
      Some(b'\n') | Some(b'\r') => { return Ok(false); }
      Some(b'#') => { while matches!(self.peek(), Some(b) if b != b'\n') { self.bump(); } return Ok(false); }
      _ => {}
    }
    let top = *self.indents.last().unwrap();
    let start = self.here();
    if indent > top {
      self.indents.push(indent);
      self.push(TokKind::Indent, start);
    } else if indent < top {
      while *self.indents.last().unwrap() > indent {
        self.indents.pop();
        self.push(TokKind::Dedent, start);
      }
      if *self.indents.last().unwrap() != indent {
        return Err(self.err(start, "unindent does not match any outer indentation level"));
      }
    }
    Ok(true)
  }

  fn lex_number(&mut self) -> Result<(), Diagnostic> {
    let start = self.here();
    let from = self.pos;
    while matches!(self.peek(), Some(b'0'..=b'9')) { self.bump(); }
    let s = std::str::from_utf8(&self.src[from..self.pos]).unwrap();
    let n: i32 = s.parse().map_err(|_| self.err(start, format!("integer literal out of range: {s}")))?;
    self.push(TokKind::Int(n), start);
    Ok(())
  }

  fn lex_string(&mut self) -> Result<(), Diagnostic> {
    let start = self.here();
    self.bump(); // opening quote
    let mut out = String::new();
    loop {
      match self.bump() {
        None | Some(b'\n') => return Err(self.err(start, "unterminated string literal")),
        Some(b'"') => break,
        Some(b'\\') => match self.bump() {
          Some(b'n') => out.push('\n'),
          Some(b't') => out.push('\t'),
          Some(b'\\') => out.push('\\'),
          Some(b'"') => out.push('"'),
          Some(c) => return Err(self.err(start, format!("unknown escape sequence '\\{}'", c as char))),
          None => return Err(self.err(start, "unterminated string literal")),
        },
        Some(b) => out.push(b as char),
      }
    }
    self.push(TokKind::Str(out), start);
    Ok(())
  }

  fn lex_ident(&mut self) -> Result<(), Diagnostic> {
    let start = self.here();
    let from = self.pos;
    while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_') { self.bump(); }
    let s = std::str::from_utf8(&self.src[from..self.pos]).unwrap();
    let kind = keyword(s).unwrap_or_else(|| TokKind::Ident(intern(s)));
    self.push(kind, start);
    Ok(())
  }

  fn lex_operator(&mut self) -> Result<(), Diagnostic> {
    let start = self.here();
    let b = self.bump().expect("caller checked peek");
    macro_rules! two {
      ($next:expr, $then:expr, $else_:expr) => {
        if self.peek() == Some($next) { self.bump(); $then } else { $else_ }
      };
    }
    let kind = match b {
      b'+' => TokKind::Plus,
      b'-' => two!(b'>', TokKind::Arrow, TokKind::Minus),
      b'*' => TokKind::Star,
      b'/' => {
        if self.peek() == Some(b'/') { self.bump(); TokKind::SlashSlash }
        else { return Err(self.err(start, "unexpected character '/'")); }
      }
      b'%' => TokKind::Percent,
      b'=' => two!(b'=', TokKind::EqEq, TokKind::Eq),
      b'!' => {
        if self.peek() == Some(b'=') { self.bump(); TokKind::NotEq }
        else { return Err(self.err(start, "unexpected character '!'")); }
      }
      b'<' => two!(b'=', TokKind::Le, TokKind::Lt),
      b'>' => two!(b'=', TokKind::Ge, TokKind::Gt),
      b':' => TokKind::Colon,
      b',' => TokKind::Comma,
      b'.' => TokKind::Dot,
      b'[' => { self.paren_depth += 1; TokKind::LBracket }
      b']' => { self.paren_depth -= 1; TokKind::RBracket }
      b'(' => { self.paren_depth += 1; TokKind::LParen }
      b')' => { self.paren_depth -= 1; TokKind::RParen }
      c => return Err(self.err(start, format!("unexpected character '{}'", c as char))),
    };
    self.push(kind, start);
    Ok(())
  }

  fn run(mut self) -> Result<Vec<Token>, Diagnostic> {
    let mut at_bol = true;
    while self.pos < self.src.len() {
      if at_bol && self.paren_depth == 0 {
        let had_content = self.handle_indentation()?;
        at_bol = false;
        if !had_content {
          // blank or comment-only line: consume the newline (if any) and retry.
          if self.peek() == Some(b'\r') { self.bump(); }
          if self.peek() == Some(b'\n') { self.bump(); }
          at_bol = true;
          continue;
        }
      }
      match self.peek() {
        None => break,
        Some(b' ' | b'\t' | b'\r') => { self.bump(); }
        Some(b'\n') => {
          self.bump();
          if self.paren_depth == 0 {
            let at = self.here();
            self.toks.push(Token { kind: TokKind::Newline, span: Location::new(at, at) });
            at_bol = true;
          }
        }
        Some(b'#') => { while matches!(self.peek(), Some(b) if b != b'\n') { self.bump(); } }
        Some(b'0'..=b'9') => self.lex_number()?,
        Some(b'"') => self.lex_string()?,
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => self.lex_ident()?,
        Some(_) => self.lex_operator()?,
      }
    }
    while self.indents.len() > 1 {
      self.indents.pop();
      let at = self.here();
      self.toks.push(Token { kind: TokKind::Dedent, span: Location::new(at, at) });
    }
    let at = self.here();
    self.toks.push(Token { kind: TokKind::Eof, span: Location::new(at, at) });
    Ok(self.toks)
  }
}

/// Tokenizes `src`, stopping at the first lexical error (matching §7's
/// "syntax errors short-circuit" rule).
pub fn lex(src: &str) -> Result<Vec<Token>, Diagnostic> {
  let lexer = Lexer {
    src: src.as_bytes(),
    pos: 0,
    line: 1,
    col: 1,
    indents: vec![0],
    paren_depth: 0,
    toks: Vec::new(),
  };
  lexer.run()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(src: &str) -> Vec<TokKind> {
    lex(src).unwrap().into_iter().map(|t| t.kind).collect()
  }

  #[test]
  fn simple_assignment() {
    let ks = kinds("x:int = 1\n");
    assert_eq!(ks, vec![
      TokKind::Ident(intern("x")), TokKind::Colon, TokKind::Ident(intern("int")),
      TokKind::Eq, TokKind::Int(1), TokKind::Newline, TokKind::Eof,
    ]);
  }

  #[test]
  fn indentation_produces_indent_and_dedent() {
    let ks = kinds("if True:\n  pass\nx:int = 0\n");
    assert_eq!(ks, vec![
      TokKind::If, TokKind::True, TokKind::Colon, TokKind::Newline,
      TokKind::Indent, TokKind::Pass, TokKind::Newline,
      TokKind::Dedent, TokKind::Ident(intern("x")), TokKind::Colon, TokKind::Ident(intern("int")),
      TokKind::Eq, TokKind::Int(0), TokKind::Newline, TokKind::Eof,
    ]);
  }

  #[test]
  fn brackets_suppress_newlines() {
    let ks = kinds("x:[int] = [1,\n2]\n");
    assert!(!ks.contains(&TokKind::Indent));
  }
}
