//! Splits template source into text and action tokens.

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Text(String),
    Open,
    Close,
    Space,
    Dot,
    Field(String),
    Variable(String),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Pipe,
    LeftParen,
    RightParen,
    Declare,
    Assign,
    Comma,
}

/// A token with the line it starts on.
#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// Lexer failure: line and message.
pub(crate) type LexError = (usize, String);

pub(crate) struct Lexer<'a> {
    src: &'a str,
    left: &'a str,
    right: &'a str,
    pos: usize,
    line: usize,
    trim_next: bool,
    tokens: Vec<Spanned>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, left: &'a str, right: &'a str) -> Self {
        Self {
            src,
            left,
            right,
            pos: 0,
            line: 1,
            trim_next: false,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, LexError> {
        let src = self.src;
        while self.pos < self.src.len() {
            let rest = &src[self.pos..];
            let Some(offset) = rest.find(self.left) else {
                self.push_text(rest);
                self.pos = self.src.len();
                break;
            };

            let mut text = &rest[..offset];
            let mut cursor = self.pos + offset + self.left.len();

            // "[[- " trims whitespace before the action
            if self.is_trim_marker(cursor) {
                text = text.trim_end();
                cursor += 2;
            }
            self.push_text(text);
            self.pos = cursor;

            if src[self.skip_space(cursor)..].starts_with("/*") {
                self.lex_comment()?;
            } else {
                self.emit(Token::Open);
                self.lex_action()?;
            }
        }
        Ok(self.tokens)
    }

    fn is_trim_marker(&self, at: usize) -> bool {
        let bytes = self.src.as_bytes();
        bytes.get(at) == Some(&b'-')
            && bytes
                .get(at + 1)
                .is_some_and(|b| b.is_ascii_whitespace())
    }

    fn skip_space(&self, mut at: usize) -> usize {
        let bytes = self.src.as_bytes();
        while at < bytes.len() && bytes[at].is_ascii_whitespace() {
            at += 1;
        }
        at
    }

    fn emit(&mut self, token: Token) {
        self.tokens.push(Spanned {
            token,
            line: self.line,
        });
    }

    fn push_text(&mut self, text: &str) {
        let text = if std::mem::take(&mut self.trim_next) {
            text.trim_start()
        } else {
            text
        };
        if !text.is_empty() {
            self.emit(Token::Text(text.to_string()));
        }
        self.line += text.matches('\n').count();
    }

    fn lex_comment(&mut self) -> Result<(), LexError> {
        let src = self.src;
        let start = self.skip_space(self.pos) + 2;
        let Some(end) = src[start..].find("*/") else {
            return Err((self.line, "unclosed comment".to_string()));
        };
        self.line += src[start..start + end].matches('\n').count();

        let after = start + end + 2;
        let close = self.skip_space(after);
        if close > after && src[close..].starts_with('-') {
            let past_dash = close + 1;
            if src[past_dash..].starts_with(self.right) {
                self.trim_next = true;
                self.pos = past_dash + self.right.len();
                return Ok(());
            }
        }
        if src[close..].starts_with(self.right) {
            self.pos = close + self.right.len();
            return Ok(());
        }
        Err((self.line, "comment ends before closing delimiter".to_string()))
    }

    fn lex_action(&mut self) -> Result<(), LexError> {
        let src = self.src;
        loop {
            let rest = &src[self.pos..];
            if rest.is_empty() {
                return Err((self.line, "unclosed action".to_string()));
            }
            if rest.starts_with(self.right) {
                self.pos += self.right.len();
                self.emit(Token::Close);
                return Ok(());
            }

            let c = rest.chars().next().unwrap_or_default();
            match c {
                c if c.is_ascii_whitespace() => {
                    let end = self.skip_space(self.pos);
                    self.line += src[self.pos..end].matches('\n').count();
                    self.pos = end;
                    // " -]]" trims whitespace after the action
                    let rest = &src[self.pos..];
                    if rest.starts_with('-') && rest[1..].starts_with(self.right) {
                        self.pos += 1 + self.right.len();
                        self.trim_next = true;
                        self.emit(Token::Close);
                        return Ok(());
                    }
                    self.emit(Token::Space);
                }
                '|' => self.single(Token::Pipe),
                '(' => self.single(Token::LeftParen),
                ')' => self.single(Token::RightParen),
                ',' => self.single(Token::Comma),
                '=' => self.single(Token::Assign),
                ':' => {
                    if !rest.starts_with(":=") {
                        return Err((self.line, "expected :=".to_string()));
                    }
                    self.pos += 2;
                    self.emit(Token::Declare);
                }
                '"' => self.lex_quoted()?,
                '`' => self.lex_raw()?,
                '.' => {
                    let name = identifier(&rest[1..]);
                    if name.is_empty() {
                        self.single(Token::Dot);
                    } else {
                        self.pos += 1 + name.len();
                        self.emit(Token::Field(name.to_string()));
                    }
                }
                '$' => {
                    let name = identifier(&rest[1..]);
                    self.pos += 1 + name.len();
                    self.emit(Token::Variable(format!("${}", name)));
                }
                '-' | '+' | '0'..='9' => self.lex_number()?,
                c if c.is_alphabetic() || c == '_' => {
                    let name = identifier(rest);
                    self.pos += name.len();
                    self.emit(Token::Ident(name.to_string()));
                }
                other => {
                    return Err((
                        self.line,
                        format!("unexpected {:?} in action", other),
                    ))
                }
            }
        }
    }

    fn single(&mut self, token: Token) {
        self.pos += 1;
        self.emit(token);
    }

    fn lex_quoted(&mut self) -> Result<(), LexError> {
        let src = self.src;
        let mut out = String::new();
        let mut chars = src[self.pos + 1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 2;
                    self.emit(Token::Str(out));
                    return Ok(());
                }
                '\\' => {
                    let escaped = match chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 't')) => '\t',
                        Some((_, 'r')) => '\r',
                        Some((_, '0')) => '\0',
                        Some((_, e @ ('"' | '\\' | '\''))) => e,
                        Some((_, 'u')) => {
                            let hex: String = chars.by_ref().take(4).map(|(_, h)| h).collect();
                            u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or_else(|| (self.line, format!("bad unicode escape \\u{}", hex)))?
                        }
                        Some((_, other)) => {
                            return Err((self.line, format!("unknown escape \\{}", other)))
                        }
                        None => break,
                    };
                    out.push(escaped);
                }
                '\n' => break,
                c => out.push(c),
            }
        }
        Err((self.line, "unterminated quoted string".to_string()))
    }

    fn lex_raw(&mut self) -> Result<(), LexError> {
        let src = self.src;
        let body = &src[self.pos + 1..];
        let Some(end) = body.find('`') else {
            return Err((self.line, "unterminated raw string".to_string()));
        };
        let text = body[..end].to_string();
        self.line += text.matches('\n').count();
        self.pos += end + 2;
        self.emit(Token::Str(text));
        Ok(())
    }

    fn lex_number(&mut self) -> Result<(), LexError> {
        let src = self.src;
        let rest = &src[self.pos..];
        let bytes = rest.as_bytes();
        let mut end = 0;
        if matches!(bytes.first(), Some(b'-' | b'+')) {
            end += 1;
        }
        let digits_start = end;
        let mut is_float = false;
        while end < bytes.len() {
            match bytes[end] {
                b'0'..=b'9' => end += 1,
                b'.' if !is_float => {
                    is_float = true;
                    end += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    end += 1;
                    if matches!(bytes.get(end), Some(b'-' | b'+')) {
                        end += 1;
                    }
                }
                _ => break,
            }
        }
        if end == digits_start {
            return Err((self.line, format!("bad number syntax: {:?}", &rest[..end.max(1)])));
        }

        let literal = &rest[..end];
        let token = if is_float {
            literal.parse::<f64>().map(Token::Float).ok()
        } else {
            literal.parse::<i64>().map(Token::Int).ok()
        };
        let token = token.ok_or_else(|| (self.line, format!("bad number syntax: {:?}", literal)))?;
        self.pos += end;
        self.emit(token);
        Ok(())
    }
}

fn identifier(s: &str) -> &str {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[..end]
}
