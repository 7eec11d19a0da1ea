//! Builds the node tree from lexer tokens.

use super::lexer::{LexError, Spanned, Token};
use super::value::Value;

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    With {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub(crate) struct Pipeline {
    /// Variables declared (`:=`) or assigned (`=`) by the pipeline.
    pub decl: Vec<String>,
    pub is_assign: bool,
    pub cmds: Vec<Command>,
}

#[derive(Debug, Clone)]
pub(crate) struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone)]
pub(crate) enum Operand {
    Dot,
    Field(Vec<String>),
    Variable(String, Vec<String>),
    Function(String),
    Literal(Value),
    Sub(Box<Pipeline>, Vec<String>),
}

/// Why a node list stopped.
enum Stop {
    Eof,
    End,
    Else,
    ElseIf(Pipeline),
    ElseWith(Pipeline),
}

#[derive(Clone, Copy, PartialEq)]
enum Until {
    Close,
    Paren,
}

pub(crate) struct Parser<'f> {
    tokens: Vec<Spanned>,
    pos: usize,
    is_func: &'f dyn Fn(&str) -> bool,
    range_depth: usize,
}

impl<'f> Parser<'f> {
    pub fn new(tokens: Vec<Spanned>, is_func: &'f dyn Fn(&str) -> bool) -> Self {
        Self {
            tokens,
            pos: 0,
            is_func,
            range_depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Vec<Node>, LexError> {
        let (nodes, stop) = self.parse_list()?;
        match stop {
            Stop::Eof => Ok(nodes),
            Stop::End => Err(self.error("unexpected end")),
            _ => Err(self.error("unexpected else")),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        (self.line(), message.into())
    }

    fn skip_space(&mut self) {
        while self.peek() == Some(&Token::Space) {
            self.pos += 1;
        }
    }

    fn expect_close(&mut self, what: &str) -> Result<(), LexError> {
        self.skip_space();
        match self.next() {
            Some(Token::Close) => Ok(()),
            _ => Err(self.error(format!("unexpected token in {}", what))),
        }
    }

    fn keyword(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Ident(name)) => Some(name.clone()),
            _ => None,
        }
    }

    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop), LexError> {
        let mut nodes = Vec::new();
        loop {
            match self.next() {
                None => return Ok((nodes, Stop::Eof)),
                Some(Token::Text(text)) => nodes.push(Node::Text(text)),
                Some(Token::Open) => {
                    self.skip_space();
                    match self.keyword().as_deref() {
                        Some("if") => {
                            self.pos += 1;
                            let pipe = self.parse_pipeline(Until::Close)?;
                            nodes.push(self.parse_if(pipe)?);
                        }
                        Some("range") => {
                            self.pos += 1;
                            let pipe = self.parse_pipeline(Until::Close)?;
                            nodes.push(self.parse_range(pipe)?);
                        }
                        Some("with") => {
                            self.pos += 1;
                            let pipe = self.parse_pipeline(Until::Close)?;
                            nodes.push(self.parse_with(pipe)?);
                        }
                        Some("end") => {
                            self.pos += 1;
                            self.expect_close("end")?;
                            return Ok((nodes, Stop::End));
                        }
                        Some("else") => {
                            self.pos += 1;
                            self.skip_space();
                            let stop = match self.keyword().as_deref() {
                                Some("if") => {
                                    self.pos += 1;
                                    Stop::ElseIf(self.parse_pipeline(Until::Close)?)
                                }
                                Some("with") => {
                                    self.pos += 1;
                                    Stop::ElseWith(self.parse_pipeline(Until::Close)?)
                                }
                                _ => {
                                    self.expect_close("else")?;
                                    Stop::Else
                                }
                            };
                            return Ok((nodes, stop));
                        }
                        Some(word @ ("break" | "continue")) => {
                            let node = if word == "break" {
                                Node::Break
                            } else {
                                Node::Continue
                            };
                            if self.range_depth == 0 {
                                return Err(self.error(format!("{} outside range", word)));
                            }
                            self.pos += 1;
                            self.expect_close(word)?;
                            nodes.push(node);
                        }
                        _ => {
                            let pipe = self.parse_pipeline(Until::Close)?;
                            nodes.push(Node::Action(pipe));
                        }
                    }
                }
                Some(other) => return Err(self.error(format!("unexpected {:?}", other))),
            }
        }
    }

    fn parse_if(&mut self, pipe: Pipeline) -> Result<Node, LexError> {
        let mut branches = Vec::new();
        let mut current = pipe;
        loop {
            let (body, stop) = self.parse_list()?;
            branches.push((current, body));
            match stop {
                Stop::End => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
                Stop::Else => {
                    let otherwise = self.parse_tail("if")?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                Stop::ElseIf(next) => current = next,
                Stop::ElseWith(_) => return Err(self.error("else with inside if")),
                Stop::Eof => return Err(self.error("unexpected EOF in if")),
            }
        }
    }

    fn parse_range(&mut self, pipe: Pipeline) -> Result<Node, LexError> {
        if pipe.decl.len() > 2 {
            return Err(self.error("too many declarations in range"));
        }
        self.range_depth += 1;
        let parsed = self.parse_list();
        self.range_depth -= 1;
        let (body, stop) = parsed?;
        let otherwise = match stop {
            Stop::End => Vec::new(),
            Stop::Else => self.parse_tail("range")?,
            Stop::Eof => return Err(self.error("unexpected EOF in range")),
            _ => return Err(self.error("unexpected else in range")),
        };
        Ok(Node::Range {
            pipe,
            body,
            otherwise,
        })
    }

    fn parse_with(&mut self, pipe: Pipeline) -> Result<Node, LexError> {
        let (body, stop) = self.parse_list()?;
        let otherwise = match stop {
            Stop::End => Vec::new(),
            Stop::Else => self.parse_tail("with")?,
            Stop::ElseWith(next) => vec![self.parse_with(next)?],
            Stop::Eof => return Err(self.error("unexpected EOF in with")),
            Stop::ElseIf(_) => return Err(self.error("else if inside with")),
        };
        Ok(Node::With {
            pipe,
            body,
            otherwise,
        })
    }

    /// Parse an else branch, which must run to `end`.
    fn parse_tail(&mut self, what: &str) -> Result<Vec<Node>, LexError> {
        let (nodes, stop) = self.parse_list()?;
        match stop {
            Stop::End => Ok(nodes),
            _ => Err(self.error(format!("expected end after else in {}", what))),
        }
    }

    fn parse_pipeline(&mut self, until: Until) -> Result<Pipeline, LexError> {
        self.skip_space();
        let (decl, is_assign) = self.parse_declarations();

        let mut cmds = Vec::new();
        loop {
            let cmd = self.parse_command(until)?;
            cmds.push(cmd);
            match self.next() {
                Some(Token::Pipe) => continue,
                Some(Token::Close) if until == Until::Close => break,
                Some(Token::RightParen) if until == Until::Paren => break,
                Some(other) => return Err(self.error(format!("unexpected {:?} in pipeline", other))),
                None => return Err(self.error("unclosed pipeline")),
            }
        }
        Ok(Pipeline {
            decl,
            is_assign,
            cmds,
        })
    }

    /// `$x :=`, `$x =` or `$i, $v :=`; rewinds when none is present.
    fn parse_declarations(&mut self) -> (Vec<String>, bool) {
        let start = self.pos;
        let mut names = Vec::new();
        while let Some(Token::Variable(name)) = self.peek().cloned() {
            self.pos += 1;
            names.push(name);
            self.skip_space();
            match self.peek() {
                Some(Token::Declare) | Some(Token::Assign) if names.len() <= 2 => {
                    let is_assign = self.peek() == Some(&Token::Assign);
                    self.pos += 1;
                    self.skip_space();
                    return (names, is_assign);
                }
                Some(Token::Comma) if names.len() == 1 => {
                    self.pos += 1;
                    self.skip_space();
                }
                _ => break,
            }
        }
        self.pos = start;
        (Vec::new(), false)
    }

    fn parse_command(&mut self, until: Until) -> Result<Command, LexError> {
        let mut args = Vec::new();
        loop {
            self.skip_space();
            match self.peek() {
                None => return Err(self.error("unclosed action")),
                Some(Token::Pipe) | Some(Token::Close) | Some(Token::RightParen) => break,
                _ => {}
            }
            args.push(self.parse_operand()?);
            match self.peek() {
                Some(Token::Space) | Some(Token::Pipe) => {}
                Some(Token::Close) if until == Until::Close => {}
                Some(Token::RightParen) if until == Until::Paren => {}
                Some(other) => {
                    return Err(self.error(format!("unexpected {:?} in operand", other)))
                }
                None => return Err(self.error("unclosed action")),
            }
        }
        if args.is_empty() {
            return Err(self.error("missing value for command"));
        }
        Ok(Command { args })
    }

    fn parse_fields(&mut self) -> Vec<String> {
        let mut fields = Vec::new();
        while let Some(Token::Field(name)) = self.peek() {
            fields.push(name.clone());
            self.pos += 1;
        }
        fields
    }

    fn parse_operand(&mut self) -> Result<Operand, LexError> {
        let operand = match self.next() {
            Some(Token::Dot) => Operand::Dot,
            Some(Token::Field(first)) => {
                let mut chain = vec![first];
                chain.extend(self.parse_fields());
                Operand::Field(chain)
            }
            Some(Token::Variable(name)) => Operand::Variable(name, self.parse_fields()),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Operand::Literal(Value::Bool(true)),
                "false" => Operand::Literal(Value::Bool(false)),
                "nil" => Operand::Literal(Value::Null),
                _ if (self.is_func)(&name) => Operand::Function(name),
                _ => return Err(self.error(format!("function {:?} not defined", name))),
            },
            Some(Token::Str(s)) => Operand::Literal(Value::String(s)),
            Some(Token::Int(i)) => Operand::Literal(Value::Int(i)),
            Some(Token::Float(f)) => Operand::Literal(Value::Float(f)),
            Some(Token::LeftParen) => {
                let pipe = self.parse_pipeline(Until::Paren)?;
                Operand::Sub(Box::new(pipe), self.parse_fields())
            }
            Some(other) => return Err(self.error(format!("unexpected {:?} in operand", other))),
            None => return Err(self.error("unclosed action")),
        };
        Ok(operand)
    }
}
