//! Walks a parsed template against a data value.

use super::builtins::BUILTINS;
use super::parse::{Command, Node, Operand, Pipeline};
use super::value::Value;
use super::FuncMap;

enum Flow {
    Normal,
    Break,
    Continue,
}

pub(crate) struct Exec<'t> {
    root: &'t Value,
    funcs: &'t FuncMap,
    vars: Vec<(String, Value)>,
    out: String,
}

impl<'t> Exec<'t> {
    pub fn new(root: &'t Value, funcs: &'t FuncMap) -> Self {
        Self {
            root,
            funcs,
            vars: Vec::new(),
            out: String::new(),
        }
    }

    pub fn run(mut self, nodes: &[Node]) -> Result<String, String> {
        let root = self.root;
        self.walk(root, nodes)?;
        Ok(self.out)
    }

    fn walk(&mut self, dot: &Value, nodes: &[Node]) -> Result<Flow, String> {
        for node in nodes {
            let flow = match node {
                Node::Text(text) => {
                    self.out.push_str(text);
                    Flow::Normal
                }
                Node::Action(pipe) => {
                    let value = self.eval_pipeline(dot, pipe)?;
                    if pipe.decl.is_empty() {
                        self.out.push_str(&value.to_string());
                    }
                    Flow::Normal
                }
                Node::If {
                    branches,
                    otherwise,
                } => self.walk_if(dot, branches, otherwise)?,
                Node::With {
                    pipe,
                    body,
                    otherwise,
                } => {
                    let mark = self.vars.len();
                    let value = self.eval_pipeline(dot, pipe)?;
                    let flow = if value.is_truthy() {
                        self.walk(&value, body)
                    } else {
                        self.walk(dot, otherwise)
                    };
                    self.vars.truncate(mark);
                    flow?
                }
                Node::Range {
                    pipe,
                    body,
                    otherwise,
                } => self.walk_range(dot, pipe, body, otherwise)?,
                Node::Break => Flow::Break,
                Node::Continue => Flow::Continue,
            };
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn walk_if(
        &mut self,
        dot: &Value,
        branches: &[(Pipeline, Vec<Node>)],
        otherwise: &[Node],
    ) -> Result<Flow, String> {
        let mark = self.vars.len();
        for (pipe, body) in branches {
            let taken = self.eval_pipeline(dot, pipe)?.is_truthy();
            if taken {
                let flow = self.walk(dot, body);
                self.vars.truncate(mark);
                return flow;
            }
        }
        let flow = self.walk(dot, otherwise);
        self.vars.truncate(mark);
        flow
    }

    fn walk_range(
        &mut self,
        dot: &Value,
        pipe: &Pipeline,
        body: &[Node],
        otherwise: &[Node],
    ) -> Result<Flow, String> {
        // Integer ranges come from request data, so items are produced lazily.
        let items: Box<dyn Iterator<Item = (Value, Value)>> =
            match self.eval_commands(dot, &pipe.cmds)? {
                Value::List(items) => Box::new(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::Int(i as i64), v)),
                ),
                Value::Map(map) => {
                    Box::new(map.into_iter().map(|(k, v)| (Value::String(k), v)))
                }
                Value::Int(n) => Box::new((0..n.max(0)).map(|i| (Value::Int(i), Value::Int(i)))),
                Value::Missing | Value::Null => Box::new(std::iter::empty()),
                other => return Err(format!("range can't iterate over {}", other.type_name())),
            };
        let mut items = items.peekable();

        if items.peek().is_none() {
            return self.walk(dot, otherwise);
        }

        let mark = self.vars.len();
        for (key, elem) in items {
            match pipe.decl.as_slice() {
                [value_var] => self.vars.push((value_var.clone(), elem.clone())),
                [key_var, value_var] => {
                    self.vars.push((key_var.clone(), key));
                    self.vars.push((value_var.clone(), elem.clone()));
                }
                _ => {}
            }
            let flow = self.walk(&elem, body);
            self.vars.truncate(mark);
            if let Flow::Break = flow? {
                break;
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_pipeline(&mut self, dot: &Value, pipe: &Pipeline) -> Result<Value, String> {
        let value = self.eval_commands(dot, &pipe.cmds)?;
        if let Some(name) = pipe.decl.first() {
            if pipe.is_assign {
                let slot = self
                    .vars
                    .iter_mut()
                    .rev()
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| format!("undefined variable: {}", name))?;
                slot.1 = value.clone();
            } else {
                self.vars.push((name.clone(), value.clone()));
            }
        }
        Ok(value)
    }

    fn eval_commands(&mut self, dot: &Value, cmds: &[Command]) -> Result<Value, String> {
        let mut last = None;
        for cmd in cmds {
            last = Some(self.eval_command(dot, cmd, last.take())?);
        }
        Ok(last.unwrap_or_default())
    }

    fn eval_command(
        &mut self,
        dot: &Value,
        cmd: &Command,
        piped: Option<Value>,
    ) -> Result<Value, String> {
        let Some((first, rest)) = cmd.args.split_first() else {
            return Err("empty command".to_string());
        };

        match first {
            Operand::Function(name) if name == "and" || name == "or" => {
                self.eval_logical(dot, name == "and", rest, piped)
            }
            Operand::Function(name) => {
                let mut args = Vec::with_capacity(rest.len() + 1);
                for operand in rest {
                    args.push(self.eval_operand(dot, operand)?);
                }
                args.extend(piped);
                self.call(name, &args)
            }
            operand => {
                if !rest.is_empty() || piped.is_some() {
                    return Err("can't give argument to non-function".to_string());
                }
                self.eval_operand(dot, operand)
            }
        }
    }

    /// `and` / `or` stop at the first argument that decides the result.
    fn eval_logical(
        &mut self,
        dot: &Value,
        is_and: bool,
        operands: &[Operand],
        piped: Option<Value>,
    ) -> Result<Value, String> {
        let name = if is_and { "and" } else { "or" };
        if operands.is_empty() && piped.is_none() {
            return Err(format!("wrong number of args for {}: want at least 1 got 0", name));
        }
        let mut last = Value::Missing;
        for operand in operands {
            last = self.eval_operand(dot, operand)?;
            if last.is_truthy() != is_and {
                return Ok(last);
            }
        }
        if let Some(value) = piped {
            last = value;
        }
        Ok(last)
    }

    fn eval_operand(&mut self, dot: &Value, operand: &Operand) -> Result<Value, String> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(chain) => resolve(dot, chain),
            Operand::Variable(name, chain) => resolve(self.variable(name)?, chain),
            Operand::Function(name) => self.call(name, &[]),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Sub(pipe, chain) => {
                let value = self.eval_pipeline(dot, pipe)?;
                resolve(&value, chain)
            }
        }
    }

    fn variable(&self, name: &str) -> Result<&Value, String> {
        if name == "$" {
            return Ok(self.root);
        }
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| format!("undefined variable: {}", name))
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, String> {
        let func = self
            .funcs
            .get(name)
            .or_else(|| BUILTINS.get(name))
            .ok_or_else(|| format!("function {:?} not defined", name))?;
        func(args).map_err(|e| format!("error calling {}: {}", name, e))
    }
}

/// Follow a field chain. Absent keys and nil values resolve to `Missing`.
fn resolve(base: &Value, chain: &[String]) -> Result<Value, String> {
    let mut current = base;
    for name in chain {
        current = match current {
            Value::Map(map) => match map.get(name) {
                Some(value) => value,
                None => return Ok(Value::Missing),
            },
            Value::Missing | Value::Null => return Ok(Value::Missing),
            other => {
                return Err(format!(
                    "can't evaluate field {} in type {}",
                    name,
                    other.type_name()
                ))
            }
        };
    }
    Ok(current.clone())
}
