//! Functions every template can call regardless of the injected library.

use super::value::Value;
use super::{arity, FuncMap};
use std::cmp::Ordering;
use std::sync::LazyLock;

pub(crate) static BUILTINS: LazyLock<FuncMap> = LazyLock::new(|| {
    FuncMap::new()
        .with("and", and)
        .with("or", or)
        .with("not", not)
        .with("eq", eq)
        .with("ne", ne)
        .with("lt", lt)
        .with("le", le)
        .with("gt", gt)
        .with("ge", ge)
        .with("len", len)
        .with("index", index)
        .with("print", print)
        .with("println", println)
        .with("printf", printf)
        .with("urlquery", urlquery)
});

fn and(args: &[Value]) -> Result<Value, String> {
    let last = args.last().ok_or("want at least 1 arg")?;
    Ok(args
        .iter()
        .find(|v| !v.is_truthy())
        .unwrap_or(last)
        .clone())
}

fn or(args: &[Value]) -> Result<Value, String> {
    let last = args.last().ok_or("want at least 1 arg")?;
    Ok(args.iter().find(|v| v.is_truthy()).unwrap_or(last).clone())
}

fn not(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (x, y) if x.is_nil() && y.is_nil() => true,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            as_f64(a) == as_f64(b)
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (Value::Time(x), Value::Time(y)) => Ok(x.cmp(y)),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| "cannot compare NaN".to_string()),
            _ => Err(format!(
                "incompatible types for comparison: {} and {}",
                a.type_name(),
                b.type_name()
            )),
        },
    }
}

fn eq(args: &[Value]) -> Result<Value, String> {
    if args.len() < 2 {
        return Err("missing argument for comparison".to_string());
    }
    let first = &args[0];
    Ok(Value::Bool(args[1..].iter().any(|other| equal(first, other))))
}

fn ne(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(Value::Bool(!equal(&args[0], &args[1])))
}

fn lt(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(Value::Bool(compare(&args[0], &args[1])? == Ordering::Less))
}

fn le(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(Value::Bool(compare(&args[0], &args[1])? != Ordering::Greater))
}

fn gt(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(Value::Bool(compare(&args[0], &args[1])? == Ordering::Greater))
}

fn ge(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    Ok(Value::Bool(compare(&args[0], &args[1])? != Ordering::Less))
}

fn len(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.len(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => return Err(format!("len of type {}", other.type_name())),
    };
    Ok(Value::Int(n as i64))
}

/// `index m "key"` and `index list 0`, chained over several keys.
fn index(args: &[Value]) -> Result<Value, String> {
    let (item, keys) = args.split_first().ok_or("index of nothing")?;
    let mut current = item.clone();
    for key in keys {
        current = match (&current, key) {
            (c, _) if c.is_nil() => return Ok(Value::Missing),
            (Value::Map(map), Value::String(k)) => map.get(k).cloned().unwrap_or_default(),
            (Value::List(items), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| format!("index out of range: {}", i))?,
            (c, k) => {
                return Err(format!(
                    "can't index item of type {} with {}",
                    c.type_name(),
                    k.type_name()
                ))
            }
        };
    }
    Ok(current)
}

/// Joins arguments, adding spaces between operands when neither is a string.
fn sprint(args: &[Value]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            let prev_is_string = matches!(args[i - 1], Value::String(_));
            if !prev_is_string && !matches!(arg, Value::String(_)) {
                out.push(' ');
            }
        }
        out.push_str(&arg.to_string());
    }
    out
}

fn print(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(sprint(args)))
}

fn println(args: &[Value]) -> Result<Value, String> {
    let mut line = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    line.push('\n');
    Ok(Value::String(line))
}

fn urlquery(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(urlencoding::encode(&sprint(args)).into_owned()))
}

fn printf(args: &[Value]) -> Result<Value, String> {
    let (format, rest) = args.split_first().ok_or("missing format")?;
    let Value::String(format) = format else {
        return Err(format!("format must be a string, got {}", format.type_name()));
    };
    Ok(Value::String(sprintf(format, rest)))
}

/// A small subset of Go's fmt verbs: %v %s %d %f %.Nf %q %t %x %%.
fn sprintf(format: &str, args: &[Value]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            precision = digits.parse::<usize>().ok();
        }

        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        let Some(arg) = args.next() else {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        };

        let formatted = match (verb, arg) {
            ('v' | 's', arg) => arg.to_string(),
            ('d', Value::Int(i)) => i.to_string(),
            ('f', arg) if as_f64(arg).is_some() => {
                format!("{:.*}", precision.unwrap_or(6), as_f64(arg).unwrap_or_default())
            }
            ('q', arg) => serde_json::Value::String(arg.to_string()).to_string(),
            ('t', Value::Bool(b)) => b.to_string(),
            ('x', Value::Int(i)) => format!("{:x}", i),
            ('x', Value::String(s)) => s.bytes().map(|b| format!("{:02x}", b)).collect(),
            (verb, arg) => format!("%!{}({}={})", verb, arg.type_name(), arg),
        };
        out.push_str(&formatted);
    }
    out
}
