//! Parser for AppleScript result literals.
//!
//! `osascript -s s` prints results as AppleScript source:
//! `{{1.0, "a"}, {true, missing value}}`. Only the forms Excel returns are
//! understood: lists, strings, numbers, booleans, dates and `missing value`.

use std::iter::Peekable;
use std::str::Chars;

use crate::model::{CellError, CellValue};

/// One parsed AppleScript value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    List(Vec<Literal>),
    Text(String),
    Number(f64),
    Bool(bool),
    /// `date "Monday, January 1, 2024 at 12:00:00 AM"`, kept as printed
    Date(String),
    Missing,
}

impl Literal {
    pub fn as_list(&self) -> Option<&[Literal]> {
        match self {
            Literal::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Literal::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Excel reports empty cells as `""` and error cells as their `CVErr`
    /// number. Text is never reinterpreted, so a literal "#N/A" stays text.
    pub fn to_cell_value(&self) -> CellValue {
        match self {
            Literal::Missing => CellValue::Empty,
            Literal::Bool(b) => CellValue::Bool(*b),
            Literal::Number(n) => cverr(*n).map_or(CellValue::Number(*n), CellValue::Error),
            Literal::Text(s) if s.is_empty() => CellValue::Empty,
            Literal::Text(s) | Literal::Date(s) => CellValue::Text(s.clone()),
            Literal::List(_) => CellValue::Text(self.to_string()),
        }
    }

    /// Shape a range result as rows of cells.
    ///
    /// A single cell comes back as a scalar and a single row as a flat list.
    pub fn into_rows(self) -> Vec<Vec<Literal>> {
        match self {
            Literal::List(items) if items.iter().all(|i| matches!(i, Literal::List(_))) => items
                .into_iter()
                .map(|row| match row {
                    Literal::List(cells) => cells,
                    other => vec![other],
                })
                .collect(),
            Literal::List(items) => vec![items],
            scalar => vec![vec![scalar]],
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::List(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("}")
            }
            Literal::Text(s) => write!(f, "{}", super::script::quote(s)),
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Date(s) => write!(f, "date {}", super::script::quote(s)),
            Literal::Missing => f.write_str("missing value"),
        }
    }
}

fn cverr(n: f64) -> Option<CellError> {
    if n.fract() != 0.0 || n < f64::from(i32::MIN) || n > f64::from(i32::MAX) {
        return None;
    }
    CellError::from_cverr(n as i32)
}

/// Parse the full output of one script
pub fn parse(input: &str) -> Result<Literal, String> {
    let mut p = Parser {
        chars: input.trim().chars().peekable(),
    };
    if p.chars.peek().is_none() {
        return Ok(Literal::Missing);
    }
    let value = p.value()?;
    p.skip_ws();
    match p.chars.next() {
        None => Ok(value),
        Some(c) => Err(format!("unexpected '{c}' after value")),
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn value(&mut self) -> Result<Literal, String> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('{') => self.list(),
            Some('"') => self.string().map(Literal::Text),
            Some(c) if c == '-' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.word(),
            Some(c) => Err(format!("unexpected '{c}'")),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn list(&mut self) -> Result<Literal, String> {
        self.chars.next();
        let mut items = Vec::new();
        self.skip_ws();
        if self.chars.peek() == Some(&'}') {
            self.chars.next();
            return Ok(Literal::List(items));
        }
        loop {
            items.push(self.value()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some('}') => return Ok(Literal::List(items)),
                Some(c) => return Err(format!("expected ',' or '}}' in list, found '{c}'")),
                None => return Err("unterminated list".to_string()),
            }
        }
    }

    fn string(&mut self) -> Result<String, String> {
        self.chars.next();
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some('"') => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) => out.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    fn number(&mut self) -> Result<Literal, String> {
        let mut text = String::new();
        while let Some(&c) = self.chars.peek() {
            let exponent_sign = (c == '+' || c == '-') && text.ends_with(['E', 'e']);
            if c.is_ascii_digit() || c == '.' || c == 'E' || c == 'e' || exponent_sign
                || (c == '-' && text.is_empty())
            {
                text.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        text.parse::<f64>()
            .map(Literal::Number)
            .map_err(|_| format!("invalid number '{text}'"))
    }

    fn word(&mut self) -> Result<Literal, String> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphabetic() {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match word.as_str() {
            "true" => Ok(Literal::Bool(true)),
            "date" => {
                self.skip_ws();
                if self.chars.peek() != Some(&'"') {
                    return Err("expected a quoted string after 'date'".to_string());
                }
                self.string().map(Literal::Date)
            }
            "false" => Ok(Literal::Bool(false)),
            "missing" => {
                self.skip_ws();
                let rest: String = self.chars.by_ref().take(5).collect();
                if rest == "value" {
                    Ok(Literal::Missing)
                } else {
                    Err(format!("expected 'missing value', found 'missing {rest}'"))
                }
            }
            other => Err(format!("unsupported AppleScript term '{other}'")),
        }
    }
}
