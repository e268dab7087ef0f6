//! Invocation grammar
//!
//! ```text
//! call    := ident "(" [ arg { "," arg } [ "," ] ] ")"
//! arg     := ident "=" value
//! value   := string | number | ident
//! ```
//!
//! Strings take single or double quotes with backslash escapes. Numbers are
//! integers or decimals with an optional sign. `True`/`False`/`None`/`null`
//! are recognised; any other bare identifier is kept as a string.

use crate::error::PipelineError;
use crate::models::ArgValue;
use crate::Result;

/// A syntactically valid call, before it is checked against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub name: String,
    pub arguments: Vec<(String, ArgValue)>,
}

pub fn parse(input: &str) -> Result<ParsedCall> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };

    parser.call().map_err(|reason| PipelineError::SpecialistParseError {
        raw: input.to_string(),
        reason,
    })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

type Step<T> = std::result::Result<T, String>;

impl Parser {
    fn call(&mut self) -> Step<ParsedCall> {
        self.skip_ws();
        let name = self.ident().ok_or_else(|| self.unexpected("a tool name"))?;

        self.skip_ws();
        self.expect('(')?;

        let mut arguments: Vec<(String, ArgValue)> = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(')') {
                break;
            }

            let key = self.ident().ok_or_else(|| self.unexpected("an argument name"))?;
            if arguments.iter().any(|(existing, _)| *existing == key) {
                return Err(format!("duplicate argument '{}'", key));
            }

            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            let value = self.value()?;
            arguments.push((key, value));

            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            self.expect(')')?;
            break;
        }

        self.skip_ws();
        if self.pos < self.chars.len() {
            return Err(format!("trailing input at position {}", self.pos));
        }

        Ok(ParsedCall { name, arguments })
    }

    fn value(&mut self) -> Step<ArgValue> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                self.string(quote).map(ArgValue::Str)
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(_) => {
                let ident = self.ident().ok_or_else(|| self.unexpected("a value"))?;
                Ok(match ident.as_str() {
                    "True" | "true" => ArgValue::Bool(true),
                    "False" | "false" => ArgValue::Bool(false),
                    "None" | "null" => ArgValue::Null,
                    _ => ArgValue::Str(ident),
                })
            }
            None => Err("unexpected end of input, expected a value".to_string()),
        }
    }

    fn string(&mut self, quote: char) -> Step<String> {
        let mut out = String::new();
        while let Some(c) = self.next() {
            match c {
                '\\' => {
                    let escaped = self
                        .next()
                        .ok_or_else(|| "unterminated escape sequence".to_string())?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err("unterminated string literal".to_string())
    }

    fn number(&mut self) -> Step<ArgValue> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.pos += 1;
        }

        let mut seen_digit = false;
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                seen_digit = true;
            } else if c == '.' && !seen_dot {
                seen_dot = true;
            } else {
                break;
            }
            self.pos += 1;
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if !seen_digit {
            return Err(format!("malformed number '{}'", text));
        }

        if seen_dot {
            text.parse::<f64>()
                .map(ArgValue::Float)
                .map_err(|_| format!("malformed number '{}'", text))
        } else {
            text.parse::<i64>()
                .map(ArgValue::Int)
                .map_err(|_| format!("integer out of range '{}'", text))
        }
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.pos += 1,
            _ => return None,
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn expect(&mut self, want: char) -> Step<()> {
        if self.eat(want) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", want)))
        }
    }

    fn eat(&mut self, want: char) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self, wanted: &str) -> String {
        match self.peek() {
            Some(c) => format!("expected {} at position {}, found '{}'", wanted, self.pos, c),
            None => format!("expected {} but input ended", wanted),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_mixed_values() {
        let call = parse(
            r#"plot_comparison_bars(category="grocery", y1=2025, m1=1, y2=2026, m2=1, compare=True, rate=-1.5, note='it\'s', x=None,)"#,
        )
        .unwrap();

        assert_eq!(call.name, "plot_comparison_bars");
        assert_eq!(call.arguments[0], ("category".into(), ArgValue::Str("grocery".into())));
        assert_eq!(call.arguments[1], ("y1".into(), ArgValue::Int(2025)));
        assert_eq!(call.arguments[5], ("compare".into(), ArgValue::Bool(true)));
        assert_eq!(call.arguments[6], ("rate".into(), ArgValue::Float(-1.5)));
        assert_eq!(call.arguments[7], ("note".into(), ArgValue::Str("it's".into())));
        assert_eq!(call.arguments[8], ("x".into(), ArgValue::Null));
    }

    #[test]
    fn test_empty_argument_list() {
        let call = parse("  calculate_total( )  ").unwrap();
        assert_eq!(call.name, "calculate_total");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let err = parse("calculate_total(year=2024, year=2025)").unwrap_err();
        assert_eq!(err.kind(), "specialist_parse_error");
        assert!(err.to_string().contains("duplicate argument 'year'"));
    }

    #[test]
    fn test_rejects_malformed_input() {
        assert!(parse("calculate_total(year=2024").is_err());
        assert!(parse("calculate_total(year=)").is_err());
        assert!(parse("calculate_total(\"grocery\")").is_err());
        assert!(parse("calculate_total(category='grocery) extra").is_err());
        assert!(parse("calculate_total(year=2024) and more").is_err());
        assert!(parse("I think you want calculate_total").is_err());
    }

    #[test]
    fn test_error_keeps_raw_output() {
        let err = parse("total(").unwrap_err();
        assert_eq!(err.raw_output(), Some("total("));
    }
}
