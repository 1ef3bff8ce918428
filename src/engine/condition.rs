//! Boolean guard expressions for `when:` step gates.
//!
//! Grammar: path equality (`==`, `!=`), presence checks (`exists(path)` or a
//! bare path), and `and` / `or` / `not` with parentheses. Operands are
//! variable paths, quoted strings, numbers or booleans. Evaluation never
//! fails: malformed expressions evaluate to false with a warning.

use serde_json::Value;

use crate::template::resolve_path;

/// Evaluate a guard expression against the variable context.
pub fn evaluate(expression: &str, context: &Value, warnings: &mut Vec<String>) -> bool {
    let tokens = tokenize(expression);
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        context,
    };
    match parser.parse_or() {
        Ok(value) if parser.pos == tokens.len() => value,
        Ok(_) | Err(_) => {
            warnings.push(format!("when: malformed expression '{expression}'"));
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Exists,
    Str(String),
    Word(String),
}

fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    tokens.push(Token::Word("=".into()));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Word("!".into()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                for next in chars.by_ref() {
                    if next == quote {
                        break;
                    }
                    literal.push(next);
                }
                tokens.push(Token::Str(literal));
            }
            _ => {
                let mut word = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '(' | ')' | '=' | '!') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "exists" => Token::Exists,
                    _ => Token::Word(word),
                });
            }
        }
    }
    tokens
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    context: &'a Value,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<bool, ()> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = left || right;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<bool, ()> {
        let mut left = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = left && right;
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<bool, ()> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(!self.parse_not()?);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<bool, ()> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                if self.advance() != Some(&Token::RParen) {
                    return Err(());
                }
                Ok(inner)
            }
            Some(Token::Exists) => {
                self.advance();
                if self.advance() != Some(&Token::LParen) {
                    return Err(());
                }
                let Some(Token::Word(path)) = self.advance().cloned() else {
                    return Err(());
                };
                if self.advance() != Some(&Token::RParen) {
                    return Err(());
                }
                Ok(resolve_path(self.context, &path).is_some())
            }
            Some(Token::Str(_) | Token::Word(_)) => {
                let left = self.parse_operand()?;
                match self.peek() {
                    Some(Token::Eq) => {
                        self.advance();
                        let right = self.parse_operand()?;
                        Ok(values_equal(&left, &right))
                    }
                    Some(Token::Ne) => {
                        self.advance();
                        let right = self.parse_operand()?;
                        Ok(!values_equal(&left, &right))
                    }
                    _ => Ok(truthy(&left)),
                }
            }
            _ => Err(()),
        }
    }

    fn parse_operand(&mut self) -> Result<Value, ()> {
        match self.advance().cloned() {
            Some(Token::Str(literal)) => Ok(Value::String(literal)),
            Some(Token::Word(word)) => {
                if word == "true" {
                    return Ok(Value::Bool(true));
                }
                if word == "false" {
                    return Ok(Value::Bool(false));
                }
                if let Ok(number) = word.parse::<i64>() {
                    return Ok(Value::Number(number.into()));
                }
                // A path; missing paths resolve to null.
                Ok(resolve_path(self.context, &word).unwrap_or(Value::Null))
            }
            _ => Err(()),
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    // Numbers and their string forms compare equal, matching how variables
    // arrive from YAML and tool-call payloads.
    match (left, right) {
        (Value::String(s), other) | (other, Value::String(s)) => match other {
            Value::Number(n) => s == &n.to_string(),
            Value::Bool(b) => s == &b.to_string(),
            _ => false,
        },
        _ => false,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "depth": "deep",
            "count": 3,
            "flag": true,
            "empty": "",
            "nested": {"mode": "fast"},
        })
    }

    fn eval(expr: &str) -> bool {
        let mut warnings = Vec::new();
        evaluate(expr, &ctx(), &mut warnings)
    }

    #[test]
    fn equality_on_paths() {
        assert!(eval("depth == 'deep'"));
        assert!(!eval("depth == 'brief'"));
        assert!(eval("depth != 'brief'"));
        assert!(eval("nested.mode == 'fast'"));
    }

    #[test]
    fn numeric_equality() {
        assert!(eval("count == 3"));
        assert!(!eval("count == 4"));
    }

    #[test]
    fn presence_checks() {
        assert!(eval("exists(depth)"));
        assert!(!eval("exists(missing)"));
        assert!(eval("flag"));
        assert!(!eval("empty"));
        assert!(!eval("missing"));
    }

    #[test]
    fn boolean_connectives() {
        assert!(eval("depth == 'deep' and count == 3"));
        assert!(!eval("depth == 'deep' and count == 4"));
        assert!(eval("depth == 'brief' or flag"));
        assert!(eval("not empty"));
        assert!(eval("not (depth == 'brief') and flag"));
    }

    #[test]
    fn malformed_is_false_with_warning() {
        let mut warnings = Vec::new();
        assert!(!evaluate("depth == ", &ctx(), &mut warnings));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("malformed"));
    }

    #[test]
    fn missing_path_equality_is_false() {
        assert!(!eval("missing == 'x'"));
        // Inequality against a missing path holds.
        assert!(eval("missing != 'x'"));
    }
}
