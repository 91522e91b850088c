//! Tokenizer for the expression language.

use super::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    /// Punctuation and operators, longest match first.
    Op(&'static str),
}

const OPERATORS: [&str; 24] = [
    "**", "//", "==", "!=", "<=", ">=", ":=", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")",
    "[", "]", "{", "}", ",", ":", ".",
];

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let (token, next) = number(&chars, i)?;
            tokens.push(token);
            i = next;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c == '\'' || c == '"' {
            let (text, next) = string(&chars, i)?;
            tokens.push(Token::Str(text));
            i = next;
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(*op)) {
            Some(op) => {
                tokens.push(Token::Op(*op));
                i += op.chars().count();
            }
            None => {
                return Err(EvalError::InvalidExpression(format!(
                    "unexpected character {c:?} at offset {i}"
                )))
            }
        }
    }
    Ok(tokens)
}

fn number(chars: &[char], start: usize) -> Result<(Token, usize), EvalError> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() || c == '_' {
            i += 1;
        } else if c == '.' && !is_float && !chars.get(i + 1).is_some_and(|n| n.is_alphabetic()) {
            is_float = true;
            i += 1;
        } else if (c == 'e' || c == 'E')
            && chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+')
        {
            is_float = true;
            i += 2;
        } else {
            break;
        }
    }
    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let token = if is_float {
        text.parse::<f64>().map(Token::Float).ok()
    } else {
        text.parse::<i64>().map(Token::Int).ok()
    };
    token
        .map(|t| (t, i))
        .ok_or_else(|| EvalError::InvalidExpression(format!("bad number literal {text:?}")))
}

fn string(chars: &[char], start: usize) -> Result<(String, usize), EvalError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).copied().ok_or_else(unterminated)?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(unterminated())
}

fn unterminated() -> EvalError {
    EvalError::InvalidExpression("unterminated string literal".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("a.b >= 1.5 and x // 2 == 'it\\'s'").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Op("."),
                Token::Ident("b".into()),
                Token::Op(">="),
                Token::Float(1.5),
                Token::Ident("and".into()),
                Token::Ident("x".into()),
                Token::Op("//"),
                Token::Int(2),
                Token::Op("=="),
                Token::Str("it's".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_rejects_unknown_characters() {
        assert!(matches!(
            tokenize("a $ b"),
            Err(EvalError::InvalidExpression(_))
        ));
        assert!(tokenize("'open").is_err());
    }
}
