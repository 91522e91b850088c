//! Recursive-descent parser.
//!
//! Precedence, loosest first:
//!
//! ```text
//! lambda, assignment
//! a if cond else b
//! or
//! and
//! not
//! == != < <= > >= in, not in, is, is not
//! + -
//! * / // %
//! unary + -
//! **
//! call, index, slice, attribute
//! ```

use super::ast::{BinOp, BoolOp, CmpOp, Expr, UnaryOp};
use super::lexer::{tokenize, Token};
use super::EvalError;
use crate::value::Value;

const RESERVED: [&str; 11] = [
    "and", "or", "not", "in", "is", "if", "else", "for", "lambda", "import", "from",
];

pub(crate) fn parse(source: &str) -> Result<Expr, EvalError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(invalid("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(invalid(format!("unexpected {}", describe(token)))),
    }
}

fn invalid(message: impl Into<String>) -> EvalError {
    EvalError::InvalidExpression(message.into())
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(i) => format!("number {i}"),
        Token::Float(f) => format!("number {f}"),
        Token::Str(s) => format!("string {s:?}"),
        Token::Ident(name) => format!("`{name}`"),
        Token::Op(op) => format!("`{op}`"),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(o)) if *o == op)
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == word)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), EvalError> {
        if self.eat_op(op) {
            return Ok(());
        }
        Err(match self.peek() {
            Some(token) => invalid(format!("expected `{op}`, found {}", describe(token))),
            None => invalid(format!("expected `{op}` at end of expression")),
        })
    }

    fn identifier(&mut self) -> Result<String, EvalError> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            Some(other) => Err(invalid(format!("expected a name, found {}", describe(&other)))),
            None => Err(invalid("expected a name at end of expression")),
        }
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        if self.eat_keyword("lambda") {
            let mut params = Vec::new();
            while !self.at_op(":") {
                params.push(self.identifier()?);
                if !self.eat_op(",") {
                    break;
                }
            }
            self.expect_op(":")?;
            let body = self.expression()?;
            return Ok(Expr::Lambda {
                params,
                body: Box::new(body),
            });
        }

        let expr = self.ternary()?;
        if self.at_op(":=") || self.at_op("=") {
            let Expr::Name(target) = expr else {
                return Err(invalid("cannot assign to an expression"));
            };
            self.pos += 1;
            let value = self.expression()?;
            return Ok(Expr::Assign {
                target,
                value: Box::new(value),
            });
        }
        Ok(expr)
    }

    fn ternary(&mut self) -> Result<Expr, EvalError> {
        let then = self.or_expr()?;
        if !self.eat_keyword("if") {
            return Ok(then);
        }
        let condition = self.or_expr()?;
        if !self.eat_keyword("else") {
            return Err(invalid("conditional expression is missing `else`"));
        }
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, EvalError> {
        let mut values = vec![self.and_expr()?];
        while self.eat_keyword("or") {
            values.push(self.and_expr()?);
        }
        Ok(bool_op(BoolOp::Or, values))
    }

    fn and_expr(&mut self) -> Result<Expr, EvalError> {
        let mut values = vec![self.not_expr()?];
        while self.eat_keyword("and") {
            values.push(self.not_expr()?);
        }
        Ok(bool_op(BoolOp::And, values))
    }

    fn not_expr(&mut self) -> Result<Expr, EvalError> {
        if self.eat_keyword("not") {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let (op, width) = match self.peek()? {
            Token::Op("==") => (CmpOp::Eq, 1),
            Token::Op("!=") => (CmpOp::Ne, 1),
            Token::Op("<") => (CmpOp::Lt, 1),
            Token::Op("<=") => (CmpOp::Le, 1),
            Token::Op(">") => (CmpOp::Gt, 1),
            Token::Op(">=") => (CmpOp::Ge, 1),
            Token::Ident(w) if w == "in" => (CmpOp::In, 1),
            Token::Ident(w) if w == "not" => match self.peek_at(1) {
                Some(Token::Ident(n)) if n == "in" => (CmpOp::NotIn, 2),
                _ => return None,
            },
            Token::Ident(w) if w == "is" => match self.peek_at(1) {
                Some(Token::Ident(n)) if n == "not" => (CmpOp::Ne, 2),
                _ => (CmpOp::Eq, 1),
            },
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        let left = self.arith()?;
        let mut links = Vec::new();
        while let Some(op) = self.comparison_op() {
            links.push((op, self.arith()?));
        }
        if links.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare {
            left: Box::new(left),
            links,
        })
    }

    fn arith(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = if self.eat_op("-") {
            UnaryOp::Minus
        } else if self.eat_op("+") {
            UnaryOp::Plus
        } else {
            return self.power();
        };
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.unary()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let args = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                expr = self.subscript(expr)?;
            } else if self.eat_op(".") {
                let name = self.identifier()?;
                expr = Expr::Attribute {
                    target: Box::new(expr),
                    name,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        while !self.at_op(")") {
            let arg = self.expression()?;
            if self.at_keyword("for") {
                args.push(self.comprehension(arg)?);
            } else {
                args.push(arg);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, EvalError> {
        let start = if self.at_op(":") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        if !self.eat_op(":") {
            self.expect_op("]")?;
            let index = start.ok_or_else(|| invalid("empty index"))?;
            return Ok(Expr::Index {
                target: Box::new(target),
                index,
            });
        }
        let stop = if self.at_op(":") || self.at_op("]") {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        let step = if self.eat_op(":") && !self.at_op("]") {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        self.expect_op("]")?;
        Ok(Expr::Slice {
            target: Box::new(target),
            start,
            stop,
            step,
        })
    }

    fn comprehension(&mut self, element: Expr) -> Result<Expr, EvalError> {
        self.eat_keyword("for");
        let mut names = vec![self.identifier()?];
        while self.eat_op(",") {
            names.push(self.identifier()?);
        }
        if !self.eat_keyword("in") {
            return Err(invalid("comprehension is missing `in`"));
        }
        let iter = self.or_expr()?;
        if self.eat_keyword("if") {
            self.or_expr()?;
        }
        Ok(Expr::Comprehension {
            element: Box::new(element),
            target: names.join(", "),
            iter: Box::new(iter),
        })
    }

    /// Comma-separated expressions up to `close`; the opening bracket has
    /// been consumed and `first` already parsed.
    fn sequence(&mut self, first: Expr, close: &str) -> Result<Vec<Expr>, EvalError> {
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(close) {
                break;
            }
            items.push(self.expression()?);
        }
        self.expect_op(close)?;
        Ok(items)
    }

    fn atom(&mut self) -> Result<Expr, EvalError> {
        let Some(token) = self.advance() else {
            return Err(invalid("unexpected end of expression"));
        };
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => self.name(name),
            Token::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.at_keyword("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op(")")?;
                    return Ok(comp);
                }
                if self.at_op(",") {
                    return Ok(Expr::Tuple(self.sequence(first, ")")?));
                }
                self.expect_op(")")?;
                Ok(first)
            }
            Token::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expression()?;
                if self.at_keyword("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op("]")?;
                    return Ok(comp);
                }
                Ok(Expr::List(self.sequence(first, "]")?))
            }
            Token::Op("{") => {
                if self.eat_op("}") {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let first = self.expression()?;
                if self.at_keyword("for") {
                    let comp = self.comprehension(first)?;
                    self.expect_op("}")?;
                    return Ok(comp);
                }
                if !self.eat_op(":") {
                    return Ok(Expr::Set(self.sequence(first, "}")?));
                }
                let mut pairs = vec![(first, self.expression()?)];
                while self.eat_op(",") {
                    if self.at_op("}") {
                        break;
                    }
                    let key = self.expression()?;
                    self.expect_op(":")?;
                    pairs.push((key, self.expression()?));
                }
                self.expect_op("}")?;
                Ok(Expr::Dict(pairs))
            }
            other => Err(invalid(format!("unexpected {}", describe(&other)))),
        }
    }

    fn name(&mut self, name: String) -> Result<Expr, EvalError> {
        match name.as_str() {
            "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
            "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
            "None" | "null" => Ok(Expr::Literal(Value::Null)),
            "import" | "from" => {
                let mut module = self.identifier()?;
                while self.eat_op(".") {
                    module.push('.');
                    module.push_str(&self.identifier()?);
                }
                if name == "from" && self.eat_keyword("import") {
                    while matches!(self.peek(), Some(Token::Ident(_)) | Some(Token::Op(","))) {
                        self.pos += 1;
                    }
                }
                Ok(Expr::Import(module))
            }
            "lambda" => {
                self.pos -= 1;
                self.expression()
            }
            word if RESERVED.contains(&word) => Err(invalid(format!("unexpected `{word}`"))),
            _ => Ok(Expr::Name(name)),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn bool_op(op: BoolOp, mut values: Vec<Expr>) -> Expr {
    if values.len() == 1 {
        return values.remove(0);
    }
    Expr::BoolOp { op, values }
}
