use crate::catalog::{ColumnDef, DataType};
use crate::error::{SiltError, SiltResult};
use crate::sql::ast::{
    AggregateCall, AggregateFunc, BinaryExpr, BinaryOp, Expr, JoinClause, SelectItem, SelectStmt,
    Statement, TableRef,
};
use crate::sql::tokenizer::{tokenize, Token, TokenKind};
use crate::utils::scalar::Value;

/// Parse one SQL statement.
pub fn parse_sql(sql: &str) -> SiltResult<Statement> {
    let tokens = tokenize(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let statement = parser.parse_statement()?;
    parser.expect_end()?;
    Ok(statement)
}

/// Recursive-descent parser with one-token lookahead.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_statement(&mut self) -> SiltResult<Statement> {
        let token = self.current()?;
        if token.is_keyword("EXPLAIN") {
            self.advance();
            self.expect_keyword("SELECT")?;
            return Ok(Statement::Explain(self.parse_select_body()?));
        }
        if token.is_keyword("CREATE") {
            self.advance();
            return if self.match_keyword("TABLE") {
                self.parse_create_table()
            } else if self.match_keyword("INDEX") {
                self.parse_create_index()
            } else {
                Err(self.unexpected("TABLE or INDEX"))
            };
        }
        if token.is_keyword("DROP") {
            self.advance();
            return if self.match_keyword("TABLE") {
                Ok(Statement::DropTable {
                    table: self.expect_ident()?,
                })
            } else if self.match_keyword("INDEX") {
                Ok(Statement::DropIndex {
                    index: self.expect_ident()?,
                })
            } else {
                Err(self.unexpected("TABLE or INDEX"))
            };
        }
        if token.is_keyword("ALTER") {
            return self.parse_alter_table();
        }
        if token.is_keyword("INSERT") {
            return self.parse_insert();
        }
        if token.is_keyword("SELECT") {
            self.advance();
            return Ok(Statement::Select(self.parse_select_body()?));
        }
        if token.is_keyword("UPDATE") {
            return self.parse_update();
        }
        if token.is_keyword("DELETE") {
            return self.parse_delete();
        }
        Err(self.unexpected("a statement keyword"))
    }

    fn parse_create_table(&mut self) -> SiltResult<Statement> {
        let table = self.expect_ident()?;
        self.expect_symbol("(")?;
        let mut columns = vec![];
        loop {
            let name = self.expect_ident()?;
            let data_type = self.expect_data_type()?;
            columns.push(ColumnDef::new(name, data_type));
            if self.match_symbol(",") {
                continue;
            }
            break;
        }
        self.expect_symbol(")")?;
        Ok(Statement::CreateTable { table, columns })
    }

    fn parse_create_index(&mut self) -> SiltResult<Statement> {
        let index = self.expect_ident()?;
        self.expect_keyword("ON")?;
        let table = self.expect_ident()?;
        self.expect_symbol("(")?;
        let column = self.expect_ident()?;
        self.expect_symbol(")")?;
        Ok(Statement::CreateIndex {
            index,
            table,
            column,
        })
    }

    fn parse_alter_table(&mut self) -> SiltResult<Statement> {
        self.expect_keyword("ALTER")?;
        self.expect_keyword("TABLE")?;
        let table = self.expect_ident()?;
        self.expect_keyword("ADD")?;
        self.expect_keyword("COLUMN")?;
        let name = self.expect_ident()?;
        let data_type = self.expect_data_type()?;
        Ok(Statement::AlterTableAddColumn {
            table,
            column: ColumnDef::new(name, data_type),
        })
    }

    fn parse_insert(&mut self) -> SiltResult<Statement> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.expect_ident()?;
        self.expect_keyword("VALUES")?;
        self.expect_symbol("(")?;
        let mut values = vec![];
        loop {
            values.push(self.expect_literal()?);
            if self.match_symbol(",") {
                continue;
            }
            break;
        }
        self.expect_symbol(")")?;
        Ok(Statement::Insert { table, values })
    }

    fn parse_update(&mut self) -> SiltResult<Statement> {
        self.expect_keyword("UPDATE")?;
        let table = self.expect_ident()?;
        self.expect_keyword("SET")?;
        let mut assignments = vec![];
        loop {
            let column = self.expect_ident()?;
            self.expect_symbol("=")?;
            let value = self.expect_literal()?;
            assignments.push((column, value));
            if self.match_symbol(",") {
                continue;
            }
            break;
        }
        let predicate = self.parse_optional_where()?;
        Ok(Statement::Update {
            table,
            assignments,
            predicate,
        })
    }

    fn parse_delete(&mut self) -> SiltResult<Statement> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.expect_ident()?;
        let predicate = self.parse_optional_where()?;
        Ok(Statement::Delete { table, predicate })
    }

    /// Body of a SELECT; the SELECT keyword is already consumed.
    fn parse_select_body(&mut self) -> SiltResult<SelectStmt> {
        let mut projection = vec![];
        if self.match_symbol("*") {
            projection.push(SelectItem::Wildcard);
        } else {
            loop {
                projection.push(self.parse_select_item()?);
                if self.match_symbol(",") {
                    continue;
                }
                break;
            }
        }

        self.expect_keyword("FROM")?;
        let from = self.parse_table_ref()?;

        let mut joins = vec![];
        while self.match_keyword("INNER") {
            self.expect_keyword("JOIN")?;
            let table = self.parse_table_ref()?;
            self.expect_keyword("ON")?;
            let on = self.parse_expr()?;
            joins.push(JoinClause { table, on });
        }

        let predicate = self.parse_optional_where()?;

        let mut group_by = vec![];
        if self.match_keyword("GROUP") {
            self.expect_keyword("BY")?;
            loop {
                group_by.push(self.expect_ident()?);
                if self.match_symbol(",") {
                    continue;
                }
                break;
            }
        }

        let order_by = if self.match_keyword("ORDER") {
            self.expect_keyword("BY")?;
            Some(self.expect_ident()?)
        } else {
            None
        };

        let limit = if self.match_keyword("LIMIT") {
            let token = self.advance_token("a LIMIT count")?;
            if token.kind != TokenKind::IntLiteral {
                return Err(SiltError::Parse(format!(
                    "expected a LIMIT count, found '{}' at offset {}",
                    token.text, token.offset
                )));
            }
            Some(token.text.parse::<usize>().map_err(|_| {
                SiltError::Parse(format!("invalid LIMIT count '{}'", token.text))
            })?)
        } else {
            None
        };

        Ok(SelectStmt {
            projection,
            from,
            joins,
            predicate,
            group_by,
            order_by,
            limit,
        })
    }

    fn parse_select_item(&mut self) -> SiltResult<SelectItem> {
        let token = self.current()?;
        let func = if token.is_keyword("COUNT") {
            Some(AggregateFunc::Count)
        } else if token.is_keyword("SUM") {
            Some(AggregateFunc::Sum)
        } else if token.is_keyword("AVG") {
            Some(AggregateFunc::Avg)
        } else if token.is_keyword("MIN") {
            Some(AggregateFunc::Min)
        } else if token.is_keyword("MAX") {
            Some(AggregateFunc::Max)
        } else {
            None
        };

        if let Some(func) = func {
            self.advance();
            self.expect_symbol("(")?;
            let column = if self.match_symbol("*") {
                if func != AggregateFunc::Count {
                    return Err(SiltError::Parse(format!(
                        "'*' is only valid in COUNT, not {func}"
                    )));
                }
                None
            } else {
                Some(self.expect_ident()?)
            };
            self.expect_symbol(")")?;
            return Ok(SelectItem::Aggregate(AggregateCall { func, column }));
        }

        Ok(SelectItem::Column(self.expect_ident()?))
    }

    fn parse_table_ref(&mut self) -> SiltResult<TableRef> {
        let table = self.expect_ident()?;
        let alias = if self.match_keyword("AS") {
            Some(self.expect_ident()?)
        } else if self
            .peek()
            .map(|t| t.kind == TokenKind::Ident)
            .unwrap_or(false)
        {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(TableRef { table, alias })
    }

    fn parse_optional_where(&mut self) -> SiltResult<Option<Expr>> {
        if self.match_keyword("WHERE") {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    // expr := and_expr ('OR' and_expr)*, AND binding tighter than OR.
    fn parse_expr(&mut self) -> SiltResult<Expr> {
        let mut left = self.parse_and_expr()?;
        while self.match_keyword("OR") {
            let right = self.parse_and_expr()?;
            left = Expr::Binary(Box::new(BinaryExpr {
                left,
                op: BinaryOp::Or,
                right,
            }));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> SiltResult<Expr> {
        let mut left = self.parse_comparison()?;
        while self.match_keyword("AND") {
            let right = self.parse_comparison()?;
            left = Expr::Binary(Box::new(BinaryExpr {
                left,
                op: BinaryOp::And,
                right,
            }));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> SiltResult<Expr> {
        let left = self.parse_atom()?;
        let Some(op) = self.peek().and_then(comparison_op) else {
            return Ok(left);
        };
        self.advance();
        let right = self.parse_atom()?;
        Ok(Expr::Binary(Box::new(BinaryExpr { left, op, right })))
    }

    fn parse_atom(&mut self) -> SiltResult<Expr> {
        let token = self.current()?.clone();
        match token.kind {
            TokenKind::Symbol if token.text == "(" => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect_symbol(")")?;
                Ok(expr)
            }
            TokenKind::Ident => {
                self.advance();
                Ok(Expr::Column(token.text))
            }
            TokenKind::IntLiteral | TokenKind::FloatLiteral | TokenKind::StringLiteral => {
                Ok(Expr::Literal(self.expect_literal()?))
            }
            _ => Err(self.unexpected("a literal, column, or '('")),
        }
    }

    fn expect_literal(&mut self) -> SiltResult<Value> {
        let token = self.advance_token("a literal")?;
        match token.kind {
            TokenKind::IntLiteral => token.text.parse::<i32>().map(Value::Int).map_err(|_| {
                SiltError::Parse(format!(
                    "integer literal '{}' out of range at offset {}",
                    token.text, token.offset
                ))
            }),
            TokenKind::FloatLiteral => token.text.parse::<f64>().map(Value::Float).map_err(|_| {
                SiltError::Parse(format!(
                    "invalid float literal '{}' at offset {}",
                    token.text, token.offset
                ))
            }),
            TokenKind::StringLiteral => {
                Ok(Value::Text(token.text[1..token.text.len() - 1].to_string()))
            }
            _ => Err(SiltError::Parse(format!(
                "expected a literal, found '{}' at offset {}",
                token.text, token.offset
            ))),
        }
    }

    fn expect_data_type(&mut self) -> SiltResult<DataType> {
        let token = self.advance_token("a column type")?;
        if token.kind != TokenKind::Keyword {
            return Err(SiltError::Parse(format!(
                "expected a column type, found '{}' at offset {}",
                token.text, token.offset
            )));
        }
        DataType::parse(&token.text).map_err(|_| {
            SiltError::Parse(format!(
                "expected a column type, found '{}' at offset {}",
                token.text, token.offset
            ))
        })
    }

    fn expect_ident(&mut self) -> SiltResult<String> {
        let token = self.advance_token("an identifier")?;
        if token.kind != TokenKind::Ident {
            return Err(SiltError::Parse(format!(
                "expected an identifier, found '{}' at offset {}",
                token.text, token.offset
            )));
        }
        Ok(token.text)
    }

    fn expect_keyword(&mut self, keyword: &str) -> SiltResult<()> {
        let token = self.advance_token(keyword)?;
        if !token.is_keyword(keyword) {
            return Err(SiltError::Parse(format!(
                "expected {}, found '{}' at offset {}",
                keyword, token.text, token.offset
            )));
        }
        Ok(())
    }

    fn expect_symbol(&mut self, symbol: &str) -> SiltResult<()> {
        let token = self.advance_token(symbol)?;
        if !token.is_symbol(symbol) {
            return Err(SiltError::Parse(format!(
                "expected '{}', found '{}' at offset {}",
                symbol, token.text, token.offset
            )));
        }
        Ok(())
    }

    /// Consume the current token if it is the given keyword.
    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().map(|t| t.is_keyword(keyword)).unwrap_or(false) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_symbol(&mut self, symbol: &str) -> bool {
        if self.peek().map(|t| t.is_symbol(symbol)).unwrap_or(false) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current(&self) -> SiltResult<&Token> {
        self.peek()
            .ok_or_else(|| SiltError::Parse("unexpected end of input".to_string()))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn advance_token(&mut self, expected: &str) -> SiltResult<Token> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| SiltError::Parse(format!("expected {expected}, found end of input")))?;
        self.advance();
        Ok(token)
    }

    fn unexpected(&self, expected: &str) -> SiltError {
        match self.peek() {
            Some(token) => SiltError::Parse(format!(
                "expected {}, found '{}' at offset {}",
                expected, token.text, token.offset
            )),
            None => SiltError::Parse(format!("expected {expected}, found end of input")),
        }
    }

    fn expect_end(&mut self) -> SiltResult<()> {
        // A trailing semicolon is tolerated.
        self.match_symbol(";");
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(SiltError::Parse(format!(
                "unexpected trailing token '{}' at offset {}",
                token.text, token.offset
            ))),
        }
    }
}

fn comparison_op(token: &Token) -> Option<BinaryOp> {
    if token.kind != TokenKind::Symbol {
        return None;
    }
    match token.text.as_str() {
        "=" => Some(BinaryOp::Eq),
        "!=" => Some(BinaryOp::NotEq),
        ">" => Some(BinaryOp::Gt),
        ">=" => Some(BinaryOp::GtEq),
        "<" => Some(BinaryOp::Lt),
        "<=" => Some(BinaryOp::LtEq),
        _ => None,
    }
}
