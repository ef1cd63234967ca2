use sqlparser::ast::{
    self, Expr, FromTable, ObjectNamePart, OnConflictAction, OnInsert, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `update` is set by `ON CONFLICT (id) DO UPDATE`: replace the item if it
    /// exists, create it otherwise.
    UpsertItem {
        id: Ulid,
        name: String,
        unit: String,
        stock: u32,
        price: Option<i64>,
        update: bool,
    },
    DeleteItem {
        id: Ulid,
    },
    UpsertReservation {
        id: Ulid,
        request: ReservationRequest,
        update: bool,
    },
    DeleteReservation {
        id: Ulid,
    },
    InsertPayment {
        reservation_id: Ulid,
        payment: Payment,
    },
    SelectItems,
    SelectReservations {
        item_id: Option<Ulid>,
    },
    SelectPayments {
        reservation_id: Ulid,
    },
    SelectAvailability {
        item_id: Ulid,
        start: Day,
        end: Day,
        quantity: u32,
        exclude: Option<Ulid>,
    },
    SelectDaySummary {
        day: Day,
    },
    SelectCalendar {
        item_id: Ulid,
        start: Day,
        end: Day,
    },
}

const ITEM_COLUMNS: &[&str] = &["id", "name", "unit", "quantity", "price"];
const RESERVATION_COLUMNS: &[&str] = &[
    "id",
    "customer",
    "start",
    "end",
    "status",
    "items",
    "notes",
    "total_price",
    "advance_payment",
    "payment_due",
];
const PAYMENT_COLUMNS: &[&str] = &["id", "reservation_id", "amount", "paid_on", "note"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let update = upsert_mode(insert)?;

    match table.as_str() {
        "items" => {
            let row = Row::new("items", ITEM_COLUMNS, insert)?;
            Ok(Command::UpsertItem {
                id: parse_ulid(row.required("id")?)?,
                name: parse_string(row.required("name")?)?,
                unit: row.get("unit").map(parse_opt_string).transpose()?.flatten().unwrap_or_default(),
                stock: parse_u32(row.required("quantity")?)?,
                price: row.get("price").map(parse_opt_i64).transpose()?.flatten(),
                update,
            })
        }
        "reservations" => {
            let row = Row::new("reservations", RESERVATION_COLUMNS, insert)?;
            let status = match row.get("status").map(parse_opt_string).transpose()?.flatten() {
                Some(s) => s.parse().map_err(SqlError::Parse)?,
                None => ReservationStatus::Draft,
            };
            let request = ReservationRequest {
                customer: row.get("customer").map(parse_opt_string).transpose()?.flatten().unwrap_or_default(),
                start: parse_day(row.required("start")?)?,
                end: parse_day(row.required("end")?)?,
                status,
                line_items: parse_line_items(row.required("items")?)?,
                notes: row.get("notes").map(parse_opt_string).transpose()?.flatten(),
                total_price: row.get("total_price").map(parse_opt_i64).transpose()?.flatten(),
                advance_payment: row.get("advance_payment").map(parse_opt_i64).transpose()?.flatten(),
                payment_due: row.get("payment_due").map(parse_opt_day).transpose()?.flatten(),
            };
            Ok(Command::UpsertReservation {
                id: parse_ulid(row.required("id")?)?,
                request,
                update,
            })
        }
        "payments" => {
            if update {
                return Err(SqlError::Unsupported("payments cannot be updated".into()));
            }
            let row = Row::new("payments", PAYMENT_COLUMNS, insert)?;
            Ok(Command::InsertPayment {
                reservation_id: parse_ulid(row.required("reservation_id")?)?,
                payment: Payment {
                    id: parse_ulid(row.required("id")?)?,
                    amount: parse_i64(row.required("amount")?)?,
                    paid_on: parse_day(row.required("paid_on")?)?,
                    note: row.get("note").map(parse_opt_string).transpose()?.flatten(),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `ON CONFLICT ... DO UPDATE` turns an insert into a full replacement. The
/// SET list is not interpreted: the VALUES row is the new record.
fn upsert_mode(insert: &ast::Insert) -> Result<bool, SqlError> {
    match &insert.on {
        None => Ok(false),
        Some(OnInsert::OnConflict(conflict)) => match &conflict.action {
            OnConflictAction::DoUpdate(_) => Ok(true),
            OnConflictAction::DoNothing => {
                Err(SqlError::Unsupported("ON CONFLICT DO NOTHING".into()))
            }
        },
        Some(_) => Err(SqlError::Unsupported("ON DUPLICATE KEY UPDATE".into())),
    }
}

/// One VALUES row, addressed by column name. Without an explicit column list
/// the table's declared column order applies.
struct Row<'a> {
    table: &'static str,
    values: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn new(
        table: &'static str,
        declared: &[&str],
        insert: &'a ast::Insert,
    ) -> Result<Self, SqlError> {
        let source = insert
            .source
            .as_ref()
            .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
        let rows = match source.body.as_ref() {
            SetExpr::Values(values) => &values.rows,
            _ => return Err(SqlError::Parse("expected VALUES".into())),
        };
        let row = match rows.as_slice() {
            [] => return Err(SqlError::Parse("empty VALUES".into())),
            [row] => row,
            _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
        };

        let columns: Vec<String> = if insert.columns.is_empty() {
            declared.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if row.len() != columns.len() && !(insert.columns.is_empty() && row.len() < columns.len()) {
            return Err(SqlError::WrongArity(table, columns.len(), row.len()));
        }
        if let Some(unknown) = columns.iter().find(|c| !declared.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(table, unknown.clone()));
        }

        Ok(Self {
            table,
            values: columns.into_iter().zip(row.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.values.iter().find(|(c, _)| c == column).map(|(_, e)| *e)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;
    let id = parse_ulid(filters.eq("id").ok_or(SqlError::MissingFilter("id"))?)?;

    match table.as_str() {
        "items" => Ok(Command::DeleteItem { id }),
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "items" => Ok(Command::SelectItems),
        "reservations" => Ok(Command::SelectReservations {
            item_id: filters.eq("item_id").map(parse_ulid).transpose()?,
        }),
        "payments" => Ok(Command::SelectPayments {
            reservation_id: parse_ulid(filters.require_eq("reservation_id")?)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            item_id: parse_ulid(filters.require_eq("item_id")?)?,
            start: parse_day(filters.ge("start").ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_day(filters.le("end").ok_or(SqlError::MissingFilter("end"))?)?,
            quantity: parse_u32(filters.require_eq("quantity")?)?,
            exclude: filters.eq("exclude").map(parse_opt_ulid).transpose()?.flatten(),
        }),
        "day_summary" => Ok(Command::SelectDaySummary {
            day: parse_day(filters.require_eq("day")?)?,
        }),
        "calendar" => Ok(Command::SelectCalendar {
            item_id: parse_ulid(filters.require_eq("item_id")?)?,
            start: parse_day(filters.ge("start").ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_day(filters.le("end").ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flattened `col op value` terms of an AND-only WHERE clause.
#[derive(Default)]
struct Filters<'a> {
    terms: Vec<(String, ast::BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Self::default();
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
                self.collect(left)?;
                self.collect(right)
            }
            Expr::BinaryOp { left, op, right } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                match op {
                    ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq => {
                        self.terms.push((col, op.clone(), &**right));
                        Ok(())
                    }
                    _ => Err(SqlError::Unsupported(format!("operator {op}"))),
                }
            }
            _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
        }
    }

    fn find(&self, column: &str, want: ast::BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, op, _)| c == column && *op == want)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, ast::BinaryOperator::Eq)
    }

    fn require_eq(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }

    fn ge(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, ast::BinaryOperator::GtEq)
    }

    fn le(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, ast::BinaryOperator::LtEq)
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Text of a literal: quoted strings as-is, numbers in their source form.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
}

fn parse_opt_ulid(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_ulid(expr).map(Some) }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_opt_string(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_string(expr).map(Some) }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_i64(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}")))
}

fn parse_opt_i64(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_i64(expr).map(Some) }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of range for a quantity")))
}

fn parse_day(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_string(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad date {s:?} (expected YYYY-MM-DD): {e}")))
}

fn parse_opt_day(expr: &Expr) -> Result<Option<Day>, SqlError> {
    if is_null(expr) { Ok(None) } else { parse_day(expr).map(Some) }
}

/// `items` column: JSON array of `{"item_id": "...", "quantity": n}`.
fn parse_line_items(expr: &Expr) -> Result<Vec<LineItem>, SqlError> {
    let s = parse_string(expr)?;
    serde_json::from_str(&s).map_err(|e| SqlError::Parse(format!("bad items JSON: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: missing column {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ITEM: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn d(s: &str) -> Day {
        s.parse().unwrap()
    }

    #[test]
    fn insert_item_with_columns() {
        let sql = format!(
            "INSERT INTO items (id, name, unit, quantity, price) VALUES ('{ID}', 'Chairs', 'pcs', 100, 250)"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertItem { id, name, unit, stock, price, update } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, "Chairs");
                assert_eq!(unit, "pcs");
                assert_eq!(stock, 100);
                assert_eq!(price, Some(250));
                assert!(!update);
            }
            cmd => panic!("expected UpsertItem, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_item_positional_with_trailing_defaults() {
        let sql = format!("INSERT INTO items VALUES ('{ID}', 'Tables', 'pcs', 10)");
        match parse_sql(&sql).unwrap() {
            Command::UpsertItem { stock, price, .. } => {
                assert_eq!(stock, 10);
                assert_eq!(price, None);
            }
            cmd => panic!("expected UpsertItem, got {cmd:?}"),
        }
    }

    #[test]
    fn insert_item_columns_in_any_order() {
        let sql = format!("INSERT INTO items (quantity, name, id) VALUES (5, 'Tents', '{ID}')");
        match parse_sql(&sql).unwrap() {
            Command::UpsertItem { name, stock, unit, .. } => {
                assert_eq!(name, "Tents");
                assert_eq!(stock, 5);
                assert_eq!(unit, "");
            }
            cmd => panic!("expected UpsertItem, got {cmd:?}"),
        }
    }

    #[test]
    fn upsert_item_on_conflict() {
        let sql = format!(
            "INSERT INTO items (id, name, quantity) VALUES ('{ID}', 'Chairs', 120) \
             ON CONFLICT (id) DO UPDATE SET quantity = EXCLUDED.quantity"
        );
        assert!(matches!(parse_sql(&sql).unwrap(), Command::UpsertItem { update: true, stock: 120, .. }));
    }

    #[test]
    fn on_conflict_do_nothing_is_rejected() {
        let sql = format!("INSERT INTO items (id, name, quantity) VALUES ('{ID}', 'Chairs', 1) ON CONFLICT DO NOTHING");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn negative_quantity_is_rejected() {
        let sql = format!("INSERT INTO items (id, name, quantity) VALUES ('{ID}', 'Chairs', -1)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let sql = format!("INSERT INTO items (id, name, colour) VALUES ('{ID}', 'Chairs', 'red')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("items", _))));
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let sql = format!("INSERT INTO items (id, name) VALUES ('{ID}', 'Chairs')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingColumn("items", "quantity"))));
    }

    #[test]
    fn insert_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, customer, start, "end", status, items, notes, total_price)
               VALUES ('{ID}', 'Harbour Events', '2024-11-04', '2024-11-08', 'confirmed',
                       '[{{"item_id": "{ITEM}", "quantity": 40}}]', 'hall B', 12000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertReservation { id, request, update } => {
                assert_eq!(id.to_string(), ID);
                assert!(!update);
                assert_eq!(request.customer, "Harbour Events");
                assert_eq!(request.start, d("2024-11-04"));
                assert_eq!(request.end, d("2024-11-08"));
                assert_eq!(request.status, ReservationStatus::Confirmed);
                assert_eq!(request.line_items.len(), 1);
                assert_eq!(request.line_items[0].item_id.to_string(), ITEM);
                assert_eq!(request.line_items[0].quantity, 40);
                assert_eq!(request.notes.as_deref(), Some("hall B"));
                assert_eq!(request.total_price, Some(12000));
                assert_eq!(request.payment_due, None);
            }
            cmd => panic!("expected UpsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn reservation_status_defaults_to_draft() {
        let sql = format!(
            r#"INSERT INTO reservations (id, start, "end", items)
               VALUES ('{ID}', '2024-11-04', '2024-11-04', '[{{"item_id": "{ITEM}", "quantity": 1}}]')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertReservation { request, .. } => {
                assert_eq!(request.status, ReservationStatus::Draft);
                assert_eq!(request.customer, "");
            }
            cmd => panic!("expected UpsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn reservation_bad_json_and_bad_date() {
        let bad_json = format!(
            r#"INSERT INTO reservations (id, start, "end", items) VALUES ('{ID}', '2024-11-04', '2024-11-05', 'not json')"#
        );
        assert!(matches!(parse_sql(&bad_json), Err(SqlError::Parse(_))));

        let bad_date = format!(
            r#"INSERT INTO reservations (id, start, "end", items) VALUES ('{ID}', '2024-13-04', '2024-11-05', '[]')"#
        );
        assert!(matches!(parse_sql(&bad_date), Err(SqlError::Parse(_))));
    }

    #[test]
    fn insert_payment() {
        let sql = format!(
            "INSERT INTO payments (id, reservation_id, amount, paid_on, note) \
             VALUES ('{ITEM}', '{ID}', 3000, '2024-10-20', NULL)"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertPayment { reservation_id, payment } => {
                assert_eq!(reservation_id.to_string(), ID);
                assert_eq!(payment.amount, 3000);
                assert_eq!(payment.paid_on, d("2024-10-20"));
                assert_eq!(payment.note, None);
            }
            cmd => panic!("expected InsertPayment, got {cmd:?}"),
        }
    }

    #[test]
    fn delete_statements() {
        let item = parse_sql(&format!("DELETE FROM items WHERE id = '{ID}'")).unwrap();
        assert!(matches!(item, Command::DeleteItem { .. }));
        let res = parse_sql(&format!("DELETE FROM reservations WHERE id = '{ID}'")).unwrap();
        assert!(matches!(res, Command::DeleteReservation { .. }));
        assert!(matches!(
            parse_sql("DELETE FROM reservations"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn select_availability() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE item_id = '{ITEM}' AND start >= '2024-11-06' AND "end" <= '2024-11-11' AND quantity = 70"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                item_id: Ulid::from_string(ITEM).unwrap(),
                start: d("2024-11-06"),
                end: d("2024-11-11"),
                quantity: 70,
                exclude: None,
            }
        );
    }

    #[test]
    fn select_availability_with_exclude_and_parentheses() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE (item_id = '{ITEM}' AND quantity = '5') AND start >= '2024-11-01' AND "end" <= '2024-11-10' AND exclude = '{ID}'"#
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAvailability { quantity, exclude, .. } => {
                assert_eq!(quantity, 5);
                assert_eq!(exclude.map(|u| u.to_string()).as_deref(), Some(ID));
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn select_availability_requires_quantity() {
        let sql = format!(
            r#"SELECT * FROM availability WHERE item_id = '{ITEM}' AND start >= '2024-11-06' AND "end" <= '2024-11-11'"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("quantity"))));
    }

    #[test]
    fn select_listings() {
        assert_eq!(parse_sql("SELECT * FROM items").unwrap(), Command::SelectItems);
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations { item_id: None }
        );
        let filtered = parse_sql(&format!("SELECT * FROM reservations WHERE item_id = '{ITEM}'")).unwrap();
        assert!(matches!(filtered, Command::SelectReservations { item_id: Some(_) }));
        let payments = parse_sql(&format!("SELECT * FROM payments WHERE reservation_id = '{ID}'")).unwrap();
        assert!(matches!(payments, Command::SelectPayments { .. }));
    }

    #[test]
    fn select_day_summary_and_calendar() {
        assert_eq!(
            parse_sql("SELECT * FROM day_summary WHERE day = '2024-11-06'").unwrap(),
            Command::SelectDaySummary { day: d("2024-11-06") }
        );
        let sql = format!(
            r#"SELECT * FROM calendar WHERE item_id = '{ITEM}' AND start >= '2024-11-01' AND "end" <= '2024-11-30'"#
        );
        assert!(matches!(parse_sql(&sql).unwrap(), Command::SelectCalendar { .. }));
    }

    #[test]
    fn unsupported_operator_in_filter() {
        let sql = format!("SELECT * FROM reservations WHERE item_id <> '{ITEM}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn unknown_table_errors() {
        assert!(matches!(
            parse_sql(&format!("INSERT INTO foobar (id) VALUES ('{ID}')")),
            Err(SqlError::UnknownTable(_))
        ));
        assert!(matches!(parse_sql("SELECT * FROM foobar"), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
