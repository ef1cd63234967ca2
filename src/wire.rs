use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct RentlineHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RentlineQueryParser>,
}

impl RentlineHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RentlineQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::UpsertItem { id, name, unit, stock, price, update } => {
                let written = if update {
                    upsert_item(engine, id, name, unit, stock, price).await
                } else {
                    engine.create_item(id, name, unit, stock, price).await
                };
                written.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteItem { id } => {
                engine.delete_item(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::UpsertReservation { id, request, update } => {
                let written = if update {
                    upsert_reservation(engine, id, request).await
                } else {
                    engine.create_reservation(id, request).await
                };
                written.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                engine.delete_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertPayment { reservation_id, payment } => {
                engine
                    .record_payment(reservation_id, payment)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectItems => {
                let items = engine.list_items().await;
                let schema = Arc::new(items_schema());
                let rows: Vec<PgWireResult<_>> = items
                    .into_iter()
                    .map(|item| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&item.id.to_string())?;
                        encoder.encode_field(&item.name)?;
                        encoder.encode_field(&item.unit)?;
                        encoder.encode_field(&i64::from(item.stock))?;
                        encoder.encode_field(&item.price)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectReservations { item_id } => {
                let reservations = match item_id {
                    Some(item_id) => engine.reservations_for_item(item_id).await.map_err(engine_err)?,
                    None => engine.list_reservations(),
                };
                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .iter()
                    .map(|r| encode_reservation(&schema, r))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectPayments { reservation_id } => {
                let reservation = engine
                    .get_reservation(&reservation_id)
                    .ok_or(EngineError::NotFound(reservation_id))
                    .map_err(engine_err)?;
                let schema = Arc::new(payments_schema());
                let rid = reservation_id.to_string();
                let rows: Vec<PgWireResult<_>> = reservation
                    .payments
                    .iter()
                    .map(|p| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&p.id.to_string())?;
                        encoder.encode_field(&rid)?;
                        encoder.encode_field(&p.amount)?;
                        encoder.encode_field(&p.paid_on.to_string())?;
                        encoder.encode_field(&p.note)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAvailability { item_id, start, end, quantity, exclude } => {
                let outcome = engine
                    .check_availability(item_id, quantity, start, end, exclude)
                    .await;
                let (available, violation) = match outcome {
                    Ok(()) => (true, None),
                    Err(EngineError::Unavailable(v)) => (false, Some(v)),
                    Err(e) => return Err(engine_err(e)),
                };
                let total = match &violation {
                    Some(v) => v.total,
                    None => engine
                        .get_item(&item_id)
                        .await
                        .map(|i| i.stock)
                        .ok_or(EngineError::NotFound(item_id))
                        .map_err(engine_err)?,
                };

                let schema = Arc::new(availability_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&item_id.to_string())?;
                encoder.encode_field(&start.to_string())?;
                encoder.encode_field(&end.to_string())?;
                encoder.encode_field(&i64::from(quantity))?;
                encoder.encode_field(&available)?;
                encoder.encode_field(&violation.as_ref().map(|v| v.day.to_string()))?;
                encoder.encode_field(&violation.as_ref().map(|v| i64::from(v.reserved)))?;
                encoder.encode_field(&violation.as_ref().map(|v| v.available))?;
                encoder.encode_field(&i64::from(total))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectDaySummary { day } => {
                let summary = engine.day_summary(day).await;
                let schema = Arc::new(day_summary_schema());
                let rows: Vec<PgWireResult<_>> = summary
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.item_id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&i64::from(s.total))?;
                        encoder.encode_field(&i64::from(s.reserved))?;
                        encoder.encode_field(&i64::from(s.remaining))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectCalendar { item_id, start, end } => {
                let days = engine
                    .item_calendar(item_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<PgWireResult<_>> = days
                    .into_iter()
                    .map(|d| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&d.day.to_string())?;
                        encoder.encode_field(&i64::from(d.total))?;
                        encoder.encode_field(&i64::from(d.reserved))?;
                        encoder.encode_field(&i64::from(d.remaining))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

/// `ON CONFLICT (id) DO UPDATE` for items. A create that loses the race to a
/// concurrent create of the same id falls back to an update.
async fn upsert_item(
    engine: &Engine,
    id: Ulid,
    name: String,
    unit: String,
    stock: u32,
    price: Option<i64>,
) -> Result<Item, EngineError> {
    match engine.update_item(id, name.clone(), unit.clone(), stock, price).await {
        Err(EngineError::NotFound(missing)) if missing == id => {
            match engine.create_item(id, name.clone(), unit.clone(), stock, price).await {
                Err(EngineError::AlreadyExists(existing)) if existing == id => {
                    engine.update_item(id, name, unit, stock, price).await
                }
                other => other,
            }
        }
        other => other,
    }
}

/// `ON CONFLICT (id) DO UPDATE` for reservations, with the same create race fallback.
async fn upsert_reservation(
    engine: &Engine,
    id: Ulid,
    request: ReservationRequest,
) -> Result<Reservation, EngineError> {
    match engine.update_reservation(id, request.clone()).await {
        Err(EngineError::NotFound(missing)) if missing == id => {
            match engine.create_reservation(id, request.clone()).await {
                Err(EngineError::AlreadyExists(existing)) if existing == id => {
                    engine.update_reservation(id, request).await
                }
                other => other,
            }
        }
        other => other,
    }
}

fn encode_reservation(
    schema: &Arc<Vec<FieldInfo>>,
    r: &Reservation,
) -> PgWireResult<pgwire::messages::data::DataRow> {
    let items = serde_json::to_string(&r.line_items)
        .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.customer)?;
    encoder.encode_field(&r.range.start.to_string())?;
    encoder.encode_field(&r.range.end.to_string())?;
    encoder.encode_field(&r.status.to_string())?;
    encoder.encode_field(&items)?;
    encoder.encode_field(&r.notes)?;
    encoder.encode_field(&r.total_price)?;
    encoder.encode_field(&r.advance_payment)?;
    encoder.encode_field(&r.payment_due.map(|d| d.to_string()))?;
    encoder.encode_field(&r.amount_paid())?;
    Ok(encoder.take_row())
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn items_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name"), text("unit"), int8("quantity"), int8("price")]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("customer"),
        text("start"),
        text("end"),
        text("status"),
        text("items"),
        text("notes"),
        int8("total_price"),
        int8("advance_payment"),
        text("payment_due"),
        int8("amount_paid"),
    ]
}

fn payments_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("reservation_id"), int8("amount"), text("paid_on"), text("note")]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text("item_id"),
        text("start"),
        text("end"),
        int8("requested"),
        FieldInfo::new("available".into(), None, None, Type::BOOL, FieldFormat::Text),
        text("conflict_day"),
        int8("reserved"),
        int8("remaining"),
        int8("total"),
    ]
}

fn day_summary_schema() -> Vec<FieldInfo> {
    vec![text("item_id"), text("name"), int8("total"), int8("reserved"), int8("remaining")]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![text("day"), int8("total"), int8("reserved"), int8("remaining")]
}

/// Row description for a statement, by the table it selects from.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if !lower.trim_start().starts_with("select") {
        return Vec::new();
    }
    let tables: [(&str, fn() -> Vec<FieldInfo>); 6] = [
        ("items", items_schema),
        ("reservations", reservations_schema),
        ("payments", payments_schema),
        ("availability", availability_schema),
        ("day_summary", day_summary_schema),
        ("calendar", calendar_schema),
    ];
    tables
        .iter()
        .find(|(table, _)| lower.contains(&format!("from {table}")))
        .map(|(_, schema)| schema())
        .unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for RentlineHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RentlineQueryParser;

#[async_trait]
impl QueryParser for RentlineQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RentlineHandler {
    type Statement = String;
    type QueryParser = RentlineQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let mut responses = self.run(&sql).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder outside string literals.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let mut in_literal = false;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => in_literal = !in_literal,
            '$' if !in_literal => {
                let mut n = 0usize;
                while let Some(digit) = chars.peek().and_then(|d| d.to_digit(10)) {
                    n = n.saturating_mul(10).saturating_add(digit as usize);
                    chars.next();
                }
                max = max.max(n);
            }
            _ => {}
        }
    }
    max
}

/// Inline bound text parameters as quoted literals.
fn substitute_params(portal: &Portal<String>) -> String {
    let values: Vec<String> = portal
        .parameters
        .iter()
        .map(|param| match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        })
        .collect();
    inline_params(&portal.statement.statement, &values)
}

/// Replace each `$N` placeholder outside string literals with `values[N - 1]`
/// in a single left-to-right pass. Inserted text is never rescanned.
fn inline_params(sql: &str, values: &[String]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        } else if c == '$' && !in_literal {
            let mut end = i + 1;
            while let Some(&(j, digit)) = chars.peek() {
                if !digit.is_ascii_digit() {
                    break;
                }
                end = j + 1;
                chars.next();
            }
            let value = sql[i + 1..end]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|n| values.get(n));
            match value {
                Some(v) => out.push_str(v),
                None => out.push_str(&sql[i..end]),
            }
            continue;
        }
        out.push(c);
    }
    out
}

// ── Auth ─────────────────────────────────────────────────────────

/// One shared connection password; any user name is accepted.
#[derive(Debug)]
pub struct SharedPasswordAuth {
    password: String,
}

#[async_trait]
impl AuthSource for SharedPasswordAuth {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RentlineFactory {
    handler: Arc<RentlineHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPasswordAuth, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RentlineFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = SharedPasswordAuth { password };
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RentlineHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RentlineFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: RentlineFactory,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, None, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Unavailable(_) => "23P01",
        EngineError::ConcurrentWriteConflict(_) => "40001",
        EngineError::InvalidRange { .. } => "22008",
        EngineError::AlreadyExists(_) | EngineError::DuplicateName(_) => "23505",
        EngineError::ItemInUse(_) => "23503",
        EngineError::StockBelowReserved { .. } => "23514",
        EngineError::InvalidInput(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
