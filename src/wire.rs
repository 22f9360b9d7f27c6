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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, ReservationFilter};
use crate::tenant::{Fleet, TenantManager};

/// Actor recorded when the startup packet carries no user name.
const ANONYMOUS: &str = "anonymous";

/// Serve one client connection until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(MotorpoolFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password; the user name becomes the acting identity.
#[derive(Debug)]
pub struct SharedPasswordAuthSource {
    password: String,
}

impl SharedPasswordAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SharedPasswordAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Handler ──────────────────────────────────────────────────────

pub struct MotorpoolHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<MotorpoolQueryParser>,
}

impl MotorpoolHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(MotorpoolQueryParser),
        }
    }

    fn resolve_fleet<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Fleet>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let fleet = self.resolve_fleet(client)?;
        let actor = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| ANONYMOUS.to_string());
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&fleet.engine, &actor, cmd).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => {
                if let EngineError::Persistence(msg) = e {
                    tracing::warn!(command = label, "store failure: {msg}");
                }
                e.kind()
            }
        };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: &str,
        cmd: Command,
    ) -> Result<Vec<Response>, EngineError> {
        let response = match cmd {
            Command::InsertVehicle { id, name } => {
                engine.register_vehicle(id, name).await?;
                inserted()
            }
            Command::InsertDriver { id, name } => {
                engine.register_driver(id, name).await?;
                inserted()
            }
            Command::InsertReservation {
                id,
                vehicle_id,
                driver_id,
                start,
                end,
                purpose,
                notes,
            } => {
                engine
                    .create_reservation(NewReservation {
                        id,
                        vehicle_id,
                        driver_id,
                        start,
                        end,
                        purpose,
                        notes,
                        created_by: actor.to_string(),
                    })
                    .await?;
                inserted()
            }
            Command::UpdateReservation {
                id,
                start,
                end,
                purpose,
                notes,
            } => {
                engine
                    .update_reservation(
                        id,
                        ReservationChanges {
                            start,
                            end,
                            purpose,
                            notes,
                            updated_by: actor.to_string(),
                        },
                    )
                    .await?;
                inserted()
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(id, actor).await?;
                Response::Execution(Tag::new("DELETE").with_rows(1))
            }
            Command::Transition { id, to, note } => {
                match to {
                    ReservationStatus::Active => engine.activate_reservation(id).await?,
                    ReservationStatus::Completed => engine.complete_reservation(id, actor).await?,
                    ReservationStatus::Cancelled => engine.cancel_reservation(id, actor).await?,
                    ReservationStatus::Approved => engine.approve_reservation(id, actor).await?,
                    ReservationStatus::Rejected => engine.reject_reservation(id, actor, note).await?,
                    ReservationStatus::Pending => {
                        return Err(EngineError::transition(id, to, "reopen"));
                    }
                };
                inserted()
            }
            Command::Reassign {
                vehicle_id,
                driver_id,
            } => {
                engine.reassign_vehicle(vehicle_id, driver_id).await?;
                inserted()
            }
            Command::SetMaintenance {
                vehicle_id,
                enabled,
            } => {
                engine.set_vehicle_maintenance(vehicle_id, enabled).await?;
                inserted()
            }
            Command::SelectReservations { filter } => {
                let reservations = match filter {
                    ReservationFilter::All => engine.list_reservations(),
                    ReservationFilter::Id(id) => vec![engine.get_reservation(&id)?],
                    ReservationFilter::Vehicle(vid) => engine.list_reservations_by_vehicle(&vid),
                    ReservationFilter::Driver(did) => engine.list_reservations_by_driver(&did),
                    ReservationFilter::Status(status) => engine
                        .list_reservations()
                        .into_iter()
                        .filter(|r| r.status == status)
                        .collect(),
                };
                rows(reservation_schema(), &reservations, encode_reservation)
            }
            Command::SelectActiveReservations => rows(
                reservation_schema(),
                &engine.list_active_reservations(),
                encode_reservation,
            ),
            Command::SelectVehicles => rows(vehicle_schema(), &engine.list_vehicles(), encode_vehicle),
            Command::SelectDrivers => rows(driver_schema(), &engine.list_drivers(), encode_driver),
            Command::SelectConflicts {
                vehicle_id,
                start,
                end,
                exclude,
            } => {
                let conflict = engine.check_conflict(&vehicle_id, start, end, exclude)?;
                rows(conflict_schema(), &[conflict], |encoder, flag| {
                    encoder.encode_field(flag)
                })
            }
            Command::SelectAvailableVehicles { start, end, exclude } => {
                let vehicles = engine.list_available_vehicles(start, end, exclude)?;
                rows(vehicle_schema(), &vehicles, encode_vehicle)
            }
        };
        Ok(vec![response])
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn rows<T>(
    fields: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(fields);
    let data: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(data)))
}

fn encode_reservation(encoder: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    encoder.encode_field(&r.id.to_string())?;
    encoder.encode_field(&r.vehicle_id.to_string())?;
    encoder.encode_field(&r.driver_id.to_string())?;
    encoder.encode_field(&r.span.start)?;
    encoder.encode_field(&r.span.end)?;
    encoder.encode_field(&r.status.as_str())?;
    encoder.encode_field(&r.purpose)?;
    encoder.encode_field(&r.notes)?;
    encoder.encode_field(&r.created_by)?;
    encoder.encode_field(&r.approved_by)?;
    encoder.encode_field(&r.approved_at)?;
    encoder.encode_field(&r.rejected_by)?;
    encoder.encode_field(&r.rejection_note)?;
    encoder.encode_field(&r.rejected_at)?;
    encoder.encode_field(&r.updated_by)?;
    encoder.encode_field(&r.created_at)?;
    encoder.encode_field(&r.updated_at)
}

fn encode_vehicle(encoder: &mut DataRowEncoder, v: &Vehicle) -> PgWireResult<()> {
    encoder.encode_field(&v.id.to_string())?;
    encoder.encode_field(&v.name)?;
    encoder.encode_field(&v.status.as_str())?;
    encoder.encode_field(&v.current_driver.map(|d| d.to_string()))?;
    encoder.encode_field(&v.updated_at)
}

fn encode_driver(encoder: &mut DataRowEncoder, d: &Driver) -> PgWireResult<()> {
    encoder.encode_field(&d.id.to_string())?;
    encoder.encode_field(&d.name)?;
    encoder.encode_field(&d.status.as_str())?;
    encoder.encode_field(&d.assigned_vehicle.map(|v| v.to_string()))?;
    encoder.encode_field(&d.updated_at)
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("vehicle_id", Type::VARCHAR),
        field("driver_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("status", Type::VARCHAR),
        field("purpose", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("created_by", Type::VARCHAR),
        field("approved_by", Type::VARCHAR),
        field("approved_at", Type::INT8),
        field("rejected_by", Type::VARCHAR),
        field("rejection_note", Type::VARCHAR),
        field("rejected_at", Type::INT8),
        field("updated_by", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn vehicle_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("current_driver", Type::VARCHAR),
        field("updated_at", Type::INT8),
    ]
}

fn driver_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("assigned_vehicle", Type::VARCHAR),
        field("updated_at", Type::INT8),
    ]
}

fn conflict_schema() -> Vec<FieldInfo> {
    vec![field("conflict", Type::BOOL)]
}

/// Result columns for a statement that has not been bound yet. Only the
/// FROM target matters, so this works on text with `$N` placeholders.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABLE_VEHICLES") {
        vehicle_schema()
    } else if upper.contains("CONFLICTS") {
        conflict_schema()
    } else if upper.contains("RESERVATIONS") {
        reservation_schema()
    } else if upper.contains("VEHICLES") {
        vehicle_schema()
    } else if upper.contains("DRIVERS") {
        driver_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for MotorpoolHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MotorpoolQueryParser;

#[async_trait]
impl QueryParser for MotorpoolQueryParser {
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
impl ExtendedQueryHandler for MotorpoolHandler {
    type Statement = String;
    type QueryParser = MotorpoolQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
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
        let mut responses = self.run(client, &sql).await?;
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

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
            {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    // Highest index first so $1 never clobbers the prefix of $10.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct MotorpoolFactory {
    handler: Arc<MotorpoolHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SharedPasswordAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl MotorpoolFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SharedPasswordAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MotorpoolHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MotorpoolFactory {
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

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Conflict(_) => "23P01",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::Persistence(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
