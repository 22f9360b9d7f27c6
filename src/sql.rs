use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVehicle {
        id: Ulid,
        name: Option<String>,
    },
    InsertDriver {
        id: Ulid,
        name: Option<String>,
    },
    InsertReservation {
        id: Ulid,
        vehicle_id: Ulid,
        driver_id: Ulid,
        start: Ms,
        end: Ms,
        purpose: String,
        notes: Option<String>,
    },
    /// `INSERT INTO reservation_changes`: reschedule in place.
    UpdateReservation {
        id: Ulid,
        start: Ms,
        end: Ms,
        purpose: String,
        notes: Option<String>,
    },
    /// `DELETE FROM reservations`: reservations are never removed, only cancelled.
    CancelReservation {
        id: Ulid,
    },
    /// `INSERT INTO transitions`.
    Transition {
        id: Ulid,
        to: ReservationStatus,
        note: Option<String>,
    },
    /// `INSERT INTO assignments`.
    Reassign {
        vehicle_id: Ulid,
        driver_id: Option<Ulid>,
    },
    /// `INSERT INTO maintenance`.
    SetMaintenance {
        vehicle_id: Ulid,
        enabled: bool,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
    SelectActiveReservations,
    SelectVehicles,
    SelectDrivers,
    SelectConflicts {
        vehicle_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    },
    SelectAvailableVehicles {
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    },
}

#[derive(Debug, PartialEq)]
pub enum ReservationFilter {
    All,
    Id(Ulid),
    Vehicle(Ulid),
    Driver(Ulid),
    Status(ReservationStatus),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "vehicles" | "drivers" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("vehicles/drivers", 1, 0));
            }
            let id = parse_ulid(&values[0])?;
            let name = values.get(1).map(parse_string_or_null).transpose()?.flatten();
            if table == "vehicles" {
                Ok(Command::InsertVehicle { id, name })
            } else {
                Ok(Command::InsertDriver { id, name })
            }
        }
        "reservations" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("reservations", 5, values.len()));
            }
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                vehicle_id: parse_ulid(&values[1])?,
                driver_id: parse_ulid(&values[2])?,
                start: parse_i64(&values[3])?,
                end: parse_i64(&values[4])?,
                purpose: optional_text(&values, 5)?.unwrap_or_default(),
                notes: optional_text(&values, 6)?,
            })
        }
        "reservation_changes" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("reservation_changes", 3, values.len()));
            }
            Ok(Command::UpdateReservation {
                id: parse_ulid(&values[0])?,
                start: parse_i64(&values[1])?,
                end: parse_i64(&values[2])?,
                purpose: optional_text(&values, 3)?.unwrap_or_default(),
                notes: optional_text(&values, 4)?,
            })
        }
        "transitions" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("transitions", 2, values.len()));
            }
            let status = parse_string(&values[1])?;
            let to = ReservationStatus::parse(&status)
                .filter(|s| *s != ReservationStatus::Pending)
                .ok_or_else(|| SqlError::Parse(format!("cannot transition to '{status}'")))?;
            Ok(Command::Transition {
                id: parse_ulid(&values[0])?,
                to,
                note: optional_text(&values, 2)?,
            })
        }
        "assignments" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("assignments", 2, values.len()));
            }
            Ok(Command::Reassign {
                vehicle_id: parse_ulid(&values[0])?,
                driver_id: parse_ulid_or_null(&values[1])?,
            })
        }
        "maintenance" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("maintenance", 2, values.len()));
            }
            Ok(Command::SetMaintenance {
                vehicle_id: parse_ulid(&values[0])?,
                enabled: parse_bool(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::CancelReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Values pulled out of a WHERE clause of `AND`-ed comparisons.
#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    vehicle_id: Option<Ulid>,
    driver_id: Option<Ulid>,
    exclude_id: Option<Ulid>,
    status: Option<ReservationStatus>,
    start: Option<Ms>,
    end: Option<Ms>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "reservations" => {
            let filter = if let Some(id) = filters.id {
                ReservationFilter::Id(id)
            } else if let Some(vid) = filters.vehicle_id {
                ReservationFilter::Vehicle(vid)
            } else if let Some(did) = filters.driver_id {
                ReservationFilter::Driver(did)
            } else if let Some(status) = filters.status {
                ReservationFilter::Status(status)
            } else {
                ReservationFilter::All
            };
            Ok(Command::SelectReservations { filter })
        }
        "active_reservations" => Ok(Command::SelectActiveReservations),
        "vehicles" => Ok(Command::SelectVehicles),
        "drivers" => Ok(Command::SelectDrivers),
        "conflicts" => Ok(Command::SelectConflicts {
            vehicle_id: filters.vehicle_id.ok_or(SqlError::MissingFilter("vehicle_id"))?,
            start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
            exclude: filters.exclude_id,
        }),
        "available_vehicles" => Ok(Command::SelectAvailableVehicles {
            start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
            end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
            exclude: filters.exclude_id,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return Ok(());
    };
    let col = expr_column_name(left);
    match op {
        ast::BinaryOperator::And => {
            collect_filters(left, filters)?;
            collect_filters(right, filters)?;
        }
        ast::BinaryOperator::Eq => match col.as_deref() {
            Some("id") => filters.id = Some(parse_ulid_expr(right)?),
            Some("vehicle_id") => filters.vehicle_id = Some(parse_ulid_expr(right)?),
            Some("driver_id") => filters.driver_id = Some(parse_ulid_expr(right)?),
            Some("exclude_id") => filters.exclude_id = parse_ulid_or_null(right)?,
            Some("status") => {
                let s = parse_string(right)?;
                filters.status = Some(
                    ReservationStatus::parse(&s)
                        .ok_or_else(|| SqlError::Parse(format!("unknown status '{s}'")))?,
                );
            }
            _ => {}
        },
        ast::BinaryOperator::GtEq if col.as_deref() == Some("start") => {
            filters.start = Some(parse_i64_expr(right)?);
        }
        ast::BinaryOperator::LtEq if col.as_deref() == Some("end") => {
            filters.end = Some(parse_i64_expr(right)?);
        }
        _ => {}
    }
    Ok(())
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

/// First row of an `INSERT ... VALUES`. Multi-row inserts are refused so a
/// half-applied batch can't happen.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.len() {
            0 => Err(SqlError::Parse("empty VALUES".into())),
            1 => Ok(values.rows[0].clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

/// Trailing optional text column at `idx`: absent and NULL both mean `None`.
fn optional_text(values: &[Expr], idx: usize) -> Result<Option<String>, SqlError> {
    values.get(idx).map(parse_string_or_null).transpose().map(Option::flatten)
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at least {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const V: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const D: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const R: &str = "01HZY8Q2B7R4M6N0C9XWJ5KD3T";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_vehicle() {
        let cmd = parse_sql(&format!("INSERT INTO vehicles (id, name) VALUES ('{V}', 'Van 12')")).unwrap();
        assert_eq!(
            cmd,
            Command::InsertVehicle {
                id: ulid(V),
                name: Some("Van 12".into())
            }
        );
    }

    #[test]
    fn parse_insert_driver_without_name() {
        let cmd = parse_sql(&format!("INSERT INTO drivers (id) VALUES ('{D}')")).unwrap();
        assert_eq!(cmd, Command::InsertDriver { id: ulid(D), name: None });

        let cmd = parse_sql(&format!("INSERT INTO drivers (id, name) VALUES ('{D}', NULL)")).unwrap();
        assert_eq!(cmd, Command::InsertDriver { id: ulid(D), name: None });
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, vehicle_id, driver_id, start, "end", purpose, notes) VALUES ('{R}', '{V}', '{D}', 1000, 2000, 'airport run', NULL)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation {
                id,
                vehicle_id,
                driver_id,
                start,
                end,
                purpose,
                notes,
            } => {
                assert_eq!(id, ulid(R));
                assert_eq!(vehicle_id, ulid(V));
                assert_eq!(driver_id, ulid(D));
                assert_eq!((start, end), (1000, 2000));
                assert_eq!(purpose, "airport run");
                assert_eq!(notes, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_minimal() {
        let sql = format!(
            r#"INSERT INTO reservations (id, vehicle_id, driver_id, start, "end") VALUES ('{R}', '{V}', '{D}', 1000, 2000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertReservation { purpose, notes, .. } => {
                assert_eq!(purpose, "");
                assert_eq!(notes, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_too_few_values() {
        let sql = format!("INSERT INTO reservations (id, vehicle_id) VALUES ('{R}', '{V}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("reservations", 5, 2))));
    }

    #[test]
    fn parse_reservation_changes() {
        let sql = format!(
            r#"INSERT INTO reservation_changes (reservation_id, start, "end", purpose, notes) VALUES ('{R}', 3000, 4000, 'moved', 'client asked')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservation {
                id: ulid(R),
                start: 3000,
                end: 4000,
                purpose: "moved".into(),
                notes: Some("client asked".into()),
            }
        );
    }

    #[test]
    fn parse_delete_reservation_is_cancel() {
        let cmd = parse_sql(&format!("DELETE FROM reservations WHERE id = '{R}'")).unwrap();
        assert_eq!(cmd, Command::CancelReservation { id: ulid(R) });
    }

    #[test]
    fn parse_delete_other_tables_refused() {
        let sql = format!("DELETE FROM vehicles WHERE id = '{V}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "vehicles"));
        assert!(matches!(
            parse_sql("DELETE FROM reservations"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_transitions() {
        for (word, status) in [
            ("active", ReservationStatus::Active),
            ("completed", ReservationStatus::Completed),
            ("cancelled", ReservationStatus::Cancelled),
            ("approved", ReservationStatus::Approved),
        ] {
            let sql = format!("INSERT INTO transitions (reservation_id, status) VALUES ('{R}', '{word}')");
            assert_eq!(
                parse_sql(&sql).unwrap(),
                Command::Transition {
                    id: ulid(R),
                    to: status,
                    note: None
                }
            );
        }

        let sql = format!(
            "INSERT INTO transitions (reservation_id, status, note) VALUES ('{R}', 'rejected', 'no budget')"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Transition {
                id: ulid(R),
                to: ReservationStatus::Rejected,
                note: Some("no budget".into())
            }
        );
    }

    #[test]
    fn parse_transition_to_pending_refused() {
        let sql = format!("INSERT INTO transitions (reservation_id, status) VALUES ('{R}', 'pending')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
        let sql = format!("INSERT INTO transitions (reservation_id, status) VALUES ('{R}', 'parked')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_assignments() {
        let sql = format!("INSERT INTO assignments (vehicle_id, driver_id) VALUES ('{V}', '{D}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Reassign {
                vehicle_id: ulid(V),
                driver_id: Some(ulid(D))
            }
        );
        let sql = format!("INSERT INTO assignments (vehicle_id, driver_id) VALUES ('{V}', NULL)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::Reassign {
                vehicle_id: ulid(V),
                driver_id: None
            }
        );
    }

    #[test]
    fn parse_maintenance() {
        let sql = format!("INSERT INTO maintenance (vehicle_id, enabled) VALUES ('{V}', true)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetMaintenance {
                vehicle_id: ulid(V),
                enabled: true
            }
        );
        let sql = format!("INSERT INTO maintenance (vehicle_id, enabled) VALUES ('{V}', 'f')");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SetMaintenance { enabled: false, .. }
        ));
    }

    #[test]
    fn parse_select_reservations_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::All
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE id = '{R}'")).unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Id(ulid(R))
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE vehicle_id = '{V}'")).unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Vehicle(ulid(V))
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reservations WHERE driver_id = '{D}'")).unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Driver(ulid(D))
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM reservations WHERE status = 'Active'").unwrap(),
            Command::SelectReservations {
                filter: ReservationFilter::Status(ReservationStatus::Active)
            }
        );
    }

    #[test]
    fn parse_select_simple_tables() {
        assert_eq!(parse_sql("SELECT * FROM vehicles").unwrap(), Command::SelectVehicles);
        assert_eq!(parse_sql("SELECT * FROM drivers").unwrap(), Command::SelectDrivers);
        assert_eq!(
            parse_sql("SELECT * FROM active_reservations").unwrap(),
            Command::SelectActiveReservations
        );
    }

    #[test]
    fn parse_select_conflicts() {
        let sql = format!(
            r#"SELECT * FROM conflicts WHERE vehicle_id = '{V}' AND start >= 1000 AND "end" <= 2000 AND exclude_id = '{R}'"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectConflicts {
                vehicle_id: ulid(V),
                start: 1000,
                end: 2000,
                exclude: Some(ulid(R)),
            }
        );

        let missing = r#"SELECT * FROM conflicts WHERE start >= 1000 AND "end" <= 2000"#;
        assert!(matches!(parse_sql(missing), Err(SqlError::MissingFilter("vehicle_id"))));
    }

    #[test]
    fn parse_select_available_vehicles() {
        let sql = r#"SELECT * FROM available_vehicles WHERE start >= 1000 AND "end" <= 2000"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectAvailableVehicles {
                start: 1000,
                end: 2000,
                exclude: None
            }
        );
        let no_end = "SELECT * FROM available_vehicles WHERE start >= 1000";
        assert!(matches!(parse_sql(no_end), Err(SqlError::MissingFilter("end"))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO fuel_logs (id) VALUES ('{V}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
        assert!(matches!(parse_sql("SELECT * FROM invoices"), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_multi_row_insert_refused() {
        let sql = format!("INSERT INTO vehicles (id) VALUES ('{V}'), ('{D}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_bad_ulid_errors() {
        assert!(matches!(
            parse_sql("INSERT INTO vehicles (id) VALUES ('not-a-ulid')"),
            Err(SqlError::Parse(_))
        ));
    }

    #[test]
    fn parse_update_statement_unsupported() {
        let sql = format!("UPDATE reservations SET purpose = 'x' WHERE id = '{R}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
