//! Decoding of backend records whose field names and value types drift
//! between endpoints.
//!
//! Each accepted wire field is decoded into a [`Scalar`] variant and then read
//! through a fixed fallback chain. Every function here is total: missing
//! fields get documented defaults, and a field carrying a shape we do not
//! understand is treated as absent and logged at `warn` level.

use multidb_common::{DatabaseInstance, EngineType, Role, StudentInstance, User};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Numeric `status` the backend uses for a running instance.
pub const ACTIVE_STATUS_CODE: i64 = 2;

const ACTIVE_STATUS_NAMES: &[&str] = &["active", "activo"];

const DEFAULT_SERVER: &str = "localhost";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Other(Value),
}

impl Scalar {
    fn id(&self, field: &str) -> Option<String> {
        match self {
            Scalar::Int(n) => Some(n.to_string()),
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
            other => other.unrecognized(field),
        }
    }

    fn text(&self, field: &str) -> Option<String> {
        match self {
            Scalar::Text(s) => Some(s.clone()),
            Scalar::Int(n) => Some(n.to_string()),
            other => other.unrecognized(field),
        }
    }

    fn int(&self, field: &str) -> Option<i64> {
        match self {
            Scalar::Int(n) => Some(*n),
            Scalar::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Scalar::Text(s) => match s.trim().parse::<i64>() {
                Ok(n) => Some(n),
                Err(_) => self.unrecognized(field),
            },
            other => other.unrecognized(field),
        }
    }

    fn unrecognized<T>(&self, field: &str) -> Option<T> {
        warn!(field, value = ?self, "unrecognized field shape in backend payload");
        None
    }
}

fn first_text(field: &str, candidates: &[&Option<Scalar>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.as_ref())
        .find_map(|c| c.text(field))
}

fn record<T: for<'de> Deserialize<'de> + Default>(value: &Value, kind: &str) -> T {
    if !value.is_object() {
        warn!(kind, value = %value, "expected an object in backend payload");
        return T::default();
    }
    match serde_json::from_value(value.clone()) {
        Ok(wire) => wire,
        Err(e) => {
            warn!(kind, "could not decode backend record: {}", e);
            T::default()
        }
    }
}

fn placeholder_name(index: usize) -> String {
    format!("Instancia {}", index + 1)
}

// =======================================================================
// INSTANCES
// =======================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InstanceWire {
    id: Option<Scalar>,
    name: Option<Scalar>,
    database_name: Option<Scalar>,
    host: Option<Scalar>,
    server: Option<Scalar>,
    port: Option<Scalar>,
    user_name: Option<Scalar>,
    username: Option<Scalar>,
    create_at: Option<Scalar>,
    created_at: Option<Scalar>,
    user_email: Option<Scalar>,
    is_active: Option<Scalar>,
    status: Option<Scalar>,
    status_name: Option<Scalar>,
}

impl InstanceWire {
    fn is_active(&self) -> bool {
        if let Some(Scalar::Bool(true)) = self.is_active {
            return true;
        }
        if let Some(Scalar::Int(code)) = self.status {
            if code == ACTIVE_STATUS_CODE {
                return true;
            }
        }
        let name = match (&self.status_name, &self.status) {
            (Some(Scalar::Text(s)), _) if !s.trim().is_empty() => Some(s),
            (_, Some(Scalar::Text(s))) => Some(s),
            _ => None,
        };
        name.map(|s| {
            let lowered = s.trim().to_lowercase();
            ACTIVE_STATUS_NAMES.contains(&lowered.as_str())
        })
        .unwrap_or(false)
    }

    fn port(&self) -> u16 {
        self.port
            .as_ref()
            .and_then(|p| p.int("port"))
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(0)
    }
}

/// Reshapes one `/instances` record. `index` is its position in the listing.
pub fn normalize_instance(value: &Value, index: usize) -> DatabaseInstance {
    let wire: InstanceWire = record(value, "instance");

    DatabaseInstance {
        id: wire
            .id
            .as_ref()
            .and_then(|v| v.id("id"))
            .unwrap_or_else(|| index.to_string()),
        name: first_text("name", &[&wire.name, &wire.database_name])
            .unwrap_or_else(|| placeholder_name(index)),
        server: first_text("server", &[&wire.host, &wire.server])
            .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
        port: wire.port(),
        database_name: first_text("databaseName", &[&wire.database_name]).unwrap_or_default(),
        username: first_text("username", &[&wire.user_name, &wire.username]).unwrap_or_default(),
        created_at: first_text("createdAt", &[&wire.create_at, &wire.created_at])
            .unwrap_or_default(),
        created_by: first_text("createdBy", &[&wire.user_email, &wire.user_name])
            .unwrap_or_default(),
        is_active: wire.is_active(),
    }
}

pub fn normalize_instances(values: &[Value]) -> Vec<DatabaseInstance> {
    values
        .iter()
        .enumerate()
        .map(|(idx, v)| normalize_instance(v, idx))
        .collect()
}

// =======================================================================
// ASSIGNMENTS
// =======================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StudentInstanceWire {
    instance_id: Option<Scalar>,
    id: Option<Scalar>,
    instance_name: Option<Scalar>,
    name: Option<Scalar>,
    database_name: Option<Scalar>,
    assigned_at: Option<Scalar>,
    create_at: Option<Scalar>,
    created_at: Option<Scalar>,
    engine_type: Option<Scalar>,
    engine: Option<Scalar>,
}

fn engine_of(scalar: &Scalar, field: &str) -> Option<EngineType> {
    let engine = match scalar {
        Scalar::Int(code) => EngineType::from_code(*code),
        Scalar::Text(name) => EngineType::parse(name),
        other => return other.unrecognized(field),
    };
    if engine.is_none() {
        warn!(field, value = ?scalar, "unknown engine type");
    }
    engine
}

pub fn normalize_student_instance(value: &Value, index: usize) -> StudentInstance {
    let wire: StudentInstanceWire = record(value, "student instance");

    let instance_id = [&wire.instance_id, &wire.id]
        .into_iter()
        .filter_map(|c| c.as_ref())
        .find_map(|c| c.id("instanceId"))
        .unwrap_or_else(|| index.to_string());

    let engine_type = [(&wire.engine_type, "engineType"), (&wire.engine, "engine")]
        .into_iter()
        .find_map(|(c, field)| c.as_ref().map(|s| engine_of(s, field)))
        .flatten();

    StudentInstance {
        instance_id,
        instance_name: first_text(
            "instanceName",
            &[&wire.instance_name, &wire.name, &wire.database_name],
        )
        .unwrap_or_else(|| placeholder_name(index)),
        assigned_at: first_text(
            "assignedAt",
            &[&wire.assigned_at, &wire.create_at, &wire.created_at],
        )
        .unwrap_or_default(),
        database_name: first_text("databaseName", &[&wire.database_name, &wire.instance_name]),
        engine_type,
    }
}

pub fn normalize_student_instances(values: &[Value]) -> Vec<StudentInstance> {
    values
        .iter()
        .enumerate()
        .map(|(idx, v)| normalize_student_instance(v, idx))
        .collect()
}

// =======================================================================
// USERS
// =======================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UserWire {
    id: Option<Scalar>,
    user_name: Option<Scalar>,
    name: Option<Scalar>,
    display_name: Option<Scalar>,
    email: Option<Scalar>,
    role_id: Option<Scalar>,
    role: Option<Scalar>,
}

pub fn normalize_user(value: &Value, index: usize) -> User {
    let wire: UserWire = record(value, "user");

    let role = wire
        .role_id
        .as_ref()
        .and_then(|id| id.int("roleId"))
        .map(Role::from_role_id)
        .or_else(|| match &wire.role {
            Some(Scalar::Text(name)) => Role::parse(name),
            Some(Scalar::Int(id)) => Some(Role::from_role_id(*id)),
            _ => None,
        })
        .unwrap_or(Role::Student);

    User {
        id: wire
            .id
            .as_ref()
            .and_then(|v| v.id("id"))
            .unwrap_or_else(|| index.to_string()),
        email: first_text("email", &[&wire.email]).unwrap_or_default(),
        display_name: first_text("userName", &[&wire.user_name, &wire.name, &wire.display_name])
            .unwrap_or_default(),
        role,
    }
}

pub fn normalize_users(values: &[Value]) -> Vec<User> {
    values
        .iter()
        .enumerate()
        .map(|(idx, v)| normalize_user(v, idx))
        .collect()
}

/// Only records whose wire `roleId` is the student id. A missing or unknown
/// `roleId` resolves to [`Role::Student`] in [`normalize_user`] but is not
/// offered here.
pub fn normalize_students(values: &[Value]) -> Vec<User> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            let wire: UserWire = record(v, "user");
            wire.role_id.as_ref().and_then(|id| id.int("roleId")) == Some(Role::STUDENT_ROLE_ID)
        })
        .map(|(idx, v)| normalize_user(v, idx))
        .collect()
}
