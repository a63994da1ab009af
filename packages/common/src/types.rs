use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Principal role. The backend only ever speaks numeric `roleId`s; the
/// mapping lives here so every consumer agrees on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub const ADMIN_ROLE_ID: i64 = 1;
    pub const STUDENT_ROLE_ID: i64 = 2;

    /// Unknown ids fall back to the least privileged role.
    pub fn from_role_id(id: i64) -> Self {
        match id {
            Self::ADMIN_ROLE_ID => Self::Admin,
            _ => Self::Student,
        }
    }

    pub fn role_id(&self) -> i64 {
        match self {
            Self::Admin => Self::ADMIN_ROLE_ID,
            Self::Student => Self::STUDENT_ROLE_ID,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Admin => "Admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(alias = "name")]
    pub display_name: String,
    pub role: Role,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Database technology behind an instance, as its numeric wire code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EngineType {
    MySql,
    PostgreSql,
    MongoDb,
    Redis,
    SqlServer,
}

impl EngineType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::MySql),
            2 => Some(Self::PostgreSql),
            3 => Some(Self::MongoDb),
            4 => Some(Self::Redis),
            5 => Some(Self::SqlServer),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::MySql => 1,
            Self::PostgreSql => 2,
            Self::MongoDb => 3,
            Self::Redis => 4,
            Self::SqlServer => 5,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "mysql" => Some(Self::MySql),
            "postgresql" | "postgres" => Some(Self::PostgreSql),
            "mongodb" | "mongo" => Some(Self::MongoDb),
            "redis" => Some(Self::Redis),
            "sqlserver" | "sql server" | "mssql" => Some(Self::SqlServer),
            other => other.parse::<i64>().ok().and_then(Self::from_code),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::PostgreSql => "PostgreSQL",
            Self::MongoDb => "MongoDB",
            Self::Redis => "Redis",
            Self::SqlServer => "SQL Server",
        }
    }
}

impl std::fmt::Display for EngineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    pub id: String,
    pub name: String,
    pub server: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub created_at: String,
    pub created_by: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentInstance {
    pub instance_id: String,
    pub instance_name: String,
    pub assigned_at: String,
    pub database_name: Option<String>,
    pub engine_type: Option<EngineType>,
}

/// Outcome of one query execution. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryResult {
    pub success: bool,
    pub data: Option<Vec<Value>>,
    pub columns: Option<Vec<String>>,
    pub rows_affected: Option<i64>,
    pub execution_time: Option<f64>,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Identifier as the backend sends it: sometimes a number, sometimes a string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum WireId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for WireId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub role_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub id: WireId,
    #[serde(alias = "name")]
    pub user_name: String,
    pub email: String,
    #[serde(default = "student_role_id")]
    pub role_id: i64,
    pub token: Option<String>,
}

fn student_role_id() -> i64 {
    Role::STUDENT_ROLE_ID
}

impl AuthResponse {
    pub fn to_user(&self) -> User {
        User {
            id: self.id.to_string(),
            email: self.email.clone(),
            display_name: self.user_name.clone(),
            role: Role::from_role_id(self.role_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_type: Option<i64>,
    pub server: String,
    pub port: u16,
    pub database_name: String,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignInstanceRequest {
    pub student_id: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub instance_id: String,
    pub query: String,
}
