//! Client-side form validation. Nothing here touches the network: a form
//! that fails validation is never sent.

use std::collections::BTreeMap;

use multidb_common::{
    AssignInstanceRequest, CreateInstanceRequest, EngineType, QueryRequest, RegisterRequest, Role,
};
use once_cell::sync::Lazy;
use regex::Regex;

pub type FieldResult = Result<(), &'static str>;
pub type Validator = fn(&str) -> FieldResult;

/// Field name to first failing message.
pub type FormErrors = BTreeMap<&'static str, &'static str>;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static INSTANCE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("valid instance name regex"));
static DATABASE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid database name regex"));

pub fn validate_email(email: &str) -> FieldResult {
    if email.is_empty() {
        return Err("Email is required");
    }
    if !EMAIL_RE.is_match(email) {
        return Err("Email format is not valid");
    }
    if email.chars().count() > 254 {
        return Err("Email is too long");
    }
    Ok(())
}

pub fn validate_password(password: &str) -> FieldResult {
    let len = password.chars().count();
    if password.is_empty() {
        return Err("Password is required");
    }
    if len < 6 {
        return Err("Password must be at least 6 characters");
    }
    if len > 100 {
        return Err("Password is too long");
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err("Password must contain at least one letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one number");
    }
    Ok(())
}

pub fn validate_name(name: &str) -> FieldResult {
    if name.is_empty() {
        return Err("Name is required");
    }
    if name.trim().chars().count() < 2 {
        return Err("Name must be at least 2 characters");
    }
    if name.chars().count() > 100 {
        return Err("Name is too long");
    }
    Ok(())
}

pub fn validate_instance_name(name: &str) -> FieldResult {
    if name.is_empty() {
        return Err("Instance name is required");
    }
    if name.trim().chars().count() < 3 {
        return Err("Instance name must be at least 3 characters");
    }
    if name.chars().count() > 50 {
        return Err("Instance name is too long");
    }
    if !INSTANCE_NAME_RE.is_match(name) {
        return Err("Only letters, numbers, hyphens and underscores");
    }
    Ok(())
}

pub fn validate_server(server: &str) -> FieldResult {
    if server.is_empty() {
        return Err("Server is required");
    }
    if server.trim().is_empty() {
        return Err("Server cannot be blank");
    }
    Ok(())
}

/// Parses a port typed into a form. Only whole numbers in 1..=65535 pass.
pub fn parse_port(input: &str) -> Result<u16, &'static str> {
    let n: i64 = input.trim().parse().map_err(|_| "Port must be a number")?;
    if !(1..=65535).contains(&n) {
        return Err("Port must be between 1 and 65535");
    }
    Ok(n as u16)
}

pub fn validate_port(input: &str) -> FieldResult {
    parse_port(input).map(|_| ())
}

pub fn validate_database_name(name: &str) -> FieldResult {
    if name.is_empty() {
        return Err("Database name is required");
    }
    if name.trim().is_empty() {
        return Err("Database name cannot be blank");
    }
    if name.chars().count() > 64 {
        return Err("Database name is too long");
    }
    if !DATABASE_NAME_RE.is_match(name) {
        return Err("Only letters, numbers and underscores");
    }
    Ok(())
}

pub fn validate_username(username: &str) -> FieldResult {
    if username.is_empty() {
        return Err("Username is required");
    }
    if username.trim().is_empty() {
        return Err("Username cannot be blank");
    }
    if username.chars().count() > 32 {
        return Err("Username is too long");
    }
    Ok(())
}

pub fn validate_sql_query(query: &str) -> FieldResult {
    if query.is_empty() {
        return Err("Query is required");
    }
    if query.trim().chars().count() < 5 {
        return Err("Query is too short");
    }
    if query.chars().count() > 10_000 {
        return Err("Query is too long");
    }
    Ok(())
}

fn required_selection(value: &str, message: &'static str) -> FieldResult {
    if value.trim().is_empty() {
        Err(message)
    } else {
        Ok(())
    }
}

/// Runs every `(field, value, validator)` triple and keeps the failures.
pub fn validate_form(fields: &[(&'static str, &str, Validator)]) -> FormErrors {
    fields
        .iter()
        .filter_map(|(field, value, check)| check(value).err().map(|msg| (*field, msg)))
        .collect()
}

fn into_result<T>(errors: FormErrors, ok: impl FnOnce() -> T) -> Result<T, FormErrors> {
    if errors.is_empty() {
        Ok(ok())
    } else {
        Err(errors)
    }
}

// =======================================================================
// FORMS
// =======================================================================

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub user_name: String,
    pub email: String,
    pub password: String,
    pub role: Option<Role>,
}

impl RegisterForm {
    /// New accounts are students unless another role is picked.
    pub fn validate(&self) -> Result<RegisterRequest, FormErrors> {
        let errors = validate_form(&[
            ("email", &self.email, validate_email),
            ("password", &self.password, validate_password),
            ("userName", &self.user_name, validate_name),
        ]);
        into_result(errors, || RegisterRequest {
            user_name: self.user_name.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            role_id: self.role.unwrap_or(Role::Student).role_id(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CreateInstanceForm {
    pub name: String,
    pub engine: Option<EngineType>,
    pub server: String,
    pub port: String,
    pub database_name: String,
    pub username: String,
    pub password: String,
}

impl Default for CreateInstanceForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            engine: None,
            server: "localhost".to_string(),
            port: "3306".to_string(),
            database_name: String::new(),
            username: "root".to_string(),
            password: String::new(),
        }
    }
}

impl CreateInstanceForm {
    pub fn validate(&self, owner_id: Option<&str>) -> Result<CreateInstanceRequest, FormErrors> {
        let errors = validate_form(&[
            ("name", &self.name, validate_instance_name),
            ("server", &self.server, validate_server),
            ("port", &self.port, validate_port),
            ("databaseName", &self.database_name, validate_database_name),
            ("username", &self.username, validate_username),
            ("password", &self.password, validate_password),
        ]);
        if !errors.is_empty() {
            return Err(errors);
        }
        let port = parse_port(&self.port).map_err(|msg| FormErrors::from([("port", msg)]))?;
        Ok(CreateInstanceRequest {
            name: self.name.trim().to_string(),
            engine_type: self.engine.map(|e| e.code()),
            server: self.server.trim().to_string(),
            port,
            database_name: self.database_name.clone(),
            username: self.username.trim().to_string(),
            password: self.password.clone(),
            user_id: owner_id.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssignForm {
    pub student_id: String,
    pub instance_id: String,
}

impl AssignForm {
    pub fn validate(&self) -> Result<AssignInstanceRequest, FormErrors> {
        let mut errors = FormErrors::new();
        if let Err(msg) = required_selection(&self.student_id, "Select a student") {
            errors.insert("studentId", msg);
        }
        if let Err(msg) = required_selection(&self.instance_id, "Select an instance") {
            errors.insert("instanceId", msg);
        }
        into_result(errors, || AssignInstanceRequest {
            student_id: self.student_id.trim().to_string(),
            instance_id: self.instance_id.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryForm {
    pub instance_id: String,
    pub query: String,
}

impl QueryForm {
    /// The query text is sent trimmed.
    pub fn validate(&self) -> Result<QueryRequest, FormErrors> {
        let mut errors = FormErrors::new();
        if let Err(msg) = required_selection(&self.instance_id, "Select an instance") {
            errors.insert("instanceId", msg);
        }
        if let Err(msg) = validate_sql_query(&self.query) {
            errors.insert("query", msg);
        }
        into_result(errors, || QueryRequest {
            instance_id: self.instance_id.clone(),
            query: self.query.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rules() {
        assert_eq!(
            validate_password("abc"),
            Err("Password must be at least 6 characters")
        );
        assert_eq!(validate_password("abc123"), Ok(()));
        assert_eq!(
            validate_password("abcdef"),
            Err("Password must contain at least one number")
        );
        assert_eq!(
            validate_password("123456"),
            Err("Password must contain at least one letter")
        );
        assert!(validate_password("").is_err());
        assert!(validate_password(&"a1".repeat(51)).is_err());
    }

    #[test]
    fn port_boundaries() {
        assert!(validate_port("0").is_err());
        assert!(validate_port("65536").is_err());
        assert!(validate_port("abc").is_err());
        assert!(validate_port("").is_err());
        assert_eq!(parse_port("1"), Ok(1));
        assert_eq!(parse_port(" 65535 "), Ok(65535));
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("ana@example.com").is_ok());
        assert!(validate_email("ana@example").is_err());
        assert!(validate_email("an a@example.com").is_err());
        assert!(validate_email("").is_err());
        let long = format!("{}@example.com", "a".repeat(250));
        assert_eq!(validate_email(&long), Err("Email is too long"));
    }

    #[test]
    fn instance_and_database_names() {
        assert!(validate_instance_name("lab_01-mysql").is_ok());
        assert!(validate_instance_name("ab").is_err());
        assert!(validate_instance_name("has space").is_err());
        assert!(validate_database_name("school_db").is_ok());
        assert!(validate_database_name("school-db").is_err());
        assert!(validate_database_name(&"d".repeat(65)).is_err());
    }

    #[test]
    fn sql_query_length() {
        assert!(validate_sql_query("   SHOW   ").is_err());
        assert!(validate_sql_query("SHOW TABLES;").is_ok());
        assert!(validate_sql_query(&"x".repeat(10_001)).is_err());
    }

    #[test]
    fn validate_form_collects_only_failures() {
        let errors = validate_form(&[
            ("email", "bad", validate_email),
            ("password", "abc123", validate_password),
            ("userName", "A", validate_name),
        ]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors["email"], "Email format is not valid");
        assert_eq!(errors["userName"], "Name must be at least 2 characters");
    }

    #[test]
    fn register_form_defaults_to_student() {
        let req = RegisterForm {
            user_name: " Ana ".into(),
            email: "ana@example.com".into(),
            password: "abc123".into(),
            role: None,
        }
        .validate()
        .unwrap();
        assert_eq!(req.role_id, Role::STUDENT_ROLE_ID);
        assert_eq!(req.user_name, "Ana");
    }

    #[test]
    fn create_instance_form_builds_request() {
        let form = CreateInstanceForm {
            name: "lab-pg".into(),
            engine: Some(EngineType::PostgreSql),
            port: "5432".into(),
            database_name: "school".into(),
            password: "secret1".into(),
            ..CreateInstanceForm::default()
        };
        let req = form.validate(Some("1")).unwrap();
        assert_eq!(req.port, 5432);
        assert_eq!(req.engine_type, Some(2));
        assert_eq!(req.server, "localhost");
        assert_eq!(req.user_id.as_deref(), Some("1"));
    }

    #[test]
    fn create_instance_form_reports_every_bad_field() {
        let form = CreateInstanceForm {
            name: "x".into(),
            port: "70000".into(),
            ..CreateInstanceForm::default()
        };
        let errors = form.validate(None).unwrap_err();
        assert!(errors.contains_key("name"));
        assert!(errors.contains_key("port"));
        assert!(errors.contains_key("databaseName"));
        assert!(errors.contains_key("password"));
        assert!(!errors.contains_key("server"));
    }

    #[test]
    fn assign_form_requires_both_selections() {
        let errors = AssignForm::default().validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(AssignForm {
            student_id: "2".into(),
            instance_id: "9".into()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn query_form_trims_text() {
        let req = QueryForm {
            instance_id: "9".into(),
            query: "  SELECT 1;  ".into(),
        }
        .validate()
        .unwrap();
        assert_eq!(req.query, "SELECT 1;");
    }
}
