//! Presentation models for each screen: what to show, computed from API
//! results, independent of how it gets drawn.

use multidb_common::{DatabaseInstance, EngineType, QueryResult, StudentInstance, User};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::api::{ApiClient, ApiError};
use crate::validate::{AssignForm, CreateInstanceForm, FormErrors, QueryForm};

/// Failure of a user action: either the form never left the client, or the
/// backend said no.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("{}", describe_fields(.0))]
    Invalid(FormErrors),

    #[error(transparent)]
    Api(#[from] ApiError),
}

fn describe_fields(errors: &FormErrors) -> String {
    errors
        .iter()
        .map(|(field, msg)| format!("{}: {}", field, msg))
        .collect::<Vec<_>>()
        .join("; ")
}

// =======================================================================
// INSTANCES
// =======================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum InstancesPage {
    Student(Vec<StudentInstance>),
    Admin(Vec<DatabaseInstance>),
}

pub async fn load_instances_page(api: &ApiClient, user: &User) -> Result<InstancesPage, ApiError> {
    if user.is_admin() {
        Ok(InstancesPage::Admin(api.instances().await?))
    } else {
        Ok(InstancesPage::Student(api.student_instances(None).await?))
    }
}

pub async fn create_instance(
    api: &ApiClient,
    form: &CreateInstanceForm,
    owner: &User,
) -> Result<DatabaseInstance, ActionError> {
    let req = form.validate(Some(&owner.id)).map_err(ActionError::Invalid)?;
    Ok(api.create_instance(&req).await?)
}

// =======================================================================
// ASSIGNMENT
// =======================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AssignPage {
    Ready {
        students: Vec<User>,
        instances: Vec<DatabaseInstance>,
    },
    /// One of the lists could not be loaded; no form is offered.
    Failed(String),
}

/// Fetches students and instances together. Either failing fails the page.
pub async fn load_assign_page(api: &ApiClient) -> AssignPage {
    match tokio::try_join!(api.students(), api.instances()) {
        Ok((students, instances)) => AssignPage::Ready {
            students,
            instances,
        },
        Err(e) => AssignPage::Failed(e.to_string()),
    }
}

pub async fn assign_instance(api: &ApiClient, form: &AssignForm) -> Result<(), ActionError> {
    let req = form.validate().map_err(ActionError::Invalid)?;
    Ok(api.assign_instance(&req).await?)
}

// =======================================================================
// USERS
// =======================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user: User,
    pub assignments: Vec<StudentInstance>,
}

impl UserRow {
    /// There is no unassign endpoint; the action is shown but never enabled.
    pub fn can_unassign(&self) -> bool {
        false
    }
}

/// Every user, with each student's assignments fetched concurrently. A
/// student whose assignments fail to load is shown with none.
pub async fn load_user_overview(api: &ApiClient) -> Result<Vec<UserRow>, ApiError> {
    let users = api.users().await?;

    let rows = users.into_iter().map(|user| async move {
        let assignments = if user.is_admin() {
            Vec::new()
        } else {
            match api.student_instances(Some(&user.id)).await {
                Ok(list) => list,
                Err(e) => {
                    warn!(student = %user.id, "could not load assignments: {}", e);
                    Vec::new()
                }
            }
        };
        UserRow { user, assignments }
    });

    Ok(futures::future::join_all(rows).await)
}

// =======================================================================
// QUERIES
// =======================================================================

pub fn engine_label(instance: Option<&StudentInstance>) -> String {
    match instance {
        Some(i) => match (i.engine_type, &i.database_name) {
            (Some(engine), _) => engine.label().to_string(),
            (None, Some(db)) => db.clone(),
            (None, None) => "SQL".to_string(),
        },
        None => "SQL".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleQuery {
    pub label: &'static str,
    pub query: String,
}

fn examples(pairs: &[(&'static str, &str)]) -> Vec<ExampleQuery> {
    pairs
        .iter()
        .map(|&(label, query)| ExampleQuery {
            label,
            query: query.to_string(),
        })
        .collect()
}

/// Starter queries for the instance's engine. MySQL syntax when unknown.
pub fn example_queries(instance: Option<&StudentInstance>) -> Vec<ExampleQuery> {
    match instance.and_then(|i| i.engine_type) {
        Some(EngineType::PostgreSql) => examples(&[
            ("Basic SELECT", "SELECT * FROM public.usuarios LIMIT 10;"),
            ("List tables", "SELECT table_name FROM information_schema.tables WHERE table_schema = 'public';"),
            ("Describe table", "SELECT column_name, data_type FROM information_schema.columns WHERE table_schema = 'public' AND table_name = 'usuarios';"),
            ("Count rows", "SELECT COUNT(*) FROM public.usuarios;"),
        ]),
        Some(EngineType::SqlServer) => examples(&[
            ("Basic SELECT", "SELECT TOP 10 * FROM dbo.usuarios;"),
            ("List tables", "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE='BASE TABLE';"),
            ("Describe table", "sp_help 'dbo.usuarios';"),
            ("Count rows", "SELECT COUNT(*) FROM dbo.usuarios;"),
        ]),
        Some(EngineType::MongoDb) => examples(&[
            ("List collections", "{ listCollections: 1 }"),
            ("First documents", "{ find: \"usuarios\", limit: 10 }"),
            ("Count documents", "{ count: \"usuarios\" }"),
            ("Describe schema", "{ find: \"usuarios\", limit: 1 }"),
        ]),
        Some(EngineType::Redis) => {
            let prefix = instance
                .and_then(|i| i.database_name.clone())
                .unwrap_or_else(|| "your_prefix".to_string());
            vec![
                ExampleQuery { label: "Ping", query: "PING".to_string() },
                ExampleQuery { label: "Set demo key", query: format!("SET {}:usuarios:99 demo", prefix) },
                ExampleQuery { label: "Get demo key", query: format!("GET {}:usuarios:1", prefix) },
                ExampleQuery { label: "List keys", query: format!("KEYS {}:usuarios:*", prefix) },
            ]
        }
        Some(EngineType::MySql) | None => examples(&[
            ("Basic SELECT", "SELECT * FROM usuarios LIMIT 10;"),
            ("Show tables", "SHOW TABLES;"),
            ("Describe table", "DESCRIBE usuarios;"),
            ("Count rows", "SELECT COUNT(*) FROM usuarios;"),
        ]),
    }
}

/// The student's query screen.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryWorkspace {
    /// No assignments: an empty-state message and no execution controls.
    Empty,
    Ready {
        instances: Vec<StudentInstance>,
        selected: Option<String>,
    },
}

impl QueryWorkspace {
    /// A single assignment is selected automatically.
    pub fn from_instances(instances: Vec<StudentInstance>, preselected: Option<String>) -> Self {
        if instances.is_empty() {
            return Self::Empty;
        }
        let selected = preselected.or_else(|| match instances.as_slice() {
            [only] => Some(only.instance_id.clone()),
            _ => None,
        });
        Self::Ready {
            instances,
            selected,
        }
    }

    pub async fn load(api: &ApiClient, preselected: Option<String>) -> Result<Self, ApiError> {
        let instances = api.student_instances(None).await?;
        Ok(Self::from_instances(instances, preselected))
    }

    pub fn active(&self) -> Option<&StudentInstance> {
        match self {
            Self::Ready {
                instances,
                selected: Some(id),
            } => instances.iter().find(|i| &i.instance_id == id),
            _ => None,
        }
    }

    pub fn selected_id(&self) -> Option<&str> {
        match self {
            Self::Ready { selected, .. } => selected.as_deref(),
            Self::Empty => None,
        }
    }

    pub fn has_controls(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn engine_label(&self) -> String {
        engine_label(self.active())
    }

    pub fn examples(&self) -> Vec<ExampleQuery> {
        example_queries(self.active())
    }

    pub async fn execute(&self, api: &ApiClient, query: &str) -> Result<QueryView, ActionError> {
        let form = QueryForm {
            instance_id: self.selected_id().unwrap_or_default().to_string(),
            query: query.to_string(),
        };
        let req = form.validate().map_err(ActionError::Invalid)?;
        let result = api.execute_query(&req).await?;
        Ok(QueryView::from_result(&result))
    }
}

/// How one query result is displayed.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryView {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        summary: QuerySummary,
    },
    /// Succeeded without returning rows (writes, empty selects).
    NoRows { summary: QuerySummary },
    Failed {
        error: String,
        execution_time: Option<f64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySummary {
    pub rows_affected: Option<i64>,
    pub message: Option<String>,
    pub execution_time: Option<f64>,
}

impl QueryView {
    pub fn from_result(result: &QueryResult) -> Self {
        if !result.success {
            let error = result
                .error
                .clone()
                .or_else(|| result.message.clone())
                .unwrap_or_else(|| "Query failed".to_string());
            return Self::Failed {
                error,
                execution_time: result.execution_time,
            };
        }

        let summary = QuerySummary {
            rows_affected: result.rows_affected,
            message: result.message.clone(),
            execution_time: result.execution_time,
        };

        let data = match result.data.as_deref() {
            Some(data) if !data.is_empty() => data,
            _ => return Self::NoRows { summary },
        };

        let columns = result
            .columns
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| infer_columns(data));

        let rows = data.iter().map(|row| cells(row, &columns)).collect();
        Self::Rows {
            columns,
            rows,
            summary,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

fn infer_columns(data: &[Value]) -> Vec<String> {
    match data.first() {
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(Value::Array(items)) => (0..items.len()).map(|i| format!("col{}", i + 1)).collect(),
        _ => vec!["value".to_string()],
    }
}

fn cells(row: &Value, columns: &[String]) -> Vec<String> {
    match row {
        Value::Object(map) => columns
            .iter()
            .map(|c| map.get(c).map(cell_text).unwrap_or_else(|| "NULL".to_string()))
            .collect(),
        Value::Array(items) => (0..columns.len())
            .map(|i| items.get(i).map(cell_text).unwrap_or_else(|| "NULL".to_string()))
            .collect(),
        scalar => vec![cell_text(scalar)],
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assignment(id: &str, engine: Option<EngineType>, db: Option<&str>) -> StudentInstance {
        StudentInstance {
            instance_id: id.into(),
            instance_name: format!("inst-{}", id),
            assigned_at: String::new(),
            database_name: db.map(str::to_string),
            engine_type: engine,
        }
    }

    #[test]
    fn empty_assignments_offer_no_controls() {
        let ws = QueryWorkspace::from_instances(Vec::new(), None);
        assert_eq!(ws, QueryWorkspace::Empty);
        assert!(!ws.has_controls());
        assert_eq!(ws.selected_id(), None);
    }

    #[test]
    fn single_assignment_is_auto_selected() {
        let ws = QueryWorkspace::from_instances(vec![assignment("7", None, None)], None);
        assert_eq!(ws.selected_id(), Some("7"));
        assert!(ws.has_controls());

        let many = QueryWorkspace::from_instances(
            vec![assignment("1", None, None), assignment("2", None, None)],
            None,
        );
        assert_eq!(many.selected_id(), None);
    }

    #[test]
    fn engine_label_fallbacks() {
        assert_eq!(engine_label(Some(&assignment("1", Some(EngineType::Redis), None))), "Redis");
        assert_eq!(engine_label(Some(&assignment("1", None, Some("school")))), "school");
        assert_eq!(engine_label(None), "SQL");
    }

    #[test]
    fn redis_examples_use_database_prefix() {
        let inst = assignment("1", Some(EngineType::Redis), Some("ana"));
        let ex = example_queries(Some(&inst));
        assert_eq!(ex[3].query, "KEYS ana:usuarios:*");
        assert_eq!(example_queries(None)[1].query, "SHOW TABLES;");
    }

    #[test]
    fn empty_success_is_no_rows_not_error() {
        let result = QueryResult {
            success: true,
            data: Some(vec![]),
            columns: Some(vec!["id".into()]),
            ..QueryResult::default()
        };
        let view = QueryView::from_result(&result);
        assert!(matches!(view, QueryView::NoRows { .. }));
        assert!(!view.is_error());
    }

    #[test]
    fn rows_follow_column_order_and_show_null() {
        let result = QueryResult {
            success: true,
            data: Some(vec![
                json!({"id": 1, "name": "Ana"}),
                json!({"id": 2, "name": null}),
            ]),
            columns: Some(vec!["name".into(), "id".into()]),
            execution_time: Some(3.5),
            ..QueryResult::default()
        };
        match QueryView::from_result(&result) {
            QueryView::Rows { columns, rows, summary } => {
                assert_eq!(columns, vec!["name", "id"]);
                assert_eq!(rows, vec![vec!["Ana", "1"], vec!["NULL", "2"]]);
                assert_eq!(summary.execution_time, Some(3.5));
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn failure_prefers_error_over_message() {
        let result = QueryResult {
            success: false,
            message: Some("generic".into()),
            error: Some("syntax error near FROM".into()),
            ..QueryResult::default()
        };
        assert_eq!(
            QueryView::from_result(&result),
            QueryView::Failed {
                error: "syntax error near FROM".into(),
                execution_time: None
            }
        );
    }

    #[test]
    fn invalid_action_error_lists_fields() {
        let err = ActionError::Invalid(FormErrors::from([("query", "Query is too short")]));
        assert_eq!(err.to_string(), "query: Query is too short");
    }
}
