//! Terminal output for the page models.

use multidb_common::{DatabaseInstance, StudentInstance, User};
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::pages::{AssignPage, ExampleQuery, QuerySummary, QueryView, QueryWorkspace, UserRow};
use crate::validate::FormErrors;

/// Maximum cell width before truncation
const MAX_CELL_WIDTH: usize = 40;

fn truncate(value: &str) -> String {
    if value.chars().count() <= MAX_CELL_WIDTH {
        value.to_string()
    } else {
        let head: String = value.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{}...", head)
    }
}

fn table<I, R>(header: &[&str], rows: I) -> String
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    let mut builder = Builder::default();
    builder.push_record(header.iter().map(|h| h.to_string()));
    for row in rows {
        builder.push_record(row.into_iter().map(|c| truncate(&c)));
    }
    let mut table = builder.build();
    table.with(Style::modern());
    table.to_string()
}

pub fn form_errors(errors: &FormErrors) -> String {
    errors
        .iter()
        .map(|(field, msg)| format!("  {}: {}", field, msg))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn user_card(user: &User) -> String {
    format!(
        "{} <{}>\nRole: {}\nId: {}",
        user.display_name, user.email, user.role, user.id
    )
}

pub fn instances(list: &[DatabaseInstance]) -> String {
    if list.is_empty() {
        return "No instances yet. Create one with `multidb instances create`.".to_string();
    }
    table(
        &["ID", "NAME", "SERVER", "DATABASE", "USER", "CREATED", "STATUS"],
        list.iter().map(|i| {
            vec![
                i.id.clone(),
                i.name.clone(),
                format!("{}:{}", i.server, i.port),
                i.database_name.clone(),
                i.username.clone(),
                i.created_at.clone(),
                if i.is_active { "active" } else { "inactive" }.to_string(),
            ]
        }),
    )
}

pub fn student_instances(list: &[StudentInstance]) -> String {
    if list.is_empty() {
        return "No instances assigned. Ask an administrator to assign one.".to_string();
    }
    table(
        &["ID", "NAME", "ENGINE", "DATABASE", "ASSIGNED"],
        list.iter().map(|i| {
            vec![
                i.instance_id.clone(),
                i.instance_name.clone(),
                i.engine_type.map(|e| e.label().to_string()).unwrap_or_default(),
                i.database_name.clone().unwrap_or_default(),
                i.assigned_at.clone(),
            ]
        }),
    )
}

pub fn user_overview(rows: &[UserRow]) -> String {
    if rows.is_empty() {
        return "No users.".to_string();
    }
    table(
        &["ID", "NAME", "EMAIL", "ROLE", "INSTANCES", "UNASSIGN"],
        rows.iter().map(|row| {
            let assigned = if row.user.is_admin() {
                "-".to_string()
            } else if row.assignments.is_empty() {
                "none".to_string()
            } else {
                row.assignments
                    .iter()
                    .map(|a| a.instance_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            vec![
                row.user.id.clone(),
                row.user.display_name.clone(),
                row.user.email.clone(),
                row.user.role.to_string(),
                assigned,
                if row.can_unassign() { "yes" } else { "unavailable" }.to_string(),
            ]
        }),
    )
}

pub fn assign_page(page: &AssignPage) -> String {
    match page {
        AssignPage::Failed(msg) => format!("Error: {}", msg),
        AssignPage::Ready {
            students,
            instances,
        } => {
            let students_table = table(
                &["STUDENT ID", "NAME", "EMAIL"],
                students
                    .iter()
                    .map(|s| vec![s.id.clone(), s.display_name.clone(), s.email.clone()]),
            );
            format!(
                "Students\n{}\n\nInstances\n{}",
                students_table,
                self::instances(instances)
            )
        }
    }
}

pub fn examples(list: &[ExampleQuery]) -> String {
    list.iter()
        .map(|e| format!("  {:<18} {}", e.label, e.query))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn workspace(ws: &QueryWorkspace) -> String {
    match ws {
        QueryWorkspace::Empty => {
            "No instances assigned.\nAsk an administrator to assign you a database instance.".to_string()
        }
        QueryWorkspace::Ready { instances, .. } => {
            let active = match ws.active() {
                Some(i) => format!("Active instance: {} ({})", i.instance_name, ws.engine_label()),
                None => "No instance selected. Pass --instance <ID>.".to_string(),
            };
            format!(
                "{}\n\n{}\n\nExample {} queries:\n{}",
                student_instances(instances),
                active,
                ws.engine_label(),
                examples(&ws.examples())
            )
        }
    }
}

fn summary_lines(summary: &QuerySummary) -> Vec<String> {
    let mut lines = vec!["Query executed successfully".to_string()];
    if let Some(n) = summary.rows_affected {
        lines.push(format!("Rows affected: {}", n));
    }
    if let Some(msg) = &summary.message {
        lines.push(msg.clone());
    }
    if let Some(ms) = summary.execution_time {
        lines.push(format!("Took: {} ms", ms));
    }
    lines
}

pub fn query_view(view: &QueryView) -> String {
    match view {
        QueryView::Failed {
            error,
            execution_time,
        } => {
            let mut out = format!("Query error:\n  {}", error);
            if let Some(ms) = execution_time {
                out.push_str(&format!("\nTook: {} ms", ms));
            }
            out
        }
        QueryView::NoRows { summary } => {
            let mut lines = summary_lines(summary);
            lines.push("The query returned no rows.".to_string());
            lines.join("\n")
        }
        QueryView::Rows {
            columns,
            rows,
            summary,
        } => {
            let header: Vec<&str> = columns.iter().map(String::as_str).collect();
            let mut lines = summary_lines(summary);
            lines.push(table(&header, rows.iter().cloned()));
            lines.push(format!("{} rows, {} columns", rows.len(), columns.len()));
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multidb_common::Role;

    #[test]
    fn truncates_long_cells() {
        let long = "x".repeat(100);
        let out = truncate(&long);
        assert_eq!(out.chars().count(), MAX_CELL_WIDTH);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn no_rows_view_says_so() {
        let out = query_view(&QueryView::NoRows {
            summary: QuerySummary {
                rows_affected: Some(3),
                ..QuerySummary::default()
            },
        });
        assert!(out.contains("Rows affected: 3"));
        assert!(out.contains("no rows"));
        assert!(!out.contains("error"));
    }

    #[test]
    fn rows_view_has_headers_and_cells() {
        let out = query_view(&QueryView::Rows {
            columns: vec!["id".into(), "name".into()],
            rows: vec![vec!["1".into(), "Ana".into()]],
            summary: QuerySummary::default(),
        });
        assert!(out.contains("id"));
        assert!(out.contains("Ana"));
        assert!(out.contains("1 rows, 2 columns"));
    }

    #[test]
    fn empty_workspace_has_no_examples() {
        let out = workspace(&QueryWorkspace::Empty);
        assert!(out.contains("No instances assigned"));
        assert!(!out.contains("Example"));
    }

    #[test]
    fn overview_marks_unassign_unavailable() {
        let out = user_overview(&[UserRow {
            user: User {
                id: "2".into(),
                email: "ana@example.com".into(),
                display_name: "Ana".into(),
                role: Role::Student,
            },
            assignments: Vec::new(),
        }]);
        assert!(out.contains("unavailable"));
        assert!(out.contains("none"));
    }

    #[test]
    fn failed_assign_page_has_no_form() {
        let out = assign_page(&AssignPage::Failed("Server error".into()));
        assert_eq!(out, "Error: Server error");
    }
}
