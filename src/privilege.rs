//! Privilege Inspector (`spec.md` §4.2).
//!
//! Refuses to admit a source account that holds anything beyond
//! read-only capability. Called once per source by the Executor and
//! cached by the caller until the `SourceDatabase` row changes (the
//! cache itself lives in [`crate::registry::SourceRegistry`]'s
//! invalidation contract, not here — this module is a pure check).

use sqlx::any::AnyPool;

use crate::domain::DbType;
use crate::dynrow::column_to_text;
use crate::error::EngineResult;

/// Outcome of inspecting a source account. Empty `violations` means
/// the account is strictly read-only and the loader may proceed.
#[derive(Debug, Clone, Default)]
pub struct PrivilegeReport {
    pub violations: Vec<String>,
}

impl PrivilegeReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    fn clean() -> Self {
        Self::default()
    }
}

/// `spec.md` §4.2: "Database type neither recognized ⇒ single
/// violation". Shared with [`crate::registry::SourceRegistry`], which
/// raises this same string as a `PRIVILEGE_VIOLATION` without ever
/// attempting to connect — there is no dialect to pick a driver for.
pub const UNKNOWN_DB_TYPE_VIOLATION: &str = "Unknown DB type — cannot verify privileges";

pub async fn inspect(pool: &AnyPool, db_type: DbType) -> EngineResult<PrivilegeReport> {
    match db_type {
        DbType::Postgresql => inspect_postgres(pool).await,
        DbType::Mysql => inspect_mysql(pool).await,
        DbType::Unknown => Ok(PrivilegeReport {
            violations: vec![UNKNOWN_DB_TYPE_VIOLATION.to_string()],
        }),
    }
}

async fn inspect_postgres(pool: &AnyPool) -> EngineResult<PrivilegeReport> {
    let mut violations = Vec::new();

    let non_select_grants = sqlx::query(
        r#"
        SELECT table_schema, table_name, privilege_type
        FROM information_schema.role_table_grants
        WHERE grantee IN (
            SELECT rolname FROM pg_roles WHERE pg_has_role(current_user, oid, 'member')
        )
        AND privilege_type <> 'SELECT'
        "#,
    )
    .fetch_all(pool)
    .await?;

    for row in &non_select_grants {
        let schema = column_to_text(row, 0).unwrap_or_default();
        let table = column_to_text(row, 1).unwrap_or_default();
        let privilege = column_to_text(row, 2).unwrap_or_default();
        violations.push(format!("non-SELECT privilege `{privilege}` held on {schema}.{table}"));
    }

    let create_grants = sqlx::query(
        r#"
        SELECT nspname FROM pg_namespace
        WHERE nspname NOT IN ('pg_catalog', 'information_schema')
        AND has_schema_privilege(current_user, nspname, 'CREATE')
        "#,
    )
    .fetch_all(pool)
    .await?;

    for row in &create_grants {
        let schema = column_to_text(row, 0).unwrap_or_default();
        violations.push(format!("CREATE privilege held on schema `{schema}`"));
    }

    let owned = sqlx::query(
        r#"
        SELECT n.nspname, c.relname FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'v')
        AND pg_get_userbyid(c.relowner) = current_user
        AND n.nspname NOT IN ('pg_catalog', 'information_schema')
        "#,
    )
    .fetch_all(pool)
    .await?;

    for row in &owned {
        let schema = column_to_text(row, 0).unwrap_or_default();
        let name = column_to_text(row, 1).unwrap_or_default();
        violations.push(format!("owns table/view {schema}.{name}"));
    }

    Ok(PrivilegeReport { violations })
}

const BANNED_MYSQL_VERBS: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "REPLACE",
    "ALTER",
    "CREATE",
    "DROP",
    "TRUNCATE",
    "INDEX",
    "TRIGGER",
    "EVENT",
    "EXECUTE",
    "REFERENCES",
    "GRANT OPTION",
    "FILE",
    "SUPER",
    "CREATE VIEW",
    "CREATE ROUTINE",
    "ALTER ROUTINE",
];

async fn inspect_mysql(pool: &AnyPool) -> EngineResult<PrivilegeReport> {
    let grants = fetch_show_grants(pool).await?;
    let has_super = grants.iter().any(|g| g.to_uppercase().contains("SUPER"));
    let instance_read_only = fetch_mysql_read_only(pool).await.unwrap_or(false);

    if instance_read_only && !has_super {
        return Ok(PrivilegeReport::clean());
    }

    let violations = grants.iter().filter_map(|grant| check_mysql_grant(grant)).collect();
    Ok(PrivilegeReport { violations })
}

async fn fetch_show_grants(pool: &AnyPool) -> EngineResult<Vec<String>> {
    let rows = sqlx::query("SHOW GRANTS").fetch_all(pool).await?;
    Ok(rows.iter().filter_map(|row| column_to_text(row, 0)).collect())
}

/// `@@GLOBAL.read_only`, `@@GLOBAL.super_read_only`, or
/// `@@SESSION.read_only` — any one of them set means the instance
/// cannot be written to through this connection regardless of grants.
async fn fetch_mysql_read_only(pool: &AnyPool) -> EngineResult<bool> {
    if let Ok(row) = sqlx::query("SELECT @@GLOBAL.read_only, @@GLOBAL.super_read_only, @@SESSION.read_only")
        .fetch_one(pool)
        .await
    {
        let flags = [column_to_text(&row, 0), column_to_text(&row, 1), column_to_text(&row, 2)];
        return Ok(flags.iter().flatten().any(|f| f != "0"));
    }

    // Fallback for servers where the session-variable selects above are
    // disallowed: SHOW VARIABLES always works for an authenticated user.
    let mut any_on = false;
    for var in ["read_only", "super_read_only"] {
        if let Ok(rows) = sqlx::query(&format!("SHOW VARIABLES LIKE '{var}'")).fetch_all(pool).await {
            if let Some(row) = rows.first() {
                if let Some(value) = column_to_text(row, 1) {
                    any_on |= value.eq_ignore_ascii_case("ON") || value == "1";
                }
            }
        }
    }
    Ok(any_on)
}

fn check_mysql_grant(grant: &str) -> Option<String> {
    let upper = grant.to_uppercase();

    if upper.contains("ALL PRIVILEGES") || upper.contains("GRANT ALL ON") {
        return Some(format!("ALL PRIVILEGES grant: {grant}"));
    }

    for verb in BANNED_MYSQL_VERBS {
        if upper.contains(verb) {
            return Some(format!("disallowed privilege `{verb}` in grant: {grant}"));
        }
    }

    if upper.contains(" ON *.*") {
        let privileges = extract_granted_privileges(grant);
        let all_read_only = privileges
            .iter()
            .all(|p| matches!(p.trim().to_uppercase().as_str(), "USAGE" | "SELECT" | "SHOW VIEW"));
        if !all_read_only {
            return Some(format!("unsafe global grant: {grant}"));
        }
    }

    None
}

/// `"GRANT SELECT, SHOW VIEW ON *.* TO ..."` -> `["SELECT", "SHOW VIEW"]`
fn extract_granted_privileges(grant: &str) -> Vec<String> {
    let upper = grant.to_uppercase();
    let Some(start) = upper.find("GRANT ").map(|i| i + 6) else {
        return vec![];
    };
    let end = upper.find(" ON ").unwrap_or(grant.len());
    if start >= end || end > grant.len() {
        return vec![];
    }
    grant[start..end].split(',').map(|s| s.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_all_privileges_grant() {
        let v = check_mysql_grant("GRANT ALL PRIVILEGES ON *.* TO 'x'@'%'");
        assert!(v.is_some());
    }

    #[test]
    fn scenario_4_flags_insert_alongside_select() {
        let v = check_mysql_grant("GRANT SELECT, INSERT ON app.* TO 'x'@'%'");
        let msg = v.expect("INSERT must be flagged");
        assert!(msg.contains("INSERT"));
        assert!(msg.contains("GRANT SELECT, INSERT ON app.* TO 'x'@'%'"));
    }

    #[test]
    fn allows_pure_select_global_grant() {
        assert!(check_mysql_grant("GRANT SELECT ON *.* TO 'ro'@'%'").is_none());
    }

    #[test]
    fn allows_select_and_show_view_global_grant() {
        assert!(check_mysql_grant("GRANT SELECT, SHOW VIEW ON *.* TO 'ro'@'%'").is_none());
    }

    #[test]
    fn allows_pure_usage_grant() {
        assert!(check_mysql_grant("GRANT USAGE ON *.* TO 'ro'@'%'").is_none());
    }

    #[test]
    fn flags_global_grant_with_grant_option() {
        let v = check_mysql_grant("GRANT SELECT ON *.* TO 'ro'@'%' WITH GRANT OPTION");
        assert!(v.is_some());
    }

    #[test]
    fn flags_scoped_grant_with_banned_verb() {
        let v = check_mysql_grant("GRANT SELECT, DROP ON reporting.* TO 'ro'@'%'");
        assert!(v.unwrap().contains("DROP"));
    }

    #[test]
    fn allows_scoped_select_only_grant() {
        assert!(check_mysql_grant("GRANT SELECT ON reporting.* TO 'ro'@'%'").is_none());
    }

    #[test]
    fn extracts_privilege_list() {
        assert_eq!(
            extract_granted_privileges("GRANT SELECT, SHOW VIEW ON *.* TO 'ro'@'%'"),
            vec!["SELECT", "SHOW VIEW"]
        );
    }
}
