//! SourceDatabase domain type — connection descriptor for a loader's
//! upstream source.

use serde::{Deserialize, Serialize};

/// Dialect of a source database. Resolved from the driver/catalog
/// metadata, not modeled with deep inheritance (`spec.md` §9 Design
/// Notes). `Unknown` covers any `db_type` value this engine doesn't
/// recognize — it is a first-class member of the sum type, not a parse
/// error, so an unrecognized source still loads and reaches the
/// Privilege Inspector, which is where `spec.md` §4.2 requires it to be
/// reported: "Database type neither recognized ⇒ single violation".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Mysql,
    Postgresql,
    Unknown,
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mysql => write!(f, "mysql"),
            Self::Postgresql => write!(f, "postgresql"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for DbType {
    type Err = String;

    /// Infallible in practice: anything other than a recognized dialect
    /// name maps to [`DbType::Unknown`] rather than an error, so a
    /// `source_database` row with a foreign `db_type` string still
    /// loads (`spec.md` §4.2).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "postgresql" | "postgres" => Ok(Self::Postgresql),
            _ => Ok(Self::Unknown),
        }
    }
}

/// Connection descriptor for a loader's source database. Created and
/// updated by the external CRUD collaborator; immutable once referenced
/// by an executing loader — connection pools may pin older credentials
/// until drained (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDatabase {
    pub source_code: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
    pub db_type: DbType,
    pub username: String,
    pub encrypted_password_ciphertext: Vec<u8>,
    pub encrypted_password_nonce: Vec<u8>,
}

impl SourceDatabase {
    /// Connection URL with a placeholder password; the real password is
    /// decrypted and substituted at pool-construction time only (see
    /// `crate::registry::SourceRegistry`), never logged or persisted in
    /// plaintext form.
    pub fn redacted_connection_string(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.db_type, self.username, self.host, self.port, self.database_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_type_roundtrips() {
        for s in [DbType::Mysql, DbType::Postgresql, DbType::Unknown] {
            let text = s.to_string();
            let parsed: DbType = text.parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn db_type_accepts_aliases() {
        assert_eq!("mariadb".parse::<DbType>().unwrap(), DbType::Mysql);
        assert_eq!("postgres".parse::<DbType>().unwrap(), DbType::Postgresql);
    }

    #[test]
    fn unrecognized_db_type_parses_as_unknown_rather_than_erroring() {
        assert_eq!("oracle".parse::<DbType>().unwrap(), DbType::Unknown);
        assert_eq!("".parse::<DbType>().unwrap(), DbType::Unknown);
    }

    #[test]
    fn redacted_connection_string_never_contains_password() {
        let db = SourceDatabase {
            source_code: "src1".into(),
            host: "db.internal".into(),
            port: 5432,
            database_name: "analytics".into(),
            db_type: DbType::Postgresql,
            username: "reader".into(),
            encrypted_password_ciphertext: vec![1, 2, 3],
            encrypted_password_nonce: vec![4, 5, 6],
        };
        let conn = db.redacted_connection_string();
        assert_eq!(conn, "postgresql://reader@db.internal:5432/analytics");
    }
}
