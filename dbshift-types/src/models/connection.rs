use serde::{Deserialize, Serialize};

/// Connection settings for one database endpoint. Credentials normally come
/// from `${SRC_*}` / `${TGT_*}` environment references in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    pub engine: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Schema filter for introspection; engine default when omitted
    /// (`public` for postgres, `dbo` for mssql).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    4
}

impl ConnectionConfig {
    pub fn schema_or_default(&self) -> &str {
        match self.schema.as_deref() {
            Some(schema) => schema,
            None => match self.engine.as_str() {
                "mssql" => "dbo",
                _ => "public",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard() {
        let yaml = r#"
        engine: postgres
        host: localhost
        port: 5432
        user: app
        password: secret
        database: shop
        "#;
        let config = serde_yaml::from_str::<ConnectionConfig>(yaml).unwrap();
        assert_eq!(config.engine, "postgres");
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.schema_or_default(), "public");
    }

    #[test]
    fn error_missing_field() {
        let yaml = r#"
        engine: postgres
        host: localhost
        port: 5432
        user: app
        database: shop
        "#;
        let result = serde_yaml::from_str::<ConnectionConfig>(yaml);
        assert!(result
            .err()
            .unwrap()
            .to_string()
            .starts_with("missing field `password`"));
    }

    #[test]
    fn mssql_defaults_to_dbo() {
        let yaml = r#"
        engine: mssql
        host: localhost
        port: 1433
        user: sa
        password: secret
        database: shop
        "#;
        let config = serde_yaml::from_str::<ConnectionConfig>(yaml).unwrap();
        assert_eq!(config.schema_or_default(), "dbo");
    }
}
