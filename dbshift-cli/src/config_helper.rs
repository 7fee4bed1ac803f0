use crate::errors::CliError;
use dbshift_types::models::Config;
use dbshift_types::serde_yaml;
use std::path::Path;

/// Expand `${VAR}` references from the environment. Fails on the first
/// unset variable so credentials never silently become empty strings.
pub fn expand_env(raw: &str) -> Result<String, CliError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => return Err(CliError::MissingEnvVar(name.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

pub fn load_config(path: &Path) -> Result<Config, CliError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| CliError::CannotReadConfig(path.to_path_buf(), e))?;
    let expanded = expand_env(&raw)?;
    serde_yaml::from_str(&expanded).map_err(CliError::FailedToParseYaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_variables() {
        std::env::set_var("DBSHIFT_TEST_PASSWORD", "hunter2");
        let expanded = expand_env("password: ${DBSHIFT_TEST_PASSWORD}").unwrap();
        assert_eq!(expanded, "password: hunter2");
    }

    #[test]
    fn unset_variable_is_an_error() {
        std::env::remove_var("DBSHIFT_TEST_UNSET");
        let err = expand_env("${DBSHIFT_TEST_UNSET}").unwrap_err();
        assert!(matches!(err, CliError::MissingEnvVar(name) if name == "DBSHIFT_TEST_UNSET"));
    }

    #[test]
    fn text_without_references_is_untouched() {
        let text = "plain: value\nport: 5432\n";
        assert_eq!(expand_env(text).unwrap(), text);
    }

    #[test]
    fn unterminated_reference_passes_through() {
        assert_eq!(expand_env("oops ${UNCLOSED").unwrap(), "oops ${UNCLOSED");
    }

    #[test]
    fn full_config_round_trip() {
        std::env::set_var("DBSHIFT_TEST_SRC_PW", "src-secret");
        let tmp = tempdir::TempDir::new("config").unwrap();
        let path = tmp.path().join("dbshift-config.yaml");
        std::fs::write(
            &path,
            r#"
source:
  engine: postgres
  host: localhost
  port: 5432
  user: app
  password: ${DBSHIFT_TEST_SRC_PW}
  database: shop
target:
  engine: mysql
  host: localhost
  port: 3306
  user: app
  password: fixed
  database: shop
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.source.password, "src-secret");
        assert_eq!(config.target.engine, "mysql");
    }
}
