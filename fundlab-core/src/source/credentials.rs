//! Login credentials for the remote source.
//!
//! Resolution order, first hit wins:
//! - username: explicit override, `connection.username`, `PGUSER`, prompt
//! - password: `PGPASSWORD`, a matching `~/.pgpass` line, hidden prompt
//!
//! Credentials are never read from or written to the config file.

use super::SourceError;
use crate::config::ConnectionConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A password whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Password,
}

/// Interactive fallback for missing credentials.
pub trait CredentialPrompt {
    fn username(&self, target: &str) -> Result<String, SourceError>;
    fn password(&self, username: &str, target: &str) -> Result<String, SourceError>;
}

/// Non-interactive credential inputs gathered from the environment.
#[derive(Debug, Clone, Default)]
pub struct CredentialSources {
    pub username_override: Option<String>,
    pub env_user: Option<String>,
    pub env_password: Option<Password>,
    pub pgpass_file: Option<PathBuf>,
}

impl CredentialSources {
    /// Read `PGUSER`, `PGPASSWORD` and `PGPASSFILE` (default `~/.pgpass`).
    pub fn from_env(username_override: Option<String>) -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let pgpass_file = non_empty("PGPASSFILE")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".pgpass")));

        Self {
            username_override,
            env_user: non_empty("PGUSER"),
            env_password: non_empty("PGPASSWORD").map(Password::new),
            pgpass_file,
        }
    }

    /// Resolve full credentials, prompting only for what is still missing.
    pub fn resolve(
        &self,
        conn: &ConnectionConfig,
        prompt: &dyn CredentialPrompt,
    ) -> Result<Credentials, SourceError> {
        let target = format!("{}:{}/{}", conn.host, conn.port, conn.database);

        let username = match self
            .username_override
            .clone()
            .or_else(|| conn.username.clone())
            .or_else(|| self.env_user.clone())
        {
            Some(u) => u,
            None => prompt.username(&target)?,
        };
        if username.is_empty() {
            return Err(SourceError::Credentials("empty username".into()));
        }

        if let Some(password) = &self.env_password {
            debug!("using password from PGPASSWORD");
            return Ok(Credentials {
                username,
                password: password.clone(),
            });
        }

        if let Some(path) = &self.pgpass_file {
            if let Some(password) = lookup_pgpass_file(path, conn, &username) {
                debug!(file = %path.display(), "using password from pgpass file");
                return Ok(Credentials {
                    username,
                    password: Password::new(password),
                });
            }
        }

        let password = prompt.password(&username, &target)?;
        Ok(Credentials {
            username,
            password: Password::new(password),
        })
    }
}

fn lookup_pgpass_file(path: &Path, conn: &ConnectionConfig, username: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    lookup_pgpass(&content, &conn.host, conn.port, &conn.database, username)
}

/// Split one pgpass line on unescaped `:`, unescaping `\:` and `\\`.
fn split_pgpass_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Find the password for a connection in pgpass-format content.
///
/// Lines are `host:port:database:username:password`; `*` matches anything
/// in the first four fields. The first matching line wins.
pub fn lookup_pgpass(
    content: &str,
    host: &str,
    port: u16,
    database: &str,
    username: &str,
) -> Option<String> {
    let port = port.to_string();
    let wanted = [host, port.as_str(), database, username];

    content
        .lines()
        .map(|line| line.trim_end_matches(['\r', '\n']))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(split_pgpass_line)
        .filter(|fields| fields.len() == 5)
        .find(|fields| {
            fields[..4]
                .iter()
                .zip(wanted.iter())
                .all(|(field, want)| field == "*" || field == want)
        })
        .map(|mut fields| fields.remove(4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;

    struct ScriptedPrompt {
        user: &'static str,
        password: &'static str,
        asked: Cell<u32>,
    }

    impl ScriptedPrompt {
        fn new(user: &'static str, password: &'static str) -> Self {
            Self {
                user,
                password,
                asked: Cell::new(0),
            }
        }
    }

    impl CredentialPrompt for ScriptedPrompt {
        fn username(&self, _target: &str) -> Result<String, SourceError> {
            self.asked.set(self.asked.get() + 1);
            Ok(self.user.to_string())
        }

        fn password(&self, _username: &str, _target: &str) -> Result<String, SourceError> {
            self.asked.set(self.asked.get() + 1);
            Ok(self.password.to_string())
        }
    }

    struct NoPrompt;

    impl CredentialPrompt for NoPrompt {
        fn username(&self, _: &str) -> Result<String, SourceError> {
            Err(SourceError::Credentials("no terminal".into()))
        }

        fn password(&self, _: &str, _: &str) -> Result<String, SourceError> {
            Err(SourceError::Credentials("no terminal".into()))
        }
    }

    #[test]
    fn password_debug_is_redacted() {
        let creds = Credentials {
            username: "jdoe".into(),
            password: Password::new("hunter2"),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("jdoe"));
    }

    #[test]
    fn pgpass_matches_exact_and_wildcards() {
        let content = "\
# comment
other.host:9737:wrds:jdoe:wrong
wrds-pgdata.wharton.upenn.edu:9737:wrds:jdoe:right
*:*:*:*:fallback
";
        assert_eq!(
            lookup_pgpass(content, "wrds-pgdata.wharton.upenn.edu", 9737, "wrds", "jdoe"),
            Some("right".into())
        );
        assert_eq!(
            lookup_pgpass(content, "localhost", 5432, "postgres", "me"),
            Some("fallback".into())
        );
    }

    #[test]
    fn pgpass_unescapes_colons_and_backslashes() {
        let content = r"h:1:db:u:pa\:ss\\word";
        assert_eq!(lookup_pgpass(content, "h", 1, "db", "u"), Some(r"pa:ss\word".into()));
    }

    #[test]
    fn pgpass_keeps_trailing_spaces_in_password() {
        let content = "h:1:db:u:secret  \r\nh:2:db:u:other\n";
        assert_eq!(lookup_pgpass(content, "h", 1, "db", "u"), Some("secret  ".into()));
        assert_eq!(lookup_pgpass(content, "h", 2, "db", "u"), Some("other".into()));
    }

    #[test]
    fn pgpass_skips_malformed_lines() {
        assert_eq!(lookup_pgpass("h:1:db\n", "h", 1, "db", "u"), None);
    }

    #[test]
    fn config_username_beats_env_and_env_password_skips_prompt() {
        let conn = ConnectionConfig {
            username: Some("from_config".into()),
            ..Default::default()
        };
        let sources = CredentialSources {
            env_user: Some("from_env".into()),
            env_password: Some(Password::new("secret")),
            ..Default::default()
        };
        let prompt = ScriptedPrompt::new("typed", "typed");
        let creds = sources.resolve(&conn, &prompt).unwrap();
        assert_eq!(creds.username, "from_config");
        assert_eq!(creds.password.expose(), "secret");
        assert_eq!(prompt.asked.get(), 0);
    }

    #[test]
    fn override_beats_config() {
        let conn = ConnectionConfig {
            username: Some("from_config".into()),
            ..Default::default()
        };
        let sources = CredentialSources {
            username_override: Some("flag".into()),
            env_password: Some(Password::new("x")),
            ..Default::default()
        };
        let creds = sources.resolve(&conn, &NoPrompt).unwrap();
        assert_eq!(creds.username, "flag");
    }

    #[test]
    fn pgpass_file_used_before_prompt() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "*:9737:wrds:jdoe:from_file").unwrap();

        let conn = ConnectionConfig::default();
        let sources = CredentialSources {
            env_user: Some("jdoe".into()),
            pgpass_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let creds = sources.resolve(&conn, &NoPrompt).unwrap();
        assert_eq!(creds.password.expose(), "from_file");
    }

    #[test]
    fn prompts_for_everything_missing() {
        let prompt = ScriptedPrompt::new("typed_user", "typed_pw");
        let sources = CredentialSources {
            pgpass_file: Some(PathBuf::from("/nonexistent/.pgpass")),
            ..Default::default()
        };
        let creds = sources.resolve(&ConnectionConfig::default(), &prompt).unwrap();
        assert_eq!(creds.username, "typed_user");
        assert_eq!(creds.password.expose(), "typed_pw");
        assert_eq!(prompt.asked.get(), 2);
    }

    #[test]
    fn prompt_failure_propagates() {
        let err = CredentialSources::default()
            .resolve(&ConnectionConfig::default(), &NoPrompt)
            .unwrap_err();
        assert!(matches!(err, SourceError::Credentials(_)));
    }
}
