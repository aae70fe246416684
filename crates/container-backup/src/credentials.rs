//! Credentials declared in a container's environment.
//!

use tracing::warn;

use crate::{
    engine::Engine,
    runtime::{self, ContainerRef, ContainerRuntime, InspectionError},
};

/// Credentials resolved for one backup attempt. Never cached between attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// The user to dump as.
    pub user: Option<String>,

    /// The user's password.
    pub password: Option<String>,

    /// The single database to dump, all databases if unset.
    pub database: Option<String>,
}

/// Variable names for each credential, in precedence order.
struct Rule {
    user: &'static [&'static str],
    password: &'static [&'static str],
    database: &'static [&'static str],
    root_password: &'static [&'static str],
    default_user: Option<&'static str>,
}

const NO_RULE: Rule = Rule {
    user: &[],
    password: &[],
    database: &[],
    root_password: &[],
    default_user: None,
};

fn rule(engine: Engine) -> Rule {
    match engine {
        Engine::MySql => Rule {
            user: &["MYSQL_USER", "MARIADB_USER"],
            password: &["MYSQL_PASSWORD", "MARIADB_PASSWORD"],
            database: &["MYSQL_DATABASE", "MARIADB_DATABASE"],
            root_password: &["MYSQL_ROOT_PASSWORD", "MARIADB_ROOT_PASSWORD"],
            default_user: None,
        },
        Engine::MariaDb => Rule {
            user: &["MARIADB_USER", "MYSQL_USER"],
            password: &["MARIADB_PASSWORD", "MYSQL_PASSWORD"],
            database: &["MARIADB_DATABASE", "MYSQL_DATABASE"],
            root_password: &["MARIADB_ROOT_PASSWORD", "MYSQL_ROOT_PASSWORD"],
            default_user: None,
        },
        // pg_dumpall covers every database, so no database name is resolved.
        Engine::PostgreSql => Rule {
            user: &["POSTGRES_USER"],
            password: &["POSTGRES_PASSWORD"],
            default_user: Some("postgres"),
            ..NO_RULE
        },
        // MongoDB authentication is not resolved.
        Engine::MongoDb | Engine::Redis | Engine::Oracle | Engine::SqlServer => NO_RULE,
    }
}

/// Split `KEY=VALUE` entries. Entries without `=` are skipped.
fn parse_env(env: &[String]) -> impl Iterator<Item = (&str, &str)> {
    env.iter().filter_map(|entry| entry.split_once('='))
}

/// The first non-empty value among `names`, checked in precedence order.
///
/// A later name is only consulted when every earlier one is absent or empty, and the
/// first declaration of a name wins over any repeat.
pub fn lookup(env: &[String], names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        parse_env(env)
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// The root password declared for a MySQL or MariaDB container.
pub fn root_password(engine: Engine, env: &[String]) -> Option<String> {
    lookup(env, rule(engine).root_password)
}

/// Resolves credentials from a container's declared environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialResolver {
    use_root: bool,
}

impl CredentialResolver {
    /// Create a resolver. With `use_root`, MySQL and MariaDB resolve to `root` and the
    /// declared root password instead of the application user.
    pub fn new(use_root: bool) -> Self {
        Self { use_root }
    }

    /// Resolve credentials from an environment list.
    pub fn from_env(&self, engine: Engine, env: &[String]) -> Credentials {
        let rule = rule(engine);

        let root = self.use_root && matches!(engine, Engine::MySql | Engine::MariaDb);
        let (user, password) = if root {
            (Some("root".to_string()), lookup(env, rule.root_password))
        } else {
            (
                lookup(env, rule.user).or_else(|| rule.default_user.map(str::to_string)),
                lookup(env, rule.password),
            )
        };

        Credentials {
            user,
            password,
            database: lookup(env, rule.database),
        }
    }

    /// Resolve credentials from the live container.
    pub fn try_resolve<R: ContainerRuntime + ?Sized>(
        &self,
        runtime: &R,
        container: &ContainerRef,
        engine: Engine,
    ) -> Result<Credentials, InspectionError> {
        let config = runtime::inspect(runtime, container)?;

        Ok(self.from_env(engine, &config.env))
    }

    /// Resolve credentials from the live container, all fields unset if it cannot be inspected.
    ///
    /// Callers must check required fields before use.
    pub fn resolve<R: ContainerRuntime + ?Sized>(
        &self,
        runtime: &R,
        container: &ContainerRef,
        engine: Engine,
    ) -> Credentials {
        match self.try_resolve(runtime, container, engine) {
            Ok(credentials) => credentials,
            Err(error) => {
                warn!("{error}");
                Credentials::default()
            }
        }
    }
}
