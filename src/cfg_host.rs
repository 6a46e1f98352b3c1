//! Host inventory reader
//!
//! Reads `cfg_host.xml`, the file listing the database and cache servers a
//! script may talk to:
//!
//! ```xml
//! <CFG>
//!   <MYSQL>
//!     <SERVER name="stat" ip="10.0.0.5" port="3306" login="stat" pass="secret"/>
//!   </MYSQL>
//!   <POSTGRES>
//!     <SERVER name="dwh" ip="10.0.0.7" port="5432" login="etl" pass="secret"/>
//!   </POSTGRES>
//!   <CACHE>
//!     <SERVER name="main" url="10.0.0.9" port="6379" dbname="0" pass=""/>
//!   </CACHE>
//! </CFG>
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::config::{
    default_connect_timeout, default_db_port, default_pg_port, default_pool_size, default_redis_port,
    DatabaseConfig, RedisConfig,
};
use crate::error::{Error, Result};

/// Default location of the host inventory
pub const DEFAULT_CFG_HOST_PATH: &str = "./cfg_host.xml";

pub const SECTION_MYSQL: &str = "MYSQL";
pub const SECTION_POSTGRES: &str = "POSTGRES";
pub const SECTION_CACHE: &str = "CACHE";

/// Attributes of one `<SERVER>` element
pub type ServerAttributes = BTreeMap<String, String>;

/// Parsed host inventory
#[derive(Debug, Clone)]
pub struct CfgHost {
    path: Option<PathBuf>,
    sections: HashMap<String, Vec<ServerAttributes>>,
}

impl CfgHost {
    /// Load the inventory from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let parsed = std::fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|content| Self::from_str(&content));

        match parsed {
            Ok(mut cfg) => {
                cfg.path = Some(path.to_path_buf());
                Ok(cfg)
            }
            Err(e) => {
                tracing::error!("Error while reading host config {:?}: {}", path, e);
                Err(e)
            }
        }
    }

    /// Parse the inventory from an XML string
    pub fn from_str(content: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(content)?;
        let mut sections: HashMap<String, Vec<ServerAttributes>> = HashMap::new();

        for section in doc.root_element().children().filter(|n| n.is_element()) {
            let servers = section
                .descendants()
                .filter(|n| n.has_tag_name("SERVER"))
                .map(|server| {
                    server
                        .attributes()
                        .map(|a| (a.name().to_string(), a.value().to_string()))
                        .collect::<ServerAttributes>()
                });
            sections
                .entry(section.tag_name().name().to_string())
                .or_default()
                .extend(servers);
        }

        Ok(Self {
            path: None,
            sections,
        })
    }

    /// Path the inventory was loaded from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Names of all servers declared in a section
    pub fn server_names(&self, section: &str) -> Vec<&str> {
        self.sections
            .get(section)
            .map(|servers| {
                servers
                    .iter()
                    .filter_map(|s| s.get("name").map(String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Raw attributes of the server called `name` in `section`
    pub fn server_attributes(&self, section: &str, name: &str) -> Option<&ServerAttributes> {
        self.sections
            .get(section)?
            .iter()
            .find(|s| s.get("name").map(String::as_str) == Some(name))
    }

    /// MySQL connection config for server `name`, without a database selected
    pub fn db_config_by_name(&self, name: &str) -> Result<DatabaseConfig> {
        self.database_config(SECTION_MYSQL, name, default_db_port())
    }

    /// MySQL connection config for server `name` and database `db_name`
    pub fn db_config_with_db_name(&self, name: &str, db_name: &str) -> Result<DatabaseConfig> {
        Ok(self.db_config_by_name(name)?.with_database(db_name))
    }

    /// Postgres connection config for server `name`
    pub fn pg_config_by_name(&self, name: &str) -> Result<DatabaseConfig> {
        self.database_config(SECTION_POSTGRES, name, default_pg_port())
    }

    /// Redis connection config for server `name`
    pub fn redis_config_by_name(&self, name: &str) -> Result<RedisConfig> {
        let server = self.require(SECTION_CACHE, name)?;
        let password = server.get("pass").filter(|p| !p.is_empty()).cloned();

        Ok(RedisConfig {
            host: required_attr(server, SECTION_CACHE, name, "url")?.to_string(),
            port: parse_attr(server, SECTION_CACHE, name, "port")?.unwrap_or_else(default_redis_port),
            db: parse_attr(server, SECTION_CACHE, name, "dbname")?.unwrap_or(0),
            password,
        })
    }

    fn database_config(&self, section: &str, name: &str, default_port: u16) -> Result<DatabaseConfig> {
        let server = self.require(section, name)?;

        Ok(DatabaseConfig {
            host: required_attr(server, section, name, "ip")?.to_string(),
            port: parse_attr(server, section, name, "port")?.unwrap_or(default_port),
            user: required_attr(server, section, name, "login")?.to_string(),
            password: server.get("pass").cloned().unwrap_or_default(),
            database: server.get("dbname").filter(|d| !d.is_empty()).cloned(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
        })
    }

    fn require(&self, section: &str, name: &str) -> Result<&ServerAttributes> {
        self.server_attributes(section, name).ok_or_else(|| {
            Error::Config(format!("server {:?} not found in <{}> section", name, section))
        })
    }
}

fn required_attr<'a>(server: &'a ServerAttributes, section: &str, name: &str, attr: &str) -> Result<&'a str> {
    server.get(attr).map(String::as_str).ok_or_else(|| {
        Error::Config(format!(
            "server {:?} in <{}> has no {:?} attribute",
            name, section, attr
        ))
    })
}

fn parse_attr<T: std::str::FromStr>(
    server: &ServerAttributes,
    section: &str,
    name: &str,
    attr: &str,
) -> Result<Option<T>> {
    match server.get(attr).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            Error::Config(format!(
                "server {:?} in <{}> has invalid {} {:?}",
                name, section, attr, raw
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0"?>
<CFG>
  <MYSQL>
    <SERVER name="stat" ip="10.0.0.5" port="3307" login="stat" pass="secret"/>
    <SERVER name="log" ip="10.0.0.6" port="3306" login="reader" pass=""/>
  </MYSQL>
  <POSTGRES>
    <SERVER name="dwh" ip="10.0.0.7" login="etl" pass="pg" dbname="warehouse"/>
  </POSTGRES>
  <CACHE>
    <SERVER name="main" url="10.0.0.9" port="6380" dbname="3" pass=""/>
  </CACHE>
</CFG>"#;

    #[test]
    fn test_mysql_server_config() {
        let cfg = CfgHost::from_str(XML).unwrap();
        let db = cfg.db_config_by_name("stat").unwrap();
        assert_eq!(db.host, "10.0.0.5");
        assert_eq!(db.port, 3307);
        assert_eq!(db.user, "stat");
        assert_eq!(db.password, "secret");
        assert_eq!(db.database, None);
        assert_eq!(db.pool_size, 4);

        let with_db = cfg.db_config_with_db_name("log", "logs").unwrap();
        assert_eq!(with_db.database.as_deref(), Some("logs"));
        assert_eq!(with_db.info(), "10.0.0.6:3306/logs");
    }

    #[test]
    fn test_postgres_defaults_port() {
        let cfg = CfgHost::from_str(XML).unwrap();
        let pg = cfg.pg_config_by_name("dwh").unwrap();
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.database.as_deref(), Some("warehouse"));
    }

    #[test]
    fn test_redis_server_config() {
        let cfg = CfgHost::from_str(XML).unwrap();
        let redis = cfg.redis_config_by_name("main").unwrap();
        assert_eq!(redis.host, "10.0.0.9");
        assert_eq!(redis.port, 6380);
        assert_eq!(redis.db, 3);
        assert_eq!(redis.password, None);
    }

    #[test]
    fn test_missing_server_is_config_error() {
        let cfg = CfgHost::from_str(XML).unwrap();
        assert!(matches!(cfg.db_config_by_name("nope"), Err(Error::Config(_))));
        assert!(cfg.redis_config_by_name("stat").is_err());
    }

    #[test]
    fn test_server_names() {
        let cfg = CfgHost::from_str(XML).unwrap();
        assert_eq!(cfg.server_names(SECTION_MYSQL), vec!["stat", "log"]);
        assert!(cfg.server_names("ORACLE").is_empty());
    }

    #[test]
    fn test_invalid_port_and_xml() {
        let bad_port = r#"<CFG><MYSQL><SERVER name="a" ip="h" port="x" login="u"/></MYSQL></CFG>"#;
        let cfg = CfgHost::from_str(bad_port).unwrap();
        assert!(cfg.db_config_by_name("a").is_err());

        assert!(matches!(CfgHost::from_str("<CFG>"), Err(Error::Xml(_))));
    }

    #[test]
    fn test_from_file_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg_host.xml");
        std::fs::write(&path, XML).unwrap();

        let cfg = CfgHost::from_file(&path).unwrap();
        assert_eq!(cfg.path(), Some(path.as_path()));
        assert!(CfgHost::from_file(dir.path().join("missing.xml")).is_err());
    }
}
