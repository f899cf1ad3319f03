// db-backup/src/backup/naming.rs
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::errors::BackupError;

pub const FILE_EXTENSION: &str = ".sql.gz";
const TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%H_%M_%S";

/// Local and remote names of one dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpNaming {
    /// `db-<name>-`, shared by every dump of the database.
    pub file_prefix: String,
    pub file_name: String,
    pub local_path: PathBuf,
    pub remote_dir: String,
}

impl DumpNaming {
    pub fn new(db_name: &str, now: DateTime<Utc>, dump_dir: &Path, remote_dir: String) -> Self {
        let file_prefix = format!("db-{}-", db_name);
        let file_name = format!(
            "{}{}{}",
            file_prefix,
            now.format(TIMESTAMP_FORMAT),
            FILE_EXTENSION
        );
        Self {
            local_path: dump_dir.join(&file_name),
            file_prefix,
            file_name,
            remote_dir,
        }
    }

    pub fn remote_key(&self) -> String {
        join_key(&self.remote_dir, &self.file_name)
    }

    /// Prefix listing every remote dump of this database.
    pub fn listing_prefix(&self) -> String {
        join_key(&self.remote_dir, &self.file_prefix)
    }
}

fn join_key(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// True when `key` is `<prefix><timestamp>.sql.gz`, i.e. a dump written for
/// the same database. Keeps `orders` from matching `orders-archive` dumps.
pub fn is_dump_key(key: &str, listing_prefix: &str) -> bool {
    key.strip_prefix(listing_prefix)
        .and_then(|rest| rest.strip_suffix(FILE_EXTENSION))
        .is_some_and(|stamp| NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok())
}

/// Renders the remote directory template.
///
/// Supported placeholders are `{prefix}`, `{host}` and `{db_name}`. Empty
/// path segments are dropped, so an empty prefix does not leave a leading `/`.
pub fn render_dir_template(
    template: &str,
    db_name: &str,
    prefix: &str,
    host: &str,
) -> Result<String, BackupError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| BackupError::Template(format!("unclosed placeholder in {:?}", template)))?;
        let value = match &after[..end] {
            "prefix" => prefix,
            "host" => host,
            "db_name" => db_name,
            other => {
                return Err(BackupError::Template(format!(
                    "unknown placeholder {{{}}} in {:?}",
                    other, template
                )));
            }
        };
        rendered.push_str(value);
        rest = &after[end + 1..];
    }
    rendered.push_str(rest);

    Ok(rendered
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/"))
}
