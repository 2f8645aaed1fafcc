use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};
use crate::job::CommandDescriptor;
use crate::workload::{PreparedLaunch, Workload};

const DEFAULT_UNLOAD_LIMIT: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum DsbulkOperation {
    /// Export the primary key column of a table to `output_path`
    Unload {
        keyspace: String,
        table: String,
        primary_key: String,
        output_path: String,
        #[serde(default = "default_limit")]
        limit: u64,
    },
    /// Import a CSV file into a table
    Load {
        keyspace: String,
        table: String,
        csv_path: String,
    },
    /// Count the rows of a table
    Count { keyspace: String, table: String },
}

impl DsbulkOperation {
    /// Subcommand name passed to DSBulk.
    pub fn name(&self) -> &'static str {
        match self {
            DsbulkOperation::Unload { .. } => "unload",
            DsbulkOperation::Load { .. } => "load",
            DsbulkOperation::Count { .. } => "count",
        }
    }

    fn target(&self) -> (&str, &str) {
        match self {
            DsbulkOperation::Unload {
                keyspace, table, ..
            }
            | DsbulkOperation::Load {
                keyspace, table, ..
            }
            | DsbulkOperation::Count { keyspace, table } => (keyspace.as_str(), table.as_str()),
        }
    }
}

fn default_limit() -> u64 {
    DEFAULT_UNLOAD_LIMIT
}

/// Strip shell metacharacters from identifiers that end up in a command line.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, ';' | '&' | '|' | '>' | '<'))
        .collect()
}

fn file_safe(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect()
}

/// A DSBulk invocation.
#[derive(Debug, Clone)]
pub struct DsbulkWorkload {
    pub jar: PathBuf,
    pub operation: DsbulkOperation,
}

impl DsbulkWorkload {
    pub fn new(jar: impl Into<PathBuf>, operation: DsbulkOperation) -> Self {
        Self {
            jar: jar.into(),
            operation,
        }
    }

    pub fn jar_exists(jar: &Path) -> bool {
        jar.is_file()
    }

    /// Arguments after `java`, with identifiers sanitized.
    fn args(&self) -> Vec<String> {
        let mut args = vec!["-jar".to_string(), self.jar.display().to_string()];
        match self.operation {
            DsbulkOperation::Unload {
                ref keyspace,
                ref table,
                ref primary_key,
                ref output_path,
                limit,
            } => {
                let mut query = format!(
                    "SELECT \"{}\" FROM {}.{}",
                    sanitize(primary_key),
                    sanitize(keyspace),
                    sanitize(table)
                );
                if limit > 0 {
                    query.push_str(&format!(" LIMIT {}", limit));
                }
                query.push(';');
                args.extend([
                    "unload".to_string(),
                    "-query".to_string(),
                    query,
                    "-url".to_string(),
                    output_path.clone(),
                ]);
            }
            DsbulkOperation::Load {
                ref keyspace,
                ref table,
                ref csv_path,
            } => {
                args.extend([
                    "load".to_string(),
                    "-k".to_string(),
                    sanitize(keyspace),
                    "-t".to_string(),
                    sanitize(table),
                    "-url".to_string(),
                    csv_path.clone(),
                ]);
            }
            DsbulkOperation::Count {
                ref keyspace,
                ref table,
            } => {
                args.extend([
                    "count".to_string(),
                    "-k".to_string(),
                    sanitize(keyspace),
                    "-t".to_string(),
                    sanitize(table),
                ]);
            }
        }
        args
    }

    /// One-line summary of what the operation does.
    pub fn description(&self) -> String {
        let (keyspace, table) = self.operation.target();
        let target = format!("{}.{}", sanitize(keyspace), sanitize(table));
        match self.operation {
            DsbulkOperation::Unload {
                ref primary_key,
                ref output_path,
                ..
            } => format!(
                "Exports {} values from {} to {}",
                sanitize(primary_key),
                target,
                output_path
            ),
            DsbulkOperation::Load { ref csv_path, .. } => {
                format!("Imports data from {} into {}", csv_path, target)
            }
            DsbulkOperation::Count { .. } => format!("Counts rows in {}", target),
        }
    }

    /// Downloadable bash script running this operation.
    pub fn script(&self) -> String {
        format!(
            "#!/bin/bash\n\n\
             # DSBulk {} script\n\
             # {}\n\n\
             {}\n\n\
             # End of script\n",
            self.operation.name(),
            self.description(),
            self.display()
        )
    }

    /// File name offered for the downloadable script.
    pub fn script_name(&self) -> String {
        let (keyspace, table) = self.operation.target();
        format!(
            "dsbulk_{}_{}_{}.sh",
            self.operation.name(),
            file_safe(keyspace),
            file_safe(table)
        )
    }

    /// Fails with `InvalidWorkload` naming the first required field that is
    /// empty after sanitization.
    pub fn check(&self) -> Result<()> {
        let fields: Vec<(&str, &String)> = match self.operation {
            DsbulkOperation::Unload {
                ref keyspace,
                ref table,
                ref primary_key,
                ref output_path,
                ..
            } => vec![
                ("keyspace", keyspace),
                ("table", table),
                ("primary_key", primary_key),
                ("output_path", output_path),
            ],
            DsbulkOperation::Load {
                ref keyspace,
                ref table,
                ref csv_path,
            } => vec![("keyspace", keyspace), ("table", table), ("csv_path", csv_path)],
            DsbulkOperation::Count {
                ref keyspace,
                ref table,
            } => vec![("keyspace", keyspace), ("table", table)],
        };
        match fields.into_iter().find(|(_, v)| sanitize(v).trim().is_empty()) {
            Some((name, _)) => Err(RunnerError::InvalidWorkload(format!("{} is required", name))),
            None => Ok(()),
        }
    }
}

impl Workload for DsbulkWorkload {
    fn display(&self) -> String {
        CommandDescriptor::new("java").args(self.args()).display()
    }

    fn prepare(&self, _scratch_dir: &Path) -> Result<PreparedLaunch> {
        self.check()?;
        if !Self::jar_exists(&self.jar) {
            return Err(RunnerError::InvalidWorkload(format!(
                "DSBulk JAR file not found at {}",
                self.jar.display()
            )));
        }
        Ok(PreparedLaunch::new(
            CommandDescriptor::new("java").args(self.args()),
        ))
    }
}
