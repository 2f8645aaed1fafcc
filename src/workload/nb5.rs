use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};
use crate::job::CommandDescriptor;
use crate::workload::{PreparedLaunch, Workload};

const LINE_JOIN: &str = " \\\n  ";

/// Where the NB5 workload definition comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YamlSource {
    /// YAML text, materialized into a scratch file at launch
    Inline(String),
    /// An existing file on the server
    File(PathBuf),
}

/// A NoSQLBench 5 run against a Cassandra-compatible cluster.
#[derive(Debug, Clone)]
pub struct Nb5Workload {
    pub jar: PathBuf,
    pub yaml: YamlSource,
    pub host: String,
    pub datacenter: String,
    pub keyspace: String,
    /// Extra `name=value` parameters, whitespace separated
    pub additional_params: Option<String>,
}

impl Nb5Workload {
    pub fn new(
        jar: impl Into<PathBuf>,
        yaml: YamlSource,
        host: impl Into<String>,
        datacenter: impl Into<String>,
        keyspace: impl Into<String>,
    ) -> Self {
        Self {
            jar: jar.into(),
            yaml,
            host: host.into(),
            datacenter: datacenter.into(),
            keyspace: keyspace.into(),
            additional_params: None,
        }
    }

    pub fn with_additional_params(mut self, params: impl Into<String>) -> Self {
        let params = params.into();
        self.additional_params = if params.trim().is_empty() {
            None
        } else {
            Some(params)
        };
        self
    }

    /// Whether the NB5 jar exists.
    pub fn jar_exists(jar: &Path) -> bool {
        jar.is_file()
    }

    /// Multi-line command line for `yaml_file`, suitable for a shell script.
    pub fn command_line(&self, yaml_file: &str) -> String {
        let mut parts = vec![
            "java".to_string(),
            "--enable-preview".to_string(),
            "-jar".to_string(),
            self.jar.display().to_string(),
            format!("\"{}\"", yaml_file),
            format!("host={}", self.host),
            format!("localdc={}", self.datacenter),
            format!("keyspace={}", self.keyspace),
        ];
        if let Some(ref extra) = self.additional_params {
            parts.push(extra.trim().to_string());
        }
        parts.push("--progress console:1s".to_string());
        parts.join(LINE_JOIN)
    }

    /// Downloadable bash script running this workload against `yaml_file`.
    pub fn script(&self, yaml_file: &str) -> String {
        format!(
            "#!/bin/bash\n\n\
             # NoSQLBench 5 execution script\n\
             # Executes workload against {}\n\n\
             {}\n\n\
             # End of script\n",
            self.host,
            self.command_line(yaml_file)
        )
    }

    /// File name offered for the downloadable script.
    pub fn script_name(yaml_file: &str) -> String {
        let base = Path::new(yaml_file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workload".to_string());
        format!("nb5_execute_{}.sh", base)
    }

    fn args(&self, yaml_path: &Path) -> Vec<String> {
        let mut args = vec![
            "--enable-preview".to_string(),
            "-jar".to_string(),
            self.jar.display().to_string(),
            yaml_path.display().to_string(),
            format!("host={}", self.host),
            format!("localdc={}", self.datacenter),
            format!("keyspace={}", self.keyspace),
        ];
        if let Some(ref extra) = self.additional_params {
            args.extend(extra.split_whitespace().map(str::to_string));
        }
        args.push("--progress".to_string());
        args.push("console:1s".to_string());
        args
    }

    fn check_connection(&self) -> Result<()> {
        for (name, value) in [
            ("host", &self.host),
            ("datacenter", &self.datacenter),
            ("keyspace", &self.keyspace),
        ] {
            if value.trim().is_empty() {
                return Err(RunnerError::InvalidWorkload(format!("{} is required", name)));
            }
        }
        Ok(())
    }

    fn write_scratch(scratch_dir: &Path, content: &str) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("nb5-workload-")
            .suffix(".yaml")
            .tempfile_in(scratch_dir)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        let path = file.into_temp_path().keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

impl Workload for Nb5Workload {
    fn display(&self) -> String {
        match self.yaml {
            YamlSource::File(ref path) => self.command_line(&path.display().to_string()),
            YamlSource::Inline(_) => self.command_line("workload.yaml"),
        }
    }

    fn prepare(&self, scratch_dir: &Path) -> Result<PreparedLaunch> {
        self.check_connection()?;
        if !Self::jar_exists(&self.jar) {
            return Err(RunnerError::InvalidWorkload(format!(
                "NB5 JAR file not found at {}",
                self.jar.display()
            )));
        }

        let (yaml_path, scratch) = match self.yaml {
            YamlSource::Inline(ref content) => {
                if content.trim().is_empty() {
                    return Err(RunnerError::InvalidWorkload(
                        "yaml_content is empty".to_string(),
                    ));
                }
                (Self::write_scratch(scratch_dir, content)?, true)
            }
            YamlSource::File(ref path) => (path.clone(), false),
        };

        let descriptor = CommandDescriptor::new("java").args(self.args(&yaml_path));
        let mut launch = PreparedLaunch::new(descriptor)
            .with_display(self.command_line(&yaml_path.display().to_string()));
        if scratch {
            launch = launch.with_temp_resource(yaml_path);
        }
        Ok(launch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(yaml: YamlSource, jar: &Path) -> Nb5Workload {
        Nb5Workload::new(jar, yaml, "10.0.0.1", "dc1", "baselines")
    }

    #[test]
    fn command_line_matches_expected_layout() {
        let wl = workload(YamlSource::File("w.yaml".into()), Path::new("/opt/nb5.jar"))
            .with_additional_params("cycles=100 threads=4");
        assert_eq!(
            wl.command_line("/tmp/w.yaml"),
            "java \\\n  --enable-preview \\\n  -jar \\\n  /opt/nb5.jar \\\n  \"/tmp/w.yaml\" \\\n  \
             host=10.0.0.1 \\\n  localdc=dc1 \\\n  keyspace=baselines \\\n  \
             cycles=100 threads=4 \\\n  --progress console:1s"
        );
    }

    #[test]
    fn blank_additional_params_are_dropped() {
        let wl = workload(YamlSource::File("w.yaml".into()), Path::new("nb5.jar"))
            .with_additional_params("   ");
        assert!(wl.additional_params.is_none());
    }

    #[test]
    fn script_wraps_command_line() {
        let wl = workload(YamlSource::File("w.yaml".into()), Path::new("nb5.jar"));
        let script = wl.script("w.yaml");
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("against 10.0.0.1"));
        assert!(script.contains(&wl.command_line("w.yaml")));
        assert!(script.ends_with("# End of script\n"));
        assert_eq!(Nb5Workload::script_name("/data/w.yaml"), "nb5_execute_w.yaml.sh");
    }

    #[test]
    fn prepare_materializes_inline_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("nb5.jar");
        std::fs::write(&jar, b"jar").unwrap();

        let wl = workload(YamlSource::Inline("scenarios: {}\n".into()), &jar)
            .with_additional_params("cycles=10");
        let launch = wl.prepare(dir.path()).unwrap();

        assert_eq!(launch.temp_resources.len(), 1);
        let yaml = &launch.temp_resources[0];
        assert!(yaml.starts_with(dir.path()));
        assert_eq!(yaml.extension().unwrap(), "yaml");
        assert_eq!(std::fs::read_to_string(yaml).unwrap(), "scenarios: {}\n");

        let d = &launch.descriptor;
        assert_eq!(d.program, PathBuf::from("java"));
        assert_eq!(d.args[3], yaml.display().to_string());
        assert!(d.args.contains(&"host=10.0.0.1".to_string()));
        assert!(d.args.contains(&"cycles=10".to_string()));
        assert_eq!(&d.args[d.args.len() - 2..], ["--progress", "console:1s"]);
        assert!(launch.display.contains(&yaml.display().to_string()));
    }

    #[test]
    fn prepare_uses_existing_file_without_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("nb5.jar");
        std::fs::write(&jar, b"jar").unwrap();

        let wl = workload(YamlSource::File("/data/w.yaml".into()), &jar);
        let launch = wl.prepare(dir.path()).unwrap();
        assert!(launch.temp_resources.is_empty());
        assert_eq!(launch.descriptor.args[3], "/data/w.yaml");
    }

    #[test]
    fn prepare_rejects_missing_jar_and_blank_fields() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.jar");

        let err = workload(YamlSource::Inline("a: 1".into()), &missing)
            .prepare(dir.path())
            .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidWorkload(ref m) if m.contains("not found")));

        let jar = dir.path().join("nb5.jar");
        std::fs::write(&jar, b"jar").unwrap();
        let mut wl = workload(YamlSource::Inline("a: 1".into()), &jar);
        wl.keyspace = " ".into();
        let err = wl.prepare(dir.path()).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidWorkload(ref m) if m.contains("keyspace")));

        let err = workload(YamlSource::Inline("".into()), &jar)
            .prepare(dir.path())
            .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidWorkload(_)));
        // Nothing was left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
