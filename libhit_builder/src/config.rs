use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::DEFAULT_NOTICE_LIMIT;
use super::detector::DetectorKind;
use super::error::ConfigError;
use super::event_builder::{BuildWindow, StreamConfig};
use super::pipeline::BuilderOptions;

/// Which detector system a ring item source belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Body header source id. None matches items without a body header.
    pub source_id: Option<u32>,
    pub system: DetectorKind,
}

fn default_notice_limit() -> u64 {
    DEFAULT_NOTICE_LIMIT
}

/// Structure representing the application configuration. Contains pathing, run and stream information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub evt_path: Option<PathBuf>,
    pub output_path: PathBuf,
    pub channel_map_path: Option<PathBuf>,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub n_threads: i32,
    pub sources: Vec<SourceConfig>,
    pub streams: Vec<StreamConfig>,
    #[serde(default = "default_notice_limit")]
    pub unknown_channel_notice_limit: u64,
    #[serde(default)]
    pub discard_foreign_triggers: bool,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid, detector setup is a single
    /// JANUS source written event by event
    fn default() -> Self {
        Self {
            evt_path: None,
            output_path: PathBuf::from("None"),
            channel_map_path: None,
            first_run_number: 0,
            last_run_number: 0,
            n_threads: 1,
            sources: vec![SourceConfig {
                source_id: None,
                system: DetectorKind::Janus,
            }],
            streams: vec![StreamConfig {
                name: String::from("janus"),
                build_window: BuildWindow::Immediate,
                systems: vec![DetectorKind::Janus],
            }],
            unknown_channel_notice_limit: DEFAULT_NOTICE_LIMIT,
            discard_foreign_triggers: false,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check if a specific run exists by evaluating the existance of its evt directory
    pub fn does_run_exist(&self, run_number: i32) -> bool {
        match self.get_evt_directory(run_number) {
            Ok(dir) => dir.exists(),
            Err(_) => false,
        }
    }

    /// Get the path to the NSCLDAQ directory of a run, assuming the standard run# layout
    pub fn get_evt_directory(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        let evt_path = self.evt_path.as_ref().ok_or(ConfigError::NoEvtPath)?;
        Ok(evt_path.join(format!("run{run_number}")))
    }

    /// Get the path to the output file of a run
    pub fn get_output_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        if self.output_path.exists() {
            Ok(self
                .output_path
                .join(format!("{}.h5", self.get_run_str(run_number))))
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    /// Which detector system the items from this source feed, if any
    pub fn source_system(&self, source_id: Option<u32>) -> Option<DetectorKind> {
        self.sources
            .iter()
            .find(|s| s.source_id == source_id)
            .map(|s| s.system)
    }

    /// Every detector system named by a source
    pub fn systems(&self) -> Vec<DetectorKind> {
        let mut systems: Vec<DetectorKind> = self.sources.iter().map(|s| s.system).collect();
        systems.sort();
        systems.dedup();
        systems
    }

    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            notice_limit: self.unknown_channel_notice_limit,
            discard_foreign_triggers: self.discard_foreign_triggers,
        }
    }

    /// Construct the run string used for output files
    fn get_run_str(&self, run_number: i32) -> String {
        format!("run_{run_number:0>4}")
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn has_evt_path(&self) -> bool {
        self.evt_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_streams() {
        let yaml = r#"
evt_path: /data/evt
output_path: /data/h5
channel_map_path: null
first_run_number: 3
last_run_number: 5
n_threads: 2
sources:
  - source_id: 4
    system: janus
streams:
  - name: janus
    build_window: immediate
  - name: coincidences
    build_window: !window 2000
    systems: [janus]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].build_window, BuildWindow::Immediate);
        assert!(config.streams[0].systems.is_empty());
        assert_eq!(config.streams[1].build_window, BuildWindow::Window(2000));
        assert_eq!(config.source_system(Some(4)), Some(DetectorKind::Janus));
        assert_eq!(config.source_system(None), None);
        assert_eq!(config.unknown_channel_notice_limit, DEFAULT_NOTICE_LIMIT);
        assert!(!config.discard_foreign_triggers);
        assert_eq!(
            config.get_evt_directory(4).unwrap(),
            PathBuf::from("/data/evt/run4")
        );
    }

    #[test]
    fn test_template_round_trip() {
        let template = Config::default();
        let yaml = serde_yaml::to_string(&template).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.streams, template.streams);
        assert_eq!(parsed.sources, template.sources);
        assert!(parsed.is_n_threads_valid());
    }
}
