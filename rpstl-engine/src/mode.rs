//! 处理模式的静态注册表，以及把一次请求展开为批处理计划。

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rpstl_config::AppConfig;
use rpstl_io::mapping::{DelimitedRowSource, StructuredMapping, load_pipe_rows};
use rpstl_io::{DocumentLoader, FormatVersion, GuardedLoader};
use tracing::{debug, info, warn};

use crate::associate::ReferenceAssociator;
use crate::classify::PatternClassifier;
use crate::errors::EngineError;
use crate::keyfile::{Emitter, JsonEmitter, XmlEmitter};
use crate::mapping_table::MappingTable;
use crate::pipeline::Pipeline;
use crate::rewrite::{CollapsePolicy, RewriteOptions};
use crate::stages::{
    ConvertStage, CopyLayerStage, DeliverStage, ExtractStage, FrameCleanupStage, IdentifierStage,
    KeyfileStage, LayerCheckStage, ListLayersStage, LowercaseStage, NameLayersStage,
    ReferenceUpdateStage, RewriteStage, UnavailableInputStage, XrefMergeStage,
    load_identifier_list,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: &'static [ParameterSpec],
    /// 是否连同子目录一起收集图纸。
    pub recursive: bool,
}

impl ModeDescriptor {
    pub fn parameter(&self, name: &str) -> Option<&'static ParameterSpec> {
        self.parameters.iter().find(|spec| spec.name == name)
    }
}

const MAPPING: &str = "mapping";
const COLLAPSE_UNPREFIXED: &str = "collapse-unprefixed";
const FORMAT: &str = "format";
const SUFFIX: &str = "suffix";
const IDENTIFIERS: &str = "identifiers";
const VERSION: &str = "version";
const APPLY: &str = "apply";

pub static MODES: &[ModeDescriptor] = &[
    ModeDescriptor {
        id: "keyfile",
        name: "Keyfile",
        description: "Write a keyfile report beside every drawing",
        parameters: &[ParameterSpec {
            name: FORMAT,
            description: "xml (default) or json",
            required: false,
        }],
        recursive: false,
    },
    ModeDescriptor {
        id: "remap",
        name: "Layer Remap",
        description: "Merge xrefs and rename frame layers into the identifier scheme",
        parameters: &[
            ParameterSpec {
                name: MAPPING,
                description: "tab-delimited mapping rows: legacy key, new key, priority",
                required: true,
            },
            ParameterSpec {
                name: COLLAPSE_UNPREFIXED,
                description: "collapse drawings without prefix notes into one -0 layer",
                required: false,
            },
        ],
        recursive: false,
    },
    ModeDescriptor {
        id: "deliver",
        name: "Delivery Format",
        description: "Keep the base layer and the single dashed layer, save as {stem}-{suffix}",
        parameters: &[ParameterSpec {
            name: SUFFIX,
            description: "dash number kept in delivered drawings",
            required: true,
        }],
        recursive: false,
    },
    ModeDescriptor {
        id: "copy-layer",
        name: "Copy Layer",
        description: "Copy an old dashed layer to a new dash number",
        parameters: &[ParameterSpec {
            name: MAPPING,
            description: "pipe-delimited rows: old name|old dashed name|new dashed name",
            required: true,
        }],
        recursive: false,
    },
    ModeDescriptor {
        id: "name-layers",
        name: "Name Layers",
        description: "Keep only layers named in an identifier list",
        parameters: &[ParameterSpec {
            name: IDENTIFIERS,
            description: "text file listing MS######-N identifiers",
            required: true,
        }],
        recursive: false,
    },
    ModeDescriptor {
        id: "update-references",
        name: "Update References",
        description: "Substitute manual references from a structured mapping document",
        parameters: &[ParameterSpec {
            name: MAPPING,
            description: "XML mapping document",
            required: true,
        }],
        recursive: false,
    },
    ModeDescriptor {
        id: "lowercase-layers",
        name: "Lowercase Layers",
        description: "Lowercase every layer name",
        parameters: &[],
        recursive: false,
    },
    ModeDescriptor {
        id: "convert",
        name: "Convert",
        description: "Save every drawing with another format version",
        parameters: &[ParameterSpec {
            name: VERSION,
            description: "2000, 2004, 2007, 2010, 2013 or 2018",
            required: true,
        }],
        recursive: false,
    },
    ModeDescriptor {
        id: "check-layers",
        name: "Check Layers",
        description: "Report layers outside the delivery conventions, optionally removing them",
        parameters: &[ParameterSpec {
            name: APPLY,
            description: "delete removable layers, unlock kept ones and save in place",
            required: false,
        }],
        recursive: false,
    },
    ModeDescriptor {
        id: "list-layers",
        name: "List Layers",
        description: "Write {stem}.txt listing the layers of every drawing, subfolders included",
        parameters: &[],
        recursive: true,
    },
    ModeDescriptor {
        id: "extract",
        name: "Extract",
        description: "Copy drawings from subfolders into the top folder without overwriting",
        parameters: &[],
        recursive: true,
    },
];

pub fn find_mode(id: &str) -> Option<&'static ModeDescriptor> {
    let id = id.trim();
    MODES.iter().find(|mode| mode.id.eq_ignore_ascii_case(id))
}

/// 单个图纸任务。`destination` 为空时由阶段决定保存位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
}

impl Job {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: None,
        }
    }
}

pub struct BatchPlan {
    pub mode: &'static ModeDescriptor,
    pub jobs: Vec<Job>,
    pub pipeline: Pipeline,
    pub log_path: PathBuf,
    /// 规划阶段发现的问题，批处理开始时写入日志。
    pub notes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModeRequest {
    pub mode: String,
    pub folder: PathBuf,
    pub parameters: BTreeMap<String, String>,
}

impl ModeRequest {
    pub fn new(mode: impl Into<String>, folder: impl Into<PathBuf>) -> Self {
        Self {
            mode: mode.into(),
            folder: folder.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn require(&self, name: &str) -> Result<&str, EngineError> {
        self.parameter(name)
            .ok_or_else(|| EngineError::MissingParameter {
                mode: self.mode.clone(),
                parameter: name.to_string(),
            })
    }

    fn flag(&self, name: &str) -> Result<bool, EngineError> {
        match self.parameter(name).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(EngineError::InvalidParameter {
                parameter: name.to_string(),
                value: other.to_string(),
            }),
        }
    }

    /// 相对路径参数按批处理目录解析。
    fn path_parameter(&self, name: &str) -> Result<PathBuf, EngineError> {
        let raw = Path::new(self.require(name)?);
        Ok(if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.folder.join(raw)
        })
    }

    /// 校验参数、加载映射输入并组装阶段。映射输入缺失或格式错误时，每个图纸各失败一次。
    pub fn plan(
        &self,
        config: &AppConfig,
        discovered: Vec<PathBuf>,
        loader: Arc<dyn DocumentLoader + Send + Sync>,
    ) -> Result<BatchPlan, EngineError> {
        let mode = find_mode(&self.mode).ok_or_else(|| EngineError::UnknownMode(self.mode.clone()))?;
        for name in self.parameters.keys() {
            if mode.parameter(name).is_none() {
                debug!(mode = mode.id, parameter = %name, "忽略未知参数");
            }
        }

        let mut jobs: Vec<Job> = discovered.into_iter().map(Job::new).collect();
        let mut notes = Vec::new();
        let layers = &config.layers;

        let pipeline = match mode.id {
            "keyfile" => {
                let emitter: Box<dyn Emitter + Send + Sync> =
                    match self.parameter(FORMAT).map(str::to_ascii_lowercase).as_deref() {
                        None | Some("xml") => Box::new(XmlEmitter::new(&config.keyfile)),
                        Some("json") => Box::new(JsonEmitter),
                        Some(other) => {
                            return Err(EngineError::InvalidParameter {
                                parameter: FORMAT.to_string(),
                                value: other.to_string(),
                            });
                        }
                    };
                Pipeline::new(false).with_stage(KeyfileStage::new(
                    PatternClassifier::from_config(layers),
                    ReferenceAssociator::new(config.association),
                    config.prefix_note,
                    config.keyfile.clone(),
                    emitter,
                ))
            }
            "remap" => {
                let path = self.path_parameter(MAPPING)?;
                let collapse = if self.flag(COLLAPSE_UNPREFIXED)? {
                    CollapsePolicy::WhenNoPrefixNotes
                } else {
                    CollapsePolicy::Never
                };
                let options = RewriteOptions::from_config(layers, config.prefix_note)?.with_collapse(collapse);
                let xrefs = GuardedLoader::new(Arc::clone(&loader))
                    .with_poll_interval(Duration::from_millis(config.batch.poll_interval_ms))
                    .with_deadline(config.batch.load_timeout_secs.map(Duration::from_secs));
                match MappingTable::load(&DelimitedRowSource::new(), &path) {
                    Ok(table) => Pipeline::new(true)
                        .with_stage(XrefMergeStage::new(xrefs))
                        .with_stage(IdentifierStage::new(layers.base_layer.clone()))
                        .with_stage(FrameCleanupStage::new(config.remap.clone()))
                        .with_stage(RewriteStage::new(Arc::new(table), Arc::new(options))),
                    Err(err) => unavailable(&path, err),
                }
            }
            "deliver" => Pipeline::new(true).with_stage(DeliverStage::new(
                self.require(SUFFIX)?,
                layers.base_layer.clone(),
                layers.marker_layer.clone(),
            )),
            "copy-layer" => {
                let path = self.path_parameter(MAPPING)?;
                match load_pipe_rows(&path) {
                    Ok(rows) => Pipeline::new(true).with_stage(CopyLayerStage::new(Arc::new(rows))),
                    Err(err) => unavailable(&path, err),
                }
            }
            "name-layers" => {
                let path = self.path_parameter(IDENTIFIERS)?;
                match load_identifier_list(&path) {
                    Ok(identifiers) => Pipeline::new(true).with_stage(NameLayersStage::new(
                        Arc::new(identifiers),
                        layers.base_layer.clone(),
                    )),
                    Err(err) => unavailable(&path, err),
                }
            }
            "update-references" => {
                let path = self.path_parameter(MAPPING)?;
                let mapping = match StructuredMapping::load(&path) {
                    Ok(mapping) => mapping,
                    Err(err) => return Ok(self.finish(config, mode, jobs, unavailable(&path, err), notes)),
                };
                if mapping.ignored_duplicates > 0 {
                    notes.push(format!(
                        "{} duplicate mapping entries ignored; the first occurrence was used",
                        mapping.ignored_duplicates
                    ));
                }
                if mapping.is_per_file() {
                    jobs = mapping
                        .files
                        .iter()
                        .map(|file| Job {
                            source: self.folder.join(&file.old_fname),
                            destination: Some(self.folder.join(&file.new_fname)),
                        })
                        .collect();
                } else {
                    let updated = self.folder.join("Updated");
                    for job in &mut jobs {
                        if let Some(name) = job.source.file_name() {
                            job.destination = Some(updated.join(name));
                        }
                    }
                }
                Pipeline::new(true).with_stage(ReferenceUpdateStage::new(
                    Arc::new(mapping),
                    config.reference_zone,
                ))
            }
            "lowercase-layers" => Pipeline::new(true).with_stage(LowercaseStage),
            "convert" => {
                let raw = self.require(VERSION)?;
                let format = FormatVersion::parse(raw).ok_or_else(|| EngineError::InvalidParameter {
                    parameter: VERSION.to_string(),
                    value: raw.to_string(),
                })?;
                Pipeline::new(true).with_stage(ConvertStage::new(format))
            }
            "check-layers" => {
                let apply = self.flag(APPLY)?;
                Pipeline::new(apply).with_stage(LayerCheckStage::new(
                    LayerCheckStage::report_path(&self.folder),
                    apply,
                    layers.base_layer.clone(),
                ))
            }
            "list-layers" => Pipeline::new(false).with_stage(ListLayersStage),
            "extract" => Pipeline::new(false).with_stage(ExtractStage::new(self.folder.clone())),
            other => return Err(EngineError::UnknownMode(other.to_string())),
        };

        Ok(self.finish(config, mode, jobs, pipeline, notes))
    }

    fn finish(
        &self,
        config: &AppConfig,
        mode: &'static ModeDescriptor,
        jobs: Vec<Job>,
        pipeline: Pipeline,
        notes: Vec<String>,
    ) -> BatchPlan {
        let log_path = self
            .folder
            .join(format!("{}{}", mode.id, config.batch.log_file_suffix));
        info!(
            mode = mode.id,
            jobs = jobs.len(),
            stages = ?pipeline.stage_names(),
            "批处理计划已生成"
        );
        BatchPlan {
            mode,
            jobs,
            pipeline,
            log_path,
            notes,
        }
    }
}

/// 映射输入不可用：不中止批次，每个图纸失败一次并写日志。
fn unavailable(path: &Path, err: impl fmt::Display) -> Pipeline {
    warn!(path = %path.display(), error = %err, "映射输入不可用");
    Pipeline::new(false).with_stage(UnavailableInputStage::new(path, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpstl_io::NativeStore;
    use std::collections::BTreeSet;
    use std::fs;

    fn loader() -> Arc<dyn DocumentLoader + Send + Sync> {
        Arc::new(NativeStore::new())
    }

    #[test]
    fn registry_ids_are_unique_and_case_insensitive() {
        let ids: BTreeSet<&str> = MODES.iter().map(|mode| mode.id).collect();
        assert_eq!(ids.len(), MODES.len());
        assert_eq!(find_mode(" Remap ").map(|mode| mode.id), Some("remap"));
        assert!(find_mode("explode").is_none());
    }

    #[test]
    fn missing_required_parameter_is_reported() {
        let request = ModeRequest::new("deliver", "/tmp/none");
        let err = request
            .plan(&AppConfig::default(), Vec::new(), loader())
            .err()
            .expect("suffix is required");
        assert!(matches!(err, EngineError::MissingParameter { ref parameter, .. } if parameter == SUFFIX));
    }

    #[test]
    fn unknown_mode_and_bad_flag_fail_planning() {
        let config = AppConfig::default();
        assert!(matches!(
            ModeRequest::new("explode", ".").plan(&config, Vec::new(), loader()),
            Err(EngineError::UnknownMode(_))
        ));

        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("rows.txt"), "ABCDEFGHIJKLMNOP\t3\t1\n").expect("rows");
        let request = ModeRequest::new("remap", dir.path())
            .with_parameter(MAPPING, "rows.txt")
            .with_parameter(COLLAPSE_UNPREFIXED, "maybe");
        assert!(matches!(
            request.plan(&config, Vec::new(), loader()),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn missing_mapping_file_fails_each_drawing_not_the_plan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = ModeRequest::new("copy-layer", dir.path())
            .with_parameter(MAPPING, "absent.txt")
            .plan(
                &AppConfig::default(),
                vec![dir.path().join("a.json")],
                loader(),
            )
            .expect("plan");
        assert_eq!(plan.pipeline.stage_names(), vec!["unavailable-input"]);
        assert_eq!(plan.jobs.len(), 1);
    }

    #[test]
    fn remap_plan_builds_stage_list_and_log_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("rows.txt"), "ABCDEFGHIJKLMNOP\t3\t1\n").expect("rows");
        let request = ModeRequest::new("remap", dir.path()).with_parameter(MAPPING, "rows.txt");
        let plan = request
            .plan(
                &AppConfig::default(),
                vec![dir.path().join("a.json")],
                loader(),
            )
            .expect("plan");
        assert_eq!(
            plan.pipeline.stage_names(),
            vec!["xref-merge", "identifier", "frame-cleanup", "rewrite"]
        );
        assert!(plan.pipeline.persists());
        assert_eq!(plan.jobs, vec![Job::new(dir.path().join("a.json"))]);
        assert_eq!(plan.log_path, dir.path().join("remap_log.txt"));
    }

    #[test]
    fn per_file_reference_mapping_replaces_discovered_jobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("map.xml"),
            r#"<mapping><file oldfname="old.json" newfname="new.json"><map reftype="tm" old="1" new="2"/></file></mapping>"#,
        )
        .expect("mapping");
        let plan = ModeRequest::new("update-references", dir.path())
            .with_parameter(MAPPING, "map.xml")
            .plan(
                &AppConfig::default(),
                vec![dir.path().join("ignored.json")],
                loader(),
            )
            .expect("plan");
        assert_eq!(
            plan.jobs,
            vec![Job {
                source: dir.path().join("old.json"),
                destination: Some(dir.path().join("new.json")),
            }]
        );
    }

    #[test]
    fn convert_rejects_unknown_versions() {
        let request = ModeRequest::new("convert", ".").with_parameter(VERSION, "R14");
        assert!(matches!(
            request.plan(&AppConfig::default(), Vec::new(), loader()),
            Err(EngineError::InvalidParameter { .. })
        ));
        let plan = ModeRequest::new("convert", ".")
            .with_parameter(VERSION, "r2004")
            .plan(&AppConfig::default(), Vec::new(), loader())
            .expect("plan");
        assert_eq!(plan.pipeline.stage_names(), vec!["convert"]);
    }

    #[test]
    fn layer_tools_plan_their_stages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig::default();
        let report = ModeRequest::new("check-layers", dir.path())
            .plan(&config, Vec::new(), loader())
            .expect("plan");
        assert_eq!(report.pipeline.stage_names(), vec!["check-layers"]);
        assert!(!report.pipeline.persists());
        let apply = ModeRequest::new("check-layers", dir.path())
            .with_parameter(APPLY, "yes")
            .plan(&config, Vec::new(), loader())
            .expect("plan");
        assert!(apply.pipeline.persists());

        for id in ["list-layers", "extract"] {
            let plan = ModeRequest::new(id, dir.path())
                .plan(&config, Vec::new(), loader())
                .expect("plan");
            assert_eq!(plan.pipeline.stage_names(), vec![id]);
            assert!(!plan.pipeline.persists());
            assert!(plan.mode.recursive);
        }
        assert!(!find_mode("check-layers").expect("mode").recursive);
    }
}
